//! Dependency declaration during scanning.

use std::path::{Path, PathBuf};

use kiln_common::Guid;

use crate::asset::{DependencyKind, SourceAsset};
use crate::error::PipelineError;
use crate::pipeline::PipelineRegistry;

/// A declared edge to another asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// The referenced asset.
    pub guid: Guid,
    /// Whether the reference constrains build order.
    pub kind: DependencyKind,
}

/// An inline child asset without its own GUID, hashed as part of its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAsset {
    /// Type id of the child.
    pub asset_type: String,
    /// Serialized child.
    pub payload: Vec<u8>,
}

/// How deep embedded assets may nest inside one owner.
pub const MAX_EMBEDDING_DEPTH: usize = 32;

/// Collects what a scanner declares for one asset.
pub struct PipelineDepends<'a> {
    registry: &'a PipelineRegistry,
    owner: Guid,
    depth: usize,
    dependencies: Vec<Dependency>,
    embedded: Vec<EmbeddedAsset>,
    files: Vec<PathBuf>,
}

impl<'a> PipelineDepends<'a> {
    /// Starts collecting for the asset `owner`.
    pub fn new(registry: &'a PipelineRegistry, owner: Guid) -> Self {
        Self {
            registry,
            owner,
            depth: 0,
            dependencies: Vec::new(),
            embedded: Vec::new(),
            files: Vec::new(),
        }
    }

    /// The asset being scanned.
    pub fn owner(&self) -> Guid {
        self.owner
    }

    /// Declares a dependency on another asset.
    ///
    /// A repeated declaration keeps the position of the first one; declaring
    /// an earlier soft dependency as hard upgrades it. References to the
    /// owner itself and to the null GUID are ignored.
    pub fn add_dependency(&mut self, guid: Guid, kind: DependencyKind) {
        if guid == self.owner || guid.is_null() {
            return;
        }
        match self.dependencies.iter_mut().find(|d| d.guid == guid) {
            Some(existing) => {
                if kind == DependencyKind::Hard {
                    existing.kind = DependencyKind::Hard;
                }
            }
            None => self.dependencies.push(Dependency { guid, kind }),
        }
    }

    /// Declares an inline child asset.
    ///
    /// The child's scanner runs immediately; whatever it declares becomes a
    /// declaration of the owner. Children nested more than
    /// [`MAX_EMBEDDING_DEPTH`] levels deep are rejected.
    pub fn add_embedded(
        &mut self,
        asset_type: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), PipelineError> {
        if self.depth >= MAX_EMBEDDING_DEPTH {
            return Err(PipelineError::EmbeddingTooDeep {
                owner: self.owner,
                limit: MAX_EMBEDDING_DEPTH,
            });
        }
        let pipeline = self
            .registry
            .get(asset_type)
            .ok_or_else(|| PipelineError::NoPipeline {
                asset_type: asset_type.to_string(),
            })?
            .clone();
        let child = SourceAsset {
            guid: Guid::NULL,
            asset_type: asset_type.to_string(),
            payload: payload.into(),
            source_instance: Some(self.owner),
        };
        self.embedded.push(EmbeddedAsset {
            asset_type: child.asset_type.clone(),
            payload: child.payload.clone(),
        });
        self.depth += 1;
        let result = pipeline.scan(self, &child);
        self.depth -= 1;
        result
    }

    /// Declares an external file whose content feeds the fingerprint.
    /// Repeated paths are recorded once.
    pub fn add_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if !self.files.iter().any(|p| p == path) {
            self.files.push(path.to_path_buf());
        }
    }

    /// Declared dependencies in discovery order.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Declared embedded children in discovery order.
    pub fn embedded(&self) -> &[EmbeddedAsset] {
        &self.embedded
    }

    /// Declared files in discovery order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub(crate) fn into_parts(self) -> (Vec<Dependency>, Vec<EmbeddedAsset>, Vec<PathBuf>) {
        (self.dependencies, self.embedded, self.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BuildContext;
    use crate::pipeline::{AssetBuilder, DependencyScanner};
    use std::io::Write;
    use std::sync::Arc;

    /// Declares one hard dependency per 16-byte chunk of the payload.
    struct ChunkRefs;

    impl DependencyScanner for ChunkRefs {
        fn scan(
            &self,
            depends: &mut PipelineDepends<'_>,
            asset: &SourceAsset,
        ) -> Result<(), PipelineError> {
            for chunk in asset.payload.chunks(16) {
                let bytes: [u8; 16] = chunk
                    .try_into()
                    .map_err(|_| PipelineError::invalid("short reference"))?;
                depends.add_dependency(Guid::from_bytes(bytes), DependencyKind::Hard);
            }
            Ok(())
        }
    }

    impl AssetBuilder for ChunkRefs {
        fn version(&self) -> u32 {
            1
        }

        fn build(
            &self,
            _ctx: &BuildContext<'_>,
            _asset: &SourceAsset,
            _output: &mut dyn Write,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    fn registry() -> PipelineRegistry {
        let mut registry = PipelineRegistry::new();
        registry.register("refs", Arc::new(ChunkRefs));
        registry
    }

    #[test]
    fn duplicates_keep_first_position() {
        let registry = registry();
        let mut depends = PipelineDepends::new(&registry, Guid::from_u128(100));
        let (a, b) = (Guid::from_u128(1), Guid::from_u128(2));
        depends.add_dependency(a, DependencyKind::Hard);
        depends.add_dependency(b, DependencyKind::Hard);
        depends.add_dependency(a, DependencyKind::Hard);
        let guids: Vec<Guid> = depends.dependencies().iter().map(|d| d.guid).collect();
        assert_eq!(guids, vec![a, b]);
    }

    #[test]
    fn hard_upgrades_soft() {
        let registry = registry();
        let mut depends = PipelineDepends::new(&registry, Guid::from_u128(100));
        let a = Guid::from_u128(1);
        depends.add_dependency(a, DependencyKind::Soft);
        depends.add_dependency(a, DependencyKind::Hard);
        depends.add_dependency(a, DependencyKind::Soft);
        assert_eq!(
            depends.dependencies(),
            &[Dependency {
                guid: a,
                kind: DependencyKind::Hard
            }]
        );
    }

    #[test]
    fn self_and_null_references_are_ignored() {
        let registry = registry();
        let owner = Guid::from_u128(100);
        let mut depends = PipelineDepends::new(&registry, owner);
        depends.add_dependency(owner, DependencyKind::Hard);
        depends.add_dependency(Guid::NULL, DependencyKind::Soft);
        assert!(depends.dependencies().is_empty());
    }

    #[test]
    fn embedded_child_declarations_merge_into_parent() {
        let registry = registry();
        let mut depends = PipelineDepends::new(&registry, Guid::from_u128(100));
        let child_ref = Guid::from_u128(5);
        depends
            .add_embedded("refs", child_ref.as_bytes().to_vec())
            .unwrap();
        assert_eq!(depends.embedded().len(), 1);
        assert_eq!(depends.embedded()[0].asset_type, "refs");
        assert_eq!(depends.dependencies()[0].guid, child_ref);
    }

    /// Embeds another copy of itself on every scan.
    struct Nesting;

    impl DependencyScanner for Nesting {
        fn scan(
            &self,
            depends: &mut PipelineDepends<'_>,
            _asset: &SourceAsset,
        ) -> Result<(), PipelineError> {
            depends.add_embedded("nesting", Vec::new())
        }
    }

    impl AssetBuilder for Nesting {
        fn version(&self) -> u32 {
            1
        }

        fn build(
            &self,
            _ctx: &BuildContext<'_>,
            _asset: &SourceAsset,
            _output: &mut dyn Write,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    #[test]
    fn self_embedding_scanner_hits_depth_limit() {
        let mut registry = PipelineRegistry::new();
        registry.register("nesting", Arc::new(Nesting));
        let owner = Guid::from_u128(100);
        let mut depends = PipelineDepends::new(&registry, owner);
        let err = depends.add_embedded("nesting", Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::EmbeddingTooDeep { owner: o, limit: MAX_EMBEDDING_DEPTH } if o == owner
        ));
        assert_eq!(depends.embedded().len(), MAX_EMBEDDING_DEPTH);
    }

    #[test]
    fn embedded_unknown_type_fails() {
        let registry = registry();
        let mut depends = PipelineDepends::new(&registry, Guid::from_u128(100));
        let err = depends.add_embedded("material", Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::NoPipeline { .. }));
    }

    #[test]
    fn files_are_deduplicated() {
        let registry = registry();
        let mut depends = PipelineDepends::new(&registry, Guid::from_u128(100));
        depends.add_file("a.png");
        depends.add_file("b.png");
        depends.add_file("a.png");
        assert_eq!(
            depends.files(),
            &[PathBuf::from("a.png"), PathBuf::from("b.png")]
        );
    }
}
