//! Asset kinds built into the CLI.
//!
//! Both read their [`AssetDecl`] back from the source payload. `raw` copies
//! a file from the asset root; `group` writes a manifest of its members.
//! File paths are declared relative to the asset root; the builder resolves
//! them through [`kiln_pipeline::PipelineBuilder::with_file_root`].

use std::io::Write;
use std::sync::Arc;

use kiln_config::{AssetDecl, DependencyKindDecl};
use kiln_pipeline::{
    AssetBuilder, BuildContext, DependencyKind, DependencyScanner, PipelineDepends,
    PipelineError, PipelineRegistry, SourceAsset,
};

/// Type id of file-copy assets.
pub const RAW: &str = "raw";
/// Type id of bundle assets.
pub const GROUP: &str = "group";

/// Registry with every built-in pipeline.
pub fn registry() -> PipelineRegistry {
    let mut registry = PipelineRegistry::new();
    registry.register(RAW, Arc::new(RawPipeline));
    registry.register(GROUP, Arc::new(GroupPipeline));
    registry
}

fn decode(asset: &SourceAsset) -> Result<AssetDecl, PipelineError> {
    serde_json::from_slice(&asset.payload).map_err(|e| {
        PipelineError::invalid(format!("malformed declaration of {}: {e}", asset.guid))
    })
}

fn declare_dependencies(depends: &mut PipelineDepends<'_>, decl: &AssetDecl) {
    for dep in &decl.dependencies {
        let kind = match dep.kind {
            DependencyKindDecl::Hard => DependencyKind::Hard,
            DependencyKindDecl::Soft => DependencyKind::Soft,
        };
        depends.add_dependency(dep.guid, kind);
    }
}

/// Copies a source file verbatim.
pub struct RawPipeline;

fn source_file(decl: &AssetDecl) -> Result<&str, PipelineError> {
    decl.file
        .as_deref()
        .ok_or_else(|| PipelineError::invalid(format!("raw asset {} has no file", decl.guid)))
}

impl DependencyScanner for RawPipeline {
    fn scan(
        &self,
        depends: &mut PipelineDepends<'_>,
        asset: &SourceAsset,
    ) -> Result<(), PipelineError> {
        let decl = decode(asset)?;
        declare_dependencies(depends, &decl);
        depends.add_file(source_file(&decl)?);
        Ok(())
    }
}

impl AssetBuilder for RawPipeline {
    fn version(&self) -> u32 {
        1
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        asset: &SourceAsset,
        output: &mut dyn Write,
    ) -> Result<(), PipelineError> {
        let path = ctx.resolve_file(source_file(&decode(asset)?)?);
        let bytes = std::fs::read(&path).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
        output
            .write_all(&bytes)
            .map_err(|source| PipelineError::Io { path, source })
    }
}

/// Bundles other assets.
///
/// The artifact lists one line per member: `hard <guid> <hash>` for hard
/// members and `soft <guid>` for soft ones.
pub struct GroupPipeline;

impl DependencyScanner for GroupPipeline {
    fn scan(
        &self,
        depends: &mut PipelineDepends<'_>,
        asset: &SourceAsset,
    ) -> Result<(), PipelineError> {
        declare_dependencies(depends, &decode(asset)?);
        Ok(())
    }
}

impl AssetBuilder for GroupPipeline {
    fn version(&self) -> u32 {
        1
    }

    fn build(
        &self,
        ctx: &BuildContext<'_>,
        asset: &SourceAsset,
        output: &mut dyn Write,
    ) -> Result<(), PipelineError> {
        let mut listing = String::new();
        for dep in decode(asset)?.dependencies {
            match dep.kind {
                DependencyKindDecl::Hard => {
                    let hash = ctx
                        .dependency_hash(dep.guid)
                        .ok_or(PipelineError::MissingDependencyOutput { guid: dep.guid })?;
                    listing.push_str(&format!("hard {} {hash}\n", dep.guid));
                }
                DependencyKindDecl::Soft => listing.push_str(&format!("soft {}\n", dep.guid)),
            }
        }
        output
            .write_all(listing.as_bytes())
            .map_err(|e| PipelineError::invalid(e.to_string()))
    }
}
