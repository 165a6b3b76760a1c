//! What a builder can see while building one node.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use kiln_cache::PipelineCache;
use kiln_common::{ContentHash, Guid};

use crate::depends::EmbeddedAsset;
use crate::error::PipelineError;
use crate::files;
use crate::graph::AssetNode;

/// Per-node build context handed to [`AssetBuilder::build`](crate::AssetBuilder::build).
pub struct BuildContext<'a> {
    node: &'a AssetNode,
    hash: ContentHash,
    dependency_hashes: &'a HashMap<Guid, ContentHash>,
    cache: &'a dyn PipelineCache,
    file_root: Option<&'a Path>,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        node: &'a AssetNode,
        hash: ContentHash,
        dependency_hashes: &'a HashMap<Guid, ContentHash>,
        cache: &'a dyn PipelineCache,
    ) -> Self {
        Self {
            node,
            hash,
            dependency_hashes,
            cache,
            file_root: None,
        }
    }

    pub(crate) fn with_file_root(mut self, root: Option<&'a Path>) -> Self {
        self.file_root = root;
        self
    }

    /// The asset being built.
    pub fn guid(&self) -> Guid {
        self.node.guid()
    }

    /// The fingerprint the artifact will be stored under.
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Embedded children declared by the scanner.
    pub fn embedded(&self) -> &[EmbeddedAsset] {
        &self.node.embedded
    }

    /// Files declared by the scanner, as declared.
    pub fn files(&self) -> &[PathBuf] {
        &self.node.files
    }

    /// The on-disk location of a declared file path.
    pub fn resolve_file(&self, path: impl AsRef<Path>) -> PathBuf {
        files::resolve(self.file_root, path.as_ref())
    }

    /// Fingerprint of a hard dependency.
    pub fn dependency_hash(&self, guid: Guid) -> Option<ContentHash> {
        self.dependency_hashes.get(&guid).copied()
    }

    /// Reads the freshly built artifact of a hard dependency back from the
    /// cache.
    pub fn dependency_output(&self, guid: Guid) -> Result<Vec<u8>, PipelineError> {
        let hash = self
            .dependency_hash(guid)
            .ok_or(PipelineError::MissingDependencyOutput { guid })?;
        let mut reader = self
            .cache
            .get(guid, hash)
            .ok_or(PipelineError::MissingDependencyOutput { guid })?;
        let mut output = Vec::new();
        reader
            .read_to_end(&mut output)
            .map_err(|_| PipelineError::MissingDependencyOutput { guid })?;
        Ok(output)
    }
}
