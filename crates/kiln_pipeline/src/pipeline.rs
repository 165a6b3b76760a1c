//! Per-type pipeline traits and their registry.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::asset::SourceAsset;
use crate::context::BuildContext;
use crate::depends::PipelineDepends;
use crate::error::PipelineError;

/// Declares the dependencies of an asset.
///
/// Scanning must be deterministic: the same payload always declares the same
/// dependencies in the same order.
pub trait DependencyScanner: Send + Sync {
    /// Records every dependency of `asset` in `depends`.
    fn scan(&self, depends: &mut PipelineDepends<'_>, asset: &SourceAsset)
        -> Result<(), PipelineError>;
}

/// Turns a source asset into its built artifact.
pub trait AssetBuilder: Send + Sync {
    /// Version of the builder's output format. Bumping it invalidates every
    /// artifact this builder produced.
    fn version(&self) -> u32;

    /// Writes the artifact for `asset` to `output`.
    fn build(
        &self,
        ctx: &BuildContext<'_>,
        asset: &SourceAsset,
        output: &mut dyn Write,
    ) -> Result<(), PipelineError>;
}

/// A complete pipeline for one asset type.
pub trait Pipeline: DependencyScanner + AssetBuilder {}

impl<T: DependencyScanner + AssetBuilder> Pipeline for T {}

/// Maps asset type ids to their pipelines.
#[derive(Default, Clone)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `pipeline` for `asset_type`, replacing any earlier one.
    pub fn register(&mut self, asset_type: impl Into<String>, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.insert(asset_type.into(), pipeline);
    }

    /// Returns the pipeline for `asset_type`.
    pub fn get(&self, asset_type: &str) -> Option<&Arc<dyn Pipeline>> {
        self.pipelines.get(asset_type)
    }

    /// Returns the registered type ids in ascending order.
    pub fn asset_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
