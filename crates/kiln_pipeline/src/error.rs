//! Error types for pipeline operations.

use std::path::PathBuf;

use kiln_common::Guid;

/// Errors raised by scanners, builders and the build driver itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A scanner or builder rejected its input.
    #[error("{reason}")]
    Invalid {
        /// Description of the problem.
        reason: String,
    },

    /// No pipeline is registered for an embedded asset type.
    #[error("no pipeline registered for asset type '{asset_type}'")]
    NoPipeline {
        /// The unknown type.
        asset_type: String,
    },

    /// Embedded assets were nested deeper than the scanner allows.
    #[error("embedded assets of {owner} nest deeper than {limit} levels")]
    EmbeddingTooDeep {
        /// The asset being scanned.
        owner: Guid,
        /// The nesting limit.
        limit: usize,
    },

    /// An external file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The output of a hard dependency could not be read back from the cache.
    #[error("output of dependency {guid} is not available")]
    MissingDependencyOutput {
        /// The dependency.
        guid: Guid,
    },

    /// The worker pool could not be created.
    #[error("failed to start build workers: {reason}")]
    ThreadPool {
        /// Description of the failure.
        reason: String,
    },
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Invalid`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Why a node of a build did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeFailure {
    /// The node takes part in a cycle of hard dependencies.
    #[error("hard dependency cycle: {}", format_chain(chain))]
    DependencyCycle {
        /// The cycle, starting and ending with the same GUID.
        chain: Vec<Guid>,
    },

    /// The scanner or builder of the node reported an error.
    #[error("builder failed: {message}")]
    BuilderFailure {
        /// The error message.
        message: String,
    },

    /// A hard dependency failed, so the node was not built.
    #[error("dependency {dependency} failed")]
    DependencyFailed {
        /// The failed dependency.
        dependency: Guid,
    },

    /// The source database has no asset with this GUID.
    #[error("source asset not found")]
    MissingSource,

    /// No pipeline is registered for the asset's type.
    #[error("no pipeline registered for asset type '{asset_type}'")]
    NoPipeline {
        /// The asset type.
        asset_type: String,
    },
}

fn format_chain(chain: &[Guid]) -> String {
    chain
        .iter()
        .map(Guid::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_lists_chain() {
        let a = Guid::from_u128(1);
        let b = Guid::from_u128(2);
        let failure = NodeFailure::DependencyCycle {
            chain: vec![a, b, a],
        };
        let msg = failure.to_string();
        assert_eq!(msg, format!("hard dependency cycle: {a} -> {b} -> {a}"));
    }

    #[test]
    fn dependency_failed_display() {
        let dep = Guid::from_u128(7);
        let msg = NodeFailure::DependencyFailed { dependency: dep }.to_string();
        assert!(msg.contains(&dep.to_string()));
    }

    #[test]
    fn invalid_is_plain_message() {
        assert_eq!(PipelineError::invalid("bad payload").to_string(), "bad payload");
    }

    #[test]
    fn no_pipeline_display() {
        let err = PipelineError::NoPipeline {
            asset_type: "mesh".to_string(),
        };
        assert!(err.to_string().contains("'mesh'"));
    }
}
