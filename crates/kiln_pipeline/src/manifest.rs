//! The result of a build.

use std::collections::BTreeMap;
use std::fmt::Write;

use kiln_common::{ContentHash, Guid};

use crate::error::NodeFailure;

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The builder ran and the artifact was stored.
    Built {
        /// The node's fingerprint.
        hash: ContentHash,
    },
    /// The recorded fingerprint matched and the artifact was cached.
    CacheHit {
        /// The node's fingerprint.
        hash: ContentHash,
    },
    /// The node did not produce an artifact.
    Failed(NodeFailure),
    /// The build was cancelled before the node was scheduled.
    Cancelled,
}

impl NodeOutcome {
    /// The fingerprint of a successful node.
    pub fn hash(&self) -> Option<ContentHash> {
        match self {
            NodeOutcome::Built { hash } | NodeOutcome::CacheHit { hash } => Some(*hash),
            NodeOutcome::Failed(_) | NodeOutcome::Cancelled => None,
        }
    }

    /// Returns `true` for [`Built`](Self::Built) and
    /// [`CacheHit`](Self::CacheHit).
    pub fn is_success(&self) -> bool {
        self.hash().is_some()
    }
}

/// Overall state of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Every node was processed. Individual nodes may still have failed.
    Complete,
    /// Cancellation stopped the build before every node was scheduled.
    Cancelled,
}

/// Outcome of every node of a build.
#[derive(Debug, Clone)]
pub struct BuildManifest {
    status: BuildStatus,
    outcomes: BTreeMap<Guid, NodeOutcome>,
}

impl BuildManifest {
    pub(crate) fn new(status: BuildStatus, outcomes: BTreeMap<Guid, NodeOutcome>) -> Self {
        Self { status, outcomes }
    }

    /// The overall status.
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    /// The outcome of one node.
    pub fn outcome(&self, guid: Guid) -> Option<&NodeOutcome> {
        self.outcomes.get(&guid)
    }

    /// All outcomes ordered by GUID.
    pub fn outcomes(&self) -> impl Iterator<Item = (Guid, &NodeOutcome)> {
        self.outcomes.iter().map(|(g, o)| (*g, o))
    }

    /// Nodes whose builder ran.
    pub fn succeeded(&self) -> Vec<Guid> {
        self.select(|o| matches!(o, NodeOutcome::Built { .. }))
    }

    /// Nodes served from the cache.
    pub fn skipped(&self) -> Vec<Guid> {
        self.select(|o| matches!(o, NodeOutcome::CacheHit { .. }))
    }

    /// Nodes that were cancelled.
    pub fn cancelled(&self) -> Vec<Guid> {
        self.select(|o| matches!(o, NodeOutcome::Cancelled))
    }

    /// Failed nodes with their immediate cause.
    pub fn failed(&self) -> Vec<(Guid, &NodeFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(g, o)| match o {
                NodeOutcome::Failed(f) => Some((*g, f)),
                _ => None,
            })
            .collect()
    }

    /// Returns `true` if the build completed and no node failed.
    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Complete && self.outcomes.values().all(NodeOutcome::is_success)
    }

    /// A short human-readable report naming every failed asset.
    pub fn summary(&self) -> String {
        let failed = self.failed();
        let mut out = format!(
            "{} built, {} up to date, {} failed, {} cancelled",
            self.succeeded().len(),
            self.skipped().len(),
            failed.len(),
            self.cancelled().len()
        );
        if self.status == BuildStatus::Cancelled {
            out.push_str(" (build cancelled)");
        }
        for (guid, failure) in failed {
            let _ = write!(out, "\n  {guid}: {failure}");
        }
        out
    }

    fn select(&self, pred: impl Fn(&NodeOutcome) -> bool) -> Vec<Guid> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(g, _)| *g)
            .collect()
    }
}
