//! Parallel build of a walked dependency graph.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use kiln_cache::{CacheError, PipelineCache};
use kiln_common::{ContentHash, Guid};
use kiln_db::{DbError, FileHash, PipelineDb};
use tracing::{debug, info, warn};

use crate::asset::SourceDatabase;
use crate::context::BuildContext;
use crate::error::{NodeFailure, PipelineError};
use crate::files::FileHasher;
use crate::graph::{AssetNode, DependencyGraph};
use crate::hash::compute_asset_hash;
use crate::manifest::{BuildManifest, BuildStatus, NodeOutcome};
use crate::pipeline::{Pipeline, PipelineRegistry};

/// Report name under which every node records its build statistics.
pub const BUILD_REPORT: &str = "build";

/// Tuning of a build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Rebuild every node even when its artifact is cached.
    pub force: bool,
    /// Worker threads; `0` picks one per CPU.
    pub threads: usize,
}

/// Cooperative cancellation of a running build.
///
/// Nodes already running finish; nothing new is scheduled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds assets and their dependencies, reusing cached artifacts whose
/// fingerprint is unchanged.
pub struct PipelineBuilder<'a> {
    registry: &'a PipelineRegistry,
    sources: &'a dyn SourceDatabase,
    db: &'a PipelineDb,
    cache: &'a dyn PipelineCache,
    options: BuildOptions,
    file_root: Option<PathBuf>,
}

struct Completion {
    guid: Guid,
    outcome: NodeOutcome,
}

/// Per-node bookkeeping of the coordinating thread.
struct Scheduler {
    remaining: HashMap<Guid, usize>,
    dependents: HashMap<Guid, Vec<Guid>>,
    ready: VecDeque<Guid>,
    outcomes: BTreeMap<Guid, NodeOutcome>,
    hashes: HashMap<Guid, ContentHash>,
    in_flight: usize,
}

impl Scheduler {
    fn new(graph: &DependencyGraph, order: &[Guid]) -> Self {
        let mut remaining = HashMap::new();
        let mut dependents: HashMap<Guid, Vec<Guid>> = HashMap::new();
        for &guid in order {
            let deps = if graph.failure(guid).is_some() {
                Vec::new()
            } else {
                graph.ordering_dependencies(guid)
            };
            remaining.insert(guid, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(guid);
            }
        }
        let ready = order
            .iter()
            .copied()
            .filter(|g| remaining.get(g) == Some(&0))
            .collect();

        Self {
            remaining,
            dependents,
            ready,
            outcomes: BTreeMap::new(),
            hashes: HashMap::new(),
            in_flight: 0,
        }
    }

    fn finish(&mut self, guid: Guid, outcome: NodeOutcome) {
        if let Some(hash) = outcome.hash() {
            self.hashes.insert(guid, hash);
        }
        self.outcomes.insert(guid, outcome);
        for dependent in self.dependents.get(&guid).into_iter().flatten() {
            if let Some(count) = self.remaining.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 && !self.outcomes.contains_key(dependent) {
                    self.ready.push_back(*dependent);
                }
            }
        }
    }

    /// Outcome decided without running the node: walk failures and failed
    /// dependencies.
    fn precheck(&self, graph: &DependencyGraph, guid: Guid) -> Option<NodeOutcome> {
        if let Some(failure) = graph.failure(guid) {
            return Some(NodeOutcome::Failed(failure.clone()));
        }
        for dep in graph.ordering_dependencies(guid) {
            match self.outcomes.get(&dep) {
                Some(outcome) if outcome.is_success() => {}
                Some(NodeOutcome::Cancelled) => return Some(NodeOutcome::Cancelled),
                _ => {
                    return Some(NodeOutcome::Failed(NodeFailure::DependencyFailed {
                        dependency: dep,
                    }))
                }
            }
        }
        None
    }
}

struct NodeReport {
    outcome: &'static str,
    duration: Duration,
    output_bytes: usize,
}

impl NodeReport {
    const FAILED: NodeReport = NodeReport {
        outcome: "failed",
        duration: Duration::ZERO,
        output_bytes: 0,
    };
}

impl<'a> PipelineBuilder<'a> {
    /// Creates a builder over the given collaborators with default options.
    pub fn new(
        registry: &'a PipelineRegistry,
        sources: &'a dyn SourceDatabase,
        db: &'a PipelineDb,
        cache: &'a dyn PipelineCache,
    ) -> Self {
        Self {
            registry,
            sources,
            db,
            cache,
            options: BuildOptions::default(),
            file_root: None,
        }
    }

    /// Replaces the build options.
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolves relative file paths declared by scanners against `root`.
    ///
    /// Fingerprints only see the declared paths, so a project built from a
    /// different directory reuses its cached artifacts.
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    /// Builds `roots` and everything they depend on.
    pub fn build(&self, roots: &[Guid]) -> Result<BuildManifest, PipelineError> {
        self.build_with_cancel(roots, &CancellationToken::new())
    }

    /// Builds `roots`, stopping early when `cancel` fires.
    pub fn build_with_cancel(
        &self,
        roots: &[Guid],
        cancel: &CancellationToken,
    ) -> Result<BuildManifest, PipelineError> {
        info!(roots = roots.len(), "walking dependencies");
        let graph = DependencyGraph::walk(roots, self.sources, self.registry);
        self.build_graph(&graph, cancel)
    }

    /// Builds every node of an already walked graph.
    pub fn build_graph(
        &self,
        graph: &DependencyGraph,
        cancel: &CancellationToken,
    ) -> Result<BuildManifest, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .thread_name(|i| format!("kiln-build-{i}"))
            .build()
            .map_err(|e| PipelineError::ThreadPool {
                reason: e.to_string(),
            })?;

        let order = graph.build_order();
        let mut scheduler = Scheduler::new(graph, &order);
        let (tx, rx) = crossbeam_channel::unbounded::<Completion>();
        let started = Instant::now();
        info!(
            assets = order.len(),
            threads = pool.current_num_threads(),
            force = self.options.force,
            "building"
        );

        // Every node's records are staged in one transaction and committed
        // once, after the last node finished.
        let batched = match self.db.begin_transaction() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "pipeline database unavailable; results will not be recorded");
                false
            }
        };

        pool.in_place_scope(|scope| loop {
            while !cancel.is_cancelled() {
                let Some(guid) = scheduler.ready.pop_front() else {
                    break;
                };
                if let Some(outcome) = scheduler.precheck(graph, guid) {
                    if let NodeOutcome::Failed(failure) = &outcome {
                        debug!(guid = %guid, reason = %failure, "node not built");
                        self.record(guid, None, &NodeReport::FAILED);
                    }
                    scheduler.finish(guid, outcome);
                    continue;
                }
                let job = match self.prepare(graph, &scheduler, guid) {
                    Ok(job) => job,
                    Err(failure) => {
                        self.record(guid, None, &NodeReport::FAILED);
                        scheduler.finish(guid, NodeOutcome::Failed(failure));
                        continue;
                    }
                };
                let tx = tx.clone();
                scheduler.in_flight += 1;
                scope.spawn(move |_| self.run(job, tx));
            }

            if scheduler.in_flight == 0 {
                break;
            }
            match rx.recv() {
                Ok(completion) => {
                    scheduler.in_flight -= 1;
                    scheduler.finish(completion.guid, completion.outcome);
                }
                Err(_) => break,
            }
        });

        if batched {
            if let Err(e) = self.db.end_transaction() {
                warn!(error = %e, "failed to commit build results");
            }
        }

        let mut outcomes = scheduler.outcomes;
        for guid in order {
            outcomes.entry(guid).or_insert(NodeOutcome::Cancelled);
        }
        let status = if outcomes.values().any(|o| *o == NodeOutcome::Cancelled) {
            BuildStatus::Cancelled
        } else {
            BuildStatus::Complete
        };

        let manifest = BuildManifest::new(status, outcomes);
        info!(
            built = manifest.succeeded().len(),
            cached = manifest.skipped().len(),
            failed = manifest.failed().len(),
            cancelled = manifest.cancelled().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(manifest)
    }

    fn prepare<'g>(
        &self,
        graph: &'g DependencyGraph,
        scheduler: &Scheduler,
        guid: Guid,
    ) -> Result<Job<'g>, NodeFailure> {
        let node = graph.node(guid).ok_or(NodeFailure::MissingSource)?;
        let pipeline = self
            .registry
            .get(&node.asset.asset_type)
            .ok_or_else(|| NodeFailure::NoPipeline {
                asset_type: node.asset.asset_type.clone(),
            })?
            .clone();
        let mut ordered = Vec::new();
        let mut by_guid = HashMap::new();
        for dep in node.hard_dependencies() {
            let hash = *scheduler
                .hashes
                .get(&dep)
                .ok_or(NodeFailure::DependencyFailed { dependency: dep })?;
            ordered.push(hash);
            by_guid.insert(dep, hash);
        }
        Ok(Job {
            node,
            pipeline,
            ordered,
            by_guid,
        })
    }

    fn run(&self, job: Job<'_>, tx: Sender<Completion>) {
        let guid = job.node.guid();
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.process(&job))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(guid = %guid, message = %message, "builder panicked");
                NodeOutcome::Failed(NodeFailure::BuilderFailure {
                    message: format!("builder panicked: {message}"),
                })
            }
        };
        let _ = tx.send(Completion { guid, outcome });
    }

    fn process(&self, job: &Job<'_>) -> NodeOutcome {
        let started = Instant::now();
        let node = job.node;
        let guid = node.guid();

        let mut hasher = FileHasher::new(self.db);
        if let Some(root) = &self.file_root {
            hasher = hasher.with_root(root);
        }
        let mut files = Vec::with_capacity(node.files.len());
        for path in &node.files {
            match hasher.hash(path) {
                Ok(fh) => files.push((hasher.resolve(path), fh)),
                Err(e) => {
                    let failure = NodeFailure::BuilderFailure {
                        message: e.to_string(),
                    };
                    warn!(guid = %guid, reason = %failure, "build failed");
                    self.record(guid, None, &NodeReport::FAILED);
                    return NodeOutcome::Failed(failure);
                }
            }
        }
        let file_hashes: Vec<ContentHash> = files.iter().map(|(_, f)| f.content_hash).collect();
        let hash = compute_asset_hash(node, job.pipeline.version(), &job.ordered, &file_hashes);

        if !self.options.force && self.is_up_to_date(guid, hash) {
            debug!(guid = %guid, hash = %hash, "up to date");
            self.record(
                guid,
                Some((hash, files.as_slice())),
                &NodeReport {
                    outcome: "cache_hit",
                    duration: started.elapsed(),
                    output_bytes: 0,
                },
            );
            return NodeOutcome::CacheHit { hash };
        }

        let mut output = Vec::new();
        let ctx = BuildContext::new(node, hash, &job.by_guid, self.cache)
            .with_file_root(self.file_root.as_deref());
        if let Err(e) = job.pipeline.build(&ctx, &node.asset, &mut output) {
            let failure = NodeFailure::BuilderFailure {
                message: e.to_string(),
            };
            warn!(guid = %guid, reason = %failure, "build failed");
            self.record(guid, None, &NodeReport::FAILED);
            return NodeOutcome::Failed(failure);
        }

        self.store(guid, hash, &output);
        self.record(
            guid,
            Some((hash, files.as_slice())),
            &NodeReport {
                outcome: "built",
                duration: started.elapsed(),
                output_bytes: output.len(),
            },
        );
        debug!(guid = %guid, hash = %hash, bytes = output.len(), "built");
        NodeOutcome::Built { hash }
    }

    fn is_up_to_date(&self, guid: Guid, hash: ContentHash) -> bool {
        match self.db.get_dependency(guid) {
            Ok(Some(recorded)) => recorded == hash && self.cache.contains(guid, hash),
            Ok(None) => false,
            Err(e) => {
                warn!(guid = %guid, error = %e, "dependency record lookup failed; rebuilding");
                false
            }
        }
    }

    fn store(&self, guid: Guid, hash: ContentHash, output: &[u8]) {
        let result = self.cache.put(guid, hash).and_then(|mut writer| {
            writer
                .write_all(output)
                .map_err(|e| CacheError::Serialization {
                    reason: e.to_string(),
                })?;
            writer.commit()
        });
        if let Err(e) = result {
            warn!(guid = %guid, error = %e, "failed to cache artifact");
        }
    }

    /// Stages the node's fingerprint, file observations and report row in
    /// the build transaction.
    fn record(
        &self,
        guid: Guid,
        update: Option<(ContentHash, &[(PathBuf, FileHash)])>,
        report: &NodeReport,
    ) {
        let result = (|| -> Result<(), DbError> {
            if let Some((hash, files)) = update {
                for (path, file_hash) in files {
                    self.db.set_file(path, *file_hash)?;
                }
                self.db.set_dependency(guid, hash)?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            warn!(guid = %guid, error = %e, "failed to record build result");
        }

        self.db
            .create_report(BUILD_REPORT, guid)
            .set("outcome", report.outcome)
            .set("duration_ms", report.duration.as_millis())
            .set("output_bytes", report.output_bytes);
    }
}

struct Job<'g> {
    node: &'g AssetNode,
    pipeline: Arc<dyn Pipeline>,
    ordered: Vec<ContentHash>,
    by_guid: HashMap<Guid, ContentHash>,
}
