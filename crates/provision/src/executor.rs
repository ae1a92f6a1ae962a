//! Execution engine: runs a plan respecting graph order.
//!
//! Operations dispatch as soon as every predecessor has completed, up to a
//! configurable concurrency limit, on scoped worker threads. The
//! coordinator thread owns the state file: it resolves references at
//! dispatch time and commits identifiers and outputs after each success,
//! so no two threads ever touch state concurrently.
//!
//! Failure semantics: transient provider errors retry with bounded
//! exponential backoff; a non-retryable error fails the operation and
//! marks every transitive dependent skipped, while independent branches
//! run to completion. The run then ends as a partial failure reported
//! per resource, not as an `Err`.

use crate::error::{Error, ProviderError, Result};
use crate::graph::DependencyGraph;
use crate::plan::{OpKind, Plan, PlannedOp, state_lookup};
use crate::provider::{AttrMap, Provider, ProviderRegistry, UpdateOutcome};
use crate::resource::{ReplacePolicy, Stack};
use crate::retry::{RetryCallback, RetryConfig, with_retry};
use crate::state::{ResourceRecord, StateFile, StateStore, input_hash};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Options for a run.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Concurrency limit for independent operations
    pub jobs: usize,
    /// Don't call providers or touch state, just report
    pub dry_run: bool,
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            dry_run: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Terminal status of one resource in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOutcome {
    Created,
    Updated,
    Replaced,
    Deleted,
    Unchanged,
    Failed { reason: String },
    Skipped { blocked_by: String },
}

impl ResourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Replaced | Self::Deleted
        )
    }
}

/// Per-run outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Result of a run: per-resource outcomes plus exported outputs.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: BTreeMap<String, ResourceOutcome>,
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl RunSummary {
    /// A run with any failed or blocked resource is a partial failure.
    pub fn is_success(&self) -> bool {
        !self
            .outcomes
            .values()
            .any(|o| matches!(o, ResourceOutcome::Failed { .. } | ResourceOutcome::Skipped { .. }))
    }

    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for outcome in self.outcomes.values() {
            match outcome {
                ResourceOutcome::Created => tally.created += 1,
                ResourceOutcome::Updated => tally.updated += 1,
                ResourceOutcome::Replaced => tally.replaced += 1,
                ResourceOutcome::Deleted => tally.deleted += 1,
                ResourceOutcome::Unchanged => tally.unchanged += 1,
                ResourceOutcome::Failed { .. } => tally.failed += 1,
                ResourceOutcome::Skipped { .. } => tally.skipped += 1,
            }
        }
        tally
    }
}

/// Progress callback, driven from the coordinator thread only.
pub trait ProgressCallback: Send {
    fn on_op_start(&mut self, name: &str, kind: OpKind);
    fn on_op_complete(&mut self, name: &str, outcome: &ResourceOutcome);
}

/// No-op progress callback.
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_op_start(&mut self, _: &str, _: OpKind) {}
    fn on_op_complete(&mut self, _: &str, _: &ResourceOutcome) {}
}

/// Execute a plan.
///
/// Surviving resources (create/update/replace) run first in graph order;
/// deletions follow, dependents first, and a deletion is skipped when an
/// old dependent failed to update away from it. State is persisted after
/// each committed operation; cancellation stops dispatching new work and
/// lets in-flight operations finish.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    stack: &Stack,
    graph: &DependencyGraph,
    plan: &Plan,
    registry: &ProviderRegistry,
    store: &StateStore,
    state: &mut StateFile,
    opts: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
    cancel: &AtomicBool,
) -> Result<RunSummary> {
    if opts.dry_run {
        return Ok(RunSummary::default());
    }

    let mut outcomes: BTreeMap<String, ResourceOutcome> = BTreeMap::new();

    // Old dependency edges, snapshotted before any record is rewritten.
    let old_dependents: BTreeMap<String, Vec<String>> = plan
        .ops
        .iter()
        .filter(|op| op.kind == OpKind::Delete)
        .map(|op| (op.name.clone(), state.dependents_of(&op.name)))
        .collect();

    run_survivors(
        stack, graph, plan, registry, store, state, opts, progress, cancel, &mut outcomes,
    )?;
    run_deletes(
        stack,
        plan,
        registry,
        store,
        state,
        opts,
        progress,
        cancel,
        &old_dependents,
        &mut outcomes,
    )?;

    // Reconciled even when the declaration exports nothing, so dropped
    // exports don't linger in state.
    let resolved = resolve_exports(stack, state);
    if state.outputs != resolved {
        state.outputs = resolved;
        store.save(state)?;
    }

    Ok(RunSummary {
        outputs: state.outputs.clone(),
        outcomes,
    })
}

/// Resolve a declaration's exports against recorded state.
///
/// Exports whose references are still unresolved are dropped with a
/// warning rather than failing the run.
pub fn resolve_exports(
    stack: &Stack,
    state: &StateFile,
) -> BTreeMap<String, serde_json::Value> {
    let lookup = state_lookup(state);
    let mut resolved = BTreeMap::new();
    for (key, value) in &stack.exports {
        match value.resolve(&lookup) {
            Ok(json) => {
                resolved.insert(key.clone(), json);
            }
            Err(reference) => {
                log::warn!("output {key} not exported: {reference} is unresolved");
            }
        }
    }
    resolved
}

#[allow(clippy::too_many_arguments)]
fn run_survivors(
    stack: &Stack,
    graph: &DependencyGraph,
    plan: &Plan,
    registry: &ProviderRegistry,
    store: &StateStore,
    state: &mut StateFile,
    opts: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
    cancel: &AtomicBool,
    outcomes: &mut BTreeMap<String, ResourceOutcome>,
) -> Result<()> {
    let ops: Vec<&PlannedOp> = plan
        .ops
        .iter()
        .filter(|op| op.kind != OpKind::Delete)
        .collect();
    if ops.is_empty() {
        return Ok(());
    }

    let task_of: HashMap<&str, usize> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| (op.name.as_str(), i))
        .collect();

    let mut tasks: Vec<Task> = ops.iter().map(|op| Task::new(op)).collect();
    for i in 0..tasks.len() {
        let node = graph
            .index_of(&tasks[i].op.name)
            .ok_or_else(|| Error::Internal(format!("{} missing from graph", tasks[i].op.name)))?;
        for &dep in graph.dependencies_of(node) {
            let dep_task = task_of[graph.name(dep)];
            tasks[i].deps.push(dep_task);
            tasks[dep_task].dependents.push(i);
        }
    }

    run_tasks(
        &tasks,
        stack,
        Some(graph),
        registry,
        store,
        state,
        opts,
        progress,
        cancel,
        outcomes,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_deletes(
    stack: &Stack,
    plan: &Plan,
    registry: &ProviderRegistry,
    store: &StateStore,
    state: &mut StateFile,
    opts: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
    cancel: &AtomicBool,
    old_dependents: &BTreeMap<String, Vec<String>>,
    outcomes: &mut BTreeMap<String, ResourceOutcome>,
) -> Result<()> {
    let ops: Vec<&PlannedOp> = plan
        .ops
        .iter()
        .filter(|op| op.kind == OpKind::Delete)
        .collect();
    if ops.is_empty() {
        return Ok(());
    }

    let task_of: HashMap<&str, usize> = ops
        .iter()
        .enumerate()
        .map(|(i, op)| (op.name.as_str(), i))
        .collect();

    let mut tasks: Vec<Task> = ops.iter().map(|op| Task::new(op)).collect();
    for i in 0..tasks.len() {
        let name = &tasks[i].op.name;
        for dependent in old_dependents.get(name).into_iter().flatten() {
            match task_of.get(dependent.as_str()) {
                // Old dependent is also being deleted: it must go first.
                Some(&dep_task) => {
                    tasks[i].deps.push(dep_task);
                    tasks[dep_task].dependents.push(i);
                }
                // Old dependent survives: it had to update away from this
                // resource, otherwise deleting it would dangle.
                None => {
                    let blocked = matches!(
                        outcomes.get(dependent),
                        Some(ResourceOutcome::Failed { .. } | ResourceOutcome::Skipped { .. })
                    );
                    if blocked && !outcomes.contains_key(name.as_str()) {
                        outcomes.insert(
                            name.clone(),
                            ResourceOutcome::Skipped {
                                blocked_by: dependent.clone(),
                            },
                        );
                    }
                }
            }
        }
    }

    run_tasks(
        &tasks, stack, None, registry, store, state, opts, progress, cancel, outcomes,
    )
}

/// One schedulable operation with its intra-phase dependency edges.
struct Task<'p> {
    op: &'p PlannedOp,
    deps: Vec<usize>,
    dependents: Vec<usize>,
}

impl<'p> Task<'p> {
    fn new(op: &'p PlannedOp) -> Self {
        Self {
            op,
            deps: Vec::new(),
            dependents: Vec::new(),
        }
    }
}

/// Payload handed to a worker thread.
struct Prepared {
    name: String,
    resource_type: String,
    kind: OpKind,
    policy: ReplacePolicy,
    inputs: AttrMap,
    prior_id: Option<String>,
}

/// Surfaces each failed attempt while a worker backs off.
struct RetryLog<'a> {
    name: &'a str,
}

impl RetryCallback for RetryLog<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration) {
        log::warn!(
            "{}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {delay:?}",
            self.name
        );
    }
}

enum WorkOk {
    Created { id: String, outputs: AttrMap },
    Updated { id: String, outputs: AttrMap },
    Replaced { id: String, outputs: AttrMap },
    Deleted,
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn run_tasks(
    tasks: &[Task],
    stack: &Stack,
    graph: Option<&DependencyGraph>,
    registry: &ProviderRegistry,
    store: &StateStore,
    state: &mut StateFile,
    opts: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
    cancel: &AtomicBool,
    outcomes: &mut BTreeMap<String, ResourceOutcome>,
) -> Result<()> {
    let total = tasks.len();
    let mut remaining: Vec<usize> = tasks.iter().map(|t| t.deps.len()).collect();
    let mut done = vec![false; total];
    let mut completed = 0usize;
    let mut ready: VecDeque<usize> = (0..total).filter(|&i| remaining[i] == 0).collect();
    let mut pending_inputs: HashMap<usize, AttrMap> = HashMap::new();
    let mut in_flight = 0usize;
    let jobs = opts.jobs.max(1);

    // Outcomes decided before this phase (e.g. deletes blocked by a failed
    // survivor) complete immediately and block their dependents.
    for i in 0..total {
        if !done[i]
            && let Some(ResourceOutcome::Skipped { blocked_by }) =
                outcomes.get(&tasks[i].op.name).cloned()
        {
            done[i] = true;
            completed += 1;
            progress.on_op_complete(&tasks[i].op.name, &ResourceOutcome::Skipped {
                blocked_by: blocked_by.clone(),
            });
            skip_dependents(tasks, i, &blocked_by, &mut done, &mut completed, outcomes, progress);
        }
    }

    let (tx, rx) = mpsc::channel::<(usize, std::result::Result<WorkOk, ProviderError>)>();

    thread::scope(|scope| -> Result<()> {
        while completed < total {
            // Dispatch everything ready, up to the concurrency limit.
            while in_flight < jobs {
                let Some(i) = ready.pop_front() else { break };
                if done[i] {
                    continue;
                }
                let op = tasks[i].op;

                if cancel.load(Ordering::SeqCst) {
                    finish(
                        tasks,
                        i,
                        ResourceOutcome::Skipped {
                            blocked_by: "interrupted".into(),
                        },
                        &mut done,
                        &mut completed,
                        &mut remaining,
                        &mut ready,
                        outcomes,
                        progress,
                    );
                    continue;
                }

                if op.kind == OpKind::NoOp {
                    finish(
                        tasks,
                        i,
                        ResourceOutcome::Unchanged,
                        &mut done,
                        &mut completed,
                        &mut remaining,
                        &mut ready,
                        outcomes,
                        progress,
                    );
                    continue;
                }

                let prepared = match prepare(op, stack, state) {
                    Ok(prepared) => prepared,
                    Err(reason) => {
                        done[i] = true;
                        completed += 1;
                        let outcome = ResourceOutcome::Failed { reason };
                        outcomes.insert(op.name.clone(), outcome.clone());
                        progress.on_op_complete(&op.name, &outcome);
                        skip_dependents(
                            tasks,
                            i,
                            &op.name,
                            &mut done,
                            &mut completed,
                            outcomes,
                            progress,
                        );
                        continue;
                    }
                };

                // Deleting something that was never recorded is a no-op.
                if prepared.kind == OpKind::Delete && prepared.prior_id.is_none() {
                    finish(
                        tasks,
                        i,
                        ResourceOutcome::Deleted,
                        &mut done,
                        &mut completed,
                        &mut remaining,
                        &mut ready,
                        outcomes,
                        progress,
                    );
                    continue;
                }

                let provider = registry.for_type(&op.resource_type)?;
                progress.on_op_start(&op.name, op.kind);
                pending_inputs.insert(i, prepared.inputs.clone());

                let worker_tx = tx.clone();
                let retry = opts.retry.clone();
                scope.spawn(move || {
                    let result = run_op(provider, &prepared, &retry);
                    let _ = worker_tx.send((i, result));
                });
                in_flight += 1;
            }

            if completed >= total {
                break;
            }
            if in_flight == 0 {
                return Err(Error::Internal(
                    "scheduler stalled with unfinished operations".into(),
                ));
            }

            let (i, result) = rx
                .recv()
                .map_err(|_| Error::Internal("executor worker channel closed".into()))?;
            in_flight -= 1;
            let op = tasks[i].op;
            let inputs = pending_inputs.remove(&i).unwrap_or_default();

            match result {
                Ok(work) => {
                    let outcome = commit(op, work, inputs, stack, graph, state);
                    store.save(state)?;
                    finish(
                        tasks,
                        i,
                        outcome,
                        &mut done,
                        &mut completed,
                        &mut remaining,
                        &mut ready,
                        outcomes,
                        progress,
                    );
                }
                Err(e) => {
                    done[i] = true;
                    completed += 1;
                    let outcome = ResourceOutcome::Failed {
                        reason: e.to_string(),
                    };
                    outcomes.insert(op.name.clone(), outcome.clone());
                    progress.on_op_complete(&op.name, &outcome);
                    skip_dependents(
                        tasks,
                        i,
                        &op.name,
                        &mut done,
                        &mut completed,
                        outcomes,
                        progress,
                    );
                }
            }
        }
        Ok(())
    })
}

/// Mark a task complete with the given outcome and release its dependents.
#[allow(clippy::too_many_arguments)]
fn finish(
    tasks: &[Task],
    i: usize,
    outcome: ResourceOutcome,
    done: &mut [bool],
    completed: &mut usize,
    remaining: &mut [usize],
    ready: &mut VecDeque<usize>,
    outcomes: &mut BTreeMap<String, ResourceOutcome>,
    progress: &mut dyn ProgressCallback,
) {
    done[i] = true;
    *completed += 1;
    progress.on_op_complete(&tasks[i].op.name, &outcome);
    outcomes.insert(tasks[i].op.name.clone(), outcome);
    for &dependent in &tasks[i].dependents {
        remaining[dependent] -= 1;
        if remaining[dependent] == 0 {
            ready.push_back(dependent);
        }
    }
}

/// Mark every transitive dependent of a failed task as blocked.
fn skip_dependents(
    tasks: &[Task],
    from: usize,
    blocked_by: &str,
    done: &mut [bool],
    completed: &mut usize,
    outcomes: &mut BTreeMap<String, ResourceOutcome>,
    progress: &mut dyn ProgressCallback,
) {
    let mut queue: VecDeque<usize> = tasks[from].dependents.iter().copied().collect();
    while let Some(i) = queue.pop_front() {
        if done[i] {
            continue;
        }
        done[i] = true;
        *completed += 1;
        let outcome = ResourceOutcome::Skipped {
            blocked_by: blocked_by.to_string(),
        };
        outcomes.insert(tasks[i].op.name.clone(), outcome.clone());
        progress.on_op_complete(&tasks[i].op.name, &outcome);
        queue.extend(tasks[i].dependents.iter().copied());
    }
}

/// Resolve inputs and gather identifiers for one operation.
///
/// Runs on the coordinator after all predecessors committed, so every
/// reference must resolve; one that doesn't is a per-resource failure.
fn prepare(op: &PlannedOp, stack: &Stack, state: &StateFile) -> std::result::Result<Prepared, String> {
    let prior_id = state.get(&op.name).map(|record| record.id.clone());

    if op.kind == OpKind::Delete {
        return Ok(Prepared {
            name: op.name.clone(),
            resource_type: op.resource_type.clone(),
            kind: OpKind::Delete,
            policy: ReplacePolicy::default(),
            inputs: AttrMap::new(),
            prior_id,
        });
    }

    let decl = stack
        .resource(&op.name)
        .ok_or_else(|| format!("{} is not declared", op.name))?;

    let lookup = state_lookup(state);
    let mut inputs = AttrMap::new();
    for (key, value) in &decl.inputs {
        let resolved = value
            .resolve(&lookup)
            .map_err(|reference| format!("unresolved reference {reference}"))?;
        inputs.insert(key.clone(), resolved);
    }

    Ok(Prepared {
        name: op.name.clone(),
        resource_type: op.resource_type.clone(),
        kind: op.kind,
        policy: decl.options.replace_policy,
        inputs,
        prior_id,
    })
}

/// Provider calls for one operation. Runs on a worker thread.
fn run_op(
    provider: &dyn Provider,
    prepared: &Prepared,
    retry: &RetryConfig,
) -> std::result::Result<WorkOk, ProviderError> {
    let resource_type = prepared.resource_type.as_str();
    let watcher = RetryLog {
        name: &prepared.name,
    };
    match prepared.kind {
        OpKind::Create => {
            let created = with_retry(retry, Some(&watcher), || {
                provider.create(resource_type, &prepared.inputs)
            })?;
            Ok(WorkOk::Created {
                id: created.id,
                outputs: created.outputs,
            })
        }
        OpKind::Update => {
            let id = prior_id(prepared)?;
            let outcome = with_retry(retry, Some(&watcher), || {
                provider.update(resource_type, &id, &prepared.inputs)
            })?;
            match outcome {
                UpdateOutcome::Updated(outputs) => Ok(WorkOk::Updated { id, outputs }),
                UpdateOutcome::RequiresReplace => {
                    replace(provider, &id, prepared, retry, &watcher)
                }
            }
        }
        OpKind::Replace => {
            let id = prior_id(prepared)?;
            replace(provider, &id, prepared, retry, &watcher)
        }
        OpKind::Delete => {
            let id = prior_id(prepared)?;
            with_retry(retry, Some(&watcher), || provider.delete(resource_type, &id))?;
            Ok(WorkOk::Deleted)
        }
        OpKind::NoOp => Err(ProviderError::Other("no-op dispatched to a worker".into())),
    }
}

fn prior_id(prepared: &Prepared) -> std::result::Result<String, ProviderError> {
    prepared
        .prior_id
        .clone()
        .ok_or_else(|| ProviderError::Other("operation requires a recorded identifier".into()))
}

fn replace(
    provider: &dyn Provider,
    old_id: &str,
    prepared: &Prepared,
    retry: &RetryConfig,
    watcher: &dyn RetryCallback,
) -> std::result::Result<WorkOk, ProviderError> {
    let resource_type = prepared.resource_type.as_str();
    match prepared.policy {
        ReplacePolicy::CreateBeforeDestroy => {
            let created = with_retry(retry, Some(watcher), || {
                provider.create(resource_type, &prepared.inputs)
            })?;
            // The replacement exists; losing the old object is not worth
            // failing the resource over.
            if let Err(e) =
                with_retry(retry, Some(watcher), || provider.delete(resource_type, old_id))
            {
                log::warn!("replacement left old object {old_id} behind: {e}");
            }
            Ok(WorkOk::Replaced {
                id: created.id,
                outputs: created.outputs,
            })
        }
        ReplacePolicy::DestroyBeforeCreate => {
            with_retry(retry, Some(watcher), || provider.delete(resource_type, old_id))?;
            let created = with_retry(retry, Some(watcher), || {
                provider.create(resource_type, &prepared.inputs)
            })?;
            Ok(WorkOk::Replaced {
                id: created.id,
                outputs: created.outputs,
            })
        }
    }
}

/// Persist the result of a successful operation into state.
fn commit(
    op: &PlannedOp,
    work: WorkOk,
    inputs: AttrMap,
    stack: &Stack,
    graph: Option<&DependencyGraph>,
    state: &mut StateFile,
) -> ResourceOutcome {
    let (id, outputs, outcome) = match work {
        WorkOk::Deleted => {
            state.resources.remove(&op.name);
            return ResourceOutcome::Deleted;
        }
        WorkOk::Created { id, outputs } => (id, outputs, ResourceOutcome::Created),
        WorkOk::Updated { id, outputs } => (id, outputs, ResourceOutcome::Updated),
        WorkOk::Replaced { id, outputs } => (id, outputs, ResourceOutcome::Replaced),
    };

    let now = Utc::now();
    let created_at = state.get(&op.name).map_or(now, |r| r.created_at);
    let dependencies = graph
        .and_then(|g| g.index_of(&op.name).map(|node| g.dependency_names(node)))
        .unwrap_or_default();
    let protect = stack.resource(&op.name).is_some_and(|d| d.options.protect);

    state.resources.insert(op.name.clone(), ResourceRecord {
        resource_type: op.resource_type.clone(),
        id,
        input_hash: input_hash(&inputs),
        inputs,
        outputs,
        dependencies,
        protect,
        created_at,
        updated_at: now,
    });

    outcome
}

/// Refresh recorded outputs from the providers, in parallel.
///
/// Records whose remote object no longer exists are dropped, so the next
/// plan recreates them. Returns the names that were dropped.
pub fn refresh(
    state: &mut StateFile,
    registry: &ProviderRegistry,
) -> Result<Vec<String>> {
    use rayon::prelude::*;

    let reads: Vec<(String, std::result::Result<Option<AttrMap>, ProviderError>)> = state
        .resources
        .par_iter()
        .map(|(name, record)| {
            let result = registry
                .for_type(&record.resource_type)
                .and_then(|provider| provider.read(&record.resource_type, &record.id));
            (name.clone(), result)
        })
        .collect();

    let mut gone = Vec::new();
    for (name, result) in reads {
        match result {
            Ok(Some(outputs)) => {
                if let Some(record) = state.resources.get_mut(&name) {
                    record.outputs = outputs;
                }
            }
            Ok(None) => {
                log::info!("{name} no longer exists remotely, dropping from state");
                state.resources.remove(&name);
                gone.push(name);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(gone)
}
