//! The scheduling core: bounded-parallel execution of a task graph.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::context::{ContextStrategy, ExecutionContext};
use crate::error::{ExecutorError, OrchestratorError, SchedulingError};
use crate::events::{EventEmitter, EventSink, OrchestratorEvent};
use crate::executor::AgentExecutor;
use crate::graph::TaskGraph;
use crate::model::{AgentOutput, Task, TaskFailure, TaskResult, TaskStatus};
use crate::store::ResultStore;

/// What happens to the dependents of a failed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed ancestor skips every not-yet-started transitive
    /// dependent.
    #[default]
    SkipDependents,
    /// A failed dependency counts as resolved; dependents still run, with
    /// the failed ancestor simply absent from their context.
    ContinueDependents,
}

/// Orchestrator tuning. `Default` gives two parallel agents, isolated
/// context, no messaging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running tasks. Must be at least 1.
    pub max_parallel_agents: usize,
    pub context_strategy: ContextStrategy,
    /// Create a per-run message bus and expose it through every execution
    /// context.
    pub enable_communication: bool,
    pub failure_policy: FailurePolicy,
    /// Bus history capacity; the oldest message falls off when exceeded.
    /// Must be at least 1.
    pub message_history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 2,
            context_strategy: ContextStrategy::default(),
            enable_communication: false,
            failure_policy: FailurePolicy::default(),
            message_history_limit: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallel_agents == 0 {
            return Err("max_parallel_agents must be at least 1".to_string());
        }
        if self.message_history_limit == 0 {
            return Err("message_history_limit must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
        }
    }

    pub fn max_parallel_agents(mut self, max: usize) -> Self {
        self.config.max_parallel_agents = max;
        self
    }

    pub fn context_strategy(mut self, strategy: ContextStrategy) -> Self {
        self.config.context_strategy = strategy;
        self
    }

    pub fn enable_communication(mut self, enabled: bool) -> Self {
        self.config.enable_communication = enabled;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn message_history_limit(mut self, limit: usize) -> Self {
        self.config.message_history_limit = limit;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<OrchestratorConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Cooperative cancellation switch for a run. Cheap to clone and safe to
/// trigger from any thread. The orchestrator checks it at every scheduling
/// tick: in-flight tasks finish and are recorded, everything not yet
/// started resolves as skipped. The flag is never reset; an orchestrator
/// instance is scoped to one logical run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a run produced: exactly one result per task, plus summary
/// flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub results: HashMap<String, TaskResult>,
    /// True when every task completed successfully.
    pub overall_success: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.get(task_id)
    }

    pub fn completed_count(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    /// Tasks whose own executor call failed.
    pub fn failed_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| matches!(r.error, Some(TaskFailure::Executor(_))))
            .count()
    }

    /// Tasks that never ran: upstream failures and cancellations.
    pub fn skipped_count(&self) -> usize {
        self.results
            .values()
            .filter(|r| {
                matches!(
                    r.error,
                    Some(TaskFailure::Upstream { .. }) | Some(TaskFailure::Cancelled)
                )
            })
            .count()
    }

    pub fn total_tokens(&self) -> u64 {
        self.results.values().map(|r| r.tokens_used).sum()
    }
}

struct TaskOutcome {
    task: Task,
    outcome: Result<AgentOutput, ExecutorError>,
    duration_ms: u64,
}

/// Drives a task graph to completion against a caller-supplied executor.
///
/// The loop admits work continuously: whenever a task finishes, every task
/// whose dependencies are now satisfied becomes eligible immediately, and
/// free slots are filled in priority order (supply order breaking ties).
/// At most `max_parallel_agents` tasks run at any instant.
pub struct Orchestrator {
    executor: Arc<dyn AgentExecutor>,
    config: OrchestratorConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn AgentExecutor>, config: OrchestratorConfig) -> Self {
        Self {
            executor,
            config,
            sinks: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a progress sink. Call before [`run`](Self::run); sinks are
    /// invoked synchronously in registration order.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) -> &mut Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Run the given tasks to completion. Validates the configuration and
    /// the graph up front, then schedules until every task is terminal.
    /// Returns one [`TaskResult`] per task; scheduling problems (bad
    /// config, invalid graph, deadlock) surface as `Err` instead.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunReport, OrchestratorError> {
        self.config.validate().map_err(OrchestratorError::Config)?;
        let mut graph = TaskGraph::build(tasks)?;

        let run_id = Uuid::new_v4().simple().to_string();
        let emitter = EventEmitter::new(run_id.clone(), self.sinks.clone());
        let store = ResultStore::new();
        let bus = self
            .config
            .enable_communication
            .then(|| Arc::new(MessageBus::new(self.config.message_history_limit)));

        info!(
            run_id = %run_id,
            tasks = graph.len(),
            max_parallel = self.config.max_parallel_agents,
            strategy = ?self.config.context_strategy,
            "run started"
        );
        let started = Instant::now();

        let mut satisfied: HashSet<String> = HashSet::new();
        let mut in_flight: FuturesUnordered<JoinHandle<TaskOutcome>> = FuturesUnordered::new();
        let mut cancel_seen = false;

        loop {
            if !cancel_seen && self.cancelled.load(Ordering::SeqCst) {
                cancel_seen = true;
                info!(run_id = %run_id, "cancellation observed; skipping tasks not yet started");
                self.skip_for_cancellation(&mut graph, &store, &emitter);
            }

            let mut admitted_this_tick = 0usize;
            if !cancel_seen {
                let ready_ids: Vec<String> = graph
                    .ready_set(&satisfied)
                    .iter()
                    .map(|task| task.id.clone())
                    .collect();
                for id in &ready_ids {
                    if graph.status(id) == Some(TaskStatus::Pending) {
                        graph.set_status(id, TaskStatus::Ready);
                    }
                }

                let free = self
                    .config
                    .max_parallel_agents
                    .saturating_sub(in_flight.len());
                let admitted: Vec<String> = ready_ids.into_iter().take(free).collect();
                if !admitted.is_empty() {
                    debug!(run_id = %run_id, wave = ?admitted, "admitting tasks");
                    emitter.emit(OrchestratorEvent::WaveStart {
                        task_ids: admitted.clone(),
                    });
                }
                for id in admitted {
                    let Some(task) = graph.get(&id).cloned() else {
                        continue;
                    };
                    let context = self.build_context(&graph, &store, &task, bus.clone());
                    graph.set_status(&id, TaskStatus::Running);
                    emitter.emit(OrchestratorEvent::TaskStart {
                        task_id: task.id.clone(),
                        agent_id: task.agent_id.clone(),
                    });

                    let executor = Arc::clone(&self.executor);
                    in_flight.push(tokio::spawn(async move {
                        let begun = Instant::now();
                        let outcome =
                            match AssertUnwindSafe(executor.run(&task, &context))
                                .catch_unwind()
                                .await
                            {
                                Ok(result) => result,
                                Err(payload) => Err(panic_to_error(payload)),
                            };
                        TaskOutcome {
                            task,
                            outcome,
                            duration_ms: begun.elapsed().as_millis() as u64,
                        }
                    }));
                    admitted_this_tick += 1;
                }
            }

            if in_flight.is_empty() {
                if graph.all_terminal() {
                    break;
                }
                if admitted_this_tick == 0 {
                    let pending = graph.non_terminal_ids();
                    error!(run_id = %run_id, stuck = ?pending, "scheduler deadlock, aborting run");
                    return Err(SchedulingError::Deadlock { pending }.into());
                }
            }

            match in_flight.next().await {
                Some(Ok(outcome)) => {
                    self.record_outcome(outcome, &mut graph, &mut satisfied, &store, &emitter);
                }
                Some(Err(join_err)) => {
                    // Executor panics are caught inside the spawned future,
                    // so this only fires if the runtime tore the task down.
                    error!(run_id = %run_id, error = %join_err, "spawned task vanished");
                }
                None => break,
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let results = store.snapshot();
        let completed = results.values().filter(|r| r.success).count();
        let failed = results
            .values()
            .filter(|r| matches!(r.error, Some(TaskFailure::Executor(_))))
            .count();
        let skipped = results.len() - completed - failed;
        emitter.emit(OrchestratorEvent::WorkflowComplete {
            completed,
            failed,
            skipped,
            cancelled: cancel_seen,
        });
        let overall_success = results.len() == graph.len() && results.values().all(|r| r.success);
        info!(
            run_id = %run_id,
            completed,
            failed,
            skipped,
            cancelled = cancel_seen,
            duration_ms,
            "run finished"
        );

        Ok(RunReport {
            run_id,
            results,
            overall_success,
            cancelled: cancel_seen,
            duration_ms,
        })
    }

    fn skip_for_cancellation(
        &self,
        graph: &mut TaskGraph,
        store: &ResultStore,
        emitter: &EventEmitter,
    ) {
        for id in graph.non_terminal_ids() {
            if matches!(
                graph.status(&id),
                Some(TaskStatus::Pending) | Some(TaskStatus::Ready)
            ) {
                if let Some(result) = graph.get(&id).map(TaskResult::cancelled) {
                    store.record(result);
                }
                graph.set_status(&id, TaskStatus::Skipped);
                emitter.emit(OrchestratorEvent::TaskSkipped {
                    task_id: id,
                    reason: "run cancelled".to_string(),
                });
            }
        }
    }

    fn record_outcome(
        &self,
        outcome: TaskOutcome,
        graph: &mut TaskGraph,
        satisfied: &mut HashSet<String>,
        store: &ResultStore,
        emitter: &EventEmitter,
    ) {
        let TaskOutcome {
            task,
            outcome,
            duration_ms,
        } = outcome;
        match outcome {
            Ok(output) => {
                debug!(
                    task_id = %task.id,
                    tokens = output.tokens_used,
                    duration_ms,
                    "task completed"
                );
                emitter.emit(OrchestratorEvent::TaskComplete {
                    task_id: task.id.clone(),
                    agent_id: task.agent_id.clone(),
                    tokens_used: output.tokens_used,
                    duration_ms,
                });
                store.record(TaskResult::completed(&task, output, duration_ms));
                graph.set_status(&task.id, TaskStatus::Completed);
                satisfied.insert(task.id.clone());
            }
            Err(err) => {
                error!(task_id = %task.id, error = %err, "task failed");
                emitter.emit(OrchestratorEvent::TaskError {
                    task_id: task.id.clone(),
                    agent_id: task.agent_id.clone(),
                    error: err.to_string(),
                });
                let cause = err.to_string();
                store.record(TaskResult::failed(&task, err, duration_ms));
                graph.set_status(&task.id, TaskStatus::Failed);

                match self.config.failure_policy {
                    FailurePolicy::SkipDependents => {
                        self.skip_dependents(&task.id, &cause, graph, store, emitter);
                    }
                    FailurePolicy::ContinueDependents => {
                        satisfied.insert(task.id.clone());
                    }
                }
            }
        }
    }

    fn skip_dependents(
        &self,
        failed_id: &str,
        cause: &str,
        graph: &mut TaskGraph,
        store: &ResultStore,
        emitter: &EventEmitter,
    ) {
        for dep_id in graph.transitive_dependents(failed_id) {
            if matches!(
                graph.status(&dep_id),
                Some(TaskStatus::Pending) | Some(TaskStatus::Ready)
            ) {
                warn!(task_id = %dep_id, failed = %failed_id, "skipping dependent of failed task");
                if let Some(result) = graph
                    .get(&dep_id)
                    .map(|dependent| TaskResult::skipped(dependent, failed_id, cause))
                {
                    store.record(result);
                }
                graph.set_status(&dep_id, TaskStatus::Skipped);
                emitter.emit(OrchestratorEvent::TaskSkipped {
                    task_id: dep_id,
                    reason: format!("upstream task '{failed_id}' failed"),
                });
            }
        }
    }

    fn build_context(
        &self,
        graph: &TaskGraph,
        store: &ResultStore,
        task: &Task,
        bus: Option<Arc<MessageBus>>,
    ) -> ExecutionContext {
        let source_ids = match self.config.context_strategy {
            ContextStrategy::Isolated => graph.direct_dependencies(&task.id),
            ContextStrategy::Shared => graph.ancestors(&task.id),
        };
        let results = source_ids
            .iter()
            .filter_map(|id| store.get(id))
            .filter(|result| result.success)
            .collect();
        ExecutionContext::new(
            task.id.clone(),
            task.agent_id.clone(),
            self.config.context_strategy,
            results,
            bus,
        )
    }
}

fn panic_to_error(payload: Box<dyn std::any::Any + Send>) -> ExecutorError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ExecutorError::Provider(format!("executor panicked: {message}"))
}
