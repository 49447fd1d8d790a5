//! Inference scheduler — bounded concurrency over a blocking model.
//!
//! An actor task owns all scheduling state and is driven by two channels:
//! commands from callers (submit, cancel, stats, shutdown) and completion
//! notices from worker tasks. Invariants it maintains:
//!
//! - at most `workers` generations run at once, globally
//! - at most one generation runs per conversation at once
//! - at most `queue_depth` jobs wait in the global queue (running jobs
//!   do not count); past that, submission fails with `Saturated`
//! - per conversation, jobs start in submission order, and the completion
//!   sink for a job runs *before* the conversation's slot frees, so
//!   persisted replies land in submission order too
//!
//! Each generation runs on a blocking thread under `tokio::time::timeout`.
//! On timeout the job is failed and the slot freed; the underlying model
//! call cannot be interrupted and may keep burning its thread until it
//! finishes on its own. That is the documented cost of a cancellation-free
//! backend.

use async_trait::async_trait;
use burrow_core::error::ScheduleError;
use burrow_core::job::{JobFailure, JobId, JobOutcome, JobSpec};
use burrow_core::message::ConversationId;
use burrow_core::runtime::ModelRuntime;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Receives every terminal job outcome, before the conversation slot is
/// released. Persisting and delivering the reply here is what keeps reply
/// order equal to submission order.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    async fn complete(&self, outcome: &JobOutcome);
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub workers: usize,
    pub queue_depth: usize,
    pub job_timeout: Duration,
}

/// Point-in-time scheduler state, for the doctor command and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub running: usize,
    pub queued: usize,
}

/// Handle to one submitted job. Resolves when the job reaches a terminal
/// state (after the completion sink has run, except for cancellations).
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: JobId,
    pub done: oneshot::Receiver<JobOutcome>,
}

enum Command {
    Submit {
        spec: JobSpec,
        ack: oneshot::Sender<Result<JobHandle, ScheduleError>>,
    },
    Cancel {
        job_id: JobId,
        ack: oneshot::Sender<bool>,
    },
    Stats {
        ack: oneshot::Sender<SchedulerStats>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

struct Pending {
    spec: JobSpec,
    done_tx: oneshot::Sender<JobOutcome>,
}

struct WorkerDone {
    conversation_id: ConversationId,
}

/// The public face of the scheduler actor.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<Command>,
}

impl Scheduler {
    /// Spawn the actor task.
    pub fn spawn(
        options: SchedulerOptions,
        runtime: Arc<dyn ModelRuntime>,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_actor(options, runtime, sink, rx));
        Self { tx }
    }

    /// Submit a job. Fails fast with `Saturated` when the queue is full
    /// and `ShuttingDown` once shutdown has begun.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobHandle, ScheduleError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Submit {
                spec,
                ack: ack_tx,
            })
            .await
            .map_err(|_| ScheduleError::ShuttingDown)?;
        ack_rx.await.map_err(|_| ScheduleError::ShuttingDown)?
    }

    /// Cancel a queued job. Returns false if the job is already running,
    /// finished, or unknown; running jobs cannot be interrupted.
    pub async fn cancel(&self, job_id: JobId) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Cancel {
                job_id,
                ack: ack_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        ack_rx.await.unwrap_or(false)
    }

    /// Current running/queued counts.
    pub async fn stats(&self) -> SchedulerStats {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Stats { ack: ack_tx }).await.is_err() {
            return SchedulerStats {
                running: 0,
                queued: 0,
            };
        }
        ack_rx.await.unwrap_or(SchedulerStats {
            running: 0,
            queued: 0,
        })
    }

    /// Begin shutdown: reject new work, cancel queued jobs, and wait up to
    /// `grace` for running generations to finish.
    pub async fn shutdown(&self, grace: Duration) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Shutdown { ack: ack_tx })
            .await
            .is_err()
        {
            return;
        }
        if tokio::time::timeout(grace, ack_rx).await.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "shutdown grace expired with generations still running"
            );
        }
    }
}

struct ActorState {
    running: usize,
    queued: VecDeque<Pending>,
    busy: HashMap<ConversationId, bool>,
    shutting_down: bool,
    shutdown_ack: Option<oneshot::Sender<()>>,
}

impl ActorState {
    fn is_busy(&self, conversation_id: &ConversationId) -> bool {
        self.busy.get(conversation_id).copied().unwrap_or(false)
    }

    fn has_queued_for(&self, conversation_id: &ConversationId) -> bool {
        self.queued
            .iter()
            .any(|p| &p.spec.conversation_id == conversation_id)
    }
}

async fn run_actor(
    options: SchedulerOptions,
    runtime: Arc<dyn ModelRuntime>,
    sink: Arc<dyn CompletionSink>,
    mut rx: mpsc::Receiver<Command>,
) {
    let (done_tx, mut done_rx) = mpsc::channel::<WorkerDone>(64);
    let mut state = ActorState {
        running: 0,
        queued: VecDeque::new(),
        busy: HashMap::new(),
        shutting_down: false,
        shutdown_ack: None,
    };

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Submit { spec, ack } => {
                        let reply = admit(&mut state, &options, &runtime, &sink, &done_tx, spec);
                        let _ = ack.send(reply);
                    }
                    Command::Cancel { job_id, ack } => {
                        let cancelled = cancel_queued(&mut state, job_id);
                        let _ = ack.send(cancelled);
                    }
                    Command::Stats { ack } => {
                        let _ = ack.send(SchedulerStats {
                            running: state.running,
                            queued: state.queued.len(),
                        });
                    }
                    Command::Shutdown { ack } => {
                        info!(
                            running = state.running,
                            queued = state.queued.len(),
                            "scheduler shutting down"
                        );
                        state.shutting_down = true;
                        drain_queue_as_cancelled(&mut state);
                        if state.running == 0 {
                            let _ = ack.send(());
                            break;
                        }
                        state.shutdown_ack = Some(ack);
                    }
                }
            }
            done = done_rx.recv() => {
                let Some(done) = done else { break };
                state.running -= 1;
                state.busy.insert(done.conversation_id, false);
                pump(&mut state, &options, &runtime, &sink, &done_tx);
                if state.shutting_down && state.running == 0 {
                    if let Some(ack) = state.shutdown_ack.take() {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }
    }
}

/// Admission: run now if a worker and the conversation are free, otherwise
/// queue if there is room.
fn admit(
    state: &mut ActorState,
    options: &SchedulerOptions,
    runtime: &Arc<dyn ModelRuntime>,
    sink: &Arc<dyn CompletionSink>,
    done_tx: &mpsc::Sender<WorkerDone>,
    spec: JobSpec,
) -> Result<JobHandle, ScheduleError> {
    if state.shutting_down {
        return Err(ScheduleError::ShuttingDown);
    }

    let job_id = spec.job_id;
    let (handle_tx, handle_rx) = oneshot::channel();
    let handle = JobHandle {
        job_id,
        done: handle_rx,
    };

    let conversation_id = spec.conversation_id.clone();
    let immediate = state.running < options.workers
        && !state.is_busy(&conversation_id)
        && !state.has_queued_for(&conversation_id);

    if immediate {
        dispatch(
            state,
            options,
            runtime,
            sink,
            done_tx,
            Pending {
                spec,
                done_tx: handle_tx,
            },
        );
        return Ok(handle);
    }

    if state.queued.len() >= options.queue_depth {
        debug!(%job_id, %conversation_id, "queue full, rejecting submission");
        return Err(ScheduleError::Saturated {
            queue_depth: options.queue_depth,
        });
    }

    state.queued.push_back(Pending {
        spec,
        done_tx: handle_tx,
    });
    debug!(%job_id, %conversation_id, queued = state.queued.len(), "job queued");
    Ok(handle)
}

/// Start queued jobs while workers are free, oldest-submitted first among
/// conversations that are idle.
fn pump(
    state: &mut ActorState,
    options: &SchedulerOptions,
    runtime: &Arc<dyn ModelRuntime>,
    sink: &Arc<dyn CompletionSink>,
    done_tx: &mpsc::Sender<WorkerDone>,
) {
    while state.running < options.workers {
        let next = state
            .queued
            .iter()
            .position(|p| !state.is_busy(&p.spec.conversation_id));
        let Some(index) = next else { break };
        let Some(pending) = state.queued.remove(index) else {
            break;
        };
        dispatch(state, options, runtime, sink, done_tx, pending);
    }
}

fn cancel_queued(state: &mut ActorState, job_id: JobId) -> bool {
    let Some(index) = state.queued.iter().position(|p| p.spec.job_id == job_id) else {
        return false;
    };
    if let Some(pending) = state.queued.remove(index) {
        let _ = pending.done_tx.send(cancelled_outcome(&pending.spec));
        debug!(%job_id, "queued job cancelled");
        return true;
    }
    false
}

fn drain_queue_as_cancelled(state: &mut ActorState) {
    for pending in state.queued.drain(..) {
        let _ = pending.done_tx.send(cancelled_outcome(&pending.spec));
    }
}

fn cancelled_outcome(spec: &JobSpec) -> JobOutcome {
    JobOutcome {
        job_id: spec.job_id,
        conversation_id: spec.conversation_id.clone(),
        result: Err(JobFailure::Cancelled),
        finished_at: Utc::now(),
    }
}

/// Mark the slot busy and spawn the worker task for one job.
fn dispatch(
    state: &mut ActorState,
    options: &SchedulerOptions,
    runtime: &Arc<dyn ModelRuntime>,
    sink: &Arc<dyn CompletionSink>,
    done_tx: &mpsc::Sender<WorkerDone>,
    pending: Pending,
) {
    state.running += 1;
    state
        .busy
        .insert(pending.spec.conversation_id.clone(), true);

    let runtime = Arc::clone(runtime);
    let sink = Arc::clone(sink);
    let done_tx = done_tx.clone();
    let job_timeout = options.job_timeout;
    let Pending { spec, done_tx: handle_tx } = pending;

    debug!(job_id = %spec.job_id, conversation = %spec.conversation_id, "job running");

    tokio::spawn(async move {
        let job_id = spec.job_id;
        let conversation_id = spec.conversation_id.clone();

        let prompt = spec.prompt;
        let params = spec.params;
        let generation =
            tokio::task::spawn_blocking(move || runtime.generate(&prompt, &params));

        let result = match tokio::time::timeout(job_timeout, generation).await {
            Ok(Ok(Ok(completion))) => Ok(completion),
            Ok(Ok(Err(err))) => Err(JobFailure::Runtime(err.to_string())),
            Ok(Err(join_err)) => Err(JobFailure::Runtime(format!(
                "generation task failed: {join_err}"
            ))),
            Err(_) => {
                // The blocking call keeps its thread until it returns on
                // its own; only the job's slot is released here.
                warn!(%job_id, %conversation_id, timeout_secs = job_timeout.as_secs(), "generation timed out");
                Err(JobFailure::Timeout)
            }
        };

        let outcome = JobOutcome {
            job_id,
            conversation_id: conversation_id.clone(),
            result,
            finished_at: Utc::now(),
        };

        // Sink runs before the slot frees: the next job for this
        // conversation cannot start until this reply is persisted.
        sink.complete(&outcome).await;

        let _ = handle_tx.send(outcome);
        let _ = done_tx.send(WorkerDone { conversation_id }).await;
    });
}
