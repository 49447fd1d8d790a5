//! Conversation orchestration engine for Burrow.
//!
//! The engine sits between a messaging gateway and a locally hosted
//! blocking language model:
//!
//! ```text
//! gateway events → normalizer → store → assembler → scheduler → runtime
//!                                                       │
//!                                  dispatcher ← outcome ┘
//!                                  (persist reply, deliver)
//! ```
//!
//! The agent listens passively: every acceptable message is persisted,
//! but a reply is only generated when the agent is mentioned or a user
//! replies to one of its messages.

pub mod assembler;
pub mod dispatcher;
pub mod normalizer;
pub mod scheduler;
pub mod token;

use burrow_config::AppConfig;
use burrow_core::error::{Result, ScheduleError, StorageError};
use burrow_core::event::{DomainEvent, EventBus};
use burrow_core::gateway::{Gateway, GatewayEvent};
use burrow_core::job::{GenerateParams, JobSpec};
use burrow_core::message::ConversationId;
use burrow_core::runtime::ModelRuntime;
use burrow_core::store::ConversationStore;
use burrow_storage::{append_with_retry, RetryPolicy};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::assembler::ContextAssembler;
use crate::dispatcher::{DispatchOptions, ResponseDispatcher};
use crate::normalizer::{Intake, Normalizer};
use crate::scheduler::{Scheduler, SchedulerOptions, SchedulerStats};

/// Notice sent when the scheduler queue is full.
const OVERLOADED_NOTICE: &str =
    "I'm handling a lot of conversations right now. Please try again in a moment.";

/// The assembled agent: owns the scheduler and the intake loop.
pub struct Engine {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn Gateway>,
    scheduler: Scheduler,
    bus: Arc<EventBus>,
    normalizer: Arc<Normalizer>,
    assembler: Arc<ContextAssembler>,
    poisoned: Arc<Mutex<HashSet<ConversationId>>>,
    retry: RetryPolicy,
    history_limit: usize,
    params: GenerateParams,
    shutdown_grace: Duration,
    intake: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Wire up the pipeline. Must be called within a tokio runtime; the
    /// scheduler actor is spawned here.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn ConversationStore>,
        runtime: Arc<dyn ModelRuntime>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        let bus = Arc::new(EventBus::default());
        let poisoned = Arc::new(Mutex::new(HashSet::new()));

        let retry = RetryPolicy::new(
            config.storage.append_retries,
            Duration::from_millis(config.storage.append_backoff_ms),
        );

        let dispatcher = Arc::new(ResponseDispatcher::new(
            store.clone(),
            gateway.clone(),
            bus.clone(),
            DispatchOptions {
                max_retries: config.dispatch.max_retries,
                backoff: Duration::from_millis(config.dispatch.backoff_ms),
            },
            retry,
            poisoned.clone(),
        ));

        let scheduler = Scheduler::spawn(
            SchedulerOptions {
                workers: config.scheduler.workers,
                queue_depth: config.scheduler.queue_depth,
                job_timeout: Duration::from_secs(config.scheduler.job_timeout_secs),
            },
            runtime,
            dispatcher,
        );

        let normalizer = Arc::new(Normalizer::new(
            gateway.self_id(),
            config.discord.allowed_users.clone(),
            config.discord.channel_filter.clone(),
        ));
        let assembler = Arc::new(ContextAssembler::new(
            &config.persona.system_prompt,
            config.history_budget(),
        ));

        Self {
            store,
            gateway,
            scheduler,
            bus,
            normalizer,
            assembler,
            poisoned,
            retry,
            history_limit: config.storage.history_limit,
            params: GenerateParams {
                temperature: config.model.temperature,
                max_tokens: config.model.reserved_output_tokens,
            },
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            intake: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the gateway and the intake loop.
    pub async fn start(&self) -> Result<()> {
        let rx = self.gateway.start().await?;
        info!(gateway = self.gateway.name(), "engine started");

        let ctx = IntakeContext {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            scheduler: self.scheduler.clone(),
            bus: self.bus.clone(),
            normalizer: self.normalizer.clone(),
            assembler: self.assembler.clone(),
            poisoned: self.poisoned.clone(),
            retry: self.retry,
            history_limit: self.history_limit,
            params: self.params.clone(),
        };
        let handle = tokio::spawn(run_intake(ctx, rx));
        *self.intake.lock().await = Some(handle);
        Ok(())
    }

    /// Stop accepting events, drain running generations, shut down.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        if let Err(err) = self.gateway.stop().await {
            warn!(error = %err, "gateway stop failed");
        }
        if let Some(handle) = self.intake.lock().await.take() {
            // Closing the gateway ends the event stream; the loop exits
            // on its own.
            let _ = handle.await;
        }
        self.scheduler.shutdown(self.shutdown_grace).await;
        if let Err(err) = self.store.flush().await {
            warn!(error = %err, "storage flush failed");
        }
        info!("engine stopped");
    }

    /// Subscribe to domain events.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Current scheduler load.
    pub async fn stats(&self) -> SchedulerStats {
        self.scheduler.stats().await
    }
}

struct IntakeContext {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn Gateway>,
    scheduler: Scheduler,
    bus: Arc<EventBus>,
    normalizer: Arc<Normalizer>,
    assembler: Arc<ContextAssembler>,
    poisoned: Arc<Mutex<HashSet<ConversationId>>>,
    retry: RetryPolicy,
    history_limit: usize,
    params: GenerateParams,
}

impl IntakeContext {
    fn is_poisoned(&self, conversation_id: &ConversationId) -> bool {
        match self.poisoned.lock() {
            Ok(set) => set.contains(conversation_id),
            Err(poisoned) => poisoned.into_inner().contains(conversation_id),
        }
    }

    fn poison(&self, conversation_id: &ConversationId) {
        match self.poisoned.lock() {
            Ok(mut set) => set.insert(conversation_id.clone()),
            Err(poisoned) => poisoned.into_inner().insert(conversation_id.clone()),
        };
    }
}

async fn run_intake(ctx: IntakeContext, mut rx: mpsc::Receiver<GatewayEvent>) {
    while let Some(event) = rx.recv().await {
        handle_event(&ctx, event).await;
    }
    debug!("intake loop finished");
}

async fn handle_event(ctx: &IntakeContext, event: GatewayEvent) {
    let intake = ctx.normalizer.classify(&event);
    let (message, wants_reply) = match intake {
        Intake::Drop(reason) => {
            debug!(
                channel = %event.channel_id,
                reason = reason.as_str(),
                "dropped inbound event"
            );
            ctx.bus.publish(DomainEvent::MessageDropped {
                conversation_id: event.channel_id,
                reason: reason.as_str().into(),
                timestamp: Utc::now(),
            });
            return;
        }
        Intake::Message {
            message,
            wants_reply,
        } => (message, wants_reply),
    };

    let conversation_id = message.conversation_id.clone();
    if ctx.is_poisoned(&conversation_id) {
        warn!(conversation = %conversation_id, "conversation halted, ignoring message");
        return;
    }

    // Persist first: a turn the store never saw does not exist.
    let token_count = message.token_count;
    match append_with_retry(ctx.store.as_ref(), message, ctx.retry).await {
        Ok(_) => {
            ctx.bus.publish(DomainEvent::MessageStored {
                conversation_id: conversation_id.0.clone(),
                role: "user".into(),
                token_count,
                timestamp: Utc::now(),
            });
            // Turns beyond the history window can never reach a prompt
            // again; drop them so the table stays bounded.
            if let Err(err) = ctx.store.prune(&conversation_id, ctx.history_limit).await {
                warn!(conversation = %conversation_id, error = %err, "history prune failed");
            }
        }
        Err(StorageError::Corrupt(reason)) => {
            error!(
                conversation = %conversation_id,
                reason,
                "storage corrupt, halting conversation"
            );
            ctx.poison(&conversation_id);
            ctx.bus.publish(DomainEvent::ErrorOccurred {
                context: "persist_inbound".into(),
                error_message: reason,
                timestamp: Utc::now(),
            });
            return;
        }
        Err(err) => {
            error!(conversation = %conversation_id, error = %err, "could not persist message");
            ctx.bus.publish(DomainEvent::ErrorOccurred {
                context: "persist_inbound".into(),
                error_message: err.to_string(),
                timestamp: Utc::now(),
            });
            return;
        }
    }

    if !wants_reply {
        return;
    }

    // Prompt is frozen at submission time, from whatever history is
    // committed right now.
    let history = match ctx
        .store
        .read_recent(&conversation_id, ctx.history_limit)
        .await
    {
        Ok(history) => history,
        Err(err) => {
            error!(conversation = %conversation_id, error = %err, "could not load history");
            return;
        }
    };

    let prompt = ctx.assembler.assemble(&history);
    debug!(
        conversation = %conversation_id,
        tokens = prompt.token_estimate,
        turns = prompt.turns_included,
        dropped = prompt.turns_dropped,
        "prompt assembled"
    );

    let spec = JobSpec::new(conversation_id.clone(), prompt.text, ctx.params.clone());
    let job_id = spec.job_id;
    match ctx.scheduler.submit(spec).await {
        Ok(_handle) => {
            // Outcome handling lives in the completion sink; the handle
            // is not needed here.
            ctx.bus.publish(DomainEvent::JobQueued {
                job_id: job_id.to_string(),
                conversation_id: conversation_id.0.clone(),
                timestamp: Utc::now(),
            });
        }
        Err(ScheduleError::Saturated { queue_depth }) => {
            warn!(conversation = %conversation_id, queue_depth, "scheduler saturated");
            if let Err(err) = ctx
                .gateway
                .send(&conversation_id.0, OVERLOADED_NOTICE)
                .await
            {
                debug!(error = %err, "could not send overloaded notice");
            }
        }
        Err(ScheduleError::ShuttingDown) => {
            debug!(conversation = %conversation_id, "shutting down, dropping reply request");
        }
    }
}
