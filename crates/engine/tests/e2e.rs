//! End-to-end pipeline tests: stub gateway in, mock model out.

use burrow_channels::DiscordGateway;
use burrow_config::AppConfig;
use burrow_core::error::RuntimeError;
use burrow_core::gateway::GatewayEvent;
use burrow_core::job::{Completion, GenerateParams};
use burrow_core::message::{ConversationId, Role};
use burrow_core::runtime::ModelRuntime;
use burrow_core::store::ConversationStore;
use burrow_engine::Engine;
use burrow_storage::MemStore;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BOT_ID: &str = "99";

/// Replies "reply N" in generation start order.
struct CountingRuntime {
    counter: AtomicUsize,
    delay: Duration,
}

impl CountingRuntime {
    fn instant() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicUsize::new(0),
            delay,
        })
    }
}

impl ModelRuntime for CountingRuntime {
    fn name(&self) -> &str {
        "counting"
    }

    fn model(&self) -> &str {
        "counting-0"
    }

    fn generate(
        &self,
        _prompt: &str,
        _params: &GenerateParams,
    ) -> Result<Completion, RuntimeError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(Completion {
            text: format!("reply {n}"),
            tokens_generated: 2,
            duration_ms: self.delay.as_millis() as u64,
        })
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.discord.bot_token = Some("test-token".into());
    config.discord.bot_user_id = BOT_ID.into();
    config.storage.append_backoff_ms = 1;
    config.dispatch.backoff_ms = 1;
    config.shutdown_grace_secs = 5;
    config
}

struct Harness {
    engine: Engine,
    gateway: Arc<DiscordGateway>,
    store: Arc<MemStore>,
}

async fn start_harness(config: AppConfig, runtime: Arc<dyn ModelRuntime>) -> Harness {
    let store = Arc::new(MemStore::new());
    let gateway = Arc::new(DiscordGateway::new(config.discord.clone()));
    let engine = Engine::new(&config, store.clone(), runtime, gateway.clone());
    engine.start().await.unwrap();
    Harness {
        engine,
        gateway,
        store,
    }
}

fn event(channel: &str, author: &str, content: &str) -> GatewayEvent {
    GatewayEvent {
        channel_id: channel.into(),
        channel_name: Some("general".into()),
        author_id: author.into(),
        author_name: format!("user-{author}"),
        author_is_bot: false,
        content: content.into(),
        reply_to_author_id: None,
        timestamp: Utc::now(),
    }
}

fn mention(channel: &str, author: &str, text: &str) -> GatewayEvent {
    event(channel, author, &format!("<@{BOT_ID}> {text}"))
}

/// Poll until `check` passes or the deadline expires.
async fn wait_for<F: Fn() -> bool>(check: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_async<F, Fut>(check: F, what: &str)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mention_gets_a_persisted_and_delivered_reply() {
    let h = start_harness(test_config(), CountingRuntime::instant()).await;

    h.gateway
        .inject_event(mention("chan-1", "42", "hello there"))
        .await
        .unwrap();

    let gw = h.gateway.clone();
    wait_for(|| !gw.sent_messages().is_empty(), "reply delivery").await;

    let sent = h.gateway.sent_messages();
    assert_eq!(sent, vec![("chan-1".to_string(), "reply 1".to_string())]);

    let history = h
        .store
        .read_recent(&ConversationId::from("chan-1"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hello there");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "reply 1");

    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn passive_messages_are_stored_but_not_answered() {
    let h = start_harness(test_config(), CountingRuntime::instant()).await;

    h.gateway
        .inject_event(event("chan-1", "42", "just chatting among ourselves"))
        .await
        .unwrap();

    let store = h.store.clone();
    wait_for_async(
        || async {
            store
                .read_recent(&ConversationId::from("chan-1"), 10)
                .await
                .map(|history| history.len() == 1)
                .unwrap_or(false)
        },
        "passive message storage",
    )
    .await;

    // Give the pipeline a beat to (incorrectly) reply if it was going to.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.gateway.sent_messages().is_empty());

    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bot_and_self_messages_are_ignored() {
    let h = start_harness(test_config(), CountingRuntime::instant()).await;

    let mut own = mention("chan-1", BOT_ID, "echo of myself");
    own.author_is_bot = true;
    h.gateway.inject_event(own).await.unwrap();

    let mut other_bot = mention("chan-1", "55", "beep");
    other_bot.author_is_bot = true;
    h.gateway.inject_event(other_bot).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    let history = h
        .store
        .read_recent(&ConversationId::from("chan-1"), 10)
        .await
        .unwrap();
    assert!(history.is_empty());
    assert!(h.gateway.sent_messages().is_empty());

    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replies_land_in_submission_order() {
    let h = start_harness(test_config(), CountingRuntime::instant()).await;

    for i in 0..5 {
        h.gateway
            .inject_event(mention("chan-1", "42", &format!("question {i}")))
            .await
            .unwrap();
    }

    let gw = h.gateway.clone();
    wait_for(|| gw.sent_messages().len() == 5, "five replies").await;

    let history = h
        .store
        .read_recent(&ConversationId::from("chan-1"), 100)
        .await
        .unwrap();
    let replies: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(
        replies,
        vec!["reply 1", "reply 2", "reply 3", "reply 4", "reply 5"]
    );
    // Sequence ids are strictly increasing in persisted order.
    for pair in history.windows(2) {
        assert!(pair[0].id < pair[1].id);
    }

    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saturation_sends_overloaded_notice() {
    let mut config = test_config();
    config.scheduler.workers = 1;
    config.scheduler.queue_depth = 0;
    let h = start_harness(config, CountingRuntime::slow(Duration::from_millis(500))).await;

    h.gateway
        .inject_event(mention("chan-1", "42", "long question"))
        .await
        .unwrap();
    // Wait until the first job is actually running.
    let engine = &h.engine;
    wait_for_async(|| async { engine.stats().await.running == 1 }, "job running").await;

    h.gateway
        .inject_event(mention("chan-2", "43", "me too"))
        .await
        .unwrap();

    let gw = h.gateway.clone();
    wait_for(
        || {
            gw.sent_messages()
                .iter()
                .any(|(chan, text)| chan == "chan-2" && text.contains("try again"))
        },
        "overloaded notice",
    )
    .await;

    // The saturated conversation still keeps its user turn.
    let history = h
        .store
        .read_recent(&ConversationId::from("chan-2"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_generation_sends_notice() {
    let mut config = test_config();
    config.scheduler.job_timeout_secs = 1;
    let h = start_harness(config, CountingRuntime::slow(Duration::from_secs(3))).await;

    h.gateway
        .inject_event(mention("chan-1", "42", "too slow"))
        .await
        .unwrap();

    let gw = h.gateway.clone();
    wait_for(
        || {
            gw.sent_messages()
                .iter()
                .any(|(_, text)| text.contains("too long"))
        },
        "timeout notice",
    )
    .await;

    // No assistant turn was persisted.
    let history = h
        .store
        .read_recent(&ConversationId::from("chan-1"), 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);

    h.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn corrupt_storage_halts_the_conversation() {
    let config = test_config();
    let store = Arc::new(MemStore::new());
    let gateway = Arc::new(DiscordGateway::new(config.discord.clone()));
    let engine = Engine::new(
        &config,
        store.clone(),
        CountingRuntime::instant(),
        gateway.clone(),
    );
    engine.start().await.unwrap();

    store.fail_next_corrupt(1);
    gateway
        .inject_event(mention("chan-1", "42", "doomed"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Later messages for the halted conversation are ignored entirely.
    gateway
        .inject_event(mention("chan-1", "42", "hello?"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let history = store
        .read_recent(&ConversationId::from("chan-1"), 10)
        .await
        .unwrap();
    assert!(history.is_empty());
    assert!(gateway.sent_messages().is_empty());

    // Other conversations are unaffected.
    gateway
        .inject_event(mention("chan-2", "43", "still alive?"))
        .await
        .unwrap();
    let gw = gateway.clone();
    wait_for(|| !gw.sent_messages().is_empty(), "healthy conversation reply").await;

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_finishes_running_generation() {
    let h = start_harness(
        test_config(),
        CountingRuntime::slow(Duration::from_millis(300)),
    )
    .await;

    h.gateway
        .inject_event(mention("chan-1", "42", "last question"))
        .await
        .unwrap();
    let engine = &h.engine;
    wait_for_async(|| async { engine.stats().await.running == 1 }, "job running").await;

    h.engine.shutdown().await;

    // The running generation completed and was delivered before exit.
    let sent = h.gateway.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "reply 1");

    // The gateway no longer accepts events.
    assert!(h
        .gateway
        .inject_event(mention("chan-1", "42", "too late"))
        .await
        .is_err());
}
