//! Cross-module behaviour of dispatch, workers and the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::{TempDir, tempdir};
use tokio::sync::mpsc;

use crate::handler::{self, CompileError, GlueCompiler, HandlerFactory, HandlerPrototype, JobContext, JobHandler};
use crate::joblog::JobLogStore;
use crate::test_utils::{
    FailingHandler, GateHandler, NoResultHandler, PanicHandler, SleepHandler, SuccessHandler, capture_sender,
    recv_records, wait_until,
};
use crate::types::{CallbackRecord, GlueType, HandleCode, JobId, LogId, TriggerRequest};

use super::dispatch::{CHANGE_HANDLER_REASON, CHANGE_SOURCE_REASON, COVER_EARLY_REASON, KILL_REASON, SHUTDOWN_REASON};
use super::{DispatchError, Dispatcher, Registry, WorkerConfig, WorkerDeps};

// ─── Test Helpers ───

struct Harness {
    _dir: TempDir,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    rx: mpsc::UnboundedReceiver<CallbackRecord>,
}

fn fast_config() -> WorkerConfig {
    WorkerConfig::new()
        .with_poll_interval(Duration::from_millis(20))
        .with_idle_limit(1_000)
}

fn harness_with(config: WorkerConfig, factory: Option<Arc<dyn HandlerFactory>>) -> Harness {
    let dir = tempdir().unwrap();
    let store = JobLogStore::new(dir.path());
    store.ensure_dirs().unwrap();
    let (callbacks, rx) = capture_sender(&store);
    let registry = Arc::new(Registry::new());
    let deps = WorkerDeps {
        config,
        log_store: store,
        callbacks,
        registry: Arc::clone(&registry),
    };
    let dispatcher = Arc::new(Dispatcher::new(GlueCompiler::new(factory), deps));
    Harness { _dir: dir, dispatcher, registry, rx }
}

fn harness() -> Harness {
    harness_with(fast_config(), None)
}

fn bean(job: i64, log: i64, handler: &str) -> TriggerRequest {
    TriggerRequest::bean(JobId(job), LogId(log), handler)
}

fn msg(record: &CallbackRecord) -> &str {
    record.handle_msg.as_deref().unwrap_or_default()
}

/// Compiles any source into a success handler echoing the source.
struct EchoFactory;

impl HandlerFactory for EchoFactory {
    fn compile(&self, source: &str) -> Result<HandlerPrototype, CompileError> {
        let source = source.to_string();
        Ok(Arc::new(move || Arc::new(SuccessHandler::new(source.clone())) as Arc<dyn JobHandler>))
    }
}

/// Compiles any source into a handler that fails once it has been destroyed.
struct LifecycleFactory;

impl HandlerFactory for LifecycleFactory {
    fn compile(&self, _source: &str) -> Result<HandlerPrototype, CompileError> {
        Ok(Arc::new(|| Arc::new(DestroyAwareHandler::default()) as Arc<dyn JobHandler>))
    }
}

#[derive(Default)]
struct DestroyAwareHandler {
    destroyed: AtomicBool,
}

#[async_trait]
impl JobHandler for DestroyAwareHandler {
    async fn execute(&self, ctx: &JobContext) -> handler::Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            ctx.handle_fail("used after destroy");
        } else {
            ctx.handle_success(Some("live".into()));
        }
        Ok(())
    }

    async fn destroy(&self) -> handler::Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Execution Outcomes ───

#[tokio::test]
async fn serial_triggers_run_in_order() {
    let mut h = harness();
    h.registry.register_handler("ok", Arc::new(SuccessHandler::new("done")));

    for log in 1..=3 {
        h.dispatcher.dispatch(bean(1, log, "ok")).await.unwrap();
    }

    let records = recv_records(&mut h.rx, 3).await;
    let ids: Vec<_> = records.iter().map(|r| r.log_id.0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(records.iter().all(|r| r.handle_code == HandleCode::Success));
    assert_eq!(msg(&records[0]), "done");
    assert_eq!(h.registry.worker_count(), 1);
}

#[tokio::test]
async fn handler_error_becomes_fail_callback() {
    let mut h = harness();
    h.registry.register_handler("broken", Arc::new(FailingHandler));

    h.dispatcher.dispatch(bean(1, 1, "broken")).await.unwrap();

    let record = recv_records(&mut h.rx, 1).await.remove(0);
    assert_eq!(record.handle_code, HandleCode::Fail);
    assert_eq!(msg(&record), "job execute exception: database unreachable");
}

#[tokio::test]
async fn missing_result_is_reported_as_lost() {
    let mut h = harness();
    h.registry.register_handler("silent", Arc::new(NoResultHandler));

    h.dispatcher.dispatch(bean(1, 1, "silent")).await.unwrap();

    let record = recv_records(&mut h.rx, 1).await.remove(0);
    assert_eq!(record.handle_code, HandleCode::Fail);
    assert_eq!(msg(&record), "job handle result lost.");
}

#[tokio::test]
async fn panicking_handler_does_not_kill_worker() {
    let mut h = harness();
    h.registry.register_handler("panics", Arc::new(PanicHandler));

    h.dispatcher.dispatch(bean(1, 1, "panics")).await.unwrap();
    h.dispatcher.dispatch(bean(1, 2, "panics")).await.unwrap();

    let records = recv_records(&mut h.rx, 2).await;
    for record in &records {
        assert_eq!(record.handle_code, HandleCode::Fail);
        assert!(msg(record).contains("handler blew up"));
    }
}

#[tokio::test]
async fn timeout_is_reported_without_waiting_for_handler() {
    let mut h = harness();
    let slow = Arc::new(SleepHandler::new(Duration::from_secs(60)));
    h.registry.register_handler("slow", slow.clone());

    let started = Instant::now();
    h.dispatcher
        .dispatch(bean(1, 1, "slow").with_timeout(2))
        .await
        .unwrap();

    let record = recv_records(&mut h.rx, 1).await.remove(0);
    let elapsed = started.elapsed();
    assert_eq!(record.handle_code, HandleCode::Timeout);
    assert_eq!(msg(&record), "job execute timeout ");
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    assert_eq!(slow.finished(), 0);
}

// ─── Queue Dedup ───

#[tokio::test]
async fn duplicate_log_id_is_rejected_while_queued() {
    let h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    assert!(wait_until(|| gate.started() == 1).await);
    h.dispatcher.dispatch(bean(1, 2, "gate")).await.unwrap();

    let err = h.dispatcher.dispatch(bean(1, 2, "gate")).await.unwrap_err();

    assert!(matches!(err, DispatchError::DuplicateTrigger(LogId(2))));
    assert_eq!(h.registry.lookup_worker(JobId(1)).unwrap().queue_len(), 1);
    gate.release(2);
}

// ─── Block Strategies ───

#[tokio::test]
async fn discard_later_rejects_when_busy() {
    let h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    assert!(wait_until(|| gate.started() == 1).await);
    h.dispatcher.dispatch(bean(1, 2, "gate")).await.unwrap();
    let worker = h.registry.lookup_worker(JobId(1)).unwrap();

    let err = h
        .dispatcher
        .dispatch(bean(1, 3, "gate").with_block_strategy("DISCARD_LATER"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::BlockedDiscarded));
    assert_eq!(err.to_string(), "block strategy effect：Discard Later");
    assert!(Arc::ptr_eq(&worker, &h.registry.lookup_worker(JobId(1)).unwrap()));
    assert_eq!(worker.queue_len(), 1);
    assert!(!worker.is_stopped());
    gate.release(2);
}

#[tokio::test]
async fn discard_later_accepts_when_idle() {
    let mut h = harness();
    h.registry.register_handler("ok", Arc::new(SuccessHandler::new("done")));

    h.dispatcher.dispatch(bean(1, 1, "ok")).await.unwrap();
    recv_records(&mut h.rx, 1).await;
    let worker = h.registry.lookup_worker(JobId(1)).unwrap();
    assert!(wait_until(|| !worker.is_running_or_has_queue()).await);

    h.dispatcher
        .dispatch(bean(1, 2, "ok").with_block_strategy("DISCARD_LATER"))
        .await
        .unwrap();
    assert_eq!(recv_records(&mut h.rx, 1).await[0].log_id, LogId(2));
}

#[tokio::test]
async fn cover_early_replaces_busy_worker() {
    let mut h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    assert!(wait_until(|| gate.started() == 1).await);
    let old = h.registry.lookup_worker(JobId(1)).unwrap();

    h.dispatcher
        .dispatch(bean(1, 2, "gate").with_block_strategy("COVER_EARLY"))
        .await
        .unwrap();

    let killed = recv_records(&mut h.rx, 1).await.remove(0);
    assert_eq!(killed.log_id, LogId(1));
    assert_eq!(killed.handle_code, HandleCode::Fail);
    assert_eq!(msg(&killed), format!("{COVER_EARLY_REASON} [job running, killed]"));
    assert!(old.is_stopped());

    let new = h.registry.lookup_worker(JobId(1)).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));

    assert!(wait_until(|| gate.started() == 2).await);
    gate.release(1);
    let done = recv_records(&mut h.rx, 1).await.remove(0);
    assert_eq!(done.log_id, LogId(2));
    assert_eq!(done.handle_code, HandleCode::Success);
    assert!(wait_until(|| gate.destroys() == 1).await);
}

// ─── Replacement On Identity Change ───

#[tokio::test]
async fn changing_bean_handler_replaces_worker() {
    let mut h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());
    h.registry.register_handler("ok", Arc::new(SuccessHandler::new("new handler")));

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    assert!(wait_until(|| gate.started() == 1).await);

    h.dispatcher.dispatch(bean(1, 2, "ok")).await.unwrap();

    let mut records = recv_records(&mut h.rx, 2).await;
    records.sort_by_key(|r| r.log_id);
    assert_eq!(msg(&records[0]), format!("{CHANGE_HANDLER_REASON} [job running, killed]"));
    assert_eq!(msg(&records[1]), "new handler");
}

#[tokio::test]
async fn unknown_bean_handler_is_not_found_and_keeps_worker() {
    let h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());
    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    let worker = h.registry.lookup_worker(JobId(1)).unwrap();

    let err = h.dispatcher.dispatch(bean(1, 2, "nope")).await.unwrap_err();

    assert_eq!(err.code(), 404);
    assert_eq!(err.to_string(), "job handler [nope] not found.");
    assert!(!worker.is_stopped());
    gate.release(1);
}

#[tokio::test]
async fn glue_version_change_replaces_worker() {
    let mut h = harness_with(fast_config(), Some(Arc::new(EchoFactory)));

    h.dispatcher
        .dispatch(bean(1, 1, "").with_glue(GlueType::Groovy, "v1", 100))
        .await
        .unwrap();
    assert_eq!(msg(&recv_records(&mut h.rx, 1).await[0]), "v1");
    let first = h.registry.lookup_worker(JobId(1)).unwrap();

    h.dispatcher
        .dispatch(bean(1, 2, "").with_glue(GlueType::Groovy, "v1", 100))
        .await
        .unwrap();
    recv_records(&mut h.rx, 1).await;
    assert!(Arc::ptr_eq(&first, &h.registry.lookup_worker(JobId(1)).unwrap()));

    h.dispatcher
        .dispatch(bean(1, 3, "").with_glue(GlueType::Groovy, "v2", 200))
        .await
        .unwrap();
    assert_eq!(msg(&recv_records(&mut h.rx, 1).await[0]), "v2");
    assert!(first.is_stopped());
    assert_eq!(first.stop_reason().as_deref(), Some(CHANGE_SOURCE_REASON));
}

#[tokio::test]
async fn killing_one_glue_job_leaves_others_with_same_source_alive() {
    let mut h = harness_with(fast_config(), Some(Arc::new(LifecycleFactory)));
    let source = "class Shared {}";

    for job in 1..=2 {
        h.dispatcher
            .dispatch(bean(job, job, "").with_glue(GlueType::Groovy, source, 100))
            .await
            .unwrap();
    }
    let records = recv_records(&mut h.rx, 2).await;
    assert!(records.iter().all(|r| msg(r) == "live"));

    let killed = h.registry.lookup_worker(JobId(1)).unwrap();
    assert!(h.dispatcher.kill(JobId(1)).await);
    assert!(killed.join(Duration::from_secs(5)).await);

    h.dispatcher
        .dispatch(bean(2, 3, "").with_glue(GlueType::Groovy, source, 100))
        .await
        .unwrap();
    let record = recv_records(&mut h.rx, 1).await.remove(0);
    assert_eq!(record.handle_code, HandleCode::Success);
    assert_eq!(msg(&record), "live");
}

#[tokio::test]
async fn glue_version_bump_with_same_source_gets_fresh_handler() {
    let mut h = harness_with(fast_config(), Some(Arc::new(LifecycleFactory)));
    let source = "class Same {}";

    h.dispatcher
        .dispatch(bean(1, 1, "").with_glue(GlueType::Groovy, source, 100))
        .await
        .unwrap();
    recv_records(&mut h.rx, 1).await;
    let old = h.registry.lookup_worker(JobId(1)).unwrap();

    h.dispatcher
        .dispatch(bean(1, 2, "").with_glue(GlueType::Groovy, source, 200))
        .await
        .unwrap();
    assert!(old.join(Duration::from_secs(5)).await);
    h.dispatcher
        .dispatch(bean(1, 3, "").with_glue(GlueType::Groovy, source, 200))
        .await
        .unwrap();

    let records = recv_records(&mut h.rx, 2).await;
    assert!(records.iter().all(|r| r.handle_code == HandleCode::Success), "{records:?}");
}

#[tokio::test]
async fn glue_without_compiler_is_rejected() {
    let h = harness();
    let err = h
        .dispatcher
        .dispatch(bean(1, 1, "").with_glue(GlueType::Groovy, "class A {}", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Compile(CompileError::Unsupported)));
    assert!(h.registry.lookup_worker(JobId(1)).is_none());
}

#[tokio::test]
async fn unknown_glue_type_is_rejected() {
    let h = harness();
    let mut trigger = bean(1, 1, "ok");
    trigger.glue_type = "GLUE_COBOL".into();

    let err = h.dispatcher.dispatch(trigger).await.unwrap_err();

    assert_eq!(err.to_string(), "glueType[GLUE_COBOL] is not valid.");
    assert_eq!(err.code(), 500);
}

// ─── Stopping ───

#[tokio::test]
async fn kill_fails_running_and_every_queued_trigger() {
    let mut h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    assert!(wait_until(|| gate.started() == 1).await);
    for log in 2..=4 {
        h.dispatcher.dispatch(bean(1, log, "gate")).await.unwrap();
    }

    assert!(h.dispatcher.kill(JobId(1)).await);

    let mut records = recv_records(&mut h.rx, 4).await;
    records.sort_by_key(|r| r.log_id);
    assert_eq!(msg(&records[0]), format!("{KILL_REASON} [job running, killed]"));
    let queued = &records[1..];
    assert_eq!(queued.len(), 3);
    for record in queued {
        assert_eq!(record.handle_code, HandleCode::Fail);
        assert_eq!(
            msg(record),
            format!("{KILL_REASON} [job not executed, in the job queue, killed.]")
        );
    }
    assert_eq!(gate.completed(), 0);
    assert!(h.registry.lookup_worker(JobId(1)).is_none());
    assert!(wait_until(|| gate.destroys() == 1).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.rx.try_recv().is_err(), "no extra callbacks after drain");
}

#[tokio::test]
async fn kill_without_worker_reports_false() {
    let h = harness();
    assert!(!h.dispatcher.kill(JobId(99)).await);
}

#[tokio::test]
async fn idle_beat_tracks_busy_state() {
    let h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());
    assert!(h.dispatcher.idle_beat(JobId(1)));

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    assert!(wait_until(|| gate.started() == 1).await);
    assert!(!h.dispatcher.idle_beat(JobId(1)));

    gate.release(1);
    assert!(wait_until(|| h.dispatcher.idle_beat(JobId(1))).await);
}

#[tokio::test]
async fn idle_worker_is_evicted() {
    let config = WorkerConfig::new()
        .with_poll_interval(Duration::from_millis(10))
        .with_idle_limit(3);
    let mut h = harness_with(config, None);
    let gate = Arc::new(GateHandler::new());
    gate.release(1);
    h.registry.register_handler("gate", gate.clone());

    h.dispatcher.dispatch(bean(1, 1, "gate")).await.unwrap();
    recv_records(&mut h.rx, 1).await;

    assert!(wait_until(|| h.registry.lookup_worker(JobId(1)).is_none()).await);
    assert!(wait_until(|| gate.destroys() == 1).await);
    assert_eq!(gate.inits(), 1);

    // A later trigger simply starts a fresh worker.
    gate.release(1);
    h.dispatcher.dispatch(bean(1, 2, "gate")).await.unwrap();
    assert_eq!(recv_records(&mut h.rx, 1).await[0].handle_code, HandleCode::Success);
}

#[tokio::test]
async fn shutdown_drains_every_worker() {
    let mut h = harness();
    let gate = Arc::new(GateHandler::new());
    h.registry.register_handler("gate", gate.clone());

    for job in 1..=2 {
        h.dispatcher.dispatch(bean(job, job * 10, "gate")).await.unwrap();
        h.dispatcher.dispatch(bean(job, job * 10 + 1, "gate")).await.unwrap();
    }
    assert!(wait_until(|| gate.started() == 2).await);

    h.dispatcher.shutdown().await;

    let records = recv_records(&mut h.rx, 4).await;
    assert!(records.iter().all(|r| msg(r).starts_with(SHUTDOWN_REASON)));
    assert_eq!(h.registry.worker_count(), 0);
    assert!(h.registry.handler_names().is_empty());
    assert_eq!(gate.destroys(), 2);
}

// ─── Concurrency ───

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatch_keeps_one_worker_per_job() {
    let mut h = harness();
    h.registry.register_handler("ok", Arc::new(SuccessHandler::new("done")));

    let mut tasks = tokio::task::JoinSet::new();
    for log in 0..64 {
        let dispatcher = Arc::clone(&h.dispatcher);
        let strategy = if log % 2 == 0 { "SERIAL_EXECUTION" } else { "COVER_EARLY" };
        tasks.spawn(async move {
            dispatcher
                .dispatch(bean(1, log, "ok").with_block_strategy(strategy))
                .await
                .is_ok()
        });
    }

    let mut accepted = 0;
    while let Some(ok) = tasks.join_next().await {
        if ok.unwrap() {
            accepted += 1;
        }
        assert!(h.registry.worker_count() <= 1);
    }

    assert_eq!(accepted, 64);
    assert_eq!(h.registry.worker_count(), 1);

    // Every accepted trigger is reported exactly once.
    let records = recv_records(&mut h.rx, accepted).await;
    let mut ids: Vec<_> = records.iter().map(|r| r.log_id.0).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), accepted);
}
