mod common;

use std::time::Duration;

use common::{harness, harness_with, workload};
use registrator_core::models::{RegistratorConfig, WorkloadEvent};
use registrator_core::services::EventDispatcher;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn start_event_registers_services() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80]));
    let dispatcher = EventDispatcher::new(h.sync.clone());

    let tally = dispatcher.handle(WorkloadEvent::new("start", "c1")).await;

    assert_eq!(tally.succeeded, 1);
    assert_eq!(h.registry.ids(), vec!["c1:c1:80:tcp", "consul"]);
}

#[tokio::test]
async fn repeated_start_is_idempotent() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80]));
    let dispatcher = EventDispatcher::new(h.sync.clone());

    dispatcher.handle(WorkloadEvent::new("start", "c1")).await;
    let first = h.registry.get("c1:c1:80:tcp");
    dispatcher.handle(WorkloadEvent::new("unpause", "c1")).await;

    assert_eq!(h.registry.ids(), vec!["c1:c1:80:tcp", "consul"]);
    assert_eq!(h.registry.get("c1:c1:80:tcp"), first);
}

#[tokio::test]
async fn die_event_deregisters_stopped_workload() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80, 443]));
    let dispatcher = EventDispatcher::new(h.sync.clone());
    dispatcher.handle(WorkloadEvent::new("start", "c1")).await;

    h.source.stop("c1");
    let tally = dispatcher.handle(WorkloadEvent::new("die", "c1")).await;

    assert_eq!(tally.succeeded, 2);
    assert_eq!(h.registry.ids(), vec!["consul"]);
}

#[tokio::test]
async fn pause_event_deregisters() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80]));
    let dispatcher = EventDispatcher::new(h.sync.clone());
    dispatcher.handle(WorkloadEvent::new("start", "c1")).await;

    h.source.stop("c1");
    dispatcher.handle(WorkloadEvent::new("pause", "c1")).await;

    assert_eq!(h.registry.ids(), vec!["consul"]);
}

#[tokio::test]
async fn removed_workload_falls_back_to_registry_prefix() {
    let h = harness();
    h.registry.seed("c1:c1:80:tcp");
    h.registry.seed("c1:admin:9000:tcp");
    h.registry.seed("c10:c10:80:tcp");
    let dispatcher = EventDispatcher::new(h.sync.clone());

    let tally = dispatcher.handle(WorkloadEvent::new("die", "c1")).await;

    assert_eq!(tally.succeeded, 2);
    assert_eq!(h.registry.ids(), vec!["c10:c10:80:tcp", "consul"]);
}

#[tokio::test]
async fn health_status_leaves_registry_alone() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80]));
    let dispatcher = EventDispatcher::new(h.sync.clone());

    let tally = dispatcher
        .handle(WorkloadEvent::new("health_status: unhealthy", "c1"))
        .await;

    assert_eq!(tally.succeeded + tally.failed, 0);
    assert_eq!(h.registry.ids(), vec!["consul"]);
    assert_eq!(h.registry.registrations(), 0);
}

#[tokio::test]
async fn unrelated_events_are_ignored() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80]));
    let dispatcher = EventDispatcher::new(h.sync.clone());

    for status in ["create", "destroy", "exec_start: sh"] {
        dispatcher.handle(WorkloadEvent::new(status, "c1")).await;
    }

    assert_eq!(h.registry.ids(), vec!["consul"]);
}

#[tokio::test(start_paused = true)]
async fn dispatcher_reconnects_after_stream_ends() {
    let h = harness();
    h.source.put(workload("c1", "/c1", &[80]));
    h.source.put(workload("c2", "/c2", &[80]));
    h.source.queue_stream(vec![WorkloadEvent::new("start", "c1")]);
    h.source.queue_stream(vec![WorkloadEvent::new("start", "c2")]);

    let dispatcher = EventDispatcher::new(h.sync.clone());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    for _ in 0..100 {
        if h.registry.ids().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(
        h.registry.ids(),
        vec!["c1:c1:80:tcp", "c2:c2:80:tcp", "consul"]
    );
    assert!(h.source.opens() >= 2);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn closed_stream_never_deregisters() {
    let h = harness();
    h.registry.seed("c1:c1:80:tcp");
    h.source.queue_stream(Vec::new());

    let dispatcher = EventDispatcher::new(h.sync.clone());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    task.await.unwrap();

    assert!(h.source.opens() >= 2);
    assert_eq!(h.registry.ids(), vec!["c1:c1:80:tcp", "consul"]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_delay_grows_while_streams_close_at_once() {
    let h = harness();
    for _ in 0..1000 {
        h.source.queue_stream(Vec::new());
    }

    let dispatcher = EventDispatcher::new(h.sync.clone());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(120)).await;
    cancel.cancel();
    task.await.unwrap();

    // Opens at 0, 1, 3, 7, 15, 31 and 63 seconds.
    assert_eq!(h.source.opens(), 7);
}

#[tokio::test(start_paused = true)]
async fn shutdown_does_not_wait_for_busy_handlers() {
    let mut config = RegistratorConfig::new("127.0.0.1:8500");
    config.max_concurrency = 1;
    config.call_timeout_seconds = 300;
    let h = harness_with(config);
    h.source.hang_inspection("h1");
    h.source.hang_inspection("h2");
    h.source.queue_stream(vec![
        WorkloadEvent::new("start", "h1"),
        WorkloadEvent::new("start", "h2"),
    ]);

    let dispatcher = EventDispatcher::new(h.sync.clone());
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("dispatcher kept running after cancellation")
        .unwrap();
}
