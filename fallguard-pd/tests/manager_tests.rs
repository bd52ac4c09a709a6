//! Pipeline manager lifecycle tests
//!
//! Run real capture and worker threads against looping fake sources.

mod helpers;

use fallguard_common::events::FallguardEvent;
use fallguard_pd::pipeline::PipelineSpec;
use fallguard_pd::store::EventStore;
use helpers::{group, harness, test_config, video_source, wait_until};
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_is_idempotent_per_source() {
    let h = harness(test_config()).await;
    let mut events = h.state.subscribe_events();

    assert!(h.manager.start(PipelineSpec::new(video_source(1, None), None)).unwrap());
    assert!(!h.manager.start(PipelineSpec::new(video_source(1, None), None)).unwrap());

    assert_eq!(h.manager.active_sources(), vec![1]);
    // The device is opened on the capture thread
    assert!(wait_until(Duration::from_secs(2), || h.backend.opens.load(Ordering::SeqCst) > 0).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.backend.opens.load(Ordering::SeqCst), 1);
    assert!(matches!(
        events.recv().await.unwrap(),
        FallguardEvent::PipelineStarted { source_id: 1, .. }
    ));

    h.manager.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_removes_pipeline() {
    let h = harness(test_config()).await;
    h.manager.start(PipelineSpec::new(video_source(1, None), None)).unwrap();
    h.manager.start(PipelineSpec::new(video_source(2, None), None)).unwrap();
    assert_eq!(h.manager.active_sources(), vec![1, 2]);

    let worker = h.manager.get(1).unwrap();
    assert!(h.manager.stop(1).await);
    assert!(!worker.is_running());
    assert!(!h.manager.stop(1).await);
    assert_eq!(h.manager.active_sources(), vec![2]);

    // A stopped source can be started again with a fresh worker
    assert!(h.manager.start(PipelineSpec::new(video_source(1, None), None)).unwrap());
    assert_eq!(h.manager.active_sources(), vec![1, 2]);

    h.manager.stop_all().await;
    assert!(h.manager.active_sources().is_empty());
    assert!(h.manager.get(2).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_model_shared_across_pipelines() {
    let h = harness(test_config()).await;
    for id in 1..=3 {
        h.manager.start(PipelineSpec::new(video_source(id, None), None)).unwrap();
    }

    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.models().loaded(), vec!["yolov8n-pose".to_string()]);

    let mut spec = PipelineSpec::new(video_source(4, None), None);
    spec.model_id = Some("rtmpose-m".to_string());
    h.manager.start(spec).unwrap();
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 2);

    h.manager.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_poller_per_bot_token() {
    let h = harness(test_config()).await;
    let family = group(1, "111:family", "-100");
    let nurses = group(2, "222:nurses", "-200");

    h.manager
        .start(PipelineSpec::new(video_source(1, Some(1)), Some(family.clone())))
        .unwrap();
    h.manager
        .start(PipelineSpec::new(video_source(2, Some(1)), Some(family)))
        .unwrap();
    assert_eq!(h.manager.poller_count(), 1);

    h.manager
        .start(PipelineSpec::new(video_source(3, Some(2)), Some(nurses)))
        .unwrap();
    assert_eq!(h.manager.poller_count(), 2);
    assert_eq!(h.factory.created.load(Ordering::SeqCst), 3);

    let notifier = h.factory.notifier("111:family").unwrap();
    assert!(wait_until(Duration::from_secs(2), || notifier.polls.load(Ordering::SeqCst) > 0).await);

    h.manager.stop_all().await;
    assert_eq!(h.manager.poller_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_night_mode_toggle() {
    let h = harness(test_config()).await;
    h.manager.start(PipelineSpec::new(video_source(1, None), None)).unwrap();

    h.manager.set_night_mode(1, true).unwrap();
    assert!(h.manager.get(1).unwrap().night_mode());
    assert!(h.manager.set_night_mode(7, true).is_err());

    h.manager.stop_all().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipelines_without_credentials_still_record_falls() {
    let h = harness(test_config()).await;
    h.manager.start(PipelineSpec::new(video_source(5, None), None)).unwrap();
    assert_eq!(h.manager.poller_count(), 0);

    let store = h.store.clone();
    let mut recorded = Vec::new();
    for _ in 0..150 {
        recorded = store.recent_events(10).await.unwrap();
        if !recorded.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].source_id, 5);
    assert!(recorded[0].message_ref.is_none());
    let snapshot = recorded[0].snapshot_path.as_deref().unwrap();
    assert!(std::path::Path::new(snapshot).starts_with(&h.snapshot_dir));

    h.manager.stop_all().await;
}
