//! End-to-end coverage of `faults` mode: detection, dedup, and graceful
//! enrichment fallback when the referenced pod is already gone.

mod support;

use std::time::Duration;

use kube_fault_stream::config::EngineConfig;
use kube_fault_stream::events::Notification;
use kube_fault_stream::filter::{SubscriptionFilters, SubscriptionMode};
use kube_fault_stream::manager::SubscriptionManager;

use support::*;

#[tokio::test]
async fn faults_mode_notifies_on_warning_pod_events_and_skips_enrichment_when_the_pod_is_gone() {
    let (client, handle) = mock_kube_client();
    let scenario = spawn_scenario(
        handle,
        vec![
            json_response(event_list_json("1")),
            lines_response(vec![watch_line(
                "ADDED",
                sample_event_json("ev-1", "default", "uid-1", "2", "BackOff", "Warning", "nginx-1"),
            )]),
            not_found_response(),
        ],
    );

    let sessions = FakeSessionRegistry::new();
    let session = sessions.register("session-1");
    let manager = SubscriptionManager::new(EngineConfig::default(), FakeClientGetter::new(client), sessions);

    manager
        .create("session-1", "cluster-a", SubscriptionMode::Faults, SubscriptionFilters::default())
        .await
        .unwrap();

    wait_for(|| !session.notifications().is_empty(), Duration::from_secs(2)).await;
    let notifications = session.notifications();
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        Notification::Faults(fault) => {
            assert_eq!(fault.event.reason, "BackOff");
            assert!(fault.logs.is_empty(), "a vanished pod must not fail enrichment, only skip it");
        }
        other => panic!("expected a faults notification, got {other:?}"),
    }

    manager.shutdown().await;
    scenario.abort();
}

#[tokio::test]
async fn faults_mode_suppresses_a_repeat_of_the_same_fault_within_the_dedup_window() {
    let (client, handle) = mock_kube_client();
    let scenario = spawn_scenario(
        handle,
        vec![
            json_response(event_list_json("1")),
            lines_response(vec![
                watch_line("ADDED", sample_event_json("ev-1", "default", "uid-1", "2", "BackOff", "Warning", "nginx-1")),
                watch_line("MODIFIED", sample_event_json("ev-1", "default", "uid-1", "3", "BackOff", "Warning", "nginx-1")),
            ]),
            not_found_response(),
        ],
    );

    let sessions = FakeSessionRegistry::new();
    let session = sessions.register("session-1");
    let manager = SubscriptionManager::new(EngineConfig::default(), FakeClientGetter::new(client), sessions);

    manager
        .create("session-1", "cluster-a", SubscriptionMode::Faults, SubscriptionFilters::default())
        .await
        .unwrap();

    wait_for(|| !session.notifications().is_empty(), Duration::from_secs(2)).await;
    // give the duplicate a moment to be (not) processed before asserting it was suppressed
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.notifications().len(), 1, "the repeat within the dedup window must be suppressed");

    manager.shutdown().await;
    scenario.abort();
}
