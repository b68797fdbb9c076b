mod support;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dispatch_core::error::DispatchError;
use dispatch_core::model::{AmbulanceId, AssignmentState, RequestId};
use dispatch_core::notify::DispatchEvent;
use dispatch_core::registry::RejectReason;
use dispatch_core::test_helpers::test_config;
use support::entities::{AmbulanceBuilder, RequestBuilder};
use support::harness::{TestDispatch, TestDispatchBuilder};

fn single_unit_dispatch() -> TestDispatch {
    TestDispatchBuilder::new()
        .with_ambulance(AmbulanceBuilder::new(1).km_north(2.0).build())
        .build()
}

#[tokio::test(start_paused = true)]
async fn unanswered_broadcast_times_out_after_fifteen_seconds() {
    let mut h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::SearchingDrivers
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = h.coordinator.get_status(RequestId(1)).unwrap();
    assert_eq!(status.state, AssignmentState::TimeoutNoAcceptance);
    assert!(status.times.closed_at.is_some());
    // The candidate was never reserved, so it stays free.
    assert!(h.ambulance(1).available);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        DispatchEvent::StatusChanged {
            to: AssignmentState::TimeoutNoAcceptance,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn late_acceptance_reports_timeout() {
    let h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    tokio::time::sleep(Duration::from_secs(16)).await;

    let outcome = h.coordinator.accept_ride(AmbulanceId(1), RequestId(1)).unwrap();
    assert!(!outcome.accepted);
    assert_eq!(
        outcome.reason,
        Some(RejectReason::RequestClosed(
            AssignmentState::TimeoutNoAcceptance
        ))
    );
    assert_eq!(
        outcome.into_result(),
        Err(DispatchError::TimeoutNoAcceptance(RequestId(1)))
    );
    assert!(h.ambulance(1).available);
}

#[tokio::test(start_paused = true)]
async fn acceptance_inside_window_survives_the_timer() {
    let h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h
        .coordinator
        .accept_ride(AmbulanceId(1), RequestId(1))
        .unwrap()
        .accepted);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::DriverAccepted
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_is_not_expired_later() {
    let mut h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    h.coordinator.cancel_ride(RequestId(1)).unwrap();
    h.drain_events();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::Cancelled
    );
    assert!(h.drain_events().is_empty());
}

fn one_second_window_dispatch() -> TestDispatch {
    TestDispatchBuilder::new()
        .with_config(test_config().with_acceptance_window_secs(1))
        .with_ambulance(AmbulanceBuilder::new(1).km_north(2.0).build())
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_from_plain_thread_inside_runtime_times_out() {
    let h = one_second_window_dispatch();
    let coordinator = Arc::clone(&h.coordinator);
    thread::spawn(move || coordinator.request_ride(RequestBuilder::new(1).build()))
        .join()
        .expect("caller thread")
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::TimeoutNoAcceptance
    );
    assert_eq!(h.coordinator.live_assignments(), 0);
}

#[test]
fn request_without_ambient_runtime_times_out() {
    let mut h = one_second_window_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();

    thread::sleep(Duration::from_millis(1_500));
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::TimeoutNoAcceptance
    );
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        DispatchEvent::StatusChanged {
            to: AssignmentState::TimeoutNoAcceptance,
            ..
        }
    )));
}

#[test]
fn accept_past_deadline_expires_even_before_the_timer() {
    let mut h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    h.drain_events();
    h.clock.advance_secs(3600);

    let outcome = h.coordinator.accept_ride(AmbulanceId(1), RequestId(1)).unwrap();
    assert_eq!(
        outcome.into_result(),
        Err(DispatchError::TimeoutNoAcceptance(RequestId(1)))
    );
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::TimeoutNoAcceptance
    );
    assert_eq!(h.coordinator.live_assignments(), 0);
    assert!(h.ambulance(1).available);
    let closed = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, DispatchEvent::StatusChanged { .. }))
        .count();
    assert_eq!(closed, 1);
}

#[test]
fn supervisor_flags_overdue_rides_without_moving_them() {
    let mut h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    h.coordinator
        .accept_ride(AmbulanceId(1), RequestId(1))
        .unwrap();
    h.coordinator.generate_otp(RequestId(1)).unwrap();
    h.drain_events();

    let expected = h
        .coordinator
        .get_status(RequestId(1))
        .unwrap()
        .expected_arrival_ms
        .expect("expected arrival stamped on accept");
    let supervisor = h.coordinator.supervisor();

    h.clock.set_ms(expected + 10 * 60_000);
    assert!(supervisor.scan().unwrap().is_empty());

    h.clock.set_ms(expected + 11 * 60_000);
    let alerts = supervisor.scan().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].request_id, RequestId(1));
    assert_eq!(alerts[0].ambulance_id, Some(AmbulanceId(1)));
    assert_eq!(alerts[0].state, AssignmentState::OtpGenerated);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, DispatchEvent::OverdueAlert { .. })));
    assert_eq!(
        h.coordinator.get_status(RequestId(1)).unwrap().state,
        AssignmentState::OtpGenerated
    );
}

#[test]
fn started_rides_are_not_supervised() {
    let mut h = single_unit_dispatch();
    let c = h.coordinator.clone();
    c.request_ride(RequestBuilder::new(1).build()).unwrap();
    c.accept_ride(AmbulanceId(1), RequestId(1)).unwrap();
    c.generate_otp(RequestId(1)).unwrap();
    let code = TestDispatch::last_code(&h.drain_events(), RequestId(1)).unwrap();
    c.verify_otp(AmbulanceId(1), RequestId(1), &code).unwrap();

    h.clock.advance_secs(24 * 3600);
    assert!(h.coordinator.supervisor().scan().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn supervisor_loop_runs_through_the_coordinator() {
    let mut h = single_unit_dispatch();
    h.coordinator
        .request_ride(RequestBuilder::new(1).build())
        .unwrap();
    h.coordinator
        .accept_ride(AmbulanceId(1), RequestId(1))
        .unwrap();
    h.drain_events();
    h.clock.advance_secs(3600);

    let handle = h.coordinator.start_supervisor();
    tokio::time::sleep(Duration::from_secs(301)).await;
    let alerts = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, DispatchEvent::OverdueAlert { .. }))
        .count();
    assert_eq!(alerts, 1);
    handle.shutdown().await;
}
