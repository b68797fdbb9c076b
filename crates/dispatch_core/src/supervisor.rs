//! Periodic overdue scan.
//!
//! The supervisor only reads snapshots and raises alerts; it never moves an assignment.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::TimeoutConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::model::{AmbulanceId, AssignmentState, RequestId};
use crate::notify::{deliver, DispatchEvent, NotificationPort};
use crate::registry::AssignmentRegistry;

/// States in which an ambulance is still on its way to the patient.
pub const WATCHED_STATES: [AssignmentState; 2] =
    [AssignmentState::DriverAccepted, AssignmentState::OtpGenerated];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueAlert {
    pub request_id: RequestId,
    pub ambulance_id: Option<AmbulanceId>,
    pub state: AssignmentState,
    pub expected_arrival_ms: u64,
    pub overdue_by_ms: u64,
}

impl From<OverdueAlert> for DispatchEvent {
    fn from(alert: OverdueAlert) -> Self {
        DispatchEvent::OverdueAlert {
            request_id: alert.request_id,
            ambulance_id: alert.ambulance_id,
            state: alert.state,
            expected_arrival_ms: alert.expected_arrival_ms,
            overdue_by_ms: alert.overdue_by_ms,
        }
    }
}

pub struct TimeoutSupervisor {
    registry: Arc<AssignmentRegistry>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    grace_ms: u64,
}

impl TimeoutSupervisor {
    pub fn new(
        registry: Arc<AssignmentRegistry>,
        notifier: Arc<dyn NotificationPort>,
        clock: Arc<dyn Clock>,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            registry,
            notifier,
            clock,
            interval: timeouts.supervisor_interval(),
            grace_ms: timeouts.overdue_grace_ms(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass: every watched assignment more than the grace period past its expected
    /// arrival yields an alert, which is also published.
    pub fn scan(&self) -> DispatchResult<Vec<OverdueAlert>> {
        let now_ms = self.clock.now_ms();
        let watched = self.registry.snapshots_in(&WATCHED_STATES)?;
        let alerts: Vec<OverdueAlert> = watched
            .iter()
            .filter_map(|a| {
                let expected = a.expected_arrival_ms?;
                let overdue_by_ms = now_ms.checked_sub(expected)?;
                (overdue_by_ms > self.grace_ms).then_some(OverdueAlert {
                    request_id: a.id,
                    ambulance_id: a.ambulance,
                    state: a.state,
                    expected_arrival_ms: expected,
                    overdue_by_ms,
                })
            })
            .collect();
        for alert in &alerts {
            warn!(
                request_id = %alert.request_id,
                ambulance_id = ?alert.ambulance_id,
                state = %alert.state,
                overdue_by_ms = alert.overdue_by_ms,
                "assignment overdue"
            );
            deliver(self.notifier.as_ref(), (*alert).into());
        }
        debug!(watched = watched.len(), overdue = alerts.len(), "supervisor scan");
        Ok(alerts)
    }

    /// Run [`scan`](Self::scan) every interval on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> DispatchResult<SupervisorHandle> {
        let runtime = Handle::try_current()
            .map_err(|_| DispatchError::Config("supervisor requires a tokio runtime".into()))?;
        Ok(self.spawn_on(&runtime))
    }

    /// Run [`scan`](Self::scan) every interval on `runtime`.
    ///
    /// The first scan happens one full interval after spawning.
    pub fn spawn_on(self: Arc<Self>, runtime: &Handle) -> SupervisorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = self.interval;
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "timeout supervisor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.scan() {
                            error!(error = %err, "supervisor scan failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("timeout supervisor stopped");
        });
        SupervisorHandle { shutdown, task }
    }
}

/// Owner of a running supervisor loop.
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Ask the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                error!(error = %err, "supervisor task panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, ONE_MIN_MS};
    use crate::matching::RankedCandidate;
    use crate::model::{Assignment, EquipmentTier};
    use crate::notify::ChannelNotifier;
    use crate::pricing::FareBreakdown;
    use crate::registry::ClaimMode;
    use crate::spatial::GeoIndex;
    use crate::test_helpers::{connaught_place, point_north_of, test_ambulance, test_request};

    const SPEED: f64 = 40.0;

    fn accepted_registry(clock: &ManualClock) -> Arc<AssignmentRegistry> {
        let fleet = GeoIndex::new();
        fleet
            .register(test_ambulance(1, point_north_of(connaught_place(), 2.0)))
            .unwrap();
        let registry = Arc::new(AssignmentRegistry::new(8));
        let candidate = RankedCandidate {
            ambulance_id: AmbulanceId(1),
            tier: EquipmentTier::Advanced,
            distance_km: 2.0,
            score: 85,
        };
        registry
            .insert(Assignment::open(
                test_request(1),
                vec![candidate],
                FareBreakdown::default(),
                clock.now_ms(),
            ))
            .unwrap();
        registry
            .claim(
                RequestId(1),
                AmbulanceId(1),
                &fleet,
                ClaimMode::Broadcast,
                clock.now_ms(),
                SPEED,
            )
            .unwrap();
        registry
    }

    #[test]
    fn alerts_only_past_grace_and_never_transitions() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = accepted_registry(&clock);
        let (notifier, mut events) = ChannelNotifier::new();
        let supervisor = TimeoutSupervisor::new(
            Arc::clone(&registry),
            Arc::new(notifier),
            clock.clone(),
            &TimeoutConfig::default(),
        );
        // 2 km at 40 km/h: expected after 3 minutes.
        let expected = registry
            .snapshot(RequestId(1))
            .unwrap()
            .expected_arrival_ms
            .unwrap();
        assert_eq!(expected, 3 * ONE_MIN_MS);
        let grace = TimeoutConfig::default().overdue_grace_ms();

        clock.set_ms(expected + grace);
        assert!(supervisor.scan().unwrap().is_empty());

        clock.set_ms(expected + grace + 1);
        let alerts = supervisor.scan().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].overdue_by_ms, grace + 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            DispatchEvent::OverdueAlert { request_id: RequestId(1), .. }
        ));
        assert_eq!(
            registry.snapshot(RequestId(1)).unwrap().state,
            AssignmentState::DriverAccepted
        );
    }

    #[test]
    fn searching_assignments_are_not_watched() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(AssignmentRegistry::new(8));
        let candidate = RankedCandidate {
            ambulance_id: AmbulanceId(1),
            tier: EquipmentTier::Advanced,
            distance_km: 2.0,
            score: 85,
        };
        registry
            .insert(Assignment::open(test_request(1), vec![candidate], FareBreakdown::default(), 0))
            .unwrap();
        let supervisor = TimeoutSupervisor::new(
            registry,
            Arc::new(crate::notify::NoopNotifier),
            clock.clone(),
            &TimeoutConfig::default(),
        );
        clock.set_ms(60 * ONE_MIN_MS);
        assert!(supervisor.scan().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_scans_on_interval_until_shutdown() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = accepted_registry(&clock);
        clock.set_ms(60 * ONE_MIN_MS);
        let (notifier, mut events) = ChannelNotifier::new();
        let supervisor = Arc::new(TimeoutSupervisor::new(
            registry,
            Arc::new(notifier),
            clock.clone(),
            &TimeoutConfig::default(),
        ));
        let handle = Arc::clone(&supervisor).spawn().unwrap();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(events.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            events.try_recv().unwrap(),
            DispatchEvent::OverdueAlert { .. }
        ));

        handle.shutdown().await;
    }

    #[test]
    fn spawn_outside_runtime_is_an_error() {
        let supervisor = Arc::new(TimeoutSupervisor::new(
            Arc::new(AssignmentRegistry::new(1)),
            Arc::new(crate::notify::NoopNotifier),
            Arc::new(ManualClock::new(0)),
            &TimeoutConfig::default(),
        ));
        assert!(matches!(
            supervisor.spawn(),
            Err(DispatchError::Config(_))
        ));
    }
}
