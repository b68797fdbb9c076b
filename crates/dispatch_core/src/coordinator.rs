//! Caller-facing dispatch operations.
//!
//! `DispatchCoordinator` wires the fleet, candidate search, registry, arbiter, OTP store,
//! and supervisor together and exposes one method per operation. Every guard violation
//! comes back as a typed [`DispatchError`]; losing an acceptance race is an ordinary
//! [`AcceptOutcome`], not an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::broadcast::BroadcastArbiter;
use crate::clock::{Clock, SystemClock};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::matching::{CandidateFinder, CandidateScorer, ScoringEngine, SearchMode};
use crate::model::{
    AmbulanceId, Assignment, AssignmentState, DispatchFlow, EmergencyRequest, OtpReference,
    RequestId,
};
use crate::notify::{deliver, DispatchEvent, NoopNotifier, NotificationPort};
use crate::otp::{OtpController, OtpIssue};
use crate::pricing::{estimate_dispatch_fare, estimate_fare, FareBreakdown};
use crate::registry::{AssignmentRegistry, ClaimOutcome, RejectReason};
use crate::spatial::GeoIndex;
use crate::supervisor::{SupervisorHandle, TimeoutSupervisor};

/// Answer to `request_ride`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequestReceipt {
    pub request_id: RequestId,
    pub status: AssignmentState,
    pub candidate_count: usize,
    pub fare_estimate: FareBreakdown,
}

/// Answer to `dispatch_nearest`: the ride is already bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub request_id: RequestId,
    pub status: AssignmentState,
    pub candidate_count: usize,
    pub fare_estimate: FareBreakdown,
    pub ambulance_id: AmbulanceId,
    pub expected_arrival_ms: Option<u64>,
}

/// Answer to `accept_ride`. Always carries a reason when not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptOutcome {
    pub request_id: RequestId,
    pub ambulance_id: AmbulanceId,
    pub accepted: bool,
    pub reason: Option<RejectReason>,
}

impl AcceptOutcome {
    fn from_claim(request_id: RequestId, ambulance_id: AmbulanceId, claim: &ClaimOutcome) -> Self {
        let reason = claim.reason();
        Self {
            request_id,
            ambulance_id,
            accepted: reason.is_none(),
            reason,
        }
    }

    /// Error view for callers that treat a lost acceptance as a failure.
    ///
    /// The winner re-sending its acceptance maps to `Ok`.
    pub fn into_result(self) -> DispatchResult<()> {
        let Some(reason) = self.reason else {
            return Ok(());
        };
        Err(match reason {
            RejectReason::AlreadyAcceptedByYou => return Ok(()),
            RejectReason::RideAlreadyAssigned => DispatchError::RaceLost(self.request_id),
            RejectReason::NotACandidate => DispatchError::NotBoundDriver {
                request_id: self.request_id,
                ambulance_id: self.ambulance_id,
            },
            RejectReason::RequestClosed(AssignmentState::TimeoutNoAcceptance) => {
                DispatchError::TimeoutNoAcceptance(self.request_id)
            }
            RejectReason::RequestClosed(state) => DispatchError::InvalidState {
                request_id: self.request_id,
                operation: "accept",
                state,
            },
            RejectReason::AmbulanceUnavailable => {
                DispatchError::AmbulanceUnavailable(self.ambulance_id)
            }
            RejectReason::UnknownRequest => DispatchError::UnknownRequest(self.request_id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpReceipt {
    pub request_id: RequestId,
    pub otp_sent: bool,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReceipt {
    pub request_id: RequestId,
    pub verified: bool,
    pub status: AssignmentState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionReceipt {
    pub request_id: RequestId,
    pub completed: bool,
    pub fare_paid: f64,
    pub payment_confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReceipt {
    pub request_id: RequestId,
    pub cancelled: bool,
    pub previous_state: AssignmentState,
    pub released: Option<AmbulanceId>,
}

/// Builder for [`DispatchCoordinator`]; defaults to the wall clock, a no-op notifier, and
/// the weighted scoring engine.
///
/// Acceptance timers need a tokio runtime. Pass one with [`runtime`](Self::runtime) or call
/// [`build`](Self::build) from inside one; the coordinator keeps that handle and may then be
/// driven from any thread.
pub struct CoordinatorBuilder {
    config: DispatchConfig,
    runtime: Option<Handle>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationPort>,
    scorer: Box<dyn CandidateScorer>,
    fleet: Option<Arc<GeoIndex>>,
}

impl CoordinatorBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationPort>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn scorer(mut self, scorer: Box<dyn CandidateScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Runtime that acceptance timers and the supervisor loop are spawned on.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Share an existing fleet store instead of starting empty.
    pub fn fleet(mut self, fleet: Arc<GeoIndex>) -> Self {
        self.fleet = Some(fleet);
        self
    }

    pub fn build(self) -> DispatchResult<DispatchCoordinator> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                DispatchError::Config(
                    "no tokio runtime: build inside one or pass a handle via runtime()".into(),
                )
            })?,
        };
        let config = self.config;
        let fleet = self.fleet.unwrap_or_default();
        let registry = Arc::new(AssignmentRegistry::new(config.archive_capacity));
        let finder =
            CandidateFinder::with_scorer(Arc::clone(&fleet), config.matching, self.scorer);
        let arbiter = BroadcastArbiter::new(
            runtime.clone(),
            Arc::clone(&registry),
            Arc::clone(&fleet),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            config.timeouts.acceptance_window(),
            config.timeouts.avg_response_speed_kmh,
        );
        let supervisor = Arc::new(TimeoutSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&self.notifier),
            Arc::clone(&self.clock),
            &config.timeouts,
        ));
        Ok(DispatchCoordinator {
            otp: OtpController::from_config(&config),
            config,
            runtime,
            clock: self.clock,
            notifier: self.notifier,
            fleet,
            finder,
            registry,
            arbiter,
            supervisor,
        })
    }
}

/// Entry point for every dispatch operation. Safe to share across threads.
pub struct DispatchCoordinator {
    config: DispatchConfig,
    runtime: Handle,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationPort>,
    fleet: Arc<GeoIndex>,
    finder: CandidateFinder,
    registry: Arc<AssignmentRegistry>,
    arbiter: BroadcastArbiter,
    otp: OtpController,
    supervisor: Arc<TimeoutSupervisor>,
}

impl DispatchCoordinator {
    pub fn builder(config: DispatchConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            runtime: None,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(NoopNotifier),
            scorer: Box::new(ScoringEngine::new()),
            fleet: None,
        }
    }

    pub fn new(config: DispatchConfig) -> DispatchResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The fleet store: registration, location feed, deactivation.
    pub fn fleet(&self) -> &Arc<GeoIndex> {
        &self.fleet
    }

    pub fn supervisor(&self) -> &Arc<TimeoutSupervisor> {
        &self.supervisor
    }

    /// Start the overdue scan on the coordinator's runtime.
    pub fn start_supervisor(&self) -> SupervisorHandle {
        Arc::clone(&self.supervisor).spawn_on(&self.runtime)
    }

    fn announce(&self, request_id: RequestId, from: Option<AssignmentState>, to: AssignmentState) {
        deliver(
            self.notifier.as_ref(),
            DispatchEvent::status_changed(request_id, from, to, self.clock.now_ms()),
        );
    }

    fn intake(&self, mut request: EmergencyRequest) -> DispatchResult<EmergencyRequest> {
        request.pickup = request.pickup.validate()?;
        let now_ms = self.clock.now_ms();
        request.created_at_ms = now_ms;
        request.expires_at_ms = now_ms + self.config.timeouts.acceptance_window().as_millis() as u64;
        Ok(request)
    }

    /// Open an assignment and, when anyone is in range, broadcast it to the shortlist.
    ///
    /// With nobody in range the assignment is stored as `no_drivers_available` and the call
    /// fails with `NoCandidatesFound`; no offer goes out.
    pub fn request_ride(&self, request: EmergencyRequest) -> DispatchResult<RideRequestReceipt> {
        let request = self.intake(request)?;
        let candidates = self.finder.find_candidates(&request, SearchMode::Broadcast)?;
        let fare_estimate = estimate_fare(&self.config.pricing, request.ride_type);
        let assignment =
            Assignment::open(request, candidates, fare_estimate, self.clock.now_ms());
        let request_id = assignment.id;
        self.registry.insert(assignment.clone())?;
        self.announce(request_id, None, assignment.state);

        if assignment.state == AssignmentState::NoDriversAvailable {
            info!(request_id = %request_id, "no ambulances in range");
            return Err(DispatchError::NoCandidatesFound(request_id));
        }
        info!(
            request_id = %request_id,
            priority = ?assignment.request.priority,
            candidates = assignment.candidates.len(),
            fare = fare_estimate.total,
            "ride requested"
        );
        self.arbiter.broadcast(&assignment);
        Ok(RideRequestReceipt {
            request_id,
            status: assignment.state,
            candidate_count: assignment.candidates.len(),
            fare_estimate,
        })
    }

    /// A driver accepts a broadcast. Losers get `accepted: false` and a reason.
    pub fn accept_ride(
        &self,
        ambulance_id: AmbulanceId,
        request_id: RequestId,
    ) -> DispatchResult<AcceptOutcome> {
        let claim = self.arbiter.accept(request_id, ambulance_id)?;
        Ok(AcceptOutcome::from_claim(request_id, ambulance_id, &claim))
    }

    /// Operator override: bind any dispatchable ambulance to a request still searching.
    pub fn manual_assign(
        &self,
        request_id: RequestId,
        ambulance_id: AmbulanceId,
    ) -> DispatchResult<Assignment> {
        let claim = self.arbiter.assign(request_id, ambulance_id)?;
        let outcome = AcceptOutcome::from_claim(request_id, ambulance_id, &claim);
        match claim {
            ClaimOutcome::Won(assignment) => {
                info!(request_id = %request_id, ambulance_id = %ambulance_id, "manual assignment");
                Ok(assignment)
            }
            ClaimOutcome::Rejected(_) | ClaimOutcome::Expired => outcome
                .into_result()
                .and_then(|()| self.registry.snapshot(request_id)),
        }
    }

    /// Batch variant: search the wide radius and bind the best ambulance directly.
    ///
    /// Walks down the ranked list when a candidate is taken concurrently; if none can be
    /// bound the assignment ends in `no_drivers_available`.
    pub fn dispatch_nearest(&self, request: EmergencyRequest) -> DispatchResult<DispatchReceipt> {
        let request = self.intake(request)?;
        let ride_type = request.ride_type;
        let candidates = self.finder.find_candidates(&request, SearchMode::Batch)?;
        let base_fare = estimate_fare(&self.config.pricing, ride_type);
        let assignment = Assignment::open(request, candidates, base_fare, self.clock.now_ms())
            .with_flow(DispatchFlow::Batch);
        let request_id = assignment.id;
        let candidate_count = assignment.candidates.len();
        self.registry.insert(assignment.clone())?;
        self.announce(request_id, None, assignment.state);

        for candidate in &assignment.candidates {
            match self.arbiter.assign(request_id, candidate.ambulance_id)? {
                ClaimOutcome::Won(_) => {
                    let fare_estimate = estimate_dispatch_fare(
                        &self.config.pricing,
                        ride_type,
                        candidate.distance_km,
                        candidate.tier,
                    );
                    let bound = self.registry.with_assignment(request_id, |a| {
                        a.fare_estimate = fare_estimate;
                        Ok(a.clone())
                    })?;
                    info!(
                        request_id = %request_id,
                        ambulance_id = %candidate.ambulance_id,
                        score = candidate.score,
                        fare = fare_estimate.total,
                        "nearest ambulance dispatched"
                    );
                    return Ok(DispatchReceipt {
                        request_id,
                        status: bound.state,
                        candidate_count,
                        fare_estimate,
                        ambulance_id: candidate.ambulance_id,
                        expected_arrival_ms: bound.expected_arrival_ms,
                    });
                }
                ClaimOutcome::Rejected(RejectReason::AmbulanceUnavailable) => {
                    warn!(
                        request_id = %request_id,
                        ambulance_id = %candidate.ambulance_id,
                        "candidate taken concurrently; trying next"
                    );
                }
                rejected => {
                    AcceptOutcome::from_claim(request_id, candidate.ambulance_id, &rejected)
                        .into_result()?;
                    return Err(DispatchError::InvalidState {
                        request_id,
                        operation: "dispatch",
                        state: self.registry.snapshot(request_id)?.state,
                    });
                }
            }
        }

        if assignment.state == AssignmentState::SearchingDrivers {
            let closed = self.registry.with_assignment(request_id, |a| {
                a.advance(AssignmentState::NoDriversAvailable, "dispatch", self.clock.now_ms())
            });
            if let Ok(previous) = closed {
                self.announce(request_id, Some(previous), AssignmentState::NoDriversAvailable);
            }
        }
        info!(request_id = %request_id, "no ambulances could be dispatched");
        Err(DispatchError::NoCandidatesFound(request_id))
    }

    /// Mint the pickup code. Only from `driver_accepted`.
    pub fn generate_otp(&self, request_id: RequestId) -> DispatchResult<OtpReceipt> {
        let now_ms = self.clock.now_ms();
        let (issue, contact) = self.registry.with_assignment(request_id, |a| {
            if a.state != AssignmentState::DriverAccepted {
                return Err(a.invalid("generate_otp"));
            }
            let issue = self.otp.issue(request_id, now_ms)?;
            a.advance(AssignmentState::OtpGenerated, "generate_otp", now_ms)?;
            a.otp = Some(OtpReference {
                generated_at_ms: issue.generated_at_ms,
                expires_at_ms: issue.expires_at_ms,
                verified: false,
            });
            Ok((issue, a.request.customer_contact.clone()))
        })?;
        info!(request_id = %request_id, expires_at_ms = issue.expires_at_ms, "otp generated");
        let otp_sent = self.send_otp(request_id, contact, &issue);
        self.announce(
            request_id,
            Some(AssignmentState::DriverAccepted),
            AssignmentState::OtpGenerated,
        );
        Ok(OtpReceipt {
            request_id,
            otp_sent,
            expires_at_ms: issue.expires_at_ms,
        })
    }

    /// Replace an expired or exhausted code. Only from `otp_generated`.
    pub fn resend_otp(&self, request_id: RequestId) -> DispatchResult<OtpReceipt> {
        let now_ms = self.clock.now_ms();
        let (issue, contact) = self.registry.with_assignment(request_id, |a| {
            if a.state != AssignmentState::OtpGenerated {
                return Err(a.invalid("resend_otp"));
            }
            if !self.otp.can_resend(request_id, now_ms)? {
                return Err(a.invalid("resend_otp"));
            }
            let issue = self.otp.issue(request_id, now_ms)?;
            a.otp = Some(OtpReference {
                generated_at_ms: issue.generated_at_ms,
                expires_at_ms: issue.expires_at_ms,
                verified: false,
            });
            Ok((issue, a.request.customer_contact.clone()))
        })?;
        info!(request_id = %request_id, expires_at_ms = issue.expires_at_ms, "otp reissued");
        let otp_sent = self.send_otp(request_id, contact, &issue);
        Ok(OtpReceipt {
            request_id,
            otp_sent,
            expires_at_ms: issue.expires_at_ms,
        })
    }

    fn send_otp(&self, request_id: RequestId, contact: String, issue: &OtpIssue) -> bool {
        deliver(
            self.notifier.as_ref(),
            DispatchEvent::OtpIssued {
                request_id,
                customer_contact: contact,
                code: issue.code.clone(),
                expires_at_ms: issue.expires_at_ms,
            },
        )
    }

    /// The bound driver submits the customer's code; success starts the ride.
    pub fn verify_otp(
        &self,
        ambulance_id: AmbulanceId,
        request_id: RequestId,
        code: &str,
    ) -> DispatchResult<VerifyReceipt> {
        let now_ms = self.clock.now_ms();
        self.registry.with_assignment(request_id, |a| {
            if a.state != AssignmentState::OtpGenerated {
                return Err(a.invalid("verify_otp"));
            }
            if a.ambulance != Some(ambulance_id) {
                return Err(DispatchError::NotBoundDriver {
                    request_id,
                    ambulance_id,
                });
            }
            self.otp.verify(request_id, code, now_ms)?;
            a.advance(AssignmentState::OtpVerified, "verify_otp", now_ms)?;
            if let Some(otp) = a.otp.as_mut() {
                otp.verified = true;
            }
            Ok(())
        })?;
        info!(request_id = %request_id, ambulance_id = %ambulance_id, "otp verified; ride started");
        self.announce(
            request_id,
            Some(AssignmentState::OtpGenerated),
            AssignmentState::OtpVerified,
        );
        Ok(VerifyReceipt {
            request_id,
            verified: true,
            status: AssignmentState::OtpVerified,
        })
    }

    /// Close a started ride and free the ambulance. `fare_paid` defaults to the estimate.
    pub fn complete_ride(
        &self,
        request_id: RequestId,
        payment_confirmed: bool,
        fare_paid: Option<f64>,
    ) -> DispatchResult<CompletionReceipt> {
        let now_ms = self.clock.now_ms();
        let fare = self.registry.with_assignment(request_id, |a| {
            a.advance(AssignmentState::Completed, "complete", now_ms)?;
            let fare = fare_paid.unwrap_or(a.fare_estimate.total);
            a.fare_paid = Some(fare);
            a.payment_confirmed = payment_confirmed;
            if let Some(ambulance_id) = a.ambulance {
                self.fleet.release(ambulance_id, request_id)?;
            }
            Ok(fare)
        })?;
        self.otp.revoke(request_id);
        info!(request_id = %request_id, fare_paid = fare, payment_confirmed, "ride completed");
        self.announce(
            request_id,
            Some(AssignmentState::OtpVerified),
            AssignmentState::Completed,
        );
        Ok(CompletionReceipt {
            request_id,
            completed: true,
            fare_paid: fare,
            payment_confirmed,
        })
    }

    /// Cancel from any live state; frees the ambulance and stops the acceptance timer.
    pub fn cancel_ride(&self, request_id: RequestId) -> DispatchResult<CancelReceipt> {
        let now_ms = self.clock.now_ms();
        let (previous_state, released) = self.registry.with_assignment(request_id, |a| {
            let previous = a.advance(AssignmentState::Cancelled, "cancel", now_ms)?;
            let released = match a.ambulance {
                Some(ambulance_id) if self.fleet.release(ambulance_id, request_id)? => {
                    Some(ambulance_id)
                }
                _ => None,
            };
            Ok((previous, released))
        })?;
        self.arbiter.disarm(request_id);
        self.otp.revoke(request_id);
        info!(
            request_id = %request_id,
            previous = %previous_state,
            released = ?released,
            "ride cancelled"
        );
        self.announce(request_id, Some(previous_state), AssignmentState::Cancelled);
        Ok(CancelReceipt {
            request_id,
            cancelled: true,
            previous_state,
            released,
        })
    }

    /// Snapshot of the assignment, live or archived.
    pub fn get_status(&self, request_id: RequestId) -> DispatchResult<Assignment> {
        self.registry.snapshot(request_id)
    }

    /// Live (non-terminal) assignments currently held.
    pub fn live_assignments(&self) -> usize {
        self.registry.live_len()
    }
}
