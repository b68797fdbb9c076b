//! Assignment store with per-request serialization.
//!
//! Every live assignment sits behind its own mutex, so transitions for one request are
//! linearizable while different requests proceed in parallel. Terminal assignments move
//! into a bounded LRU archive and stay readable for status queries.
//!
//! Lock order: assignment mutex, then the live table, then the archive. The fleet lock is
//! only ever taken while holding an assignment mutex, never the other way round.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{poisoned, DispatchError, DispatchResult};
use crate::matching::estimate_response_eta_ms;
use crate::model::{AmbulanceId, Assignment, AssignmentState, RequestId};
use crate::spatial::{haversine_km, GeoIndex};

/// How an ambulance is being bound to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// Driver acceptance of a broadcast; only shortlisted ambulances may claim, and only
    /// on assignments that were actually offered.
    Broadcast,
    /// Operator or batch assignment; any dispatchable ambulance may be bound.
    Direct,
}

/// Why a claim did not bind the ambulance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Another ambulance already won.
    RideAlreadyAssigned,
    /// This ambulance already won; nothing changed.
    AlreadyAcceptedByYou,
    NotACandidate,
    /// Closed before anyone accepted (timeout, cancellation, no drivers).
    RequestClosed(AssignmentState),
    /// Offline or bound to another assignment.
    AmbulanceUnavailable,
    UnknownRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Snapshot taken right after the transition to `driver_accepted`.
    Won(Assignment),
    Rejected(RejectReason),
    /// The acceptance window had already lapsed; this claim closed the request as
    /// `timeout_no_acceptance` instead of binding anyone.
    Expired,
}

impl ClaimOutcome {
    /// The reason a claimant sees when it did not win.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            ClaimOutcome::Won(_) => None,
            ClaimOutcome::Rejected(reason) => Some(*reason),
            ClaimOutcome::Expired => Some(RejectReason::RequestClosed(
                AssignmentState::TimeoutNoAcceptance,
            )),
        }
    }
}

enum Slot {
    Live(Arc<Mutex<Assignment>>),
    Archived(Assignment),
}

/// Owns every assignment, live or recently closed.
#[derive(Debug)]
pub struct AssignmentRegistry {
    live: RwLock<HashMap<RequestId, Arc<Mutex<Assignment>>>>,
    archive: Mutex<LruCache<RequestId, Assignment>>,
}

impl AssignmentRegistry {
    pub fn new(archive_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(archive_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            live: RwLock::new(HashMap::new()),
            archive: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Store a freshly opened assignment. Already-terminal ones go straight to the archive.
    pub fn insert(&self, assignment: Assignment) -> DispatchResult<()> {
        let id = assignment.id;
        let mut live = self.live.write().map_err(poisoned("registry"))?;
        let mut archive = self.archive.lock().map_err(poisoned("archive"))?;
        if live.contains_key(&id) || archive.contains(&id) {
            return Err(DispatchError::DuplicateRequest(id));
        }
        debug!(request_id = %id, state = %assignment.state, "assignment stored");
        if assignment.state.is_terminal() {
            archive.put(id, assignment);
        } else {
            live.insert(id, Arc::new(Mutex::new(assignment)));
        }
        Ok(())
    }

    fn locate(&self, id: RequestId) -> DispatchResult<Option<Slot>> {
        if let Some(cell) = self.live.read().map_err(poisoned("registry"))?.get(&id) {
            return Ok(Some(Slot::Live(Arc::clone(cell))));
        }
        let mut archive = self.archive.lock().map_err(poisoned("archive"))?;
        Ok(archive.get(&id).cloned().map(Slot::Archived))
    }

    /// Run `f` with exclusive access to one assignment.
    ///
    /// Archived assignments are handed over as a throwaway copy: they are terminal, so any
    /// transition guard inside `f` rejects and the archive never changes.
    pub fn with_assignment<R>(
        &self,
        id: RequestId,
        f: impl FnOnce(&mut Assignment) -> DispatchResult<R>,
    ) -> DispatchResult<R> {
        match self.locate(id)? {
            None => Err(DispatchError::UnknownRequest(id)),
            Some(Slot::Archived(mut closed)) => f(&mut closed),
            Some(Slot::Live(cell)) => {
                let mut assignment = cell.lock().map_err(poisoned("assignment"))?;
                let result = f(&mut *assignment);
                if assignment.state.is_terminal() {
                    self.retire(&*assignment)?;
                }
                result
            }
        }
    }

    /// Move a terminal assignment from the live table into the archive.
    fn retire(&self, assignment: &Assignment) -> DispatchResult<()> {
        let mut live = self.live.write().map_err(poisoned("registry"))?;
        if live.remove(&assignment.id).is_some() {
            let mut archive = self.archive.lock().map_err(poisoned("archive"))?;
            archive.put(assignment.id, assignment.clone());
            debug!(request_id = %assignment.id, state = %assignment.state, "assignment archived");
        }
        Ok(())
    }

    pub fn snapshot(&self, id: RequestId) -> DispatchResult<Assignment> {
        match self.locate(id)? {
            None => Err(DispatchError::UnknownRequest(id)),
            Some(Slot::Archived(closed)) => Ok(closed),
            Some(Slot::Live(cell)) => Ok(cell.lock().map_err(poisoned("assignment"))?.clone()),
        }
    }

    /// Copies of every live assignment currently in one of `states`, ordered by id.
    pub fn snapshots_in(&self, states: &[AssignmentState]) -> DispatchResult<Vec<Assignment>> {
        let cells: Vec<Arc<Mutex<Assignment>>> = self
            .live
            .read()
            .map_err(poisoned("registry"))?
            .values()
            .cloned()
            .collect();
        let mut found = Vec::new();
        for cell in cells {
            let assignment = cell.lock().map_err(poisoned("assignment"))?;
            if states.contains(&assignment.state) {
                found.push(assignment.clone());
            }
        }
        found.sort_by_key(|a| a.id);
        Ok(found)
    }

    pub fn live_len(&self) -> usize {
        self.live.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn archived_len(&self) -> usize {
        self.archive.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Atomic compare-and-set from `searching_drivers` to `driver_accepted`.
    ///
    /// The state check, the ambulance reservation, and the transition all happen under the
    /// request's mutex, so concurrent claims resolve to exactly one winner. Losers get a
    /// reason and cause no side effects. A claim arriving at or after the request's
    /// acceptance deadline closes it, whether or not the timer has fired yet.
    pub fn claim(
        &self,
        id: RequestId,
        ambulance_id: AmbulanceId,
        fleet: &GeoIndex,
        mode: ClaimMode,
        now_ms: u64,
        avg_speed_kmh: f64,
    ) -> DispatchResult<ClaimOutcome> {
        let outcome = self.with_assignment(id, |assignment| {
            if assignment.state == AssignmentState::SearchingDrivers
                && assignment.request.acceptance_lapsed(now_ms)
            {
                assignment.advance(AssignmentState::TimeoutNoAcceptance, "expire", now_ms)?;
                info!(
                    request_id = %id,
                    ambulance_id = %ambulance_id,
                    "claim after deadline; request expired"
                );
                return Ok(ClaimOutcome::Expired);
            }
            if let Some(reason) = claim_guard(assignment, ambulance_id, mode) {
                return Ok(ClaimOutcome::Rejected(reason));
            }
            let ambulance = match fleet.reserve(ambulance_id, id) {
                Ok(ambulance) => ambulance,
                Err(DispatchError::AmbulanceUnavailable(_)) => {
                    return Ok(ClaimOutcome::Rejected(RejectReason::AmbulanceUnavailable))
                }
                Err(err) => return Err(err),
            };
            if let Err(err) = assignment.advance(AssignmentState::DriverAccepted, "accept", now_ms) {
                fleet.release(ambulance_id, id)?;
                return Err(err);
            }
            let distance_km = haversine_km(ambulance.location, assignment.request.pickup);
            assignment.ambulance = Some(ambulance_id);
            assignment.expected_arrival_ms =
                Some(now_ms + estimate_response_eta_ms(distance_km, avg_speed_kmh));
            info!(
                request_id = %id,
                ambulance_id = %ambulance_id,
                mode = ?mode,
                distance_km,
                "assignment claimed"
            );
            Ok(ClaimOutcome::Won(assignment.clone()))
        });
        match outcome {
            Err(DispatchError::UnknownRequest(missing)) if missing == id => {
                Ok(ClaimOutcome::Rejected(RejectReason::UnknownRequest))
            }
            other => other,
        }
    }
}

fn claim_guard(
    assignment: &Assignment,
    ambulance_id: AmbulanceId,
    mode: ClaimMode,
) -> Option<RejectReason> {
    if assignment.state != AssignmentState::SearchingDrivers {
        return Some(match assignment.ambulance {
            Some(winner) if winner == ambulance_id => RejectReason::AlreadyAcceptedByYou,
            Some(_) => RejectReason::RideAlreadyAssigned,
            None => RejectReason::RequestClosed(assignment.state),
        });
    }
    if mode == ClaimMode::Broadcast
        && (!assignment.is_offered() || !assignment.is_candidate(ambulance_id))
    {
        return Some(RejectReason::NotACandidate);
    }
    None
}
