//! Spatial operations: fleet positions, H3 bucketing, and Haversine distances.
//!
//! This module provides:
//!
//! - **haversine_km**: great-circle distance on a spherical earth (R = 6371 km)
//! - **SpatialIndex**: H3 cell → ambulance mappings so radius queries only touch nearby cells
//! - **GeoIndex**: the fleet store; answers "who is within R km of P and free" and owns the
//!   `available`/`current_assignment` pair of every ambulance
//!
//! Positions are bucketed at resolution 6 (~3.2 km average edge); every bucket hit is
//! refined with an exact Haversine check, so bucketing only prunes.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock, RwLock};

use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;
use tracing::{debug, info};

use crate::error::{poisoned, DispatchError, DispatchResult};
use crate::model::{Ambulance, AmbulanceId, GeoPoint, LocationUpdate, RequestId};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

const CELL_RESOLUTION: Resolution = Resolution::Six;
/// Conservative bounds on resolution-6 hexagon edges, used to size grid disks.
const MIN_CELL_EDGE_KM: f64 = 2.0;
const MAX_CELL_EDGE_KM: f64 = 4.5;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

fn cell_for(point: GeoPoint) -> DispatchResult<CellIndex> {
    let point = point.validate()?;
    LatLng::new(point.lat, point.lng)
        .map(|ll| ll.to_cell(CELL_RESOLUTION))
        .map_err(|_| DispatchError::InvalidLocation {
            lat: point.lat,
            lng: point.lng,
        })
}

/// Smallest grid-disk radius guaranteed to cover every cell holding a point within `radius_km`.
fn disk_k_for_radius(radius_km: f64) -> u32 {
    let reach = radius_km.max(0.0) + 2.0 * MAX_CELL_EDGE_KM;
    (reach / (3f64.sqrt() * MIN_CELL_EDGE_KM)).ceil() as u32
}

fn disk_size(k: u32) -> usize {
    let k = k as usize;
    3 * k * (k + 1) + 1
}

const GRID_DISK_CACHE_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(999);

/// Grid disks for repeated radius queries around the same pickup cells.
struct GridDiskCache {
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GridDiskCache {
    fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(GRID_DISK_CACHE_SIZE)),
        }
    }

    fn get_or_compute(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            // Poisoned: skip the cache.
            Err(_) => return origin.grid_disk::<Vec<_>>(k),
        };
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

static GRID_DISK_CACHE: OnceLock<GridDiskCache> = OnceLock::new();

/// Get grid disk with caching.
pub fn grid_disk_cached(origin: CellIndex, k: u32) -> Vec<CellIndex> {
    GRID_DISK_CACHE
        .get_or_init(GridDiskCache::new)
        .get_or_compute(origin, k)
}

/// H3 cell → ambulance mappings, updated incrementally as ambulances move.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    by_cell: HashMap<CellIndex, Vec<AmbulanceId>>,
    cell_of: HashMap<AmbulanceId, CellIndex>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: AmbulanceId, cell: CellIndex) {
        self.by_cell.entry(cell).or_default().push(id);
        self.cell_of.insert(id, cell);
    }

    /// Move an ambulance to `new_cell` (no-op when unchanged).
    pub fn update_position(&mut self, id: AmbulanceId, new_cell: CellIndex) {
        match self.cell_of.get(&id).copied() {
            Some(old_cell) if old_cell == new_cell => {}
            Some(old_cell) => {
                if let Some(ids) = self.by_cell.get_mut(&old_cell) {
                    ids.retain(|&e| e != id);
                    if ids.is_empty() {
                        self.by_cell.remove(&old_cell);
                    }
                }
                self.insert(id, new_cell);
            }
            None => self.insert(id, new_cell),
        }
    }

    pub fn ids_in_cells(&self, cells: &[CellIndex]) -> Vec<AmbulanceId> {
        let mut result = Vec::new();
        for cell in cells {
            if let Some(ids) = self.by_cell.get(cell) {
                result.extend(ids.iter().copied());
            }
        }
        result
    }

    pub fn cell_of(&self, id: AmbulanceId) -> Option<CellIndex> {
        self.cell_of.get(&id).copied()
    }
}

/// Which ambulances a radius query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NearbyFilter {
    /// `online && available` (the candidate filter).
    #[default]
    Dispatchable,
    /// Every unit on shift, busy or not.
    Online,
    All,
}

impl NearbyFilter {
    fn admits(self, ambulance: &Ambulance) -> bool {
        match self {
            NearbyFilter::Dispatchable => ambulance.is_dispatchable(),
            NearbyFilter::Online => ambulance.online,
            NearbyFilter::All => true,
        }
    }
}

/// Ambulance snapshot plus its distance from the query point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyAmbulance {
    pub ambulance: Ambulance,
    pub distance_km: f64,
}

#[derive(Debug, Default)]
struct FleetState {
    ambulances: HashMap<AmbulanceId, Ambulance>,
    index: SpatialIndex,
}

/// Authoritative fleet store.
///
/// Location updates are last-write-wins. `reserve`/`release` are the only writers of
/// `available`/`current_assignment`, and they run under the fleet write lock.
#[derive(Debug, Default)]
pub struct GeoIndex {
    state: RwLock<FleetState>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mut ambulance: Ambulance) -> DispatchResult<()> {
        let cell = cell_for(ambulance.location)?;
        let mut state = self.state.write().map_err(poisoned("fleet"))?;
        if state.ambulances.contains_key(&ambulance.id) {
            return Err(DispatchError::DuplicateAmbulance(ambulance.id));
        }
        // New registrations never arrive bound to an assignment.
        ambulance.current_assignment = None;
        ambulance.available = true;
        info!(ambulance_id = %ambulance.id, tier = ?ambulance.tier, "ambulance registered");
        state.index.insert(ambulance.id, cell);
        state.ambulances.insert(ambulance.id, ambulance);
        Ok(())
    }

    /// Apply one location-feed entry.
    ///
    /// A driver reporting `available = false` is taken off duty (`online = false`);
    /// `available` itself only follows assignment binding.
    pub fn apply_location_update(&self, update: LocationUpdate) -> DispatchResult<()> {
        let cell = cell_for(update.location)?;
        let mut state = self.state.write().map_err(poisoned("fleet"))?;
        let FleetState { ambulances, index } = &mut *state;
        let ambulance = ambulances
            .get_mut(&update.ambulance_id)
            .ok_or(DispatchError::UnknownAmbulance(update.ambulance_id))?;
        ambulance.location = update.location;
        ambulance.online = update.online && (update.available || ambulance.current_assignment.is_some());
        ambulance.fuel_level = update.fuel_level.clamp(0.0, 100.0);
        index.update_position(update.ambulance_id, cell);
        debug!(ambulance_id = %update.ambulance_id, lat = update.location.lat, lng = update.location.lng, "location updated");
        Ok(())
    }

    /// Take an ambulance off the road. The record is kept.
    pub fn deactivate(&self, id: AmbulanceId) -> DispatchResult<()> {
        let mut state = self.state.write().map_err(poisoned("fleet"))?;
        let ambulance = state
            .ambulances
            .get_mut(&id)
            .ok_or(DispatchError::UnknownAmbulance(id))?;
        ambulance.online = false;
        info!(ambulance_id = %id, "ambulance deactivated");
        Ok(())
    }

    pub fn get(&self, id: AmbulanceId) -> DispatchResult<Ambulance> {
        let state = self.state.read().map_err(poisoned("fleet"))?;
        state
            .ambulances
            .get(&id)
            .cloned()
            .ok_or(DispatchError::UnknownAmbulance(id))
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.ambulances.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ambulances within `radius_km` of `point` that pass `filter`, nearest first.
    pub fn nearby(
        &self,
        point: GeoPoint,
        radius_km: f64,
        filter: NearbyFilter,
    ) -> DispatchResult<Vec<NearbyAmbulance>> {
        let origin = cell_for(point)?;
        let state = self.state.read().map_err(poisoned("fleet"))?;

        let k = disk_k_for_radius(radius_km);
        let ids: Vec<AmbulanceId> = if disk_size(k) >= state.ambulances.len() {
            // Small fleets: scanning everything is cheaper than building the disk.
            state.ambulances.keys().copied().collect()
        } else {
            state.index.ids_in_cells(&grid_disk_cached(origin, k))
        };

        let mut result: Vec<NearbyAmbulance> = ids
            .into_iter()
            .filter_map(|id| state.ambulances.get(&id))
            .filter(|a| filter.admits(a))
            .filter_map(|a| {
                let distance_km = haversine_km(point, a.location);
                (distance_km <= radius_km).then(|| NearbyAmbulance {
                    ambulance: a.clone(),
                    distance_km,
                })
            })
            .collect();
        result.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.ambulance.id.cmp(&b.ambulance.id))
        });
        Ok(result)
    }

    /// Bind an ambulance to `assignment`. Fails unless it is online, available, and unbound.
    pub fn reserve(&self, id: AmbulanceId, assignment: RequestId) -> DispatchResult<Ambulance> {
        let mut state = self.state.write().map_err(poisoned("fleet"))?;
        let ambulance = state
            .ambulances
            .get_mut(&id)
            .ok_or(DispatchError::UnknownAmbulance(id))?;
        if !ambulance.is_dispatchable() {
            return Err(DispatchError::AmbulanceUnavailable(id));
        }
        ambulance.available = false;
        ambulance.current_assignment = Some(assignment);
        debug!(ambulance_id = %id, request_id = %assignment, "ambulance reserved");
        Ok(ambulance.clone())
    }

    /// Unbind an ambulance from `assignment`. Returns `false` if it was bound elsewhere.
    pub fn release(&self, id: AmbulanceId, assignment: RequestId) -> DispatchResult<bool> {
        let mut state = self.state.write().map_err(poisoned("fleet"))?;
        let ambulance = state
            .ambulances
            .get_mut(&id)
            .ok_or(DispatchError::UnknownAmbulance(id))?;
        if ambulance.current_assignment != Some(assignment) {
            return Ok(false);
        }
        ambulance.current_assignment = None;
        ambulance.available = true;
        debug!(ambulance_id = %id, request_id = %assignment, "ambulance released");
        Ok(true)
    }

    /// Cell an ambulance is currently bucketed under.
    pub fn cell_of(&self, id: AmbulanceId) -> Option<CellIndex> {
        self.state.read().ok().and_then(|s| s.index.cell_of(id))
    }
}
