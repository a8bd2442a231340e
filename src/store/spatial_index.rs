use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;
use crate::engine::distance::{self, Envelope};
use crate::store::point_store::{PointStore, StoreEvent, StoreObserver};
use crate::utils::{
    error::EngineResult,
    request::DistanceKind,
    types::{Entity, EntityId, Point},
};

type CellKey = (i64, i64);

/// Cell coordinates past this magnitude no longer map one-to-one onto cells
const MAX_CELL_COORDINATE: f64 = (1u64 << 62) as f64;

/// Uniform grid over entity coordinates
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    full_scan_threshold: usize,
    cells: HashMap<CellKey, Vec<EntityId>>,
    len: usize,
}

/// Ids the grid could not rule out for a query region
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialCandidates {
    /// Every entity must be considered
    All,
    /// Superset of the matches, in cell order
    Ids(Vec<EntityId>),
}

/// An entity id with its distance from a query point
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbour {
    pub id: EntityId,
    pub distance: f64,
}

impl Eq for Neighbour {}

impl Ord for Neighbour {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Neighbour {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl SpatialIndex {
    pub fn new(cell_size: f64, full_scan_threshold: usize) -> Self {
        Self {
            cell_size,
            full_scan_threshold,
            cells: HashMap::new(),
            len: 0,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Rebuild the grid with a new cell size from the store contents
    pub fn rebuild(&mut self, cell_size: f64, store: &PointStore) {
        debug!(old = self.cell_size, new = cell_size, entities = store.len(), "rebuilding spatial grid");
        self.cell_size = cell_size;
        self.reset();
        for entity in store.iter() {
            self.observe(StoreEvent::Inserted(entity));
        }
    }

    /// Whether lookups skip the grid and scan the whole store
    pub fn prefers_full_scan(&self) -> bool {
        self.len < self.full_scan_threshold
    }

    fn cell_of(&self, point: &Point) -> CellKey {
        (
            (point.x / self.cell_size).floor() as i64,
            (point.y / self.cell_size).floor() as i64,
        )
    }

    /// Whether `point` falls in a cell whose key was not clamped by the cast
    fn has_exact_cell(&self, point: &Point) -> bool {
        (point.x / self.cell_size).abs() < MAX_CELL_COORDINATE && (point.y / self.cell_size).abs() < MAX_CELL_COORDINATE
    }

    /// Ids in cells overlapping the envelope
    pub fn candidates_in(&self, envelope: &Envelope) -> SpatialCandidates {
        if self.prefers_full_scan() {
            return SpatialCandidates::All;
        }

        let (min_cx, min_cy) = self.cell_of(&Point::new(envelope.min_x, envelope.min_y));
        let (max_cx, max_cy) = self.cell_of(&Point::new(envelope.max_x, envelope.max_y));
        let width = i128::from(max_cx) - i128::from(min_cx) + 1;
        let height = i128::from(max_cy) - i128::from(min_cy) + 1;
        let walk_envelope = width
            .checked_mul(height)
            .is_some_and(|span| span >= 0 && span <= self.cells.len() as i128);

        let mut ids = Vec::new();
        if !walk_envelope {
            // Walking the occupied cells is cheaper than walking the envelope
            for ((cx, cy), cell) in &self.cells {
                if (min_cx..=max_cx).contains(cx) && (min_cy..=max_cy).contains(cy) {
                    ids.extend(cell.iter().cloned());
                }
            }
        } else {
            for cx in min_cx..=max_cx {
                for cy in min_cy..=max_cy {
                    if let Some(cell) = self.cells.get(&(cx, cy)) {
                        ids.extend(cell.iter().cloned());
                    }
                }
            }
        }
        SpatialCandidates::Ids(ids)
    }

    /// Ids within `radius` of `center`, nearest first
    pub fn radius_query(
        &self,
        store: &PointStore,
        center: &Point,
        radius: f64,
        kind: DistanceKind,
    ) -> EngineResult<Vec<Neighbour>> {
        let candidates = match Envelope::around(center, radius, kind) {
            Some(envelope) => self.candidates_in(&envelope),
            None => SpatialCandidates::All,
        };

        let mut matches = Vec::new();
        let mut consider = |entity: &Entity| -> EngineResult<()> {
            if distance::within(center, &entity.coordinates, radius, kind)? {
                matches.push(Neighbour {
                    id: entity.id.clone(),
                    distance: distance::distance(center, &entity.coordinates, kind)?,
                });
            }
            Ok(())
        };

        match candidates {
            SpatialCandidates::All => {
                for entity in store.iter() {
                    consider(entity)?;
                }
            }
            SpatialCandidates::Ids(ids) => {
                for id in &ids {
                    if let Some(entity) = store.entity(id) {
                        consider(entity)?;
                    }
                }
            }
        }

        matches.sort();
        Ok(matches)
    }

    /// The `k` entities closest to `center` that pass `filter`, nearest first.
    ///
    /// Euclidean lookups expand rings of cells around the center until no
    /// unvisited cell can hold a closer entity; geodesic lookups scan.
    pub fn nearest<F>(
        &self,
        store: &PointStore,
        center: &Point,
        k: usize,
        kind: DistanceKind,
        mut filter: F,
    ) -> EngineResult<Vec<Neighbour>>
    where
        F: FnMut(&Entity) -> EngineResult<bool>,
    {
        let mut best: BinaryHeap<Neighbour> = BinaryHeap::with_capacity(k + 1);
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut offer = |entity: &Entity, best: &mut BinaryHeap<Neighbour>| -> EngineResult<()> {
            if !filter(entity)? {
                return Ok(());
            }
            let candidate = Neighbour {
                id: entity.id.clone(),
                distance: distance::distance(center, &entity.coordinates, kind)?,
            };
            if best.len() < k {
                best.push(candidate);
            } else if best.peek().is_some_and(|worst| candidate < *worst) {
                best.pop();
                best.push(candidate);
            }
            Ok(())
        };

        if kind == DistanceKind::Geodesic
            || self.prefers_full_scan()
            || !center.is_finite()
            || !self.has_exact_cell(center)
        {
            for entity in store.iter() {
                offer(entity, &mut best)?;
            }
            return Ok(best.into_sorted_vec());
        }

        let (cx, cy) = self.cell_of(center);
        let mut visited_cells = 0usize;
        let mut ring: i64 = 0;
        loop {
            let ring_cells: Vec<CellKey> = if ring == 0 {
                vec![(cx, cy)]
            } else {
                let mut keys = Vec::with_capacity((8 * ring) as usize);
                for dx in -ring..=ring {
                    keys.push((cx + dx, cy - ring));
                    keys.push((cx + dx, cy + ring));
                }
                for dy in (-ring + 1)..ring {
                    keys.push((cx - ring, cy + dy));
                    keys.push((cx + ring, cy + dy));
                }
                keys
            };

            if ring_cells.len() > self.cells.len() {
                // The ring outgrew the occupied grid: finish with a scan
                for entity in store.iter() {
                    let key = self.cell_of(&entity.coordinates);
                    let ring = i128::from(ring);
                    if (i128::from(key.0) - i128::from(cx)).abs() >= ring
                        || (i128::from(key.1) - i128::from(cy)).abs() >= ring
                    {
                        offer(entity, &mut best)?;
                    }
                }
                break;
            }

            for key in &ring_cells {
                if let Some(ids) = self.cells.get(key) {
                    visited_cells += 1;
                    for id in ids {
                        if let Some(entity) = store.entity(id) {
                            offer(entity, &mut best)?;
                        }
                    }
                }
            }

            // Anything outside rings 0..=ring is at least ring * cell_size away
            let full = best.len() == k;
            let bound = ring as f64 * self.cell_size;
            if (full && best.peek().is_some_and(|worst| worst.distance <= bound))
                || visited_cells == self.cells.len()
            {
                break;
            }
            ring += 1;
        }

        Ok(best.into_sorted_vec())
    }
}

impl StoreObserver for SpatialIndex {
    fn observe(&mut self, event: StoreEvent<'_>) {
        match event {
            StoreEvent::Inserted(entity) => {
                let key = self.cell_of(&entity.coordinates);
                self.cells.entry(key).or_default().push(entity.id.clone());
                self.len += 1;
            }
            StoreEvent::Removed(entity) => {
                let key = self.cell_of(&entity.coordinates);
                if let Some(cell) = self.cells.get_mut(&key) {
                    let before = cell.len();
                    cell.retain(|id| id != &entity.id);
                    self.len -= before - cell.len();
                    if cell.is_empty() {
                        self.cells.remove(&key);
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.len = 0;
    }
}
