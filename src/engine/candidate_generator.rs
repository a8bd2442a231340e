use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::engine::{
    distance::Envelope,
    join_planner::JoinPlan,
};
use crate::store::{Dataset, SpatialCandidates};
use crate::utils::{
    config::CandidateStrategy,
    request::DistanceKind,
    types::{Entity, EntityId},
};

/// One entity per role, in role order
pub type Tuple<'a> = Vec<&'a Entity>;

/// Knobs for candidate enumeration
#[derive(Debug, Clone, Copy)]
pub struct GeneratorOptions {
    pub strategy: CandidateStrategy,
    pub spatial_pruning: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            strategy: CandidateStrategy::Indexed,
            spatial_pruning: true,
        }
    }
}

/// Lazy, single-pass stream of candidate tuples for a join plan.
///
/// Every tuple satisfies the role predicates, the partition equality
/// constraints and id distinctness across roles. Distance constraints are
/// left to the executor. The stream ends early once `cancel` fires; see
/// [`CandidateTuples::interrupted`].
pub enum CandidateTuples<'a> {
    Indexed(IndexedCandidates<'a>),
    Naive(NaiveCandidates<'a>),
}

impl<'a> CandidateTuples<'a> {
    pub fn new(
        plan: &'a JoinPlan,
        dataset: &'a Dataset,
        options: GeneratorOptions,
        cancel: &CancellationToken,
    ) -> Self {
        match options.strategy {
            CandidateStrategy::Indexed => CandidateTuples::Indexed(IndexedCandidates::new(
                plan,
                dataset,
                options.spatial_pruning,
                cancel.clone(),
            )),
            CandidateStrategy::Naive => CandidateTuples::Naive(NaiveCandidates::new(plan, dataset, cancel.clone())),
        }
    }

    /// Whether the stream stopped because of cancellation rather than exhaustion
    pub fn interrupted(&self) -> bool {
        match self {
            CandidateTuples::Indexed(inner) => inner.interrupted,
            CandidateTuples::Naive(inner) => inner.interrupted,
        }
    }
}

impl<'a> Iterator for CandidateTuples<'a> {
    type Item = Tuple<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            CandidateTuples::Indexed(inner) => inner.next(),
            CandidateTuples::Naive(inner) => inner.next(),
        }
    }
}

fn same_partition(a: &Entity, b: &Entity, dimension: &str) -> bool {
    matches!((a.partition(dimension), b.partition(dimension)), (Some(x), Some(y)) if x == y)
}

/// Entities passing a role's predicates, seeded from the partition index when
/// the role pins a partition value
fn role_candidates<'a>(plan: &JoinPlan, role: usize, dataset: &'a Dataset) -> Vec<&'a Entity> {
    let filter = &plan.roles[role].filter;
    let store = dataset.store();
    match filter.partition_seed(dataset) {
        Some((dimension, value)) => dataset
            .partitions()
            .bucket(dimension, &value)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| store.entity(id))
                    .filter(|e| filter.matches(e))
                    .collect()
            })
            .unwrap_or_default(),
        None => store.iter().filter(|e| filter.matches(e)).collect(),
    }
}

/// Binding step for one depth of the search
#[derive(Debug, Clone)]
struct Step {
    role: usize,
    /// (dimension, depth of the already-bound partner)
    equalities: Vec<(String, usize)>,
    /// (depth of the already-bound partner, radius, kind), smallest radius first
    proximity: Vec<(usize, f64, DistanceKind)>,
}

struct Frame<'a> {
    domain: Vec<&'a Entity>,
    next: usize,
}

/// Depth-first enumeration driven by the partition and spatial indexes
pub struct IndexedCandidates<'a> {
    dataset: &'a Dataset,
    steps: Vec<Step>,
    candidates: Vec<Vec<&'a Entity>>,
    candidate_ids: Vec<HashSet<&'a EntityId>>,
    spatial_pruning: bool,
    stack: Vec<Frame<'a>>,
    bound: Vec<&'a Entity>,
    started: bool,
    cancel: CancellationToken,
    interrupted: bool,
}

impl<'a> IndexedCandidates<'a> {
    pub fn new(plan: &'a JoinPlan, dataset: &'a Dataset, spatial_pruning: bool, cancel: CancellationToken) -> Self {
        let candidates: Vec<Vec<&'a Entity>> = (0..plan.role_count())
            .map(|role| role_candidates(plan, role, dataset))
            .collect();
        let candidate_ids = candidates
            .iter()
            .map(|entities| entities.iter().copied().map(|e: &'a Entity| &e.id).collect())
            .collect();

        let order = binding_order(plan, dataset, &candidates);
        let mut depth_of = vec![usize::MAX; plan.role_count()];
        for (depth, role) in order.iter().enumerate() {
            depth_of[*role] = depth;
        }

        let steps = order
            .iter()
            .enumerate()
            .map(|(depth, &role)| {
                let partner = |left: usize, right: usize| -> Option<usize> {
                    let other = if left == role {
                        right
                    } else if right == role {
                        left
                    } else {
                        return None;
                    };
                    (depth_of[other] < depth).then_some(depth_of[other])
                };

                let equalities = plan
                    .partition_constraints
                    .iter()
                    .filter_map(|c| partner(c.left, c.right).map(|d| (c.dimension.clone(), d)))
                    .collect();
                // Constraints are already sorted by radius
                let proximity = plan
                    .distance_constraints
                    .iter()
                    .filter_map(|c| partner(c.left, c.right).map(|d| (d, c.radius, c.kind)))
                    .collect();
                Step { role, equalities, proximity }
            })
            .collect::<Vec<_>>();

        debug!(
            order = ?steps.iter().map(|s| plan.roles[s.role].alias.as_str()).collect::<Vec<_>>(),
            candidates = ?candidates.iter().map(Vec::len).collect::<Vec<_>>(),
            "indexed candidate generation"
        );

        // A role without candidates rules out every tuple
        let exhausted = candidates.iter().any(Vec::is_empty);
        Self {
            dataset,
            steps,
            candidates,
            candidate_ids,
            spatial_pruning,
            stack: Vec::new(),
            bound: Vec::new(),
            started: exhausted,
            cancel,
            interrupted: false,
        }
    }

    /// Entities eligible at `depth` given the currently bound prefix
    fn domain(&self, depth: usize) -> Vec<&'a Entity> {
        let step = &self.steps[depth];
        let store = self.dataset.store();
        let role_candidates = &self.candidates[step.role];

        // Smallest partner bucket among the equality constraints
        let mut bucket = None;
        for (dimension, partner_depth) in &step.equalities {
            let Some(value) = self.bound[*partner_depth].partition(dimension) else {
                return Vec::new();
            };
            let Some(ids) = self.dataset.partitions().bucket(dimension, value) else {
                return Vec::new();
            };
            if bucket.map_or(true, |b: &BTreeSet<EntityId>| ids.len() < b.len()) {
                bucket = Some(ids);
            }
        }

        let mut envelope = None;
        let mut cells = None;
        if self.spatial_pruning {
            if let Some((partner_depth, radius, kind)) = step.proximity.first() {
                // Pad so boundary points survive floating point rounding
                let padded = radius + radius.abs() * 1e-9 + 1e-9;
                envelope = Envelope::around(&self.bound[*partner_depth].coordinates, padded, *kind);
                if let Some(envelope) = &envelope {
                    if let SpatialCandidates::Ids(ids) = self.dataset.spatial().candidates_in(envelope) {
                        cells = Some(ids);
                    }
                }
            }
        }

        let eligible = |entity: &Entity| -> bool {
            step.equalities
                .iter()
                .all(|(dimension, d)| same_partition(entity, self.bound[*d], dimension))
                && !self.bound.iter().any(|b| b.id == entity.id)
                && envelope.as_ref().map_or(true, |e| e.contains(&entity.coordinates))
        };
        let candidate = |id: &EntityId| self.candidate_ids[step.role].contains(id);

        let bucket_len = bucket.map_or(usize::MAX, |b| b.len());
        let cells_len = cells.as_ref().map_or(usize::MAX, Vec::len);

        if role_candidates.len() <= bucket_len.min(cells_len) {
            role_candidates.iter().copied().filter(|e| eligible(*e)).collect()
        } else if bucket_len <= cells_len {
            bucket
                .into_iter()
                .flatten()
                .filter(|id| candidate(*id))
                .filter_map(|id| store.entity(id))
                .filter(|e| eligible(*e))
                .collect()
        } else {
            let mut domain: Vec<&'a Entity> = cells
                .into_iter()
                .flatten()
                .filter(|id| candidate(id))
                .filter_map(|id| store.entity(&id))
                .filter(|e| eligible(*e))
                .collect();
            domain.sort_by(|a, b| a.id.cmp(&b.id));
            domain
        }
    }

    fn emit(&self) -> Tuple<'a> {
        let mut tuple = vec![self.bound[0]; self.bound.len()];
        for (step, entity) in self.steps.iter().zip(&self.bound) {
            tuple[step.role] = *entity;
        }
        tuple
    }
}

impl<'a> Iterator for IndexedCandidates<'a> {
    type Item = Tuple<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            if self.steps.is_empty() {
                return None;
            }
            let domain = self.domain(0);
            self.stack.push(Frame { domain, next: 0 });
        }

        loop {
            if self.cancel.is_cancelled() {
                self.interrupted = true;
                self.stack.clear();
                self.bound.clear();
                return None;
            }
            let frame = self.stack.last_mut()?;
            if frame.next == frame.domain.len() {
                self.stack.pop();
                self.bound.pop();
                continue;
            }
            let entity = frame.domain[frame.next];
            frame.next += 1;

            self.bound.push(entity);
            if self.bound.len() == self.steps.len() {
                let tuple = self.emit();
                self.bound.pop();
                return Some(tuple);
            }
            let domain = self.domain(self.bound.len());
            self.stack.push(Frame { domain, next: 0 });
        }
    }
}

/// Greedy role order: partition groups with the smallest expected buckets first
fn binding_order(plan: &JoinPlan, dataset: &Dataset, candidates: &[Vec<&Entity>]) -> Vec<usize> {
    let role_count = plan.role_count();

    // Connected role components per dimension
    let mut groups: BTreeMap<String, Vec<Vec<usize>>> = BTreeMap::new();
    for constraint in &plan.partition_constraints {
        let components = groups.entry(constraint.dimension.clone()).or_default();
        let left = components.iter().position(|c| c.contains(&constraint.left));
        let right = components.iter().position(|c| c.contains(&constraint.right));
        match (left, right) {
            (Some(l), Some(r)) if l != r => {
                let merged = components.remove(l.max(r));
                components[l.min(r)].extend(merged);
            }
            (Some(_), Some(_)) => {}
            (Some(l), None) => components[l].push(constraint.right),
            (None, Some(r)) => components[r].push(constraint.left),
            (None, None) => components.push(vec![constraint.left, constraint.right]),
        }
    }

    let mut ordered: Vec<(f64, String, Vec<usize>)> = groups
        .into_iter()
        .flat_map(|(dimension, components)| {
            let size = dataset.partitions().expected_bucket_size(&dimension);
            components.into_iter().map(move |roles| (size, dimension.clone(), roles))
        })
        .collect();
    ordered.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2)));

    let by_candidates = |roles: &mut Vec<usize>| {
        roles.sort_by_key(|&r| (candidates[r].len(), r));
    };

    let mut order = Vec::with_capacity(role_count);
    let mut placed = vec![false; role_count];
    for (_, _, mut roles) in ordered {
        by_candidates(&mut roles);
        for role in roles {
            if !placed[role] {
                placed[role] = true;
                order.push(role);
            }
        }
    }

    let mut rest: Vec<usize> = (0..role_count).filter(|r| !placed[*r]).collect();
    by_candidates(&mut rest);
    order.extend(rest);
    order
}

/// Full cross product of role candidates, filtered afterwards
pub struct NaiveCandidates<'a> {
    plan: &'a JoinPlan,
    candidates: Vec<Vec<&'a Entity>>,
    positions: Vec<usize>,
    done: bool,
    cancel: CancellationToken,
    interrupted: bool,
}

impl<'a> NaiveCandidates<'a> {
    pub fn new(plan: &'a JoinPlan, dataset: &'a Dataset, cancel: CancellationToken) -> Self {
        let candidates: Vec<Vec<&'a Entity>> = plan
            .roles
            .iter()
            .map(|role| dataset.store().iter().filter(|e| role.filter.matches(e)).collect())
            .collect();
        let done = candidates.is_empty() || candidates.iter().any(Vec::is_empty);
        Self {
            plan,
            positions: vec![0; candidates.len()],
            candidates,
            done,
            cancel,
            interrupted: false,
        }
    }

    fn current(&self) -> Tuple<'a> {
        self.positions
            .iter()
            .zip(&self.candidates)
            .map(|(&p, entities)| entities[p])
            .collect()
    }

    fn advance(&mut self) {
        for role in (0..self.positions.len()).rev() {
            self.positions[role] += 1;
            if self.positions[role] < self.candidates[role].len() {
                return;
            }
            self.positions[role] = 0;
        }
        self.done = true;
    }

    fn accepts(&self, tuple: &Tuple<'a>) -> bool {
        let distinct = tuple
            .iter()
            .enumerate()
            .all(|(i, a)| tuple[i + 1..].iter().all(|b| a.id != b.id));
        distinct
            && self
                .plan
                .partition_constraints
                .iter()
                .all(|c| same_partition(tuple[c.left], tuple[c.right], &c.dimension))
    }
}

impl<'a> Iterator for NaiveCandidates<'a> {
    type Item = Tuple<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.cancel.is_cancelled() {
                self.interrupted = true;
                self.done = true;
                return None;
            }
            let tuple = self.current();
            self.advance();
            if self.accepts(&tuple) {
                return Some(tuple);
            }
        }
        None
    }
}
