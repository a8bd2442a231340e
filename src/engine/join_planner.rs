use std::collections::{HashMap, HashSet};
use tracing::debug;
use crate::engine::{distance::threshold_in_coordinate_units, predicate::EntityFilter};
use crate::store::Dataset;
use crate::utils::{
    error::{EngineResult, RequestError},
    request::{DistanceKind, Field, JoinRequest, OrderDirection, Projection, ProjectionExpr},
    types::{ColumnMetadata, DataType},
};

/// A role with its alias resolved and predicates compiled
#[derive(Debug, Clone)]
pub struct PlannedRole {
    pub alias: String,
    pub filter: EntityFilter,
}

/// Partition equality between two roles, by role index
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPartition {
    pub dimension: String,
    pub left: usize,
    pub right: usize,
}

/// Distance check between two roles, by role index
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDistance {
    pub left: usize,
    pub right: usize,
    pub radius: f64,
    pub kind: DistanceKind,
    pub inclusive: bool,
}

/// Output expression with role aliases resolved to indexes
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedProjection {
    Field { role: usize, field: Field },
    Distance { left: usize, right: usize, kind: DistanceKind },
    ClusterSpread { roles: Vec<usize>, kind: DistanceKind },
}

/// A validated join, ready for execution
#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub roles: Vec<PlannedRole>,
    pub partition_constraints: Vec<PlannedPartition>,
    /// Sorted by radius, most selective first
    pub distance_constraints: Vec<PlannedDistance>,
    pub projections: Vec<PlannedProjection>,
    pub columns: Vec<ColumnMetadata>,
    /// Output column index and direction for each sort key
    pub ordering: Vec<(usize, OrderDirection)>,
    pub limit: Option<usize>,
    pub estimated_cost: f64,
}

impl JoinPlan {
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Largest distance threshold in raw coordinate units, used to size the grid
    pub fn max_threshold(&self) -> Option<f64> {
        self.distance_constraints
            .iter()
            .map(|c| threshold_in_coordinate_units(c.radius, c.kind))
            .fold(None, |max, t| Some(max.map_or(t, |m: f64| m.max(t))))
    }

    /// Stop generating once `limit` rows exist; only valid without ordering
    pub fn early_stop(&self) -> Option<usize> {
        if self.ordering.is_empty() {
            self.limit
        } else {
            None
        }
    }
}

/// Turns join requests into validated plans
pub trait JoinPlanner: Send + Sync {
    /// Validate the request and build an execution plan
    fn plan(&self, request: JoinRequest, dataset: &Dataset) -> EngineResult<JoinPlan>;

    /// Rough number of tuples the candidate generator will visit
    fn estimate_cost(&self, plan: &JoinPlan, dataset: &Dataset) -> f64;
}

/// Default implementation of JoinPlanner
pub struct DefaultJoinPlanner {
    default_distance: DistanceKind,
    /// Cost for each role whose domain is a partition bucket
    bucket_probe_cost: f64,
    /// Cost multiplier for every distance check
    distance_check_cost: f64,
    sort_cost: f64,
}

impl DefaultJoinPlanner {
    pub fn new(default_distance: DistanceKind) -> Self {
        Self {
            default_distance,
            bucket_probe_cost: 1.0,
            distance_check_cost: 0.1,
            sort_cost: 0.5,
        }
    }

    fn resolve(aliases: &HashMap<&str, usize>, alias: &str) -> Result<usize, RequestError> {
        aliases
            .get(alias)
            .copied()
            .ok_or_else(|| RequestError::UndefinedRole(alias.to_string()))
    }

    fn resolve_pair(
        aliases: &HashMap<&str, usize>,
        left: &str,
        right: &str,
    ) -> Result<(usize, usize), RequestError> {
        let pair = (Self::resolve(aliases, left)?, Self::resolve(aliases, right)?);
        if pair.0 == pair.1 {
            return Err(RequestError::SelfReference(left.to_string()));
        }
        Ok(pair)
    }

    fn column_type(field: &Field, dataset: &Dataset) -> DataType {
        match field {
            Field::X | Field::Y => DataType::Float,
            // Ids and partition values may be integers or strings
            Field::Id | Field::Name | Field::Category | Field::Partition(_) => DataType::Text,
            Field::Attribute(name) => dataset
                .attributes()
                .stats(name)
                .and_then(|stats| stats.types.iter().max_by_key(|(_, n)| **n).map(|(t, _)| *t))
                .unwrap_or(DataType::Text),
        }
    }

    fn validate(&self, request: JoinRequest, dataset: &Dataset) -> Result<JoinPlan, RequestError> {
        if request.roles.is_empty() {
            return Err(RequestError::NoRoles);
        }

        let mut aliases = HashMap::new();
        let mut roles = Vec::with_capacity(request.roles.len());
        for (index, role) in request.roles.iter().enumerate() {
            if aliases.insert(role.alias.as_str(), index).is_some() {
                return Err(RequestError::DuplicateRole(role.alias.clone()));
            }
            roles.push(PlannedRole {
                alias: role.alias.clone(),
                filter: EntityFilter::compile(&role.predicates)?,
            });
        }

        let mut partition_constraints = Vec::new();
        for constraint in &request.partition_constraints {
            let (left, right) = Self::resolve_pair(&aliases, &constraint.left, &constraint.right)?;
            partition_constraints.push(PlannedPartition {
                dimension: constraint.dimension.clone(),
                left,
                right,
            });
        }

        let mut distance_constraints = Vec::new();
        for constraint in &request.distance_constraints {
            let (left, right) = Self::resolve_pair(&aliases, &constraint.left, &constraint.right)?;
            if !constraint.max_distance.is_finite() || constraint.max_distance < 0.0 {
                return Err(RequestError::InvalidRadius {
                    left: constraint.left.clone(),
                    right: constraint.right.clone(),
                    radius: constraint.max_distance,
                });
            }
            distance_constraints.push(PlannedDistance {
                left,
                right,
                radius: constraint.max_distance,
                kind: constraint.kind.unwrap_or(self.default_distance),
                inclusive: constraint.inclusive,
            });
        }
        distance_constraints.sort_by(|a, b| a.radius.total_cmp(&b.radius));

        let mut projections = Vec::new();
        let mut columns = Vec::new();
        let mut names = HashSet::new();
        let default_projections;
        let requested = if request.projections.is_empty() {
            default_projections = request
                .roles
                .iter()
                .map(|role| Projection::field(&role.alias, Field::Id))
                .collect::<Vec<_>>();
            &default_projections
        } else {
            &request.projections
        };

        for projection in requested {
            let name = projection.output_name();
            if !names.insert(name.clone()) {
                return Err(RequestError::DuplicateColumn(name));
            }
            let (planned, data_type, nullable) = match &projection.expr {
                ProjectionExpr::Field { role, field } => {
                    let nullable = matches!(field, Field::Partition(_) | Field::Attribute(_));
                    (
                        PlannedProjection::Field {
                            role: Self::resolve(&aliases, role)?,
                            field: field.clone(),
                        },
                        Self::column_type(field, dataset),
                        nullable,
                    )
                }
                ProjectionExpr::Distance { left, right, kind } => {
                    let (left, right) = Self::resolve_pair(&aliases, left, right)?;
                    (
                        PlannedProjection::Distance {
                            left,
                            right,
                            kind: kind.unwrap_or(self.default_distance),
                        },
                        DataType::Float,
                        false,
                    )
                }
                ProjectionExpr::ClusterSpread { roles: spread_roles, kind } => {
                    let resolved = spread_roles
                        .iter()
                        .map(|alias| Self::resolve(&aliases, alias))
                        .collect::<Result<Vec<_>, _>>()?;
                    (
                        PlannedProjection::ClusterSpread {
                            roles: resolved,
                            kind: kind.unwrap_or(self.default_distance),
                        },
                        DataType::Float,
                        false,
                    )
                }
            };
            projections.push(planned);
            columns.push(ColumnMetadata {
                name,
                data_type,
                nullable,
            });
        }

        let mut ordering = Vec::new();
        if let Some(order_by) = &request.ordering {
            for column in &order_by.columns {
                let index = columns
                    .iter()
                    .position(|c| c.name == column.column)
                    .ok_or_else(|| RequestError::UnknownColumn(column.column.clone()))?;
                ordering.push((index, column.direction));
            }
        }

        Ok(JoinPlan {
            roles,
            partition_constraints,
            distance_constraints,
            projections,
            columns,
            ordering,
            limit: request.limit.map(|l| l as usize),
            estimated_cost: 0.0,
        })
    }
}

impl Default for DefaultJoinPlanner {
    fn default() -> Self {
        Self::new(DistanceKind::Euclidean)
    }
}

impl JoinPlanner for DefaultJoinPlanner {
    fn plan(&self, request: JoinRequest, dataset: &Dataset) -> EngineResult<JoinPlan> {
        let mut plan = self.validate(request, dataset)?;
        plan.estimated_cost = self.estimate_cost(&plan, dataset);
        debug!(
            roles = plan.role_count(),
            partition_constraints = plan.partition_constraints.len(),
            distance_constraints = plan.distance_constraints.len(),
            estimated_cost = plan.estimated_cost,
            "join planned"
        );
        Ok(plan)
    }

    fn estimate_cost(&self, plan: &JoinPlan, dataset: &Dataset) -> f64 {
        let n = dataset.len().max(1) as f64;
        let mut tuples = 1.0;
        for role in 0..plan.role_count() {
            // A role joined by partition to an earlier role only sees one bucket
            let bucket = plan
                .partition_constraints
                .iter()
                .filter(|c| c.left.max(c.right) == role)
                .map(|c| dataset.partitions().expected_bucket_size(&c.dimension))
                .fold(None, |min: Option<f64>, size| Some(min.map_or(size, |m| m.min(size))));
            tuples *= match bucket {
                Some(size) => size.max(1.0) * self.bucket_probe_cost,
                None => n,
            };
        }

        let mut cost = tuples * (1.0 + plan.distance_constraints.len() as f64 * self.distance_check_cost);
        if !plan.ordering.is_empty() {
            cost += self.sort_cost;
        }
        cost
    }
}
