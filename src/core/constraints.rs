use super::error::ConfigError;
use super::expression::CompiledExpression;
use super::types::{Bounds, RelationshipType};
use serde::{Deserialize, Serialize};

/// Relation between a tunable parameter and an expression over other parameters.
///
/// `=` ties the target to the expression at every evaluation (the target leaves the free
/// vector); `>=` and `<=` tighten the target's bounds once, at setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterRelation {
    pub target: String,
    pub relationship: RelationshipType,
    pub expression: String,
}

impl ParameterRelation {
    pub fn new(
        target: impl Into<String>,
        relationship: RelationshipType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            relationship,
            expression: expression.into(),
        }
    }
}

#[derive(Clone, Debug)]
struct CompiledRelation {
    target: usize,
    relationship: RelationshipType,
    compiled: CompiledExpression,
}

/// Relations compiled against an ordered parameter name list.
#[derive(Clone, Debug, Default)]
pub struct RelationSet {
    /// Ties in evaluation order: every tie follows the ties it reads from.
    ties: Vec<CompiledRelation>,
    limits: Vec<CompiledRelation>,
}

impl RelationSet {
    /// Compile `relations` against `names`, rejecting unknown names, duplicate ties and cycles.
    pub fn new(relations: &[ParameterRelation], names: &[String]) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(relations.len());
        for relation in relations {
            let target = names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(relation.target.trim()))
                .ok_or_else(|| ConfigError::UnknownParameter(relation.target.clone()))?;
            let expression = CompiledExpression::new(&relation.expression, names).map_err(|e| {
                ConfigError::InvalidRelation(format!("{} {}: {}", relation.target, relation.expression, e))
            })?;
            compiled.push(CompiledRelation {
                target,
                relationship: relation.relationship,
                compiled: expression,
            });
        }

        let (ties, limits): (Vec<_>, Vec<_>) = compiled
            .into_iter()
            .partition(|r| r.relationship == RelationshipType::Equals);

        for (i, tie) in ties.iter().enumerate() {
            if ties[..i].iter().any(|t| t.target == tie.target) {
                return Err(ConfigError::InvalidRelation(format!(
                    "'{}' is tied more than once",
                    names[tie.target]
                )));
            }
        }

        detect_cycles(&ties, names)?;

        Ok(Self {
            ties: evaluation_order(ties, names.len()),
            limits,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ties.is_empty() && self.limits.is_empty()
    }

    /// Whether the parameter at `index` is computed from a tie.
    pub fn is_tied(&self, index: usize) -> bool {
        self.ties.iter().any(|t| t.target == index)
    }

    /// Indices of tied parameters, in evaluation order.
    pub fn tied(&self) -> impl Iterator<Item = usize> + '_ {
        self.ties.iter().map(|t| t.target)
    }

    /// Overwrite every tied entry of `values` with its expression.
    pub fn apply_ties(&self, values: &mut [f64]) -> Result<(), String> {
        for tie in &self.ties {
            let value = tie
                .compiled
                .evaluate(values)
                .map_err(|e| format!("'{}': {}", tie.compiled.source(), e))?;
            values[tie.target] = value;
        }
        Ok(())
    }

    /// Narrow `bounds[i]` with every `>=`/`<=` relation targeting parameter `i`,
    /// evaluating the expressions at `values`.
    pub fn tighten_bounds(
        &self,
        names: &[String],
        values: &[f64],
        bounds: &mut [Bounds],
    ) -> Result<(), ConfigError> {
        for limit in &self.limits {
            let limit_value = limit.compiled.evaluate(values).map_err(|e| {
                ConfigError::InvalidRelation(format!("{}: {}", limit.compiled.source(), e))
            })?;
            let (lower, upper) = match limit.relationship {
                RelationshipType::GreaterThanOrEqual => (limit_value, f64::INFINITY),
                RelationshipType::LessThanOrEqual => (f64::NEG_INFINITY, limit_value),
                RelationshipType::Equals => continue,
            };
            let current = bounds[limit.target];
            bounds[limit.target] =
                current
                    .tighten(lower, upper)
                    .map_err(|_| ConfigError::InvertedBounds {
                        name: names[limit.target].clone(),
                        lower: current.lower.max(lower),
                        upper: current.upper.min(upper),
                    })?;
        }
        Ok(())
    }
}

/// Detect cyclic dependencies among ties
///
/// Uses depth-first search over the graph of source -> tied parameter edges.
fn detect_cycles(ties: &[CompiledRelation], names: &[String]) -> Result<(), ConfigError> {
    let param_count = names.len();
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); param_count];

    for tie in ties {
        for src_idx in tie.compiled.dependencies() {
            graph[src_idx].push(tie.target);
        }
    }

    let mut visited = vec![false; param_count];
    let mut rec_stack = vec![false; param_count];

    fn dfs(
        node: usize,
        graph: &[Vec<usize>],
        visited: &mut [bool],
        rec_stack: &mut [bool],
        names: &[String],
    ) -> Result<(), ConfigError> {
        visited[node] = true;
        rec_stack[node] = true;

        for &neighbor in &graph[node] {
            if !visited[neighbor] {
                dfs(neighbor, graph, visited, rec_stack, names)?;
            } else if rec_stack[neighbor] {
                return Err(ConfigError::InvalidRelation(format!(
                    "cyclic dependency involving parameter '{}'",
                    names[neighbor]
                )));
            }
        }

        rec_stack[node] = false;
        Ok(())
    }

    for i in 0..param_count {
        if !visited[i] {
            dfs(i, &graph, &mut visited, &mut rec_stack, names)?;
        }
    }

    Ok(())
}

/// Order acyclic ties so that each one is evaluated after the ties feeding it.
fn evaluation_order(ties: Vec<CompiledRelation>, param_count: usize) -> Vec<CompiledRelation> {
    let mut tie_of: Vec<Option<usize>> = vec![None; param_count];
    for (i, tie) in ties.iter().enumerate() {
        tie_of[tie.target] = Some(i);
    }

    fn visit(
        i: usize,
        ties: &[CompiledRelation],
        tie_of: &[Option<usize>],
        placed: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if placed[i] {
            return;
        }
        placed[i] = true;
        for dep in ties[i].compiled.dependencies() {
            if let Some(j) = tie_of[dep] {
                visit(j, ties, tie_of, placed, order);
            }
        }
        order.push(i);
    }

    let mut placed = vec![false; ties.len()];
    let mut order = Vec::with_capacity(ties.len());
    for i in 0..ties.len() {
        visit(i, &ties, &tie_of, &mut placed, &mut order);
    }

    let mut slots: Vec<Option<CompiledRelation>> = ties.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names() -> Vec<String> {
        ["R1", "R2", "R3", "C1"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ties_follow_their_sources() {
        let relations = vec![
            ParameterRelation::new("R3", RelationshipType::Equals, "R2 * 2"),
            ParameterRelation::new("R2", RelationshipType::Equals, "R1 + 1k"),
        ];
        let set = RelationSet::new(&relations, &names()).unwrap();
        assert_eq!(set.tied().collect::<Vec<_>>(), vec![1, 2]);

        let mut values = vec![1000.0, 0.0, 0.0, 1e-9];
        set.apply_ties(&mut values).unwrap();
        assert_relative_eq!(values[1], 2000.0);
        assert_relative_eq!(values[2], 4000.0);
    }

    #[test]
    fn rejects_cycles() {
        let relations = vec![
            ParameterRelation::new("R1", RelationshipType::Equals, "R2"),
            ParameterRelation::new("R2", RelationshipType::Equals, "R1 / 2"),
        ];
        let err = RelationSet::new(&relations, &names()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRelation(msg) if msg.contains("cyclic")));
    }

    #[test]
    fn rejects_unknown_names() {
        let relations = vec![ParameterRelation::new("R9", RelationshipType::Equals, "1k")];
        assert_eq!(
            RelationSet::new(&relations, &names()).unwrap_err(),
            ConfigError::UnknownParameter("R9".into())
        );
        let relations = vec![ParameterRelation::new("R1", RelationshipType::Equals, "R9")];
        assert!(RelationSet::new(&relations, &names()).is_err());
    }

    #[test]
    fn limits_tighten_bounds() {
        let relations = vec![
            ParameterRelation::new("R1", RelationshipType::GreaterThanOrEqual, "500"),
            ParameterRelation::new("R1", RelationshipType::LessThanOrEqual, "R2 * 2"),
        ];
        let set = RelationSet::new(&relations, &names()).unwrap();
        assert!(!set.is_tied(0));

        let values = vec![1e3, 1e3, 1e3, 1e-9];
        let mut bounds = vec![Bounds::new(1.0, 1e5).unwrap(); 4];
        set.tighten_bounds(&names(), &values, &mut bounds).unwrap();
        assert_eq!(bounds[0], Bounds { lower: 500.0, upper: 2000.0 });
        assert_eq!(bounds[1], Bounds { lower: 1.0, upper: 1e5 });
    }

    #[test]
    fn contradictory_limits_are_rejected() {
        let relations = vec![ParameterRelation::new("C1", RelationshipType::GreaterThanOrEqual, "1")];
        let set = RelationSet::new(&relations, &names()).unwrap();
        let mut bounds = vec![Bounds::new(0.0, 1e-6).unwrap(); 4];
        let err = set
            .tighten_bounds(&names(), &[0.0; 4], &mut bounds)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvertedBounds { name, .. } if name == "C1"));
    }
}
