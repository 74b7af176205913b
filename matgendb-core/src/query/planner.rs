//! Query planner
//!
//! Picks between a full collection scan and an equality lookup on an indexed field

use super::ast::Filter;
use crate::document::Value;

/// Execution strategy for a filter
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStrategy {
    /// Evaluate the filter against every document
    CollectionScan,
    /// Fetch candidates whose indexed `field` equals one of `keys`, then evaluate the filter
    IndexLookup { field: String, keys: Vec<Value> },
}

/// Query planner for creating execution plans
pub struct QueryPlanner;

impl QueryPlanner {
    /// Create an execution plan given the fields that carry an index
    pub fn create_plan(filter: &Filter, indexed_fields: &[String]) -> ExecutionStrategy {
        Self::index_candidate(filter, indexed_fields).unwrap_or(ExecutionStrategy::CollectionScan)
    }

    fn index_candidate(filter: &Filter, indexed_fields: &[String]) -> Option<ExecutionStrategy> {
        let is_indexed = |field: &str| indexed_fields.iter().any(|f| f == field);

        match filter {
            Filter::Eq { field, value } if is_indexed(field.as_str()) && is_index_key(value) => {
                Some(ExecutionStrategy::IndexLookup {
                    field: field.clone(),
                    keys: vec![value.clone()],
                })
            }
            Filter::In { field, values } if is_indexed(field.as_str()) && values.iter().all(is_index_key) => {
                Some(ExecutionStrategy::IndexLookup {
                    field: field.clone(),
                    keys: values.clone(),
                })
            }
            Filter::And(filters) => filters
                .iter()
                .find_map(|f| Self::index_candidate(f, indexed_fields)),
            _ => None,
        }
    }
}

/// Only scalars are looked up through an index. A null key also matches
/// documents lacking the field, which no index holds.
fn is_index_key(value: &Value) -> bool {
    !(value.is_null() || value.is_array() || value.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed() -> Vec<String> {
        vec!["task_id".to_string(), "chemsys".to_string()]
    }

    #[test]
    fn test_eq_on_indexed_field_uses_index() {
        let plan = QueryPlanner::create_plan(&Filter::eq("task_id", 12), &indexed());
        assert_eq!(
            plan,
            ExecutionStrategy::IndexLookup {
                field: "task_id".to_string(),
                keys: vec![Value::Int64(12)],
            }
        );
    }

    #[test]
    fn test_and_picks_first_indexable_child() {
        let filter = Filter::and(vec![
            Filter::gt("nelements", 1),
            Filter::in_values("chemsys", vec!["Li-O".into(), "O".into()]),
        ]);
        match QueryPlanner::create_plan(&filter, &indexed()) {
            ExecutionStrategy::IndexLookup { field, keys } => {
                assert_eq!(field, "chemsys");
                assert_eq!(keys.len(), 2);
            }
            other => panic!("Expected index lookup, got {:?}", other),
        }
    }

    #[test]
    fn test_unindexed_or_null_filters_scan() {
        assert_eq!(
            QueryPlanner::create_plan(&Filter::eq("pretty_formula", "Li2O"), &indexed()),
            ExecutionStrategy::CollectionScan
        );
        assert_eq!(
            QueryPlanner::create_plan(&Filter::eq("task_id", Value::Null), &indexed()),
            ExecutionStrategy::CollectionScan
        );
        assert_eq!(
            QueryPlanner::create_plan(&Filter::eq("task_id", Value::Array(vec![])), &indexed()),
            ExecutionStrategy::CollectionScan
        );
        assert_eq!(
            QueryPlanner::create_plan(
                &Filter::or(vec![Filter::eq("task_id", 1), Filter::eq("task_id", 2)]),
                &indexed()
            ),
            ExecutionStrategy::CollectionScan
        );
    }
}
