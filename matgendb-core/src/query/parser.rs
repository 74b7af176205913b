//! Query parser for converting JSON to Query AST
//!
//! Parses MongoDB-style criteria, projections and sorts into internal Query structures

use super::ast::{Filter, Projection, ProjectionType, Query, Sort, SortOrder, ELEMENT_FIELD};
use crate::document::Value;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Query parser for JSON queries
pub struct QueryParser;

impl QueryParser {
    /// Parse a full query document (`filter`, `projection`, `sort`, `skip`, `limit`)
    pub fn parse(json: &str) -> Result<Query, QueryParseError> {
        let value: JsonValue = serde_json::from_str(json)
            .map_err(|e| QueryParseError::InvalidJson(e.to_string()))?;

        Self::parse_from_value(&value)
    }

    /// Parse a query from a JSON value
    pub fn parse_from_value(value: &JsonValue) -> Result<Query, QueryParseError> {
        let obj = value
            .as_object()
            .ok_or_else(|| QueryParseError::InvalidFormat("Query must be an object".to_string()))?;

        let mut query = Query::new();

        if let Some(filter_value) = obj.get("filter") {
            query.filter = Self::parse_filter(filter_value)?;
        }

        if let Some(proj_value) = obj.get("projection") {
            query.projection = Some(Self::parse_projection(proj_value)?);
        }

        if let Some(sort_value) = obj.get("sort") {
            query.sort = Some(Self::parse_sort(sort_value)?);
        }

        if let Some(skip_value) = obj.get("skip") {
            query.skip = Some(skip_value.as_u64().ok_or_else(|| {
                QueryParseError::InvalidFormat("skip must be a non-negative number".to_string())
            })?);
        }

        if let Some(limit_value) = obj.get("limit") {
            query.limit = Some(limit_value.as_u64().ok_or_else(|| {
                QueryParseError::InvalidFormat("limit must be a non-negative number".to_string())
            })?);
        }

        Self::validate(&query)?;
        Ok(query)
    }

    /// Parse criteria (a MongoDB filter document)
    pub fn parse_filter(value: &JsonValue) -> Result<Filter, QueryParseError> {
        match value {
            JsonValue::Object(obj) => Self::parse_filter_object(obj),
            _ => Err(QueryParseError::InvalidFormat(
                "Filter must be an object".to_string(),
            )),
        }
    }

    /// Parse criteria given as a JSON object map
    pub fn parse_filter_object(obj: &JsonMap<String, JsonValue>) -> Result<Filter, QueryParseError> {
        let mut filters = Vec::with_capacity(obj.len());

        for (key, val) in obj {
            if key.starts_with('$') {
                let filter = match key.as_str() {
                    "$and" => Filter::And(Self::parse_filter_list(key, val)?),
                    "$or" => Filter::Or(Self::parse_filter_list(key, val)?),
                    "$nor" => Filter::Nor(Self::parse_filter_list(key, val)?),
                    "$not" => Filter::Not(Box::new(Self::parse_filter(val)?)),
                    "$comment" => continue,
                    _ => return Err(QueryParseError::UnsupportedOperator(key.clone())),
                };
                filters.push(filter);
            } else {
                filters.push(Self::parse_field_condition(key, val)?);
            }
        }

        Ok(Self::combine(filters))
    }

    fn parse_filter_list(op: &str, value: &JsonValue) -> Result<Vec<Filter>, QueryParseError> {
        let arr = value
            .as_array()
            .ok_or_else(|| QueryParseError::InvalidFormat(format!("{} must be an array", op)))?;
        if arr.is_empty() {
            return Err(QueryParseError::InvalidFormat(format!(
                "{} must be a non-empty array",
                op
            )));
        }
        arr.iter().map(Self::parse_filter).collect()
    }

    fn combine(mut filters: Vec<Filter>) -> Filter {
        match filters.len() {
            0 => Filter::Empty,
            1 => filters.remove(0),
            _ => Filter::And(filters),
        }
    }

    /// Parse a field condition
    fn parse_field_condition(field: &str, value: &JsonValue) -> Result<Filter, QueryParseError> {
        let obj = match value {
            JsonValue::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
            // Literal values and plain sub-documents compare for equality
            _ => return Ok(Filter::eq(field, Value::from(value))),
        };

        if obj.keys().any(|k| !k.starts_with('$')) {
            return Err(QueryParseError::InvalidFormat(format!(
                "cannot mix operators and literal fields in condition on '{}'",
                field
            )));
        }

        let mut filters = Vec::with_capacity(obj.len());

        for (op, val) in obj {
            let filter = match op.as_str() {
                "$eq" => Filter::eq(field, Value::from(val)),
                "$ne" => Filter::ne(field, Value::from(val)),
                "$gt" => Filter::gt(field, Value::from(val)),
                "$gte" => Filter::gte(field, Value::from(val)),
                "$lt" => Filter::lt(field, Value::from(val)),
                "$lte" => Filter::lte(field, Value::from(val)),
                "$in" => Filter::in_values(field, Self::parse_value_list(op, val)?),
                "$nin" => Filter::nin(field, Self::parse_value_list(op, val)?),
                "$all" => Filter::all(field, Self::parse_value_list(op, val)?),
                "$size" => {
                    let size = val.as_u64().ok_or_else(|| {
                        QueryParseError::InvalidFormat("$size must be a non-negative integer".to_string())
                    })?;
                    Filter::Size {
                        field: field.to_string(),
                        size: size as usize,
                    }
                }
                "$exists" => {
                    let exists = match val {
                        JsonValue::Bool(b) => *b,
                        JsonValue::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
                        _ => {
                            return Err(QueryParseError::InvalidFormat(
                                "$exists must be a boolean".to_string(),
                            ))
                        }
                    };
                    Filter::exists(field, exists)
                }
                "$regex" => {
                    let pattern = val.as_str().ok_or_else(|| {
                        QueryParseError::InvalidFormat("$regex must be a string".to_string())
                    })?;
                    Filter::Regex {
                        field: field.to_string(),
                        pattern: pattern.to_string(),
                        options: obj.get("$options").and_then(|v| v.as_str()).map(String::from),
                    }
                }
                "$options" => {
                    if !obj.contains_key("$regex") {
                        return Err(QueryParseError::InvalidFormat(
                            "$options requires $regex".to_string(),
                        ));
                    }
                    continue;
                }
                "$not" => {
                    let inner = match val {
                        JsonValue::Object(inner) if !inner.is_empty() => {
                            Self::parse_field_condition(field, val)?
                        }
                        _ => {
                            return Err(QueryParseError::InvalidFormat(
                                "$not needs an operator expression".to_string(),
                            ))
                        }
                    };
                    Filter::not(inner)
                }
                "$elemMatch" => {
                    let body = val.as_object().ok_or_else(|| {
                        QueryParseError::InvalidFormat("$elemMatch must be an object".to_string())
                    })?;
                    let on_element = !body.is_empty()
                        && body
                            .keys()
                            .all(|k| k.starts_with('$') && !matches!(k.as_str(), "$and" | "$or" | "$nor"));
                    let inner = if on_element {
                        Self::parse_field_condition(ELEMENT_FIELD, val)?
                    } else {
                        Self::parse_filter_object(body)?
                    };
                    Filter::ElemMatch {
                        field: field.to_string(),
                        filter: Box::new(inner),
                    }
                }
                _ => {
                    return Err(QueryParseError::UnsupportedOperator(op.clone()));
                }
            };
            filters.push(filter);
        }

        Ok(Self::combine(filters))
    }

    fn parse_value_list(op: &str, value: &JsonValue) -> Result<Vec<Value>, QueryParseError> {
        let arr = value
            .as_array()
            .ok_or_else(|| QueryParseError::InvalidFormat(format!("{} must be an array", op)))?;
        Ok(arr.iter().map(Value::from).collect())
    }

    /// Parse projection from JSON
    pub fn parse_projection(value: &JsonValue) -> Result<Projection, QueryParseError> {
        let obj = value.as_object().ok_or_else(|| {
            QueryParseError::InvalidFormat("Projection must be an object".to_string())
        })?;

        let mut projection = Projection::new();

        for (field, val) in obj {
            let include = match val {
                JsonValue::Number(n) => match n.as_i64() {
                    Some(0) => false,
                    Some(1) => true,
                    _ => {
                        return Err(QueryParseError::InvalidFormat(
                            "Projection value must be 0 or 1".to_string(),
                        ))
                    }
                },
                JsonValue::Bool(b) => *b,
                _ => {
                    return Err(QueryParseError::InvalidFormat(
                        "Projection value must be 0, 1, true, or false".to_string(),
                    ))
                }
            };

            projection = if include {
                projection.include(field)
            } else {
                projection.exclude(field)
            };
        }

        Self::validate_projection(&projection)?;
        Ok(projection)
    }

    /// Parse sort from JSON
    pub fn parse_sort(value: &JsonValue) -> Result<Sort, QueryParseError> {
        let obj = value.as_object().ok_or_else(|| {
            QueryParseError::InvalidFormat("Sort must be an object".to_string())
        })?;

        let mut sort = Sort::new();

        for (field, val) in obj {
            let order = match val {
                JsonValue::Number(n) => match n.as_i64() {
                    Some(1) => SortOrder::Ascending,
                    Some(-1) => SortOrder::Descending,
                    _ => {
                        return Err(QueryParseError::InvalidFormat(
                            "Sort value must be 1 or -1".to_string(),
                        ))
                    }
                },
                JsonValue::String(s) => match s.as_str() {
                    "asc" | "ascending" => SortOrder::Ascending,
                    "desc" | "descending" => SortOrder::Descending,
                    _ => {
                        return Err(QueryParseError::InvalidFormat(
                            "Sort value must be 'asc' or 'desc'".to_string(),
                        ))
                    }
                },
                _ => {
                    return Err(QueryParseError::InvalidFormat(
                        "Sort value must be 1, -1, 'asc', or 'desc'".to_string(),
                    ))
                }
            };

            sort = sort.add(field, order);
        }

        Ok(sort)
    }

    /// Validate a query
    pub fn validate(query: &Query) -> Result<(), QueryParseError> {
        match &query.projection {
            Some(projection) => Self::validate_projection(projection),
            None => Ok(()),
        }
    }

    fn validate_projection(projection: &Projection) -> Result<(), QueryParseError> {
        let has_non_id_exclusion = projection
            .fields
            .iter()
            .any(|(k, v)| k != "_id" && *v == ProjectionType::Exclude);

        if projection.is_inclusion() && has_non_id_exclusion {
            return Err(QueryParseError::ValidationError(
                "Cannot mix inclusion and exclusion in projection (except _id)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Query parsing errors
#[derive(Debug, thiserror::Error)]
pub enum QueryParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
