//! Query evaluation: filters, sort, pagination, join.
//!
//! The filter grammar is a tree of conditions under `and`/`or` groups:
//!
//! ```text
//! Filter    := { operator: "and"|"or", conditions: [Filter | Condition] }
//! Condition := { column, operator, value }
//! ```
//!
//! Comparison operators are `==`, `!=`, `>`, `>=`, `<`, `<=`, `in`,
//! `like` (case-insensitive regex), and `contains` (case-preserving
//! regex). A missing column evaluates every predicate to false; there
//! is no three-valued logic.

use crate::error::{DbError, DbResult};
use crate::types::Row;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Grouping operator for filter nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperator {
    /// Every condition must hold.
    And,
    /// At least one condition must hold.
    Or,
}

/// Comparison operator in a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// Equality.
    #[serde(rename = "==")]
    Eq,
    /// Inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Greater than.
    #[serde(rename = ">")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Less than.
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=")]
    Le,
    /// Membership in an array value.
    #[serde(rename = "in")]
    In,
    /// Case-insensitive regex match.
    #[serde(rename = "like")]
    Like,
    /// Case-preserving regex match.
    #[serde(rename = "contains")]
    Contains,
}

/// One leaf predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Column the predicate reads.
    pub column: String,
    /// Comparison operator.
    pub operator: CmpOp,
    /// Comparison value.
    pub value: Value,
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// A group of sub-filters under `and`/`or`.
    Group {
        /// Grouping operator.
        operator: GroupOperator,
        /// Sub-filters, evaluated left to right.
        conditions: Vec<Filter>,
    },
    /// A leaf condition.
    Condition(Condition),
}

impl Filter {
    /// Shorthand for a single condition.
    #[must_use]
    pub fn condition(column: impl Into<String>, operator: CmpOp, value: Value) -> Self {
        Self::Condition(Condition {
            column: column.into(),
            operator,
            value,
        })
    }

    /// Shorthand for an `and` group.
    #[must_use]
    pub fn all(conditions: Vec<Filter>) -> Self {
        Self::Group {
            operator: GroupOperator::And,
            conditions,
        }
    }

    /// Shorthand for an `or` group.
    #[must_use]
    pub fn any(conditions: Vec<Filter>) -> Self {
        Self::Group {
            operator: GroupOperator::Or,
            conditions,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Single-column sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    /// Column to sort on.
    pub column: String,
    /// Direction.
    pub direction: SortDirection,
}

/// Options for a query: filter, then sort, then offset/limit.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Rows must match this filter.
    pub filter: Option<Filter>,
    /// Sort applied after filtering; stable for equal keys.
    pub sort: Option<Sort>,
    /// Rows skipped after sorting.
    pub offset: Option<usize>,
    /// Maximum rows returned.
    pub limit: Option<usize>,
}

/// Join description: for each row, the first join-table row whose
/// `foreign_key` equals the row's `local_key` is merged in, join-table
/// fields winning on conflict. Rows without a match pass through
/// unmerged.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// The join table's name.
    pub table: String,
    /// Column of the base row compared against the join table.
    pub local_key: String,
    /// Column of the join-table row compared against `local_key`.
    pub foreign_key: String,
    /// When set, only these fields survive in the merged rows.
    pub projection: Option<Vec<String>>,
}

/// Evaluates a filter against one row.
///
/// # Errors
///
/// Returns a validation error for malformed predicates (`in` without
/// an array, `like`/`contains` without a valid pattern).
pub fn matches(row: &Row, filter: &Filter) -> DbResult<bool> {
    match filter {
        Filter::Group {
            operator,
            conditions,
        } => match operator {
            GroupOperator::And => {
                for sub in conditions {
                    if !matches(row, sub)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            GroupOperator::Or => {
                for sub in conditions {
                    if matches(row, sub)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        },
        Filter::Condition(cond) => {
            let Some(actual) = row.get(&cond.column) else {
                return Ok(false);
            };
            evaluate(actual, cond.operator, &cond.value)
        }
    }
}

fn evaluate(actual: &Value, op: CmpOp, expected: &Value) -> DbResult<bool> {
    match op {
        CmpOp::Eq => Ok(value_eq(actual, expected)),
        CmpOp::Ne => Ok(!value_eq(actual, expected)),
        CmpOp::Gt => Ok(compare(actual, expected) == Some(Ordering::Greater)),
        CmpOp::Ge => Ok(matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        CmpOp::Lt => Ok(compare(actual, expected) == Some(Ordering::Less)),
        CmpOp::Le => Ok(matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        )),
        CmpOp::In => {
            let Value::Array(candidates) = expected else {
                return Err(DbError::validation("'in' requires an array value"));
            };
            Ok(candidates.iter().any(|candidate| value_eq(actual, candidate)))
        }
        CmpOp::Like => regex_match(actual, expected, true),
        CmpOp::Contains => regex_match(actual, expected, false),
    }
}

fn regex_match(actual: &Value, pattern: &Value, case_insensitive: bool) -> DbResult<bool> {
    let Value::String(pattern) = pattern else {
        return Err(DbError::validation(
            "'like' and 'contains' require a string pattern",
        ));
    };
    let Value::String(actual) = actual else {
        return Ok(false);
    };
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| DbError::validation(format!("invalid pattern '{pattern}': {e}")))?;
    Ok(regex.is_match(actual))
}

/// Equality that treats numerically equal numbers as equal regardless
/// of integer/float representation.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering over numbers and strings; anything else is incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    None
}

/// Sorts rows by one column. The sort is stable, so rows with equal
/// (or incomparable) keys keep their insertion order.
pub fn sort_rows(rows: &mut [Row], sort: &Sort) {
    rows.sort_by(|a, b| {
        let ordering = match (a.get(&sort.column), b.get(&sort.column)) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Applies offset then limit.
#[must_use]
pub fn paginate(rows: Vec<Row>, offset: Option<usize>, limit: Option<usize>) -> Vec<Row> {
    rows.into_iter()
        .skip(offset.unwrap_or(0))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Runs filter → sort → paginate over a row sequence.
///
/// # Errors
///
/// Returns a validation error for malformed predicates.
pub fn run_query(rows: Vec<Row>, options: &QueryOptions) -> DbResult<Vec<Row>> {
    let mut selected = match &options.filter {
        Some(filter) => {
            let mut kept = Vec::new();
            for row in rows {
                if matches(&row, filter)? {
                    kept.push(row);
                }
            }
            kept
        }
        None => rows,
    };

    if let Some(sort) = &options.sort {
        sort_rows(&mut selected, sort);
    }
    Ok(paginate(selected, options.offset, options.limit))
}

/// Merges join-table rows into a row sequence.
#[must_use]
pub fn join_rows(rows: Vec<Row>, join_table: &[Row], spec: &JoinSpec) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let mut merged = row;
            if let Some(local) = merged.get(&spec.local_key).cloned() {
                let matched = join_table.iter().find(|candidate| {
                    candidate
                        .get(&spec.foreign_key)
                        .is_some_and(|foreign| value_eq(foreign, &local))
                });
                if let Some(join_row) = matched {
                    for (field, value) in join_row {
                        merged.insert(field.clone(), value.clone());
                    }
                }
            }
            if let Some(projection) = &spec.projection {
                merged.retain(|field, _| projection.iter().any(|keep| keep == field));
            }
            merged
        })
        .collect()
}

/// Collects the equality predicates of a top-level conjunction.
///
/// A bare `==` condition counts as a one-element conjunction; nested
/// `and` groups are flattened. Any `or` in the tree disqualifies index
/// assistance and yields an empty list.
#[must_use]
pub fn conjunction_equalities(filter: &Filter) -> Vec<(&str, &Value)> {
    let mut out = Vec::new();
    if collect_equalities(filter, &mut out) {
        out
    } else {
        Vec::new()
    }
}

fn collect_equalities<'a>(filter: &'a Filter, out: &mut Vec<(&'a str, &'a Value)>) -> bool {
    match filter {
        Filter::Condition(cond) => {
            if cond.operator == CmpOp::Eq {
                out.push((cond.column.as_str(), &cond.value));
            }
            true
        }
        Filter::Group {
            operator: GroupOperator::And,
            conditions,
        } => conditions.iter().all(|sub| collect_equalities(sub, out)),
        Filter::Group {
            operator: GroupOperator::Or,
            ..
        } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut row = Row::new();
        for (k, v) in pairs {
            row.insert((*k).to_string(), v.clone());
        }
        row
    }

    fn users() -> Vec<Row> {
        vec![
            row(&[("name", json!("Alice")), ("age", json!(30))]),
            row(&[("name", json!("Bob")), ("age", json!(25))]),
            row(&[("name", json!("Carol")), ("age", json!(35))]),
        ]
    }

    #[test]
    fn comparison_operators() {
        let r = row(&[("age", json!(30))]);
        let check = |op, value: Value| matches(&r, &Filter::condition("age", op, value)).unwrap();

        assert!(check(CmpOp::Eq, json!(30)));
        assert!(check(CmpOp::Eq, json!(30.0)));
        assert!(check(CmpOp::Ne, json!(31)));
        assert!(check(CmpOp::Gt, json!(29)));
        assert!(check(CmpOp::Ge, json!(30)));
        assert!(check(CmpOp::Lt, json!(31)));
        assert!(check(CmpOp::Le, json!(30)));
        assert!(!check(CmpOp::Gt, json!(30)));
    }

    #[test]
    fn string_ordering_is_lexical() {
        let r = row(&[("name", json!("Bob"))]);
        assert!(matches(&r, &Filter::condition("name", CmpOp::Gt, json!("Alice"))).unwrap());
        assert!(matches(&r, &Filter::condition("name", CmpOp::Lt, json!("Carol"))).unwrap());
    }

    #[test]
    fn mixed_types_never_order() {
        let r = row(&[("age", json!(30))]);
        assert!(!matches(&r, &Filter::condition("age", CmpOp::Gt, json!("20"))).unwrap());
        assert!(!matches(&r, &Filter::condition("age", CmpOp::Le, json!("99"))).unwrap());
    }

    #[test]
    fn missing_column_is_false() {
        let r = row(&[("name", json!("Alice"))]);
        assert!(!matches(&r, &Filter::condition("ghost", CmpOp::Eq, json!(1))).unwrap());
        assert!(!matches(&r, &Filter::condition("ghost", CmpOp::Ne, json!(1))).unwrap());
    }

    #[test]
    fn in_requires_array() {
        let r = row(&[("age", json!(30))]);
        assert!(matches(&r, &Filter::condition("age", CmpOp::In, json!([25, 30]))).unwrap());
        assert!(!matches(&r, &Filter::condition("age", CmpOp::In, json!([1, 2]))).unwrap());
        assert!(matches(&r, &Filter::condition("age", CmpOp::In, json!(30))).is_err());
    }

    #[test]
    fn like_is_case_insensitive_contains_is_not() {
        let r = row(&[("name", json!("Alice"))]);
        assert!(matches(&r, &Filter::condition("name", CmpOp::Like, json!("^ali"))).unwrap());
        assert!(!matches(&r, &Filter::condition("name", CmpOp::Contains, json!("^ali"))).unwrap());
        assert!(matches(&r, &Filter::condition("name", CmpOp::Contains, json!("lic"))).unwrap());
    }

    #[test]
    fn invalid_pattern_is_a_validation_error() {
        let r = row(&[("name", json!("Alice"))]);
        assert!(matches(&r, &Filter::condition("name", CmpOp::Like, json!("("))).is_err());
    }

    #[test]
    fn and_or_nesting() {
        let r = row(&[("age", json!(30)), ("city", json!("Kigali"))]);
        let filter = Filter::all(vec![
            Filter::condition("age", CmpOp::Ge, json!(18)),
            Filter::any(vec![
                Filter::condition("city", CmpOp::Eq, json!("Kigali")),
                Filter::condition("city", CmpOp::Eq, json!("Nairobi")),
            ]),
        ]);
        assert!(matches(&r, &filter).unwrap());

        let rejecting = Filter::all(vec![
            Filter::condition("age", CmpOp::Ge, json!(18)),
            Filter::condition("city", CmpOp::Eq, json!("Nairobi")),
        ]);
        assert!(!matches(&r, &rejecting).unwrap());
    }

    #[test]
    fn filter_parses_from_wire_shape() {
        let json = json!({
            "operator": "and",
            "conditions": [
                {"column": "age", "operator": ">=", "value": 30},
                {"column": "name", "operator": "like", "value": "^c"}
            ]
        });
        let filter: Filter = serde_json::from_value(json).unwrap();
        let Filter::Group { conditions, .. } = &filter else {
            panic!("expected a group");
        };
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let mut rows = vec![
            row(&[("name", json!("first")), ("age", json!(30))]),
            row(&[("name", json!("second")), ("age", json!(30))]),
            row(&[("name", json!("younger")), ("age", json!(20))]),
        ];
        sort_rows(
            &mut rows,
            &Sort {
                column: "age".to_string(),
                direction: SortDirection::Asc,
            },
        );
        assert_eq!(rows[0]["name"], json!("younger"));
        assert_eq!(rows[1]["name"], json!("first"));
        assert_eq!(rows[2]["name"], json!("second"));
    }

    #[test]
    fn seeded_sort_limit_offset_scenario() {
        // age >= 30, sorted by name asc, limit 1 offset 1 -> Carol
        let options = QueryOptions {
            filter: Some(Filter::condition("age", CmpOp::Ge, json!(30))),
            sort: Some(Sort {
                column: "name".to_string(),
                direction: SortDirection::Asc,
            }),
            offset: Some(1),
            limit: Some(1),
        };
        let result = run_query(users(), &options).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["name"], json!("Carol"));
    }

    #[test]
    fn descending_sort() {
        let options = QueryOptions {
            sort: Some(Sort {
                column: "age".to_string(),
                direction: SortDirection::Desc,
            }),
            ..QueryOptions::default()
        };
        let result = run_query(users(), &options).unwrap();
        assert_eq!(result[0]["name"], json!("Carol"));
        assert_eq!(result[2]["name"], json!("Bob"));
    }

    #[test]
    fn join_merges_with_join_table_precedence() {
        let orders = vec![row(&[
            ("id", json!("o1")),
            ("user_id", json!("u1")),
            ("status", json!("pending")),
        ])];
        let users = vec![row(&[
            ("id", json!("u1")),
            ("name", json!("Alice")),
            ("status", json!("active")),
        ])];

        let spec = JoinSpec {
            table: "users".to_string(),
            local_key: "user_id".to_string(),
            foreign_key: "id".to_string(),
            projection: None,
        };
        let joined = join_rows(orders, &users, &spec);
        assert_eq!(joined[0]["name"], json!("Alice"));
        // Join-table fields overwrite on conflict
        assert_eq!(joined[0]["status"], json!("active"));
        assert_eq!(joined[0]["id"], json!("u1"));
    }

    #[test]
    fn join_projection_limits_fields() {
        let orders = vec![row(&[("id", json!("o1")), ("user_id", json!("u1"))])];
        let users = vec![row(&[("id", json!("u1")), ("name", json!("Alice"))])];

        let spec = JoinSpec {
            table: "users".to_string(),
            local_key: "user_id".to_string(),
            foreign_key: "id".to_string(),
            projection: Some(vec!["name".to_string()]),
        };
        let joined = join_rows(orders, &users, &spec);
        assert_eq!(joined[0].len(), 1);
        assert_eq!(joined[0]["name"], json!("Alice"));
    }

    #[test]
    fn join_without_match_passes_row_through() {
        let orders = vec![row(&[("id", json!("o1")), ("user_id", json!("nobody"))])];
        let users = vec![row(&[("id", json!("u1"))])];

        let spec = JoinSpec {
            table: "users".to_string(),
            local_key: "user_id".to_string(),
            foreign_key: "id".to_string(),
            projection: None,
        };
        let joined = join_rows(orders, &users, &spec);
        assert_eq!(joined[0]["user_id"], json!("nobody"));
    }

    #[test]
    fn equalities_extracted_from_conjunctions_only() {
        let conjunction = Filter::all(vec![
            Filter::condition("a", CmpOp::Eq, json!(1)),
            Filter::all(vec![Filter::condition("b", CmpOp::Eq, json!(2))]),
            Filter::condition("c", CmpOp::Gt, json!(3)),
        ]);
        let eqs = conjunction_equalities(&conjunction);
        assert_eq!(eqs.len(), 2);
        assert_eq!(eqs[0].0, "a");
        assert_eq!(eqs[1].0, "b");

        let bare = Filter::condition("a", CmpOp::Eq, json!(1));
        assert_eq!(conjunction_equalities(&bare).len(), 1);

        let disjunction = Filter::any(vec![Filter::condition("a", CmpOp::Eq, json!(1))]);
        assert!(conjunction_equalities(&disjunction).is_empty());
    }
}
