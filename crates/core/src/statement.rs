//! Select/delete statement evaluation.
//!
//! The `WHERE` tree is evaluated inside the shard ([`matches`]), so filtering
//! happens next to the data; grouping, aggregation, ordering, limiting and
//! projection ([`apply_select`]) run at the read coordinator after the
//! replica results have been merged and deduplicated.

use std::cmp::Ordering;
use std::collections::HashSet;

use itertools::Itertools;
use nsdb_lib::{Bit, BitValue, FieldType, Schema, TIMESTAMP_FIELD, VALUE_FIELD};
use nsdb_sql_parser::{
    Aggregation, ComparisonOperator, Expression, Field, LogicalOperator, OrderDirection,
    SelectStatement, SelectedFields,
};
use thiserror::Error;

/// `ts` is accepted as a shorthand for the timestamp field in queries.
const TIMESTAMP_ALIAS: &str = "ts";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("cannot mix aggregated and plain fields")]
    MixedFields,
    #[error("at most one aggregation per statement")]
    MultipleAggregations,
    #[error("{aggregation} requires a numeric field, `{field}` is not")]
    NonNumericAggregate {
        aggregation: Aggregation,
        field: String,
    },
}

fn resolved_type(schema: &Schema, name: &str) -> Option<FieldType> {
    if name == TIMESTAMP_ALIAS {
        return Some(FieldType::Long);
    }
    schema.field(name)
}

fn check_field(schema: &Schema, name: &str) -> Result<(), StatementError> {
    resolved_type(schema, name)
        .map(|_| ())
        .ok_or_else(|| StatementError::UnknownField(name.to_owned()))
}

/// The value a query field resolves to on one record.
pub(crate) fn field_value(bit: &Bit, name: &str) -> Option<BitValue> {
    match name {
        TIMESTAMP_FIELD | TIMESTAMP_ALIAS => Some(BitValue::Long(bit.timestamp)),
        VALUE_FIELD => Some(bit.value.clone()),
        _ => bit.dimensions.get(name).cloned(),
    }
}

/// Checks that every field the expression touches exists for the schema.
pub fn check_expression(expression: &Expression, schema: &Schema) -> Result<(), StatementError> {
    match expression {
        Expression::Equality { dimension, .. }
        | Expression::Comparison { dimension, .. }
        | Expression::Range { dimension, .. } => check_field(schema, dimension),
        Expression::Not(inner) => check_expression(inner, schema),
        Expression::Logical { left, right, .. } => {
            check_expression(left, schema)?;
            check_expression(right, schema)
        }
    }
}

/// Validates a select against the schema: the condition's fields, the
/// selected fields, grouping and ordering.
pub fn check_select(statement: &SelectStatement, schema: &Schema) -> Result<(), StatementError> {
    if let Some(condition) = &statement.condition {
        check_expression(condition, schema)?;
    }
    if let SelectedFields::List(fields) = &statement.fields {
        let aggregated = fields.iter().filter(|f| f.aggregation.is_some()).count();
        if aggregated > 1 {
            return Err(StatementError::MultipleAggregations);
        }
        if aggregated > 0 && aggregated != fields.len() {
            return Err(StatementError::MixedFields);
        }
        for field in fields {
            check_field(schema, &field.name)?;
            // MIN/MAX order strings lexicographically; only SUM insists on
            // numbers. COUNT takes anything.
            if field.aggregation == Some(Aggregation::Sum)
                && resolved_type(schema, &field.name) == Some(FieldType::String)
            {
                return Err(StatementError::NonNumericAggregate {
                    aggregation: Aggregation::Sum,
                    field: field.name.clone(),
                });
            }
        }
    }
    if let Some(group_by) = &statement.group_by {
        check_field(schema, group_by)?;
    }
    if let Some(order_by) = &statement.order_by {
        check_field(schema, &order_by.dimension)?;
    }
    Ok(())
}

fn loose_eq(left: &BitValue, right: &BitValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Evaluates the expression against one record. Fields the record does not
/// carry match nothing.
pub fn matches(expression: &Expression, bit: &Bit) -> bool {
    match expression {
        Expression::Equality { dimension, value } => {
            field_value(bit, dimension).is_some_and(|actual| loose_eq(&actual, value))
        }
        Expression::Comparison {
            dimension,
            operator,
            value,
        } => field_value(bit, dimension)
            .and_then(|actual| actual.partial_cmp(&BitValue::Long(*value)))
            .is_some_and(|ordering| match operator {
                ComparisonOperator::Greater => ordering == Ordering::Greater,
                ComparisonOperator::GreaterOrEqual => ordering != Ordering::Less,
                ComparisonOperator::Less => ordering == Ordering::Less,
                ComparisonOperator::LessOrEqual => ordering != Ordering::Greater,
            }),
        // Both endpoints are inclusive.
        Expression::Range {
            dimension,
            from,
            to,
        } => field_value(bit, dimension).is_some_and(|actual| {
            let lower = actual.partial_cmp(&BitValue::Long(*from));
            let upper = actual.partial_cmp(&BitValue::Long(*to));
            lower.is_some_and(|o| o != Ordering::Less) && upper.is_some_and(|o| o != Ordering::Greater)
        }),
        Expression::Not(inner) => !matches(inner, bit),
        Expression::Logical {
            left,
            operator,
            right,
        } => match operator {
            LogicalOperator::And => matches(left, bit) && matches(right, bit),
            LogicalOperator::Or => matches(left, bit) || matches(right, bit),
        },
    }
}

/// Drops identity duplicates, keeping first occurrences: replicas of the
/// same record written to more than one node collapse to one.
pub fn dedup_records(records: Vec<Bit>) -> Vec<Bit> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.clone()))
        .collect()
}

/// Grouping, aggregation, projection, ordering and limit over an
/// already-filtered, already-deduplicated record set.
pub fn apply_select(
    statement: &SelectStatement,
    records: Vec<Bit>,
) -> Result<Vec<Bit>, StatementError> {
    let mut records = match &statement.fields {
        SelectedFields::All => records,
        SelectedFields::List(fields) => {
            match fields.iter().find(|field| field.aggregation.is_some()) {
                Some(aggregated) => aggregate(statement, aggregated, records)?,
                None => project(fields, records),
            }
        }
    };

    if let Some(order_by) = &statement.order_by {
        records.sort_by(|left, right| {
            let ordering = match (
                field_value(left, &order_by.dimension),
                field_value(right, &order_by.dimension),
            ) {
                (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            match order_by.direction {
                OrderDirection::Asc => ordering,
                OrderDirection::Desc => ordering.reverse(),
            }
        });
    }
    if let Some(limit) = statement.limit {
        records.truncate(limit);
    }
    Ok(records)
}

/// Named plain fields restrict the dimensions a record comes back with;
/// timestamp and value are always carried.
fn project(fields: &[Field], records: Vec<Bit>) -> Vec<Bit> {
    let keep: HashSet<&str> = fields.iter().map(|field| field.name.as_str()).collect();
    records
        .into_iter()
        .map(|mut record| {
            record.dimensions.retain(|name, _| keep.contains(name.as_str()));
            record
        })
        .collect()
}

fn aggregate(
    statement: &SelectStatement,
    field: &Field,
    records: Vec<Bit>,
) -> Result<Vec<Bit>, StatementError> {
    let aggregation = field.aggregation.expect("caller found an aggregation");
    match &statement.group_by {
        Some(dimension) => {
            let groups = records
                .into_iter()
                .filter_map(|record| {
                    field_value(&record, dimension).map(|group| (group, record))
                })
                .into_group_map();
            let mut results = Vec::with_capacity(groups.len());
            for (group, members) in groups {
                if let Some(record) = fold_group(aggregation, &field.name, &members)? {
                    results.push(
                        record.with_dimension(dimension.clone(), group),
                    );
                }
            }
            // Group order is stabilized by the grouping value.
            results.sort_by(|left, right| {
                let l = left.dimensions.get(dimension);
                let r = right.dimensions.get(dimension);
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            });
            Ok(results)
        }
        None => Ok(fold_group(aggregation, &field.name, &records)?
            .into_iter()
            .collect()),
    }
}

/// Reduces one group to a single record carrying the aggregate as its value
/// and the group's latest timestamp. `SUM`/`MIN`/`MAX` of an empty group is
/// no record; `COUNT` of an empty group is zero.
fn fold_group(
    aggregation: Aggregation,
    field: &str,
    members: &[Bit],
) -> Result<Option<Bit>, StatementError> {
    let values: Vec<BitValue> = members
        .iter()
        .filter_map(|member| field_value(member, field))
        .collect();
    let value = match aggregation {
        Aggregation::Count => Some(BitValue::Long(values.len() as i64)),
        Aggregation::Sum => {
            if values.is_empty() {
                None
            } else if values.iter().any(|v| matches!(v, BitValue::Double(_))) {
                let mut total = 0.0;
                for value in &values {
                    total += value.as_f64().ok_or_else(|| {
                        StatementError::NonNumericAggregate {
                            aggregation,
                            field: field.to_owned(),
                        }
                    })?;
                }
                Some(BitValue::Double(total))
            } else {
                let mut total = 0i64;
                for value in &values {
                    match value {
                        BitValue::Long(v) => total += v,
                        _ => {
                            return Err(StatementError::NonNumericAggregate {
                                aggregation,
                                field: field.to_owned(),
                            })
                        }
                    }
                }
                Some(BitValue::Long(total))
            }
        }
        Aggregation::Min | Aggregation::Max => {
            values.into_iter().reduce(|best, candidate| {
                let ordering = candidate.partial_cmp(&best).unwrap_or(Ordering::Equal);
                let replace = match aggregation {
                    Aggregation::Min => ordering == Ordering::Less,
                    _ => ordering == Ordering::Greater,
                };
                if replace {
                    candidate
                } else {
                    best
                }
            })
        }
    };
    let timestamp = members.iter().map(|member| member.timestamp).max().unwrap_or(0);
    Ok(value.map(|value| Bit::new(timestamp, value)))
}
