//! Typed statements produced by the parser.
//!
//! Every statement carries the namespace it was parsed against. The
//! `Display` impls print canonical SQL that parses back to the same AST.

use std::collections::BTreeMap;
use std::fmt;

use nsdb_lib::BitValue;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Delete(DeleteStatement),
    Drop(DropStatement),
}

impl Statement {
    pub fn namespace(&self) -> &str {
        match self {
            Statement::Select(s) => &s.namespace,
            Statement::Insert(s) => &s.namespace,
            Statement::Delete(s) => &s.namespace,
            Statement::Drop(s) => &s.namespace,
        }
    }

    pub fn metric(&self) -> &str {
        match self {
            Statement::Select(s) => &s.metric,
            Statement::Insert(s) => &s.metric,
            Statement::Delete(s) => &s.metric,
            Statement::Drop(s) => &s.metric,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectStatement {
    pub namespace: String,
    pub metric: String,
    pub fields: SelectedFields,
    pub condition: Option<Expression>,
    pub group_by: Option<String>,
    pub order_by: Option<OrderClause>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectedFields {
    /// `SELECT *`; cannot be mixed with named fields.
    All,
    List(Vec<Field>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub aggregation: Option<Aggregation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Min,
    Max,
    Count,
}

impl Aggregation {
    pub(crate) fn from_keyword(word: &str) -> Option<Aggregation> {
        match word.to_ascii_uppercase().as_str() {
            "SUM" => Some(Aggregation::Sum),
            "MIN" => Some(Aggregation::Min),
            "MAX" => Some(Aggregation::Max),
            "COUNT" => Some(Aggregation::Count),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderClause {
    pub dimension: String,
    pub direction: OrderDirection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertStatement {
    pub namespace: String,
    pub metric: String,
    /// Epoch milliseconds; the write path fills in the wall clock when absent.
    pub timestamp: Option<i64>,
    pub dimensions: BTreeMap<String, BitValue>,
    /// Always `Long` or `Double`.
    pub value: BitValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteStatement {
    pub namespace: String,
    pub metric: String,
    pub condition: Expression,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DropStatement {
    pub namespace: String,
    pub metric: String,
}

/// A `WHERE` tree over dimensions, `timestamp` and `value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    Equality {
        dimension: String,
        value: BitValue,
    },
    Comparison {
        dimension: String,
        operator: ComparisonOperator,
        value: i64,
    },
    /// Inclusive `dimension IN (from, to)`.
    Range {
        dimension: String,
        from: i64,
        to: i64,
    },
    Not(Box<Expression>),
    Logical {
        left: Box<Expression>,
        operator: LogicalOperator,
        right: Box<Expression>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

fn fmt_literal(f: &mut fmt::Formatter<'_>, value: &BitValue) -> fmt::Result {
    match value {
        BitValue::Long(v) => write!(f, "{v}"),
        BitValue::Double(v) => write!(f, "{v:?}"),
        BitValue::String(v) => write!(f, "'{v}'"),
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(s) => s.fmt(f),
            Statement::Insert(s) => s.fmt(f),
            Statement::Delete(s) => s.fmt(f),
            Statement::Drop(s) => s.fmt(f),
        }
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.fields, self.metric)?;
        if let Some(condition) = &self.condition {
            write!(f, " WHERE {condition}")?;
        }
        if let Some(group_by) = &self.group_by {
            write!(f, " GROUP BY {group_by}")?;
        }
        if let Some(order_by) = &self.order_by {
            write!(f, " ORDER BY {}", order_by.dimension)?;
            if order_by.direction == OrderDirection::Desc {
                write!(f, " DESC")?;
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectedFields::All => f.write_str("*"),
            SelectedFields::List(fields) => {
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    field.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.aggregation {
            Some(agg) => write!(f, "{agg}({})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregation::Sum => "SUM",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
            Aggregation::Count => "COUNT",
        })
    }
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {}", self.metric)?;
        if let Some(ts) = self.timestamp {
            write!(f, " TS = {ts}")?;
        }
        if !self.dimensions.is_empty() {
            f.write_str(" DIM (")?;
            for (i, (name, value)) in self.dimensions.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{name} = ")?;
                fmt_literal(f, value)?;
            }
            f.write_str(")")?;
        }
        f.write_str(" VAL = ")?;
        fmt_literal(f, &self.value)
    }
}

impl fmt::Display for DeleteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {} WHERE {}", self.metric, self.condition)
    }
}

impl fmt::Display for DropStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP {}", self.metric)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Equality { dimension, value } => {
                write!(f, "{dimension} = ")?;
                fmt_literal(f, value)
            }
            Expression::Comparison {
                dimension,
                operator,
                value,
            } => write!(f, "{dimension} {operator} {value}"),
            Expression::Range {
                dimension,
                from,
                to,
            } => write!(f, "{dimension} IN ({from}, {to})"),
            Expression::Not(inner) => write!(f, "NOT {inner}"),
            Expression::Logical {
                left,
                operator,
                right,
            } => write!(f, "{left} {operator} {right}"),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOperator::Greater => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::Less => "<",
            ComparisonOperator::LessOrEqual => "<=",
        })
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        })
    }
}
