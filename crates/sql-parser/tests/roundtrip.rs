//! Printing any statement the grammar can produce and parsing it back yields
//! the same AST.

use nsdb_lib::BitValue;
use nsdb_sql_parser::ast::*;
use nsdb_sql_parser::StatementParser;
use proptest::collection::{btree_map, vec};
use proptest::option;
use proptest::prelude::*;

/// Words the printer may not emit as bare identifiers.
const RESERVED: &[&str] = &[
    "select", "from", "where", "group", "by", "order", "desc", "limit", "insert", "into", "ts",
    "dim", "val", "delete", "drop", "not", "and", "or", "in", "now", "sum", "min", "max", "count",
];

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("reserved word", |s| !RESERVED.contains(&s.as_str()))
}

fn long() -> impl Strategy<Value = i64> {
    0..1_000_000_000_000i64
}

// Sixteenths print as terminating decimals, which is all the FLOAT rule
// accepts back.
fn double() -> impl Strategy<Value = f64> {
    (0u32..1_000_000).prop_map(|n| n as f64 / 16.0)
}

fn string_value() -> impl Strategy<Value = String> {
    "[a-z0-9 ]{0,10}"
}

fn literal() -> impl Strategy<Value = BitValue> {
    prop_oneof![
        long().prop_map(BitValue::Long),
        double().prop_map(BitValue::Double),
        string_value().prop_map(BitValue::String),
    ]
}

fn numeric_literal() -> impl Strategy<Value = BitValue> {
    prop_oneof![
        long().prop_map(BitValue::Long),
        double().prop_map(BitValue::Double),
    ]
}

fn comparison_operator() -> impl Strategy<Value = ComparisonOperator> {
    prop_oneof![
        Just(ComparisonOperator::Greater),
        Just(ComparisonOperator::GreaterOrEqual),
        Just(ComparisonOperator::Less),
        Just(ComparisonOperator::LessOrEqual),
    ]
}

fn logical_operator() -> impl Strategy<Value = LogicalOperator> {
    prop_oneof![Just(LogicalOperator::And), Just(LogicalOperator::Or)]
}

fn term() -> impl Strategy<Value = Expression> {
    prop_oneof![
        (ident(), long(), long()).prop_map(|(dimension, from, to)| Expression::Range {
            dimension,
            from,
            to,
        }),
        (ident(), comparison_operator(), long()).prop_map(|(dimension, operator, value)| {
            Expression::Comparison {
                dimension,
                operator,
                value,
            }
        }),
        (ident(), literal()).prop_map(|(dimension, value)| Expression::Equality {
            dimension,
            value,
        }),
    ]
}

/// A pure left fold of terms: the only shape `AND`/`OR` chains parse to.
fn chain() -> impl Strategy<Value = Expression> {
    (term(), vec((logical_operator(), term()), 0..3)).prop_map(|(first, rest)| {
        rest.into_iter()
            .fold(first, |left, (operator, right)| Expression::Logical {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            })
    })
}

/// Grammar-shaped expressions: a chain, a `NOT` over an expression, or a
/// chain whose trailing operand is a `NOT` that swallows the rest.
fn expression() -> impl Strategy<Value = Expression> {
    chain().prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            inner
                .clone()
                .prop_map(|e| Expression::Not(Box::new(e))),
            (chain(), logical_operator(), inner).prop_map(|(left, operator, rest)| {
                Expression::Logical {
                    left: Box::new(left),
                    operator,
                    right: Box::new(Expression::Not(Box::new(rest))),
                }
            }),
        ]
    })
}

fn field() -> impl Strategy<Value = Field> {
    let aggregation = prop_oneof![
        Just(None),
        Just(Some(Aggregation::Sum)),
        Just(Some(Aggregation::Min)),
        Just(Some(Aggregation::Max)),
        Just(Some(Aggregation::Count)),
    ];
    (ident(), aggregation).prop_map(|(name, aggregation)| Field { name, aggregation })
}

fn select_statement() -> impl Strategy<Value = Statement> {
    let fields = prop_oneof![
        Just(SelectedFields::All),
        vec(field(), 1..3).prop_map(SelectedFields::List),
    ];
    let order_by = (ident(), prop_oneof![Just(OrderDirection::Asc), Just(OrderDirection::Desc)])
        .prop_map(|(dimension, direction)| OrderClause {
            dimension,
            direction,
        });
    (
        ident(),
        fields,
        option::of(expression()),
        option::of(ident()),
        option::of(order_by),
        option::of(0usize..1000),
    )
        .prop_map(|(metric, fields, condition, group_by, order_by, limit)| {
            Statement::Select(SelectStatement {
                namespace: "registry".to_owned(),
                metric,
                fields,
                condition,
                group_by,
                order_by,
                limit,
            })
        })
}

fn insert_statement() -> impl Strategy<Value = Statement> {
    (
        ident(),
        option::of(long()),
        btree_map(ident(), literal(), 0..3),
        numeric_literal(),
    )
        .prop_map(|(metric, timestamp, dimensions, value)| {
            Statement::Insert(InsertStatement {
                namespace: "registry".to_owned(),
                metric,
                timestamp,
                dimensions,
                value,
            })
        })
}

fn delete_statement() -> impl Strategy<Value = Statement> {
    (ident(), expression()).prop_map(|(metric, condition)| {
        Statement::Delete(DeleteStatement {
            namespace: "registry".to_owned(),
            metric,
            condition,
        })
    })
}

fn drop_statement() -> impl Strategy<Value = Statement> {
    ident().prop_map(|metric| {
        Statement::Drop(DropStatement {
            namespace: "registry".to_owned(),
            metric,
        })
    })
}

fn statement() -> impl Strategy<Value = Statement> {
    prop_oneof![
        select_statement(),
        insert_statement(),
        delete_statement(),
        drop_statement(),
    ]
}

proptest! {
    #[test]
    fn printed_statements_parse_back(statement in statement()) {
        let printed = statement.to_string();
        let reparsed = StatementParser::with_now(0)
            .parse("registry", &printed)
            .unwrap_or_else(|e| panic!("failed to reparse `{printed}`: {e}"));
        prop_assert_eq!(reparsed, statement);
    }
}
