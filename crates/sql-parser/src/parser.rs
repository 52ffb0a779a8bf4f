use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use nsdb_lib::BitValue;

use crate::ast::*;
use crate::lexer::{tokenize, Spanned, Token};
use crate::ParseError;

/// Parses query strings against a context namespace.
///
/// `NOW` resolves to the wall clock captured when the parser is built;
/// [`StatementParser::with_now`] pins it for deterministic tests.
pub struct StatementParser {
    now: i64,
}

impl Default for StatementParser {
    fn default() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        StatementParser { now }
    }
}

impl StatementParser {
    pub fn with_now(now: i64) -> Self {
        StatementParser { now }
    }

    pub fn parse(&self, namespace: &str, input: &str) -> Result<Statement, ParseError> {
        let tokens = tokenize(input)?;
        Parser {
            input,
            tokens: &tokens,
            pos: 0,
            now: self.now,
            namespace,
        }
        .statement()
    }
}

/// One-shot convenience over [`StatementParser::default`].
pub fn parse_statement(namespace: &str, input: &str) -> Result<Statement, ParseError> {
    StatementParser::default().parse(namespace, input)
}

struct Parser<'a> {
    input: &'a str,
    tokens: &'a [Spanned],
    pos: usize,
    now: i64,
    namespace: &'a str,
}

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_SECOND: i64 = 1_000;

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|spanned| &spanned.token)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|spanned| spanned.offset)
            .unwrap_or(self.input.len());
        ParseError {
            message: message.into(),
            tail: self.input[offset..].to_owned(),
        }
    }

    fn eat_symbol(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, token: Token, what: &str) -> Result<(), ParseError> {
        if self.eat_symbol(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Ident(word)) = self.peek() {
            if word.eq_ignore_ascii_case(keyword) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    /// An identifier; `NOW` is reserved and rejected.
    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("now") => {
                Err(self.error(format!("`NOW` is reserved and cannot name a {what}")))
            }
            Some(Token::Ident(word)) => {
                self.pos += 1;
                Ok(word.clone())
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let statement = if self.eat_keyword("SELECT") {
            self.select()?
        } else if self.eat_keyword("INSERT") {
            self.expect_keyword("INTO")?;
            self.insert()?
        } else if self.eat_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            self.delete()?
        } else if self.eat_keyword("DROP") {
            self.drop_statement()?
        } else {
            return Err(self.error("expected SELECT, INSERT, DELETE or DROP"));
        };
        // The terminating `;` is appended when missing.
        self.eat_symbol(&Token::Semi);
        if self.pos != self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(statement)
    }

    fn select(&mut self) -> Result<Statement, ParseError> {
        let fields = if self.eat_symbol(&Token::Star) {
            SelectedFields::All
        } else {
            let mut list = vec![self.field()?];
            while self.eat_symbol(&Token::Comma) {
                list.push(self.field()?);
            }
            SelectedFields::List(list)
        };
        self.expect_keyword("FROM")?;
        let metric = self.ident("metric name")?;

        let condition = if self.eat_keyword("WHERE") {
            Some(self.expression()?)
        } else {
            None
        };
        let group_by = if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            Some(self.ident("grouping dimension")?)
        } else {
            None
        };
        let order_by = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let dimension = self.ident("ordering dimension")?;
            let direction = if self.eat_keyword("DESC") {
                OrderDirection::Desc
            } else {
                OrderDirection::Asc
            };
            Some(OrderClause {
                dimension,
                direction,
            })
        } else {
            None
        };
        let limit = if self.eat_keyword("LIMIT") {
            match self.bump() {
                Some(Token::Long(n)) => Some(*n as usize),
                _ => return Err(self.error("expected limit count")),
            }
        } else {
            None
        };

        Ok(Statement::Select(SelectStatement {
            namespace: self.namespace.to_owned(),
            metric,
            fields,
            condition,
            group_by,
            order_by,
            limit,
        }))
    }

    fn field(&mut self) -> Result<Field, ParseError> {
        let name = self.ident("field name")?;
        if let Some(aggregation) = Aggregation::from_keyword(&name) {
            if self.eat_symbol(&Token::LParen) {
                let inner = self.ident("aggregated field")?;
                self.expect_symbol(Token::RParen, "`)`")?;
                return Ok(Field {
                    name: inner,
                    aggregation: Some(aggregation),
                });
            }
        }
        Ok(Field {
            name,
            aggregation: None,
        })
    }

    /// The alternation order is load-bearing: `range` first, then the unary
    /// `NOT`, then the tupled fold, then `comparison`, then `equality`.
    fn expression(&mut self) -> Result<Expression, ParseError> {
        if self.eat_keyword("NOT") {
            return Ok(Expression::Not(Box::new(self.expression()?)));
        }
        let mut left = self.term()?;
        while let Some(operator) = self.logical_operator() {
            // `AND`/`OR` associate left; a `NOT` on the right swallows the
            // rest of the expression.
            let right = if matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case("not"))
            {
                self.expression()?
            } else {
                self.term()?
            };
            left = Expression::Logical {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_operator(&mut self) -> Option<LogicalOperator> {
        if self.eat_keyword("AND") {
            Some(LogicalOperator::And)
        } else if self.eat_keyword("OR") {
            Some(LogicalOperator::Or)
        } else {
            None
        }
    }

    /// Tries `range`, `comparison`, `equality` in that order, backtracking
    /// between attempts. The reported failure is the one that consumed the
    /// most input.
    fn term(&mut self) -> Result<Expression, ParseError> {
        let start = self.pos;
        let mut best: Option<(usize, ParseError)> = None;
        let keep_best = |progress: usize, error: ParseError, best: &mut Option<(usize, ParseError)>| {
            if best.as_ref().map_or(true, |(at, _)| progress > *at) {
                *best = Some((progress, error));
            }
        };
        match self.range() {
            Ok(range) => return Ok(range),
            Err(error) => keep_best(self.pos, error, &mut best),
        }
        self.pos = start;
        match self.comparison() {
            Ok(comparison) => return Ok(comparison),
            Err(error) => keep_best(self.pos, error, &mut best),
        }
        self.pos = start;
        match self.equality() {
            Ok(equality) => return Ok(equality),
            Err(error) => keep_best(self.pos, error, &mut best),
        }
        self.pos = start;
        Err(best.expect("every failed attempt records an error").1)
    }

    fn range(&mut self) -> Result<Expression, ParseError> {
        let dimension = self.ident("dimension")?;
        self.expect_keyword("IN")?;
        self.expect_symbol(Token::LParen, "`(`")?;
        let from = self.timestamp()?;
        self.expect_symbol(Token::Comma, "`,`")?;
        let to = self.timestamp()?;
        self.expect_symbol(Token::RParen, "`)`")?;
        Ok(Expression::Range {
            dimension,
            from,
            to,
        })
    }

    fn comparison(&mut self) -> Result<Expression, ParseError> {
        let dimension = self.ident("dimension")?;
        let operator = match self.peek() {
            Some(Token::Gt) => ComparisonOperator::Greater,
            Some(Token::GtEq) => ComparisonOperator::GreaterOrEqual,
            Some(Token::Lt) => ComparisonOperator::Less,
            Some(Token::LtEq) => ComparisonOperator::LessOrEqual,
            _ => return Err(self.error("expected comparison operator")),
        };
        self.pos += 1;
        let value = self.timestamp()?;
        Ok(Expression::Comparison {
            dimension,
            operator,
            value,
        })
    }

    fn equality(&mut self) -> Result<Expression, ParseError> {
        let dimension = self.ident("dimension")?;
        self.expect_symbol(Token::Eq, "`=`")?;
        let value = match self.peek() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                BitValue::String(s.clone())
            }
            Some(Token::Double(d)) => {
                self.pos += 1;
                BitValue::Double(*d)
            }
            Some(Token::Ident(word)) if !word.eq_ignore_ascii_case("now") => {
                self.pos += 1;
                BitValue::String(word.clone())
            }
            _ => BitValue::Long(self.timestamp()?),
        };
        Ok(Expression::Equality { dimension, value })
    }

    /// `timestamp ::= NOW [("+"|"-") LONG ("h"|"m"|"s")] | LONG`, resolved to
    /// epoch milliseconds.
    fn timestamp(&mut self) -> Result<i64, ParseError> {
        if self.eat_keyword("NOW") {
            let sign = if self.eat_symbol(&Token::Plus) {
                1
            } else if self.eat_symbol(&Token::Minus) {
                -1
            } else {
                return Ok(self.now);
            };
            let amount = match self.bump() {
                Some(Token::Long(n)) => *n,
                _ => return Err(self.error("expected delta amount")),
            };
            let unit = match self.bump() {
                Some(Token::Ident(u)) if u.eq_ignore_ascii_case("h") => MS_PER_HOUR,
                Some(Token::Ident(u)) if u.eq_ignore_ascii_case("m") => MS_PER_MINUTE,
                Some(Token::Ident(u)) if u.eq_ignore_ascii_case("s") => MS_PER_SECOND,
                _ => return Err(self.error("expected time unit h, m or s")),
            };
            return amount
                .checked_mul(unit)
                .and_then(|delta| {
                    if sign > 0 {
                        self.now.checked_add(delta)
                    } else {
                        self.now.checked_sub(delta)
                    }
                })
                .ok_or_else(|| self.error("time delta out of range"));
        }
        match self.bump() {
            Some(Token::Long(n)) => Ok(*n),
            _ => Err(self.error("expected timestamp")),
        }
    }

    fn insert(&mut self) -> Result<Statement, ParseError> {
        let metric = self.ident("metric name")?;
        let timestamp = if self.eat_keyword("TS") {
            self.expect_symbol(Token::Eq, "`=`")?;
            Some(self.timestamp()?)
        } else {
            None
        };
        let mut dimensions = BTreeMap::new();
        if self.eat_keyword("DIM") {
            self.expect_symbol(Token::LParen, "`(`")?;
            loop {
                let name = self.ident("dimension name")?;
                self.expect_symbol(Token::Eq, "`=`")?;
                dimensions.insert(name, self.literal()?);
                if !self.eat_symbol(&Token::Comma) {
                    break;
                }
            }
            self.expect_symbol(Token::RParen, "`)`")?;
        }
        self.expect_keyword("VAL")?;
        self.expect_symbol(Token::Eq, "`=`")?;
        let value = match self.bump() {
            Some(Token::Long(n)) => BitValue::Long(*n),
            Some(Token::Double(d)) => BitValue::Double(*d),
            _ => return Err(self.error("expected numeric value")),
        };
        Ok(Statement::Insert(InsertStatement {
            namespace: self.namespace.to_owned(),
            metric,
            timestamp,
            dimensions,
            value,
        }))
    }

    fn literal(&mut self) -> Result<BitValue, ParseError> {
        match self.peek() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(BitValue::String(s.clone()))
            }
            Some(Token::Double(d)) => {
                self.pos += 1;
                Ok(BitValue::Double(*d))
            }
            Some(Token::Long(n)) => {
                self.pos += 1;
                Ok(BitValue::Long(*n))
            }
            Some(Token::Ident(word)) if !word.eq_ignore_ascii_case("now") => {
                self.pos += 1;
                Ok(BitValue::String(word.clone()))
            }
            _ => Err(self.error("expected literal")),
        }
    }

    fn delete(&mut self) -> Result<Statement, ParseError> {
        let metric = self.ident("metric name")?;
        self.expect_keyword("WHERE")?;
        let condition = self.expression()?;
        Ok(Statement::Delete(DeleteStatement {
            namespace: self.namespace.to_owned(),
            metric,
            condition,
        }))
    }

    fn drop_statement(&mut self) -> Result<Statement, ParseError> {
        let metric = self.ident("metric name")?;
        Ok(Statement::Drop(DropStatement {
            namespace: self.namespace.to_owned(),
            metric,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Statement {
        StatementParser::with_now(0)
            .parse("registry", input)
            .unwrap()
    }

    fn select(input: &str) -> SelectStatement {
        match parse(input) {
            Statement::Select(s) => s,
            other => panic!("expected a select, got {other:?}"),
        }
    }

    #[test]
    fn star_select_with_limit() {
        assert_eq!(
            select("SELECT * FROM people LIMIT 1"),
            SelectStatement {
                namespace: "registry".into(),
                metric: "people".into(),
                fields: SelectedFields::All,
                condition: None,
                group_by: None,
                order_by: None,
                limit: Some(1),
            }
        );
    }

    #[test]
    fn now_deltas_resolve_at_parse_time() {
        let now = 1_700_000_000_000;
        let statement = StatementParser::with_now(now)
            .parse("registry", "SELECT value FROM x WHERE ts IN (NOW-1h, NOW)")
            .unwrap();
        let Statement::Select(select) = statement else {
            panic!("expected a select");
        };
        assert_eq!(
            select.condition,
            Some(Expression::Range {
                dimension: "ts".into(),
                from: now - 3_600_000,
                to: now,
            })
        );
        assert_eq!(
            select.fields,
            SelectedFields::List(vec![Field {
                name: "value".into(),
                aggregation: None,
            }])
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            select("select * from people limit 2;"),
            select("SELECT * FROM people LIMIT 2")
        );
    }

    #[test]
    fn aggregations_and_grouping() {
        let s = select("SELECT SUM(value) FROM disk GROUP BY host ORDER BY value DESC LIMIT 10");
        assert_eq!(
            s.fields,
            SelectedFields::List(vec![Field {
                name: "value".into(),
                aggregation: Some(Aggregation::Sum),
            }])
        );
        assert_eq!(s.group_by.as_deref(), Some("host"));
        assert_eq!(
            s.order_by,
            Some(OrderClause {
                dimension: "value".into(),
                direction: OrderDirection::Desc,
            })
        );
        assert_eq!(s.limit, Some(10));
    }

    #[test]
    fn aggregate_names_still_work_as_fields() {
        let s = select("SELECT count FROM x");
        assert_eq!(
            s.fields,
            SelectedFields::List(vec![Field {
                name: "count".into(),
                aggregation: None,
            }])
        );
    }

    #[test]
    fn equality_literals() {
        let cases = [
            ("name = john", BitValue::String("john".into())),
            ("name = 'john doe'", BitValue::String("john doe".into())),
            ("load = 1.5", BitValue::Double(1.5)),
            ("cores = 8", BitValue::Long(8)),
        ];
        for (clause, value) in cases {
            let s = select(&format!("SELECT * FROM x WHERE {clause}"));
            let dimension = clause.split_whitespace().next().unwrap().to_owned();
            assert_eq!(s.condition, Some(Expression::Equality { dimension, value }));
        }
    }

    #[test]
    fn tupled_operators_fold_left() {
        let s = select("SELECT * FROM x WHERE a = 1 AND b = 2 OR c = 3");
        assert_eq!(
            s.condition,
            Some(Expression::Logical {
                left: Box::new(Expression::Logical {
                    left: Box::new(Expression::Equality {
                        dimension: "a".into(),
                        value: BitValue::Long(1),
                    }),
                    operator: LogicalOperator::And,
                    right: Box::new(Expression::Equality {
                        dimension: "b".into(),
                        value: BitValue::Long(2),
                    }),
                }),
                operator: LogicalOperator::Or,
                right: Box::new(Expression::Equality {
                    dimension: "c".into(),
                    value: BitValue::Long(3),
                }),
            })
        );
    }

    #[test]
    fn not_binds_the_rest_of_the_expression() {
        let s = select("SELECT * FROM x WHERE NOT a = 1 AND b = 2");
        let Some(Expression::Not(inner)) = s.condition else {
            panic!("expected NOT at the root");
        };
        assert!(matches!(*inner, Expression::Logical { .. }));
    }

    #[test]
    fn comparisons_take_timestamps() {
        let s = select("SELECT * FROM x WHERE timestamp >= 100");
        assert_eq!(
            s.condition,
            Some(Expression::Comparison {
                dimension: "timestamp".into(),
                operator: ComparisonOperator::GreaterOrEqual,
                value: 100,
            })
        );
    }

    #[test]
    fn full_insert() {
        let statement = parse("INSERT INTO mem TS = 5 DIM (host = 'eu-1', cores = 4) VAL = 1.5");
        let Statement::Insert(insert) = statement else {
            panic!("expected an insert");
        };
        assert_eq!(insert.metric, "mem");
        assert_eq!(insert.timestamp, Some(5));
        assert_eq!(insert.value, BitValue::Double(1.5));
        assert_eq!(
            insert.dimensions.get("host"),
            Some(&BitValue::String("eu-1".into()))
        );
        assert_eq!(insert.dimensions.get("cores"), Some(&BitValue::Long(4)));
    }

    #[test]
    fn minimal_insert() {
        let Statement::Insert(insert) = parse("INSERT INTO mem VAL = 3") else {
            panic!("expected an insert");
        };
        assert_eq!(insert.timestamp, None);
        assert!(insert.dimensions.is_empty());
        assert_eq!(insert.value, BitValue::Long(3));
    }

    #[test]
    fn delete_requires_a_condition() {
        let Statement::Delete(delete) = parse("DELETE FROM mem WHERE timestamp < 100") else {
            panic!("expected a delete");
        };
        assert_eq!(delete.metric, "mem");
        assert!(matches!(delete.condition, Expression::Comparison { .. }));
        assert!(parse_statement("registry", "DELETE FROM mem").is_err());
    }

    #[test]
    fn drop_statement() {
        assert_eq!(
            parse("DROP mem"),
            Statement::Drop(DropStatement {
                namespace: "registry".into(),
                metric: "mem".into(),
            })
        );
    }

    #[test]
    fn rejects_trailing_input() {
        let error = parse_statement("registry", "DROP mem gone").unwrap_err();
        assert_eq!(error.tail, "gone");
    }

    #[test]
    fn rejects_string_values_in_insert() {
        let error = parse_statement("registry", "INSERT INTO mem VAL = 'oops'").unwrap_err();
        assert!(error.message.contains("numeric"));
    }

    #[test]
    fn rejects_reserved_now_as_name() {
        assert!(parse_statement("registry", "DROP now").is_err());
    }

    #[test]
    fn failures_carry_the_tail() {
        let error = parse_statement("registry", "SELECT * FROM people WHERE ts IN (1 2)")
            .unwrap_err();
        assert!(error.tail.starts_with("2)"), "tail was `{}`", error.tail);
    }
}
