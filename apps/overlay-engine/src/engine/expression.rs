//! Expression evaluation over a closed grammar.
//!
//! Math rules (`NODE_ARITHMETIC`) are parsed by a small recursive-descent
//! parser into an AST — identifiers, decimal literals, parenthesised groups
//! and `+ - * /` — and evaluated against a frozen calculation context. This
//! is deliberately not a general interpreter: no function calls, no
//! attribute access, no host-language evaluation.
//!
//! The same module folds the arithmetic trees of `FILTER_ARITHMETIC`
//! documents over their query results.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;

use crate::domain::{ArithmeticExpr, ArithmeticOp, Operand};
use crate::error::CalcError;

// ============================================================================
// Math-rule AST
// ============================================================================

/// Parsed form of a math-rule expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprAst {
    /// Decimal literal.
    Number(Decimal),
    /// Node reference.
    Ident(String),
    /// Binary operation.
    Binary {
        /// Operator.
        op: ArithmeticOp,
        /// Left operand.
        lhs: Box<ExprAst>,
        /// Right operand.
        rhs: Box<ExprAst>,
    },
    /// Unary negation.
    Negate(Box<ExprAst>),
}

impl ExprAst {
    /// All node identifiers referenced by the expression.
    #[must_use]
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Ident(name) => {
                out.insert(name.clone());
            }
            Self::Binary { lhs, rhs, .. } => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Self::Negate(inner) => inner.collect_identifiers(out),
        }
    }

    /// Evaluate with `resolve` supplying identifier values.
    ///
    /// # Errors
    ///
    /// Returns `CalcError::DivisionByZero` (tagged with `context`) when a
    /// divisor evaluates to zero.
    pub fn evaluate(
        &self,
        resolve: &dyn Fn(&str) -> Decimal,
        context: &str,
    ) -> Result<Decimal, CalcError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Ident(name) => Ok(resolve(name)),
            Self::Negate(inner) => Ok(-inner.evaluate(resolve, context)?),
            Self::Binary { op, lhs, rhs } => {
                let left = lhs.evaluate(resolve, context)?;
                let right = rhs.evaluate(resolve, context)?;
                apply(*op, left, right, context)
            }
        }
    }
}

fn apply(op: ArithmeticOp, lhs: Decimal, rhs: Decimal, context: &str) -> Result<Decimal, CalcError> {
    match op {
        ArithmeticOp::Add => Ok(lhs + rhs),
        ArithmeticOp::Subtract => Ok(lhs - rhs),
        ArithmeticOp::Multiply => Ok(lhs * rhs),
        ArithmeticOp::Divide => {
            if rhs.is_zero() {
                Err(CalcError::DivisionByZero {
                    context: context.to_string(),
                })
            } else {
                Ok(lhs / rhs)
            }
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = Decimal::from_str_exact(&text).map_err(|e| {
                    CalcError::validation(format!("invalid number '{text}' in expression: {e}"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(CalcError::validation(format!(
                    "unexpected character '{other}' in expression"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expr := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<ExprAst, CalcError> {
        let mut node = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' {
                ArithmeticOp::Add
            } else {
                ArithmeticOp::Subtract
            };
            self.advance();
            let rhs = self.term()?;
            node = ExprAst::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<ExprAst, CalcError> {
        let mut node = self.factor()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' {
                ArithmeticOp::Multiply
            } else {
                ArithmeticOp::Divide
            };
            self.advance();
            let rhs = self.factor()?;
            node = ExprAst::Binary {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
        Ok(node)
    }

    // factor := number | ident | '(' expr ')' | '-' factor
    fn factor(&mut self) -> Result<ExprAst, CalcError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(ExprAst::Number(value)),
            Some(Token::Ident(name)) => Ok(ExprAst::Ident(name)),
            Some(Token::Op('-')) => Ok(ExprAst::Negate(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(CalcError::validation(
                        "unbalanced parentheses in expression",
                    )),
                }
            }
            other => Err(CalcError::validation(format!(
                "unexpected token in expression: {other:?}"
            ))),
        }
    }
}

/// Parse a math-rule expression.
///
/// # Errors
///
/// Returns `CalcError::Validation` on any syntax error.
pub fn parse(input: &str) -> Result<ExprAst, CalcError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(CalcError::validation("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(CalcError::validation(format!(
            "trailing tokens in expression at position {}",
            parser.pos
        )));
    }
    Ok(ast)
}

// ============================================================================
// Filter-arithmetic folding
// ============================================================================

/// Fold a 2B expression tree over its query results.
///
/// Operators fold left-to-right over the operand list.
///
/// # Errors
///
/// `Validation` on unknown query ids or empty operand lists;
/// `DivisionByZero` when a divisor is zero.
pub fn fold_expression(
    expr: &ArithmeticExpr,
    results: &HashMap<String, Decimal>,
    context: &str,
) -> Result<Decimal, CalcError> {
    let mut values = expr.operands.iter().map(|operand| match operand {
        Operand::Constant { value } => Ok(*value),
        Operand::Query { query_id } => results.get(query_id).copied().ok_or_else(|| {
            CalcError::validation(format!("expression references unknown query '{query_id}'"))
        }),
        Operand::Expression { expression } => fold_expression(expression, results, context),
    });

    let mut acc = values.next().transpose()?.ok_or_else(|| {
        CalcError::validation("arithmetic expression has no operands".to_string())
    })?;
    for value in values {
        acc = apply(expr.operator, acc, value?, context)?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    fn eval(input: &str, resolve: impl Fn(&str) -> Decimal) -> Result<Decimal, CalcError> {
        parse(input)?.evaluate(&resolve, "test")
    }

    fn zero(_: &str) -> Decimal {
        Decimal::ZERO
    }

    #[test_case("1 + 2", dec!(3) ; "addition")]
    #[test_case("2 * 3 + 4", dec!(10) ; "precedence mul first")]
    #[test_case("2 + 3 * 4", dec!(14) ; "precedence add last")]
    #[test_case("(2 + 3) * 4", dec!(20) ; "parens")]
    #[test_case("10 - 4 - 3", dec!(3) ; "left associative subtraction")]
    #[test_case("100 / 4 / 5", dec!(5) ; "left associative division")]
    #[test_case("-5 + 8", dec!(3) ; "unary minus")]
    #[test_case("1.5 * 2", dec!(3.0) ; "decimal literal")]
    fn arithmetic(input: &str, expected: Decimal) {
        assert_eq!(eval(input, zero).unwrap(), expected);
    }

    #[test]
    fn identifiers_resolve_from_context() {
        let result = eval("NODE_A + NODE_B * 2", |name| match name {
            "NODE_A" => dec!(50),
            "NODE_B" => dec!(30),
            _ => Decimal::ZERO,
        })
        .unwrap();
        assert_eq!(result, dec!(110));
    }

    #[test]
    fn unknown_identifier_resolves_through_callback() {
        // The engine's context callback maps unknown nodes to zero.
        assert_eq!(eval("GHOST + 7", zero).unwrap(), dec!(7));
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let err = eval("1 / 0", zero).unwrap_err();
        assert_eq!(err.reason(), "DIVISION_BY_ZERO");
        let err = eval("1 / GHOST", zero).unwrap_err();
        assert_eq!(err.reason(), "DIVISION_BY_ZERO");
    }

    #[test]
    fn collects_identifiers() {
        let ast = parse("A + (B - A) / C").unwrap();
        let idents: Vec<String> = ast.identifiers().into_iter().collect();
        assert_eq!(idents, vec!["A", "B", "C"]);
    }

    #[test_case("" ; "empty")]
    #[test_case("1 +" ; "dangling operator")]
    #[test_case("(1 + 2" ; "unbalanced parens")]
    #[test_case("a b" ; "adjacent idents")]
    #[test_case("1 @ 2" ; "unknown character")]
    #[test_case("1..2" ; "malformed number")]
    fn syntax_errors(input: &str) {
        assert_eq!(parse(input).unwrap_err().reason(), "VALIDATION");
    }

    #[test]
    fn no_function_calls_in_grammar() {
        // An identifier followed by parens is two factors, not a call.
        assert!(parse("sum(A)").is_err());
    }

    #[test]
    fn fold_simple_document_expression() {
        let expr = ArithmeticExpr {
            operator: ArithmeticOp::Add,
            operands: vec![
                Operand::Query {
                    query_id: "q1".to_string(),
                },
                Operand::Query {
                    query_id: "q2".to_string(),
                },
            ],
        };
        let results = HashMap::from([
            ("q1".to_string(), dec!(180)),
            ("q2".to_string(), dec!(1900)),
        ]);
        assert_eq!(fold_expression(&expr, &results, "test").unwrap(), dec!(2080));
    }

    #[test]
    fn fold_nested_expression() {
        let expr = ArithmeticExpr {
            operator: ArithmeticOp::Subtract,
            operands: vec![
                Operand::Query {
                    query_id: "q1".to_string(),
                },
                Operand::Expression {
                    expression: Box::new(ArithmeticExpr {
                        operator: ArithmeticOp::Multiply,
                        operands: vec![
                            Operand::Constant { value: dec!(2) },
                            Operand::Query {
                                query_id: "q2".to_string(),
                            },
                        ],
                    }),
                },
            ],
        };
        let results = HashMap::from([
            ("q1".to_string(), dec!(100)),
            ("q2".to_string(), dec!(10)),
        ]);
        assert_eq!(fold_expression(&expr, &results, "test").unwrap(), dec!(80));
    }

    #[test]
    fn fold_division_by_zero() {
        let expr = ArithmeticExpr {
            operator: ArithmeticOp::Divide,
            operands: vec![
                Operand::Constant { value: dec!(1) },
                Operand::Constant { value: dec!(0) },
            ],
        };
        let err = fold_expression(&expr, &HashMap::new(), "test").unwrap_err();
        assert_eq!(err.reason(), "DIVISION_BY_ZERO");
    }

    #[test]
    fn fold_unknown_query_is_validation() {
        let expr = ArithmeticExpr {
            operator: ArithmeticOp::Add,
            operands: vec![Operand::Query {
                query_id: "missing".to_string(),
            }],
        };
        let err = fold_expression(&expr, &HashMap::new(), "test").unwrap_err();
        assert_eq!(err.reason(), "VALIDATION");
    }
}
