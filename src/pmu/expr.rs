#![allow(missing_docs)]

use crate::{Error, Result};
use lazy_static::lazy_static;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::*;

/// Helper struct to parse metric formulas.
#[derive(Parser)]
#[grammar = "pmu/metric_parser.pest"]
struct MetricExprParser;

lazy_static! {
    /// `PrattParser` used internally to parse a metric formula.
    ///
    /// Precedence follows Python, which the formulas in existing event lists were written for:
    /// comparisons bind loosest and `**` binds tighter than a unary minus on its left.
    static ref PRATT: PrattParser<Rule> = {
        PrattParser::new()
            .op(Op::infix(Rule::eq, Assoc::Left)
                | Op::infix(Rule::ne, Assoc::Left)
                | Op::infix(Rule::lt, Assoc::Left)
                | Op::infix(Rule::le, Assoc::Left)
                | Op::infix(Rule::gt, Assoc::Left)
                | Op::infix(Rule::ge, Assoc::Left))
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left) | Op::infix(Rule::div, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos))
            .op(Op::infix(Rule::pow, Assoc::Right))
    };
}

/// Parsed (sub)expression of a metric formula.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricExpr {
    /// A constant number.
    Num(f64),
    /// A bracketed counter or constant token.
    Var(String),
    /// Unary minus.
    Neg(Box<MetricExpr>),
    /// Addition operator.
    Add(Box<MetricExpr>, Box<MetricExpr>),
    /// Subtraction operator.
    Sub(Box<MetricExpr>, Box<MetricExpr>),
    /// Multiplication operator.
    Mul(Box<MetricExpr>, Box<MetricExpr>),
    /// Division operator.
    Div(Box<MetricExpr>, Box<MetricExpr>),
    /// Exponentiation operator.
    Pow(Box<MetricExpr>, Box<MetricExpr>),
    /// `==`, 1 when true and 0 otherwise.
    Eq(Box<MetricExpr>, Box<MetricExpr>),
    /// `!=`
    Ne(Box<MetricExpr>, Box<MetricExpr>),
    /// `<`
    Lt(Box<MetricExpr>, Box<MetricExpr>),
    /// `<=`
    Le(Box<MetricExpr>, Box<MetricExpr>),
    /// `>`
    Gt(Box<MetricExpr>, Box<MetricExpr>),
    /// `>=`
    Ge(Box<MetricExpr>, Box<MetricExpr>),
    /// Link of a comparison chain, 1 when both sides are non-zero.
    And(Box<MetricExpr>, Box<MetricExpr>),
}

/// Subexpression produced while parsing, flagging unparenthesized comparisons so they chain.
struct Operand {
    expr: MetricExpr,
    comparison: bool,
}

impl From<MetricExpr> for Operand {
    fn from(expr: MetricExpr) -> Self {
        Operand {
            expr,
            comparison: false,
        }
    }
}

fn is_comparison(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::eq | Rule::ne | Rule::lt | Rule::le | Rule::gt | Rule::ge
    )
}

fn compare(rule: Rule, lhs: MetricExpr, rhs: MetricExpr) -> MetricExpr {
    let (l, r) = (Box::new(lhs), Box::new(rhs));
    match rule {
        Rule::eq => MetricExpr::Eq(l, r),
        Rule::ne => MetricExpr::Ne(l, r),
        Rule::lt => MetricExpr::Lt(l, r),
        Rule::le => MetricExpr::Le(l, r),
        Rule::gt => MetricExpr::Gt(l, r),
        Rule::ge => MetricExpr::Ge(l, r),
        _ => unreachable!(),
    }
}

impl MetricExpr {
    /// Create an new `MetricExpr` from a supplied `&str`.
    pub fn parse_str(input: &str) -> Result<MetricExpr> {
        let mut formula = MetricExprParser::parse(Rule::formula, input)?;
        match formula.next().and_then(|f| f.into_inner().next()) {
            Some(expr) => MetricExpr::_to_expr(expr.into_inner()),
            None => unreachable!(), // `formula` always wraps exactly one `expr`
        }
    }

    /// Recursive call to transform `Pair` objects into `MetricExpr`s.
    fn _to_expr(expr: Pairs<Rule>) -> Result<MetricExpr> {
        PRATT
            .map_primary(|pair: Pair<Rule>| match pair.as_rule() {
                Rule::num => Ok(Operand::from(MetricExpr::Num(pair.as_str().parse()?))),
                Rule::var => Ok(Operand::from(MetricExpr::Var(pair.as_str().trim().into()))),
                Rule::expr => MetricExpr::_to_expr(pair.into_inner()).map(Operand::from),
                _ => unreachable!(),
            })
            .map_prefix(|op: Pair<Rule>, rhs: Result<Operand>| match op.as_rule() {
                Rule::neg => Ok(Operand::from(MetricExpr::Neg(Box::new(rhs?.expr)))),
                Rule::pos => rhs.map(|x| Operand::from(x.expr)),
                _ => unreachable!(),
            })
            .map_infix(|lhs: Result<Operand>, op: Pair<Rule>, rhs: Result<Operand>| {
                let (lhs, rhs) = (lhs?, rhs?);
                let rule = op.as_rule();
                if is_comparison(rule) {
                    // `a < b < c` means `a < b and b < c`
                    let expr = if lhs.comparison {
                        let middle = lhs.expr.last_operand().clone();
                        MetricExpr::And(
                            Box::new(lhs.expr),
                            Box::new(compare(rule, middle, rhs.expr)),
                        )
                    } else {
                        compare(rule, lhs.expr, rhs.expr)
                    };
                    return Ok(Operand {
                        expr,
                        comparison: true,
                    });
                }
                let (l, r) = (Box::new(lhs.expr), Box::new(rhs.expr));
                Ok(Operand::from(match rule {
                    Rule::add => MetricExpr::Add(l, r),
                    Rule::sub => MetricExpr::Sub(l, r),
                    Rule::mul => MetricExpr::Mul(l, r),
                    Rule::div => MetricExpr::Div(l, r),
                    Rule::pow => MetricExpr::Pow(l, r),
                    _ => unreachable!(),
                }))
            })
            .parse(expr)
            .map(|x| x.expr)
    }

    /// Right hand side of the last comparison in a chain.
    fn last_operand(&self) -> &MetricExpr {
        match self {
            MetricExpr::And(_, ref b) => b.last_operand(),
            MetricExpr::Eq(_, ref b)
            | MetricExpr::Ne(_, ref b)
            | MetricExpr::Lt(_, ref b)
            | MetricExpr::Le(_, ref b)
            | MetricExpr::Gt(_, ref b)
            | MetricExpr::Ge(_, ref b) => &**b,
            x => x,
        }
    }

    /// Get names of all tokens used in this expression, in order of appearance.
    pub fn get_counters(&self) -> Vec<&String> {
        macro_rules! body {
            ($a:expr, $b:expr) => {{
                let mut tmp = $a.get_counters();
                tmp.extend($b.get_counters());
                tmp
            }};
        }
        match self {
            MetricExpr::Num(_) => vec![],
            MetricExpr::Var(ref x) => vec![x],
            MetricExpr::Neg(ref a) => a.get_counters(),
            MetricExpr::Add(ref a, ref b)
            | MetricExpr::Sub(ref a, ref b)
            | MetricExpr::Mul(ref a, ref b)
            | MetricExpr::Div(ref a, ref b)
            | MetricExpr::Pow(ref a, ref b)
            | MetricExpr::Eq(ref a, ref b)
            | MetricExpr::Ne(ref a, ref b)
            | MetricExpr::Lt(ref a, ref b)
            | MetricExpr::Le(ref a, ref b)
            | MetricExpr::Gt(ref a, ref b)
            | MetricExpr::Ge(ref a, ref b)
            | MetricExpr::And(ref a, ref b) => body!(a, b),
        }
    }

    /// Evaluate the expression, reading token values through `lookup`.
    ///
    /// Division by zero, including zero raised to a negative power, is reported as
    /// [`Error::DivideByZero`].
    pub fn eval<F>(&self, lookup: &F) -> Result<f64>
    where
        F: Fn(&str) -> Result<f64>,
    {
        macro_rules! cmp {
            ($a:expr, $op:tt, $b:expr) => {{
                if $a.eval(lookup)? $op $b.eval(lookup)? {
                    1.0
                } else {
                    0.0
                }
            }};
        }
        Ok(match self {
            MetricExpr::Num(n) => *n,
            MetricExpr::Var(ref x) => lookup(x.as_str())?,
            MetricExpr::Neg(ref a) => -a.eval(lookup)?,
            MetricExpr::Add(ref a, ref b) => a.eval(lookup)? + b.eval(lookup)?,
            MetricExpr::Sub(ref a, ref b) => a.eval(lookup)? - b.eval(lookup)?,
            MetricExpr::Mul(ref a, ref b) => a.eval(lookup)? * b.eval(lookup)?,
            MetricExpr::Div(ref a, ref b) => {
                let (n, d) = (a.eval(lookup)?, b.eval(lookup)?);
                if d == 0.0 {
                    return Err(Error::DivideByZero);
                }
                n / d
            }
            MetricExpr::Pow(ref a, ref b) => {
                let (base, exp) = (a.eval(lookup)?, b.eval(lookup)?);
                if base == 0.0 && exp < 0.0 {
                    return Err(Error::DivideByZero);
                }
                base.powf(exp)
            }
            MetricExpr::Eq(ref a, ref b) => cmp!(a, ==, b),
            MetricExpr::Ne(ref a, ref b) => cmp!(a, !=, b),
            MetricExpr::Lt(ref a, ref b) => cmp!(a, <, b),
            MetricExpr::Le(ref a, ref b) => cmp!(a, <=, b),
            MetricExpr::Gt(ref a, ref b) => cmp!(a, >, b),
            MetricExpr::Ge(ref a, ref b) => cmp!(a, >=, b),
            MetricExpr::And(ref a, ref b) => {
                if a.eval(lookup)? != 0.0 && b.eval(lookup)? != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval_with(input: &str, vars: &[(&str, f64)]) -> Result<f64> {
        let vars: HashMap<String, f64> = vars.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let lookup = |name: &str| {
            vars.get(name)
                .cloned()
                .ok_or_else(|| Error::UnresolvedCounter(name.into()))
        };
        MetricExpr::parse_str(input)?.eval(&lookup)
    }

    #[test]
    fn test_metric_expression() {
        let test_strings = vec![
            "[inst_retired] / [cpu_cycles]",
            "100 * ([stall_frontend] + [stall_backend]) / ([const_width] * [cpu_cycles])",
            "[s0.l1d_cache_refill] / [s0.l1d_cache] ** 2 - -1",
            "([br_mis_pred_retired] > 0) * [br_retired]",
        ];

        let metrics: Vec<MetricExpr> = test_strings
            .iter()
            .map(|x| {
                let expr = MetricExpr::parse_str(&x);
                assert!(expr.is_ok(), "{} -> {:?}", x, expr);
                expr.unwrap()
            })
            .collect();
        assert_eq!(test_strings.len(), metrics.len());

        let counters = metrics[1].get_counters();
        assert_eq!(
            counters,
            vec!["stall_frontend", "stall_backend", "const_width", "cpu_cycles"]
        );
        assert_eq!(metrics[2].get_counters().len(), 2);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_with("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(eval_with("(1 + 2) * 3", &[]).unwrap(), 9.0);
        assert_eq!(eval_with("2 ** 3 ** 2", &[]).unwrap(), 512.0);
        assert_eq!(eval_with("-2 ** 2", &[]).unwrap(), -4.0);
        assert_eq!(eval_with("2 ** -1", &[]).unwrap(), 0.5);
        assert_eq!(eval_with("8 / 4 / 2", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("1 + 1 == 2", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("3 < 2", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("1.5e3 + .5", &[]).unwrap(), 1500.5);
    }

    #[test]
    fn test_chained_comparisons() {
        assert_eq!(eval_with("1 < 3 < 2", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("1 < 2 < 3", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("3 > 2 == 1", &[]).unwrap(), 0.0);
        assert_eq!(eval_with("(1 < 3) < 2", &[]).unwrap(), 1.0);
        assert_eq!(eval_with("0 < 1 + 1 <= 2", &[]).unwrap(), 1.0);

        // The chain stops at the first false link.
        let vars = [("a", 1.0), ("b", 0.0)];
        assert_eq!(eval_with("[a] < [b] < [a] / [b]", &vars).unwrap(), 0.0);
    }

    #[test]
    fn test_variables() {
        let vars = [("a", 6.0), ("b", 3.0)];
        assert_eq!(eval_with("[a] / [b]", &vars).unwrap(), 2.0);
        assert_eq!(eval_with("[ a ] - [b]", &vars).unwrap(), 3.0);
        match eval_with("[a] / [c]", &vars) {
            Err(Error::UnresolvedCounter(ref c)) if c == "c" => {}
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn test_divide_by_zero() {
        let vars = [("a", 6.0), ("b", 0.0)];
        match eval_with("[a] / [b]", &vars) {
            Err(Error::DivideByZero) => {}
            x => panic!("unexpected result {:?}", x),
        }
        match eval_with("[b] ** -1", &vars) {
            Err(Error::DivideByZero) => {}
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn test_rejects_code() {
        assert!(MetricExpr::parse_str("__import__('os').system('true')").is_err());
        assert!(MetricExpr::parse_str("cycles / 2").is_err());
        assert!(MetricExpr::parse_str("[a] +").is_err());
        assert!(MetricExpr::parse_str("").is_err());
    }
}
