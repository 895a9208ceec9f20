//! Minimal expression representation consumed by the embedded evaluator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addrs::Reference;
use crate::error::Result;

use super::value::Value;

/// A configuration expression: a literal, a reference to another object, a
/// collection of sub-expressions, or a string template concatenation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A literal value.
    Literal(Value),
    /// A reference to another object in scope.
    Ref(Reference),
    /// An ordered list of sub-expressions.
    List(Vec<Expr>),
    /// A string-keyed map of sub-expressions.
    Map(BTreeMap<String, Expr>),
    /// A string template: each part evaluates and renders in order. A part
    /// rendering unknown makes the whole template unknown.
    Template(Vec<Expr>),
}

impl Expr {
    /// A literal expression.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// A null literal.
    #[must_use]
    pub const fn null() -> Self {
        Self::Literal(Value::Null)
    }

    /// Parses a dotted reference string into a reference expression.
    pub fn parse_ref(s: &str) -> Result<Self> {
        Ok(Self::Ref(Reference::parse(s)?))
    }
}

impl From<Reference> for Expr {
    fn from(reference: Reference) -> Self {
        Self::Ref(reference)
    }
}

/// The body of a configuration block: attribute name → expression.
pub type Body = BTreeMap<String, Expr>;

/// Collects every reference mentioned anywhere in an expression.
#[must_use]
pub fn references_in_expr(expr: &Expr) -> Vec<Reference> {
    let mut out = Vec::new();
    collect(expr, &mut out);
    out
}

/// Collects every reference mentioned anywhere in a block body, in
/// attribute order.
#[must_use]
pub fn references_in_body(body: &Body) -> Vec<Reference> {
    let mut out = Vec::new();
    for expr in body.values() {
        collect(expr, &mut out);
    }
    out
}

fn collect(expr: &Expr, out: &mut Vec<Reference>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Ref(reference) => out.push(reference.clone()),
        Expr::List(items) | Expr::Template(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Expr::Map(entries) => {
            for item in entries.values() {
                collect(item, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_in_nested_expr() {
        let expr = Expr::Map(BTreeMap::from([
            (String::from("a"), Expr::parse_ref("var.x").expect("ref")),
            (
                String::from("b"),
                Expr::List(vec![
                    Expr::lit("static"),
                    Expr::parse_ref("p_thing.a.id").expect("ref"),
                ]),
            ),
        ]));
        let refs = references_in_expr(&expr);
        let keys: Vec<_> = refs.iter().map(|r| r.subject.map_key()).collect();
        assert_eq!(keys, vec!["var.x", "p_thing.a"]);
    }

    #[test]
    fn test_references_in_body_ordered_by_attribute() {
        let body = Body::from([
            (String::from("z"), Expr::parse_ref("local.l").expect("ref")),
            (String::from("a"), Expr::parse_ref("var.v").expect("ref")),
        ]);
        let keys: Vec<_> = references_in_body(&body)
            .iter()
            .map(|r| r.subject.map_key())
            .collect();
        assert_eq!(keys, vec!["var.v", "local.l"]);
    }
}
