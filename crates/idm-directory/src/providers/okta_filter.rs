//! Compiles query expressions to Okta `search` syntax
//!
//! Only EQ and STARTS_WITH comparisons joined by AND/OR are expressible.
//! Group scopes, NOT and LIKE are rejected so the caller falls back to
//! group listing plus in-memory evaluation.

use super::okta_schema::{self, ORIGINAL_EMAIL};
use idm_core::{
    Attribute, BooleanOp, ComparisonValue, Expression, IdmError, Operator, Result,
};

pub fn compile(expression: &Expression, include_deactivated: bool) -> Result<String> {
    match expression {
        Expression::Comparison {
            attribute,
            operator,
            value,
        } => compile_comparison(*attribute, *operator, value, include_deactivated),
        Expression::Boolean { children, .. } if children.is_empty() => Err(
            IdmError::unsupported_query("boolean expression without children"),
        ),
        Expression::Boolean { op, children } => {
            let joiner = match op {
                BooleanOp::And => " and ",
                BooleanOp::Or => " or ",
            };
            let parts = children
                .iter()
                .map(|child| compile(child, include_deactivated))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("({})", parts.join(joiner)))
        }
        Expression::Not { .. } => Err(IdmError::unsupported_query(
            "NOT cannot be expressed in an Okta search",
        )),
    }
}

fn compile_comparison(
    attribute: Attribute,
    operator: Operator,
    value: &ComparisonValue,
    include_deactivated: bool,
) -> Result<String> {
    if attribute == Attribute::Group {
        return Err(IdmError::unsupported_query(
            "group membership cannot be combined with an Okta search",
        ));
    }
    let operator = match operator {
        Operator::Eq => "eq",
        Operator::StartsWith => "sw",
        Operator::Like => return Err(IdmError::unsupported_operator(Operator::Like)),
    };
    let value = value.as_text().ok_or_else(|| {
        IdmError::unsupported_query(format!("{attribute} comparison requires a text value"))
    })?;
    let field = okta_schema::query_field(attribute)
        .ok_or_else(|| IdmError::unsupported_attribute(attribute))?;

    if attribute == Attribute::Email && include_deactivated {
        return Ok(format!(
            "({} or {})",
            comparison(field, operator, value),
            comparison(ORIGINAL_EMAIL, operator, value)
        ));
    }
    Ok(comparison(field, operator, value))
}

pub(crate) fn comparison(field: &str, operator: &str, value: &str) -> String {
    format!("profile.{field} {operator} {}", quote(value))
}

/// Double-quote a literal, escaping `"` and `\`
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}
