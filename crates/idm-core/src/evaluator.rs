//! In-memory predicate evaluation
//!
//! Used when a backend cannot express a query natively, most notably a
//! filter applied to the membership list of a group. Semantics follow the
//! backend compilers for AND/OR/comparisons and add NOT plus multi-valued
//! attributes.

use crate::error::{IdmError, Result};
use crate::models::User;
use crate::query::{Attribute, BooleanOp, ComparisonValue, Expression, Operator};

/// Evaluates expressions against already-materialized records
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    fold_case: bool,
}

impl Default for Matcher {
    fn default() -> Self {
        Self { fold_case: true }
    }
}

impl Matcher {
    pub fn new(fold_case: bool) -> Self {
        Self { fold_case }
    }

    /// Check `user` against `expression`; no expression matches everything.
    ///
    /// The whole tree is validated before evaluation so an unsupported
    /// clause fails regardless of short-circuiting.
    pub fn matches(&self, user: &User, expression: Option<&Expression>) -> Result<bool> {
        let Some(expression) = expression else {
            return Ok(true);
        };
        Self::validate(expression)?;
        Ok(self.eval(user, expression))
    }

    pub fn validate(expression: &Expression) -> Result<()> {
        match expression {
            Expression::Comparison {
                attribute,
                operator,
                value,
            } => {
                if *operator == Operator::Like {
                    return Err(IdmError::unsupported_operator(Operator::Like));
                }
                match (attribute, value) {
                    (Attribute::Group, ComparisonValue::Group(_)) => Ok(()),
                    (Attribute::Group, ComparisonValue::Text(_)) => Err(
                        IdmError::unsupported_query("GROUP comparison requires a group value"),
                    ),
                    (_, ComparisonValue::Group(_)) => Err(IdmError::unsupported_query(format!(
                        "{attribute} comparison requires a text value"
                    ))),
                    _ => Ok(()),
                }
            }
            Expression::Boolean { children, .. } if children.is_empty() => {
                Err(IdmError::unsupported_query("boolean expression without children"))
            }
            Expression::Boolean { children, .. } => children.iter().try_for_each(Self::validate),
            Expression::Not { child } => Self::validate(child),
        }
    }

    fn eval(&self, user: &User, expression: &Expression) -> bool {
        match expression {
            Expression::Comparison {
                attribute: Attribute::Group,
                value: ComparisonValue::Group(group),
                ..
            } => user.is_member_of(group),
            Expression::Comparison {
                attribute,
                operator,
                value: ComparisonValue::Text(expected),
            } => values_of(user, *attribute)
                .into_iter()
                .any(|actual| self.compare(actual, *operator, expected)),
            Expression::Comparison { .. } => false,
            Expression::Boolean {
                op: BooleanOp::And,
                children,
            } => children.iter().all(|c| self.eval(user, c)),
            Expression::Boolean {
                op: BooleanOp::Or,
                children,
            } => children.iter().any(|c| self.eval(user, c)),
            Expression::Not { child } => !self.eval(user, child),
        }
    }

    fn compare(&self, actual: &str, operator: Operator, expected: &str) -> bool {
        let (actual, expected) = if self.fold_case {
            (actual.to_lowercase(), expected.to_lowercase())
        } else {
            (actual.to_string(), expected.to_string())
        };
        match operator {
            Operator::Eq => actual == expected,
            Operator::StartsWith => actual.starts_with(&expected),
            Operator::Like => false,
        }
    }
}

fn values_of(user: &User, attribute: Attribute) -> Vec<&str> {
    match attribute {
        Attribute::Guid => vec![user.guid.as_str()],
        Attribute::Email => vec![user.email.as_str()],
        Attribute::EmailAlias => user.email_aliases.iter().map(String::as_str).collect(),
        Attribute::FirstName => user.first_name.as_deref().into_iter().collect(),
        Attribute::LastName => user.last_name.as_deref().into_iter().collect(),
        Attribute::EmployeeId => user.employee_id.as_deref().into_iter().collect(),
        Attribute::Designation => user.designation.as_deref().into_iter().collect(),
        Attribute::Group => Vec::new(),
    }
}
