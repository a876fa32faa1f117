//! Backend-agnostic query expressions
//!
//! An [`Expression`] is an immutable tree of comparisons over logical
//! [`Attribute`]s joined by AND/OR and negated by NOT. Each backend compiles
//! it to its native filter syntax; anything a backend cannot express is
//! evaluated in memory by [`Matcher`](crate::evaluator::Matcher).

use crate::error::{IdmError, Result};
use crate::group::Group;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical attribute a comparison can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Attribute {
    Guid,
    Email,
    EmailAlias,
    FirstName,
    LastName,
    EmployeeId,
    Designation,
    Group,
}

impl Attribute {
    pub fn supports(&self, operator: Operator) -> bool {
        match self {
            Self::Guid => operator == Operator::Eq,
            Self::Group => operator == Operator::Eq,
            _ => true,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Guid => "GUID",
            Self::Email => "EMAIL",
            Self::EmailAlias => "EMAIL_ALIAS",
            Self::FirstName => "FIRST_NAME",
            Self::LastName => "LAST_NAME",
            Self::EmployeeId => "EMPLOYEE_ID",
            Self::Designation => "DESIGNATION",
            Self::Group => "GROUP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    StartsWith,
    /// `*` wildcard pattern
    Like,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => f.write_str("EQ"),
            Self::StartsWith => f.write_str("STARTS_WITH"),
            Self::Like => f.write_str("LIKE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BooleanOp {
    And,
    Or,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComparisonValue {
    Text(String),
    Group(Group),
}

impl ComparisonValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Group(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    Comparison {
        attribute: Attribute,
        operator: Operator,
        value: ComparisonValue,
    },
    Boolean {
        op: BooleanOp,
        children: Vec<Expression>,
    },
    Not {
        child: Box<Expression>,
    },
}

impl Expression {
    /// Build a text comparison, rejecting operators the attribute cannot take
    pub fn compare(
        attribute: Attribute,
        operator: Operator,
        value: impl Into<String>,
    ) -> Result<Self> {
        if attribute == Attribute::Group {
            return Err(IdmError::unsupported_query(
                "group comparisons take a group value, use Expression::in_group",
            ));
        }
        if !attribute.supports(operator) {
            return Err(IdmError::unsupported_operator(format!(
                "{operator} on {attribute}"
            )));
        }
        Ok(Self::Comparison {
            attribute,
            operator,
            value: ComparisonValue::Text(value.into()),
        })
    }

    pub fn equals(attribute: Attribute, value: impl Into<String>) -> Result<Self> {
        Self::compare(attribute, Operator::Eq, value)
    }

    pub fn starts_with(attribute: Attribute, value: impl Into<String>) -> Result<Self> {
        Self::compare(attribute, Operator::StartsWith, value)
    }

    pub fn like(attribute: Attribute, pattern: impl Into<String>) -> Result<Self> {
        Self::compare(attribute, Operator::Like, pattern)
    }

    pub fn in_group(group: Group) -> Self {
        Self::Comparison {
            attribute: Attribute::Group,
            operator: Operator::Eq,
            value: ComparisonValue::Group(group),
        }
    }

    pub fn and(children: impl IntoIterator<Item = Expression>) -> Self {
        Self::Boolean {
            op: BooleanOp::And,
            children: children.into_iter().collect(),
        }
    }

    pub fn or(children: impl IntoIterator<Item = Expression>) -> Self {
        Self::Boolean {
            op: BooleanOp::Or,
            children: children.into_iter().collect(),
        }
    }

    pub fn not(child: Expression) -> Self {
        Self::Not {
            child: Box::new(child),
        }
    }

    pub fn and_also(self, other: Expression) -> Self {
        match self {
            Self::Boolean {
                op: BooleanOp::And,
                mut children,
            } => {
                children.push(other);
                Self::and(children)
            }
            expr => Self::and([expr, other]),
        }
    }

    pub fn or_else(self, other: Expression) -> Self {
        match self {
            Self::Boolean {
                op: BooleanOp::Or,
                mut children,
            } => {
                children.push(other);
                Self::or(children)
            }
            expr => Self::or([expr, other]),
        }
    }

    /// True if any comparison in the tree targets `attribute`
    pub fn references(&self, attribute: Attribute) -> bool {
        match self {
            Self::Comparison { attribute: a, .. } => *a == attribute,
            Self::Boolean { children, .. } => children.iter().any(|c| c.references(attribute)),
            Self::Not { child } => child.references(attribute),
        }
    }
}
