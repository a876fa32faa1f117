//! RFC 4515 search filters and the expression compiler for LDAP

use std::fmt;

use idm_core::{
    Attribute, BooleanOp, ComparisonValue, Dn, Expression, Group, IdmError, Operator, Result,
};

pub const ATTR_OBJECT_CLASS: &str = "objectClass";
pub const ATTR_CN: &str = "cn";
pub const ATTR_UID: &str = "uid";
pub const ATTR_GUID: &str = "thekeyGuid";
pub const ATTR_EMAIL_ALIASES: &str = "cruProxyAddresses";
pub const ATTR_FIRST_NAME: &str = "givenName";
pub const ATTR_LAST_NAME: &str = "sn";
pub const ATTR_EMPLOYEE_ID: &str = "employeeNumber";
pub const ATTR_DESIGNATION: &str = "cruDesignation";
pub const ATTR_GROUP_MEMBERSHIP: &str = "groupMembership";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapFilter {
    Equality {
        attr: String,
        value: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        final_: Option<String>,
    },
    Present {
        attr: String,
    },
    And(Vec<LdapFilter>),
    Or(Vec<LdapFilter>),
    Not(Box<LdapFilter>),
}

impl LdapFilter {
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equality {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(attr: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::Substring {
            attr: attr.into(),
            initial: Some(prefix.into()),
            any: Vec::new(),
            final_: None,
        }
    }

    /// Pattern with `*` wildcards; a pattern without wildcards is an equality
    pub fn like(attr: impl Into<String>, pattern: &str) -> Self {
        if !pattern.contains('*') {
            return Self::eq(attr, pattern);
        }
        let mut parts: Vec<&str> = pattern.split('*').collect();
        let final_ = parts.pop().filter(|p| !p.is_empty()).map(str::to_string);
        let initial = Some(parts.remove(0))
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let any = parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        Self::Substring {
            attr: attr.into(),
            initial,
            any,
            final_,
        }
    }

    pub fn present(attr: impl Into<String>) -> Self {
        Self::Present { attr: attr.into() }
    }

    pub fn not(filter: LdapFilter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// AND two filters, flattening nested conjunctions
    pub fn and_also(self, other: LdapFilter) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }
}

/// Escape a value for use inside a filter
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(ch),
        }
    }
    out
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equality { attr, value } => write!(f, "({attr}={})", escape(value)),
            Self::Substring {
                attr,
                initial,
                any,
                final_,
            } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(final_) = final_ {
                    f.write_str(&escape(final_))?;
                }
                f.write_str(")")
            }
            Self::Present { attr } => write!(f, "({attr}=*)"),
            Self::And(children) => {
                f.write_str("(&")?;
                children.iter().try_for_each(|c| write!(f, "{c}"))?;
                f.write_str(")")
            }
            Self::Or(children) => {
                f.write_str("(|")?;
                children.iter().try_for_each(|c| write!(f, "{c}"))?;
                f.write_str(")")
            }
            Self::Not(child) => write!(f, "(!{child})"),
        }
    }
}

/// LDAP attribute a query attribute compiles to
pub fn query_attribute(attribute: Attribute) -> &'static str {
    match attribute {
        Attribute::Guid => ATTR_GUID,
        Attribute::Email => ATTR_UID,
        Attribute::EmailAlias => ATTR_EMAIL_ALIASES,
        Attribute::FirstName => ATTR_FIRST_NAME,
        Attribute::LastName => ATTR_LAST_NAME,
        Attribute::EmployeeId => ATTR_EMPLOYEE_ID,
        Attribute::Designation => ATTR_DESIGNATION,
        Attribute::Group => ATTR_GROUP_MEMBERSHIP,
    }
}

/// Ensure a path group lives under the configured group root
pub fn group_dn(group: &Group, base_group_dn: Option<&Dn>) -> Result<Dn> {
    let Group::Path { dn } = group else {
        return Err(IdmError::invalid_group(format!(
            "{group} is not a directory group"
        )));
    };
    let base = base_group_dn
        .ok_or_else(|| IdmError::invalid_group("no base group DN is configured"))?;
    if !dn.dn().is_descendant_of(base) {
        return Err(IdmError::invalid_group(format!(
            "{} is outside {base}",
            dn.dn()
        )));
    }
    Ok(dn.dn().clone())
}

pub fn compile(expression: &Expression, base_group_dn: Option<&Dn>) -> Result<LdapFilter> {
    match expression {
        Expression::Comparison {
            attribute,
            operator,
            value,
        } => compile_comparison(*attribute, *operator, value, base_group_dn),
        Expression::Boolean { children, .. } if children.is_empty() => Err(
            IdmError::unsupported_query("boolean expression without children"),
        ),
        Expression::Boolean { op, children } => {
            let children = children
                .iter()
                .map(|child| compile(child, base_group_dn))
                .collect::<Result<Vec<_>>>()?;
            Ok(match op {
                BooleanOp::And => LdapFilter::And(children),
                BooleanOp::Or => LdapFilter::Or(children),
            })
        }
        Expression::Not { child } => Ok(LdapFilter::not(compile(child, base_group_dn)?)),
    }
}

fn compile_comparison(
    attribute: Attribute,
    operator: Operator,
    value: &ComparisonValue,
    base_group_dn: Option<&Dn>,
) -> Result<LdapFilter> {
    let attr = query_attribute(attribute);
    match value {
        ComparisonValue::Group(group) => {
            if attribute != Attribute::Group || operator != Operator::Eq {
                return Err(IdmError::unsupported_query(format!(
                    "{attribute} cannot be compared with a group"
                )));
            }
            Ok(LdapFilter::eq(attr, group_dn(group, base_group_dn)?.to_string()))
        }
        ComparisonValue::Text(_) if attribute == Attribute::Group => Err(
            IdmError::unsupported_query("group membership requires a group value"),
        ),
        ComparisonValue::Text(text) => Ok(match operator {
            Operator::Eq => LdapFilter::eq(attr, text),
            Operator::StartsWith => LdapFilter::starts_with(attr, text),
            Operator::Like => LdapFilter::like(attr, text),
        }),
    }
}
