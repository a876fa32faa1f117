//! Attribute taxonomy and change-sets
//!
//! An [`Attr`] names one coarse facet of a [`User`](crate::User). Writes carry
//! an [`AttrSet`] describing which facets changed so that each backend only
//! touches the fields it owns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Logical facet of an identity record, used to scope partial writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    Email,
    Password,
    Name,
    PreferredName,
    Contact,
    Location,
    EmployeeNumber,
    Designation,
    HumanResource,
    EmailAliases,
    Flags,
    SelfServiceKeys,
    MfaSecret,
    MfaIntruderDetection,
    LoginTime,
}

impl Attr {
    pub const ALL: [Attr; 15] = [
        Attr::Email,
        Attr::Password,
        Attr::Name,
        Attr::PreferredName,
        Attr::Contact,
        Attr::Location,
        Attr::EmployeeNumber,
        Attr::Designation,
        Attr::HumanResource,
        Attr::EmailAliases,
        Attr::Flags,
        Attr::SelfServiceKeys,
        Attr::MfaSecret,
        Attr::MfaIntruderDetection,
        Attr::LoginTime,
    ];

    /// Tags assumed when a write does not name any
    pub const DEFAULT: [Attr; 3] = [Attr::Email, Attr::Name, Attr::Flags];
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Email => "email",
            Self::Password => "password",
            Self::Name => "name",
            Self::PreferredName => "preferred_name",
            Self::Contact => "contact",
            Self::Location => "location",
            Self::EmployeeNumber => "employee_number",
            Self::Designation => "designation",
            Self::HumanResource => "human_resource",
            Self::EmailAliases => "email_aliases",
            Self::Flags => "flags",
            Self::SelfServiceKeys => "self_service_keys",
            Self::MfaSecret => "mfa_secret",
            Self::MfaIntruderDetection => "mfa_intruder_detection",
            Self::LoginTime => "login_time",
        };
        f.write_str(name)
    }
}

/// Ordered set of attribute tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrSet(BTreeSet<Attr>);

impl AttrSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn all() -> Self {
        Attr::ALL.into_iter().collect()
    }

    /// The fixed subset (EMAIL, NAME, FLAGS) used when a write names no tags
    pub fn defaults() -> Self {
        Attr::DEFAULT.into_iter().collect()
    }

    /// Tags written when an account is deactivated or reactivated
    pub fn activation() -> Self {
        Self::from([Attr::Email, Attr::Flags])
    }

    /// Resolve the tags a write actually applies to.
    ///
    /// An empty set means "the default subset"; any other set is returned
    /// unchanged.
    pub fn or_defaults(self) -> Self {
        if self.0.is_empty() {
            Self::defaults()
        } else {
            self
        }
    }

    pub fn insert(&mut self, attr: Attr) -> bool {
        self.0.insert(attr)
    }

    pub fn with(mut self, attr: Attr) -> Self {
        self.0.insert(attr);
        self
    }

    pub fn contains(&self, attr: Attr) -> bool {
        self.0.contains(&attr)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Attr> + '_ {
        self.0.iter().copied()
    }

    pub fn intersection(&self, other: &AttrSet) -> AttrSet {
        AttrSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &AttrSet) -> AttrSet {
        AttrSet(self.0.difference(&other.0).copied().collect())
    }
}

impl FromIterator<Attr> for AttrSet {
    fn from_iter<I: IntoIterator<Item = Attr>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Attr; N]> for AttrSet {
    fn from(attrs: [Attr; N]) -> Self {
        attrs.into_iter().collect()
    }
}

impl From<&[Attr]> for AttrSet {
    fn from(attrs: &[Attr]) -> Self {
        attrs.iter().copied().collect()
    }
}

impl IntoIterator for AttrSet {
    type Item = Attr;
    type IntoIter = std::collections::btree_set::IntoIter<Attr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(Attr::to_string).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
