//! Group and hierarchy model
//!
//! Groups come in two shapes. A [`PathGroup`] is addressed by a
//! distinguished name (a sequence of `type=value` components), while a
//! [`PrefixGroup`] encodes hierarchy in its flat name with `-` and `:`
//! delimiters. Both answer the same containment question.

use crate::error::{IdmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Distinguished names
// =============================================================================

/// One `type=value` step of a distinguished name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub kind: String,
    pub value: String,
}

impl Component {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.kind.eq_ignore_ascii_case(&other.kind)
            && self.value.to_lowercase() == other.value.to_lowercase()
    }
}

impl Eq for Component {}

impl std::hash::Hash for Component {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.to_ascii_lowercase().hash(state);
        self.value.to_lowercase().hash(state);
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, escape_dn_value(&self.value))
    }
}

/// Distinguished name with components stored root-to-leaf
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dn {
    components: Vec<Component>,
}

impl Dn {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an RFC 4514 string such as `cn=Leaf,ou=Groups,dc=example`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut components = Vec::new();
        for rdn in split_unescaped(input, ',') {
            let rdn = rdn.trim();
            if rdn.is_empty() {
                continue;
            }
            let (kind, value) = rdn
                .split_once('=')
                .ok_or_else(|| IdmError::invalid_group(format!("malformed DN component '{rdn}'")))?;
            let kind = kind.trim();
            if kind.is_empty() {
                return Err(IdmError::invalid_group(format!(
                    "DN component '{rdn}' has no attribute type"
                )));
            }
            components.push(Component::new(kind, unescape_dn_value(value.trim())?));
        }
        // printed leaf-first, stored root-first
        components.reverse();
        Ok(Self { components })
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn leaf(&self) -> Option<&Component> {
        self.components.last()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.is_root() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(Self { components })
    }

    pub fn child(&self, kind: impl Into<String>, value: impl Into<String>) -> Dn {
        let mut components = self.components.clone();
        components.push(Component::new(kind, value));
        Self { components }
    }

    /// True when `ancestor`'s components are an ordered prefix of ours
    pub fn is_descendant_of_or_equal_to(&self, ancestor: &Dn) -> bool {
        ancestor.components.len() <= self.components.len()
            && self
                .components
                .iter()
                .zip(&ancestor.components)
                .all(|(a, b)| a == b)
    }

    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        self.components.len() > ancestor.components.len()
            && self.is_descendant_of_or_equal_to(ancestor)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().rev().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

fn split_unescaped(input: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == delimiter {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}

fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, ch) in value.chars().enumerate() {
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && (ch == '#' || ch == ' '))
            || (i == last && ch == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn unescape_dn_value(value: &str) -> Result<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let first = chars
            .next()
            .ok_or_else(|| IdmError::invalid_group("DN value ends with a bare escape"))?;
        match chars.peek().copied() {
            Some(second) if first.is_ascii_hexdigit() && second.is_ascii_hexdigit() => {
                chars.next();
                let hex: String = [first, second].iter().collect();
                let byte = u8::from_str_radix(&hex, 16)
                    .map_err(|e| IdmError::invalid_group(e.to_string()))?;
                bytes.push(byte);
            }
            _ => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(first.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8(bytes).map_err(|e| IdmError::invalid_group(e.to_string()))
}

// =============================================================================
// Groups
// =============================================================================

/// Group addressed by a distinguished name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathGroup {
    dn: Dn,
}

impl PathGroup {
    pub fn new(dn: Dn) -> Result<Self> {
        if dn.is_root() {
            return Err(IdmError::invalid_group("the root DN is not a group"));
        }
        Ok(Self { dn })
    }

    pub fn parse(dn: &str) -> Result<Self> {
        Self::new(Dn::parse(dn)?)
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn name(&self) -> &str {
        self.dn.leaf().map(|c| c.value.as_str()).unwrap_or_default()
    }

    /// Containment against a DN given as a string; unparsable input never matches
    pub fn contains_or_equals(&self, candidate: &str) -> bool {
        Dn::parse(candidate)
            .map(|ancestor| self.dn.is_descendant_of_or_equal_to(&ancestor))
            .unwrap_or(false)
    }
}

impl TryFrom<String> for PathGroup {
    type Error = IdmError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PathGroup> for String {
    fn from(group: PathGroup) -> Self {
        group.dn.to_string()
    }
}

/// Group whose hierarchy is encoded in a delimited flat name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixGroup {
    pub id: String,
    pub name: String,
}

impl PrefixGroup {
    pub const DELIMITERS: [char; 2] = ['-', ':'];

    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn contains_or_equals(&self, prefix: &str) -> bool {
        match self.name.strip_prefix(prefix) {
            Some("") => true,
            Some(rest) => rest.starts_with(Self::DELIMITERS),
            None => false,
        }
    }
}

/// Group membership, in whichever shape the owning backend uses
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Group {
    Path { dn: PathGroup },
    Prefix(PrefixGroup),
}

impl Group {
    pub fn path(dn: &str) -> Result<Self> {
        Ok(Self::Path {
            dn: PathGroup::parse(dn)?,
        })
    }

    pub fn prefix(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Prefix(PrefixGroup::new(id, name))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Path { dn } => dn.name(),
            Self::Prefix(group) => &group.name,
        }
    }

    pub fn contains_or_equals(&self, candidate: &str) -> bool {
        match self {
            Self::Path { dn } => dn.contains_or_equals(candidate),
            Self::Prefix(group) => group.contains_or_equals(candidate),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { dn } => write!(f, "{}", dn.dn()),
            Self::Prefix(group) => f.write_str(&group.name),
        }
    }
}
