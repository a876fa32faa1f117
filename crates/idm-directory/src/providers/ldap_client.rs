//! LDAP client boundary

use async_trait::async_trait;
use futures::stream::BoxStream;
use idm_core::IdmError;
use std::collections::BTreeMap;
use thiserror::Error;

use super::ldap_filter::LdapFilter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LdapClientError {
    #[error("No such object: {dn}")]
    NoSuchObject { dn: String },

    #[error("Entry already exists: {dn}")]
    EntryAlreadyExists { dn: String },

    #[error("Attribute or value exists: {attr}")]
    AttributeOrValueExists { attr: String },

    #[error("No such attribute: {attr}")]
    NoSuchAttribute { attr: String },

    #[error("LDAP operation failed ({code}): {message}")]
    Operation { code: u32, message: String },
}

impl From<LdapClientError> for IdmError {
    fn from(err: LdapClientError) -> Self {
        IdmError::backend("ldap", err)
    }
}

pub type ClientResult<T> = std::result::Result<T, LdapClientError>;

/// A directory entry; attribute names are stored lowercased
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdapEntry {
    pub dn: String,
    attributes: BTreeMap<String, Vec<String>>,
}

impl LdapEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, attr: &str, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.set(attr, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn get(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }

    pub fn values(&self, attr: &str) -> &[String] {
        self.attributes
            .get(&attr.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Replace all values; an empty list removes the attribute
    pub fn set(&mut self, attr: &str, values: Vec<String>) {
        let key = attr.to_ascii_lowercase();
        if values.is_empty() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, values);
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.attributes.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdapModification {
    Add { attr: String, values: Vec<String> },
    Delete { attr: String, values: Vec<String> },
    Replace { attr: String, values: Vec<String> },
}

/// Subtree search below `base_dn`, fetched `page_size` entries at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub filter: LdapFilter,
    pub page_size: usize,
}

#[async_trait]
pub trait LdapClient: Send + Sync {
    fn search(&self, request: SearchRequest) -> BoxStream<'static, ClientResult<LdapEntry>>;

    async fn add(&self, entry: LdapEntry) -> ClientResult<()>;

    async fn modify(&self, dn: &str, changes: Vec<LdapModification>) -> ClientResult<()>;

    /// Rename the leaf RDN of `dn`, keeping the entry under the same parent
    async fn rename(&self, dn: &str, new_rdn: &str) -> ClientResult<()>;
}
