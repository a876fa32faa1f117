//! Okta client boundary
//!
//! The transport to the Okta Management API lives outside this crate. The
//! DAO only needs the handful of calls declared by [`OktaClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use idm_core::{CloudUserId, IdmError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error code Okta uses for request validation failures
pub const API_VALIDATION_FAILED: &str = "E0000001";

#[derive(Error, Debug, Clone)]
pub enum OktaClientError {
    #[error("Okta API error {code}: {summary}")]
    Api {
        status: u16,
        code: String,
        summary: String,
        causes: Vec<String>,
    },

    #[error("Okta transport error: {message}")]
    Transport { message: String },
}

impl OktaClientError {
    pub fn api(status: u16, code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            summary: summary.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        if let Self::Api { causes, .. } = &mut self {
            causes.push(cause.into());
        }
        self
    }

    /// The human-readable reason when Okta rejected a password value
    pub fn password_rejection(&self) -> Option<String> {
        match self {
            Self::Api {
                code,
                summary,
                causes,
                ..
            } if code == API_VALIDATION_FAILED && summary.to_lowercase().contains("password") => {
                let cause = causes.first().unwrap_or(summary);
                let reason = cause
                    .strip_prefix("password:")
                    .map(str::trim)
                    .unwrap_or(cause.as_str());
                Some(reason.to_string())
            }
            _ => None,
        }
    }
}

impl From<OktaClientError> for IdmError {
    fn from(err: OktaClientError) -> Self {
        match err.password_rejection() {
            Some(reason) => IdmError::invalid_credential(reason),
            None => IdmError::backend("okta", err),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, OktaClientError>;

// =============================================================================
// Okta resources
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OktaUserStatus {
    Staged,
    Provisioned,
    Active,
    Suspended,
    Deprovisioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Verified,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OktaEmail {
    pub value: String,
    pub status: EmailStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OktaCredentials {
    /// Write-only; Okta never returns the current password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub emails: Vec<OktaEmail>,
}

/// Okta profile as a free-form property bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OktaProfile(Map<String, Value>);

impl OktaProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_list(&self, field: &str) -> Vec<String> {
        match self.0.get(field) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(value)) => vec![value.clone()],
            _ => Vec::new(),
        }
    }

    /// Set a text field, returning whether the stored value changed
    pub fn set_str(&mut self, field: &str, value: Option<&str>) -> bool {
        if self.get_str(field) == value {
            return false;
        }
        match value {
            Some(value) => {
                self.0.insert(field.to_string(), Value::String(value.to_string()));
            }
            None => {
                self.0.insert(field.to_string(), Value::Null);
            }
        }
        true
    }

    pub fn set_list(&mut self, field: &str, values: &[String]) -> bool {
        if self.get_list(field) == values {
            return false;
        }
        let values = values.iter().cloned().map(Value::String).collect();
        self.0.insert(field.to_string(), Value::Array(values));
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OktaUser {
    pub id: CloudUserId,
    pub status: OktaUserStatus,
    pub profile: OktaProfile,
    #[serde(default)]
    pub credentials: OktaCredentials,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OktaGroup {
    pub id: String,
    pub name: String,
}

// =============================================================================
// Client trait
// =============================================================================

#[async_trait]
pub trait OktaClient: Send + Sync {
    async fn get_user(&self, id: &CloudUserId) -> ClientResult<Option<OktaUser>>;

    /// Page through users matching an Okta `search` expression, or all users
    fn list_users(&self, search: Option<String>) -> BoxStream<'static, ClientResult<OktaUser>>;

    async fn create_user(
        &self,
        profile: OktaProfile,
        password: Option<String>,
        group_ids: &[String],
    ) -> ClientResult<OktaUser>;

    /// Persist profile and credential changes
    async fn update_user(&self, user: &OktaUser) -> ClientResult<()>;

    async fn suspend_user(&self, id: &CloudUserId) -> ClientResult<()>;

    async fn unsuspend_user(&self, id: &CloudUserId) -> ClientResult<()>;

    async fn list_user_groups(&self, id: &CloudUserId) -> ClientResult<Vec<OktaGroup>>;

    async fn get_group(&self, id: &str) -> ClientResult<Option<OktaGroup>>;

    async fn list_groups(&self) -> ClientResult<Vec<OktaGroup>>;

    fn list_group_members(&self, group_id: &str) -> BoxStream<'static, ClientResult<OktaUser>>;

    async fn add_user_to_group(&self, group_id: &str, user_id: &CloudUserId) -> ClientResult<()>;

    async fn remove_user_from_group(&self, group_id: &str, user_id: &CloudUserId)
        -> ClientResult<()>;
}
