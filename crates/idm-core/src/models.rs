//! Canonical identity record shared by every backend

use crate::attrs::{Attr, AttrSet};
use crate::error::{IdmError, Result};
use crate::group::Group;
use crate::ids::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// User
// =============================================================================

/// Canonical user as exposed to callers, independent of backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub guid: Guid,
    /// Set once the record has been provisioned in the cloud provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<CloudUserId>,

    pub email: String,
    pub email_verified: bool,
    #[serde(skip)]
    pub password: Option<String>,

    pub first_name: Option<String>,
    pub preferred_name: Option<String>,
    pub last_name: Option<String>,

    pub telephone_number: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal: Option<String>,
    pub country: Option<String>,

    pub employee_id: Option<String>,
    pub designation: Option<String>,
    pub ministry_code: Option<String>,
    pub sub_ministry_code: Option<String>,
    pub department_number: Option<String>,
    pub manager_id: Option<String>,

    #[serde(default)]
    pub email_aliases: Vec<String>,

    pub deactivated: bool,
    pub login_disabled: bool,
    pub allow_password_change: bool,
    pub force_password_change: bool,
    pub locked: bool,

    #[serde(default)]
    pub mfa: MfaState,
    #[serde(default)]
    pub self_service: SelfServiceKeys,

    #[serde(default)]
    pub groups: Vec<Group>,
    pub login_time: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(guid: impl Into<Guid>, email: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            email: email.into(),
            allow_password_change: true,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Reject records missing the identifying fields every backend needs
    pub fn validate_identity(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            return Err(IdmError::invalid_record("user email is blank"));
        }
        if self.guid.is_blank() {
            return Err(IdmError::invalid_record("user guid is blank"));
        }
        Ok(())
    }

    /// The cloud id, required before any write against the cloud provider
    pub fn require_cloud_id(&self) -> Result<&CloudUserId> {
        match &self.cloud_id {
            Some(id) if !id.is_blank() => Ok(id),
            _ => Err(IdmError::invalid_record(format!(
                "user {} has no cloud id",
                self.guid
            ))),
        }
    }

    pub fn mark_deactivated(&mut self) {
        self.deactivated = true;
        self.login_disabled = true;
    }

    pub fn mark_reactivated(&mut self) {
        self.deactivated = false;
        self.login_disabled = false;
        self.allow_password_change = true;
    }

    pub fn is_member_of(&self, group: &Group) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Copy the fields covered by `attrs` from `source`
    pub fn copy_attrs(&mut self, source: &User, attrs: &AttrSet) {
        for attr in attrs.iter() {
            match attr {
                Attr::Email => {
                    self.email = source.email.clone();
                    self.email_verified = source.email_verified;
                    self.deactivated = source.deactivated;
                }
                Attr::Password => self.password = source.password.clone(),
                Attr::Name => {
                    self.first_name = source.first_name.clone();
                    self.preferred_name = source.preferred_name.clone();
                    self.last_name = source.last_name.clone();
                }
                Attr::PreferredName => self.preferred_name = source.preferred_name.clone(),
                Attr::Contact => self.telephone_number = source.telephone_number.clone(),
                Attr::Location => {
                    self.city = source.city.clone();
                    self.state = source.state.clone();
                    self.postal = source.postal.clone();
                    self.country = source.country.clone();
                }
                Attr::EmployeeNumber => self.employee_id = source.employee_id.clone(),
                Attr::Designation => self.designation = source.designation.clone(),
                Attr::HumanResource => {
                    self.ministry_code = source.ministry_code.clone();
                    self.sub_ministry_code = source.sub_ministry_code.clone();
                    self.department_number = source.department_number.clone();
                    self.manager_id = source.manager_id.clone();
                }
                Attr::EmailAliases => self.email_aliases = source.email_aliases.clone(),
                Attr::Flags => {
                    self.login_disabled = source.login_disabled;
                    self.allow_password_change = source.allow_password_change;
                    self.force_password_change = source.force_password_change;
                    self.locked = source.locked;
                }
                Attr::SelfServiceKeys => self.self_service = source.self_service.clone(),
                Attr::MfaSecret => {
                    self.mfa.bypassed = source.mfa.bypassed;
                    self.mfa.encrypted_secret = source.mfa.encrypted_secret.clone();
                }
                Attr::MfaIntruderDetection => {
                    self.mfa.intruder_locked = source.mfa.intruder_locked;
                    self.mfa.intruder_attempts = source.mfa.intruder_attempts;
                    self.mfa.intruder_reset_time = source.mfa.intruder_reset_time;
                }
                Attr::LoginTime => self.login_time = source.login_time,
            }
        }
    }

    pub fn apply(&mut self, patch: UserPatch) {
        if let Some(mfa) = patch.mfa {
            self.mfa = mfa;
        }
        if let Some(keys) = patch.self_service {
            self.self_service = keys;
        }
    }
}

// =============================================================================
// Secondary-owned state
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaState {
    pub bypassed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_secret: Option<String>,
    pub intruder_locked: bool,
    pub intruder_attempts: u32,
    pub intruder_reset_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfServiceKeys {
    pub signup_key: Option<String>,
    pub proposed_email: Option<String>,
    pub change_email_key: Option<String>,
    pub reset_password_key: Option<String>,
}

/// Changes a listener wants applied to a freshly loaded record.
///
/// Listeners return patches instead of mutating the record so the loading
/// DAO controls the order in which they take effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub mfa: Option<MfaState>,
    pub self_service: Option<SelfServiceKeys>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.mfa.is_none() && self.self_service.is_none()
    }
}
