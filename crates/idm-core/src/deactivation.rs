//! Reversible soft-deactivation encoding
//!
//! A deactivated account keeps its real address in a shadow field while the
//! live email field holds a synthetic value built from the GUID. This frees
//! the real address for reuse without losing it.

use crate::ids::Guid;
use crate::models::User;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Email as stored by a backend: the live field plus its shadow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredEmail {
    pub live: String,
    pub shadow: Option<String>,
}

/// Canonical email recovered from a [`StoredEmail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmail {
    pub email: String,
    pub deactivated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationCodec {
    pub prefix: String,
    pub suffix: String,
}

impl DeactivationCodec {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    /// Synthetic live value for a deactivated account
    pub fn synthetic(&self, guid: &Guid) -> String {
        format!("{}{}{}", self.prefix, guid, self.suffix)
    }

    pub fn is_synthetic(&self, live: &str) -> bool {
        live.len() > self.prefix.len() + self.suffix.len()
            && live.starts_with(&self.prefix)
            && live.ends_with(&self.suffix)
    }

    pub fn encode(&self, user: &User) -> StoredEmail {
        if user.deactivated {
            StoredEmail {
                live: self.synthetic(&user.guid),
                shadow: Some(user.email.clone()),
            }
        } else {
            StoredEmail {
                live: user.email.clone(),
                shadow: None,
            }
        }
    }

    pub fn decode(&self, stored: &StoredEmail) -> DecodedEmail {
        if !self.is_synthetic(&stored.live) {
            return DecodedEmail {
                email: stored.live.clone(),
                deactivated: false,
            };
        }
        let email = match &stored.shadow {
            Some(shadow) => shadow.clone(),
            None => {
                warn!(live = %stored.live, "Deactivated record has no shadow email");
                String::new()
            }
        };
        DecodedEmail {
            email,
            deactivated: true,
        }
    }
}
