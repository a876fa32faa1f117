//! Cross-backend synchronization bridge
//!
//! A [`FallbackListener`] is registered on the primary DAO. Loaded records
//! pick up the MFA and self-service state held by the secondary DAO, and
//! updates touching tags the secondary owns are forwarded to it. The
//! secondary is consulted on every call; nothing is cached.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use idm_core::{Attr, AttrSet, Result, User, UserDao, UserListener, UserPatch};

/// Tags copied from the secondary into every record the primary loads
pub const BRIDGED_ATTRIBUTES: [Attr; 3] =
    [Attr::SelfServiceKeys, Attr::MfaSecret, Attr::MfaIntruderDetection];

pub struct FallbackListener {
    secondary: Arc<dyn UserDao>,
}

impl FallbackListener {
    pub fn new(secondary: Arc<dyn UserDao>) -> Self {
        Self { secondary }
    }

    /// Tags of `attrs` the secondary owns
    pub fn forwarded(&self, attrs: &AttrSet) -> AttrSet {
        self.secondary.capabilities().owned(attrs)
    }
}

#[async_trait]
impl UserListener for FallbackListener {
    #[instrument(skip(self, user), fields(guid = %user.guid))]
    async fn on_loaded(&self, user: &User) -> Result<UserPatch> {
        let bridged = self.forwarded(&AttrSet::from(BRIDGED_ATTRIBUTES));
        if bridged.is_empty() || user.guid.is_blank() {
            return Ok(UserPatch::default());
        }

        let Some(secondary) = self.secondary.find_by_guid(&user.guid, true).await? else {
            debug!("No secondary record to load from");
            return Ok(UserPatch::default());
        };

        let mut merged = user.clone();
        merged.copy_attrs(&secondary, &bridged);
        Ok(UserPatch {
            mfa: Some(merged.mfa),
            self_service: Some(merged.self_service),
        })
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, attrs = %attrs))]
    async fn on_updated(&self, user: &User, attrs: &AttrSet) -> Result<()> {
        let forwarded = self.forwarded(attrs);
        if forwarded.is_empty() {
            return Ok(());
        }

        let Some(original) = self.secondary.find_by_guid(&user.guid, true).await? else {
            debug!(attrs = %forwarded, "No secondary record; dropping forwarded update");
            return Ok(());
        };

        debug!(attrs = %forwarded, "Forwarding update to secondary");
        self.secondary.update_from(&original, user, &forwarded).await
    }
}
