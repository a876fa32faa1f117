//! Backend traits for the IDM directory layer

use crate::{
    attrs::AttrSet,
    error::{IdmError, Result},
    evaluator::Matcher,
    group::Group,
    ids::Guid,
    models::{User, UserPatch},
    query::Expression,
    stream::SearchLimit,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::debug;

/// Lazily produced search results
pub type UserStream = BoxStream<'static, Result<User>>;

// =============================================================================
// Capabilities
// =============================================================================

/// Static description of what a backend can do, fixed at construction
#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    pub name: String,
    pub read_only: bool,
    /// Whether the backend can combine a group scope with a filter server-side
    pub supports_group_query: bool,
    pub owned_attributes: AttrSet,
    pub max_search_results: SearchLimit,
    /// Case folding used when evaluating expressions in memory
    pub case_insensitive: bool,
}

impl BackendCapabilities {
    pub fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(IdmError::read_only(&self.name));
        }
        Ok(())
    }

    /// Tags of a write this backend applies itself
    pub fn owned(&self, attrs: &AttrSet) -> AttrSet {
        attrs.intersection(&self.owned_attributes)
    }

    pub fn matcher(&self) -> Matcher {
        Matcher::new(self.case_insensitive)
    }
}

// =============================================================================
// User DAO
// =============================================================================

#[async_trait]
pub trait UserDao: Send + Sync {
    fn capabilities(&self) -> &BackendCapabilities;

    async fn find_by_email(&self, email: &str, include_deactivated: bool) -> Result<Option<User>>;

    async fn find_by_guid(&self, guid: &Guid, include_deactivated: bool) -> Result<Option<User>>;

    /// Stream every user matching `expression`.
    ///
    /// With `restrict` set the stream fails with `ResultLimitExceeded` once
    /// more than `max_search_results` records have been consumed.
    async fn search(
        &self,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream>;

    /// Provision `user`, recording any backend identifiers on it
    async fn create(&self, user: &mut User) -> Result<()>;

    /// Write the facets named by `attrs`; an empty set means the defaults
    async fn update(&self, user: &User, attrs: &AttrSet) -> Result<()>;

    /// Copy the facets named by `attrs` from `source` onto `original` and write them
    async fn update_from(&self, original: &User, source: &User, attrs: &AttrSet) -> Result<()> {
        let mut merged = original.clone();
        merged.copy_attrs(source, attrs);
        self.update(&merged, attrs).await
    }

    async fn deactivate(&self, user: &mut User) -> Result<()> {
        let original = user.clone();
        user.mark_deactivated();
        self.update_from(&original, user, &AttrSet::activation()).await
    }

    async fn reactivate(&self, user: &mut User) -> Result<()> {
        let original = user.clone();
        user.mark_reactivated();
        self.update_from(&original, user, &AttrSet::activation()).await
    }

    /// Group operations, when the backend supports them
    fn groups(&self) -> Option<&dyn GroupDao> {
        None
    }
}

#[async_trait]
pub trait GroupDao: Send + Sync {
    /// Groups whose name equals or descends from `scope`; `None` or a blank scope lists all groups
    async fn list_groups(&self, scope: Option<&str>) -> Result<Vec<Group>>;

    async fn add_to_group(&self, user: &User, group: &Group) -> Result<()>;

    async fn remove_from_group(&self, user: &User, group: &Group) -> Result<()>;

    async fn search_in_group(
        &self,
        group: &Group,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream>;
}

// =============================================================================
// Listeners
// =============================================================================

/// Observer of user lifecycle events raised by a DAO
#[async_trait]
pub trait UserListener: Send + Sync {
    /// Changes to apply to a record just read from the backend
    async fn on_loaded(&self, _user: &User) -> Result<UserPatch> {
        Ok(UserPatch::default())
    }

    async fn on_created(&self, _user: &User) -> Result<()> {
        Ok(())
    }

    async fn on_updated(&self, _user: &User, _attrs: &AttrSet) -> Result<()> {
        Ok(())
    }
}

/// Listeners invoked in registration order; the first failure aborts the chain
#[derive(Clone, Default)]
pub struct Listeners {
    listeners: Vec<Arc<dyn UserListener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn UserListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub async fn loaded(&self, user: &mut User) -> Result<()> {
        for listener in &self.listeners {
            let patch = listener.on_loaded(user).await?;
            if !patch.is_empty() {
                debug!(guid = %user.guid, "Applying listener patch");
                user.apply(patch);
            }
        }
        Ok(())
    }

    pub async fn created(&self, user: &User) -> Result<()> {
        for listener in &self.listeners {
            listener.on_created(user).await?;
        }
        Ok(())
    }

    pub async fn updated(&self, user: &User, attrs: &AttrSet) -> Result<()> {
        for listener in &self.listeners {
            listener.on_updated(user, attrs).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}
