//! Directory facade
//!
//! The single entry point callers use. Reads and writes go to the primary
//! DAO; the secondary is reached only through the bridge listener the
//! primary carries.

use futures::{
    future,
    stream::{StreamExt, TryStreamExt},
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use idm_core::{
    restrict_results, AttrSet, Attribute, BooleanOp, ComparisonValue, Expression, Group,
    GroupDao, Guid, IdmError, Matcher, Operator, Result, User, UserDao, UserStream,
};

use crate::bridge::FallbackListener;
use crate::config::DirectorySettings;
use crate::providers::{
    ldap::LdapUserDao, ldap_client::LdapClient, okta::OktaUserDao, okta_client::OktaClient,
};

pub struct Directory {
    primary: Arc<dyn UserDao>,
    secondary: Option<Arc<dyn UserDao>>,
}

/// Split a top-level group scope off `expression`
fn group_scope(expression: &Expression) -> Option<(Group, Option<Expression>)> {
    let as_group = |e: &Expression| match e {
        Expression::Comparison {
            attribute: Attribute::Group,
            operator: Operator::Eq,
            value: ComparisonValue::Group(group),
        } => Some(group.clone()),
        _ => None,
    };

    if let Some(group) = as_group(expression) {
        return Some((group, None));
    }
    let Expression::Boolean {
        op: BooleanOp::And,
        children,
    } = expression
    else {
        return None;
    };
    let position = children.iter().position(|c| as_group(c).is_some())?;
    let group = as_group(&children[position])?;
    let rest: Vec<Expression> = children
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != position)
        .map(|(_, c)| c.clone())
        .collect();
    let rest = match rest.len() {
        0 => None,
        1 => rest.into_iter().next(),
        _ => Some(Expression::and(rest)),
    };
    Some((group, rest))
}

impl Directory {
    pub fn new(primary: Arc<dyn UserDao>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Record the secondary DAO; the primary must already carry its bridge listener
    pub fn with_secondary(mut self, secondary: Arc<dyn UserDao>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Okta primary with an optional LDAP secondary bridged behind it
    pub fn from_settings(
        okta: Arc<dyn OktaClient>,
        ldap: Option<Arc<dyn LdapClient>>,
        settings: &DirectorySettings,
    ) -> Result<Self> {
        settings.validate()?;
        let mut primary = OktaUserDao::new(okta, &settings.okta)?;
        let secondary = match ldap {
            Some(client) => {
                let secondary: Arc<dyn UserDao> =
                    Arc::new(LdapUserDao::new(client, &settings.ldap)?);
                primary.register_listener(Arc::new(FallbackListener::new(secondary.clone())));
                Some(secondary)
            }
            None => None,
        };

        info!(bridged = secondary.is_some(), "Directory initialized");
        Ok(Self {
            primary: Arc::new(primary),
            secondary,
        })
    }

    pub fn primary(&self) -> &dyn UserDao {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&dyn UserDao> {
        self.secondary.as_deref()
    }

    fn group_dao(&self) -> Result<&dyn GroupDao> {
        self.primary
            .groups()
            .ok_or_else(|| IdmError::unsupported("group operations"))
    }

    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str, include_deactivated: bool) -> Result<Option<User>> {
        self.primary.find_by_email(email, include_deactivated).await
    }

    #[instrument(skip(self), fields(guid = %guid))]
    pub async fn find_by_guid(&self, guid: &Guid, include_deactivated: bool) -> Result<Option<User>> {
        self.primary.find_by_guid(guid, include_deactivated).await
    }

    /// Reload `user` from the primary, deactivated or not
    pub async fn fresh(&self, user: &User) -> Result<User> {
        self.find_by_guid(&user.guid, true)
            .await?
            .ok_or_else(|| IdmError::not_found("user", user.guid.as_str()))
    }

    /// Search the primary, falling back to group listing or in-memory
    /// evaluation when the expression cannot be compiled
    #[instrument(skip(self, expression))]
    pub async fn search(
        &self,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream> {
        let err = match self
            .primary
            .search(expression, include_deactivated, restrict)
            .await
        {
            Ok(stream) => return Ok(stream),
            Err(err @ IdmError::UnsupportedQuery { .. }) => err,
            Err(err) => return Err(err),
        };
        let Some(expression) = expression else {
            return Err(err);
        };

        if let Some((group, rest)) = group_scope(expression) {
            if let Some(groups) = self.primary.groups() {
                debug!(group = %group, "Falling back to group-scoped search");
                return groups
                    .search_in_group(&group, rest.as_ref(), include_deactivated, restrict)
                    .await;
            }
        }
        if expression.references(Attribute::Group) {
            return Err(err);
        }

        debug!("Falling back to in-memory evaluation");
        let capabilities = self.primary.capabilities();
        let matcher = capabilities.matcher();
        Matcher::validate(expression)?;
        let expression = expression.clone();
        let matching = self
            .primary
            .search(None, include_deactivated, false)
            .await?
            .try_filter_map(move |user| {
                let matched = matcher.matches(&user, Some(&expression));
                future::ready(matched.map(|m| m.then_some(user)))
            })
            .boxed();
        Ok(restrict_results(
            matching,
            capabilities.max_search_results,
            restrict,
        ))
    }

    #[instrument(skip(self, expression), fields(group = %group))]
    pub async fn search_in_group(
        &self,
        group: &Group,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream> {
        self.group_dao()?
            .search_in_group(group, expression, include_deactivated, restrict)
            .await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    pub async fn create(&self, user: &mut User) -> Result<()> {
        user.validate_identity()?;
        if self.find_by_email(&user.email, false).await?.is_some() {
            return Err(IdmError::already_exists("email", &user.email));
        }
        if self.find_by_guid(&user.guid, true).await?.is_some() {
            return Err(IdmError::already_exists("guid", user.guid.as_str()));
        }
        self.primary.create(user).await
    }

    /// Create `user`, generating a GUID when none is set
    pub async fn create_with_defaults(&self, user: &mut User) -> Result<()> {
        if user.guid.is_blank() {
            user.guid = Guid::generate();
        }
        self.create(user).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    pub async fn update(&self, user: &User, attrs: &AttrSet) -> Result<()> {
        self.primary.update(user, attrs).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    pub async fn deactivate(&self, user: &mut User) -> Result<()> {
        if user.deactivated {
            debug!("User already deactivated");
            return Ok(());
        }
        self.primary.deactivate(user).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    pub async fn reactivate(&self, user: &mut User) -> Result<()> {
        if let Some(live) = self.find_by_email(&user.email, false).await? {
            if live.guid != user.guid {
                return Err(IdmError::already_exists("email", &user.email));
            }
        }
        self.primary.reactivate(user).await
    }

    pub async fn list_groups(&self, scope: Option<&str>) -> Result<Vec<Group>> {
        self.group_dao()?.list_groups(scope).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, group = %group))]
    pub async fn add_to_group(&self, user: &User, group: &Group) -> Result<()> {
        self.group_dao()?.add_to_group(user, group).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, group = %group))]
    pub async fn remove_from_group(&self, user: &User, group: &Group) -> Result<()> {
        self.group_dao()?.remove_from_group(user, group).await
    }
}
