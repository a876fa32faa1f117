//! Okta user directory
//!
//! This DAO supports:
//! - Lookups and streaming search through the Okta `search` syntax
//! - Writes restricted to the profile fields it owns, committed only on change
//! - Soft deactivation by suspending the account and parking its email
//! - Group membership through flat, prefix-named Okta groups

use async_trait::async_trait;
use futures::{
    future,
    stream::{BoxStream, StreamExt, TryStreamExt},
    Stream,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use idm_core::{
    restrict_results, Attr, AttrSet, Attribute, BackendCapabilities, CloudUserId,
    DeactivationCodec, Expression, Group, GroupDao, Guid, IdmError, Listeners, Matcher,
    PrefixGroup, Result, StoredEmail, User, UserDao, UserListener, UserStream,
};

use super::okta_client::{EmailStatus, OktaClient, OktaProfile, OktaUser};
use super::okta_filter::{self, comparison};
use super::okta_schema::{self, *};
use crate::config::OktaSettings;

const BACKEND: &str = "okta";

/// Okta-backed [`UserDao`]
pub struct OktaUserDao {
    client: Arc<dyn OktaClient>,
    capabilities: BackendCapabilities,
    initial_groups: Vec<String>,
    mapper: OktaMapper,
}

/// Conversion from Okta users to canonical records.
///
/// Cloned into search streams so they outlive the call that created them.
#[derive(Clone)]
struct OktaMapper {
    client: Arc<dyn OktaClient>,
    codec: DeactivationCodec,
    listeners: Listeners,
}

impl OktaUserDao {
    pub fn new(client: Arc<dyn OktaClient>, settings: &OktaSettings) -> Result<Self> {
        okta_schema::validate(&settings.owned_attributes)?;
        if settings.deactivated_prefix.is_empty() {
            return Err(IdmError::config("okta deactivated prefix must not be empty"));
        }

        info!(
            owned = %settings.owned_attributes,
            read_only = settings.read_only,
            "Configured Okta user directory"
        );

        Ok(Self {
            client: client.clone(),
            capabilities: BackendCapabilities {
                name: BACKEND.to_string(),
                read_only: settings.read_only,
                supports_group_query: false,
                owned_attributes: settings.owned_attributes.clone(),
                max_search_results: settings.max_search_results,
                case_insensitive: settings.case_insensitive,
            },
            initial_groups: settings.initial_groups.clone(),
            mapper: OktaMapper {
                client,
                codec: DeactivationCodec::new(
                    &settings.deactivated_prefix,
                    &settings.deactivated_suffix,
                ),
                listeners: Listeners::new(),
            },
        })
    }

    pub fn register_listener(&mut self, listener: Arc<dyn UserListener>) {
        self.mapper.listeners.register(listener);
    }

    pub fn with_listener(mut self, listener: Arc<dyn UserListener>) -> Self {
        self.register_listener(listener);
        self
    }

    /// Look a user up by Okta id
    #[instrument(skip(self))]
    pub async fn find_by_cloud_id(
        &self,
        id: &CloudUserId,
        include_deactivated: bool,
    ) -> Result<Option<User>> {
        if id.is_blank() {
            return Ok(None);
        }
        let okta = self.client.get_user(id).await?;
        self.load_visible(okta, include_deactivated).await
    }

    async fn load_visible(
        &self,
        okta: Option<OktaUser>,
        include_deactivated: bool,
    ) -> Result<Option<User>> {
        let Some(okta) = okta else {
            return Ok(None);
        };
        let user = self.mapper.bare_user(&okta);
        if user.deactivated && !include_deactivated {
            return Ok(None);
        }
        self.mapper.hydrate(user, true).await.map(Some)
    }

    async fn first_match(&self, search: String) -> Result<Option<OktaUser>> {
        let mut users = self.client.list_users(Some(search));
        Ok(users.next().await.transpose()?)
    }

    /// The Okta user behind `user`, by cloud id when known, else by GUID
    async fn find_okta_user(&self, user: &User) -> Result<Option<OktaUser>> {
        if let Some(id) = user.cloud_id.as_ref().filter(|id| !id.is_blank()) {
            if let Some(found) = self.client.get_user(id).await? {
                return Ok(Some(found));
            }
        }
        if user.guid.is_blank() {
            return Ok(None);
        }
        self.first_match(comparison(THEKEY_GUID, "eq", user.guid.as_str()))
            .await
    }

    async fn require_okta_user(&self, user: &User) -> Result<OktaUser> {
        self.find_okta_user(user)
            .await?
            .ok_or_else(|| IdmError::not_found("user", user.guid.as_str()))
    }

    fn write_password(okta: &mut OktaUser, user: &User) -> bool {
        match &user.password {
            Some(password) => {
                okta.credentials.password = Some(password.clone());
                true
            }
            None => false,
        }
    }
}

fn prefix_group(group: &Group) -> Result<&PrefixGroup> {
    match group {
        Group::Prefix(group) => Ok(group),
        Group::Path { .. } => Err(IdmError::invalid_group(format!(
            "{group} is not an Okta group"
        ))),
    }
}

impl OktaMapper {
    /// Map the profile without consulting groups or listeners
    fn bare_user(&self, okta: &OktaUser) -> User {
        let profile = &okta.profile;
        let text = |field: &str| profile.get_str(field).map(str::to_string);

        let stored = StoredEmail {
            live: profile.get_str(EMAIL).unwrap_or_default().to_string(),
            shadow: text(ORIGINAL_EMAIL),
        };
        let decoded = self.codec.decode(&stored);
        let email_verified = okta
            .credentials
            .emails
            .iter()
            .find(|e| e.value.eq_ignore_ascii_case(&stored.live))
            .is_some_and(|e| e.status == EmailStatus::Verified);

        User {
            guid: Guid::new(profile.get_str(THEKEY_GUID).unwrap_or_default()),
            cloud_id: Some(okta.id.clone()),
            email: decoded.email,
            email_verified,
            deactivated: decoded.deactivated,
            first_name: text(FIRST_NAME),
            preferred_name: text(NICK_NAME),
            last_name: text(LAST_NAME),
            telephone_number: text(PHONE_NUMBER),
            city: text(CITY),
            state: text(STATE),
            postal: text(ZIP_CODE),
            country: text(COUNTRY),
            employee_id: text(US_EMPLOYEE_ID),
            designation: text(US_DESIGNATION),
            ministry_code: text(ORGANIZATION),
            sub_ministry_code: text(DIVISION),
            department_number: text(DEPARTMENT),
            manager_id: text(MANAGER_ID),
            email_aliases: profile.get_list(EMAIL_ALIASES),
            login_time: okta.last_login,
            ..User::default()
        }
    }

    async fn load_groups(&self, user: &mut User) -> Result<()> {
        if let Some(id) = &user.cloud_id {
            let groups = self.client.list_user_groups(id).await?;
            user.groups = groups
                .into_iter()
                .map(|g| Group::prefix(g.id, g.name))
                .collect();
        }
        Ok(())
    }

    async fn hydrate(&self, mut user: User, load_groups: bool) -> Result<User> {
        if load_groups {
            self.load_groups(&mut user).await?;
        }
        self.listeners.loaded(&mut user).await?;
        Ok(user)
    }

    /// Drop deactivated users unless they were asked for
    fn visible<S>(&self, users: S, include_deactivated: bool) -> BoxStream<'static, Result<OktaUser>>
    where
        S: Stream<Item = Result<OktaUser>> + Send + 'static,
    {
        if include_deactivated {
            return users.boxed();
        }
        let codec = self.codec.clone();
        users
            .try_filter(move |okta| {
                future::ready(!codec.is_synthetic(okta.profile.get_str(EMAIL).unwrap_or_default()))
            })
            .boxed()
    }

    /// Write one change tag into `profile`, reporting whether anything changed
    fn write_profile(&self, profile: &mut OktaProfile, user: &User, attr: Attr) -> bool {
        let mut changed = false;
        match attr {
            Attr::Email => {
                let stored = self.codec.encode(user);
                changed |= profile.set_str(EMAIL, Some(&stored.live));
                changed |= profile.set_str(LOGIN, Some(&stored.live));
                changed |= profile.set_str(ORIGINAL_EMAIL, stored.shadow.as_deref());
            }
            Attr::Name => {
                changed |= profile.set_str(FIRST_NAME, user.first_name.as_deref());
                changed |= profile.set_str(NICK_NAME, user.preferred_name.as_deref());
                changed |= profile.set_str(LAST_NAME, user.last_name.as_deref());
            }
            Attr::PreferredName => {
                changed |= profile.set_str(NICK_NAME, user.preferred_name.as_deref());
            }
            Attr::Contact => {
                changed |= profile.set_str(PHONE_NUMBER, user.telephone_number.as_deref());
            }
            Attr::Location => {
                changed |= profile.set_str(CITY, user.city.as_deref());
                changed |= profile.set_str(STATE, user.state.as_deref());
                changed |= profile.set_str(ZIP_CODE, user.postal.as_deref());
                changed |= profile.set_str(COUNTRY, user.country.as_deref());
            }
            Attr::EmployeeNumber => {
                changed |= profile.set_str(US_EMPLOYEE_ID, user.employee_id.as_deref());
            }
            Attr::Designation => {
                changed |= profile.set_str(US_DESIGNATION, user.designation.as_deref());
            }
            Attr::HumanResource => {
                changed |= profile.set_str(ORGANIZATION, user.ministry_code.as_deref());
                changed |= profile.set_str(DIVISION, user.sub_ministry_code.as_deref());
                changed |= profile.set_str(DEPARTMENT, user.department_number.as_deref());
                changed |= profile.set_str(MANAGER_ID, user.manager_id.as_deref());
            }
            Attr::EmailAliases => {
                changed |= profile.set_list(EMAIL_ALIASES, &user.email_aliases);
            }
            Attr::Password
            | Attr::Flags
            | Attr::SelfServiceKeys
            | Attr::MfaSecret
            | Attr::MfaIntruderDetection
            | Attr::LoginTime => {}
        }
        changed
    }
}

#[async_trait]
impl UserDao for OktaUserDao {
    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str, include_deactivated: bool) -> Result<Option<User>> {
        if email.trim().is_empty() {
            return Ok(None);
        }
        let search = if include_deactivated {
            format!(
                "{} or {}",
                comparison(EMAIL, "eq", email),
                comparison(ORIGINAL_EMAIL, "eq", email)
            )
        } else {
            comparison(EMAIL, "eq", email)
        };
        let okta = self.first_match(search).await?;
        self.load_visible(okta, include_deactivated).await
    }

    #[instrument(skip(self), fields(guid = %guid))]
    async fn find_by_guid(&self, guid: &Guid, include_deactivated: bool) -> Result<Option<User>> {
        if guid.is_blank() {
            return Ok(None);
        }
        let okta = self
            .first_match(comparison(THEKEY_GUID, "eq", guid.as_str()))
            .await?;
        self.load_visible(okta, include_deactivated).await
    }

    #[instrument(skip(self, expression))]
    async fn search(
        &self,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream> {
        let filter = expression
            .map(|e| okta_filter::compile(e, include_deactivated))
            .transpose()?;
        debug!(filter = ?filter, "Searching Okta users");

        let users = self.client.list_users(filter).map_err(IdmError::from);
        let candidates = self.mapper.visible(users, include_deactivated);
        let bounded = restrict_results(
            candidates,
            self.capabilities.max_search_results,
            restrict,
        );

        let mapper = self.mapper.clone();
        Ok(bounded
            .and_then(move |okta| {
                let mapper = mapper.clone();
                async move {
                    let user = mapper.bare_user(&okta);
                    mapper.hydrate(user, false).await
                }
            })
            .boxed())
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    async fn create(&self, user: &mut User) -> Result<()> {
        self.capabilities.ensure_writable()?;
        user.validate_identity()?;

        let mut profile = OktaProfile::new();
        profile.set_str(THEKEY_GUID, Some(user.guid.as_str()));
        for attr in Attr::ALL {
            self.mapper.write_profile(&mut profile, user, attr);
        }

        let created = self
            .client
            .create_user(profile, user.password.clone(), &self.initial_groups)
            .await?;
        info!(cloud_id = %created.id, "Created Okta user");

        user.cloud_id = Some(created.id);
        self.mapper.listeners.created(user).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, attrs = %attrs))]
    async fn update(&self, user: &User, attrs: &AttrSet) -> Result<()> {
        self.capabilities.ensure_writable()?;
        user.validate_identity()?;

        let attrs = attrs.clone().or_defaults();
        let owned = self.capabilities.owned(&attrs);
        if !owned.is_empty() {
            let mut okta = self.require_okta_user(user).await?;
            let mut changed = false;
            for attr in owned.iter() {
                changed |= match attr {
                    Attr::Password => Self::write_password(&mut okta, user),
                    _ => self.mapper.write_profile(&mut okta.profile, user, attr),
                };
            }

            if changed {
                self.client.update_user(&okta).await?;
                info!(cloud_id = %okta.id, "Updated Okta user");
            } else {
                debug!("Okta user already up to date");
            }
        }

        self.mapper.listeners.updated(user, &attrs).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    async fn deactivate(&self, user: &mut User) -> Result<()> {
        self.capabilities.ensure_writable()?;
        let Some(okta) = self.find_okta_user(user).await? else {
            debug!("No Okta user to deactivate");
            return Ok(());
        };

        self.client.suspend_user(&okta.id).await?;
        let original = user.clone();
        user.mark_deactivated();
        self.update_from(&original, user, &AttrSet::activation()).await?;
        info!(cloud_id = %okta.id, "Deactivated Okta user");
        Ok(())
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    async fn reactivate(&self, user: &mut User) -> Result<()> {
        self.capabilities.ensure_writable()?;
        let Some(okta) = self.find_okta_user(user).await? else {
            debug!("No Okta user to reactivate");
            return Ok(());
        };

        let original = user.clone();
        user.mark_reactivated();
        self.update_from(&original, user, &AttrSet::activation()).await?;
        self.client.unsuspend_user(&okta.id).await?;
        info!(cloud_id = %okta.id, "Reactivated Okta user");
        Ok(())
    }

    fn groups(&self) -> Option<&dyn GroupDao> {
        Some(self)
    }
}

#[async_trait]
impl GroupDao for OktaUserDao {
    #[instrument(skip(self))]
    async fn list_groups(&self, scope: Option<&str>) -> Result<Vec<Group>> {
        let scope = scope.filter(|s| !s.trim().is_empty());
        let groups = self.client.list_groups().await?;
        Ok(groups
            .into_iter()
            .map(|g| PrefixGroup::new(g.id, g.name))
            .filter(|g| scope.map_or(true, |scope| g.contains_or_equals(scope)))
            .map(Group::Prefix)
            .collect())
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, group = %group))]
    async fn add_to_group(&self, user: &User, group: &Group) -> Result<()> {
        self.capabilities.ensure_writable()?;
        let group = prefix_group(group)?;
        let okta = self.require_okta_user(user).await?;
        self.client.add_user_to_group(&group.id, &okta.id).await?;
        info!(cloud_id = %okta.id, "Added user to Okta group");
        Ok(())
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, group = %group))]
    async fn remove_from_group(&self, user: &User, group: &Group) -> Result<()> {
        self.capabilities.ensure_writable()?;
        let group = prefix_group(group)?;
        let okta = self.require_okta_user(user).await?;
        if self.client.get_group(&group.id).await?.is_none() {
            return Err(IdmError::not_found("group", &group.id));
        }
        self.client.remove_user_from_group(&group.id, &okta.id).await?;
        info!(cloud_id = %okta.id, "Removed user from Okta group");
        Ok(())
    }

    #[instrument(skip(self, expression), fields(group = %group))]
    async fn search_in_group(
        &self,
        group: &Group,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream> {
        let group = prefix_group(group)?;
        if let Some(expression) = expression {
            Matcher::validate(expression)?;
        }
        let okta_group = self
            .client
            .get_group(&group.id)
            .await?
            .ok_or_else(|| IdmError::not_found("group", &group.id))?;

        let matcher = self.capabilities.matcher();
        let expression = expression.cloned();
        let needs_groups = expression
            .as_ref()
            .is_some_and(|e| e.references(Attribute::Group));

        let members = self
            .client
            .list_group_members(&okta_group.id)
            .map_err(IdmError::from);
        let loader = self.mapper.clone();
        let matching = self
            .mapper
            .visible(members, include_deactivated)
            .and_then(move |okta| {
                let mapper = loader.clone();
                async move {
                    let mut user = mapper.bare_user(&okta);
                    if needs_groups {
                        mapper.load_groups(&mut user).await?;
                    }
                    Ok(user)
                }
            })
            .try_filter_map(move |user| {
                let matched = matcher.matches(&user, expression.as_ref());
                future::ready(matched.map(|m| m.then_some(user)))
            })
            .boxed();

        let bounded = restrict_results(matching, self.capabilities.max_search_results, restrict);
        let mapper = self.mapper.clone();
        Ok(bounded
            .and_then(move |user| {
                let mapper = mapper.clone();
                async move { mapper.hydrate(user, false).await }
            })
            .boxed())
    }
}
