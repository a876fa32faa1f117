//! LDAP user directory
//!
//! This DAO supports:
//! - User entries named `cn=<email>` under a base search DN
//! - Soft deactivation by renaming the entry to `cn=$GUID$-=<guid>`
//! - Server-side group-scoped search through `groupMembership`
//! - Paged search with a page size derived from the result bound

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use idm_core::{
    restrict_results, Attr, AttrSet, BackendCapabilities, Component, DeactivationCodec, Dn,
    Expression, Group, GroupDao, Guid, IdmError, Listeners, MfaState, PathGroup, Result,
    SelfServiceKeys, User, UserDao, UserListener, UserStream,
};

use super::ldap_client::{ClientResult, LdapClient, LdapClientError, LdapEntry, LdapModification, SearchRequest};
use super::ldap_filter::{self, LdapFilter, *};
use crate::config::LdapSettings;

const BACKEND: &str = "ldap";

pub const ATTR_PASSWORD: &str = "userPassword";
pub const ATTR_PREFERRED_NAME: &str = "cruPreferredName";
pub const ATTR_TELEPHONE: &str = "telephoneNumber";
pub const ATTR_CITY: &str = "city";
pub const ATTR_STATE: &str = "st";
pub const ATTR_POSTAL_CODE: &str = "postalCode";
pub const ATTR_COUNTRY: &str = "c";
pub const ATTR_MINISTRY_CODE: &str = "cruMinistryCode";
pub const ATTR_SUB_MINISTRY_CODE: &str = "cruSubMinistryCode";
pub const ATTR_DEPARTMENT_NUMBER: &str = "departmentNumber";
pub const ATTR_MANAGER_ID: &str = "cruManagerID";
pub const ATTR_LOGIN_TIME: &str = "loginTime";
pub const ATTR_MEMBER: &str = "member";

pub const ATTR_MFA_BYPASS: &str = "thekeyMfaBypass";
pub const ATTR_MFA_SECRET: &str = "thekeyMfaSecret";
pub const ATTR_MFA_INTRUDER_LOCKED: &str = "thekeyMfaIntruderLocked";
pub const ATTR_MFA_INTRUDER_ATTEMPTS: &str = "thekeyMfaIntruderAttempts";
pub const ATTR_MFA_INTRUDER_RESET_TIME: &str = "thekeyMfaIntruderResetTime";

pub const ATTR_RESET_PASSWORD_KEY: &str = "thekeyResetPasswordKey";
pub const ATTR_SIGNUP_KEY: &str = "thekeySignupKey";
pub const ATTR_CHANGE_EMAIL_KEY: &str = "thekeyChangeEmailKey";
pub const ATTR_PROPOSED_EMAIL: &str = "thekeyProposedEmail";

pub const FLAG_ALLOW_PASSWORD_CHANGE: &str = "passwordAllowChange";
pub const FLAG_FORCE_PASSWORD_CHANGE: &str = "thekeyPasswordForceChange";
pub const FLAG_LOGIN_DISABLED: &str = "loginDisabled";
pub const FLAG_LOCKED: &str = "lockedByIntruder";
pub const FLAG_EMAIL_VERIFIED: &str = "thekeyAccountVerified";

pub const OBJECT_CLASS_PERSON: &str = "Person";
pub const OBJECT_CLASS_GROUP: &str = "groupOfNames";
pub const USER_OBJECT_CLASSES: [&str; 6] = [
    "Top",
    OBJECT_CLASS_PERSON,
    "organizationalPerson",
    "inetOrgPerson",
    "ndsLoginProperties",
    "thekeyAttributes",
];

/// LDAP generalized time
const TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// LDAP attributes written for each change tag
pub fn attribute_names(attr: Attr) -> &'static [&'static str] {
    match attr {
        Attr::Email => &[ATTR_UID, FLAG_EMAIL_VERIFIED],
        Attr::Password => &[ATTR_PASSWORD],
        Attr::Name => &[ATTR_FIRST_NAME, ATTR_PREFERRED_NAME, ATTR_LAST_NAME],
        Attr::PreferredName => &[ATTR_PREFERRED_NAME],
        Attr::Contact => &[ATTR_TELEPHONE],
        Attr::Location => &[ATTR_CITY, ATTR_STATE, ATTR_POSTAL_CODE, ATTR_COUNTRY],
        Attr::EmployeeNumber => &[ATTR_EMPLOYEE_ID],
        Attr::Designation => &[ATTR_DESIGNATION],
        Attr::HumanResource => &[
            ATTR_MINISTRY_CODE,
            ATTR_SUB_MINISTRY_CODE,
            ATTR_DEPARTMENT_NUMBER,
            ATTR_MANAGER_ID,
        ],
        Attr::EmailAliases => &[ATTR_EMAIL_ALIASES],
        Attr::Flags => &[
            FLAG_ALLOW_PASSWORD_CHANGE,
            FLAG_LOGIN_DISABLED,
            FLAG_FORCE_PASSWORD_CHANGE,
            FLAG_LOCKED,
        ],
        Attr::SelfServiceKeys => &[
            ATTR_SIGNUP_KEY,
            ATTR_CHANGE_EMAIL_KEY,
            ATTR_PROPOSED_EMAIL,
            ATTR_RESET_PASSWORD_KEY,
        ],
        Attr::MfaSecret => &[ATTR_MFA_BYPASS, ATTR_MFA_SECRET],
        Attr::MfaIntruderDetection => &[
            ATTR_MFA_INTRUDER_LOCKED,
            ATTR_MFA_INTRUDER_ATTEMPTS,
            ATTR_MFA_INTRUDER_RESET_TIME,
        ],
        Attr::LoginTime => &[ATTR_LOGIN_TIME],
    }
}

fn text(value: Option<&str>) -> Vec<String> {
    value.map(str::to_string).into_iter().collect()
}

fn flag(value: bool) -> Vec<String> {
    vec![if value { "TRUE" } else { "FALSE" }.to_string()]
}

fn time(value: Option<DateTime<Utc>>) -> Vec<String> {
    value
        .map(|t| t.format(TIME_FORMAT).to_string())
        .into_iter()
        .collect()
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// Attribute values for one change tag, in [`attribute_names`] order.
///
/// An empty value list clears the attribute. The password is omitted
/// entirely when none is set.
pub fn attribute_values(user: &User, attr: Attr) -> Vec<(&'static str, Vec<String>)> {
    match attr {
        Attr::Email => vec![
            (ATTR_UID, vec![user.email.clone()]),
            (FLAG_EMAIL_VERIFIED, flag(user.email_verified)),
        ],
        Attr::Password => match &user.password {
            Some(password) => vec![(ATTR_PASSWORD, vec![password.clone()])],
            None => Vec::new(),
        },
        Attr::Name => vec![
            (ATTR_FIRST_NAME, text(user.first_name.as_deref())),
            (ATTR_PREFERRED_NAME, text(user.preferred_name.as_deref())),
            (ATTR_LAST_NAME, text(user.last_name.as_deref())),
        ],
        Attr::PreferredName => vec![(ATTR_PREFERRED_NAME, text(user.preferred_name.as_deref()))],
        Attr::Contact => vec![(ATTR_TELEPHONE, text(user.telephone_number.as_deref()))],
        Attr::Location => vec![
            (ATTR_CITY, text(user.city.as_deref())),
            (ATTR_STATE, text(user.state.as_deref())),
            (ATTR_POSTAL_CODE, text(user.postal.as_deref())),
            (ATTR_COUNTRY, text(user.country.as_deref())),
        ],
        Attr::EmployeeNumber => vec![(ATTR_EMPLOYEE_ID, text(user.employee_id.as_deref()))],
        Attr::Designation => vec![(ATTR_DESIGNATION, text(user.designation.as_deref()))],
        Attr::HumanResource => vec![
            (ATTR_MINISTRY_CODE, text(user.ministry_code.as_deref())),
            (ATTR_SUB_MINISTRY_CODE, text(user.sub_ministry_code.as_deref())),
            (ATTR_DEPARTMENT_NUMBER, text(user.department_number.as_deref())),
            (ATTR_MANAGER_ID, text(user.manager_id.as_deref())),
        ],
        Attr::EmailAliases => vec![(ATTR_EMAIL_ALIASES, user.email_aliases.clone())],
        Attr::Flags => vec![
            (FLAG_ALLOW_PASSWORD_CHANGE, flag(user.allow_password_change)),
            (FLAG_LOGIN_DISABLED, flag(user.login_disabled)),
            (FLAG_FORCE_PASSWORD_CHANGE, flag(user.force_password_change)),
            // present only while locked
            (FLAG_LOCKED, if user.locked { flag(true) } else { Vec::new() }),
        ],
        Attr::SelfServiceKeys => {
            let keys = &user.self_service;
            vec![
                (ATTR_SIGNUP_KEY, text(keys.signup_key.as_deref())),
                (ATTR_CHANGE_EMAIL_KEY, text(keys.change_email_key.as_deref())),
                (ATTR_PROPOSED_EMAIL, text(keys.proposed_email.as_deref())),
                (ATTR_RESET_PASSWORD_KEY, text(keys.reset_password_key.as_deref())),
            ]
        }
        Attr::MfaSecret => vec![
            (ATTR_MFA_BYPASS, flag(user.mfa.bypassed)),
            (ATTR_MFA_SECRET, text(user.mfa.encrypted_secret.as_deref())),
        ],
        Attr::MfaIntruderDetection => {
            let attempts = user.mfa.intruder_attempts;
            vec![
                (ATTR_MFA_INTRUDER_LOCKED, flag(user.mfa.intruder_locked)),
                (
                    ATTR_MFA_INTRUDER_ATTEMPTS,
                    if attempts > 0 { vec![attempts.to_string()] } else { Vec::new() },
                ),
                (ATTR_MFA_INTRUDER_RESET_TIME, time(user.mfa.intruder_reset_time)),
            ]
        }
        Attr::LoginTime => vec![(ATTR_LOGIN_TIME, time(user.login_time))],
    }
}

/// LDAP-backed [`UserDao`]
pub struct LdapUserDao {
    client: Arc<dyn LdapClient>,
    capabilities: BackendCapabilities,
    base_search_dn: Dn,
    base_group_dn: Option<Dn>,
    max_page_size: usize,
    mapper: LdapMapper,
}

#[derive(Clone)]
struct LdapMapper {
    codec: DeactivationCodec,
    listeners: Listeners,
}

impl LdapMapper {
    fn to_user(&self, entry: &LdapEntry) -> User {
        let text = |attr: &str| entry.get(attr).map(str::to_string);
        let flag = |attr: &str| entry.get(attr).is_some_and(|v| v.eq_ignore_ascii_case("TRUE"));

        User {
            guid: Guid::new(entry.get(ATTR_GUID).unwrap_or_default()),
            email: entry.get(ATTR_UID).unwrap_or_default().to_string(),
            email_verified: flag(FLAG_EMAIL_VERIFIED),
            deactivated: self
                .codec
                .is_synthetic(entry.get(ATTR_CN).unwrap_or_default()),
            first_name: text(ATTR_FIRST_NAME),
            preferred_name: text(ATTR_PREFERRED_NAME),
            last_name: text(ATTR_LAST_NAME),
            telephone_number: text(ATTR_TELEPHONE),
            city: text(ATTR_CITY),
            state: text(ATTR_STATE),
            postal: text(ATTR_POSTAL_CODE),
            country: text(ATTR_COUNTRY),
            employee_id: text(ATTR_EMPLOYEE_ID),
            designation: text(ATTR_DESIGNATION),
            ministry_code: text(ATTR_MINISTRY_CODE),
            sub_ministry_code: text(ATTR_SUB_MINISTRY_CODE),
            department_number: text(ATTR_DEPARTMENT_NUMBER),
            manager_id: text(ATTR_MANAGER_ID),
            email_aliases: entry.values(ATTR_EMAIL_ALIASES).to_vec(),
            login_disabled: flag(FLAG_LOGIN_DISABLED),
            allow_password_change: flag(FLAG_ALLOW_PASSWORD_CHANGE),
            force_password_change: flag(FLAG_FORCE_PASSWORD_CHANGE),
            locked: flag(FLAG_LOCKED),
            mfa: MfaState {
                bypassed: flag(ATTR_MFA_BYPASS),
                encrypted_secret: text(ATTR_MFA_SECRET),
                intruder_locked: flag(ATTR_MFA_INTRUDER_LOCKED),
                intruder_attempts: entry
                    .get(ATTR_MFA_INTRUDER_ATTEMPTS)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default(),
                intruder_reset_time: entry.get(ATTR_MFA_INTRUDER_RESET_TIME).and_then(parse_time),
            },
            self_service: SelfServiceKeys {
                signup_key: text(ATTR_SIGNUP_KEY),
                proposed_email: text(ATTR_PROPOSED_EMAIL),
                change_email_key: text(ATTR_CHANGE_EMAIL_KEY),
                reset_password_key: text(ATTR_RESET_PASSWORD_KEY),
            },
            groups: entry
                .values(ATTR_GROUP_MEMBERSHIP)
                .iter()
                .filter_map(|dn| Group::path(dn).ok())
                .collect(),
            login_time: entry.get(ATTR_LOGIN_TIME).and_then(parse_time),
            ..User::default()
        }
    }

    async fn load(&self, entry: &LdapEntry) -> Result<User> {
        let mut user = self.to_user(entry);
        self.listeners.loaded(&mut user).await?;
        Ok(user)
    }

    /// Value of the naming attribute for `user`
    fn rdn_value(&self, user: &User) -> String {
        self.codec.encode(user).live
    }

    fn deactivated_filter(&self) -> LdapFilter {
        LdapFilter::starts_with(ATTR_CN, &self.codec.prefix)
    }
}

fn tolerate(result: ClientResult<()>, adding: bool) -> Result<()> {
    match result {
        Err(LdapClientError::AttributeOrValueExists { .. }) if adding => Ok(()),
        Err(LdapClientError::NoSuchAttribute { .. }) if !adding => Ok(()),
        other => other.map_err(IdmError::from),
    }
}

impl LdapUserDao {
    pub fn new(client: Arc<dyn LdapClient>, settings: &LdapSettings) -> Result<Self> {
        for attr in settings.owned_attributes.iter() {
            if attribute_names(attr).is_empty() {
                return Err(IdmError::config(format!(
                    "attribute {attr} has no ldap mapping"
                )));
            }
        }
        let base_search_dn = Dn::parse(&settings.base_search_dn)
            .map_err(|e| IdmError::config(format!("invalid ldap.base_search_dn: {e}")))?;
        if base_search_dn.is_root() {
            return Err(IdmError::config("ldap.base_search_dn must not be empty"));
        }
        if settings.deactivated_prefix.is_empty() {
            return Err(IdmError::config("ldap deactivated prefix must not be empty"));
        }
        if settings.max_page_size == 0 {
            return Err(IdmError::config("ldap.max_page_size must be positive"));
        }

        info!(
            base = %base_search_dn,
            owned = %settings.owned_attributes,
            read_only = settings.read_only,
            "Configured LDAP user directory"
        );

        Ok(Self {
            client,
            capabilities: BackendCapabilities {
                name: BACKEND.to_string(),
                read_only: settings.read_only,
                supports_group_query: true,
                owned_attributes: settings.owned_attributes.clone(),
                max_search_results: settings.max_search_results,
                case_insensitive: settings.case_insensitive,
            },
            base_search_dn,
            base_group_dn: settings.parsed_base_group_dn()?,
            max_page_size: settings.max_page_size,
            mapper: LdapMapper {
                codec: DeactivationCodec::new(&settings.deactivated_prefix, ""),
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

    /// DN the entry for `user` lives at
    pub fn user_dn(&self, user: &User) -> Dn {
        self.base_search_dn.child(ATTR_CN, self.mapper.rdn_value(user))
    }

    /// Wrap `filter` so it only matches user entries
    fn user_filter(&self, filter: Option<LdapFilter>, include_deactivated: bool) -> LdapFilter {
        let mut parts = vec![LdapFilter::eq(ATTR_OBJECT_CLASS, OBJECT_CLASS_PERSON)];
        parts.extend(filter);
        if !include_deactivated {
            parts.push(LdapFilter::not(self.mapper.deactivated_filter()));
        }
        LdapFilter::And(parts)
    }

    fn request(&self, base: &Dn, filter: LdapFilter, restrict: bool) -> SearchRequest {
        SearchRequest {
            base_dn: base.to_string(),
            filter,
            page_size: self
                .capabilities
                .max_search_results
                .page_size(self.max_page_size, restrict),
        }
    }

    async fn find_entry(&self, filter: LdapFilter) -> Result<Option<LdapEntry>> {
        let request = self.request(&self.base_search_dn, filter, false);
        let mut entries = self.client.search(request);
        Ok(entries.next().await.transpose()?)
    }

    async fn find_entry_by_guid(&self, guid: &Guid, include_deactivated: bool) -> Result<Option<LdapEntry>> {
        if guid.is_blank() {
            return Ok(None);
        }
        let filter = self.user_filter(
            Some(LdapFilter::eq(ATTR_GUID, guid.as_str())),
            include_deactivated,
        );
        self.find_entry(filter).await
    }

    async fn require_entry(&self, user: &User) -> Result<LdapEntry> {
        self.find_entry_by_guid(&user.guid, true)
            .await?
            .ok_or_else(|| IdmError::not_found("user", user.guid.as_str()))
    }

    fn group_root(&self) -> Result<&Dn> {
        self.base_group_dn
            .as_ref()
            .ok_or_else(|| IdmError::unsupported("ldap groups without a base group DN"))
    }

    fn stream(&self, request: SearchRequest, restrict: bool) -> UserStream {
        debug!(filter = %request.filter, page_size = request.page_size, "Searching LDAP");
        let entries = self.client.search(request).map_err(IdmError::from).boxed();
        let bounded = restrict_results(entries, self.capabilities.max_search_results, restrict);
        let mapper = self.mapper.clone();
        bounded
            .and_then(move |entry| {
                let mapper = mapper.clone();
                async move { mapper.load(&entry).await }
            })
            .boxed()
    }

    async fn modify_membership(&self, user: &User, group: &Group, adding: bool) -> Result<()> {
        self.capabilities.ensure_writable()?;
        let group_dn = ldap_filter::group_dn(group, self.base_group_dn.as_ref())?.to_string();
        let entry = self.require_entry(user).await?;

        let (on_user, on_group) = if adding {
            (
                LdapModification::Add {
                    attr: ATTR_GROUP_MEMBERSHIP.to_string(),
                    values: vec![group_dn.clone()],
                },
                LdapModification::Add {
                    attr: ATTR_MEMBER.to_string(),
                    values: vec![entry.dn.clone()],
                },
            )
        } else {
            (
                LdapModification::Delete {
                    attr: ATTR_GROUP_MEMBERSHIP.to_string(),
                    values: vec![group_dn.clone()],
                },
                LdapModification::Delete {
                    attr: ATTR_MEMBER.to_string(),
                    values: vec![entry.dn.clone()],
                },
            )
        };

        match self.client.modify(&group_dn, vec![on_group]).await {
            Err(LdapClientError::NoSuchObject { .. }) => {
                return Err(IdmError::not_found("group", group_dn))
            }
            result => tolerate(result, adding)?,
        }
        tolerate(self.client.modify(&entry.dn, vec![on_user]).await, adding)?;
        info!(group = %group_dn, adding, "Updated LDAP group membership");
        Ok(())
    }
}

#[async_trait]
impl UserDao for LdapUserDao {
    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str, include_deactivated: bool) -> Result<Option<User>> {
        if email.trim().is_empty() {
            return Ok(None);
        }
        let active = LdapFilter::And(vec![
            LdapFilter::not(self.mapper.deactivated_filter()),
            LdapFilter::eq(ATTR_CN, email),
        ]);
        let filter = if include_deactivated {
            LdapFilter::Or(vec![
                active,
                LdapFilter::And(vec![
                    self.mapper.deactivated_filter(),
                    LdapFilter::eq(ATTR_UID, email),
                ]),
            ])
        } else {
            active
        };
        let filter = LdapFilter::eq(ATTR_OBJECT_CLASS, OBJECT_CLASS_PERSON).and_also(filter);
        match self.find_entry(filter).await? {
            Some(entry) => self.mapper.load(&entry).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(guid = %guid))]
    async fn find_by_guid(&self, guid: &Guid, include_deactivated: bool) -> Result<Option<User>> {
        match self.find_entry_by_guid(guid, include_deactivated).await? {
            Some(entry) => self.mapper.load(&entry).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, expression))]
    async fn search(
        &self,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream> {
        let filter = expression
            .map(|e| ldap_filter::compile(e, self.base_group_dn.as_ref()))
            .transpose()?;
        let filter = self.user_filter(filter, include_deactivated);
        let request = self.request(&self.base_search_dn, filter, restrict);
        Ok(self.stream(request, restrict))
    }

    #[instrument(skip(self, user), fields(guid = %user.guid))]
    async fn create(&self, user: &mut User) -> Result<()> {
        self.capabilities.ensure_writable()?;
        user.validate_identity()?;

        let dn = self.user_dn(user).to_string();
        let mut entry = LdapEntry::new(&dn)
            .with(ATTR_OBJECT_CLASS, USER_OBJECT_CLASSES)
            .with(ATTR_CN, [self.mapper.rdn_value(user)])
            .with(ATTR_GUID, [user.guid.as_str()]);
        for attr in Attr::ALL {
            for (name, values) in attribute_values(user, attr) {
                entry.set(name, values);
            }
        }

        self.client.add(entry).await.map_err(|e| match e {
            LdapClientError::EntryAlreadyExists { .. } => {
                IdmError::already_exists("email", &user.email)
            }
            other => IdmError::from(other),
        })?;
        info!(dn = %dn, "Created LDAP user");

        self.mapper.listeners.created(user).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, attrs = %attrs))]
    async fn update(&self, user: &User, attrs: &AttrSet) -> Result<()> {
        self.capabilities.ensure_writable()?;
        user.validate_identity()?;

        let attrs = attrs.clone().or_defaults();
        let owned = self.capabilities.owned(&attrs);
        if !owned.is_empty() {
            let entry = self.require_entry(user).await?;
            let mut dn = entry.dn.clone();
            let mut changed = false;

            if owned.contains(Attr::Email) {
                let target = self.user_dn(user);
                if Dn::parse(&entry.dn).ok().as_ref() != Some(&target) {
                    let rdn = Component::new(ATTR_CN, self.mapper.rdn_value(user));
                    self.client.rename(&entry.dn, &rdn.to_string()).await?;
                    debug!(from = %entry.dn, to = %target, "Renamed LDAP user");
                    dn = target.to_string();
                    changed = true;
                }
            }

            let modifications: Vec<LdapModification> = owned
                .iter()
                .flat_map(|attr| attribute_values(user, attr))
                .filter(|(name, values)| {
                    *name == ATTR_PASSWORD || entry.values(name) != values.as_slice()
                })
                .map(|(name, values)| LdapModification::Replace {
                    attr: name.to_string(),
                    values,
                })
                .collect();

            if !modifications.is_empty() {
                self.client.modify(&dn, modifications).await?;
                changed = true;
            }
            if changed {
                info!(dn = %dn, "Updated LDAP user");
            } else {
                debug!("LDAP user already up to date");
            }
        }

        self.mapper.listeners.updated(user, &attrs).await
    }

    fn groups(&self) -> Option<&dyn GroupDao> {
        Some(self)
    }
}

#[async_trait]
impl GroupDao for LdapUserDao {
    #[instrument(skip(self))]
    async fn list_groups(&self, scope: Option<&str>) -> Result<Vec<Group>> {
        let root = self.group_root()?;
        let base = match scope.filter(|s| !s.trim().is_empty()) {
            Some(scope) => {
                let dn = Dn::parse(scope)?;
                if !dn.is_descendant_of_or_equal_to(root) {
                    return Err(IdmError::invalid_group(format!("{scope} is outside {root}")));
                }
                dn
            }
            None => root.clone(),
        };

        let request = self.request(
            &base,
            LdapFilter::eq(ATTR_OBJECT_CLASS, OBJECT_CLASS_GROUP),
            false,
        );
        let entries: Vec<LdapEntry> = self.client.search(request).try_collect().await?;
        Ok(entries
            .iter()
            .filter_map(|entry| PathGroup::parse(&entry.dn).ok())
            .filter(|group| group.dn().is_descendant_of(root))
            .map(|dn| Group::Path { dn })
            .collect())
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, group = %group))]
    async fn add_to_group(&self, user: &User, group: &Group) -> Result<()> {
        self.modify_membership(user, group, true).await
    }

    #[instrument(skip(self, user), fields(guid = %user.guid, group = %group))]
    async fn remove_from_group(&self, user: &User, group: &Group) -> Result<()> {
        self.modify_membership(user, group, false).await
    }

    #[instrument(skip(self, expression), fields(group = %group))]
    async fn search_in_group(
        &self,
        group: &Group,
        expression: Option<&Expression>,
        include_deactivated: bool,
        restrict: bool,
    ) -> Result<UserStream> {
        let scope = Expression::in_group(group.clone());
        let expression = match expression {
            Some(expression) => scope.and_also(expression.clone()),
            None => scope,
        };
        let filter = ldap_filter::compile(&expression, self.base_group_dn.as_ref())?;
        let filter = self.user_filter(Some(filter), include_deactivated);
        let request = self.request(&self.base_search_dn, filter, restrict);
        Ok(self.stream(request, restrict))
    }
}
