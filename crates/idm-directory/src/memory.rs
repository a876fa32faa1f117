//! In-memory backend clients
//!
//! Stand-ins for the Okta Management API and an LDAP server, used by the
//! test suites and for local development without either service.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use idm_core::{CloudUserId, Dn};

use crate::providers::ldap_client::{
    self, LdapClient, LdapClientError, LdapEntry, LdapModification, SearchRequest,
};
use crate::providers::ldap_filter::LdapFilter;
use crate::providers::okta_client::{
    self, EmailStatus, OktaClient, OktaClientError, OktaCredentials, OktaEmail, OktaGroup,
    OktaProfile, OktaUser, OktaUserStatus, API_VALIDATION_FAILED,
};
use crate::providers::okta_schema::EMAIL;

const INVALID_SEARCH: &str = "E0000031";
const NOT_FOUND: &str = "E0000007";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Okta
// =============================================================================

#[derive(Default)]
struct OktaState {
    users: BTreeMap<String, OktaUser>,
    passwords: BTreeMap<String, String>,
    groups: BTreeMap<String, OktaGroup>,
    members: BTreeMap<String, BTreeSet<String>>,
    next_id: u64,
    update_calls: usize,
}

/// Okta stand-in evaluating `search` expressions against stored profiles
#[derive(Default)]
pub struct InMemoryOktaClient {
    state: Mutex<OktaState>,
    password_min_length: Option<usize>,
}

impl InMemoryOktaClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject passwords shorter than `length` the way Okta's policy does
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = Some(length);
        self
    }

    pub fn add_group(&self, id: &str, name: &str) {
        lock(&self.state).groups.insert(
            id.to_string(),
            OktaGroup {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn user(&self, id: &CloudUserId) -> Option<OktaUser> {
        lock(&self.state).users.get(id.as_str()).cloned()
    }

    pub fn password(&self, id: &CloudUserId) -> Option<String> {
        lock(&self.state).passwords.get(id.as_str()).cloned()
    }

    /// Number of `update_user` calls received
    pub fn update_calls(&self) -> usize {
        lock(&self.state).update_calls
    }

    fn check_password(&self, password: Option<&str>) -> okta_client::ClientResult<()> {
        match (self.password_min_length, password) {
            (Some(min), Some(password)) if password.chars().count() < min => Err(
                OktaClientError::api(400, API_VALIDATION_FAILED, "Api validation failed: password")
                    .with_cause(format!(
                        "password: Password requirements were not met. At least {min} characters."
                    )),
            ),
            _ => Ok(()),
        }
    }
}

fn not_found(what: &str) -> OktaClientError {
    OktaClientError::api(404, NOT_FOUND, format!("Not found: {what}"))
}

#[async_trait]
impl OktaClient for InMemoryOktaClient {
    async fn get_user(&self, id: &CloudUserId) -> okta_client::ClientResult<Option<OktaUser>> {
        Ok(self.user(id))
    }

    fn list_users(
        &self,
        search: Option<String>,
    ) -> BoxStream<'static, okta_client::ClientResult<OktaUser>> {
        let search = match search.as_deref().map(OktaSearch::parse).transpose() {
            Ok(search) => search,
            Err(err) => return stream::once(async move { Err(err) }).boxed(),
        };
        let users: Vec<_> = lock(&self.state)
            .users
            .values()
            .filter(|user| search.as_ref().map_or(true, |s| s.matches(&user.profile)))
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(users).boxed()
    }

    async fn create_user(
        &self,
        profile: OktaProfile,
        password: Option<String>,
        group_ids: &[String],
    ) -> okta_client::ClientResult<OktaUser> {
        self.check_password(password.as_deref())?;
        let mut state = lock(&self.state);
        if let Some(missing) = group_ids.iter().find(|id| !state.groups.contains_key(*id)) {
            return Err(not_found(missing));
        }

        state.next_id += 1;
        let id = format!("00u{:06}", state.next_id);
        let emails = profile
            .get_str(EMAIL)
            .map(|email| OktaEmail {
                value: email.to_string(),
                status: EmailStatus::Unverified,
            })
            .into_iter()
            .collect();
        let user = OktaUser {
            id: CloudUserId::new(&id),
            status: OktaUserStatus::Active,
            profile,
            credentials: OktaCredentials {
                password: None,
                emails,
            },
            last_login: None,
        };

        if let Some(password) = password {
            state.passwords.insert(id.clone(), password);
        }
        for group_id in group_ids {
            state
                .members
                .entry(group_id.clone())
                .or_default()
                .insert(id.clone());
        }
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: &OktaUser) -> okta_client::ClientResult<()> {
        self.check_password(user.credentials.password.as_deref())?;
        let mut state = lock(&self.state);
        state.update_calls += 1;
        let id = user.id.as_str().to_string();
        let Some(stored) = state.users.get_mut(&id) else {
            return Err(not_found(&id));
        };
        stored.profile = user.profile.clone();
        if let Some(password) = &user.credentials.password {
            state.passwords.insert(id, password.clone());
        }
        Ok(())
    }

    async fn suspend_user(&self, id: &CloudUserId) -> okta_client::ClientResult<()> {
        let mut state = lock(&self.state);
        let user = state
            .users
            .get_mut(id.as_str())
            .ok_or_else(|| not_found(id.as_str()))?;
        user.status = OktaUserStatus::Suspended;
        Ok(())
    }

    async fn unsuspend_user(&self, id: &CloudUserId) -> okta_client::ClientResult<()> {
        let mut state = lock(&self.state);
        let user = state
            .users
            .get_mut(id.as_str())
            .ok_or_else(|| not_found(id.as_str()))?;
        user.status = OktaUserStatus::Active;
        Ok(())
    }

    async fn list_user_groups(&self, id: &CloudUserId) -> okta_client::ClientResult<Vec<OktaGroup>> {
        let state = lock(&self.state);
        Ok(state
            .members
            .iter()
            .filter(|(_, members)| members.contains(id.as_str()))
            .filter_map(|(group_id, _)| state.groups.get(group_id).cloned())
            .collect())
    }

    async fn get_group(&self, id: &str) -> okta_client::ClientResult<Option<OktaGroup>> {
        Ok(lock(&self.state).groups.get(id).cloned())
    }

    async fn list_groups(&self) -> okta_client::ClientResult<Vec<OktaGroup>> {
        Ok(lock(&self.state).groups.values().cloned().collect())
    }

    fn list_group_members(
        &self,
        group_id: &str,
    ) -> BoxStream<'static, okta_client::ClientResult<OktaUser>> {
        let state = lock(&self.state);
        let members: Vec<_> = state
            .members
            .get(group_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.users.get(id).cloned())
            .map(Ok)
            .collect();
        stream::iter(members).boxed()
    }

    async fn add_user_to_group(
        &self,
        group_id: &str,
        user_id: &CloudUserId,
    ) -> okta_client::ClientResult<()> {
        let mut state = lock(&self.state);
        if !state.groups.contains_key(group_id) {
            return Err(not_found(group_id));
        }
        state
            .members
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.as_str().to_string());
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        group_id: &str,
        user_id: &CloudUserId,
    ) -> okta_client::ClientResult<()> {
        if let Some(members) = lock(&self.state).members.get_mut(group_id) {
            members.remove(user_id.as_str());
        }
        Ok(())
    }
}

// =============================================================================
// Okta search syntax
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum OktaSearch {
    Eq(String, String),
    StartsWith(String, String),
    And(Box<OktaSearch>, Box<OktaSearch>),
    Or(Box<OktaSearch>, Box<OktaSearch>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Word(String),
    Literal(String),
}

fn invalid_search(message: impl Into<String>) -> OktaClientError {
    OktaClientError::api(400, INVALID_SEARCH, message)
}

fn tokenize(input: &str) -> okta_client::ClientResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => literal.push(escaped),
                            None => return Err(invalid_search("dangling escape")),
                        },
                        Some('"') => break,
                        Some(c) => literal.push(c),
                        None => return Err(invalid_search("unterminated literal")),
                    }
                }
                tokens.push(Token::Literal(literal));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek_word(&self, word: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn or_expr(&mut self) -> okta_client::ClientResult<OktaSearch> {
        let mut left = self.and_expr()?;
        while self.peek_word("or") {
            self.pos += 1;
            left = OktaSearch::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> okta_client::ClientResult<OktaSearch> {
        let mut left = self.primary()?;
        while self.peek_word("and") {
            self.pos += 1;
            left = OktaSearch::And(Box::new(left), Box::new(self.primary()?));
        }
        Ok(left)
    }

    fn primary(&mut self) -> okta_client::ClientResult<OktaSearch> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(invalid_search("expected )")),
                }
            }
            Some(Token::Word(path)) => {
                let field = path
                    .strip_prefix("profile.")
                    .ok_or_else(|| invalid_search(format!("unknown property {path}")))?
                    .to_string();
                let operator = match self.next() {
                    Some(Token::Word(op)) => op.to_ascii_lowercase(),
                    _ => return Err(invalid_search("expected operator")),
                };
                let value = match self.next() {
                    Some(Token::Literal(value)) => value,
                    _ => return Err(invalid_search("expected literal")),
                };
                match operator.as_str() {
                    "eq" => Ok(OktaSearch::Eq(field, value)),
                    "sw" => Ok(OktaSearch::StartsWith(field, value)),
                    other => Err(invalid_search(format!("unsupported operator {other}"))),
                }
            }
            _ => Err(invalid_search("expected comparison")),
        }
    }
}

impl OktaSearch {
    fn parse(input: &str) -> okta_client::ClientResult<Self> {
        let mut parser = Parser {
            tokens: tokenize(input)?,
            pos: 0,
        };
        let search = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(invalid_search("trailing input"));
        }
        Ok(search)
    }

    /// Okta compares case-insensitively; list fields match on any element
    fn matches(&self, profile: &OktaProfile) -> bool {
        match self {
            Self::Eq(field, value) => profile
                .get_list(field)
                .iter()
                .any(|v| v.to_lowercase() == value.to_lowercase()),
            Self::StartsWith(field, value) => profile
                .get_list(field)
                .iter()
                .any(|v| v.to_lowercase().starts_with(&value.to_lowercase())),
            Self::And(left, right) => left.matches(profile) && right.matches(profile),
            Self::Or(left, right) => left.matches(profile) || right.matches(profile),
        }
    }
}

// =============================================================================
// LDAP
// =============================================================================

#[derive(Default)]
struct LdapState {
    entries: BTreeMap<String, LdapEntry>,
    page_sizes: Vec<usize>,
    modify_calls: usize,
}

/// LDAP stand-in evaluating [`LdapFilter`] trees over a flat entry map
#[derive(Default)]
pub struct InMemoryLdapClient {
    state: Mutex<LdapState>,
}

fn dn_key(dn: &str) -> String {
    Dn::parse(dn)
        .map(|dn| dn.to_string())
        .unwrap_or_else(|_| dn.to_string())
        .to_lowercase()
}

fn value_matches(filter: &LdapFilter, entry: &LdapEntry) -> bool {
    match filter {
        LdapFilter::Equality { attr, value } => entry
            .values(attr)
            .iter()
            .any(|v| v.to_lowercase() == value.to_lowercase()),
        LdapFilter::Substring {
            attr,
            initial,
            any,
            final_,
        } => entry.values(attr).iter().any(|v| {
            substring_matches(
                &v.to_lowercase(),
                initial.as_deref(),
                any,
                final_.as_deref(),
            )
        }),
        LdapFilter::Present { attr } => !entry.values(attr).is_empty(),
        LdapFilter::And(children) => children.iter().all(|c| value_matches(c, entry)),
        LdapFilter::Or(children) => children.iter().any(|c| value_matches(c, entry)),
        LdapFilter::Not(child) => !value_matches(child, entry),
    }
}

fn substring_matches(value: &str, initial: Option<&str>, any: &[String], final_: Option<&str>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial.to_lowercase().as_str()) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(&part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    final_.map_or(true, |f| rest.ends_with(&f.to_lowercase()))
}

impl InMemoryLdapClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, replacing any entry at the same DN
    pub fn insert(&self, entry: LdapEntry) {
        lock(&self.state).entries.insert(dn_key(&entry.dn), entry);
    }

    pub fn entry(&self, dn: &str) -> Option<LdapEntry> {
        lock(&self.state).entries.get(&dn_key(dn)).cloned()
    }

    /// Page size requested by the most recent search
    pub fn last_page_size(&self) -> Option<usize> {
        lock(&self.state).page_sizes.last().copied()
    }

    pub fn modify_calls(&self) -> usize {
        lock(&self.state).modify_calls
    }
}

#[async_trait]
impl LdapClient for InMemoryLdapClient {
    fn search(
        &self,
        request: SearchRequest,
    ) -> BoxStream<'static, ldap_client::ClientResult<LdapEntry>> {
        let base = match Dn::parse(&request.base_dn) {
            Ok(base) => base,
            Err(e) => {
                let err = LdapClientError::Operation {
                    code: 34,
                    message: e.to_string(),
                };
                return stream::once(async move { Err(err) }).boxed();
            }
        };

        let mut state = lock(&self.state);
        state.page_sizes.push(request.page_size);
        let matching: Vec<LdapEntry> = state
            .entries
            .values()
            .filter(|entry| {
                Dn::parse(&entry.dn).is_ok_and(|dn| dn.is_descendant_of_or_equal_to(&base))
            })
            .filter(|entry| value_matches(&request.filter, entry))
            .cloned()
            .collect();

        // deliver page by page so consumers only pull what they poll
        let page_size = request.page_size.max(1);
        let pages: Vec<Vec<LdapEntry>> = matching
            .chunks(page_size)
            .map(<[LdapEntry]>::to_vec)
            .collect();
        stream::iter(pages)
            .flat_map(|page| stream::iter(page.into_iter().map(Ok)))
            .boxed()
    }

    async fn add(&self, entry: LdapEntry) -> ldap_client::ClientResult<()> {
        let mut state = lock(&self.state);
        let key = dn_key(&entry.dn);
        if state.entries.contains_key(&key) {
            return Err(LdapClientError::EntryAlreadyExists { dn: entry.dn });
        }
        state.entries.insert(key, entry);
        Ok(())
    }

    async fn modify(
        &self,
        dn: &str,
        changes: Vec<LdapModification>,
    ) -> ldap_client::ClientResult<()> {
        let mut state = lock(&self.state);
        state.modify_calls += 1;
        let key = dn_key(dn);
        let Some(current) = state.entries.get(&key) else {
            return Err(LdapClientError::NoSuchObject { dn: dn.to_string() });
        };

        let mut entry = current.clone();
        for change in changes {
            match change {
                LdapModification::Replace { attr, values } => entry.set(&attr, values),
                LdapModification::Add { attr, values } => {
                    let mut current = entry.values(&attr).to_vec();
                    for value in values {
                        if current.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
                            return Err(LdapClientError::AttributeOrValueExists { attr });
                        }
                        current.push(value);
                    }
                    entry.set(&attr, current);
                }
                LdapModification::Delete { attr, values } => {
                    let mut current = entry.values(&attr).to_vec();
                    if current.is_empty() {
                        return Err(LdapClientError::NoSuchAttribute { attr });
                    }
                    if values.is_empty() {
                        current.clear();
                    }
                    for value in values {
                        let before = current.len();
                        current.retain(|v| !v.eq_ignore_ascii_case(&value));
                        if current.len() == before {
                            return Err(LdapClientError::NoSuchAttribute { attr });
                        }
                    }
                    entry.set(&attr, current);
                }
            }
        }
        state.entries.insert(key, entry);
        Ok(())
    }

    async fn rename(&self, dn: &str, new_rdn: &str) -> ldap_client::ClientResult<()> {
        let invalid = |message: String| LdapClientError::Operation { code: 34, message };
        let old = Dn::parse(dn).map_err(|e| invalid(e.to_string()))?;
        let rdn = Dn::parse(new_rdn).map_err(|e| invalid(e.to_string()))?;
        let Some(leaf) = rdn.leaf().cloned() else {
            return Err(invalid(format!("empty rdn for {dn}")));
        };
        let parent = old.parent().unwrap_or_else(Dn::root);
        let target = parent.child(leaf.kind.clone(), leaf.value.clone());

        let mut state = lock(&self.state);
        let target_key = dn_key(&target.to_string());
        if state.entries.contains_key(&target_key) && target_key != dn_key(dn) {
            return Err(LdapClientError::EntryAlreadyExists {
                dn: target.to_string(),
            });
        }
        let Some(mut entry) = state.entries.remove(&dn_key(dn)) else {
            return Err(LdapClientError::NoSuchObject { dn: dn.to_string() });
        };
        entry.dn = target.to_string();
        entry.set(&leaf.kind, vec![leaf.value]);
        state.entries.insert(target_key, entry);
        Ok(())
    }
}
