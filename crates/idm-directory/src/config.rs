//! Directory configuration
//!
//! Settings are read from optional `config/default` and `config/local` files
//! and from `IDM__`-prefixed environment variables, e.g.
//! `IDM__OKTA__MAX_SEARCH_RESULTS=500`.

use idm_core::{Attr, AttrSet, Dn, IdmError, Result, SearchLimit};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectorySettings {
    #[serde(default)]
    pub okta: OktaSettings,
    #[serde(default)]
    pub ldap: LdapSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OktaSettings {
    #[serde(default = "default_okta_owned_attributes")]
    pub owned_attributes: AttrSet,
    /// 0 means unbounded
    #[serde(default)]
    pub max_search_results: SearchLimit,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    /// Group ids every new account is added to
    #[serde(default)]
    pub initial_groups: Vec<String>,
    #[serde(default = "default_okta_deactivated_prefix")]
    pub deactivated_prefix: String,
    #[serde(default = "default_okta_deactivated_suffix")]
    pub deactivated_suffix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LdapSettings {
    #[serde(default = "default_ldap_owned_attributes")]
    pub owned_attributes: AttrSet,
    #[serde(default)]
    pub max_search_results: SearchLimit,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    /// Container holding user entries
    #[serde(default)]
    pub base_search_dn: String,
    /// Root of the group hierarchy; group operations are disabled without it
    #[serde(default)]
    pub base_group_dn: Option<String>,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_ldap_deactivated_prefix")]
    pub deactivated_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_okta_owned_attributes() -> AttrSet {
    AttrSet::from([
        Attr::Email,
        Attr::Password,
        Attr::Name,
        Attr::PreferredName,
        Attr::Contact,
        Attr::Location,
        Attr::EmployeeNumber,
        Attr::Designation,
        Attr::HumanResource,
        Attr::EmailAliases,
    ])
}

fn default_ldap_owned_attributes() -> AttrSet {
    AttrSet::from([
        Attr::Flags,
        Attr::SelfServiceKeys,
        Attr::MfaSecret,
        Attr::MfaIntruderDetection,
        Attr::LoginTime,
    ])
}

fn default_okta_deactivated_prefix() -> String {
    "$GUID-".to_string()
}

fn default_okta_deactivated_suffix() -> String {
    "@deactivated.invalid".to_string()
}

fn default_ldap_deactivated_prefix() -> String {
    "$GUID$-=".to_string()
}

fn default_max_page_size() -> usize {
    1000
}

impl Default for OktaSettings {
    fn default() -> Self {
        Self {
            owned_attributes: default_okta_owned_attributes(),
            max_search_results: SearchLimit::Unbounded,
            read_only: false,
            case_insensitive: true,
            initial_groups: Vec::new(),
            deactivated_prefix: default_okta_deactivated_prefix(),
            deactivated_suffix: default_okta_deactivated_suffix(),
        }
    }
}

impl Default for LdapSettings {
    fn default() -> Self {
        Self {
            owned_attributes: default_ldap_owned_attributes(),
            max_search_results: SearchLimit::Unbounded,
            read_only: false,
            case_insensitive: true,
            base_search_dn: String::new(),
            base_group_dn: None,
            max_page_size: default_max_page_size(),
            deactivated_prefix: default_ldap_deactivated_prefix(),
        }
    }
}

impl LdapSettings {
    pub fn parsed_base_group_dn(&self) -> Result<Option<Dn>> {
        self.base_group_dn
            .as_deref()
            .filter(|dn| !dn.trim().is_empty())
            .map(Dn::parse)
            .transpose()
            .map_err(|e| IdmError::config(format!("invalid ldap.base_group_dn: {e}")))
    }
}

impl DirectorySettings {
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            // Load from config file if present
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Load from environment variables with IDM__ prefix
            .add_source(
                config::Environment::with_prefix("IDM")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("okta.owned_attributes")
                    .with_list_parse_key("okta.initial_groups")
                    .with_list_parse_key("ldap.owned_attributes"),
            )
            .build()
            .map_err(config_error)?;

        Self::from_config(config)
    }

    /// Parse settings from a TOML document
    pub fn from_toml(source: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .map_err(config_error)?;

        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let settings: Self = config.try_deserialize().map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.okta.deactivated_prefix.is_empty() {
            return Err(IdmError::config("okta.deactivated_prefix must not be empty"));
        }
        if self.ldap.deactivated_prefix.is_empty() {
            return Err(IdmError::config("ldap.deactivated_prefix must not be empty"));
        }
        if self.ldap.max_page_size == 0 {
            return Err(IdmError::config("ldap.max_page_size must be positive"));
        }
        self.ldap.parsed_base_group_dn()?;
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> IdmError {
    IdmError::config(e.to_string())
}
