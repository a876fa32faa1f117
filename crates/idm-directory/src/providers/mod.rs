//! Directory backend implementations

pub mod ldap;
pub mod ldap_client;
pub mod ldap_filter;
pub mod okta;
pub mod okta_client;
pub mod okta_filter;
pub mod okta_schema;

pub use ldap_client::{LdapClient, LdapClientError, LdapEntry, LdapModification, SearchRequest};
pub use ldap_filter::LdapFilter;
pub use okta_client::{OktaClient, OktaClientError, OktaGroup, OktaProfile, OktaUser};
