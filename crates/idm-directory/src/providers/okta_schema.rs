//! Okta profile field table
//!
//! Every profile field the DAO reads or writes is declared here once. The
//! attribute-tag and query-attribute mappings refer only to these fields and
//! are checked against the table when a DAO is constructed.

use idm_core::{Attr, AttrSet, Attribute, IdmError, Result};

pub const THEKEY_GUID: &str = "theKeyGuid";
pub const LOGIN: &str = "login";
pub const EMAIL: &str = "email";
pub const ORIGINAL_EMAIL: &str = "original_email";
pub const FIRST_NAME: &str = "firstName";
pub const NICK_NAME: &str = "nickName";
pub const LAST_NAME: &str = "lastName";
pub const PHONE_NUMBER: &str = "primaryPhone";
pub const CITY: &str = "city";
pub const STATE: &str = "state";
pub const ZIP_CODE: &str = "zipCode";
pub const COUNTRY: &str = "cruCountryCode";
pub const US_EMPLOYEE_ID: &str = "usEmployeeId";
pub const US_DESIGNATION: &str = "usDesignationNumber";
pub const ORGANIZATION: &str = "organization";
pub const DIVISION: &str = "division";
pub const DEPARTMENT: &str = "department";
pub const MANAGER_ID: &str = "managerId";
pub const EMAIL_ALIASES: &str = "emailAliases";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextList,
}

#[derive(Debug, Clone, Copy)]
pub struct ProfileField {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn text(name: &'static str) -> ProfileField {
    ProfileField {
        name,
        kind: FieldKind::Text,
    }
}

pub const PROFILE_FIELDS: &[ProfileField] = &[
    text(THEKEY_GUID),
    text(LOGIN),
    text(EMAIL),
    text(ORIGINAL_EMAIL),
    text(FIRST_NAME),
    text(NICK_NAME),
    text(LAST_NAME),
    text(PHONE_NUMBER),
    text(CITY),
    text(STATE),
    text(ZIP_CODE),
    text(COUNTRY),
    text(US_EMPLOYEE_ID),
    text(US_DESIGNATION),
    text(ORGANIZATION),
    text(DIVISION),
    text(DEPARTMENT),
    text(MANAGER_ID),
    ProfileField {
        name: EMAIL_ALIASES,
        kind: FieldKind::TextList,
    },
];

pub fn field(name: &str) -> Option<&'static ProfileField> {
    PROFILE_FIELDS.iter().find(|f| f.name == name)
}

/// Where a change tag lands in an Okta user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget {
    Profile(&'static [&'static str]),
    Credentials,
}

pub fn attr_target(attr: Attr) -> Option<AttrTarget> {
    let fields: &'static [&'static str] = match attr {
        Attr::Password => return Some(AttrTarget::Credentials),
        Attr::Email => &[EMAIL, ORIGINAL_EMAIL, LOGIN],
        Attr::Name => &[FIRST_NAME, NICK_NAME, LAST_NAME],
        Attr::PreferredName => &[NICK_NAME],
        Attr::Contact => &[PHONE_NUMBER],
        Attr::Location => &[CITY, STATE, ZIP_CODE, COUNTRY],
        Attr::EmployeeNumber => &[US_EMPLOYEE_ID],
        Attr::Designation => &[US_DESIGNATION],
        Attr::HumanResource => &[ORGANIZATION, DIVISION, DEPARTMENT, MANAGER_ID],
        Attr::EmailAliases => &[EMAIL_ALIASES],
        Attr::Flags
        | Attr::SelfServiceKeys
        | Attr::MfaSecret
        | Attr::MfaIntruderDetection
        | Attr::LoginTime => return None,
    };
    Some(AttrTarget::Profile(fields))
}

/// Profile field a query attribute compiles to
pub fn query_field(attribute: Attribute) -> Option<&'static str> {
    match attribute {
        Attribute::Guid => Some(THEKEY_GUID),
        Attribute::Email => Some(EMAIL),
        Attribute::EmailAlias => Some(EMAIL_ALIASES),
        Attribute::FirstName => Some(FIRST_NAME),
        Attribute::LastName => Some(LAST_NAME),
        Attribute::EmployeeId => Some(US_EMPLOYEE_ID),
        Attribute::Designation => Some(US_DESIGNATION),
        Attribute::Group => None,
    }
}

/// Check that every owned tag and every query attribute resolves to declared fields
pub fn validate(owned: &AttrSet) -> Result<()> {
    for attr in owned.iter() {
        match attr_target(attr) {
            None => {
                return Err(IdmError::config(format!(
                    "attribute {attr} cannot be owned by okta: no profile mapping"
                )))
            }
            Some(AttrTarget::Credentials) => {}
            Some(AttrTarget::Profile(fields)) => {
                for name in fields {
                    if field(name).is_none() {
                        return Err(IdmError::config(format!(
                            "attribute {attr} maps to undeclared profile field {name}"
                        )));
                    }
                }
            }
        }
    }

    let queryable = [
        Attribute::Guid,
        Attribute::Email,
        Attribute::EmailAlias,
        Attribute::FirstName,
        Attribute::LastName,
        Attribute::EmployeeId,
        Attribute::Designation,
    ];
    for attribute in queryable {
        let declared = query_field(attribute).and_then(field);
        if declared.is_none() {
            return Err(IdmError::config(format!(
                "query attribute {attribute} has no declared profile field"
            )));
        }
    }
    Ok(())
}
