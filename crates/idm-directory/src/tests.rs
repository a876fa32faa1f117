//! Unit tests for idm-directory

use crate::config::{DirectorySettings, LdapSettings, OktaSettings};
use crate::memory::{InMemoryLdapClient, InMemoryOktaClient};
use crate::providers::ldap_client::{LdapClient, LdapEntry};
use crate::{Directory, LdapUserDao, OktaUserDao};
use futures::{StreamExt, TryStreamExt};
use idm_core::*;
use std::sync::{Arc, Mutex};

const PEOPLE: &str = "ou=people,dc=example,dc=org";
const GROUPS: &str = "ou=groups,dc=example,dc=org";

fn person(guid: &str, email: &str, first: &str, last: &str) -> User {
    User::new(guid, email).with_name(first, last)
}

fn ldap_settings() -> LdapSettings {
    LdapSettings {
        base_search_dn: PEOPLE.to_string(),
        base_group_dn: Some(GROUPS.to_string()),
        ..LdapSettings::default()
    }
}

fn full_ldap_settings() -> LdapSettings {
    LdapSettings {
        owned_attributes: AttrSet::all(),
        ..ldap_settings()
    }
}

async fn collect(stream: UserStream) -> Result<Vec<User>> {
    stream.try_collect().await
}

fn guids(users: &[User]) -> Vec<String> {
    let mut guids: Vec<String> = users.iter().map(|u| u.guid.to_string()).collect();
    guids.sort();
    guids
}

fn eq(attribute: Attribute, value: &str) -> Expression {
    Expression::equals(attribute, value).unwrap()
}

fn sw(attribute: Attribute, value: &str) -> Expression {
    Expression::starts_with(attribute, value).unwrap()
}

/// Records every change-set passed to `on_updated`
#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<AttrSet>>,
}

#[async_trait::async_trait]
impl UserListener for Recorder {
    async fn on_updated(&self, _user: &User, attrs: &AttrSet) -> Result<()> {
        self.updates.lock().unwrap().push(attrs.clone());
        Ok(())
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_settings_from_toml() {
        let settings = DirectorySettings::from_toml(
            r#"
            [okta]
            owned_attributes = ["email", "name"]
            max_search_results = 50
            initial_groups = ["00g1"]

            [ldap]
            base_search_dn = "ou=people,dc=example,dc=org"
            base_group_dn = "ou=groups,dc=example,dc=org"
            max_search_results = 0
            max_page_size = 200
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.okta.owned_attributes,
            AttrSet::from([Attr::Email, Attr::Name])
        );
        assert_eq!(settings.okta.max_search_results, SearchLimit::Limit(50));
        assert_eq!(settings.okta.initial_groups, vec!["00g1".to_string()]);
        assert_eq!(settings.okta.deactivated_prefix, "$GUID-");
        assert!(settings.okta.case_insensitive);
        assert_eq!(settings.ldap.max_search_results, SearchLimit::Unbounded);
        assert_eq!(settings.ldap.max_page_size, 200);
        assert_eq!(
            settings.ldap.parsed_base_group_dn().unwrap(),
            Some(Dn::parse(GROUPS).unwrap())
        );
        assert!(settings.ldap.owned_attributes.contains(Attr::MfaSecret));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = DirectorySettings::from_toml("").unwrap();
        assert!(settings.okta.owned_attributes.contains(Attr::Password));
        assert_eq!(settings.ldap.deactivated_prefix, "$GUID$-=");
        assert_eq!(settings.ldap.max_page_size, 1000);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        for source in [
            "[ldap]\nmax_page_size = 0",
            "[ldap]\nbase_group_dn = \"bogus\"",
            "[okta]\ndeactivated_prefix = \"\"",
        ] {
            assert!(
                matches!(DirectorySettings::from_toml(source), Err(IdmError::Config { .. })),
                "{source}"
            );
        }
    }

    #[test]
    fn test_dao_construction_validates_settings() {
        let okta = OktaSettings {
            owned_attributes: AttrSet::from([Attr::Email, Attr::MfaSecret]),
            ..OktaSettings::default()
        };
        assert!(matches!(
            OktaUserDao::new(Arc::new(InMemoryOktaClient::new()), &okta),
            Err(IdmError::Config { .. })
        ));

        assert!(matches!(
            LdapUserDao::new(Arc::new(InMemoryLdapClient::new()), &LdapSettings::default()),
            Err(IdmError::Config { .. })
        ));
    }
}

// =============================================================================
// Okta DAO Tests
// =============================================================================

#[cfg(test)]
mod okta_tests {
    use super::*;
    use crate::providers::okta_client::OktaUserStatus;

    fn dao(client: &Arc<InMemoryOktaClient>, settings: OktaSettings) -> OktaUserDao {
        OktaUserDao::new(client.clone(), &settings).unwrap()
    }

    async fn seeded(client: &Arc<InMemoryOktaClient>, dao: &OktaUserDao) -> Vec<User> {
        let mut users = vec![
            person("G1", "ann.lee@example.com", "Ann", "Lee"),
            person("G2", "bob.lewis@example.com", "Bob", "Lewis"),
            person("G3", "anna.smith@example.com", "Anna", "Smith"),
            person("G4", "carl@example.com", "Carl", "Lee"),
            person("G5", "dee@example.com", "Dee", "Young"),
        ];
        users[0].email_aliases = vec!["alias@example.com".into(), "ann@example.org".into()];
        users[1].designation = Some("123".into());
        users[4].employee_id = Some("E5".into());
        for user in &mut users {
            dao.create(user).await.unwrap();
        }
        assert_eq!(client.update_calls(), 0);
        users
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let client = Arc::new(InMemoryOktaClient::new());
        client.add_group("00g1", "Staff");
        let dao = dao(
            &client,
            OktaSettings {
                initial_groups: vec!["00g1".into()],
                ..OktaSettings::default()
            },
        );

        let mut user = person("G1", "a@example.com", "Ann", "Lee").with_password("correct horse");
        dao.create(&mut user).await.unwrap();
        let cloud_id = user.cloud_id.clone().unwrap();
        assert_eq!(client.password(&cloud_id).as_deref(), Some("correct horse"));

        let found = dao.find_by_email("A@example.com", false).await.unwrap().unwrap();
        assert_eq!(found.guid, Guid::new("G1"));
        assert_eq!(found.cloud_id, Some(cloud_id.clone()));
        assert_eq!(found.first_name.as_deref(), Some("Ann"));
        assert!(!found.deactivated);
        assert_eq!(found.groups, vec![Group::prefix("00g1", "Staff")]);

        let by_guid = dao.find_by_guid(&Guid::new("G1"), false).await.unwrap().unwrap();
        assert_eq!(by_guid.email, "a@example.com");
        let by_id = dao.find_by_cloud_id(&cloud_id, false).await.unwrap().unwrap();
        assert_eq!(by_id.guid, Guid::new("G1"));

        assert!(dao.find_by_email("nobody@example.com", true).await.unwrap().is_none());
        assert!(dao.find_by_email("", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_and_read_only() {
        let client = Arc::new(InMemoryOktaClient::new());
        let writable = dao(&client, OktaSettings::default());
        let mut blank = User::new("G1", " ");
        assert!(matches!(
            writable.create(&mut blank).await,
            Err(IdmError::InvalidRecord { .. })
        ));

        let read_only = dao(
            &client,
            OktaSettings {
                read_only: true,
                ..OktaSettings::default()
            },
        );
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        assert!(matches!(
            read_only.create(&mut user).await,
            Err(IdmError::ReadOnly { .. })
        ));
        assert!(matches!(
            read_only.update(&user, &AttrSet::new()).await,
            Err(IdmError::ReadOnly { .. })
        ));
    }

    #[tokio::test]
    async fn test_unowned_tag_is_only_forwarded() {
        let client = Arc::new(InMemoryOktaClient::new());
        let recorder = Arc::new(Recorder::default());
        let dao = dao(
            &client,
            OktaSettings {
                owned_attributes: AttrSet::from([Attr::Email, Attr::Name]),
                ..OktaSettings::default()
            },
        )
        .with_listener(recorder.clone());

        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        dao.create(&mut user).await.unwrap();

        let changed = user.clone().with_password("a new secret");
        dao.update(&changed, &AttrSet::from([Attr::Password]))
            .await
            .unwrap();

        assert_eq!(client.update_calls(), 0);
        assert_eq!(
            *recorder.updates.lock().unwrap(),
            vec![AttrSet::from([Attr::Password])]
        );
    }

    #[tokio::test]
    async fn test_update_commits_only_real_changes() {
        let client = Arc::new(InMemoryOktaClient::new());
        let recorder = Arc::new(Recorder::default());
        let dao = dao(&client, OktaSettings::default()).with_listener(recorder.clone());

        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        dao.create(&mut user).await.unwrap();

        dao.update(&user, &AttrSet::new()).await.unwrap();
        assert_eq!(client.update_calls(), 0);
        assert_eq!(*recorder.updates.lock().unwrap(), vec![AttrSet::defaults()]);

        user.last_name = Some("Smith".into());
        dao.update(&user, &AttrSet::from([Attr::Name])).await.unwrap();
        assert_eq!(client.update_calls(), 1);
        let stored = client.user(user.cloud_id.as_ref().unwrap()).unwrap();
        assert_eq!(stored.profile.get_str("lastName"), Some("Smith"));

        let unknown = person("G9", "x@example.com", "X", "Y");
        assert!(matches!(
            dao.update(&unknown, &AttrSet::from([Attr::Name])).await,
            Err(IdmError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_password_surfaces_reason() {
        let client = Arc::new(InMemoryOktaClient::new().with_password_min_length(12));
        let dao = dao(&client, OktaSettings::default());

        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        dao.create(&mut user).await.unwrap();

        let weak = user.clone().with_password("short");
        match dao.update(&weak, &AttrSet::from([Attr::Password])).await {
            Err(IdmError::InvalidCredential { reason }) => assert_eq!(
                reason,
                "Password requirements were not met. At least 12 characters."
            ),
            other => panic!("unexpected result {other:?}"),
        }

        let mut weak_new = person("G2", "b@example.com", "Bob", "Lee").with_password("short");
        assert!(matches!(
            dao.create(&mut weak_new).await,
            Err(IdmError::InvalidCredential { .. })
        ));
    }

    #[tokio::test]
    async fn test_deactivate_and_reactivate() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(&client, OktaSettings::default());
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        dao.create(&mut user).await.unwrap();
        let cloud_id = user.cloud_id.clone().unwrap();

        dao.deactivate(&mut user).await.unwrap();
        assert!(user.deactivated);
        assert!(user.login_disabled);
        let stored = client.user(&cloud_id).unwrap();
        assert_eq!(stored.status, OktaUserStatus::Suspended);
        assert_eq!(
            stored.profile.get_str("email"),
            Some("$GUID-G1@deactivated.invalid")
        );
        assert_eq!(stored.profile.get_str("original_email"), Some("a@example.com"));

        assert!(dao.find_by_email("a@example.com", false).await.unwrap().is_none());
        assert!(dao.find_by_guid(&user.guid, false).await.unwrap().is_none());
        let found = dao.find_by_email("a@example.com", true).await.unwrap().unwrap();
        assert!(found.deactivated);
        assert_eq!(found.email, "a@example.com");

        dao.reactivate(&mut user).await.unwrap();
        assert!(!user.deactivated);
        assert!(user.allow_password_change);
        let stored = client.user(&cloud_id).unwrap();
        assert_eq!(stored.status, OktaUserStatus::Active);
        assert_eq!(stored.profile.get_str("email"), Some("a@example.com"));
        assert_eq!(stored.profile.get_str("original_email"), None);
    }

    #[tokio::test]
    async fn test_deactivating_missing_account_is_a_no_op() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(&client, OktaSettings::default());
        let mut ghost = person("G9", "ghost@example.com", "G", "Host");
        dao.deactivate(&mut ghost).await.unwrap();
        assert!(!ghost.deactivated);
        assert_eq!(client.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_reactivating_missing_account_is_a_no_op() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(&client, OktaSettings::default());
        let mut ghost = person("G9", "ghost@example.com", "G", "Host");
        ghost.deactivated = true;
        dao.reactivate(&mut ghost).await.unwrap();
        assert!(ghost.deactivated);
        assert_eq!(client.update_calls(), 0);
    }

    fn limited(client: &Arc<InMemoryOktaClient>) -> OktaUserDao {
        dao(
            client,
            OktaSettings {
                max_search_results: SearchLimit::Limit(3),
                ..OktaSettings::default()
            },
        )
    }

    /// Deactivated accounts are created first so they lead every stream
    async fn population(dao: &OktaUserDao, live: usize, deactivated: usize) -> Vec<User> {
        let mut users = Vec::new();
        for i in 0..live + deactivated {
            let mut user = person(&format!("G{i}"), &format!("u{i}@example.com"), "Una", "Ser");
            dao.create(&mut user).await.unwrap();
            if i < deactivated {
                dao.deactivate(&mut user).await.unwrap();
            }
            users.push(user);
        }
        users
    }

    #[tokio::test]
    async fn test_deactivated_records_do_not_count_toward_the_limit() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = limited(&client);
        population(&dao, 4, 1).await;

        let mut stream = dao.search(None, false, true).await.unwrap();
        for _ in 0..3 {
            assert!(!stream.next().await.unwrap().unwrap().deactivated);
        }
        assert!(matches!(
            stream.next().await,
            Some(Err(IdmError::ResultLimitExceeded { limit: 3 }))
        ));

        let client = Arc::new(InMemoryOktaClient::new());
        let dao = limited(&client);
        population(&dao, 3, 2).await;

        let found = collect(dao.search(None, false, true).await.unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|u| !u.deactivated));
    }

    #[tokio::test]
    async fn test_restricted_group_search_fails_past_the_limit() {
        let client = Arc::new(InMemoryOktaClient::new());
        client.add_group("00g1", "Staff");
        let dao = limited(&client);
        let staff = Group::prefix("00g1", "Staff");
        for user in &population(&dao, 4, 0).await {
            dao.add_to_group(user, &staff).await.unwrap();
        }

        let mut stream = dao
            .search_in_group(&staff, None, false, true)
            .await
            .unwrap();
        for _ in 0..3 {
            assert!(stream.next().await.unwrap().is_ok());
        }
        assert!(matches!(
            stream.next().await,
            Some(Err(IdmError::ResultLimitExceeded { limit: 3 }))
        ));

        let unrestricted = collect(
            dao.search_in_group(&staff, None, false, false)
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(unrestricted.len(), 4);
    }

    #[tokio::test]
    async fn test_blank_group_scope_lists_everything() {
        let client = Arc::new(InMemoryOktaClient::new());
        client.add_group("00g1", "Staff");
        client.add_group("00g2", "Interns");
        let dao = dao(&client, OktaSettings::default());

        assert_eq!(dao.list_groups(Some("")).await.unwrap().len(), 2);
        assert_eq!(dao.list_groups(Some("  ")).await.unwrap().len(), 2);
        assert_eq!(dao.list_groups(Some("Interns")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restricted_search_fails_past_the_limit() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(
            &client,
            OktaSettings {
                max_search_results: SearchLimit::Limit(3),
                ..OktaSettings::default()
            },
        );
        seeded(&client, &dao).await;

        let mut stream = dao.search(None, false, true).await.unwrap();
        for _ in 0..3 {
            assert!(stream.next().await.unwrap().is_ok());
        }
        assert!(matches!(
            stream.next().await,
            Some(Err(IdmError::ResultLimitExceeded { limit: 3 }))
        ));

        let all = collect(dao.search(None, false, false).await.unwrap()).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_search_hides_deactivated_records() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(&client, OktaSettings::default());
        let mut users = seeded(&client, &dao).await;
        dao.deactivate(&mut users[0]).await.unwrap();

        let active = collect(dao.search(None, false, false).await.unwrap()).await.unwrap();
        assert_eq!(active.len(), 4);
        assert!(active.iter().all(|u| !u.deactivated));

        let everyone = collect(dao.search(None, true, false).await.unwrap()).await.unwrap();
        assert_eq!(everyone.len(), 5);

        let by_email = eq(Attribute::Email, "ann.lee@example.com");
        let hidden = collect(dao.search(Some(&by_email), false, false).await.unwrap())
            .await
            .unwrap();
        assert!(hidden.is_empty());
        let shown = collect(dao.search(Some(&by_email), true, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(guids(&shown), vec!["G1"]);
    }

    #[tokio::test]
    async fn test_compiled_search_agrees_with_evaluator() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(&client, OktaSettings::default());
        let users = seeded(&client, &dao).await;
        let matcher = Matcher::default();

        let expressions = vec![
            eq(Attribute::FirstName, "ann"),
            sw(Attribute::LastName, "le"),
            eq(Attribute::Email, "BOB.LEWIS@example.com"),
            eq(Attribute::EmailAlias, "ann@example.org"),
            sw(Attribute::EmailAlias, "ALI"),
            eq(Attribute::Guid, "G3"),
            eq(Attribute::Designation, "123"),
            eq(Attribute::EmployeeId, "E5"),
            Expression::and([sw(Attribute::FirstName, "an"), eq(Attribute::LastName, "lee")]),
            Expression::or([
                eq(Attribute::Guid, "G2"),
                Expression::and([sw(Attribute::Email, "carl"), sw(Attribute::LastName, "L")]),
            ]),
        ];

        for expression in &expressions {
            let found = collect(dao.search(Some(expression), false, false).await.unwrap())
                .await
                .unwrap();
            let expected: Vec<User> = users
                .iter()
                .filter(|u| matcher.matches(u, Some(expression)).unwrap())
                .cloned()
                .collect();
            assert_eq!(guids(&found), guids(&expected), "{expression:?}");
        }
    }

    #[tokio::test]
    async fn test_uncompilable_searches_are_rejected() {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = dao(&client, OktaSettings::default());

        let like = Expression::like(Attribute::LastName, "L*e").unwrap();
        assert!(matches!(
            dao.search(Some(&like), false, false).await,
            Err(IdmError::UnsupportedOperator { .. })
        ));
        let not = Expression::not(eq(Attribute::LastName, "Lee"));
        assert!(matches!(
            dao.search(Some(&not), false, false).await,
            Err(IdmError::UnsupportedQuery { .. })
        ));
        let group = Expression::in_group(Group::prefix("00g1", "Staff"));
        assert!(matches!(
            dao.search(Some(&group), false, false).await,
            Err(IdmError::UnsupportedQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_group_scoped_search_uses_evaluator() {
        let client = Arc::new(InMemoryOktaClient::new());
        client.add_group("00g1", "Staff");
        client.add_group("00g2", "Staff-US");
        client.add_group("00g3", "Staffing");
        let dao = dao(&client, OktaSettings::default());
        let users = seeded(&client, &dao).await;
        let staff = Group::prefix("00g1", "Staff");
        for user in &users[..4] {
            dao.add_to_group(user, &staff).await.unwrap();
        }

        let all = collect(dao.search_in_group(&staff, None, false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(guids(&all), vec!["G1", "G2", "G3", "G4"]);

        let lees = sw(Attribute::LastName, "le");
        let found = collect(
            dao.search_in_group(&staff, Some(&lees), false, false)
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(guids(&found), vec!["G1", "G2", "G4"]);

        let not_lee = Expression::not(eq(Attribute::LastName, "Lee"));
        let found = collect(
            dao.search_in_group(&staff, Some(&not_lee), false, false)
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(guids(&found), vec!["G2", "G3"]);

        dao.remove_from_group(&users[0], &staff).await.unwrap();
        let after = collect(dao.search_in_group(&staff, None, false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(guids(&after), vec!["G2", "G3", "G4"]);

        let mut scoped: Vec<String> = dao
            .list_groups(Some("Staff"))
            .await
            .unwrap()
            .iter()
            .map(|g| g.name().to_string())
            .collect();
        scoped.sort();
        assert_eq!(scoped, vec!["Staff", "Staff-US"]);

        let path = Group::path("cn=staff,ou=groups,dc=example,dc=org").unwrap();
        assert!(matches!(
            dao.search_in_group(&path, None, false, false).await,
            Err(IdmError::InvalidGroup { .. })
        ));
        let missing = Group::prefix("00g9", "Gone");
        assert!(matches!(
            dao.search_in_group(&missing, None, false, false).await,
            Err(IdmError::NotFound { .. })
        ));
    }
}

// =============================================================================
// LDAP DAO Tests
// =============================================================================

#[cfg(test)]
mod ldap_tests {
    use super::*;
    use crate::providers::ldap_filter;

    fn dao(client: &Arc<InMemoryLdapClient>, settings: LdapSettings) -> LdapUserDao {
        LdapUserDao::new(client.clone(), &settings).unwrap()
    }

    fn seed_group(client: &InMemoryLdapClient, cn: &str) -> Group {
        let dn = format!("cn={cn},{GROUPS}");
        client.insert(
            LdapEntry::new(&dn)
                .with("objectClass", ["Top", "groupOfNames"])
                .with("cn", [cn]),
        );
        Group::path(&dn).unwrap()
    }

    #[test]
    fn test_filter_compilation() {
        let base = Dn::parse(GROUPS).unwrap();
        let expression = Expression::and([
            sw(Attribute::LastName, "Le"),
            Expression::not(eq(Attribute::FirstName, "Ann")),
            Expression::in_group(Group::path("cn=staff,ou=groups,dc=example,dc=org").unwrap()),
        ]);
        assert_eq!(
            ldap_filter::compile(&expression, Some(&base)).unwrap().to_string(),
            "(&(sn=Le*)(!(givenName=Ann))(groupMembership=cn=staff,ou=groups,dc=example,dc=org))"
        );

        let like = Expression::or([
            Expression::like(Attribute::Email, "a*@example.com").unwrap(),
            eq(Attribute::Guid, "G1"),
        ]);
        assert_eq!(
            ldap_filter::compile(&like, Some(&base)).unwrap().to_string(),
            "(|(uid=a*@example.com)(thekeyGuid=G1))"
        );
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = dao(&client, full_ldap_settings());

        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        user.mfa.encrypted_secret = Some("enc".into());
        user.self_service.signup_key = Some("k1".into());
        dao.create(&mut user).await.unwrap();

        let entry = client
            .entry(&format!("cn=a@example.com,{PEOPLE}"))
            .unwrap();
        assert_eq!(entry.get("uid"), Some("a@example.com"));
        assert_eq!(entry.get("thekeyGuid"), Some("G1"));
        assert_eq!(entry.get("passwordAllowChange"), Some("TRUE"));
        assert!(entry.values("objectClass").contains(&"Person".to_string()));

        let found = dao.find_by_email("a@example.com", false).await.unwrap().unwrap();
        assert_eq!(found.guid, Guid::new("G1"));
        assert_eq!(found.last_name.as_deref(), Some("Lee"));
        assert_eq!(found.mfa.encrypted_secret.as_deref(), Some("enc"));
        assert_eq!(found.self_service.signup_key.as_deref(), Some("k1"));
        assert!(found.allow_password_change);

        let mut duplicate = person("G2", "a@example.com", "Ann", "Other");
        assert!(matches!(
            dao.create(&mut duplicate).await,
            Err(IdmError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_deactivation_renames_entry() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = dao(&client, full_ldap_settings());
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        dao.create(&mut user).await.unwrap();
        let live_dn = dao.user_dn(&user).to_string();

        dao.deactivate(&mut user).await.unwrap();
        let parked_dn = dao.user_dn(&user).to_string();
        assert!(client.entry(&live_dn).is_none());
        let parked = client.entry(&parked_dn).unwrap();
        assert_eq!(parked.get("cn"), Some("$GUID$-=G1"));
        assert_eq!(parked.get("uid"), Some("a@example.com"));
        assert_eq!(parked.get("loginDisabled"), Some("TRUE"));

        assert!(dao.find_by_email("a@example.com", false).await.unwrap().is_none());
        let found = dao.find_by_email("a@example.com", true).await.unwrap().unwrap();
        assert!(found.deactivated);
        assert_eq!(found.email, "a@example.com");
        let active = collect(dao.search(None, false, false).await.unwrap()).await.unwrap();
        assert!(active.is_empty());

        dao.reactivate(&mut user).await.unwrap();
        assert!(client.entry(&live_dn).is_some());
        let found = dao.find_by_email("a@example.com", false).await.unwrap().unwrap();
        assert!(!found.deactivated);
        assert!(!found.login_disabled);
    }

    #[tokio::test]
    async fn test_update_replaces_only_changed_attributes() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = dao(&client, full_ldap_settings());
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        dao.create(&mut user).await.unwrap();

        let before = client.modify_calls();
        dao.update(&user, &AttrSet::from([Attr::Name, Attr::Location]))
            .await
            .unwrap();
        assert_eq!(client.modify_calls(), before);

        user.last_name = Some("Smith".into());
        user.city = Some("Orlando".into());
        dao.update(&user, &AttrSet::from([Attr::Name])).await.unwrap();
        assert_eq!(client.modify_calls(), before + 1);

        let entry = client.entry(&dao.user_dn(&user).to_string()).unwrap();
        assert_eq!(entry.get("sn"), Some("Smith"));
        assert_eq!(entry.get("city"), None);
    }

    #[tokio::test]
    async fn test_page_size_follows_the_bound() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = dao(
            &client,
            LdapSettings {
                max_search_results: SearchLimit::Limit(10),
                ..full_ldap_settings()
            },
        );

        let _restricted = dao.search(None, false, true).await.unwrap();
        assert_eq!(client.last_page_size(), Some(11));
        let _unrestricted = dao.search(None, false, false).await.unwrap();
        assert_eq!(client.last_page_size(), Some(1000));
    }

    #[tokio::test]
    async fn test_group_membership_is_kept_on_both_sides() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = dao(&client, full_ldap_settings());
        let staff = seed_group(&client, "staff");
        let staff_dn = format!("cn=staff,{GROUPS}");

        let mut ann = person("G1", "a@example.com", "Ann", "Lee");
        let mut bob = person("G2", "b@example.com", "Bob", "Lewis");
        dao.create(&mut ann).await.unwrap();
        dao.create(&mut bob).await.unwrap();
        let ann_dn = dao.user_dn(&ann).to_string();

        dao.add_to_group(&ann, &staff).await.unwrap();
        dao.add_to_group(&ann, &staff).await.unwrap();
        dao.add_to_group(&bob, &staff).await.unwrap();

        let group_entry = client.entry(&staff_dn).unwrap();
        assert_eq!(group_entry.values("member").len(), 2);
        assert!(group_entry.values("member").contains(&ann_dn));
        let found = dao.find_by_email("a@example.com", false).await.unwrap().unwrap();
        assert_eq!(found.groups, vec![staff.clone()]);

        let anns = eq(Attribute::FirstName, "ann");
        let scoped = collect(
            dao.search_in_group(&staff, Some(&anns), false, false)
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(guids(&scoped), vec!["G1"]);

        dao.remove_from_group(&ann, &staff).await.unwrap();
        dao.remove_from_group(&ann, &staff).await.unwrap();
        let group_entry = client.entry(&staff_dn).unwrap();
        assert_eq!(group_entry.values("member").len(), 1);
        let found = dao.find_by_email("a@example.com", false).await.unwrap().unwrap();
        assert!(found.groups.is_empty());

        let outside = Group::path("cn=staff,ou=other,dc=example,dc=org").unwrap();
        assert!(matches!(
            dao.add_to_group(&ann, &outside).await,
            Err(IdmError::InvalidGroup { .. })
        ));
        let missing = Group::path(&format!("cn=gone,{GROUPS}")).unwrap();
        assert!(matches!(
            dao.add_to_group(&ann, &missing).await,
            Err(IdmError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_groups_by_scope() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = dao(&client, full_ldap_settings());
        seed_group(&client, "staff");
        seed_group(&client, "interns");
        let nested = format!("cn=us,cn=staff,{GROUPS}");
        client.insert(LdapEntry::new(&nested).with("objectClass", ["groupOfNames"]));

        let all = dao.list_groups(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(dao.list_groups(Some("")).await.unwrap().len(), 3);

        let staff = dao
            .list_groups(Some(&format!("cn=staff,{GROUPS}")))
            .await
            .unwrap();
        assert_eq!(staff.len(), 2);
        assert!(staff.contains(&Group::path(&nested).unwrap()));

        assert!(matches!(
            dao.list_groups(Some("ou=elsewhere,dc=example,dc=org")).await,
            Err(IdmError::InvalidGroup { .. })
        ));

        let ungrouped = LdapUserDao::new(
            client.clone() as Arc<dyn LdapClient>,
            &LdapSettings {
                base_group_dn: None,
                ..full_ldap_settings()
            },
        )
        .unwrap();
        assert!(matches!(
            ungrouped.list_groups(None).await,
            Err(IdmError::Unsupported { .. })
        ));
    }
}

// =============================================================================
// Synchronization Bridge Tests
// =============================================================================

#[cfg(test)]
mod bridge_tests {
    use super::*;

    struct Fixture {
        okta: Arc<InMemoryOktaClient>,
        ldap: Arc<InMemoryLdapClient>,
        directory: Directory,
        legacy: LdapUserDao,
    }

    fn fixture(ldap_settings: LdapSettings) -> Fixture {
        let okta = Arc::new(InMemoryOktaClient::new());
        let ldap = Arc::new(InMemoryLdapClient::new());
        let settings = DirectorySettings {
            okta: OktaSettings::default(),
            ldap: ldap_settings,
        };
        let directory = Directory::from_settings(
            okta.clone(),
            Some(ldap.clone() as Arc<dyn LdapClient>),
            &settings,
        )
        .unwrap();
        let legacy = LdapUserDao::new(ldap.clone(), &full_ldap_settings()).unwrap();
        Fixture {
            okta,
            ldap,
            directory,
            legacy,
        }
    }

    #[tokio::test]
    async fn test_loaded_records_carry_secondary_state() {
        let fx = fixture(ldap_settings());
        let mut legacy_user = person("G1", "a@example.com", "Ann", "Lee");
        legacy_user.mfa.encrypted_secret = Some("enc".into());
        legacy_user.mfa.intruder_attempts = 2;
        legacy_user.self_service.reset_password_key = Some("reset".into());
        fx.legacy.create(&mut legacy_user).await.unwrap();

        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        fx.directory.create(&mut user).await.unwrap();

        let loaded = fx.directory.find_by_email("a@example.com", false).await.unwrap().unwrap();
        assert_eq!(loaded.mfa.encrypted_secret.as_deref(), Some("enc"));
        assert_eq!(loaded.mfa.intruder_attempts, 2);
        assert_eq!(loaded.self_service.reset_password_key.as_deref(), Some("reset"));

        let searched = collect(fx.directory.search(None, false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(searched[0].mfa.encrypted_secret.as_deref(), Some("enc"));
    }

    #[tokio::test]
    async fn test_lookup_miss_leaves_defaults() {
        let fx = fixture(ldap_settings());
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        fx.directory.create(&mut user).await.unwrap();

        let loaded = fx.directory.fresh(&user).await.unwrap();
        assert_eq!(loaded.mfa, MfaState::default());
        assert_eq!(loaded.self_service, SelfServiceKeys::default());
    }

    #[tokio::test]
    async fn test_secondary_owned_update_is_forwarded() {
        let fx = fixture(ldap_settings());
        let mut legacy_user = person("G1", "a@example.com", "Ann", "Lee");
        fx.legacy.create(&mut legacy_user).await.unwrap();
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        fx.directory.create(&mut user).await.unwrap();

        let mut loaded = fx.directory.fresh(&user).await.unwrap();
        loaded.mfa.encrypted_secret = Some("rotated".into());
        loaded.first_name = Some("Changed".into());
        fx.directory
            .update(&loaded, &AttrSet::from([Attr::MfaSecret]))
            .await
            .unwrap();

        assert_eq!(fx.okta.update_calls(), 0);
        let entry = fx.ldap.entry(&fx.legacy.user_dn(&user).to_string()).unwrap();
        assert_eq!(entry.get("thekeyMfaSecret"), Some("rotated"));
        // only the forwarded tag reaches the secondary
        assert_eq!(entry.get("givenName"), Some("Ann"));
    }

    #[tokio::test]
    async fn test_forwarded_update_without_secondary_record_is_dropped() {
        let fx = fixture(ldap_settings());
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        fx.directory.create(&mut user).await.unwrap();

        user.mfa.encrypted_secret = Some("enc".into());
        fx.directory
            .update(&user, &AttrSet::from([Attr::MfaSecret]))
            .await
            .unwrap();
        assert_eq!(fx.ldap.modify_calls(), 0);
    }

    #[tokio::test]
    async fn test_forwarded_failure_propagates() {
        let fx = fixture(LdapSettings {
            read_only: true,
            ..ldap_settings()
        });
        let mut legacy_user = person("G1", "a@example.com", "Ann", "Lee");
        fx.legacy.create(&mut legacy_user).await.unwrap();
        let mut user = person("G1", "a@example.com", "Ann", "Lee");
        fx.directory.create(&mut user).await.unwrap();

        user.self_service.signup_key = Some("k".into());
        assert!(matches!(
            fx.directory
                .update(&user, &AttrSet::from([Attr::SelfServiceKeys]))
                .await,
            Err(IdmError::ReadOnly { .. })
        ));
    }
}

// =============================================================================
// Directory Facade Tests
// =============================================================================

#[cfg(test)]
mod directory_tests {
    use super::*;

    fn okta_directory() -> (Arc<InMemoryOktaClient>, Directory) {
        let client = Arc::new(InMemoryOktaClient::new());
        let dao = OktaUserDao::new(client.clone(), &OktaSettings::default()).unwrap();
        (client, Directory::new(Arc::new(dao)))
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let (_, directory) = okta_directory();
        let mut ann = person("G1", "a@example.com", "Ann", "Lee");
        directory.create(&mut ann).await.unwrap();

        let mut same_email = person("G2", "a@example.com", "Other", "Ann");
        assert!(matches!(
            directory.create(&mut same_email).await,
            Err(IdmError::AlreadyExists { .. })
        ));
        let mut same_guid = person("G1", "b@example.com", "Bob", "Lee");
        assert!(matches!(
            directory.create(&mut same_guid).await,
            Err(IdmError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_with_defaults_generates_guid() {
        let (_, directory) = okta_directory();
        let mut user = person("", "c@example.com", "Cee", "Lo");
        directory.create_with_defaults(&mut user).await.unwrap();
        assert!(!user.guid.is_blank());
        assert_eq!(user.guid.as_str(), user.guid.as_str().to_uppercase());

        let fresh = directory.fresh(&user).await.unwrap();
        assert_eq!(fresh.email, "c@example.com");
    }

    #[tokio::test]
    async fn test_reactivation_conflicts_with_live_email() {
        let (_, directory) = okta_directory();
        let mut first = person("G1", "a@example.com", "Ann", "Lee");
        directory.create(&mut first).await.unwrap();
        directory.deactivate(&mut first).await.unwrap();

        let mut second = person("G2", "a@example.com", "Ann", "Again");
        directory.create(&mut second).await.unwrap();

        assert!(matches!(
            directory.reactivate(&mut first).await,
            Err(IdmError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_fresh_unknown_user_is_not_found() {
        let (_, directory) = okta_directory();
        let ghost = person("G9", "ghost@example.com", "G", "Host");
        assert!(matches!(
            directory.fresh(&ghost).await,
            Err(IdmError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_falls_back_when_uncompilable() {
        let (client, directory) = okta_directory();
        client.add_group("00g1", "Staff");
        let staff = Group::prefix("00g1", "Staff");
        for (guid, email, first, last) in [
            ("G1", "a@example.com", "Ann", "Lee"),
            ("G2", "b@example.com", "Bob", "Lee"),
            ("G3", "c@example.com", "Cat", "Young"),
        ] {
            let mut user = person(guid, email, first, last);
            directory.create(&mut user).await.unwrap();
            if guid != "G3" {
                directory.add_to_group(&user, &staff).await.unwrap();
            }
        }

        let not_lee = Expression::not(eq(Attribute::LastName, "Lee"));
        let found = collect(directory.search(Some(&not_lee), false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(guids(&found), vec!["G3"]);

        let scoped = Expression::in_group(staff.clone()).and_also(eq(Attribute::FirstName, "bob"));
        let found = collect(directory.search(Some(&scoped), false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(guids(&found), vec!["G2"]);

        let like = Expression::like(Attribute::LastName, "L*").unwrap();
        assert!(matches!(
            directory.search(Some(&like), false, false).await,
            Err(IdmError::UnsupportedOperator { .. })
        ));

        let groups = directory.list_groups(None).await.unwrap();
        assert_eq!(groups, vec![staff]);
    }

    #[tokio::test]
    async fn test_evaluator_fallback_applies_the_limit() {
        let client = Arc::new(InMemoryOktaClient::new());
        let settings = OktaSettings {
            max_search_results: SearchLimit::Limit(2),
            ..OktaSettings::default()
        };
        let dao = OktaUserDao::new(client.clone(), &settings).unwrap();
        let directory = Directory::new(Arc::new(dao));
        for i in 0..4 {
            let mut user = person(&format!("G{i}"), &format!("u{i}@example.com"), "Una", "Ser");
            directory.create(&mut user).await.unwrap();
        }

        let not_lee = Expression::not(eq(Attribute::LastName, "Lee"));
        let mut stream = directory.search(Some(&not_lee), false, true).await.unwrap();
        for _ in 0..2 {
            assert!(stream.next().await.unwrap().is_ok());
        }
        assert!(matches!(
            stream.next().await,
            Some(Err(IdmError::ResultLimitExceeded { limit: 2 }))
        ));

        let all = collect(directory.search(Some(&not_lee), false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_ldap_primary_compiles_group_scope() {
        let client = Arc::new(InMemoryLdapClient::new());
        let dao = LdapUserDao::new(client.clone(), &full_ldap_settings()).unwrap();
        let directory = Directory::new(Arc::new(dao));
        assert!(directory.secondary().is_none());
        assert!(directory.primary().capabilities().supports_group_query);

        let dn = format!("cn=staff,{GROUPS}");
        client.insert(LdapEntry::new(&dn).with("objectClass", ["groupOfNames"]));
        let staff = Group::path(&dn).unwrap();

        let mut ann = person("G1", "a@example.com", "Ann", "Lee");
        directory.create(&mut ann).await.unwrap();
        directory.add_to_group(&ann, &staff).await.unwrap();

        let scoped = Expression::in_group(staff).and_also(sw(Attribute::LastName, "L"));
        let found = collect(directory.search(Some(&scoped), false, false).await.unwrap())
            .await
            .unwrap();
        assert_eq!(guids(&found), vec!["G1"]);
    }
}
