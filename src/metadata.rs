//! Account metadata exported alongside the mailbox.
//!
//! Two documents land in the working directory before archiving:
//! `profile.json` (account, preferences, and the per-message failure list
//! collected during extraction) and `inbox.json` (an address book keyed by
//! `local@domain`). Both are plain UTF-8 JSON with deterministic key order.

use crate::error::Result;
use crate::store::DataStore;
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Preferences {
    pool_amount: i32,
    flags: BTreeMap<String, bool>,
}

#[derive(Debug, Serialize)]
struct ProfileDocument {
    preferences: Preferences,
    id: i64,
    username: String,
    is_active: bool,
    join_date: String,
    groups: Vec<String>,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InboxEntry {
    created: String,
    flags: BTreeMap<String, bool>,
    description: String,
}

/// Serialize the account profile, folding in the extraction failure list.
pub async fn user_profile(
    store: &dyn DataStore,
    account_id: i64,
    failures: &[String],
) -> Result<String> {
    let profile = store.fetch_profile(account_id).await?;

    let document = ProfileDocument {
        preferences: Preferences {
            pool_amount: profile.pool_amount,
            flags: profile.flags,
        },
        id: profile.id,
        username: profile.username,
        is_active: profile.is_active,
        join_date: profile
            .joined
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        groups: profile.groups,
        errors: failures.to_vec(),
    };

    Ok(serde_json::to_string(&document)?)
}

/// Serialize the address book for every inbox the account owns, deleted ones
/// included.
pub async fn inbox_metadata(store: &dyn DataStore, account_id: i64) -> Result<String> {
    let mut document = BTreeMap::new();
    for inbox in store.list_all_inboxes(account_id).await? {
        document.insert(
            inbox.address(),
            InboxEntry {
                created: inbox.created.to_rfc3339_opts(SecondsFormat::Micros, true),
                flags: inbox.flags,
                description: inbox.description.unwrap_or_default(),
            },
        );
    }

    Ok(serde_json::to_string(&document)?)
}

/// Write `profile.json` and `inbox.json` into the job working directory.
pub async fn write_documents(
    store: &dyn DataStore,
    account_id: i64,
    failures: &[String],
    working_dir: &Path,
) -> Result<()> {
    let profile = user_profile(store, account_id, failures).await?;
    let inboxes = inbox_metadata(store, account_id).await?;

    fs::write(working_dir.join("profile.json"), profile)?;
    fs::write(working_dir.join("inbox.json"), inboxes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountProfile, InboxRecord, MemoryStore};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn fixture_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_account(AccountProfile {
            id: 1,
            username: "someone".to_string(),
            is_active: true,
            joined: Utc.with_ymd_and_hms(2020, 5, 17, 9, 30, 0).unwrap(),
            groups: vec!["beta".to_string()],
            pool_amount: 500,
            flags: BTreeMap::from([("prefer_html".to_string(), true)]),
        });
        store.add_inbox(
            1,
            InboxRecord {
                id: 10,
                local_part: "tickets".to_string(),
                domain: "example.com".to_string(),
                created: Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap(),
                flags: BTreeMap::from([("pinned".to_string(), true)]),
                description: Some("ticket spam".to_string()),
            },
            false,
        );
        store.add_inbox(
            1,
            InboxRecord {
                id: 11,
                local_part: "old".to_string(),
                domain: "example.com".to_string(),
                created: Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap(),
                flags: BTreeMap::new(),
                description: None,
            },
            true, // deleted inboxes still appear in the address book
        );
        store
    }

    #[tokio::test]
    async fn test_profile_document_fields() {
        let store = fixture_store();
        let json = user_profile(&store, 1, &["2a".to_string()]).await.unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["id"], 1);
        assert_eq!(value["username"], "someone");
        assert_eq!(value["is_active"], true);
        assert_eq!(value["preferences"]["pool_amount"], 500);
        assert_eq!(value["preferences"]["flags"]["prefer_html"], true);
        assert_eq!(value["groups"][0], "beta");
        assert_eq!(value["errors"][0], "2a");

        let joined = value["join_date"].as_str().unwrap();
        chrono::DateTime::parse_from_rfc3339(joined).unwrap();
    }

    #[tokio::test]
    async fn test_inbox_document_covers_all_inboxes() {
        let store = fixture_store();
        let json = inbox_metadata(&store, 1).await.unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();

        let keys: Vec<&String> = object.keys().collect();
        assert_eq!(keys, vec!["old@example.com", "tickets@example.com"]);

        let entry = &object["tickets@example.com"];
        assert_eq!(entry["description"], "ticket spam");
        assert_eq!(entry["flags"]["pinned"], true);
        let created = entry["created"].as_str().unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(created).unwrap();
        assert_eq!(
            parsed.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap()
        );
    }

    #[tokio::test]
    async fn test_write_documents() {
        let store = fixture_store();
        let tmp = tempfile::TempDir::new().unwrap();

        write_documents(&store, 1, &[], tmp.path()).await.unwrap();

        assert!(tmp.path().join("profile.json").is_file());
        let inbox_json = fs::read_to_string(tmp.path().join("inbox.json")).unwrap();
        serde_json::from_str::<Value>(&inbox_json).unwrap();
    }
}
