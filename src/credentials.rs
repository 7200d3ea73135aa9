//! File-backed credential store.
//!
//! Users live in a single pretty-printed JSON object keyed by username:
//!
//! ```json
//! {
//!     "alice": { "password_hash": "9f86d0...", "phone": "5551234567" }
//! }
//! ```
//!
//! Every mutation loads the whole file, applies the change, and writes the
//! whole file back through a temporary sibling that is renamed into place.
//! A mutex serialises those read-modify-write cycles inside one process;
//! nothing coordinates separate processes sharing the same file.
//!
//! Passwords are hashed with unsalted SHA-256, which keeps existing stores
//! readable. A salted, slow hash (argon2 or similar) would need a migration
//! of stored records.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::fsutil::write_atomically;
use crate::models::UserRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    #[serde(alias = "password")]
    password_hash: String,
    #[serde(default)]
    phone: String,
}

type UserMap = BTreeMap<String, StoredUser>;

pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a user. Returns `false` when the username is already taken.
    ///
    /// The phone number is stored as given; callers validate it with
    /// [`is_valid_phone`] first.
    pub fn register(&self, username: &str, password: &str, phone: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut users = self.load()?;
        if users.contains_key(username) {
            return Ok(false);
        }
        users.insert(
            username.to_string(),
            StoredUser {
                password_hash: hash_password(password),
                phone: phone.to_string(),
            },
        );
        self.save(&users)?;
        tracing::info!(username, "registered user");
        Ok(true)
    }

    /// True iff the user exists and the password hashes to the stored digest.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<bool> {
        let users = self.load()?;
        Ok(users
            .get(username)
            .is_some_and(|u| u.password_hash == hash_password(password)))
    }

    /// Replace the password hash of an existing user. Returns `false` for an
    /// unknown username.
    pub fn update_password(&self, username: &str, new_password: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut users = self.load()?;
        match users.get_mut(username) {
            Some(user) => {
                user.password_hash = hash_password(new_password);
            }
            None => return Ok(false),
        }
        self.save(&users)?;
        tracing::info!(username, "password updated");
        Ok(true)
    }

    /// First username (in key order) whose stored phone equals `phone`.
    ///
    /// Records saved without a phone are never matched, so an empty
    /// argument always finds nothing.
    pub fn find_username_by_phone(&self, phone: &str) -> Result<Option<String>> {
        if phone.is_empty() {
            return Ok(None);
        }
        let users = self.load()?;
        Ok(users
            .into_iter()
            .find(|(_, u)| u.phone == phone)
            .map(|(name, _)| name))
    }

    pub fn user(&self, username: &str) -> Result<Option<UserRecord>> {
        let users = self.load()?;
        Ok(users.get(username).map(|u| UserRecord {
            username: username.to_string(),
            password_hash: u.password_hash.clone(),
            phone: u.phone.clone(),
        }))
    }

    fn load(&self) -> Result<UserMap> {
        if !self.path.exists() {
            return Ok(UserMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(UserMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credential file: {}", self.path.display()))
    }

    fn save(&self, users: &UserMap) -> Result<()> {
        let json = serde_json::to_string_pretty(users)?;
        write_atomically(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to write credential file: {}", self.path.display()))
    }
}

/// Lowercase hex SHA-256 of the password bytes.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Exactly ten ASCII digits.
pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == 10 && phone.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, CredentialStore) {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::new(tmp.path().join("users.json"));
        (tmp, store)
    }

    #[test]
    fn test_register_then_authenticate() {
        let (_tmp, store) = store();
        assert!(store.register("alice", "pw123", "5551234567").unwrap());
        assert!(store.authenticate("alice", "pw123").unwrap());
        assert!(!store.authenticate("alice", "pw1234").unwrap());
        assert!(!store.authenticate("Alice", "pw123").unwrap());
    }

    #[test]
    fn test_register_rejects_duplicate_and_keeps_first() {
        let (_tmp, store) = store();
        assert!(store.register("bob", "first", "1111111111").unwrap());
        assert!(!store.register("bob", "second", "2222222222").unwrap());

        let user = store.user("bob").unwrap().unwrap();
        assert_eq!(user.password_hash, hash_password("first"));
        assert_eq!(user.phone, "1111111111");
    }

    #[test]
    fn test_usernames_are_case_sensitive() {
        let (_tmp, store) = store();
        assert!(store.register("carol", "a", "").unwrap());
        assert!(store.register("Carol", "b", "").unwrap());
        assert!(store.authenticate("carol", "a").unwrap());
        assert!(store.authenticate("Carol", "b").unwrap());
    }

    #[test]
    fn test_update_password_only_touches_hash() {
        let (_tmp, store) = store();
        store.register("dave", "old", "5550000000").unwrap();
        assert!(store.update_password("dave", "new").unwrap());

        let user = store.user("dave").unwrap().unwrap();
        assert_eq!(user.username, "dave");
        assert_eq!(user.phone, "5550000000");
        assert_eq!(user.password_hash, hash_password("new"));
    }

    #[test]
    fn test_update_password_unknown_user() {
        let (_tmp, store) = store();
        assert!(!store.update_password("nobody", "pw").unwrap());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_find_username_by_phone() {
        let (_tmp, store) = store();
        store.register("erin", "pw", "5551234567").unwrap();
        store.register("frank", "pw", "5559876543").unwrap();

        assert_eq!(
            store.find_username_by_phone("5559876543").unwrap().as_deref(),
            Some("frank")
        );
        assert_eq!(store.find_username_by_phone("555123456").unwrap(), None);
        assert_eq!(store.find_username_by_phone("0000000000").unwrap(), None);
    }

    #[test]
    fn test_plaintext_never_stored() {
        let (_tmp, store) = store();
        store.register("gina", "hunter2", "5551234567").unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains(&hash_password("hunter2")));
    }

    #[test]
    fn test_legacy_records_without_phone() {
        let (_tmp, store) = store();
        std::fs::write(
            store.path(),
            format!(
                r#"{{ "harry": {{ "password": "{}" }} }}"#,
                hash_password("pw")
            ),
        )
        .unwrap();

        assert!(store.authenticate("harry", "pw").unwrap());
        let user = store.user("harry").unwrap().unwrap();
        assert_eq!(user.phone, "");
        assert_eq!(store.find_username_by_phone("").unwrap(), None);
    }

    #[test]
    fn test_round_trips_across_instances() {
        let (tmp, store) = store();
        store.register("ivy", "pw", "5551112222").unwrap();
        drop(store);

        let reopened = CredentialStore::new(tmp.path().join("users.json"));
        assert_eq!(
            reopened.user("ivy").unwrap().unwrap().phone,
            "5551112222"
        );
    }

    #[test]
    fn test_phone_validation() {
        assert!(is_valid_phone("5551234567"));
        assert!(!is_valid_phone("555123456"));
        assert!(!is_valid_phone("55512345678"));
        assert!(!is_valid_phone("555-123-45"));
        assert!(!is_valid_phone("５５５１２３４５６７"));
    }
}
