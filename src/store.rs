//! Credential store used by the login and register forms.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::config::UserConfig;

/// Verifies or registers a username/password pair.
///
/// Called synchronously from worker threads, so implementations must not
/// block for long.
pub trait CredentialStore: Send + Sync {
    /// With `is_login` the pair must match a stored user; otherwise the user
    /// is registered if the name is still free. Empty fields always fail.
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool;
}

/// In-process store keyed by username.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: &[UserConfig]) -> Self {
        let map = users
            .iter()
            .map(|u| (u.username.clone(), u.password.clone()))
            .collect();
        Self {
            users: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl CredentialStore for MemoryStore {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }

        if is_login {
            let ok = self
                .users
                .read()
                .get(username)
                .is_some_and(|stored| stored == password);
            if !ok {
                tracing::debug!(user = username, "Login rejected");
            }
            return ok;
        }

        let mut users = self.users.write();
        if users.contains_key(username) {
            tracing::debug!(user = username, "Username already taken");
            return false;
        }
        users.insert(username.to_string(), password.to_string());
        tracing::info!(user = username, "User registered");
        true
    }
}
