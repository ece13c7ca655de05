//! Principal (account) resolution.
//!
//! The gate needs to turn a claimed account name into a uid and the
//! account's canonical name. Production lookups go through the passwd
//! database; tests use [`StaticResolver`].

use std::collections::HashMap;

use tracing::debug;

/// A resolved system account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub uid: u32,
    /// Account name as reported by the account database.
    pub name: String,
}

impl Principal {
    pub fn new(uid: u32, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
        }
    }
}

/// Account lookup interface.
pub trait PrincipalResolver: Send + Sync {
    /// Look up an account by name. `None` when no such account exists.
    fn resolve(&self, name: &str) -> Option<Principal>;
}

/// Resolver backed by `getpwnam_r(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswdResolver;

impl PrincipalResolver for PasswdResolver {
    fn resolve(&self, name: &str) -> Option<Principal> {
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Some(Principal::new(user.uid.as_raw(), user.name)),
            Ok(None) => None,
            Err(e) => {
                debug!(name, error = %e, "passwd lookup failed");
                None
            }
        }
    }
}

/// Fixed in-memory account table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    accounts: HashMap<String, Principal>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name` to an account with the same canonical name.
    pub fn with_account(self, name: &str, uid: u32) -> Self {
        self.with_alias(name, Principal::new(uid, name))
    }

    /// Map `name` to an arbitrary account, which may report a different
    /// canonical name (renamed or reused accounts).
    pub fn with_alias(mut self, name: &str, principal: Principal) -> Self {
        self.accounts.insert(name.to_string(), principal);
        self
    }
}

impl PrincipalResolver for StaticResolver {
    fn resolve(&self, name: &str) -> Option<Principal> {
        self.accounts.get(name).cloned()
    }
}
