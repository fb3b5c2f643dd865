use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::auth::Principal;
use crate::credentials::Credentials;
use crate::error::AuthenticationError;

/// Resolves setup credentials to a principal.
///
/// Implementations are shared by every handshake a responder runs, so they
/// must tolerate concurrent readers.
pub trait CredentialStore: Send + Sync {
    /// Consume `credentials` and return the principal they identify.
    fn authenticate(&self, credentials: Credentials) -> Result<Principal, AuthenticationError>;
}

/// A user as kept by the store. Only a salted digest of the secret is held.
struct StoredUser {
    salt: [u8; 16],
    digest: [u8; 32],
    roles: BTreeSet<String>,
}

impl StoredUser {
    fn new(secret: &str, roles: BTreeSet<String>) -> Self {
        let salt: [u8; 16] = rand::rng().random();
        Self {
            digest: salted_digest(&salt, secret),
            salt,
            roles,
        }
    }

    fn verify(&self, secret: &str) -> bool {
        let candidate = salted_digest(&self.salt, secret);
        self.digest[..].ct_eq(&candidate[..]).into()
    }
}

fn salted_digest(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// A credential store backed by a concurrent in-memory map.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: DashMap<String, StoredUser, ahash::RandomState>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user while building the store.
    pub fn with_user<I, R>(self, username: impl Into<String>, secret: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.insert_user(username, secret, roles);
        self
    }

    /// Add or replace a user. The secret is digested before it is stored.
    pub fn insert_user<I, R>(&self, username: impl Into<String>, secret: impl Into<String>, roles: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let secret = secret.into();
        let user = StoredUser::new(&secret, roles.into_iter().map(Into::into).collect());
        self.users.insert(username.into(), user);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn authenticate(&self, credentials: Credentials) -> Result<Principal, AuthenticationError> {
        let username = credentials.username();

        let Some(user) = self.users.get(username) else {
            debug!(username = %username, "Unknown user");
            return Err(AuthenticationError::BadCredentials(username.to_string()));
        };

        if !user.verify(credentials.secret().expose_secret()) {
            debug!(username = %username, "Secret mismatch");
            return Err(AuthenticationError::BadCredentials(username.to_string()));
        }

        Ok(Principal::new(username, user.roles.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryCredentialStore {
        InMemoryCredentialStore::new().with_user("memphis", "pwd", ["USER"])
    }

    #[test]
    fn test_known_pair_yields_user_principal() {
        let principal = store()
            .authenticate(Credentials::new("memphis", "pwd"))
            .unwrap();
        assert_eq!(principal.username(), "memphis");
        assert!(principal.has_role("USER"));
        assert_eq!(principal.roles().len(), 1);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let result = store().authenticate(Credentials::new("memphis", "wrong"));
        assert!(matches!(
            result,
            Err(AuthenticationError::BadCredentials(name)) if name == "memphis"
        ));
    }

    #[test]
    fn test_unknown_user_rejected() {
        let result = store().authenticate(Credentials::new("operator", "pwd"));
        assert!(matches!(result, Err(AuthenticationError::BadCredentials(_))));
    }

    #[test]
    fn test_secret_is_stored_as_salted_digest() {
        let store = store();
        store.insert_user("operator", "pwd", ["USER"]);

        let memphis = store.users.get("memphis").unwrap();
        let operator = store.users.get("operator").unwrap();
        assert_ne!(&memphis.digest[..], b"pwd".as_slice());
        assert_ne!(memphis.digest, salted_digest(&[0; 16], "pwd"));
        // same secret, different salt
        assert_ne!(memphis.digest, operator.digest);
        drop((memphis, operator));

        assert!(store.authenticate(Credentials::new("memphis", "pwd")).is_ok());
        assert!(store.authenticate(Credentials::new("operator", "pwd")).is_ok());
    }

    #[test]
    fn test_verify_rejects_prefix_and_longer_secrets() {
        let user = StoredUser::new("pwd", BTreeSet::new());
        assert!(user.verify("pwd"));
        assert!(!user.verify("pw"));
        assert!(!user.verify("pwd2"));
        assert!(!user.verify(""));
    }

    #[test]
    fn test_insert_replaces_user() {
        let store = store();
        store.insert_user("memphis", "new-pwd", ["USER", "ADMIN"]);
        assert_eq!(store.len(), 1);

        assert!(store.authenticate(Credentials::new("memphis", "pwd")).is_err());
        let principal = store
            .authenticate(Credentials::new("memphis", "new-pwd"))
            .unwrap();
        assert!(principal.has_role("ADMIN"));
    }

    #[test]
    fn test_concurrent_handshakes_read_the_same_store() {
        let store = std::sync::Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || store.authenticate(Credentials::new("memphis", "pwd")))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
    }
}
