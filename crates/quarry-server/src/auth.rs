use crate::config::{AuthConfig, UserConfig};
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quarry_core::{CredentialService, UserIdentity, Verification};
use quarry_protocol::scramble::{password_hash, verify, SCRAMBLE_LENGTH};
use std::collections::HashMap;
use tracing::debug;

pub const ANY_HOST: &str = "%";

#[derive(Debug, Clone)]
struct Account {
    host: String,
    /// SHA1(password); empty for a password-less account.
    stored_hash: Vec<u8>,
}

/// Configured accounts, checked with the native-password scramble.
#[derive(Debug, Clone)]
pub struct AuthManager {
    users: HashMap<String, Vec<Account>>,
}

impl AuthManager {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let mut users: HashMap<String, Vec<Account>> = HashMap::new();
        for user in &config.users {
            let account = Account {
                host: user.host.clone(),
                stored_hash: stored_hash(user)?,
            };
            users.entry(user.username.clone()).or_default().push(account);
        }
        // exact hosts win over the wildcard
        for accounts in users.values_mut() {
            accounts.sort_by_key(|account| account.host == ANY_HOST);
        }
        Ok(Self { users })
    }

    fn account_for(&self, username: &str, remote_host: &str) -> Option<&Account> {
        self.users
            .get(username)?
            .iter()
            .find(|account| account.host == ANY_HOST || account.host == remote_host)
    }
}

fn stored_hash(user: &UserConfig) -> Result<Vec<u8>> {
    if let Some(encoded) = &user.password_sha1_base64 {
        let hash = STANDARD
            .decode(encoded)
            .map_err(|err| anyhow!("user {}: bad password_sha1_base64: {err}", user.username))?;
        if hash.len() != SCRAMBLE_LENGTH && !hash.is_empty() {
            return Err(anyhow!(
                "user {}: password hash must be {SCRAMBLE_LENGTH} bytes, got {}",
                user.username,
                hash.len()
            ));
        }
        return Ok(hash);
    }
    if let Some(plain) = &user.password_plain {
        return Ok(password_hash(plain));
    }
    Err(anyhow!("no password configured for {}", user.username))
}

impl CredentialService for AuthManager {
    fn resolve_and_verify(
        &self,
        user: &str,
        remote_host: &str,
        auth_response: &[u8],
        seed: &[u8],
    ) -> Verification {
        let Some(account) = self.account_for(user, remote_host) else {
            debug!(user, remote_host, "no matching account");
            return Verification::Mismatch;
        };
        if !verify(seed, &account.stored_hash, auth_response) {
            debug!(user, remote_host, "password mismatch");
            return Verification::Mismatch;
        }
        Verification::Verified(vec![UserIdentity::new(user, remote_host)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::scramble::scramble_response;

    const SEED: &[u8] = b"abcdefghijklmnopqrst";

    fn user(name: &str, host: &str, plain: &str) -> UserConfig {
        UserConfig {
            username: name.into(),
            host: host.into(),
            password_sha1_base64: None,
            password_plain: Some(plain.into()),
        }
    }

    fn manager() -> AuthManager {
        AuthManager::new(&AuthConfig {
            users: vec![
                user("alice", "%", "wonderland"),
                user("alice", "10.0.0.5", "office"),
                user("guest", "%", ""),
                UserConfig {
                    username: "bob".into(),
                    host: "%".into(),
                    password_sha1_base64: Some("W6ph5Mm5Pz8GgiULbPgzG37mj9g=".into()),
                    password_plain: None,
                },
            ],
        })
        .expect("auth")
    }

    #[test]
    fn verifies_plain_configured_password() {
        let auth = manager();
        let response = scramble_response(SEED, "wonderland");
        assert_eq!(
            auth.resolve_and_verify("alice", "192.168.0.9", &response, SEED),
            Verification::Verified(vec![UserIdentity::new("alice", "192.168.0.9")])
        );
    }

    #[test]
    fn exact_host_takes_precedence() {
        let auth = manager();
        let wildcard = scramble_response(SEED, "wonderland");
        assert_eq!(
            auth.resolve_and_verify("alice", "10.0.0.5", &wildcard, SEED),
            Verification::Mismatch
        );
        let office = scramble_response(SEED, "office");
        assert!(matches!(
            auth.resolve_and_verify("alice", "10.0.0.5", &office, SEED),
            Verification::Verified(_)
        ));
    }

    #[test]
    fn verifies_hashed_password() {
        let auth = manager();
        let response = scramble_response(SEED, "password");
        assert!(matches!(
            auth.resolve_and_verify("bob", "127.0.0.1", &response, SEED),
            Verification::Verified(_)
        ));
    }

    #[test]
    fn empty_password_account() {
        let auth = manager();
        assert!(matches!(
            auth.resolve_and_verify("guest", "127.0.0.1", &[], SEED),
            Verification::Verified(_)
        ));
        let response = scramble_response(SEED, "anything");
        assert_eq!(
            auth.resolve_and_verify("guest", "127.0.0.1", &response, SEED),
            Verification::Mismatch
        );
    }

    #[test]
    fn unknown_user_is_mismatch() {
        let auth = manager();
        assert_eq!(
            auth.resolve_and_verify("mallory", "127.0.0.1", &[1; 20], SEED),
            Verification::Mismatch
        );
    }

    #[test]
    fn malformed_hash_is_a_config_error() {
        let config = AuthConfig {
            users: vec![UserConfig {
                username: "bob".into(),
                host: "%".into(),
                password_sha1_base64: Some("c2hvcnQ=".into()),
                password_plain: None,
            }],
        };
        assert!(AuthManager::new(&config).is_err());
    }
}
