use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Connection descriptor for one remote target. Immutable; created once per
/// target and owned by the cluster facade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential_token: String,
}

impl ServerInfo {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        credential_token: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            credential_token: credential_token.into(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How to authenticate a session. Resolved once from a credential token and
/// treated as a capability handle with a bounded lifetime; never persisted.
#[derive(Clone)]
pub enum AuthMethod {
    Password {
        username: String,
        password: String,
    },
    PublicKey {
        private_key: String,
        passphrase: Option<String>,
    },
    None,
}

impl AuthMethod {
    /// Credential-provided identity takes precedence over the job-context
    /// username when both are present.
    pub fn username<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            AuthMethod::Password { username, .. } if !username.is_empty() => username,
            _ => fallback,
        }
    }
}

// Manual Debug so key material and passwords never end up in logs.
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthMethod::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthMethod::PublicKey { .. } => f.debug_struct("PublicKey").finish_non_exhaustive(),
            AuthMethod::None => f.write_str("None"),
        }
    }
}

/// SSH key material returned by the external credential store.
#[derive(Clone)]
pub struct SshCredential {
    pub public_key: String,
    pub private_key: String,
    pub passphrase: Option<String>,
    pub expires_at: Option<SystemTime>,
}

impl SshCredential {
    pub fn remaining_lifetime(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
    }

    pub fn into_auth(self) -> AuthMethod {
        AuthMethod::PublicKey {
            private_key: self.private_key,
            passphrase: self.passphrase,
        }
    }
}

/// Password credential returned by the external credential store.
#[derive(Clone)]
pub struct PasswordCredential {
    pub username: String,
    pub password: String,
}

impl PasswordCredential {
    pub fn into_auth(self) -> AuthMethod {
        AuthMethod::Password {
            username: self.username,
            password: self.password,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{AuthMethod, SshCredential};

    #[test]
    fn credential_username_wins_over_context_username() {
        let auth = AuthMethod::Password {
            username: "store-user".into(),
            password: "secret".into(),
        };
        assert_eq!(auth.username("context-user"), "store-user");

        let auth = AuthMethod::PublicKey {
            private_key: "key".into(),
            passphrase: None,
        };
        assert_eq!(auth.username("context-user"), "context-user");
    }

    #[test]
    fn debug_output_does_not_leak_secrets() {
        let auth = AuthMethod::Password {
            username: "user".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn expired_credential_has_zero_lifetime() {
        let credential = SshCredential {
            public_key: String::new(),
            private_key: String::new(),
            passphrase: None,
            expires_at: Some(SystemTime::now() - Duration::from_secs(60)),
        };
        assert_eq!(credential.remaining_lifetime(), Some(Duration::ZERO));
    }
}
