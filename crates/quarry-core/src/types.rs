use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated principal: the account name plus the host it connected from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user: String,
    pub host: String,
}

impl UserIdentity {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'@'{}'", self.user, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::UserIdentity;

    #[test]
    fn display_quotes_user_and_host() {
        let id = UserIdentity::new("alice", "10.0.0.1");
        assert_eq!(id.to_string(), "'alice'@'10.0.0.1'");
    }
}
