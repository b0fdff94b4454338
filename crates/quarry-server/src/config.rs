use quarry_protocol::framer::DEFAULT_MAX_ALLOWED_PACKET;
use quarry_protocol::messages::DEFAULT_SERVER_VERSION;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default = "default_max_allowed_packet")]
    pub max_allowed_packet: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub grants: Vec<GrantConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GrantConfig {
    pub user: String,
    pub databases: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    pub auth: AuthConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    /// `%` matches any client host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Base64 of SHA1(password).
    pub password_sha1_base64: Option<String>,
    pub password_plain: Option<String>,
}

fn default_server_version() -> String {
    DEFAULT_SERVER_VERSION.to_string()
}

fn default_max_allowed_packet() -> usize {
    DEFAULT_MAX_ALLOWED_PACKET
}

fn default_host() -> String {
    "%".to_string()
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.max_connections == 0 {
            return Err(anyhow::anyhow!("server.max_connections must be positive"));
        }
        if self.server.max_allowed_packet == 0 {
            return Err(anyhow::anyhow!("server.max_allowed_packet must be positive"));
        }
        if self.server.server_version.contains('\0') {
            return Err(anyhow::anyhow!("server.server_version must not contain NUL"));
        }
        for user in &self.security.auth.users {
            if user.username.is_empty() {
                return Err(anyhow::anyhow!("user entry with empty username"));
            }
            if user.password_sha1_base64.is_none() && user.password_plain.is_none() {
                return Err(anyhow::anyhow!(format!(
                    "user {} has no password configured",
                    user.username
                )));
            }
        }
        for grant in &self.catalog.grants {
            for db in &grant.databases {
                if db != quarry_core::catalog::ALL_DATABASES
                    && !self
                        .catalog
                        .databases
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(db))
                {
                    return Err(anyhow::anyhow!(format!(
                        "grant for {} references unknown database {}",
                        grant.user, db
                    )));
                }
            }
        }
        Ok(())
    }
}
