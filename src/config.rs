use std::{
    collections::HashSet,
    env, fmt, io,
    path::{Path, PathBuf},
};

use futures::TryFutureExt;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::info;

use crate::{reconcile::RolePriority, session::IdentitySession, Region};

const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
const AWS_SHARED_CREDENTIALS_FILE_DEFAULT: &[&str] = &[".aws", "credentials"];

const AWS_SSO_MANAGER_CONFIG: &str = "AWS_SSO_MANAGER_CONFIG";
const AWS_SSO_MANAGER_CONFIG_DEFAULT: &[&str] = &[".aws", "aws-sso-manager.yml"];

/// Settings for one SSO portal, plus the device session persisted between runs.
///
/// The YAML layout is:
///
/// ```yaml
/// region: us-east-1
/// ssoDomain: my-org
/// role_priority:
///   - AdminRole
///   - ReadOnlyRole
/// default:
///   loginAccount: "012345678901"
/// device: {}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    region: Region,

    #[serde(rename = "ssoDomain")]
    sso_domain: String,

    #[serde(default)]
    role_priority: RolePriority,

    default: LoginDefaults,

    #[serde(default)]
    device: IdentitySession,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct LoginDefaults {
    #[serde(rename = "loginAccount", deserialize_with = "account_id")]
    login_account: String,
}

impl ManagerConfig {
    /// Parse and validate a YAML config.
    ///
    /// # Errors
    ///
    /// An error is returned if the YAML doesn't match the expected layout, or if any value is
    /// invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the config at `path`.
    ///
    /// # Errors
    ///
    /// An error is returned if the file can't be read or [`from_yaml`](Self::from_yaml) fails.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .await
            .map_err(|error| ConfigError::io("unable to read", path, error))?;
        Self::from_yaml(&yaml)
    }

    /// Write the config, including the session, to `path`.
    ///
    /// Parent directories are created as needed. On Unix the file is only readable by its owner,
    /// since the session holds the client secret and access token.
    ///
    /// # Errors
    ///
    /// An error is returned if the file can't be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let yaml = self.to_yaml()?;
        create_parent_dir(path)
            .and_then(|()| write_private(path, yaml))
            .await
            .map_err(|error| ConfigError::io("unable to write", path, error))?;
        info!(path = %path.display(), "wrote config");
        Ok(())
    }

    /// Serialize the config as YAML.
    ///
    /// # Errors
    ///
    /// Serialization shouldn't fail in practice, but the error is propagated if it does.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(ConfigError::Parse)
    }

    /// Check every field that deserialization doesn't.
    ///
    /// # Errors
    ///
    /// An error describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_dns_label(&self.sso_domain) {
            return Err(ConfigError::Invalid(format!(
                "ssoDomain {:?} must be a DNS label (lowercase letters, digits and '-')",
                self.sso_domain
            )));
        }

        let mut seen = HashSet::new();
        for role in self.role_priority.roles() {
            if role.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "role_priority contains an empty role name".to_string(),
                ));
            }
            if !seen.insert(role) {
                return Err(ConfigError::Invalid(format!(
                    "role_priority lists {role:?} more than once"
                )));
            }
        }

        let login_account = &self.default.login_account;
        if login_account.len() != 12 || !login_account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid(format!(
                "default.loginAccount {login_account:?} must be a 12-digit account ID"
            )));
        }

        Ok(())
    }

    /// The region both SSO APIs are called in.
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// The SSO portal's subdomain of `awsapps.com`.
    pub fn sso_domain(&self) -> &str {
        &self.sso_domain
    }

    /// The SSO portal's start URL.
    pub fn start_url(&self) -> String {
        format!("https://{}.awsapps.com/start", self.sso_domain)
    }

    /// The role priority used to pick each account's canonical profile.
    pub fn role_priority(&self) -> &RolePriority {
        &self.role_priority
    }

    /// The account whose canonical profile is written as `default`.
    pub fn login_account(&self) -> &str {
        &self.default.login_account
    }

    /// The persisted device session.
    pub fn session(&self) -> &IdentitySession {
        &self.device
    }

    /// Replace the device session.
    pub fn set_session(&mut self, session: IdentitySession) {
        self.device = session;
    }

    /// Forget the device session, forcing a new registration on the next run.
    #[must_use]
    pub fn without_session(self) -> Self {
        Self {
            device: IdentitySession::default(),
            ..self
        }
    }
}

/// An error indicating a missing or invalid config.
///
/// The error message should be sufficient to aid end-user debugging.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config couldn't be parsed or serialized.
    #[error("invalid config: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// A config value is invalid.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// A file couldn't be read or written.
    #[error("{action} {}: {source}", path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A default path couldn't be determined.
    #[error("{0}")]
    Path(String),
}

impl ConfigError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The installed config file: `$AWS_SSO_MANAGER_CONFIG`, or `~/.aws/aws-sso-manager.yml`.
///
/// # Errors
///
/// An error is returned if the environment variable isn't valid UTF-8, or if it's unset and the
/// home directory can't be determined.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    path_from_env(AWS_SSO_MANAGER_CONFIG, AWS_SSO_MANAGER_CONFIG_DEFAULT)
}

/// The shared credentials file: `$AWS_SHARED_CREDENTIALS_FILE`, or `~/.aws/credentials`.
///
/// # Errors
///
/// See [`default_config_path`].
pub fn default_credentials_path() -> Result<PathBuf, ConfigError> {
    path_from_env(
        AWS_SHARED_CREDENTIALS_FILE,
        AWS_SHARED_CREDENTIALS_FILE_DEFAULT,
    )
}

fn path_from_env(name: &str, default: &[&str]) -> Result<PathBuf, ConfigError> {
    read_env(name)
        .map_err(|error| {
            ConfigError::Path(format!("invalid path in environment variable {name}: {error}"))
        })?
        .filter(|path| !path.is_empty())
        .map_or_else(
            || {
                let mut path = dirs_next::home_dir()
                    .ok_or_else(|| ConfigError::Path("could not determine home directory".into()))?;
                for segment in default {
                    path.push(segment);
                }
                Ok(path)
            },
            |path| Ok(PathBuf::from(path)),
        )
}

fn read_env(name: &str) -> Result<Option<String>, String> {
    env::var(name).map(Some).or_else(|error| match error {
        env::VarError::NotPresent => Ok(None),
        env::VarError::NotUnicode(data) => Err(format!("{data:?} contains invalid UTF-8")),
    })
}

pub(crate) async fn create_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

/// Write `contents` to `path`, readable only by its owner on Unix.
///
/// A new file is created with mode 0600, and an existing one is restricted before anything is
/// written to it.
pub(crate) async fn write_private(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(contents.as_ref()).await?;
    file.flush().await
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Account IDs are strings, but YAML reads an unquoted one as a number.
fn account_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AccountId {
        Text(String),
        Number(u64),
    }

    Ok(match AccountId::deserialize(deserializer)? {
        AccountId::Text(id) => id,
        AccountId::Number(id) => format!("{id:012}"),
    })
}

impl fmt::Display for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} in {} (login account {})",
            self.start_url(),
            self.region,
            self.default.login_account
        )
    }
}
