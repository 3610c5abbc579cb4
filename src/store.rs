use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use ini::{EscapePolicy, Ini, ParseOption, WriteOption};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    config::{create_parent_dir, write_private},
    credentials::{CredentialSet, RoleCredential, DEFAULT_PROFILE},
};

const ACCESS_KEY_ID: &str = "aws_access_key_id";
const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
const SESSION_TOKEN: &str = "aws_session_token";
const SESSION_EXPIRATION: &str = "aws_session_expiration";
const ROLE_NAME: &str = "aws_sso_role_name";
const ACCOUNT_ID: &str = "aws_sso_account_id";
const ACCOUNT_NAME: &str = "aws_sso_account_name";
const ACCOUNT_EMAIL: &str = "aws_sso_account_email";
const UPDATED_AT: &str = "aws_sso_updated_at";

/// The AWS shared credentials file.
///
/// The whole file is read on [`load`](Self::load) and rewritten on [`save`](Self::save).
/// Profiles this crate doesn't produce are carried through untouched.
pub struct CredentialsFile {
    path: PathBuf,
    ini: Ini,
}

impl CredentialsFile {
    /// Read the credentials file at `path`. A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// An error is returned if the file exists but can't be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no credentials file yet");
                String::new()
            }
            Err(error) => return Err(StoreError::io("unable to read", &path, error)),
        };

        let ini = Ini::load_from_str_opt(
            &content,
            ParseOption {
                enabled_quote: false,
                enabled_escape: false,
                ..ParseOption::default()
            },
        )
        .map_err(|error| StoreError::Parse {
            path: path.clone(),
            message: error.to_string(),
        })?;

        Ok(Self { path, ini })
    }

    /// The file's location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite every profile in `credentials`, and point `default` at the login account's
    /// canonical profile.
    ///
    /// Returns whether `default` was written. If `login_account` has no canonical profile, any
    /// existing `default` is left as it was.
    pub fn merge(&mut self, credentials: &CredentialSet, login_account: &str) -> bool {
        for (profile, credential) in credentials.profiles_to_write() {
            self.write_profile(&profile, credential);
        }

        if let Some(canonical) = credentials.canonical(login_account) {
            info!(
                account_id = login_account,
                role_name = %canonical.role_name,
                "updating default profile"
            );
            self.write_profile(DEFAULT_PROFILE, canonical);
            true
        } else {
            warn!(
                account_id = login_account,
                "login account has no credentials, leaving default profile unchanged"
            );
            false
        }
    }

    /// Write the file back to disk, creating parent directories as needed.
    ///
    /// On Unix the file is only readable by its owner.
    ///
    /// # Errors
    ///
    /// An error is returned if the file can't be written.
    pub async fn save(&self) -> Result<(), StoreError> {
        let mut content = Vec::new();
        self.ini
            .write_to_opt(
                &mut content,
                WriteOption {
                    escape_policy: EscapePolicy::Nothing,
                    ..WriteOption::default()
                },
            )
            .map_err(|error| StoreError::io("unable to serialize", &self.path, error))?;

        create_parent_dir(&self.path)
            .await
            .map_err(|error| StoreError::io("unable to create directory for", &self.path, error))?;
        write_private(&self.path, content)
            .await
            .map_err(|error| StoreError::io("unable to write", &self.path, error))?;

        info!(path = %self.path.display(), "wrote credentials file");
        Ok(())
    }

    /// Read a single value.
    #[must_use]
    pub fn get(&self, profile: &str, key: &str) -> Option<&str> {
        self.ini.get_from(Some(profile), key)
    }

    /// Read back a profile written by [`merge`](Self::merge).
    ///
    /// Returns `None` if the profile doesn't exist or wasn't written by this crate.
    #[must_use]
    pub fn profile(&self, profile: &str) -> Option<RoleCredential> {
        let section = self.ini.section(Some(profile))?;
        let get = |key: &str| section.get(key).map(ToString::to_string);

        Some(RoleCredential {
            access_key_id: get(ACCESS_KEY_ID)?,
            secret_access_key: get(SECRET_ACCESS_KEY)?,
            session_token: get(SESSION_TOKEN)?,
            role_name: get(ROLE_NAME)?,
            account_id: get(ACCOUNT_ID)?,
            account_name: get(ACCOUNT_NAME)?,
            account_email: get(ACCOUNT_EMAIL),
            issued_at: section.get(UPDATED_AT).and_then(parse_timestamp)?,
            expires_at: section.get(SESSION_EXPIRATION).and_then(parse_timestamp),
        })
    }

    fn write_profile(&mut self, profile: &str, credential: &RoleCredential) {
        self.ini.delete(Some(profile));

        let mut entries = vec![
            (ACCESS_KEY_ID, credential.access_key_id.clone()),
            (SECRET_ACCESS_KEY, credential.secret_access_key.clone()),
            (SESSION_TOKEN, credential.session_token.clone()),
            (ROLE_NAME, credential.role_name.clone()),
            (ACCOUNT_ID, credential.account_id.clone()),
            (ACCOUNT_NAME, credential.account_name.clone()),
            (UPDATED_AT, format_timestamp(credential.issued_at)),
        ];
        if let Some(email) = &credential.account_email {
            entries.push((ACCOUNT_EMAIL, email.clone()));
        }
        if let Some(expires_at) = credential.expires_at {
            entries.push((SESSION_EXPIRATION, format_timestamp(expires_at)));
        }

        for (key, value) in entries {
            self.ini.set_to(Some(profile), key.to_string(), value);
        }
    }
}

impl fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialsFile")
            .field("path", &self.path)
            .field(
                "profiles",
                &self.ini.sections().flatten().collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

/// An error reading or writing the credentials file.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The file couldn't be read or written.
    #[error("{action} credentials file {}: {source}", path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// The credentials file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The file isn't valid INI.
    #[error("unable to parse credentials file {}: {message}", path.display())]
    Parse {
        /// The credentials file.
        path: PathBuf,
        /// What the parser reported.
        message: String,
    },
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}
