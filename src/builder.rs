use std::{path::PathBuf, sync::Arc, time::Duration};

use aws_config::BehaviorVersion;

use crate::{
    clock::{Clock, SystemClock},
    config::{default_credentials_path, ConfigError, ManagerConfig},
    sso, sso_oidc, OidcApi, SsoApi, SsoManager, VerificationPrompt,
};

const DEFAULT_UNAUTHORIZED_BACKOFF: Duration = Duration::from_secs(30);
const DEFAULT_CONCURRENCY: usize = 10;

/// Builder for [`SsoManager`].
///
/// # Example
///
/// ```no_run
/// # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::convert::Infallible;
///
/// use aws_sso_manager::{ManagerConfig, SsoManager};
///
/// let config = ManagerConfig::load("aws-sso-manager.yml").await?;
/// let mut manager = SsoManager::builder(config)
///     // persist the device session back to the config file
///     .config_path("aws-sso-manager.yml")
///     .credentials_path(".aws/credentials")
///     .max_unauthorized_retries(5)
///     .verification_prompt(|url| async move {
///         println!("Go to {url} to grant access");
///         Ok::<_, Infallible>(())
///     })
///     .build()
///     .await?;
///
/// let summary = manager.run().await?;
/// println!("wrote {} profiles", summary.profiles);
/// # Ok(()) }
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct SsoManagerBuilder<V = ()> {
    config: ManagerConfig,
    config_path: Option<PathBuf>,
    credentials_path: Option<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
    oidc: Option<Arc<dyn OidcApi>>,
    sso: Option<Arc<dyn SsoApi>>,
    unauthorized_backoff: Duration,
    max_unauthorized_retries: Option<u32>,
    concurrency: usize,
    verification_prompt: V,
}

impl SsoManagerBuilder<()> {
    pub(crate) fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            config_path: None,
            credentials_path: None,
            clock: None,
            oidc: None,
            sso: None,
            unauthorized_backoff: DEFAULT_UNAUTHORIZED_BACKOFF,
            max_unauthorized_retries: None,
            concurrency: DEFAULT_CONCURRENCY,
            verification_prompt: (),
        }
    }
}

impl<V> SsoManagerBuilder<V> {
    /// Persist the device session to `path` whenever it changes.
    ///
    /// Without a config path the session only lives as long as the manager.
    #[must_use]
    pub fn config_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            ..self
        }
    }

    /// Set the credentials file.
    ///
    /// By default this is `$AWS_SHARED_CREDENTIALS_FILE`, or `~/.aws/credentials`.
    #[must_use]
    pub fn credentials_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: Some(path.into()),
            ..self
        }
    }

    /// Set the clock used for expiry checks and waits.
    #[must_use]
    pub fn clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Some(Arc::new(clock)),
            ..self
        }
    }

    /// Use `oidc` instead of AWS SSO OIDC.
    #[must_use]
    pub fn oidc_client(self, oidc: impl OidcApi + 'static) -> Self {
        Self {
            oidc: Some(Arc::new(oidc)),
            ..self
        }
    }

    /// Use `sso` instead of the AWS SSO portal.
    #[must_use]
    pub fn sso_client(self, sso: impl SsoApi + 'static) -> Self {
        Self {
            sso: Some(Arc::new(sso)),
            ..self
        }
    }

    /// Set how long to wait before retrying a cycle whose token was unauthorized.
    ///
    /// The default is 30 seconds.
    #[must_use]
    pub fn unauthorized_backoff(self, backoff: Duration) -> Self {
        Self {
            unauthorized_backoff: backoff,
            ..self
        }
    }

    /// Give up after `retries` consecutive unauthorized cycles.
    ///
    /// By default cycles are retried indefinitely.
    #[must_use]
    pub fn max_unauthorized_retries(self, retries: u32) -> Self {
        Self {
            max_unauthorized_retries: Some(retries),
            ..self
        }
    }

    /// Set how many SSO requests may be in flight at once during discovery and fetching.
    ///
    /// The default is 10. Zero is treated as one.
    #[must_use]
    pub fn concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..self
        }
    }

    /// Set the verification prompt handler.
    ///
    /// Users need to visit a URL and explicitly grant access whenever the device has to be
    /// (re)authorized.
    #[must_use]
    pub fn verification_prompt<NewV>(self, verification_prompt: NewV) -> SsoManagerBuilder<NewV>
    where
        NewV: VerificationPrompt,
    {
        SsoManagerBuilder {
            config: self.config,
            config_path: self.config_path,
            credentials_path: self.credentials_path,
            clock: self.clock,
            oidc: self.oidc,
            sso: self.sso,
            unauthorized_backoff: self.unauthorized_backoff,
            max_unauthorized_retries: self.max_unauthorized_retries,
            concurrency: self.concurrency,
            verification_prompt,
        }
    }
}

impl<V: VerificationPrompt> SsoManagerBuilder<V> {
    /// Build an [`SsoManager`].
    ///
    /// AWS clients are only constructed for whichever of OIDC and SSO haven't been replaced.
    /// They make anonymous requests in the config's region.
    ///
    /// # Errors
    ///
    /// An error is returned if no credentials path was set and the default can't be determined.
    pub async fn build(self) -> Result<SsoManager<V>, ConfigError> {
        let credentials_path = match self.credentials_path {
            Some(path) => path,
            None => default_credentials_path()?,
        };

        let (oidc, sso) = match (self.oidc, self.sso) {
            (Some(oidc), Some(sso)) => (oidc, sso),
            (oidc, sso) => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(self.config.region().0.clone())
                    .no_credentials()
                    .load()
                    .await;
                (
                    oidc.unwrap_or_else(|| Arc::new(sso_oidc::Client::new(&sdk_config))),
                    sso.unwrap_or_else(|| Arc::new(sso::Client::new(&sdk_config))),
                )
            }
        };

        Ok(SsoManager {
            oidc,
            sso,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
            config_path: self.config_path,
            credentials_path,
            verification_prompt: self.verification_prompt,
            unauthorized_backoff: self.unauthorized_backoff,
            max_unauthorized_retries: self.max_unauthorized_retries,
            concurrency: self.concurrency,
        })
    }
}
