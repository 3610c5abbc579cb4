use std::{convert::Infallible, fmt, path::PathBuf, sync::Arc, time::Duration};

use tracing::{debug, info, warn};
use url::Url;

use crate::{
    clock::Clock,
    config::{ConfigError, ManagerConfig},
    device::DeviceFlow,
    discovery::{self, Role},
    fetch::{self, FetchReport},
    session::IdentitySession,
    sso::{SsoApi, SsoError},
    sso_oidc::{OidcApi, SsoApiError, TokenError},
    store::{CredentialsFile, StoreError},
    token, SsoManagerBuilder,
};

/// A configured credential refresher for one SSO portal.
///
/// Construct one with [`SsoManager::builder`].
pub struct SsoManager<V> {
    pub(crate) oidc: Arc<dyn OidcApi>,
    pub(crate) sso: Arc<dyn SsoApi>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: ManagerConfig,
    pub(crate) config_path: Option<PathBuf>,
    pub(crate) credentials_path: PathBuf,
    pub(crate) verification_prompt: V,
    pub(crate) unauthorized_backoff: Duration,
    pub(crate) max_unauthorized_retries: Option<u32>,
    pub(crate) concurrency: usize,
}

impl SsoManager<Infallible> {
    /// Construct a builder for a manager using `config`.
    #[must_use]
    pub fn builder(config: ManagerConfig) -> SsoManagerBuilder<()> {
        SsoManagerBuilder::new(config)
    }
}

impl<V> SsoManager<V>
where
    V: VerificationPrompt,
{
    /// The configuration, including the current session.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Authorize the device, then refresh credentials.
    ///
    /// # Errors
    ///
    /// See [`authorize_device`](Self::authorize_device) and
    /// [`refresh_credentials`](Self::refresh_credentials).
    pub async fn run(&mut self) -> Result<RefreshSummary, SsoManagerError<V::Error>> {
        self.authorize_device().await?;
        self.refresh_credentials().await
    }

    /// Make sure an OIDC client is registered and authorized, prompting the user if needed.
    ///
    /// The session is persisted to the config file afterwards.
    ///
    /// # Errors
    ///
    /// An error is returned if registration or authorization fails, if the user doesn't approve
    /// access in time, or if the config can't be written.
    pub async fn authorize_device(&mut self) -> Result<(), SsoManagerError<V::Error>> {
        let session = self
            .device_flow()
            .ensure_registered(self.config.session().clone())
            .await?;
        self.update_session(session).await
    }

    /// Fetch credentials for every reachable role and write them to the credentials file.
    ///
    /// The access token is renewed first if it has expired. If SSO reports the token as
    /// unauthorized, the whole cycle is retried after a backoff.
    ///
    /// # Errors
    ///
    /// An error is returned if a token can't be obtained, if discovery fails for any reason
    /// other than an unauthorized token, if the unauthorized retry limit is reached, or if the
    /// config or credentials files can't be read or written.
    pub async fn refresh_credentials(&mut self) -> Result<RefreshSummary, SsoManagerError<V::Error>> {
        info!("retrieving credentials");
        let mut unauthorized_attempts = 0;
        loop {
            if self.config.session().token_expired(self.clock.now()) {
                let session = self.renew_token(self.config.session().clone()).await?;
                self.update_session(session).await?;
            }
            let access_token = self
                .config
                .session()
                .access_token()
                .ok_or(SsoManagerError::MissingToken)?
                .to_string();

            match self.retrieve(&access_token).await {
                Ok(summary) => {
                    info!(
                        accounts = summary.accounts,
                        roles = summary.roles,
                        profiles = summary.profiles,
                        "credentials successfully retrieved"
                    );
                    return Ok(summary);
                }
                Err(Cycle::Failed(error)) => return Err(error),
                Err(Cycle::Unauthorized) => {
                    unauthorized_attempts += 1;
                    if self
                        .max_unauthorized_retries
                        .is_some_and(|max| unauthorized_attempts > max)
                    {
                        return Err(SsoManagerError::Unauthorized {
                            attempts: unauthorized_attempts,
                        });
                    }
                    info!(
                        backoff = ?self.unauthorized_backoff,
                        "access token unauthorized, sleeping and refetching credentials"
                    );
                    self.clock.sleep(self.unauthorized_backoff).await;
                }
            }
        }
    }

    async fn renew_token(
        &self,
        session: IdentitySession,
    ) -> Result<IdentitySession, SsoManagerError<V::Error>> {
        let device = self.device_flow();
        if session.needs_registration(self.clock.now()) {
            return device.ensure_registered(session).await;
        }

        match token::issue_token(&*self.oidc, &*self.clock, &session).await {
            Ok(session) => Ok(session),
            Err(TokenError::InvalidGrant) => {
                warn!("unable to create token, reauthorizing...");
                device.start_authorization(session).await
            }
            Err(error) => Err(SsoManagerError::Token(error)),
        }
    }

    async fn retrieve(&self, access_token: &str) -> Result<RefreshSummary, Cycle<V::Error>> {
        let accounts = discovery::list_accounts(&*self.sso, access_token).await?;
        debug!(?accounts, "discovered accounts");

        let roles =
            discovery::list_roles(&*self.sso, &accounts, access_token, self.concurrency).await?;

        let report = fetch::fetch_all(
            &*self.sso,
            access_token,
            &roles,
            &accounts,
            self.concurrency,
            self.clock.now(),
        )
        .await;
        if report.unauthorized() {
            return Err(Cycle::Unauthorized);
        }
        let FetchReport {
            mut credentials,
            failures,
        } = report;

        for role in &roles {
            credentials.reconcile(&accounts, self.config.role_priority(), role);
        }

        let mut store = CredentialsFile::load(&self.credentials_path)
            .await
            .map_err(SsoManagerError::Store)?;
        let default_updated = store.merge(&credentials, self.config.login_account());
        store.save().await.map_err(SsoManagerError::Store)?;

        Ok(RefreshSummary {
            accounts: accounts.len(),
            roles: roles.len(),
            profiles: credentials.len() + usize::from(default_updated),
            default_updated,
            skipped: failures
                .into_iter()
                .map(|(role, error)| (role, error.to_string()))
                .collect(),
        })
    }

    async fn update_session(
        &mut self,
        session: IdentitySession,
    ) -> Result<(), SsoManagerError<V::Error>> {
        self.config.set_session(session);
        if let Some(path) = &self.config_path {
            self.config.save(path).await?;
        }
        Ok(())
    }

    fn device_flow(&self) -> DeviceFlow<'_, V> {
        DeviceFlow {
            oidc: &*self.oidc,
            clock: &*self.clock,
            verification_prompt: &self.verification_prompt,
            start_url: self.config.start_url(),
        }
    }
}

impl<V> fmt::Debug for SsoManager<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SsoManager")
            .field("config", &self.config)
            .field("config_path", &self.config_path)
            .field("credentials_path", &self.credentials_path)
            .field("unauthorized_backoff", &self.unauthorized_backoff)
            .field("max_unauthorized_retries", &self.max_unauthorized_retries)
            .field("concurrency", &self.concurrency)
            .field("verification_prompt", &"_")
            .finish_non_exhaustive()
    }
}

/// What a successful refresh did.
#[derive(Clone, Debug, Default)]
pub struct RefreshSummary {
    /// The number of accounts discovered.
    pub accounts: usize,

    /// The number of roles discovered across all accounts.
    pub roles: usize,

    /// The number of profiles written to the credentials file.
    pub profiles: usize,

    /// Whether the `default` profile was updated.
    pub default_updated: bool,

    /// Roles whose credentials couldn't be fetched, with the reason.
    pub skipped: Vec<(Role, String)>,
}

enum Cycle<P: std::error::Error + Send + Sync + 'static> {
    Unauthorized,
    Failed(SsoManagerError<P>),
}

impl<P: std::error::Error + Send + Sync + 'static> From<SsoError> for Cycle<P> {
    fn from(error: SsoError) -> Self {
        match error {
            SsoError::Unauthorized => Self::Unauthorized,
            error @ SsoError::Api(_) => Self::Failed(SsoManagerError::Discovery(error)),
        }
    }
}

impl<P: std::error::Error + Send + Sync + 'static> From<SsoManagerError<P>> for Cycle<P> {
    fn from(error: SsoManagerError<P>) -> Self {
        Self::Failed(error)
    }
}

/// An SSO verification prompt.
///
/// Device authorization requires users to explicitly grant access by visiting a URL and clicking
/// a button. There are many ways this could be implemented depending on the context, so
/// verification prompts are modelled with this trait.
///
/// The trait is implemented for async functions with a single `Url` argument and returning
/// `Result<(), E>`, so a trivial prompt could look like:
///
/// ```
/// use std::convert::Infallible;
///
/// use aws_sso_manager::VerificationPrompt;
///
/// fn prompt() -> impl VerificationPrompt {
///     |verification_url| async move {
///         println!("Go to {verification_url} to grant access");
///         Ok::<_, Infallible>(())
///     }
/// }
/// ```
///
/// The `Error` associated type can be used if the prompt is fallible. Type information is preserved
/// in the event of any subsequent [`SsoManagerError`].
pub trait VerificationPrompt: Clone + Send + Sync {
    /// The future returned by the prompt.
    type Future: std::future::Future<Output = Result<(), Self::Error>> + Send;

    /// An error that could occur when attempting to prompt.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Prompt the user to grant access via the given `verification_url`.
    fn prompt(self, verification_url: Url) -> Self::Future;
}

impl<F, Fut, E> VerificationPrompt for F
where
    F: FnOnce(Url) -> Fut + Clone + Send + Sync,
    Fut: std::future::Future<Output = Result<(), E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    type Future = Fut;
    type Error = E;

    fn prompt(self, verification_url: Url) -> Fut {
        self(verification_url)
    }
}

/// An error that stopped a credential refresh.
#[derive(Debug, thiserror::Error)]
pub enum SsoManagerError<P: std::error::Error + Send + Sync + 'static> {
    /// The config file couldn't be read or written.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The credentials file couldn't be read or written.
    #[error(transparent)]
    Store(StoreError),

    /// SSO OIDC refused to register a client.
    #[error("SSO client registration failed: {0}")]
    Registration(SsoApiError),

    /// Device authorization couldn't be started.
    #[error("device authorization failed: {0}")]
    Authorization(SsoApiError),

    /// An error occurred during the verification prompt.
    ///
    /// See [`VerificationPrompt`] for more information.
    #[error("SSO authentication failed during verification: {0}")]
    VerificationPrompt(P),

    /// The user didn't approve access before the device code expired.
    #[error("SSO authentication failed: timed out after {expires_in}s waiting for verification")]
    AuthorizationTimeout {
        /// How long the device code was valid, in seconds.
        expires_in: i64,
    },

    /// An access token couldn't be created.
    #[error("unable to create SSO access token: {0}")]
    Token(TokenError),

    /// No access token was available after authorization.
    #[error("no SSO access token is available")]
    MissingToken,

    /// Accounts or roles couldn't be listed.
    #[error("unable to discover SSO accounts and roles: {0}")]
    Discovery(SsoError),

    /// SSO kept rejecting the access token.
    #[error("access token was still unauthorized after {attempts} attempts")]
    Unauthorized {
        /// How many cycles were rejected.
        attempts: u32,
    },
}
