#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::pedantic)]

//! Keep AWS credentials fresh for every account and role reachable through AWS SSO.
//!
//! An [`SsoManager`] registers itself as an SSO OIDC client, asks the user to authorize it in a
//! browser, and then uses the resulting access token to fetch credentials for every role in
//! every account. The credentials are merged into the AWS shared credentials file under several
//! profile names:
//!
//! - `{account_id}_{role_name}` for every role;
//! - `{account_id}` and `{account_name}` for each account's highest priority role (see
//!   [`RolePriority`]);
//! - `default` for the configured login account's highest priority role.
//!
//! See [`refresh`] for the main entrypoint to the crate.
//!
//! ```no_run
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::convert::Infallible;
//!
//! let summary = aws_sso_manager::refresh(|url| async move {
//!     println!("Go to {url} to sign in with SSO");
//!     Ok::<_, Infallible>(())
//! }).await?;
//! println!("refreshed {} profiles", summary.profiles);
//! # Ok(()) }
//! ```

mod builder;
mod clock;
mod config;
mod credentials;
mod device;
mod discovery;
mod fetch;
mod flow;
mod reconcile;
mod region;
mod session;
mod sso;
mod sso_oidc;
mod store;
mod token;

#[cfg(test)]
mod testing;

pub use crate::{
    builder::SsoManagerBuilder,
    clock::{Clock, SystemClock},
    config::{default_config_path, default_credentials_path, ConfigError, ManagerConfig},
    credentials::{role_profile_key, CredentialSet, RoleCredential, DEFAULT_PROFILE},
    discovery::{AccountInfo, Accounts, Role},
    flow::{RefreshSummary, SsoManager, SsoManagerError, VerificationPrompt},
    reconcile::RolePriority,
    region::{InvalidRegion, Region},
    session::IdentitySession,
    sso::{IssuedCredentials, Page, SsoApi, SsoError},
    sso_oidc::{
        ClientRegistration, CreateTokenRequest, DeviceAuthorization, IssuedToken, OidcApi,
        SsoApiError, TokenError,
    },
    store::{CredentialsFile, StoreError},
};

const _: () = assert!(
    const_str::equal!(env!("CARGO_PKG_VERSION_MAJOR"), "0"),
    "client naming scheme needs updated for 1.0"
);
const CLIENT_NAME: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "@",
    "0.",
    env!("CARGO_PKG_VERSION_MINOR")
);

/// Refresh credentials using the installed config, prompting with `verification_prompt` if the
/// device needs to be (re)authorized.
///
/// The config is loaded from [`default_config_path`] and the updated device session is written
/// back to it. Credentials are merged into [`default_credentials_path`]. If SSO rejects the
/// access token, the cycle is retried every 30 seconds until it succeeds.
///
/// For more flexible configuration see [`SsoManagerBuilder`].
///
/// # Errors
///
/// An error is returned if the config is missing or invalid, if the device can't be authorized,
/// or if credentials can't be discovered or written. See [`SsoManagerError`].
pub async fn refresh<V: VerificationPrompt>(
    verification_prompt: V,
) -> Result<RefreshSummary, SsoManagerError<V::Error>> {
    let config_path = default_config_path()?;
    let config = ManagerConfig::load(&config_path).await?;

    SsoManager::builder(config)
        .config_path(config_path)
        .verification_prompt(verification_prompt)
        .build()
        .await?
        .run()
        .await
}
