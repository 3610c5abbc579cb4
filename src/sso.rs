//! Cleaned up AWS SSO API.

use std::fmt;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sso::error::{DisplayErrorContext, SdkError};
use chrono::{DateTime, TimeZone, Utc};

use crate::discovery::{AccountInfo, Role};

/// The AWS SSO portal operations used to discover accounts and fetch role credentials.
///
/// [`Client`] implements this against AWS. Listing operations are paginated: callers pass the
/// `next_token` from the previous [`Page`] until it is `None`.
#[async_trait]
pub trait SsoApi: Send + Sync {
    /// List one page of the accounts the token can access.
    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<String>,
    ) -> Result<Page<AccountInfo>, SsoError>;

    /// List one page of the roles the token can assume in `account_id`.
    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Role>, SsoError>;

    /// Obtain temporary credentials for `role`.
    async fn get_role_credentials(
        &self,
        access_token: &str,
        role: &Role,
    ) -> Result<IssuedCredentials, SsoError>;
}

/// One page of a paginated listing.
#[derive(Debug)]
pub struct Page<T> {
    /// The items on this page.
    pub items: Vec<T>,

    /// The token for the next page, if there is one.
    pub next_token: Option<String>,
}

/// Credentials as returned by `GetRoleCredentials`.
#[derive(Clone)]
pub struct IssuedCredentials {
    /// The access key ID.
    pub access_key_id: String,

    /// The secret access key.
    pub secret_access_key: String,

    /// The session token.
    pub session_token: String,

    /// When the credentials expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// An error from the AWS SSO portal API.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SsoError {
    /// The access token was rejected, e.g. because the session was revoked.
    #[error("access token is unauthorized")]
    Unauthorized,

    /// Any other failure, including malformed responses.
    #[error("{0}")]
    Api(String),
}

pub(crate) struct Client {
    inner: aws_sdk_sso::Client,
}

impl Client {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        Self {
            inner: aws_sdk_sso::Client::new(config),
        }
    }
}

#[async_trait]
impl SsoApi for Client {
    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<String>,
    ) -> Result<Page<AccountInfo>, SsoError> {
        let res = self
            .inner
            .list_accounts()
            .access_token(access_token)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|error| map_error(error, |error| error.is_unauthorized_exception()))?;

        Ok(Page {
            items: res
                .account_list
                .unwrap_or_default()
                .into_iter()
                .map(TryInto::try_into)
                .collect::<Result<_, _>>()
                .map_err(SsoError::Api)?,
            next_token: res.next_token,
        })
    }

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Role>, SsoError> {
        let res = self
            .inner
            .list_account_roles()
            .access_token(access_token)
            .account_id(account_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|error| map_error(error, |error| error.is_unauthorized_exception()))?;

        Ok(Page {
            items: res
                .role_list
                .unwrap_or_default()
                .into_iter()
                .map(|role| role_from_sdk(role, account_id))
                .collect::<Result<_, _>>()
                .map_err(SsoError::Api)?,
            next_token: res.next_token,
        })
    }

    async fn get_role_credentials(
        &self,
        access_token: &str,
        role: &Role,
    ) -> Result<IssuedCredentials, SsoError> {
        self.inner
            .get_role_credentials()
            .access_token(access_token)
            .account_id(&role.account_id)
            .role_name(&role.role_name)
            .send()
            .await
            .map_err(|error| map_error(error, |error| error.is_unauthorized_exception()))
            .and_then(|res| res.try_into().map_err(SsoError::Api))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

fn map_error<E, R>(error: SdkError<E, R>, is_unauthorized: impl FnOnce(&E) -> bool) -> SsoError
where
    E: std::error::Error + 'static,
    R: fmt::Debug,
{
    if error.as_service_error().is_some_and(is_unauthorized) {
        SsoError::Unauthorized
    } else {
        SsoError::Api(DisplayErrorContext(&error).to_string())
    }
}

impl TryFrom<aws_sdk_sso::types::AccountInfo> for AccountInfo {
    type Error = String;

    fn try_from(res: aws_sdk_sso::types::AccountInfo) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid ListAccounts response: ", $msg)
            };
        }

        Ok(Self {
            account_id: res.account_id.ok_or(invalid_res!("missing account_id"))?,
            account_name: res
                .account_name
                .ok_or(invalid_res!("missing account_name"))?,
            email: res.email_address,
        })
    }
}

fn role_from_sdk(res: aws_sdk_sso::types::RoleInfo, account_id: &str) -> Result<Role, String> {
    macro_rules! invalid_res {
        ($msg:literal) => {
            concat!("invalid ListAccountRoles response: ", $msg)
        };
    }

    Ok(Role {
        account_id: res.account_id.unwrap_or_else(|| account_id.to_string()),
        role_name: res.role_name.ok_or(invalid_res!("missing role_name"))?,
    })
}

impl TryFrom<aws_sdk_sso::operation::get_role_credentials::GetRoleCredentialsOutput>
    for IssuedCredentials
{
    type Error = String;

    fn try_from(
        res: aws_sdk_sso::operation::get_role_credentials::GetRoleCredentialsOutput,
    ) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid GetRoleCredentials response: ", $msg)
            };
        }

        let credentials = res
            .role_credentials
            .ok_or(invalid_res!("missing role_credentials"))?;
        Ok(Self {
            access_key_id: credentials
                .access_key_id
                .ok_or(invalid_res!("missing access_key_id"))?,
            secret_access_key: credentials
                .secret_access_key
                .ok_or(invalid_res!("missing secret_access_key"))?,
            session_token: credentials
                .session_token
                .ok_or(invalid_res!("missing session_token"))?,
            expires_at: Utc.timestamp_millis_opt(credentials.expiration).single(),
        })
    }
}
