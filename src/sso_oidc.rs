//! Cleaned up AWS SSO OIDC API.

use std::fmt;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ssooidc::error::{DisplayErrorContext, SdkError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use url::Url;

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// The AWS SSO OIDC operations that make up the device authorization flow.
///
/// [`Client`] implements this against AWS.
#[async_trait]
pub trait OidcApi: Send + Sync {
    /// Register a public OIDC client called `client_name`.
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration, SsoApiError>;

    /// Begin device authorization for the SSO portal at `start_url`.
    async fn start_device_authorization(
        &self,
        client_id: &str,
        client_secret: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, SsoApiError>;

    /// Exchange a device code for an access token.
    async fn create_token(&self, request: &CreateTokenRequest) -> Result<IssuedToken, TokenError>;
}

/// An API error that occurred during registration or authorization.
///
/// This could be due to invalid configuration caught by the server, or a network issue. The error
/// message should be sufficient to aid end-user debugging.
#[derive(Clone, Debug, thiserror::Error)]
#[error("API error when attempting authentication: {0}")]
pub struct SsoApiError(pub(crate) String);

impl SsoApiError {
    /// Construct an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why a `CreateToken` call didn't produce a token.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TokenError {
    /// The user hasn't approved the device yet.
    #[error("authorization is pending")]
    AuthorizationPending,

    /// The client is polling too quickly.
    #[error("polling too quickly")]
    SlowDown,

    /// The device code is no longer valid; device authorization must start over.
    #[error("the device code is no longer valid")]
    InvalidGrant,

    /// The client credentials were rejected.
    #[error("the client is invalid")]
    InvalidClient,

    /// Any other failure.
    #[error(transparent)]
    Api(#[from] SsoApiError),
}

/// A registered OIDC client.
#[derive(Clone)]
pub struct ClientRegistration {
    /// The client ID.
    pub client_id: String,

    /// The client secret.
    pub client_secret: String,

    /// When the registration must be renewed.
    pub client_secret_expires_at: DateTime<Utc>,
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .finish_non_exhaustive()
    }
}

/// A started device authorization.
#[derive(Clone, Debug)]
pub struct DeviceAuthorization {
    /// The code exchanged for a token once the user approves.
    pub device_code: String,

    /// The code the user confirms in the browser.
    pub user_code: String,

    /// Where the user approves the device, with the user code pre-filled.
    pub verification_uri_complete: Url,

    /// How long the device code remains valid.
    pub expires_in: Duration,
}

/// A device code grant request.
#[derive(Clone)]
pub struct CreateTokenRequest {
    /// The client ID.
    pub client_id: String,

    /// The client secret.
    pub client_secret: String,

    /// The device code from [`DeviceAuthorization`].
    pub device_code: String,
}

/// An access token returned by `CreateToken`.
#[derive(Clone)]
pub struct IssuedToken {
    /// The access token.
    pub access_token: String,

    /// How long the token remains valid, from when it was issued.
    pub expires_in: Duration,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Client {
    inner: aws_sdk_ssooidc::Client,
}

impl Client {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        Self {
            inner: aws_sdk_ssooidc::Client::new(config),
        }
    }
}

#[async_trait]
impl OidcApi for Client {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration, SsoApiError> {
        self.inner
            .register_client()
            .client_name(client_name)
            .client_type("public")
            .send()
            .await
            .map_err(|error| DisplayErrorContext(&error).to_string())
            .and_then(TryInto::try_into)
            .map_err(SsoApiError)
    }

    async fn start_device_authorization(
        &self,
        client_id: &str,
        client_secret: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, SsoApiError> {
        self.inner
            .start_device_authorization()
            .client_id(client_id)
            .client_secret(client_secret)
            .start_url(start_url)
            .send()
            .await
            .map_err(|error| DisplayErrorContext(&error).to_string())
            .and_then(TryInto::try_into)
            .map_err(SsoApiError)
    }

    async fn create_token(&self, request: &CreateTokenRequest) -> Result<IssuedToken, TokenError> {
        let res = self
            .inner
            .create_token()
            .client_id(&request.client_id)
            .client_secret(&request.client_secret)
            .grant_type(DEVICE_CODE_GRANT_TYPE)
            .device_code(&request.device_code)
            .send()
            .await;

        match res {
            Ok(res) => res
                .try_into()
                .map_err(|error| TokenError::Api(SsoApiError(error))),
            Err(SdkError::ServiceError(error)) if error.err().is_authorization_pending_exception() => {
                Err(TokenError::AuthorizationPending)
            }
            Err(SdkError::ServiceError(error)) if error.err().is_slow_down_exception() => {
                Err(TokenError::SlowDown)
            }
            Err(SdkError::ServiceError(error)) if error.err().is_invalid_grant_exception() => {
                Err(TokenError::InvalidGrant)
            }
            Err(SdkError::ServiceError(error)) if error.err().is_invalid_client_exception() => {
                Err(TokenError::InvalidClient)
            }
            Err(error) => Err(TokenError::Api(SsoApiError(
                DisplayErrorContext(&error).to_string(),
            ))),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl TryFrom<aws_sdk_ssooidc::operation::register_client::RegisterClientOutput>
    for ClientRegistration
{
    type Error = String;

    fn try_from(
        res: aws_sdk_ssooidc::operation::register_client::RegisterClientOutput,
    ) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid RegisterClient response: ", $msg)
            };
        }

        Ok(Self {
            client_id: res.client_id.ok_or(invalid_res!("missing client_id"))?,
            client_secret: res
                .client_secret
                .ok_or(invalid_res!("missing client_secret"))?,
            client_secret_expires_at: Utc
                .timestamp_opt(res.client_secret_expires_at, 0)
                .single()
                .ok_or(invalid_res!("client_secret_expires_at is out of range"))?,
        })
    }
}

impl TryFrom<aws_sdk_ssooidc::operation::start_device_authorization::StartDeviceAuthorizationOutput>
    for DeviceAuthorization
{
    type Error = String;

    fn try_from(
        res: aws_sdk_ssooidc::operation::start_device_authorization::StartDeviceAuthorizationOutput,
    ) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid StartDeviceAuthorization response: ", $msg)
            };
        }

        Ok(Self {
            device_code: res.device_code.ok_or(invalid_res!("missing device_code"))?,
            user_code: res.user_code.ok_or(invalid_res!("missing user_code"))?,
            verification_uri_complete: res
                .verification_uri_complete
                .ok_or(invalid_res!("missing verification_uri_complete"))?
                .parse()
                .map_err(|error| {
                    format!(
                        invalid_res!("verification_uri_complete is not a valid URL ({})"),
                        error
                    )
                })?,
            expires_in: Duration::seconds(res.expires_in.into()),
        })
    }
}

impl TryFrom<aws_sdk_ssooidc::operation::create_token::CreateTokenOutput> for IssuedToken {
    type Error = String;

    fn try_from(
        res: aws_sdk_ssooidc::operation::create_token::CreateTokenOutput,
    ) -> Result<Self, Self::Error> {
        macro_rules! invalid_res {
            ($msg:literal) => {
                concat!("invalid CreateToken response: ", $msg)
            };
        }

        Ok(Self {
            access_token: res
                .access_token
                .ok_or(invalid_res!("missing access_token"))?,
            expires_in: Duration::seconds(res.expires_in.into()),
        })
    }
}
