use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sso_oidc::{ClientRegistration, CreateTokenRequest};

/// Device registration and token state, persisted between runs.
///
/// Each stage of the device flow takes a session by value and returns an updated copy, so a
/// session is only ever replaced wholesale once a stage succeeds.
///
/// The secret fields are not printed in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    client_secret_expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    access_token_expires_at: Option<DateTime<Utc>>,
}

impl IdentitySession {
    /// Whether the client must be registered (again) before it can be used.
    ///
    /// This is the case if any registration field or the device code is missing, or if the
    /// client secret has expired.
    #[must_use]
    pub fn needs_registration(&self, now: DateTime<Utc>) -> bool {
        match (
            &self.client_id,
            &self.client_secret,
            self.client_secret_expires_at,
            &self.device_code,
        ) {
            (Some(_), Some(_), Some(expires_at), Some(_)) => now >= expires_at,
            _ => true,
        }
    }

    /// Whether a new access token is needed at `now`.
    #[must_use]
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match (&self.access_token, self.access_token_expires_at) {
            (Some(_), Some(expires_at)) => now > expires_at,
            _ => true,
        }
    }

    /// The access token, if one has been issued.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// When the access token expires.
    #[must_use]
    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.access_token_expires_at
    }

    /// The registered client ID.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// When the client registration expires.
    #[must_use]
    pub fn client_secret_expires_at(&self) -> Option<DateTime<Utc>> {
        self.client_secret_expires_at
    }

    /// The current device code.
    #[must_use]
    pub fn device_code(&self) -> Option<&str> {
        self.device_code.as_deref()
    }

    pub(crate) fn client_credentials(&self) -> Option<(&str, &str)> {
        Some((self.client_id.as_deref()?, self.client_secret.as_deref()?))
    }

    pub(crate) fn create_token_request(&self) -> Option<CreateTokenRequest> {
        let (client_id, client_secret) = self.client_credentials()?;
        Some(CreateTokenRequest {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            device_code: self.device_code.clone()?,
        })
    }

    #[must_use]
    pub(crate) fn with_registration(self, registration: ClientRegistration) -> Self {
        Self {
            client_id: Some(registration.client_id),
            client_secret: Some(registration.client_secret),
            client_secret_expires_at: Some(registration.client_secret_expires_at),
            ..self
        }
    }

    #[must_use]
    pub(crate) fn with_device_code(self, device_code: String) -> Self {
        Self {
            device_code: Some(device_code),
            ..self
        }
    }

    #[must_use]
    pub(crate) fn with_token(self, access_token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: Some(access_token),
            access_token_expires_at: Some(expires_at),
            ..self
        }
    }
}

impl fmt::Debug for IdentitySession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IdentitySession")
            .field("client_id", &self.client_id)
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .finish_non_exhaustive()
    }
}
