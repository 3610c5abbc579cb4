use std::time::Duration;

use tracing::{info, warn};

use crate::{
    clock::Clock,
    session::IdentitySession,
    sso_oidc::{OidcApi, SsoApiError, TokenError},
    token, SsoManagerError, VerificationPrompt, CLIENT_NAME,
};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// The device registration and authorization stages of the flow.
pub(crate) struct DeviceFlow<'a, V> {
    pub(crate) oidc: &'a dyn OidcApi,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) verification_prompt: &'a V,
    pub(crate) start_url: String,
}

impl<V: VerificationPrompt> DeviceFlow<'_, V> {
    /// Register a new client and authorize it, unless the session's registration is complete
    /// and unexpired.
    pub(crate) async fn ensure_registered(
        &self,
        session: IdentitySession,
    ) -> Result<IdentitySession, SsoManagerError<V::Error>> {
        if !session.needs_registration(self.clock.now()) {
            return Ok(session);
        }

        info!(client_name = CLIENT_NAME, "registering new SSO OIDC client");
        let registration = self
            .oidc
            .register_client(CLIENT_NAME)
            .await
            .map_err(SsoManagerError::Registration)?;

        self.start_authorization(session.with_registration(registration))
            .await
    }

    /// Start device authorization, prompt the user, and poll until a token is issued or the
    /// device code expires.
    pub(crate) async fn start_authorization(
        &self,
        session: IdentitySession,
    ) -> Result<IdentitySession, SsoManagerError<V::Error>> {
        let (client_id, client_secret) = session.client_credentials().ok_or_else(|| {
            SsoManagerError::Authorization(SsoApiError::new(
                "no registered client to authorize",
            ))
        })?;

        let authorization = self
            .oidc
            .start_device_authorization(client_id, client_secret, &self.start_url)
            .await
            .map_err(SsoManagerError::Authorization)?;
        let started_at = self.clock.now();
        let session = session.with_device_code(authorization.device_code);

        info!(
            verification_uri = %authorization.verification_uri_complete,
            user_code = %authorization.user_code,
            "authorizing device; approve access in the browser",
        );
        self.verification_prompt
            .clone()
            .prompt(authorization.verification_uri_complete)
            .await
            .map_err(SsoManagerError::VerificationPrompt)?;
        info!("waiting on user...");

        let mut interval = POLL_INTERVAL;
        loop {
            match token::issue_token(self.oidc, self.clock, &session).await {
                Ok(session) => {
                    info!("successfully authorized device");
                    return Ok(session);
                }
                Err(TokenError::AuthorizationPending | TokenError::InvalidClient) => {}
                Err(TokenError::SlowDown) => {
                    interval += SLOW_DOWN_INCREMENT;
                    warn!(?interval, "polling too quickly, slowing down");
                }
                Err(error) => return Err(SsoManagerError::Token(error)),
            }

            self.clock.sleep(interval).await;
            if self.clock.now() - started_at >= authorization.expires_in {
                return Err(SsoManagerError::AuthorizationTimeout {
                    expires_in: authorization.expires_in.num_seconds(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use url::Url;

    use super::*;
    use crate::testing::{recording_prompt, registered_session, FakeOidc, ManualClock};

    const START_URL: &str = "https://example.awsapps.com/start";

    fn flow<'a, V>(oidc: &'a FakeOidc, clock: &'a ManualClock, prompt: &'a V) -> DeviceFlow<'a, V> {
        DeviceFlow {
            oidc,
            clock,
            verification_prompt: prompt,
            start_url: START_URL.to_string(),
        }
    }

    #[tokio::test]
    async fn registered_sessions_are_left_alone() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default();
        let (prompt, prompted) = recording_prompt();
        let session = registered_session(&clock);

        let result = flow(&oidc, &clock, &prompt)
            .ensure_registered(session.clone())
            .await
            .unwrap();

        assert_eq!(result, session);
        assert_eq!(oidc.registrations(), 0);
        assert!(prompted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn registers_and_authorizes_new_sessions() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default()
            .then_token(Err(TokenError::AuthorizationPending))
            .then_token(Err(TokenError::InvalidClient));
        let (prompt, prompted) = recording_prompt();

        let session = flow(&oidc, &clock, &prompt)
            .ensure_registered(IdentitySession::default())
            .await
            .unwrap();

        assert_eq!(oidc.registrations(), 1);
        assert_eq!(session.client_id(), Some("client-1"));
        assert_eq!(session.device_code(), Some("device-code-1"));
        assert_eq!(session.access_token(), Some("access-token-1"));
        assert_eq!(oidc.start_urls(), vec![START_URL.to_string()]);
        assert_eq!(
            *prompted.lock().unwrap(),
            vec![Url::parse("https://device.sso.example.com/?user_code=CODE-1").unwrap()]
        );
        // two transient failures, each followed by a one second wait
        assert_eq!(clock.elapsed(), ChronoDuration::seconds(2));
    }

    #[tokio::test]
    async fn expired_registrations_are_renewed() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default();
        let (prompt, _) = recording_prompt();
        let session = registered_session(&clock);
        clock.advance(ChronoDuration::days(91));

        let session = flow(&oidc, &clock, &prompt)
            .ensure_registered(session)
            .await
            .unwrap();

        assert_eq!(oidc.registrations(), 1);
        assert_eq!(session.client_id(), Some("client-1"));
    }

    #[tokio::test]
    async fn times_out_when_the_user_never_approves() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default()
            .always_pending()
            .with_device_expiry(ChronoDuration::seconds(600));
        let (prompt, _) = recording_prompt();
        let started_at = clock.now();

        let error = flow(&oidc, &clock, &prompt)
            .start_authorization(registered_session(&clock))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SsoManagerError::AuthorizationTimeout { expires_in: 600 }
        ));
        let elapsed = clock.now() - started_at;
        assert!(elapsed >= ChronoDuration::seconds(600), "timed out early: {elapsed}");
        assert!(elapsed < ChronoDuration::seconds(602));
        assert_eq!(oidc.token_requests().len(), 600);
    }

    #[tokio::test]
    async fn slow_down_backs_off() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default().then_token(Err(TokenError::SlowDown));
        let (prompt, _) = recording_prompt();

        flow(&oidc, &clock, &prompt)
            .start_authorization(registered_session(&clock))
            .await
            .unwrap();

        assert_eq!(clock.elapsed(), ChronoDuration::seconds(6));
    }

    #[tokio::test]
    async fn hard_token_failures_propagate() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default().then_token(Err(TokenError::InvalidGrant));
        let (prompt, _) = recording_prompt();

        let error = flow(&oidc, &clock, &prompt)
            .start_authorization(registered_session(&clock))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SsoManagerError::Token(TokenError::InvalidGrant)
        ));
    }

    #[tokio::test]
    async fn registration_failures_are_fatal() {
        let clock = ManualClock::default();
        let oidc = FakeOidc::default().failing_registration();
        let (prompt, prompted) = recording_prompt();

        let error = flow(&oidc, &clock, &prompt)
            .ensure_registered(IdentitySession::default())
            .await
            .unwrap_err();

        assert!(matches!(error, SsoManagerError::Registration(_)));
        assert!(prompted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn prompt_failures_are_reported() {
        #[derive(Debug, thiserror::Error)]
        #[error("no browser")]
        struct NoBrowser;

        let clock = ManualClock::default();
        let oidc = FakeOidc::default();
        let prompt = |_url: Url| async move { Err::<(), _>(NoBrowser) };

        let error = flow(&oidc, &clock, &prompt)
            .start_authorization(registered_session(&clock))
            .await
            .unwrap_err();

        assert!(matches!(error, SsoManagerError::VerificationPrompt(NoBrowser)));
    }
}
