use chrono::Duration;

use crate::{
    clock::Clock,
    session::IdentitySession,
    sso_oidc::{OidcApi, TokenError},
};

/// Exchange the session's device code for an access token.
///
/// The token is recorded as expiring one second before the server says it does, so it is never
/// used right at the edge of its lifetime. A session without a device code can't be exchanged
/// and is reported as [`TokenError::InvalidGrant`], which restarts device authorization.
pub(crate) async fn issue_token(
    oidc: &dyn OidcApi,
    clock: &dyn Clock,
    session: &IdentitySession,
) -> Result<IdentitySession, TokenError> {
    let request = session
        .create_token_request()
        .ok_or(TokenError::InvalidGrant)?;

    let token = oidc.create_token(&request).await?;
    let expires_at = clock.now() + token.expires_in - Duration::seconds(1);

    Ok(session.clone().with_token(token.access_token, expires_at))
}
