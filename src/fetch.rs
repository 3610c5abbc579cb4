use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use tracing::{debug, error};

use crate::{
    credentials::{CredentialSet, RoleCredential},
    discovery::{Accounts, Role},
    sso::{IssuedCredentials, SsoApi, SsoError},
};

/// The outcome of fetching credentials for a batch of roles.
#[derive(Debug, Default)]
pub(crate) struct FetchReport {
    pub(crate) credentials: CredentialSet,
    pub(crate) failures: Vec<(Role, SsoError)>,
}

impl FetchReport {
    /// Whether any role was rejected because the access token is unauthorized.
    pub(crate) fn unauthorized(&self) -> bool {
        self.failures
            .iter()
            .any(|(_, error)| matches!(error, SsoError::Unauthorized))
    }
}

/// Fetch credentials for every role, with at most `concurrency` requests outstanding.
///
/// Each request resolves independently and the results are folded into the report once the
/// whole batch has completed. A failed role is recorded in `failures` and doesn't affect the
/// others.
pub(crate) async fn fetch_all(
    sso: &dyn SsoApi,
    access_token: &str,
    roles: &[Role],
    accounts: &Accounts,
    concurrency: usize,
    issued_at: DateTime<Utc>,
) -> FetchReport {
    let results: Vec<_> = stream::iter(roles)
        .map(|role| async move { (role, sso.get_role_credentials(access_token, role).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = FetchReport {
        credentials: CredentialSet::with_accounts(accounts.keys()),
        failures: Vec::new(),
    };
    for (role, result) in results {
        match result.and_then(|issued| role_credential(role, issued, accounts, issued_at)) {
            Ok(credential) => {
                debug!(profile = %credential.profile_key(), "fetched role credentials");
                report.credentials.insert_role(credential);
            }
            Err(error) => {
                error!(
                    account_id = %role.account_id,
                    role_name = %role.role_name,
                    %error,
                    "failed to fetch role credentials"
                );
                report.failures.push((role.clone(), error));
            }
        }
    }
    report
}

fn role_credential(
    role: &Role,
    issued: IssuedCredentials,
    accounts: &Accounts,
    issued_at: DateTime<Utc>,
) -> Result<RoleCredential, SsoError> {
    let account = accounts.get(&role.account_id).ok_or_else(|| {
        SsoError::Api(format!(
            "role {} belongs to undiscovered account {}",
            role.role_name, role.account_id
        ))
    })?;

    Ok(RoleCredential {
        access_key_id: issued.access_key_id,
        secret_access_key: issued.secret_access_key,
        session_token: issued.session_token,
        role_name: role.role_name.clone(),
        account_id: account.account_id.clone(),
        account_name: account.account_name.clone(),
        account_email: account.email.clone(),
        issued_at,
        expires_at: issued.expires_at,
    })
}
