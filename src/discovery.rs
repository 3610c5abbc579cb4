use std::collections::BTreeMap;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::sso::{SsoApi, SsoError};

/// An AWS account reachable through SSO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    /// The account ID.
    pub account_id: String,

    /// The account's display name.
    pub account_name: String,

    /// The account's contact email.
    pub email: Option<String>,
}

/// A role that can be assumed in an account.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Role {
    /// The account the role belongs to.
    pub account_id: String,

    /// The role's name, as it appears in SSO.
    pub role_name: String,
}

/// Accounts keyed by account ID.
pub type Accounts = BTreeMap<String, AccountInfo>;

/// List every account reachable with `access_token`.
pub(crate) async fn list_accounts(
    sso: &dyn SsoApi,
    access_token: &str,
) -> Result<Accounts, SsoError> {
    let mut accounts = Accounts::new();
    let mut next_token = None;
    loop {
        let page = sso.list_accounts(access_token, next_token).await?;
        for account in page.items {
            info!(account_id = %account.account_id, "found account");
            accounts.insert(account.account_id.clone(), account);
        }
        next_token = page.next_token.filter(|token| !token.is_empty());
        if next_token.is_none() {
            break;
        }
    }
    Ok(accounts)
}

/// List every role in every account, running up to `concurrency` listings at once.
///
/// Roles are returned sorted, so later stages see them in a stable order.
pub(crate) async fn list_roles(
    sso: &dyn SsoApi,
    accounts: &Accounts,
    access_token: &str,
    concurrency: usize,
) -> Result<Vec<Role>, SsoError> {
    let mut roles: Vec<Role> = stream::iter(accounts.keys())
        .map(|account_id| list_account_roles(sso, account_id, access_token))
        .buffer_unordered(concurrency.max(1))
        .try_concat()
        .await?;
    roles.sort();
    debug!(?roles, "found roles");
    Ok(roles)
}

async fn list_account_roles(
    sso: &dyn SsoApi,
    account_id: &str,
    access_token: &str,
) -> Result<Vec<Role>, SsoError> {
    let mut roles = Vec::new();
    let mut next_token = None;
    loop {
        let page = sso
            .list_account_roles(access_token, account_id, next_token)
            .await?;
        roles.extend(page.items);
        next_token = page.next_token.filter(|token| !token.is_empty());
        if next_token.is_none() {
            break;
        }
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, FakeSso};

    #[tokio::test]
    async fn pages_through_accounts() {
        let sso = FakeSso::default()
            .with_account(account("111"), &["AdminRole"])
            .with_account(account("222"), &["ReadOnlyRole"])
            .with_account(account("333"), &[])
            .with_page_size(1);

        let accounts = list_accounts(&sso, "token").await.unwrap();

        assert_eq!(
            accounts.keys().collect::<Vec<_>>(),
            vec!["111", "222", "333"]
        );
        assert_eq!(accounts["222"].account_name, "account-222");
        assert_eq!(sso.calls("list_accounts"), 3);
    }

    #[tokio::test]
    async fn pages_through_roles_for_every_account() {
        let sso = FakeSso::default()
            .with_account(account("111"), &["ReadOnlyRole", "AdminRole", "Billing"])
            .with_account(account("222"), &["ReadOnlyRole"])
            .with_account(account("333"), &[])
            .with_page_size(2);
        let accounts = list_accounts(&sso, "token").await.unwrap();

        let roles = list_roles(&sso, &accounts, "token", 10).await.unwrap();

        let names: Vec<_> = roles
            .iter()
            .map(|role| format!("{}/{}", role.account_id, role.role_name))
            .collect();
        assert_eq!(
            names,
            vec![
                "111/AdminRole",
                "111/Billing",
                "111/ReadOnlyRole",
                "222/ReadOnlyRole"
            ]
        );
        // two pages for 111, one each for 222 and 333
        assert_eq!(sso.calls("list_account_roles"), 4);
    }

    #[tokio::test]
    async fn unauthorized_listing_is_reported() {
        let sso = FakeSso::default()
            .with_account(account("111"), &["AdminRole"])
            .unauthorized_for(1);

        let error = list_accounts(&sso, "token").await.unwrap_err();

        assert!(matches!(error, SsoError::Unauthorized));
    }
}
