use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    credentials::{role_profile_key, CredentialSet},
    discovery::{Accounts, Role},
};

/// An ordering of role names used to pick each account's canonical credentials.
///
/// Earlier entries outrank later ones, and any listed role outranks an unlisted one. Unlisted
/// roles are all equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RolePriority {
    roles: Vec<String>,
}

impl RolePriority {
    /// Construct a priority list, highest priority first.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// The listed roles, highest priority first.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// The rank of `role_name`: higher ranks win.
    ///
    /// The first listed role ranks `len`, the last ranks `1`, and an unlisted role ranks `-1`.
    #[must_use]
    pub fn rank(&self, role_name: &str) -> i64 {
        self.roles
            .iter()
            .position(|role| role == role_name)
            .map_or(-1, |index| {
                i64::try_from(self.roles.len() - index).unwrap_or(i64::MAX)
            })
    }

    /// Compare two roles; `Greater` means `left` outranks `right`.
    #[must_use]
    pub fn compare(&self, left: &str, right: &str) -> Ordering {
        self.rank(left).cmp(&self.rank(right))
    }
}

impl CredentialSet {
    /// Consider `role` as the canonical profile for its account.
    ///
    /// The role's credentials become canonical if its account has no canonical profile yet, or
    /// if it strictly outranks the current canonical role. Ties keep the existing profile. A
    /// role without fetched credentials is logged and skipped.
    pub fn reconcile(&mut self, accounts: &Accounts, priority: &RolePriority, role: &Role) {
        let Some(candidate) = self.role(&role.account_id, &role.role_name) else {
            error!(
                profile = %role_profile_key(&role.account_id, &role.role_name),
                "could not update credentials for profile"
            );
            return;
        };

        if !accounts.contains_key(&role.account_id) {
            error!(account_id = %role.account_id, "role belongs to an undiscovered account");
            return;
        }

        let replace = match self.canonical(&role.account_id) {
            None => true,
            Some(current) => {
                priority.compare(&role.role_name, &current.role_name) == Ordering::Greater
            }
        };

        if replace {
            debug!(
                account_id = %role.account_id,
                role_name = %role.role_name,
                "selected canonical role"
            );
            let candidate = candidate.clone();
            self.install_canonical(&candidate);
        }
    }
}
