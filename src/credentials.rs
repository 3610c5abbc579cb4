use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use tracing::warn;

/// The profile key under which the `"default"` alias is written.
pub const DEFAULT_PROFILE: &str = "default";

/// Temporary AWS credentials for one role in one account.
///
/// The fields of this struct are obviously pretty sensitive, and should be handled with care.
/// The secret and session token are not printed in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct RoleCredential {
    /// The access key ID.
    pub access_key_id: String,

    /// The secret access key.
    pub secret_access_key: String,

    /// The session token.
    pub session_token: String,

    /// The SSO role the credentials were issued for.
    pub role_name: String,

    /// The account the credentials were issued in.
    pub account_id: String,

    /// The display name of the account.
    pub account_name: String,

    /// The account's contact email, if SSO reported one.
    pub account_email: Option<String>,

    /// When the credentials were fetched.
    pub issued_at: DateTime<Utc>,

    /// When SSO says the credentials expire.
    ///
    /// This is informational only; credentials are re-fetched on every refresh regardless.
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleCredential {
    /// The `{account_id}_{role_name}` profile key for these credentials.
    #[must_use]
    pub fn profile_key(&self) -> String {
        role_profile_key(&self.account_id, &self.role_name)
    }
}

impl fmt::Debug for RoleCredential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RoleCredential")
            .field("access_key_id", &self.access_key_id)
            .field("role_name", &self.role_name)
            .field("account_id", &self.account_id)
            .field("account_name", &self.account_name)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// The composite profile key written for every discovered role.
#[must_use]
pub fn role_profile_key(account_id: &str, role_name: &str) -> String {
    format!("{account_id}_{role_name}")
}

/// Credentials computed in one refresh.
///
/// Role credentials are keyed by their `{account_id}_{role_name}` composite, and each account's
/// canonical credentials are kept separately by account id. The profile names written to the
/// credentials file are derived from both by [`profiles`](Self::profiles).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialSet {
    accounts: BTreeSet<String>,
    roles: BTreeMap<String, RoleCredential>,
    canonical: BTreeMap<String, RoleCredential>,
}

impl CredentialSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set for the given discovered accounts.
    ///
    /// Account names that match one of these ids are never used as profile names.
    #[must_use]
    pub fn with_accounts<I, S>(account_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accounts: account_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add the credentials for a role under its composite profile key.
    pub fn insert_role(&mut self, credential: RoleCredential) {
        self.accounts.insert(credential.account_id.clone());
        self.roles.insert(credential.profile_key(), credential);
    }

    /// Make `credential` the canonical profile for its account.
    pub(crate) fn install_canonical(&mut self, credential: &RoleCredential) {
        self.accounts.insert(credential.account_id.clone());
        self.canonical
            .insert(credential.account_id.clone(), credential.clone());
    }

    /// Look up the composite profile for a role.
    #[must_use]
    pub fn role(&self, account_id: &str, role_name: &str) -> Option<&RoleCredential> {
        self.roles.get(&role_profile_key(account_id, role_name))
    }

    /// The canonical credentials for an account, if reconciliation resolved one.
    #[must_use]
    pub fn canonical(&self, account_id: &str) -> Option<&RoleCredential> {
        self.canonical.get(account_id)
    }

    /// Look up a profile by the name it would be written under.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RoleCredential> {
        self.resolve(false).get(key).copied()
    }

    /// Whether a profile named `key` would be written.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The number of profiles that would be written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolve(false).len()
    }

    /// Whether there are no role credentials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.canonical.is_empty()
    }

    /// Every profile to write, keyed by profile name.
    ///
    /// This is each role's composite key, plus the account id and account name of each
    /// account's canonical role. An account name is left out if it is `default`, matches an
    /// account id or composite key, or is shared with another account.
    #[must_use]
    pub fn profiles(&self) -> BTreeMap<String, &RoleCredential> {
        self.resolve(false)
    }

    /// As [`profiles`](Self::profiles), logging each account name that was left out.
    pub(crate) fn profiles_to_write(&self) -> BTreeMap<String, &RoleCredential> {
        self.resolve(true)
    }

    fn resolve(&self, report: bool) -> BTreeMap<String, &RoleCredential> {
        let mut profiles: BTreeMap<String, &RoleCredential> = self
            .roles
            .iter()
            .map(|(key, credential)| (key.clone(), credential))
            .collect();
        for (account_id, credential) in &self.canonical {
            profiles.insert(account_id.clone(), credential);
        }

        let mut named: BTreeMap<&str, usize> = BTreeMap::new();
        for credential in self.canonical.values() {
            *named.entry(credential.account_name.as_str()).or_default() += 1;
        }

        for credential in self.canonical.values() {
            let name = credential.account_name.as_str();
            if name == credential.account_id {
                continue;
            }
            let conflict = if name == DEFAULT_PROFILE {
                Some("the default profile")
            } else if self.accounts.contains(name) {
                Some("another account's id")
            } else if self.roles.contains_key(name) {
                Some("a role profile")
            } else if named.get(name).copied().unwrap_or_default() > 1 {
                Some("another account's name")
            } else {
                None
            };

            match conflict {
                Some(conflict) => {
                    if report {
                        warn!(
                            account_id = %credential.account_id,
                            account_name = name,
                            conflict,
                            "account name clashes with another profile, not writing it"
                        );
                    }
                }
                None => {
                    profiles.insert(name.to_string(), credential);
                }
            }
        }
        profiles
    }
}
