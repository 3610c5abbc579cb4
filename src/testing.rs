//! Deterministic fakes for driving the refresh engine in tests.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use url::Url;

use crate::{
    clock::Clock,
    credentials::RoleCredential,
    discovery::{AccountInfo, Role},
    session::IdentitySession,
    sso::{IssuedCredentials, Page, SsoApi, SsoError},
    sso_oidc::{
        ClientRegistration, CreateTokenRequest, DeviceAuthorization, IssuedToken, OidcApi,
        SsoApiError, TokenError,
    },
    VerificationPrompt,
};

pub(crate) const LOGIN_ACCOUNT: &str = "111111111111";

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// A clock that only moves when slept on or advanced.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(epoch()),
            sleeps: Mutex::default(),
        }
    }
}

impl ManualClock {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub(crate) fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }

    pub(crate) fn elapsed(&self) -> ChronoDuration {
        self.now() - epoch()
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        ManualClock::now(self)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(ChronoDuration::from_std(duration).unwrap());
    }
}

#[derive(Default)]
struct OidcState {
    registrations: usize,
    authorizations: usize,
    tokens: usize,
    start_urls: Vec<String>,
    token_requests: Vec<CreateTokenRequest>,
    script: VecDeque<Result<(), TokenError>>,
}

/// A scriptable SSO OIDC endpoint.
///
/// Registrations, device codes and tokens are numbered from 1 in the order they're issued.
/// `CreateToken` succeeds unless an outcome has been queued with [`then_token`](Self::then_token)
/// or the fake is [`always_pending`](Self::always_pending).
pub(crate) struct FakeOidc {
    state: Mutex<OidcState>,
    always_pending: bool,
    failing_registration: bool,
    device_expiry: ChronoDuration,
}

impl Default for FakeOidc {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            always_pending: false,
            failing_registration: false,
            device_expiry: ChronoDuration::seconds(600),
        }
    }
}

impl FakeOidc {
    pub(crate) fn then_token(self, outcome: Result<(), TokenError>) -> Self {
        self.state.lock().unwrap().script.push_back(outcome);
        self
    }

    pub(crate) fn always_pending(self) -> Self {
        Self {
            always_pending: true,
            ..self
        }
    }

    pub(crate) fn with_device_expiry(self, device_expiry: ChronoDuration) -> Self {
        Self {
            device_expiry,
            ..self
        }
    }

    pub(crate) fn failing_registration(self) -> Self {
        Self {
            failing_registration: true,
            ..self
        }
    }

    pub(crate) fn registrations(&self) -> usize {
        self.state.lock().unwrap().registrations
    }

    pub(crate) fn start_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().start_urls.clone()
    }

    pub(crate) fn token_requests(&self) -> Vec<CreateTokenRequest> {
        self.state.lock().unwrap().token_requests.clone()
    }
}

#[async_trait]
impl OidcApi for FakeOidc {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration, SsoApiError> {
        assert!(!client_name.is_empty());
        if self.failing_registration {
            return Err(SsoApiError::new("registration refused"));
        }
        let mut state = self.state.lock().unwrap();
        state.registrations += 1;
        Ok(ClientRegistration {
            client_id: format!("client-{}", state.registrations),
            client_secret: format!("client-secret-{}", state.registrations),
            client_secret_expires_at: epoch() + ChronoDuration::days(90),
        })
    }

    async fn start_device_authorization(
        &self,
        _client_id: &str,
        _client_secret: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, SsoApiError> {
        let mut state = self.state.lock().unwrap();
        state.authorizations += 1;
        state.start_urls.push(start_url.to_string());
        let n = state.authorizations;
        Ok(DeviceAuthorization {
            device_code: format!("device-code-{n}"),
            user_code: format!("CODE-{n}"),
            verification_uri_complete: Url::parse(&format!(
                "https://device.sso.example.com/?user_code=CODE-{n}"
            ))
            .unwrap(),
            expires_in: self.device_expiry,
        })
    }

    async fn create_token(&self, request: &CreateTokenRequest) -> Result<IssuedToken, TokenError> {
        let mut state = self.state.lock().unwrap();
        state.token_requests.push(request.clone());
        match state.script.pop_front() {
            Some(Err(error)) => return Err(error),
            None if self.always_pending => return Err(TokenError::AuthorizationPending),
            Some(Ok(())) | None => {}
        }
        state.tokens += 1;
        Ok(IssuedToken {
            access_token: format!("access-token-{}", state.tokens),
            expires_in: ChronoDuration::hours(8),
        })
    }
}

/// A scriptable SSO portal serving a fixed set of accounts and roles.
///
/// Pages are split by [`with_page_size`](Self::with_page_size) and next tokens are plain
/// offsets. [`unauthorized_for`](Self::unauthorized_for) rejects the next `n` calls of any
/// kind, and [`unauthorized_credentials_for`](Self::unauthorized_credentials_for) only the next
/// `n` `GetRoleCredentials` calls.
#[derive(Default)]
pub(crate) struct FakeSso {
    accounts: Vec<(AccountInfo, Vec<String>)>,
    page_size: Option<usize>,
    unauthorized: Mutex<u32>,
    unauthorized_credentials: Mutex<u32>,
    failing_roles: HashSet<Role>,
    failing_listing: bool,
    calls: Mutex<HashMap<&'static str, usize>>,
    tokens_seen: Mutex<BTreeSet<String>>,
}

impl FakeSso {
    pub(crate) fn with_account(mut self, account: AccountInfo, roles: &[&str]) -> Self {
        self.accounts
            .push((account, roles.iter().map(ToString::to_string).collect()));
        self
    }

    pub(crate) fn with_page_size(self, page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..self
        }
    }

    pub(crate) fn unauthorized_for(self, calls: u32) -> Self {
        *self.unauthorized.lock().unwrap() = calls;
        self
    }

    pub(crate) fn unauthorized_credentials_for(self, calls: u32) -> Self {
        *self.unauthorized_credentials.lock().unwrap() = calls;
        self
    }

    pub(crate) fn failing_role(mut self, account_id: &str, role_name: &str) -> Self {
        self.failing_roles.insert(Role {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
        });
        self
    }

    pub(crate) fn failing_listing(self) -> Self {
        Self {
            failing_listing: true,
            ..self
        }
    }

    pub(crate) fn calls(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().iter().cloned().collect()
    }

    fn call(&self, operation: &'static str, access_token: &str) -> Result<(), SsoError> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        self.tokens_seen
            .lock()
            .unwrap()
            .insert(access_token.to_string());

        let mut unauthorized = self.unauthorized.lock().unwrap();
        if *unauthorized > 0 {
            *unauthorized -= 1;
            return Err(SsoError::Unauthorized);
        }
        Ok(())
    }

    fn page<T: Clone>(&self, items: &[T], next_token: Option<String>) -> Page<T> {
        let start: usize = next_token.map_or(0, |token| token.parse().unwrap());
        let end = self
            .page_size
            .map_or(items.len(), |size| (start + size).min(items.len()));
        Page {
            items: items[start..end].to_vec(),
            next_token: (end < items.len()).then(|| end.to_string()),
        }
    }
}

#[async_trait]
impl SsoApi for FakeSso {
    async fn list_accounts(
        &self,
        access_token: &str,
        next_token: Option<String>,
    ) -> Result<Page<AccountInfo>, SsoError> {
        self.call("list_accounts", access_token)?;
        if self.failing_listing {
            return Err(SsoError::Api("ListAccounts is unavailable".to_string()));
        }
        let accounts: Vec<_> = self.accounts.iter().map(|(a, _)| a.clone()).collect();
        Ok(self.page(&accounts, next_token))
    }

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<Role>, SsoError> {
        self.call("list_account_roles", access_token)?;
        let roles: Vec<_> = self
            .accounts
            .iter()
            .filter(|(account, _)| account.account_id == account_id)
            .flat_map(|(_, roles)| roles)
            .map(|role_name| Role {
                account_id: account_id.to_string(),
                role_name: role_name.clone(),
            })
            .collect();
        Ok(self.page(&roles, next_token))
    }

    async fn get_role_credentials(
        &self,
        access_token: &str,
        role: &Role,
    ) -> Result<IssuedCredentials, SsoError> {
        self.call("get_role_credentials", access_token)?;
        {
            let mut unauthorized = self.unauthorized_credentials.lock().unwrap();
            if *unauthorized > 0 {
                *unauthorized -= 1;
                return Err(SsoError::Unauthorized);
            }
        }
        if self.failing_roles.contains(role) {
            return Err(SsoError::Api(format!(
                "no credentials for {}",
                role.role_name
            )));
        }
        Ok(IssuedCredentials {
            access_key_id: format!("AKIA{}{}", role.account_id, role.role_name),
            secret_access_key: format!("secret-{}-{}", role.account_id, role.role_name),
            session_token: format!("session-{}-{}", role.account_id, role.role_name),
            expires_at: Some(epoch() + ChronoDuration::hours(1)),
        })
    }
}

pub(crate) fn account(account_id: &str) -> AccountInfo {
    AccountInfo {
        account_id: account_id.to_string(),
        account_name: format!("account-{account_id}"),
        email: Some(format!("{account_id}@example.com")),
    }
}

pub(crate) fn credential(account_id: &str, role_name: &str) -> RoleCredential {
    RoleCredential {
        access_key_id: format!("AKIA{account_id}{role_name}"),
        secret_access_key: format!("secret-{account_id}-{role_name}"),
        session_token: format!("session-{account_id}-{role_name}"),
        role_name: role_name.to_string(),
        account_id: account_id.to_string(),
        account_name: format!("account-{account_id}"),
        account_email: Some(format!("{account_id}@example.com")),
        issued_at: epoch(),
        expires_at: Some(epoch() + ChronoDuration::hours(1)),
    }
}

/// A session with a registered client and device code, but no token.
pub(crate) fn registered_session(clock: &ManualClock) -> IdentitySession {
    IdentitySession::default()
        .with_registration(ClientRegistration {
            client_id: "client-0".to_string(),
            client_secret: "client-secret-0".to_string(),
            client_secret_expires_at: clock.now() + ChronoDuration::days(90),
        })
        .with_device_code("device-code-0".to_string())
}

/// A prompt that records every URL it's given.
pub(crate) fn recording_prompt() -> (
    impl VerificationPrompt<Error = Infallible>,
    Arc<Mutex<Vec<Url>>>,
) {
    let prompted = Arc::new(Mutex::new(Vec::new()));
    let prompt = {
        let prompted = prompted.clone();
        move |url: Url| {
            prompted.lock().unwrap().push(url);
            async { Ok::<_, Infallible>(()) }
        }
    };
    (prompt, prompted)
}
