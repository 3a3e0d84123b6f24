use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::credential::TokenCredential;
use crate::error::CredentialError;
use crate::token::AccessToken;

/// Tokens closer than this to expiry are refreshed before use.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, CredentialError>>>;

/// Normalized scope set: sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey(Vec<String>);

impl ScopeKey {
    fn new(scopes: &[&str]) -> Self {
        let mut scopes: Vec<String> = scopes.iter().map(|s| (*s).to_owned()).collect();
        scopes.sort_unstable();
        scopes.dedup();
        Self(scopes)
    }
}

#[derive(Default)]
struct SlotState {
    token: Option<AccessToken>,
    in_flight: Option<RefreshFuture>,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

/// Caching, coalescing front for a [`TokenCredential`].
///
/// Tokens are cached per scope set. While a refresh for a scope set is in
/// flight, every caller for that set awaits the same refresh; callers for
/// other scope sets are not blocked. A failed refresh leaves the cached
/// token in place and is delivered to every caller awaiting it.
///
/// Cloning is cheap and shares the cache.
#[derive(Clone)]
pub struct CredentialResolver {
    credential: Arc<dyn TokenCredential>,
    slots: Arc<DashMap<ScopeKey, Arc<Slot>>>,
    refresh_margin: Duration,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            credential,
            slots: Arc::new(DashMap::new()),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    /// Refresh tokens that expire within `margin` (default 5 minutes).
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    #[must_use]
    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    /// Cached token for `scopes`, or a fresh one.
    ///
    /// # Errors
    /// Returns the error of the refresh this call awaited.
    pub async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let key = ScopeKey::new(scopes);
        let slot = self.slot(&key);

        let refresh = {
            let mut state = slot.state.lock();
            if let Some(token) = &state.token
                && !token.expires_within(self.refresh_margin)
            {
                return Ok(token.clone());
            }
            match &state.in_flight {
                Some(refresh) => refresh.clone(),
                None => {
                    let refresh = self.start_refresh(key.clone());
                    state.in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = refresh.clone().await;

        let mut state = slot.state.lock();
        // first waiter to finish settles the slot
        if state
            .in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&refresh))
        {
            state.in_flight = None;
            match &result {
                Ok(token) => state.token = Some(token.clone()),
                Err(err) => {
                    tracing::warn!(scopes = ?key.0, error = %err, "Token refresh failed");
                }
            }
        }
        result
    }

    /// Cached token for `scopes` that has not yet expired, without refreshing.
    #[must_use]
    pub fn cached(&self, scopes: &[&str]) -> Option<AccessToken> {
        let slot = self.slots.get(&ScopeKey::new(scopes))?.clone();
        let state = slot.state.lock();
        state.token.as_ref().filter(|t| !t.is_expired()).cloned()
    }

    /// Drop the cached token for `scopes`; the next call refreshes.
    pub fn invalidate(&self, scopes: &[&str]) {
        if let Some(slot) = self.slots.get(&ScopeKey::new(scopes)) {
            slot.state.lock().token = None;
            tracing::debug!(scopes = ?scopes, "Cached token invalidated");
        }
    }

    fn slot(&self, key: &ScopeKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }
        self.slots.entry(key.clone()).or_default().clone()
    }

    fn start_refresh(&self, key: ScopeKey) -> RefreshFuture {
        let credential = self.credential.clone();
        async move {
            tracing::debug!(scopes = ?key.0, "Refreshing token");
            let scopes: Vec<&str> = key.0.iter().map(String::as_str).collect();
            credential.get_token(&scopes).await
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("credential", &self.credential)
            .field("scope_sets", &self.slots.len())
            .field("refresh_margin", &self.refresh_margin)
            .finish()
    }
}
