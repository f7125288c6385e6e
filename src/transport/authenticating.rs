//! Bearer-authenticating HTTP sender
//!
//! [`AuthenticatingTransport`] wraps another [`HttpSend`] and attaches
//! `Authorization: Bearer <token>` to every request. Tokens come, in order,
//! from the auto-refresh source, the in-memory token, the credential store,
//! and finally a new authorization run by the [`Authorizer`].
//!
//! Authorization is single-flight: when many requests find no usable token
//! at once, one of them runs the flow and the rest wait for its outcome,
//! success or error. A caller arriving after a failed run starts a new one.
//! Cancellation stays settled until [`invalidate`] is called, which a `401`
//! from the resource server does before retrying the request once.
//!
//! [`invalidate`]: AuthenticatingTransport::invalidate

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::{Request, Response, StatusCode};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::auth::authorizer::Authorizer;
use crate::auth::refresh::TokenSource;
use crate::auth::store::CredentialStore;
use crate::auth::token::Token;
use crate::error::{AuthError, Result};
use crate::transport::{inject_bearer, HttpSend};

enum Phase {
    Idle,
    Running,
    Settled(std::result::Result<Token, AuthError>),
}

struct State {
    token: Option<Token>,
    source: Option<Arc<dyn TokenSource>>,
    phase: Phase,
    /// Number of the latest authorization run.
    flight: u64,
    /// Outcome of the run before `flight`, kept for its late-waking waiters.
    previous: Option<(u64, std::result::Result<Token, AuthError>)>,
}

impl State {
    /// The outcome a waiter of run `flight` should receive, if it has settled.
    fn outcome_of(&self, flight: u64) -> Option<std::result::Result<Token, AuthError>> {
        match (&self.phase, &self.previous) {
            (Phase::Settled(outcome), _) if self.flight == flight => Some(outcome.clone()),
            (_, Some((previous, outcome))) if *previous == flight => Some(outcome.clone()),
            _ => None,
        }
    }
}

enum Step<'a> {
    Wait(Notified<'a>, u64),
    Lead(Option<Token>),
}

/// HTTP sender that authenticates requests with OAuth bearer tokens.
pub struct AuthenticatingTransport<S> {
    inner: S,
    authorizer: Arc<dyn Authorizer>,
    store: Option<CredentialStore>,
    resource_uri: String,
    cancel: CancellationToken,
    state: Mutex<State>,
    settled: Notify,
}

impl<S: HttpSend> AuthenticatingTransport<S> {
    /// Creates a transport for `resource_uri`.
    ///
    /// Pass `store: None` to keep tokens in memory only.
    pub fn new(
        inner: S,
        authorizer: Arc<dyn Authorizer>,
        resource_uri: impl Into<String>,
        store: Option<CredentialStore>,
    ) -> Self {
        Self {
            inner,
            authorizer,
            store,
            resource_uri: resource_uri.into(),
            cancel: CancellationToken::new(),
            state: Mutex::new(State {
                token: None,
                source: None,
                phase: Phase::Idle,
                flight: 0,
                previous: None,
            }),
            settled: Notify::new(),
        }
    }

    /// Uses `cancel` to abort authorizations started by [`HttpSend::send`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The protected resource this transport authenticates against.
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    /// Returns a usable token, authorizing if necessary.
    ///
    /// # Errors
    ///
    /// Returns the outcome of the authorization run when one was needed.
    /// Callers waiting on the same run all receive the same error.
    /// [`AuthError::Cancelled`] is returned when `cancel` fires while this
    /// caller leads the run, and to every caller after it until
    /// [`invalidate`](Self::invalidate).
    pub async fn get_valid_token(&self, cancel: &CancellationToken) -> Result<Token> {
        let source = self.lock_state().source.clone();
        if let Some(source) = source {
            match source.token().await {
                Ok(token) => {
                    let changed = {
                        let mut state = self.lock_state();
                        let changed = state
                            .token
                            .as_ref()
                            .map_or(true, |current| token.differs_from(current));
                        state.token = Some(token.clone());
                        changed
                    };
                    if changed {
                        self.persist(&token);
                    }
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!("Token source failed, re-authorizing: {:#}", e);
                    self.lock_state().source = None;
                }
            }
        }

        if let Some(token) = self.lock_state().token.clone().filter(Token::is_valid) {
            return Ok(token);
        }

        if let Some(stored) = self.store.as_ref().and_then(|s| s.load_token(&self.resource_uri)) {
            let mut state = self.lock_state();
            if stored.is_valid() {
                tracing::debug!(resource = %self.resource_uri, "Using cached token");
                state.token = Some(stored.clone());
                return Ok(stored);
            }
            if state.token.is_none() {
                state.token = Some(stored);
            }
        }

        self.authorize_once(cancel).await
    }

    /// Forgets the current token and source, settles the single-flight back
    /// to idle, and deletes the cached token.
    pub fn invalidate(&self) {
        {
            let mut state = self.lock_state();
            state.token = None;
            state.source = None;
            if !matches!(state.phase, Phase::Running) {
                state.phase = Phase::Idle;
            }
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_token(&self.resource_uri) {
                tracing::warn!("Failed to delete cached token: {}", e);
            }
        }
    }

    async fn authorize_once(&self, cancel: &CancellationToken) -> Result<Token> {
        let mut waited: Option<u64> = None;
        loop {
            let step = {
                let mut state = self.lock_state();
                if let Some(outcome) = waited.and_then(|flight| state.outcome_of(flight)) {
                    return outcome.map_err(Into::into);
                }
                let running = match &state.phase {
                    Phase::Settled(Ok(token)) if token.is_valid() => return Ok(token.clone()),
                    Phase::Settled(Err(AuthError::Cancelled)) => return Err(AuthError::Cancelled.into()),
                    Phase::Running => true,
                    Phase::Idle | Phase::Settled(_) => false,
                };
                if running {
                    Step::Wait(self.settled.notified(), state.flight)
                } else {
                    let last = std::mem::replace(&mut state.phase, Phase::Running);
                    let flight = state.flight;
                    state.previous = match last {
                        Phase::Settled(outcome) => Some((flight, outcome)),
                        _ => None,
                    };
                    state.flight += 1;
                    Step::Lead(state.token.clone())
                }
            };

            match step {
                Step::Wait(notified, flight) => {
                    notified.await;
                    waited = Some(flight);
                }
                Step::Lead(previous) => return self.lead(previous, cancel).await,
            }
        }
    }

    async fn lead(&self, previous: Option<Token>, cancel: &CancellationToken) -> Result<Token> {
        let mut guard = FlightGuard {
            transport: self,
            armed: true,
        };

        tracing::info!(resource = %self.resource_uri, "Authorizing");
        let flight = self.cancel.child_token();
        let outcome = tokio::select! {
            result = self.authorizer.authorize(previous, &flight) => {
                result.map_err(|e| AuthError::from_anyhow(&e))
            }
            _ = cancel.cancelled() => {
                flight.cancel();
                Err(AuthError::Cancelled)
            }
        };

        let source = match &outcome {
            Ok(token) => {
                self.persist(token);
                self.authorizer.token_source(token.clone()).await
            }
            Err(_) => None,
        };

        {
            let mut state = self.lock_state();
            if let Ok(token) = &outcome {
                state.token = Some(token.clone());
                state.source = source;
            }
            state.phase = Phase::Settled(outcome.clone());
        }
        guard.armed = false;
        self.settled.notify_waiters();

        outcome.map_err(Into::into)
    }

    fn persist(&self, token: &Token) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_token(&self.resource_uri, token) {
                tracing::warn!("Failed to cache token: {}", e);
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_authorized(&self, mut request: Request) -> Result<Response> {
        let token = self.get_valid_token(&self.cancel).await?;
        inject_bearer(request.headers_mut(), &token.access_token)?;
        self.inner.send(request).await
    }
}

/// Returns the single-flight to idle if the leading future is dropped
/// before it settles, so waiters can take over.
struct FlightGuard<'a, S> {
    transport: &'a AuthenticatingTransport<S>,
    armed: bool,
}

impl<S> Drop for FlightGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self
                .transport
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if matches!(state.phase, Phase::Running) {
                state.phase = Phase::Idle;
            }
        }
        self.transport.settled.notify_waiters();
    }
}

#[async_trait]
impl<S: HttpSend> HttpSend for AuthenticatingTransport<S> {
    async fn send(&self, request: Request) -> Result<Response> {
        let replay = request.try_clone();
        let response = self.send_authorized(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(resource = %self.resource_uri, "Resource rejected the token; re-authorizing");
        self.invalidate();
        match replay {
            Some(retry) => self.send_authorized(retry).await,
            None => {
                tracing::warn!("Request body cannot be replayed; returning the 401 response");
                Ok(response)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
