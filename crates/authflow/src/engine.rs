//! Base authorization engine
//!
//! [`FlowEngine`] owns the [`ClientConfig`], serializes every mutation of the
//! token pair, and implements the grant-independent operations: refresh,
//! RFC 8693 token exchange, dynamic registration, redirect correlation, and
//! the authorize lifecycle bookkeeping shared by all grants.
//!
//! Concurrency model: the config sits behind a `tokio::sync::RwLock`;
//! rotation-sensitive operations (refresh and both exchanges) additionally
//! serialize on a one-permit semaphore so at most one of them can observe and
//! replace the refresh token at a time. A single `authorize` attempt is
//! enforced through a small lifecycle state machine
//! (`Idle → Authorizing → {Authorized, Failed} → Idle`).

use std::sync::Arc;

use futures::future::{AbortHandle, Abortable};
use tokio::sync::oneshot;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::context::FlowContext;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::registration::ClientRegistrar;
use crate::request::{AuthRequest, RequestPerformer, Response, TokenJson};
use crate::store::TokenStore;

/// RFC 8693 grant type identifier.
const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
/// RFC 8693 token type URN for refresh tokens.
const TOKEN_TYPE_REFRESH: &str = "urn:ietf:params:oauth:token-type:refresh_token";
/// RFC 8693 token type URN for access tokens.
const TOKEN_TYPE_ACCESS: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Completion callback fired on every terminal authorize outcome, in addition
/// to the `Result` returned to the direct caller.
pub type CompletionHandler = Box<dyn Fn(Option<&TokenJson>, Option<&Error>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Authorizing,
}

/// A redirect wait registered by a redirect-based grant: the attempt id is
/// used for log correlation, the sender resolves the suspended `authorize`.
struct PendingRedirect {
    attempt: Uuid,
    tx: oneshot::Sender<Result<TokenJson>>,
}

/// Grant-independent authorization engine.
///
/// One engine instance owns one [`ClientConfig`]. Grant-specific flows wrap
/// an `Arc<FlowEngine>` and delegate everything that is not particular to
/// their RFC grant type.
pub struct FlowEngine {
    config: RwLock<ClientConfig>,
    context: parking_lot::Mutex<FlowContext>,
    performer: Arc<dyn RequestPerformer>,
    store: Option<Arc<dyn TokenStore>>,
    registrar: Option<Arc<dyn ClientRegistrar>>,
    rotation_gate: Semaphore,
    lifecycle: parking_lot::Mutex<Lifecycle>,
    pending_redirect: parking_lot::Mutex<Option<PendingRedirect>>,
    abort_slot: parking_lot::Mutex<Option<AbortHandle>>,
    completion: parking_lot::RwLock<Option<CompletionHandler>>,
}

impl FlowEngine {
    /// Create an engine for `config`, performing requests through `performer`.
    #[must_use]
    pub fn new(config: ClientConfig, performer: Arc<dyn RequestPerformer>) -> Self {
        Self {
            config: RwLock::new(config),
            context: parking_lot::Mutex::new(FlowContext::new()),
            performer,
            store: None,
            registrar: None,
            rotation_gate: Semaphore::new(1),
            lifecycle: parking_lot::Mutex::new(Lifecycle::Idle),
            pending_redirect: parking_lot::Mutex::new(None),
            abort_slot: parking_lot::Mutex::new(None),
            completion: parking_lot::RwLock::new(None),
        }
    }

    /// Attach a persistence backend.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a dynamic-registration collaborator.
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn ClientRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// Install the completion handler fired on every terminal authorize
    /// outcome.
    pub fn set_completion_handler(&self, handler: CompletionHandler) {
        *self.completion.write() = Some(handler);
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> ClientConfig {
        self.config.read().await.clone()
    }

    /// Mutate the configuration before starting a flow.
    pub async fn configure<F: FnOnce(&mut ClientConfig)>(&self, mutate: F) {
        mutate(&mut *self.config.write().await);
    }

    /// Load persisted tokens from the attached store.
    ///
    /// Returns `true` when a token state was restored.
    ///
    /// # Errors
    /// Propagates store backend failures; an empty store is not an error.
    pub async fn initialize(&self) -> Result<bool> {
        let Some(store) = &self.store else { return Ok(false) };
        match store.load_tokens().await? {
            Some(state) => {
                self.config.write().await.restore_token_state(state);
                info!("restored persisted token state");
                Ok(true)
            }
            None => {
                debug!("no persisted tokens found");
                Ok(false)
            }
        }
    }

    /// Whether a non-empty, unexpired access token is held.
    pub async fn has_unexpired_access_token(&self) -> bool {
        self.config.read().await.has_unexpired_access_token()
    }

    /// Drop all held tokens, clearing the store when one is attached.
    pub async fn forget_tokens(&self) {
        self.config.write().await.forget_tokens();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_tokens().await {
                warn!("failed to clear persisted tokens: {e}");
            }
        }
    }

    /// Drop tokens and the (possibly dynamically registered) client
    /// credentials.
    pub async fn forget_client(&self) {
        self.forget_tokens().await;
        let mut config = self.config.write().await;
        config.client_id = None;
        config.client_secret = None;
    }

    // --- authorize lifecycle -------------------------------------------------

    /// Enter the `Authorizing` state.
    ///
    /// # Errors
    /// [`Error::AlreadyAuthorizing`] when a prior `authorize` is in flight.
    pub(crate) fn begin_authorize(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Authorizing {
            return Err(Error::AlreadyAuthorizing);
        }
        *lifecycle = Lifecycle::Authorizing;
        Ok(())
    }

    /// Whether an `authorize` attempt is currently in flight.
    #[must_use]
    pub fn is_authorizing(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Authorizing
    }

    /// Record a terminal outcome: fire the completion handler, reset the
    /// per-flow context, and return to `Idle`.
    ///
    /// Only the first terminal outcome per attempt counts; a late duplicate
    /// (cancelled request racing its own abort) is dropped silently.
    pub(crate) fn finish_authorize(&self, result: &Result<TokenJson>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Idle {
                return;
            }
            *lifecycle = Lifecycle::Idle;
        }
        match result {
            Ok(json) => {
                info!("authorization finished");
                if let Some(handler) = &*self.completion.read() {
                    handler(Some(json), None);
                }
            }
            Err(e) => {
                warn!("authorization failed: {e}");
                if let Some(handler) = &*self.completion.read() {
                    handler(None, Some(e));
                }
            }
        }
        self.context.lock().reset();
    }

    /// Best-effort cancellation of the current authorize attempt: aborts the
    /// in-flight network call (if any), fails a pending redirect wait, and
    /// reports [`Error::RequestCancelled`] through the completion handler.
    ///
    /// Mutations already applied by a completed success path are not rolled
    /// back.
    pub fn abort_authorization(&self) {
        if let Some(handle) = self.abort_slot.lock().take() {
            handle.abort();
        }
        if let Some(pending) = self.pending_redirect.lock().take() {
            debug!(attempt = %pending.attempt, "cancelling pending redirect wait");
            let _ = pending.tx.send(Err(Error::RequestCancelled));
        }
        if self.is_authorizing() {
            self.finish_authorize(&Err(Error::RequestCancelled));
        }
    }

    // --- redirect correlation ------------------------------------------------

    /// Register a redirect wait for the current authorize attempt.
    ///
    /// Each attempt gets its own id and single-shot channel; a redirect that
    /// arrives after the attempt completed finds no pending wait and is
    /// rejected by the flow instead of resuming anything stale.
    pub(crate) fn begin_redirect_wait(&self) -> (Uuid, oneshot::Receiver<Result<TokenJson>>) {
        let attempt = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        *self.pending_redirect.lock() = Some(PendingRedirect { attempt, tx });
        debug!(%attempt, "awaiting redirect");
        (attempt, rx)
    }

    /// Resolve the pending redirect wait, if one exists.
    ///
    /// Returns `false` when no attempt was waiting (stale or duplicate
    /// redirect).
    pub(crate) fn resolve_redirect(&self, result: Result<TokenJson>) -> bool {
        match self.pending_redirect.lock().take() {
            Some(pending) => {
                debug!(attempt = %pending.attempt, "redirect resolved");
                pending.tx.send(result).is_ok()
            }
            None => false,
        }
    }

    /// Access the per-flow CSRF/PKCE context.
    pub(crate) fn context(&self) -> &parking_lot::Mutex<FlowContext> {
        &self.context
    }

    // --- request plumbing ----------------------------------------------------

    /// Execute a request through the injected performer, tracking it in the
    /// single abortable slot.
    pub(crate) async fn perform(&self, request: AuthRequest) -> Result<Response> {
        let (handle, registration) = AbortHandle::new_pair();
        *self.abort_slot.lock() = Some(handle);
        let outcome = Abortable::new(self.performer.perform(request), registration).await;
        *self.abort_slot.lock() = None;
        match outcome {
            Ok(result) => result,
            Err(_aborted) => Err(Error::RequestCancelled),
        }
    }

    /// Build a POST token request with grant type, client credentials
    /// (body or Basic auth per `secret_in_body`), and resource indicators.
    pub(crate) fn build_token_request(
        config: &ClientConfig,
        url: &str,
        grant_type: &str,
        params: RequestParams,
    ) -> AuthRequest {
        let mut body = RequestParams::new();
        body.set("grant_type", grant_type);
        if let Some(client_id) = config.client_id.as_deref().filter(|id| !id.is_empty()) {
            body.set("client_id", client_id);
        }
        let mut basic_auth = None;
        if let Some(secret) = config.client_secret.as_deref() {
            if config.secret_in_body {
                body.set("client_secret", secret);
            } else {
                basic_auth =
                    Some((config.client_id.clone().unwrap_or_default(), secret.to_string()));
            }
        }
        body.merge(&params);
        for resource in &config.resource_uris {
            body.append("resource", resource.clone());
        }

        let mut request = AuthRequest::post(url).with_params(body);
        if let Some((id, secret)) = basic_auth {
            request = request.with_basic_auth(&id, &secret);
        }
        request
    }

    /// Execute a token request and apply the successful response to the
    /// configuration (replacing the token pair atomically and persisting).
    ///
    /// Used by the grants that obtain a token directly; refresh and exchange
    /// go through their gated entry points below.
    pub(crate) async fn obtain_token(&self, request: AuthRequest) -> Result<TokenJson> {
        let response = self.perform(request).await?;
        let json = response.token_json()?;
        crate::request::validate_token_type(&json)?;
        self.apply_and_persist(&json).await;
        Ok(json)
    }

    /// Apply a token response under the write lock, then persist.
    pub(crate) async fn apply_and_persist(&self, json: &TokenJson) {
        let state = {
            let mut config = self.config.write().await;
            config.apply_token_json(json);
            config.token_state()
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.store_tokens(&state).await {
                warn!("failed to persist tokens: {e}");
            }
        }
    }

    // --- refresh -------------------------------------------------------------

    /// Refresh the access token using the held refresh token.
    ///
    /// Serialized on the rotation gate. On HTTP ≥ 400 the held refresh token
    /// is cleared so the next `authorize` runs a full grant.
    ///
    /// # Errors
    /// [`Error::NoClientId`] when the grant mandates one and none is set,
    /// [`Error::NoRefreshToken`] when none is held, plus any server or
    /// transport error.
    pub async fn do_refresh_token(&self, extra: &RequestParams) -> Result<TokenJson> {
        self.do_refresh_token_with(extra, true).await
    }

    pub(crate) async fn do_refresh_token_with(
        &self,
        extra: &RequestParams,
        client_id_mandatory: bool,
    ) -> Result<TokenJson> {
        let _permit = self.acquire_rotation_gate().await?;

        let request = {
            let config = self.config.read().await;
            if client_id_mandatory {
                config.require_client_id()?;
            }
            let refresh_token = config
                .refresh_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or(Error::NoRefreshToken)?;

            let mut params = RequestParams::new();
            params.set("refresh_token", refresh_token);
            params.merge(extra);
            Self::build_token_request(
                &config,
                config.effective_refresh_url(),
                "refresh_token",
                params,
            )
        };

        debug!("refreshing access token");
        let response = self.perform(request).await?;
        if response.status() >= 400 {
            let err = response.token_json().err().unwrap_or(Error::NoDataInResponse);
            warn!(status = response.status(), "refresh rejected, dropping refresh token");
            self.config.write().await.refresh_token = None;
            return Err(err);
        }

        let json = response.token_json()?;
        crate::request::validate_token_type(&json)?;
        self.apply_and_persist(&json).await;
        info!("access token refreshed");
        Ok(json)
    }

    // --- RFC 8693 token exchange ---------------------------------------------

    /// Exchange the held refresh token for one scoped to another audience.
    ///
    /// The exchanged token is returned from the response's `access_token`
    /// field (the RFC 8693 §2.2.1 naming) without touching this engine's own
    /// access token; the engine's refresh token is replaced when the server
    /// rotated it.
    ///
    /// # Errors
    /// [`Error::NoClientId`] / [`Error::NoRefreshToken`] preconditions, plus
    /// any server or transport error.
    pub async fn do_exchange_refresh_token(
        &self,
        audience_client_id: &str,
        trace_id: Option<&str>,
        extra: &RequestParams,
    ) -> Result<String> {
        let _permit = self.acquire_rotation_gate().await?;

        let request = {
            let config = self.config.read().await;
            config.require_client_id()?;
            let refresh_token = config
                .refresh_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or(Error::NoRefreshToken)?;

            let mut params = RequestParams::new();
            params.set("subject_token", refresh_token);
            params.set("subject_token_type", TOKEN_TYPE_REFRESH);
            params.set("requested_token_type", TOKEN_TYPE_REFRESH);
            params.set("audience", audience_client_id);
            if let Some(trace) = trace_id {
                params.set("trace_id", trace);
            }
            params.merge(extra);
            Self::build_token_request(
                &config,
                config.effective_token_url(),
                GRANT_TYPE_TOKEN_EXCHANGE,
                params,
            )
        };

        debug!(audience = audience_client_id, "exchanging refresh token");
        let json = self.perform(request).await?.token_json()?;

        let exchanged = json
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::Generic("token exchange response carried no token".into()))?;

        if let Some(rotated) = json.get("refresh_token").and_then(|v| v.as_str()) {
            debug!("server rotated refresh token during exchange");
            let state = {
                let mut config = self.config.write().await;
                config.refresh_token = Some(rotated.to_string());
                config.token_state()
            };
            if let Some(store) = &self.store {
                if let Err(e) = store.store_tokens(&state).await {
                    warn!("failed to persist rotated refresh token: {e}");
                }
            }
        }

        Ok(exchanged)
    }

    /// Exchange the held access token for one scoped to the configured
    /// resource URIs. Clears the access token on HTTP ≥ 400.
    ///
    /// # Errors
    /// [`Error::NoAccessToken`] / [`Error::NoResourceUri`] preconditions,
    /// plus any server or transport error.
    pub async fn do_exchange_access_token_for_resource(
        &self,
        extra: &RequestParams,
    ) -> Result<String> {
        let _permit = self.acquire_rotation_gate().await?;

        let request = {
            let config = self.config.read().await;
            let access_token = config
                .access_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or(Error::NoAccessToken)?;
            if config.resource_uris.is_empty() {
                return Err(Error::NoResourceUri);
            }

            let mut params = RequestParams::new();
            params.set("subject_token", access_token);
            params.set("subject_token_type", TOKEN_TYPE_ACCESS);
            params.set("requested_token_type", TOKEN_TYPE_ACCESS);
            params.merge(extra);
            Self::build_token_request(
                &config,
                config.effective_token_url(),
                GRANT_TYPE_TOKEN_EXCHANGE,
                params,
            )
        };

        debug!("exchanging access token for resource scope");
        let response = self.perform(request).await?;
        if response.status() >= 400 {
            let err = response.token_json().err().unwrap_or(Error::NoDataInResponse);
            warn!(status = response.status(), "resource exchange rejected, dropping access token");
            let mut config = self.config.write().await;
            config.access_token = None;
            config.access_token_expiry = None;
            return Err(err);
        }

        let json = response.token_json()?;
        json.get("access_token")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::Generic("token exchange response carried no token".into()))
    }

    async fn acquire_rotation_gate(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.rotation_gate
            .acquire()
            .await
            .map_err(|_| Error::Generic("rotation gate closed".into()))
    }

    // --- dynamic registration ------------------------------------------------

    /// Register a client when none is configured.
    ///
    /// No-op when a client id exists or the grant does not mandate one.
    /// Applies the `client_id`/`client_secret` fields of the registrar's
    /// response to the configuration.
    ///
    /// # Errors
    /// [`Error::NoRegistrationUrl`] when neither a client id nor a
    /// registration endpoint exists; registrar failures propagate unchanged.
    pub async fn register_client_if_needed(
        &self,
        client_id_mandatory: bool,
    ) -> Result<Option<TokenJson>> {
        let snapshot = {
            let config = self.config.read().await;
            let has_client_id = config.client_id.as_deref().is_some_and(|id| !id.is_empty());
            if has_client_id || !client_id_mandatory {
                return Ok(None);
            }
            if config.registration_url.as_deref().filter(|u| !u.is_empty()).is_none() {
                return Err(Error::NoRegistrationUrl);
            }
            config.clone()
        };

        let registrar = self
            .registrar
            .as_ref()
            .ok_or_else(|| Error::Generic("no client registrar configured".into()))?;

        info!("registering client dynamically");
        let json = registrar.register(&snapshot).await?;

        let mut config = self.config.write().await;
        if let Some(client_id) = json.get("client_id").and_then(|v| v.as_str()) {
            config.client_id = Some(client_id.to_string());
        }
        if let Some(secret) = json.get("client_secret").and_then(|v| v.as_str()) {
            config.client_secret = Some(secret.to_string());
        }
        Ok(Some(json))
    }

    // --- authorize URL -------------------------------------------------------

    /// Build the authorize URL for a redirect-based grant.
    ///
    /// Carries `response_type`, `client_id` (when mandated), `redirect_uri`,
    /// the CSRF `state`, the scope when configured, a PKCE challenge when
    /// `use_pkce` is set, and any caller-supplied extra parameters.
    pub(crate) async fn authorize_url(
        &self,
        response_type: &str,
        client_id_mandatory: bool,
        extra: &RequestParams,
    ) -> Result<String> {
        let config = self.config.read().await;
        let redirect_url = config.require_redirect_url()?.to_string();

        let mut params = RequestParams::new();
        params.set("response_type", response_type);
        if client_id_mandatory {
            params.set("client_id", config.require_client_id()?);
        }
        params.set("redirect_uri", redirect_url);
        {
            let mut context = self.context.lock();
            params.set("state", context.state());
            if config.use_pkce {
                params.set("code_challenge", context.generate_pkce());
                params.set("code_challenge_method", crate::pkce::CHALLENGE_METHOD);
            }
        }
        if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
            params.set("scope", scope);
        }
        params.merge(extra);

        Ok(AuthRequest::get(&config.authorize_url).with_params(params).as_url())
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("authorizing", &self.is_authorizing())
            .finish_non_exhaustive()
    }
}
