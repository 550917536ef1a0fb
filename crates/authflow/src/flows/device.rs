//! Device authorization grant (RFC 8628)
//!
//! [`DeviceFlow::start`] obtains a device/user code pair for the application
//! to display, then polls the token endpoint in a background task until the
//! user approves, the code expires, or the attempt is cancelled. The outcome
//! is delivered through the engine's completion handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::engine::FlowEngine;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::request::{AuthRequest, TokenJson};

use super::GrantFlow;

/// RFC 8628 grant type identifier.
const GRANT_TYPE_DEVICE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// How much to add to the polling interval on `slow_down`, per RFC 8628 §3.5.
const SLOW_DOWN_INCREMENT: u64 = 5;

/// Ceiling on the server-supplied `expires_in`; deadline arithmetic must not
/// overflow on a pathological value.
const MAX_CODE_LIFETIME: u64 = 24 * 60 * 60;

fn default_expires_in() -> u64 {
    300
}

fn default_interval() -> u64 {
    5
}

/// The device authorization response (RFC 8628 §3.2).
///
/// `user_code` and `verification_uri` are what the application displays;
/// `verification_uri_complete` embeds the code for QR-style hand-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

/// The device authorization grant.
pub struct DeviceFlow {
    engine: Arc<FlowEngine>,
    poll_abort: parking_lot::Mutex<Option<AbortHandle>>,
}

impl DeviceFlow {
    /// Create a device flow on `engine`.
    #[must_use]
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine, poll_abort: parking_lot::Mutex::new(None) }
    }

    /// Request a device/user code pair and begin polling in the background.
    ///
    /// The returned [`DeviceAuthorization`] carries what the application
    /// displays to the user. Polling honors the server's `interval`, backs
    /// off another five seconds on every `slow_down`, stops at `expires_in`,
    /// and reports the terminal outcome through the completion handler.
    ///
    /// # Errors
    /// [`Error::AlreadyAuthorizing`] for a re-entrant start,
    /// [`Error::NoDeviceCodeUrl`] / [`Error::NoClientId`] when unconfigured,
    /// plus any server or transport error from the authorization request.
    pub async fn start(&self, extra: &RequestParams) -> Result<DeviceAuthorization> {
        self.engine.begin_authorize()?;
        match self.request_authorization(extra).await {
            Ok(auth) => {
                info!(user_code = %auth.user_code, "device authorization obtained, polling");
                self.spawn_polling(auth.clone());
                Ok(auth)
            }
            Err(e) => {
                self.engine.finish_authorize(&Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop the background polling task and fail the attempt with
    /// [`Error::RequestCancelled`]. A no-op when nothing is polling.
    pub fn cancel_polling(&self) {
        let aborted = match self.poll_abort.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        };
        if aborted && self.engine.is_authorizing() {
            debug!("device polling cancelled");
            self.engine.finish_authorize(&Err(Error::RequestCancelled));
        }
    }

    async fn request_authorization(&self, extra: &RequestParams) -> Result<DeviceAuthorization> {
        let request = {
            let config = self.engine.config().await;
            let device_url = config
                .device_authorize_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or(Error::NoDeviceCodeUrl)?
                .to_string();
            let client_id = config.require_client_id()?;

            let mut body = RequestParams::new();
            body.set("client_id", client_id);
            if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
                body.set("scope", scope);
            }
            body.merge(extra);

            let mut request = AuthRequest::post(device_url).with_params(body);
            if let Some(secret) = config.client_secret.as_deref() {
                if !config.secret_in_body {
                    request = request.with_basic_auth(client_id, secret);
                }
            }
            request
        };

        let json = self.engine.perform(request).await?.token_json()?;
        Ok(serde_json::from_value(serde_json::Value::Object(json))?)
    }

    fn spawn_polling(&self, auth: DeviceAuthorization) {
        let (handle, registration) = AbortHandle::new_pair();
        *self.poll_abort.lock() = Some(handle);

        let engine = self.engine.clone();
        tokio::spawn(Abortable::new(poll_for_token(engine, auth), registration));
    }
}

impl Drop for DeviceFlow {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_abort.lock().take() {
            handle.abort();
        }
    }
}

/// Poll the token endpoint until a terminal outcome.
async fn poll_for_token(engine: Arc<FlowEngine>, auth: DeviceAuthorization) {
    let mut interval = auth.interval.max(1);
    let deadline =
        Instant::now() + Duration::from_secs(auth.expires_in.min(MAX_CODE_LIFETIME));

    loop {
        sleep(Duration::from_secs(interval)).await;
        if Instant::now() >= deadline {
            warn!("device code expired before the user approved");
            engine.finish_authorize(&Err(Error::Generic("device code expired".into())));
            return;
        }

        let request = {
            let config = engine.config().await;
            let mut body = RequestParams::new();
            body.set("device_code", auth.device_code.as_str());
            FlowEngine::build_token_request(
                &config,
                config.effective_token_url(),
                GRANT_TYPE_DEVICE,
                body,
            )
        };

        match engine.obtain_token(request).await {
            Ok(json) => {
                info!("device authorization approved");
                engine.finish_authorize(&Ok(json));
                return;
            }
            Err(Error::AuthorizationPending) => {
                debug!("authorization pending, polling again in {interval}s");
            }
            Err(Error::SlowDown) => {
                interval += SLOW_DOWN_INCREMENT;
                debug!("server asked to slow down, interval now {interval}s");
            }
            Err(e) => {
                engine.finish_authorize(&Err(e));
                return;
            }
        }
    }
}

#[async_trait]
impl GrantFlow for DeviceFlow {
    fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    fn grant_type(&self) -> &'static str {
        GRANT_TYPE_DEVICE
    }

    /// The device/user code pair is not returned on this path; applications
    /// that need to display it call [`DeviceFlow::start`] directly.
    async fn run_grant(&self, extra: &RequestParams) -> Result<Option<TokenJson>> {
        match self.request_authorization(extra).await {
            Ok(auth) => {
                info!(user_code = %auth.user_code, "device authorization obtained, polling");
                self.spawn_polling(auth);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
