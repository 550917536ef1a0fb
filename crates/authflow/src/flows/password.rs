//! Resource owner password credentials grant (RFC 6749 §4.3)
//!
//! When credentials are already configured the grant runs straight through;
//! otherwise a [`PasswordGrantDelegate`] is asked to collect them and the
//! flow resumes when the application calls
//! [`PasswordFlow::try_credentials`]. Credential rejections are reported as
//! [`Error::WrongUsernamePassword`] regardless of how the server phrased
//! them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::engine::FlowEngine;
use crate::error::{Error, Result};
use crate::params::RequestParams;
use crate::request::TokenJson;

use super::GrantFlow;

/// Collects credentials from the user when none are configured.
///
/// `prompt_credentials` should arrange for a login UI and return; the UI
/// later feeds what it collected into [`PasswordFlow::try_credentials`].
#[async_trait]
pub trait PasswordGrantDelegate: Send + Sync {
    /// Ask the user for credentials.
    async fn prompt_credentials(&self);
}

/// The password grant.
pub struct PasswordFlow {
    engine: Arc<FlowEngine>,
    delegate: Option<Arc<dyn PasswordGrantDelegate>>,
}

impl PasswordFlow {
    /// Create a password flow on `engine`.
    #[must_use]
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self { engine, delegate: None }
    }

    /// Attach the delegate that collects credentials interactively.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn PasswordGrantDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Run the token request with explicit credentials.
    ///
    /// Used by the login UI a [`PasswordGrantDelegate`] presented; also works
    /// standalone. The credentials are stored in the configuration, the grant
    /// is executed, and the outcome is delivered through the completion
    /// handler as well as returned.
    ///
    /// # Errors
    /// [`Error::NoUsername`] / [`Error::NoPassword`] for empty inputs,
    /// [`Error::WrongUsernamePassword`] when the server rejects the
    /// credentials, plus transport errors.
    pub async fn try_credentials(&self, username: &str, password: &str) -> Result<TokenJson> {
        self.engine
            .configure(|config| {
                config.username = Some(username.to_string());
                config.password = Some(password.to_string());
            })
            .await;

        // A delegate-driven retry arrives while the lifecycle is still
        // authorizing; a standalone call starts its own attempt.
        let owns_lifecycle = self.engine.begin_authorize().is_ok();

        let result = self.request_token().await;
        match &result {
            Ok(json) => self.engine.finish_authorize(&Ok(json.clone())),
            Err(e) => {
                if owns_lifecycle || !matches!(e, Error::WrongUsernamePassword) {
                    self.engine.finish_authorize(&Err(e.clone()));
                } else {
                    // Keep the attempt open so the login UI can retry.
                    debug!("credentials rejected, awaiting retry");
                }
            }
        }
        result
    }

    async fn request_token(&self) -> Result<TokenJson> {
        let request = {
            let config = self.engine.config().await;
            let username = config
                .username
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or(Error::NoUsername)?;
            let password = config
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or(Error::NoPassword)?;

            let mut body = RequestParams::new();
            body.set("username", username);
            body.set("password", password);
            if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
                body.set("scope", scope);
            }
            FlowEngine::build_token_request(&config, config.effective_token_url(), "password", body)
        };

        debug!("requesting token with resource owner credentials");
        match self.engine.obtain_token(request).await {
            Ok(json) => {
                info!("password grant succeeded");
                Ok(json)
            }
            // The server's phrasing varies; the user's mistake does not.
            Err(Error::UnauthorizedClient(_) | Error::Forbidden(_)) => {
                Err(Error::WrongUsernamePassword)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GrantFlow for PasswordFlow {
    fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    fn grant_type(&self) -> &'static str {
        "password"
    }

    async fn run_grant(&self, _extra: &RequestParams) -> Result<Option<TokenJson>> {
        let has_credentials = {
            let config = self.engine.config().await;
            config.username.as_deref().is_some_and(|u| !u.is_empty())
                && config.password.as_deref().is_some_and(|p| !p.is_empty())
        };

        if has_credentials {
            return self.request_token().await.map(Some);
        }

        let delegate = self.delegate.as_ref().ok_or(Error::NoPasswordGrantDelegate)?;
        debug!("no credentials configured, prompting");
        delegate.prompt_credentials().await;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the password flow.
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::config::ClientConfig;
    use crate::testing::MockPerformer;

    fn flow_with(performer: MockPerformer) -> (PasswordFlow, Arc<MockPerformer>) {
        let mut config =
            ClientConfig::new("https://auth.example.com/authorize", "https://auth.example.com/token");
        config.client_id = Some("client".to_string());

        let performer = Arc::new(performer);
        let engine = Arc::new(FlowEngine::new(config, performer.clone()));
        (PasswordFlow::new(engine), performer)
    }

    /// Validates `PasswordFlow::authorize` behavior for the configured
    /// credentials scenario.
    ///
    /// Assertions:
    /// - Ensures username, password, and scope are sent with
    ///   `grant_type=password`.
    #[tokio::test]
    async fn test_configured_credentials() {
        let performer = MockPerformer::new();
        performer.push_json(
            200,
            &json!({ "access_token": "tok", "token_type": "bearer", "expires_in": 60 }),
        );
        let (flow, performer) = flow_with(performer);
        flow.engine()
            .configure(|c| {
                c.username = Some("alice".to_string());
                c.password = Some("hunter2".to_string());
                c.scope = Some("profile".to_string());
            })
            .await;

        let json = flow.authorize(&RequestParams::new()).await.expect("authorize");
        assert!(json.is_some());

        let params = performer.requests()[0].clone();
        assert_eq!(params.params().get("grant_type"), Some("password"));
        assert_eq!(params.params().get("username"), Some("alice"));
        assert_eq!(params.params().get("password"), Some("hunter2"));
        assert_eq!(params.params().get("scope"), Some("profile"));
    }

    /// Validates `PasswordFlow::authorize` behavior for the missing
    /// credentials scenarios.
    ///
    /// Assertions:
    /// - Ensures the delegate is prompted and no result is returned.
    /// - Ensures the absence of a delegate is an error.
    #[tokio::test]
    async fn test_missing_credentials() {
        struct Recorder(AtomicBool);
        #[async_trait]
        impl PasswordGrantDelegate for Recorder {
            async fn prompt_credentials(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let (flow, _) = flow_with(MockPerformer::new());
        assert!(matches!(
            flow.authorize(&RequestParams::new()).await,
            Err(Error::NoPasswordGrantDelegate)
        ));

        let recorder = Arc::new(Recorder(AtomicBool::new(false)));
        let (flow, _) = flow_with(MockPerformer::new());
        let flow = flow.with_delegate(recorder.clone());

        let outcome = flow.authorize(&RequestParams::new()).await.expect("pending");
        assert!(outcome.is_none());
        assert!(recorder.0.load(Ordering::SeqCst));
        assert!(flow.engine().is_authorizing());
    }

    /// Validates `PasswordFlow::try_credentials` behavior for the rejection
    /// remap scenario.
    ///
    /// Assertions:
    /// - Ensures a 401 becomes `WrongUsernamePassword`.
    /// - Ensures a later success completes the flow.
    #[tokio::test]
    async fn test_wrong_credentials_remap() {
        let performer = MockPerformer::new();
        performer.push_response(crate::request::Response::new(401, b"{}".to_vec()));
        performer.push_json(
            200,
            &json!({ "access_token": "tok", "token_type": "bearer", "expires_in": 60 }),
        );
        let (flow, _) = flow_with(performer);

        assert!(matches!(
            flow.try_credentials("alice", "wrong").await,
            Err(Error::WrongUsernamePassword)
        ));
        let json = flow.try_credentials("alice", "hunter2").await.expect("retry");
        assert_eq!(json.get("access_token").and_then(|v| v.as_str()), Some("tok"));
        assert!(!flow.engine().is_authorizing());
    }

    /// Validates `PasswordFlow::try_credentials` behavior for the empty
    /// input scenarios.
    #[tokio::test]
    async fn test_empty_credentials() {
        let (flow, _) = flow_with(MockPerformer::new());
        assert!(matches!(flow.try_credentials("", "pw").await, Err(Error::NoUsername)));
        let (flow, _) = flow_with(MockPerformer::new());
        assert!(matches!(flow.try_credentials("user", "").await, Err(Error::NoPassword)));
    }
}
