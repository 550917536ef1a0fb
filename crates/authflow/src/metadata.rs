//! Authorization server metadata discovery (RFC 8414)
//!
//! [`ServerMetadata::discover`] fetches the well-known document for an issuer
//! and [`ServerMetadata::apply_to`] copies the endpoints into a
//! [`ClientConfig`], so applications can configure a client from nothing but
//! the issuer URL.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::request::{AuthRequest, RequestPerformer};

/// Path segment RFC 8414 §3 mandates for the well-known document.
const WELL_KNOWN_SUFFIX: &str = "/.well-known/oauth-authorization-server";

/// The subset of RFC 8414 metadata the flows consume.
///
/// Unknown fields are ignored so servers can advertise whatever else they
/// like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl ServerMetadata {
    /// Fetch and decode the metadata document for `issuer`.
    ///
    /// With `validate_issuer` set, the document's `issuer` must match the
    /// requested one byte for byte; RFC 8414 §3.3 calls this out as the
    /// defense against document substitution.
    ///
    /// # Errors
    /// Transport and decoding errors, plus [`Error::Generic`] for an issuer
    /// mismatch.
    pub async fn discover(
        performer: &dyn RequestPerformer,
        issuer: &str,
        validate_issuer: bool,
    ) -> Result<Self> {
        let url = well_known_url(issuer)?;
        debug!(url, "discovering server metadata");

        let response = performer.perform(AuthRequest::get(&url)).await?;
        if response.status() >= 400 {
            return Err(Error::Response {
                status: response.status(),
                message: format!("metadata discovery failed for {url}"),
            });
        }
        let metadata: Self = serde_json::from_slice(response.body())?;

        if validate_issuer && metadata.issuer != issuer {
            return Err(Error::Generic(format!(
                "metadata issuer {:?} does not match requested issuer {issuer:?}",
                metadata.issuer
            )));
        }

        info!(issuer = %metadata.issuer, "server metadata discovered");
        Ok(metadata)
    }

    /// Copy the advertised endpoints into `config`, leaving everything the
    /// document does not mention untouched.
    pub fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(endpoint) = &self.authorization_endpoint {
            config.authorize_url.clone_from(endpoint);
        }
        if let Some(endpoint) = &self.token_endpoint {
            config.token_url = Some(endpoint.clone());
        }
        if let Some(endpoint) = &self.device_authorization_endpoint {
            config.device_authorize_url = Some(endpoint.clone());
        }
        if let Some(endpoint) = &self.registration_endpoint {
            config.registration_url = Some(endpoint.clone());
        }
    }

    /// Build a fresh [`ClientConfig`] from the advertised endpoints.
    #[must_use]
    pub fn to_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        self.apply_to(&mut config);
        config
    }
}

/// Derive the well-known metadata URL for an issuer (RFC 8414 §3.1): the
/// suffix is inserted between the host and the issuer's path component.
fn well_known_url(issuer: &str) -> Result<String> {
    let issuer = issuer.trim_end_matches('/');
    let after_scheme = issuer
        .find("://")
        .map(|i| i + 3)
        .filter(|&i| i < issuer.len())
        .ok_or_else(|| Error::Generic(format!("issuer {issuer:?} is not an absolute URL")))?;

    Ok(match issuer[after_scheme..].find('/') {
        Some(path_start) => {
            let (origin, path) = issuer.split_at(after_scheme + path_start);
            format!("{origin}{WELL_KNOWN_SUFFIX}{path}")
        }
        None => format!("{issuer}{WELL_KNOWN_SUFFIX}"),
    })
}

#[cfg(test)]
mod tests {
    //! Unit tests for metadata discovery.
    use serde_json::json;

    use super::*;
    use crate::testing::MockPerformer;

    /// Validates `well_known_url` behavior for the RFC 8414 §3.1 path
    /// insertion scenario.
    ///
    /// Assertions:
    /// - Ensures a path-less issuer appends the suffix.
    /// - Ensures a path component lands after the suffix.
    #[test]
    fn test_well_known_url() {
        assert_eq!(
            well_known_url("https://auth.example.com").expect("url"),
            "https://auth.example.com/.well-known/oauth-authorization-server"
        );
        assert_eq!(
            well_known_url("https://auth.example.com/tenant1/").expect("url"),
            "https://auth.example.com/.well-known/oauth-authorization-server/tenant1"
        );
        assert!(well_known_url("not a url").is_err());
    }

    /// Validates `ServerMetadata::discover` behavior for the issuer
    /// validation scenario.
    ///
    /// Assertions:
    /// - Ensures an identical issuer is accepted.
    /// - Ensures even a trailing-slash variant is rejected when validation
    ///   is on; the comparison is byte-exact.
    /// - Ensures a mismatched issuer is tolerated when validation is off.
    #[tokio::test]
    async fn test_issuer_validation() {
        let document = json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token"
        });

        let performer = MockPerformer::new();
        performer.push_json(200, &document);
        let metadata = ServerMetadata::discover(&performer, "https://auth.example.com", true)
            .await
            .expect("matching issuer");
        assert_eq!(metadata.token_endpoint.as_deref(), Some("https://auth.example.com/token"));

        let performer = MockPerformer::new();
        performer.push_json(200, &document);
        assert!(matches!(
            ServerMetadata::discover(&performer, "https://auth.example.com/", true).await,
            Err(Error::Generic(_))
        ));

        let performer = MockPerformer::new();
        performer.push_json(200, &document);
        assert!(matches!(
            ServerMetadata::discover(&performer, "https://other.example.com", true).await,
            Err(Error::Generic(_))
        ));

        let performer = MockPerformer::new();
        performer.push_json(200, &document);
        ServerMetadata::discover(&performer, "https://other.example.com", false)
            .await
            .expect("validation disabled");
    }

    /// Validates `ServerMetadata::apply_to` behavior for the endpoint
    /// copying scenario.
    #[tokio::test]
    async fn test_apply_endpoints() {
        let performer = MockPerformer::new();
        performer.push_json(
            200,
            &json!({
                "issuer": "https://auth.example.com",
                "authorization_endpoint": "https://auth.example.com/authorize",
                "token_endpoint": "https://auth.example.com/token",
                "device_authorization_endpoint": "https://auth.example.com/device",
                "registration_endpoint": "https://auth.example.com/register"
            }),
        );
        let metadata = ServerMetadata::discover(&performer, "https://auth.example.com", true)
            .await
            .expect("discover");

        let config = metadata.to_config();
        assert_eq!(config.authorize_url, "https://auth.example.com/authorize");
        assert_eq!(config.token_url.as_deref(), Some("https://auth.example.com/token"));
        assert_eq!(
            config.device_authorize_url.as_deref(),
            Some("https://auth.example.com/device")
        );
        assert_eq!(
            config.registration_url.as_deref(),
            Some("https://auth.example.com/register")
        );
    }
}
