use std::collections::HashMap;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::AuthError;

/// Issuer values Google puts in ID tokens. Fixed allow-list, not config.
const ACCEPTED_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Tolerated clock drift when checking token expiry, in seconds.
const CLOCK_SKEW_SECS: u64 = 10;

/// Normalized identity extracted from a verified Google ID token.
#[derive(Debug, Clone)]
pub struct IdentityClaims {
    /// Lowercased and trimmed.
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub picture: String,
    /// Google's stable subject identifier.
    pub subject_id: String,
    pub email_verified: bool,
    pub locale: String,
}

/// Raw claim set of a Google ID token.
#[derive(Debug, Deserialize)]
struct GoogleClaims {
    iss: String,
    aud: String,
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
    #[serde(default)]
    picture: String,
    #[serde(default = "default_locale")]
    locale: String,
}

fn default_locale() -> String {
    "en".to_string()
}

/// Internal verification failure. Logged in full, collapsed to
/// [`AuthError::TokenInvalid`] before leaving this module.
#[derive(Debug, thiserror::Error)]
enum VerifyFailure {
    #[error("empty token")]
    EmptyToken,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("no key for kid {0}")]
    KeyNotFound(String),
    #[error("signature/expiry check failed: {0}")]
    Rejected(String),
    #[error("issuer {0:?} not in allow-list")]
    IssuerMismatch(String),
    #[error("audience {0:?} does not match configured client ID")]
    AudienceMismatch(String),
    #[error("certs fetch failed: {0}")]
    CertsFetch(String),
}

/// Verifies Google ID tokens against Google's published signing keys.
///
/// Keys are fetched once at startup and refreshed when a token arrives
/// signed with an unknown `kid` (Google rotates keys regularly).
pub struct GoogleTokenVerifier {
    http_client: Client,
    certs_url: String,
    client_id: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

impl GoogleTokenVerifier {
    pub async fn new(certs_url: &str, client_id: &str) -> Result<Self, AuthError> {
        let verifier = Self {
            http_client: Client::new(),
            certs_url: certs_url.to_string(),
            client_id: client_id.to_string(),
            keys: RwLock::new(HashMap::new()),
        };

        verifier.refresh_keys().await.map_err(|e| {
            tracing::error!("Initial Google certs fetch failed: {}", e);
            AuthError::TokenInvalid
        })?;

        Ok(verifier)
    }

    async fn refresh_keys(&self) -> Result<(), VerifyFailure> {
        tracing::info!("Fetching Google signing keys from {}", self.certs_url);

        let response: JwksResponse = self
            .http_client
            .get(&self.certs_url)
            .send()
            .await
            .map_err(|e| VerifyFailure::CertsFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerifyFailure::CertsFetch(e.to_string()))?;

        let mut keys = self.keys.write().await;
        keys.clear();

        for jwk in response.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
                match DecodingKey::from_rsa_components(n, e) {
                    Ok(key) => {
                        keys.insert(jwk.kid.clone(), key);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse RSA key {}: {}", jwk.kid, e);
                    }
                }
            }
        }

        tracing::info!("Loaded {} Google signing keys", keys.len());
        Ok(())
    }

    /// Verify an ID token and return the normalized claim set.
    ///
    /// Every failure mode collapses to [`AuthError::TokenInvalid`]; the
    /// cause is logged so verification internals never reach the caller.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        match self.check(token).await {
            Ok(claims) => Ok(claims),
            Err(cause) => {
                tracing::error!("ID token verification failed: {}", cause);
                Err(AuthError::TokenInvalid)
            }
        }
    }

    async fn check(&self, token: &str) -> Result<IdentityClaims, VerifyFailure> {
        if token.is_empty() {
            return Err(VerifyFailure::EmptyToken);
        }

        let header = decode_header(token).map_err(|e| VerifyFailure::Malformed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| VerifyFailure::Malformed("missing kid in token header".to_string()))?;

        let key = match self.decoding_key(&kid).await {
            Some(key) => key,
            None => {
                // Unknown kid: the keys may have rotated since the last
                // fetch. Refresh once and retry the lookup.
                self.refresh_keys().await?;
                self.decoding_key(&kid)
                    .await
                    .ok_or(VerifyFailure::KeyNotFound(kid))?
            }
        };

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_SECS;
        // Issuer and audience are checked explicitly below.
        validation.validate_aud = false;

        let data = decode::<GoogleClaims>(token, &key, &validation)
            .map_err(|e| VerifyFailure::Rejected(e.to_string()))?;
        let claims = data.claims;

        if !ACCEPTED_ISSUERS.contains(&claims.iss.as_str()) {
            return Err(VerifyFailure::IssuerMismatch(claims.iss));
        }

        if claims.aud != self.client_id {
            return Err(VerifyFailure::AudienceMismatch(claims.aud));
        }

        Ok(IdentityClaims {
            email: claims.email.trim().to_lowercase(),
            given_name: claims.given_name,
            family_name: claims.family_name,
            picture: claims.picture,
            subject_id: claims.sub,
            email_verified: claims.email_verified,
            locale: claims.locale,
        })
    }

    async fn decoding_key(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{self, IdTokenBuilder, TEST_CLIENT_ID, TEST_KID};
    use rstest::rstest;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_certs_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/v3/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_util::jwks_json()))
            .mount(&server)
            .await;
        server
    }

    async fn test_verifier(server: &MockServer) -> GoogleTokenVerifier {
        GoogleTokenVerifier::new(&format!("{}/oauth2/v3/certs", server.uri()), TEST_CLIENT_ID)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_yields_normalized_claims() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        let token = IdTokenBuilder::new("  Ana@X.com ")
            .given_name("Ana")
            .family_name("Silva")
            .picture("https://pics.example/ana.jpg")
            .email_verified(true)
            .build();

        let claims = verifier.verify(&token).await.unwrap();
        assert_eq!(claims.email, "ana@x.com");
        assert_eq!(claims.given_name, "Ana");
        assert_eq!(claims.family_name, "Silva");
        assert!(claims.email_verified);
        assert_eq!(claims.locale, "en");
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;
        assert!(matches!(
            verifier.verify("").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;
        assert!(matches!(
            verifier.verify("not.a.jwt").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[rstest]
    #[case::wrong_issuer("https://evil.example.com", TEST_CLIENT_ID)]
    #[case::bare_wrong_issuer("evil.example.com", TEST_CLIENT_ID)]
    #[case::wrong_audience("accounts.google.com", "some-other-client")]
    #[tokio::test]
    async fn test_claim_mismatches_rejected(#[case] iss: &str, #[case] aud: &str) {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        let token = IdTokenBuilder::new("ana@x.com")
            .issuer(iss)
            .audience(aud)
            .build();

        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_both_allowed_issuers_accepted() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        for iss in ACCEPTED_ISSUERS {
            let token = IdTokenBuilder::new("ana@x.com").issuer(iss).build();
            assert!(verifier.verify(&token).await.is_ok(), "issuer {}", iss);
        }
    }

    #[tokio::test]
    async fn test_expired_beyond_skew_rejected() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        let token = IdTokenBuilder::new("ana@x.com")
            .expires_in_secs(-60)
            .build();

        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_within_skew_accepted() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        // Expired five seconds ago, inside the ten-second tolerance.
        let token = IdTokenBuilder::new("ana@x.com").expires_in_secs(-5).build();
        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected_after_refresh() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        let token = IdTokenBuilder::new("ana@x.com").kid("rotated-away").build();
        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_known_kid_still_works_after_unknown_kid_probe() {
        let server = mock_certs_server().await;
        let verifier = test_verifier(&server).await;

        let _ = verifier
            .verify(&IdTokenBuilder::new("ana@x.com").kid("bogus").build())
            .await;

        let token = IdTokenBuilder::new("ana@x.com").kid(TEST_KID).build();
        assert!(verifier.verify(&token).await.is_ok());
    }
}
