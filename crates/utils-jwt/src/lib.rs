//! Bearer token verification against the identity provider's signing keys.
//!
//! Verification is local: key material is loaded once (a shared secret, a PEM
//! public key, or a JWKS document fetched at startup) and every request is
//! checked against it without a network round trip.

use std::{collections::HashMap, time::Duration};

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    errors::{Error as JwtError, ErrorKind},
    jwk::JwkSet,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use jsonwebtoken::jwk;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token is missing the subject claim")]
    MissingSubject,
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),
    #[error("no signing key matches the token")]
    UnknownKey,
    #[error("invalid key material: {0}")]
    KeyMaterial(String),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => AuthError::MissingSubject,
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::InvalidClaims(format!("missing {claim}"))
            }
            ErrorKind::InvalidAudience => AuthError::InvalidClaims("aud".to_string()),
            ErrorKind::InvalidIssuer => AuthError::InvalidClaims("iss".to_string()),
            ErrorKind::ImmatureSignature => AuthError::InvalidClaims("nbf".to_string()),
            ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                AuthError::KeyMaterial(err.to_string())
            }
            _ => AuthError::Malformed,
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
}

enum KeyStore {
    Single(DecodingKey),
    ByKid {
        keys: HashMap<String, DecodingKey>,
        fallback: Option<DecodingKey>,
    },
}

#[derive(Debug, Clone)]
pub struct VerifierOptions {
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub leeway: Duration,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            audience: None,
            issuer: None,
            leeway: Duration::from_secs(30),
        }
    }
}

pub struct TokenVerifier {
    keys: KeyStore,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.keys {
            KeyStore::Single(_) => "single",
            KeyStore::ByKid { .. } => "jwks",
        };
        f.debug_struct("TokenVerifier")
            .field("keys", &source)
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn from_secret(secret: &[u8], options: &VerifierOptions) -> Self {
        Self {
            keys: KeyStore::Single(DecodingKey::from_secret(secret)),
            validation: build_validation(Algorithm::HS256, options),
        }
    }

    pub fn from_rsa_pem(pem: &[u8], options: &VerifierOptions) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(pem).map_err(|e| AuthError::KeyMaterial(e.to_string()))?;
        Ok(Self {
            keys: KeyStore::Single(key),
            validation: build_validation(Algorithm::RS256, options),
        })
    }

    /// Builds a verifier from a JWKS document. Keys without a usable RSA
    /// component are skipped; a set with no usable keys is an error.
    pub fn from_jwks(set: &JwkSet, options: &VerifierOptions) -> Result<Self, AuthError> {
        let mut keys = HashMap::new();
        let mut fallback = None;
        for jwk in &set.keys {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(err) => {
                    tracing::warn!(kid = ?jwk.common.key_id, "Skipping unusable JWK: {err}");
                    continue;
                }
            };
            match &jwk.common.key_id {
                Some(kid) => {
                    keys.insert(kid.clone(), key);
                }
                None => fallback = Some(key),
            }
        }

        if keys.is_empty() && fallback.is_none() {
            return Err(AuthError::KeyMaterial(
                "JWKS contains no usable keys".to_string(),
            ));
        }

        Ok(Self {
            keys: KeyStore::ByKid { keys, fallback },
            validation: build_validation(Algorithm::RS256, options),
        })
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        let key = self.select_key(header.kid.as_deref())?;

        let data = decode::<Claims>(token, key, &self.validation).map_err(AuthError::from)?;
        let subject = data
            .claims
            .sub
            .filter(|sub| !sub.trim().is_empty())
            .ok_or(AuthError::MissingSubject)?;

        tracing::debug!(subject = %subject, "Verified bearer token");
        Ok(Principal {
            subject,
            username: data.claims.preferred_username,
        })
    }

    fn select_key(&self, kid: Option<&str>) -> Result<&DecodingKey, AuthError> {
        match &self.keys {
            KeyStore::Single(key) => Ok(key),
            KeyStore::ByKid { keys, fallback } => kid
                .and_then(|kid| keys.get(kid))
                .or(fallback.as_ref())
                .ok_or(AuthError::UnknownKey),
        }
    }
}

fn build_validation(algorithm: Algorithm, options: &VerifierOptions) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.leeway = options.leeway.as_secs();
    validation.set_required_spec_claims(&["exp", "sub"]);
    match &options.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if let Some(issuer) = &options.issuer {
        validation.set_issuer(&[issuer]);
    }
    validation
}

/// Extracts the token from an `Authorization` header value.
pub fn parse_authorization_bearer(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    let (prefix, rest) = trimmed.split_once(' ')?;
    if !prefix.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;

    const SECRET: &[u8] = b"test-secret";
    const PRIVATE_PEM: &[u8] = include_bytes!("../tests/fixtures/test_rsa_private.pem");
    const PUBLIC_PEM: &[u8] = include_bytes!("../tests/fixtures/test_rsa_public.pem");
    // Modulus of the public fixture, base64url without padding.
    const PUBLIC_N: &str = "vshbB2m9-GKIKJL2Bhtvbaf6EyBcFDWKZHLW_BIz47tsPu_JdJ5l_VwaDFpVaq_tZwHCpsGTxGRJBmLYqt7TYeEgSEX8-IbLKrmQPLhnP8Bbb6JUUCefsPO_Hu0V3-ub9Jy32hd6N3cwqTnouYTy0VqkSC6Gr-pM6mxnFR0wXWpB0aP9uKw5d1iNQxN0adubJwC18fpRPp1anrh8NRQBmTUudAC6O-SO6mNxrBLRIdCkYHbeNG7zuYDvZMut14B8nfhFVHbWsH_ahw6L_yUbjW4DL1GPS51AoIKE1h-h7gxq-rqHUxcmr0svURg68BsZp1Z6n81vrgSV--TBZTkLBw";

    fn hs256(claims: serde_json::Value) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn rs256(claims: serde_json::Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(PRIVATE_PEM).unwrap(),
        )
        .unwrap()
    }

    fn exp_in(secs: i64) -> i64 {
        Utc::now().timestamp() + secs
    }

    fn jwks(kid: Option<&str>) -> JwkSet {
        let mut key = json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "n": PUBLIC_N,
            "e": "AQAB",
        });
        if let Some(kid) = kid {
            key["kid"] = json!(kid);
        }
        serde_json::from_value(json!({ "keys": [key] })).unwrap()
    }

    #[test]
    fn accepts_valid_token_and_extracts_subject() {
        let verifier = TokenVerifier::from_secret(SECRET, &VerifierOptions::default());
        let token = hs256(json!({
            "sub": "user-1",
            "preferred_username": "ada",
            "exp": exp_in(300),
        }));

        let principal = verifier.verify(&token).unwrap();
        assert_eq!(principal.subject, "user-1");
        assert_eq!(principal.username.as_deref(), Some("ada"));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::from_secret(SECRET, &VerifierOptions::default());
        let token = hs256(json!({ "sub": "user-1", "exp": exp_in(-3600) }));

        assert_eq!(verifier.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn rejects_missing_or_empty_subject() {
        let verifier = TokenVerifier::from_secret(SECRET, &VerifierOptions::default());

        let missing = hs256(json!({ "exp": exp_in(300) }));
        assert_eq!(verifier.verify(&missing), Err(AuthError::MissingSubject));

        let empty = hs256(json!({ "sub": "", "exp": exp_in(300) }));
        assert_eq!(verifier.verify(&empty), Err(AuthError::MissingSubject));
    }

    #[test]
    fn rejects_wrong_signature_and_garbage() {
        let verifier = TokenVerifier::from_secret(b"other-secret", &VerifierOptions::default());
        let token = hs256(json!({ "sub": "user-1", "exp": exp_in(300) }));

        assert_eq!(verifier.verify(&token), Err(AuthError::InvalidSignature));
        assert_eq!(verifier.verify("not-a-jwt"), Err(AuthError::Malformed));
    }

    #[test]
    fn checks_audience_and_issuer_when_configured() {
        let options = VerifierOptions {
            audience: Some("task-client".to_string()),
            issuer: Some("https://idp.example/realms/task-api".to_string()),
            ..Default::default()
        };
        let verifier = TokenVerifier::from_secret(SECRET, &options);

        let good = hs256(json!({
            "sub": "user-1",
            "exp": exp_in(300),
            "aud": "task-client",
            "iss": "https://idp.example/realms/task-api",
        }));
        assert!(verifier.verify(&good).is_ok());

        let wrong_aud = hs256(json!({
            "sub": "user-1",
            "exp": exp_in(300),
            "aud": "someone-else",
            "iss": "https://idp.example/realms/task-api",
        }));
        assert!(matches!(
            verifier.verify(&wrong_aud),
            Err(AuthError::InvalidClaims(_))
        ));
    }

    #[test]
    fn verifies_rs256_with_public_pem() {
        let verifier = TokenVerifier::from_rsa_pem(PUBLIC_PEM, &VerifierOptions::default()).unwrap();
        let token = rs256(json!({ "sub": "svc", "exp": exp_in(300) }), None);

        assert_eq!(verifier.verify(&token).unwrap().subject, "svc");

        let hs_token = hs256(json!({ "sub": "svc", "exp": exp_in(300) }));
        assert!(verifier.verify(&hs_token).is_err());
    }

    #[test]
    fn rejects_invalid_pem() {
        let err = TokenVerifier::from_rsa_pem(b"not a key", &VerifierOptions::default()).unwrap_err();
        assert!(matches!(err, AuthError::KeyMaterial(_)));
    }

    #[test]
    fn empty_jwks_is_rejected() {
        let set: JwkSet = serde_json::from_value(json!({ "keys": [] })).unwrap();
        assert!(matches!(
            TokenVerifier::from_jwks(&set, &VerifierOptions::default()),
            Err(AuthError::KeyMaterial(_))
        ));
    }

    #[test]
    fn jwks_selects_key_by_kid() {
        let verifier =
            TokenVerifier::from_jwks(&jwks(Some("k1")), &VerifierOptions::default()).unwrap();
        let claims = json!({ "sub": "svc", "exp": exp_in(300) });

        let token = rs256(claims.clone(), Some("k1"));
        assert_eq!(verifier.verify(&token).unwrap().subject, "svc");

        let rotated = rs256(claims.clone(), Some("k2"));
        assert_eq!(verifier.verify(&rotated), Err(AuthError::UnknownKey));

        let unlabelled = rs256(claims, None);
        assert_eq!(verifier.verify(&unlabelled), Err(AuthError::UnknownKey));
    }

    #[test]
    fn jwks_key_without_kid_verifies_unlabelled_tokens() {
        let verifier = TokenVerifier::from_jwks(&jwks(None), &VerifierOptions::default()).unwrap();
        let token = rs256(json!({ "sub": "svc", "exp": exp_in(300) }), None);
        assert_eq!(verifier.verify(&token).unwrap().subject, "svc");

        let hs_token = hs256(json!({ "sub": "svc", "exp": exp_in(300) }));
        assert!(verifier.verify(&hs_token).is_err());
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(parse_authorization_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_authorization_bearer("  bearer   abc  "), Some("abc"));
        assert_eq!(parse_authorization_bearer("Basic abc"), None);
        assert_eq!(parse_authorization_bearer("Bearer "), None);
        assert_eq!(parse_authorization_bearer("abc"), None);
    }
}
