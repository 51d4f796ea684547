//! APNs provider authentication token: an ES256 JWT signed with the team's
//! `.p8` key, sent as `authorization: bearer <jwt>` and re-signed before the
//! one hour APNs limit.

use std::{fs, path::Path, time::{SystemTime, UNIX_EPOCH}};
use openssl::{ec::EcKey, ecdsa::EcdsaSig, pkey::{PKey, Private}, sha::sha256};
use base64::{engine::general_purpose, Engine};
use thiserror::Error;

use crate::util::ApnsSettings;

/// Provider authentication token, signed with the team's .p8 key.
pub struct AuthToken {
    pub token: String,
    team_id: String,
    key: EcKey<Private>,
    jwt_header: String,
}

impl AuthToken {
    pub fn new(settings: &ApnsSettings) -> Result<AuthToken, AuthTokenError> {
        AuthToken::from_key_file(&settings.token_key_path, &settings.auth_key_id, &settings.team_id)
    }

    pub fn from_key_file(key_path: &Path, key_id: &str, team_id: &str) -> Result<AuthToken, AuthTokenError> {
        let private_key_bytes = fs::read(key_path).map_err(AuthTokenError::IO)?;
        let key = PKey::private_key_from_pem(&private_key_bytes)
            .and_then(|pkey| pkey.ec_key())
            .map_err(|_| AuthTokenError::BadPrivateKey)?;

        let jwt_header = AuthToken::generate_jwt_header(key_id);
        let mut auth_token = AuthToken {
            token: String::new(),
            team_id: team_id.to_string(),
            key,
            jwt_header,
        };
        auth_token.refresh()?;
        Ok(auth_token)
    }

    /// Re-sign with a fresh `iat`. APNs wants this between 20 and 60 minutes.
    pub fn refresh(&mut self) -> Result<(), AuthTokenError> {
        let jwt_claims = AuthToken::generate_jwt_claims(&self.team_id);
        let jwt_signed = self.generate_jwt_signed(&jwt_claims)?;
        self.token = format!("{}.{jwt_claims}.{jwt_signed}", self.jwt_header);
        Ok(())
    }

    fn generate_jwt_header(key_id: &str) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(
            format!("{{ \"alg\": \"ES256\", \"kid\": \"{key_id}\" }}").as_bytes()
        )
    }

    fn generate_jwt_claims(team_id: &str) -> String {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        general_purpose::URL_SAFE_NO_PAD.encode(
            format!("{{ \"iss\": \"{team_id}\", \"iat\": {since_epoch} }}").as_bytes()
        )
    }

    /// Signing using ECDSA P-256. JWS wants the raw `r || s` form, not DER.
    fn generate_jwt_signed(&self, claims: &str) -> Result<String, AuthTokenError> {
        let header_claims = format!("{}.{claims}", self.jwt_header);
        let digest = sha256(header_claims.as_bytes());

        let sig = EcdsaSig::sign(&digest, &self.key).map_err(|_| AuthTokenError::BadSignature)?;
        let mut signed = sig.r().to_vec_padded(32).map_err(|_| AuthTokenError::BadSignature)?;
        signed.extend(sig.s().to_vec_padded(32).map_err(|_| AuthTokenError::BadSignature)?);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(signed))
    }
}

#[derive(Error, Debug)]
pub enum AuthTokenError {
    #[error("failed to read token key: {0}")]
    IO(std::io::Error),

    #[error("token key is not a valid PEM private key")]
    BadPrivateKey,

    #[error("failed to sign authentication token")]
    BadSignature,
}
