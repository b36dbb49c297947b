//! User JWTs signed with the connection's own NKey.
//!
//! The token is a NATS v2 user JWT: `header.claims.signature`, each part
//! base64url without padding, signed with ed25519 over `header.claims`.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use nkeys::KeyPair;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::NatsError;

const HEADER: &str = r#"{"typ":"JWT","alg":"ed25519-nkey"}"#;

/// Claims of a NATS user JWT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    #[serde(default)]
    pub jti: String,
    pub iat: u64,
    pub iss: String,
    pub name: String,
    pub sub: String,
    pub nats: UserLimits,
}

/// The `nats` section: empty permission sets and no limits (`-1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLimits {
    #[serde(rename = "pub")]
    pub publish: Map<String, Value>,
    #[serde(rename = "sub")]
    pub subscribe: Map<String, Value>,
    pub subs: i64,
    pub data: i64,
    pub payload: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u8,
}

impl UserClaims {
    /// Claims for a user that issues its own token.
    pub fn self_issued(key_pair: &KeyPair, name: &str, issued_at: u64) -> Self {
        let public_key = key_pair.public_key();
        Self {
            jti: String::new(),
            iat: issued_at,
            iss: public_key.clone(),
            name: name.to_string(),
            sub: public_key,
            nats: UserLimits {
                publish: Map::new(),
                subscribe: Map::new(),
                subs: -1,
                data: -1,
                payload: -1,
                kind: "user".into(),
                version: 2,
            },
        }
    }
}

/// Sign `claims` into a compact JWT. `jti` is derived from the other claims.
pub fn encode(key_pair: &KeyPair, mut claims: UserClaims) -> Result<String, NatsError> {
    claims.jti = String::new();
    let digest = Sha256::digest(serde_json::to_vec(&claims)?);
    claims.jti = URL_SAFE_NO_PAD.encode(digest);

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(HEADER),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
    );
    let signature = key_pair
        .sign(signing_input.as_bytes())
        .map_err(|e| NatsError::Credentials(format!("signing user JWT: {e}")))?;
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Parse `seed` and issue a user JWT for it, named `name`.
pub fn issue(seed: &str, name: &str) -> Result<(String, KeyPair), NatsError> {
    let key_pair = KeyPair::from_seed(seed)
        .map_err(|e| NatsError::Credentials(format!("invalid NKey seed: {e}")))?;
    let issued_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let token = encode(&key_pair, UserClaims::self_issued(&key_pair, name, issued_at))?;
    Ok((token, key_pair))
}
