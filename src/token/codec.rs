use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SessionError};

/// Subject claim every token carries.
pub const TOKEN_SUBJECT: &str = "stockings";

/// Lifetime written into `exp`. Not enforced on verify.
pub const TOKEN_LIFETIME_SECS: i64 = 30 * 60;

/// The identity a token vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub client_id: String,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    sub: String,
    iat: i64,
    exp: i64,
}

/// Signs and verifies client tokens.
///
/// Symmetric algorithms use one shared secret for both directions. Asymmetric
/// ones sign with a PEM private key and verify with a distinct PEM public key.
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    /// Builds a codec, failing fast when the keys don't fit the algorithm.
    pub fn new(algorithm: &str, private_key: &str, public_key: Option<&str>) -> Result<Self> {
        let algorithm = parse_algorithm(algorithm)?;

        if private_key.is_empty() {
            return Err(SessionError::Configuration(format!(
                "for token algorithm {algorithm:?}, a private key is required"
            )));
        }

        let (encoding_key, decoding_key) = if is_asymmetric(algorithm) {
            let public_key = public_key.filter(|key| !key.is_empty()).ok_or_else(|| {
                SessionError::Configuration(format!(
                    "for asymmetric token algorithm {algorithm:?}, both a private and a public key are required"
                ))
            })?;
            asymmetric_keys(algorithm, private_key, public_key)?
        } else {
            (
                EncodingKey::from_secret(private_key.as_bytes()),
                DecodingKey::from_secret(private_key.as_bytes()),
            )
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub"]);
        validation.sub = Some(TOKEN_SUBJECT.to_string());

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            validation,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Signs `{clientId, address}` with a 30 minute expiry.
    pub fn sign(&self, client_id: &str, address: &str) -> Result<String> {
        if client_id.is_empty() {
            return Err(SessionError::MalformedToken("clientId"));
        }
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            client_id: Some(client_id.to_string()),
            address: Some(address.to_string()),
            sub: TOKEN_SUBJECT.to_string(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        Ok(encode(
            &Header::new(self.algorithm),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Checks signature and subject. `exp` is not checked.
    pub fn verify(&self, token: &str) -> Result<TokenPayload> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let client_id = data
            .claims
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or(SessionError::MalformedToken("clientId"))?;
        let address = data
            .claims
            .address
            .filter(|address| !address.is_empty())
            .ok_or(SessionError::MalformedToken("address"))?;
        Ok(TokenPayload { client_id, address })
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Accepts jsonwebtoken's names in any letter case (`hs256`, `EDDSA`).
pub fn parse_algorithm(name: &str) -> Result<Algorithm> {
    let name = name.trim();
    Algorithm::from_str(name)
        .or_else(|_| Algorithm::from_str(&name.to_uppercase()))
        .or_else(|e| {
            if name.eq_ignore_ascii_case("eddsa") {
                Ok(Algorithm::EdDSA)
            } else {
                Err(e)
            }
        })
        .map_err(|_| SessionError::UnsupportedAlgorithm(name.to_string()))
}

pub fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

fn asymmetric_keys(
    algorithm: Algorithm,
    private_key: &str,
    public_key: &str,
) -> Result<(EncodingKey, DecodingKey)> {
    let (private_key, public_key) = (private_key.as_bytes(), public_key.as_bytes());
    let keys = match algorithm {
        Algorithm::ES256 | Algorithm::ES384 => (
            EncodingKey::from_ec_pem(private_key),
            DecodingKey::from_ec_pem(public_key),
        ),
        Algorithm::EdDSA => (
            EncodingKey::from_ed_pem(private_key),
            DecodingKey::from_ed_pem(public_key),
        ),
        _ => (
            EncodingKey::from_rsa_pem(private_key),
            DecodingKey::from_rsa_pem(public_key),
        ),
    };
    let encoding = keys
        .0
        .map_err(|e| SessionError::Configuration(format!("unreadable private key: {e}")))?;
    let decoding = keys
        .1
        .map_err(|e| SessionError::Configuration(format!("unreadable public key: {e}")))?;
    Ok((encoding, decoding))
}
