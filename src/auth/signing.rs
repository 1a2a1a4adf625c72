use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// HMAC-SHA256 signer shared by the cookie and bearer-token strategies.
#[derive(Clone)]
pub struct Signer {
    key: Arc<[u8]>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: Arc::from(secret.as_ref()),
        }
    }

    /// A throwaway key; everything signed with it dies with the process.
    pub fn generate() -> Self {
        let key: [u8; 32] = rand::thread_rng().gen();
        Self::new(key)
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length")
    }

    fn signature(&self, input: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(input);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn signature_matches(&self, input: &[u8], signature: &str) -> bool {
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(input);
        // Constant-time comparison
        mac.verify_slice(&signature).is_ok()
    }

    /// `base64url(payload).base64url(mac)`
    pub fn sign(&self, payload: &[u8]) -> String {
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let signature = self.signature(encoded.as_bytes());
        format!("{}.{}", encoded, signature)
    }

    /// Returns the payload if the signature checks out.
    pub fn verify(&self, signed: &str) -> Option<Vec<u8>> {
        let (encoded, signature) = signed.rsplit_once('.')?;
        if !self.signature_matches(encoded.as_bytes(), signature) {
            return None;
        }
        URL_SAFE_NO_PAD.decode(encoded).ok()
    }

    /// Encode `claims` as an HS256 JSON Web Token.
    pub fn sign_jwt<T: Serialize>(&self, claims: &T) -> Result<String, serde_json::Error> {
        let header = serde_json::to_vec(&JwtHeader {
            alg: "HS256".into(),
            typ: "JWT".into(),
        })?;
        let claims = serde_json::to_vec(claims)?;
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature = self.signature(input.as_bytes());
        Ok(format!("{}.{}", input, signature))
    }

    /// Decode an HS256 token. Any other algorithm, a bad signature, or
    /// claims that don't fit `T` yield `None`. Expiry is the caller's job.
    pub fn verify_jwt<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let mut segments = token.split('.');
        let header = segments.next()?;
        let claims = segments.next()?;
        let signature = segments.next()?;
        if segments.next().is_some() {
            return None;
        }

        let input = format!("{}.{}", header, claims);
        if !self.signature_matches(input.as_bytes(), signature) {
            return None;
        }

        let header: JwtHeader = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).ok()?).ok()?;
        if header.alg != "HS256" {
            return None;
        }

        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims).ok()?).ok()
    }
}
