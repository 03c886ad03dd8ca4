use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub struct SignatureUtil {
    secret: String,
}

impl SignatureUtil {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// sig is HMAC-SHA256 over the parts joined with '|', keyed with the session token
    pub fn generate_signature(&self, parts: &[&str]) -> String {
        let message = parts.join("|");

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(message.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify_signature(&self, parts: &[&str], signature: &str) -> bool {
        // see if we can regenerate the signature, if we can then it's valid
        let expected_signature = self.generate_signature(parts);

        signature.len() == expected_signature.len()
            && signature
                .as_bytes()
                .iter()
                .zip(expected_signature.as_bytes().iter())
                .fold(0, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    /// stable client fingerprint, sha256 of the parts truncated to 32 hex chars
    pub fn fingerprint(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(32);
        digest
    }
}
