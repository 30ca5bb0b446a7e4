//! Keyed, time-windowed nonce derivation.
//!
//! A nonce is never stored. It is the truncated HMAC-SHA256 of the tick
//! index, the action and the identity, keyed with the installation secret,
//! and verification simply recomputes it for the current and previous tick.
//! A tick is half the configured lifetime, so a nonce stays valid for
//! between one half and one full lifetime depending on when it was minted.

use crate::config::NonceOptions;
use crate::error::{NonceError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Number of MAC bytes kept in a token.
const TOKEN_BYTES: usize = 12;

/// Encoded token length (12 bytes, base64url without padding).
pub const TOKEN_LEN: usize = 16;

/// Outcome of a nonce verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyResult {
    /// Minted during the current tick
    Fresh,
    /// Minted during the previous tick; still accepted, close to expiry
    Aging,
    /// Wrong action, identity or secret, tampered, or expired
    Invalid,
}

impl VerifyResult {
    /// Whether the nonce should be accepted.
    pub fn is_valid(&self) -> bool {
        !matches!(self, VerifyResult::Invalid)
    }

    /// Tick the nonce was minted in, counted back from the current one.
    pub fn tick(&self) -> Option<u8> {
        match self {
            VerifyResult::Fresh => Some(1),
            VerifyResult::Aging => Some(2),
            VerifyResult::Invalid => None,
        }
    }

    /// Turn an `Invalid` outcome into an error for `?` propagation.
    pub fn into_result(self) -> Result<Self> {
        match self {
            VerifyResult::Invalid => Err(NonceError::VerificationFailed),
            valid => Ok(valid),
        }
    }
}

/// Derives and checks nonces.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    options: Arc<NonceOptions>,
}

impl TokenCodec {
    /// Create a codec bound to the given options.
    pub fn new(options: Arc<NonceOptions>) -> Self {
        Self { options }
    }

    /// Options this codec reads the lifetime from.
    pub fn options(&self) -> &NonceOptions {
        &self.options
    }

    /// Tick index for a unix timestamp.
    pub fn window(&self, now_secs: i64) -> i64 {
        now_secs.div_euclid(self.options.tick_length())
    }

    /// Derive the nonce for an identity and action in the given tick.
    ///
    /// Deterministic: the same inputs always produce the same token.
    pub fn mint(&self, identity: &str, action: &str, window: i64, secret: &[u8]) -> Result<String> {
        let mac = Self::mac(identity, action, window, secret)?;
        Ok(URL_SAFE_NO_PAD.encode(&mac[..TOKEN_BYTES]))
    }

    /// Check a nonce against the current and the previous tick.
    pub fn verify(
        &self,
        token: &str,
        identity: &str,
        action: &str,
        secret: &[u8],
        current_window: i64,
    ) -> Result<VerifyResult> {
        // Fail on a missing secret before looking at the token.
        let fresh = self.mint(identity, action, current_window, secret)?;

        if token.len() != TOKEN_LEN {
            return Ok(VerifyResult::Invalid);
        }

        if bool::from(token.as_bytes().ct_eq(fresh.as_bytes())) {
            return Ok(VerifyResult::Fresh);
        }

        let aging = self.mint(identity, action, current_window.saturating_sub(1), secret)?;
        if bool::from(token.as_bytes().ct_eq(aging.as_bytes())) {
            return Ok(VerifyResult::Aging);
        }

        Ok(VerifyResult::Invalid)
    }

    fn mac(identity: &str, action: &str, window: i64, secret: &[u8]) -> Result<Vec<u8>> {
        if secret.is_empty() {
            return Err(NonceError::InvalidConfiguration(
                "nonce secret is not provisioned".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| NonceError::InvalidConfiguration(e.to_string()))?;
        // Length-prefix the strings so no two tuples share an encoding.
        mac.update(&window.to_be_bytes());
        mac.update(&(action.len() as u64).to_be_bytes());
        mac.update(action.as_bytes());
        mac.update(&(identity.len() as u64).to_be_bytes());
        mac.update(identity.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_secret_key_32_bytes_long!!!";

    fn codec(lifetime: i64) -> TokenCodec {
        let options = NonceOptions::default().with_lifetime(lifetime).unwrap();
        TokenCodec::new(Arc::new(options))
    }

    #[test]
    fn test_mint_is_deterministic() {
        let codec = codec(86_400);
        let a = codec.mint("42", "delete-post_7", 100, SECRET).unwrap();
        let b = codec.mint("42", "delete-post_7", 100, SECRET).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), TOKEN_LEN);
    }

    #[test]
    fn test_mint_binds_every_input() {
        let codec = codec(86_400);
        let base = codec.mint("42", "save", 100, SECRET).unwrap();

        assert_ne!(base, codec.mint("43", "save", 100, SECRET).unwrap());
        assert_ne!(base, codec.mint("42", "load", 100, SECRET).unwrap());
        assert_ne!(base, codec.mint("42", "save", 101, SECRET).unwrap());
        assert_ne!(
            base,
            codec
                .mint("42", "save", 100, b"another_secret_key_32_bytes_long")
                .unwrap()
        );
    }

    #[test]
    fn test_mint_requires_secret() {
        let codec = codec(86_400);
        assert!(matches!(
            codec.mint("42", "save", 1, b""),
            Err(NonceError::InvalidConfiguration(_))
        ));
        assert!(codec.verify("whatever", "42", "save", b"", 1).is_err());
    }

    #[test]
    fn test_verify_windows() {
        let codec = codec(86_400);
        let token = codec.mint("42", "save", 500, SECRET).unwrap();

        assert_eq!(
            codec.verify(&token, "42", "save", SECRET, 500).unwrap(),
            VerifyResult::Fresh
        );
        assert_eq!(
            codec.verify(&token, "42", "save", SECRET, 501).unwrap(),
            VerifyResult::Aging
        );
        assert_eq!(
            codec.verify(&token, "42", "save", SECRET, 502).unwrap(),
            VerifyResult::Invalid
        );
        // Tokens from the future are not accepted either.
        assert_eq!(
            codec.verify(&token, "42", "save", SECRET, 499).unwrap(),
            VerifyResult::Invalid
        );
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let codec = codec(86_400);
        let token = codec.mint("42", "save", 10, SECRET).unwrap();

        let mut tampered: Vec<char> = token.chars().collect();
        tampered[0] = if tampered[0] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();

        assert_eq!(
            codec.verify(&tampered, "42", "save", SECRET, 10).unwrap(),
            VerifyResult::Invalid
        );
        assert_eq!(
            codec.verify("", "42", "save", SECRET, 10).unwrap(),
            VerifyResult::Invalid
        );
        assert_eq!(
            codec.verify(&token, "42", "other", SECRET, 10).unwrap(),
            VerifyResult::Invalid
        );
    }

    #[test]
    fn test_shifted_separator_does_not_cross_identities() {
        let codec = codec(86_400);
        let token = codec.mint("b|c", "a", 7, SECRET).unwrap();

        assert_eq!(
            codec.verify(&token, "c", "a|b", SECRET, 7).unwrap(),
            VerifyResult::Invalid
        );
        assert_eq!(
            codec.verify(&token, "b|c", "a", SECRET, 7).unwrap(),
            VerifyResult::Fresh
        );
        assert_ne!(
            codec.mint("a", "b", 7, SECRET).unwrap(),
            codec.mint("", "ab", 7, SECRET).unwrap()
        );
    }

    #[test]
    fn test_window_uses_half_lifetime() {
        let codec = codec(60);
        assert_eq!(codec.window(0), 0);
        assert_eq!(codec.window(29), 0);
        assert_eq!(codec.window(30), 1);
        assert_eq!(codec.window(61), 2);
        assert_eq!(codec.window(-1), -1);
    }

    #[test]
    fn test_verify_result_helpers() {
        assert!(VerifyResult::Fresh.is_valid());
        assert!(VerifyResult::Aging.is_valid());
        assert!(!VerifyResult::Invalid.is_valid());
        assert_eq!(VerifyResult::Aging.tick(), Some(2));
        assert!(matches!(
            VerifyResult::Invalid.into_result(),
            Err(NonceError::VerificationFailed)
        ));
        assert_eq!(
            VerifyResult::Fresh.into_result().unwrap(),
            VerifyResult::Fresh
        );
    }
}
