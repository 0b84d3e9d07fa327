//! Signed session tokens and passcode hashing (§6 "Signed token format",
//! §3 `passcode-hash`).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle_compare::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_SALT: &str = "session";

const ALPHANUMERIC: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_-";

/// 22 random characters, the front half of the session id minted by `POST /bot`.
pub fn generate_random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHANUMERIC.len());
            ALPHANUMERIC[idx] as char
        })
        .collect()
}

fn salted_key(salt: &str, secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

fn hmac_digest(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// `<value>--<base64(HMAC-SHA256(SHA256(salt+secret), value))>`, base64
/// using the `-_` altchars (URL-safe, unpadded).
pub fn sign_value(value: &str, salt: &str, secret: &str) -> String {
    let key = salted_key(salt, secret);
    let digest = hmac_digest(&key, value.as_bytes());
    format!("{value}--{}", URL_SAFE_NO_PAD.encode(digest))
}

pub fn validate_signed(token: &str, salt: &str, secret: &str) -> Option<String> {
    let (value, signature) = token.rsplit_once("--")?;
    let expected = sign_value(value, salt, secret);
    if constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        Some(value.to_string())
    } else {
        let _ = signature;
        None
    }
}

/// A fresh session id: 22 random chars, HMAC-signed under the session salt.
pub fn mint_session_id(secret: &str) -> String {
    let value = generate_random_string(22);
    sign_value(&value, SESSION_SALT, secret)
}

const HASH_ITERATIONS: u32 = 200_000;

/// Iterated HMAC-SHA256 passcode hashing (PBKDF2-HMAC-SHA256), stored as
/// `sha256$<iterations>$<salt>$<b64 hash>` (§3 `passcode-hash`). The
/// per-round digest is carried as raw bytes throughout — never routed
/// through a `String`, which would corrupt it on invalid UTF-8.
pub fn hash_passcode(passcode: &str, salt: Option<&str>) -> (String, String) {
    let salt = salt.map(str::to_string).unwrap_or_else(|| generate_random_string(32));
    let mut block = salt.as_bytes().to_vec();
    block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac_digest(passcode.as_bytes(), &block);
    let mut result = u.clone();
    for _ in 1..HASH_ITERATIONS {
        u = hmac_digest(passcode.as_bytes(), &u);
        for (r, u_byte) in result.iter_mut().zip(u.iter()) {
            *r ^= u_byte;
        }
    }

    let encoded = URL_SAFE_NO_PAD.encode(&result);
    (
        format!("sha256${HASH_ITERATIONS}${salt}${encoded}"),
        salt,
    )
}

pub fn verify_passcode(passcode: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(4, '$');
    let (Some(_algo), Some(_iterations), Some(salt), Some(_hash)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (recomputed, _) = hash_passcode(passcode, Some(salt));
    constant_time_eq(recomputed.as_bytes(), stored.as_bytes())
}

/// Minimal constant-time byte comparison (no extra crate dependency).
mod subtle_compare {
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut diff = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_validate_round_trip() {
        let token = sign_value("abc", SESSION_SALT, "s");
        assert_eq!(validate_signed(&token, SESSION_SALT, "s").as_deref(), Some("abc"));
    }

    #[test]
    fn validate_rejects_tampered_token() {
        let mut token = sign_value("abc", SESSION_SALT, "s");
        token.push('x');
        assert!(validate_signed(&token, SESSION_SALT, "s").is_none());
    }

    #[test]
    fn mint_session_id_matches_shape() {
        let sid = mint_session_id("s");
        let re = regex::Regex::new(r"^[A-Za-z0-9_-]{22}--[A-Za-z0-9_-]{43}$").unwrap();
        assert!(re.is_match(&sid), "sid was {sid}");
    }

    #[test]
    fn passcode_hash_round_trips() {
        let (hash, _salt) = hash_passcode("hunter12", None);
        assert!(verify_passcode("hunter12", &hash));
        assert!(!verify_passcode("wrong", &hash));
    }
}
