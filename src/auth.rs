//! Caller identity and password hashing.
//!
//! Stored hashes use the `pbkdf2_sha256$<iterations>$<salt>$<hex digest>`
//! layout so the iteration count can be raised without invalidating old
//! hashes.

use anyhow::Result;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use uuid::Uuid;

use crate::db::models::User;

const ALGORITHM: &str = "pbkdf2_sha256";

// ---------------------------------------------------------------------------
// Caller
// ---------------------------------------------------------------------------

/// The identity a request acts as. Resolved once per request and passed
/// explicitly into every handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Caller {
    Anonymous,
    User(User),
}

impl Caller {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::User(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Caller::User(user) => Some(user),
            Caller::Anonymous => None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user().map(|u| u.id)
    }
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str, iterations: u32) -> Result<String> {
    anyhow::ensure!(iterations > 0, "password hashing needs at least one iteration");
    let salt = Uuid::new_v4().simple().to_string();
    let digest = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), iterations);
    Ok(format!(
        "{ALGORITHM}${iterations}${salt}${}",
        hex::encode(digest)
    ))
}

/// Returns `false` for malformed hashes instead of erroring; a corrupt row
/// simply cannot be logged into.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(ALGORITHM), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    let (Ok(iterations), Ok(expected)) = (iterations.parse::<u32>(), hex::decode(expected)) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }

    let digest = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), iterations);
    constant_time_eq(&digest, &expected)
}

/// PBKDF2-HMAC-SHA256 with a single 32-byte output block.
fn pbkdf2_sha256(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn pbkdf2_matches_known_vectors() {
        let digest = pbkdf2_sha256(b"password", b"salt", 1);
        assert_eq!(
            hex::encode(digest),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );

        let digest = pbkdf2_sha256(b"passwd", b"salt", 1);
        assert_eq!(
            hex::encode(digest),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );

        let digest = pbkdf2_sha256(b"password", b"salt", 4096);
        assert_eq!(
            hex::encode(digest),
            "c5e478d59288c841aa530db6845c4c8d962893a001ce4e11a4963873aa98134a"
        );
    }

    #[test]
    fn zero_iterations_are_rejected() {
        assert!(hash_password("pass123", 0).is_err());
    }

    #[test]
    fn hash_then_verify() {
        let encoded = hash_password("pass123", 10).unwrap();
        assert!(encoded.starts_with("pbkdf2_sha256$10$"));
        assert!(verify_password("pass123", &encoded));
        assert!(!verify_password("pass124", &encoded));
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same", 2).unwrap();
        let b = hash_password("same", 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "md5$1$salt$abcd"));
        assert!(!verify_password("x", "pbkdf2_sha256$zero$salt$abcd"));
        assert!(!verify_password("x", "pbkdf2_sha256$0$salt$abcd"));
        assert!(!verify_password("x", "pbkdf2_sha256$1$salt$nothex"));
    }

    #[test]
    fn caller_accessors() {
        let user = User {
            id: 7,
            username: "grower".into(),
            date_joined: Utc::now(),
        };
        assert!(!Caller::Anonymous.is_authenticated());
        assert_eq!(Caller::Anonymous.user_id(), None);

        let caller = Caller::User(user);
        assert!(caller.is_authenticated());
        assert_eq!(caller.user_id(), Some(7));
    }
}
