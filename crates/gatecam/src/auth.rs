//! HTTP Basic authentication for the externally-exposed server.
//!
//! The username is the camera or device name, the password its access secret.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Realm announced in `WWW-Authenticate` challenges
pub const REALM: &str = "Restricted";

pub fn challenge() -> String {
    format!("Basic realm=\"{}\"", REALM)
}

/// Decode a `Basic` Authorization header into (username, password)
pub fn parse_basic(header_value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Check an Authorization header against the expected credentials.
///
/// A missing secret never authenticates.
pub fn validate_basic(header_value: Option<&str>, username: &str, secret: Option<&str>) -> bool {
    let (Some(header_value), Some(secret)) = (header_value, secret) else {
        return false;
    };
    let Some((user, password)) = parse_basic(header_value) else {
        return false;
    };
    // Evaluate both comparisons to keep timing independent of which one fails
    let user_ok = constant_time_eq(user.as_bytes(), username.as_bytes());
    let password_ok = constant_time_eq(password.as_bytes(), secret.as_bytes());
    user_ok & password_ok
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
