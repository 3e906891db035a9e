//! Session cookie codec.
//!
//! The session travels as `<base64url(json)>.<base64url(hmac-sha256)>`,
//! signed with a server-held secret. Tampered or malformed values decode to
//! no session. Payload contents are readable by the cookie holder; the
//! signature only prevents forgery.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::session::AuthSession;

type HmacSha256 = Hmac<Sha256>;

/// Cookie name shared by the portal and the auth endpoints.
pub const SESSION_COOKIE: &str = "auth-session";
/// Seven days, matching the refresh-token lifetime granted by the provider.
pub const SESSION_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 7;

/// Serialize and sign a session into a cookie-safe value.
pub fn seal(session: &AuthSession, key: &[u8]) -> String {
    let payload = serde_json::to_vec(session).expect("session serializes");
    let encoded = URL_SAFE_NO_PAD.encode(&payload);

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(encoded.as_bytes());
    let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{encoded}.{tag}")
}

/// Verify and decode a sealed value. Any mismatch (missing tag, bad
/// signature, unparseable payload) yields `None`; a garbage cookie is the
/// same as no cookie.
pub fn open(value: &str, key: &[u8]) -> Option<AuthSession> {
    let (encoded, tag) = value.rsplit_once('.')?;
    let tag_bytes = URL_SAFE_NO_PAD.decode(tag).ok()?;

    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(encoded.as_bytes());
    mac.verify_slice(&tag_bytes).ok()?;

    let payload = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    serde_json::from_slice(&payload).ok()
}

/// `Set-Cookie` value installing the session.
pub fn set_cookie_header(session: &AuthSession, key: &[u8], secure: bool) -> String {
    let sealed = seal(session, key);
    let secure_attr = if secure { " Secure;" } else { "" };
    format!(
        "{SESSION_COOKIE}={sealed}; HttpOnly; Path=/;{secure_attr} SameSite=Strict; \
         Max-Age={SESSION_MAX_AGE_SECS}"
    )
}

/// `Set-Cookie` value removing the session.
pub fn clear_cookie_header() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Strict; Max-Age=0")
}

/// Pull and open the session from a request's `Cookie` header.
pub fn session_from_cookie_header(header: &str, key: &[u8]) -> Option<AuthSession> {
    header
        .split(';')
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| open(value, key))
}
