//! Session handling and authenticated-request plumbing: the signed session
//! cookie, the identity-provider seam, and the refresh-and-retry executor.

pub mod cookie;
pub mod executor;
pub mod provider;
pub mod session;

pub use cookie::{
    clear_cookie_header, open, seal, session_from_cookie_header, set_cookie_header,
    SESSION_COOKIE, SESSION_MAX_AGE_SECS,
};
pub use executor::{execute_with_refresh, AuthExecuteError};
pub use provider::{
    HttpIdentityProvider, IdentityProvider, ProviderError, TokenRefresher, TokenSet,
    VerifiedLogin, SMS_SEND_TIMEOUT,
};
pub use session::{AuthSession, InMemorySessionStore, SessionStore, User};
