//! Portal-facing actions: passwordless login, preference submission, and the
//! authenticated option endpoints backing the client portal.

pub mod actions;

pub use actions::{ActionError, PortalService, PreferencesSubmission};
