//! Core library for the apartment-rental referral service: the lead-capture
//! wizard state machine, the authenticated portal actions, and the trait
//! seams for the external REST backend and the identity provider.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod portal;
pub mod ratelimit;
pub mod telemetry;
pub mod wizard;
