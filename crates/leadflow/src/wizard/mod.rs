//! The lead-capture wizard: a five-step flow with validation-gated
//! navigation, a price-range dependency between the apartment-type and
//! budget steps, and a terminal submission to the external backend.

pub mod budget;
pub mod controller;
pub mod draft;
pub mod form;
pub mod price;

pub use budget::{budget_options, validate_custom_budget, BudgetError, BudgetInput};
pub use controller::{
    origin_from_query, NextOutcome, PriceRangeRequest, StepController, StepData,
    SubmissionReceipt, SubmissionSink, SubmitError, WizardStep, DEFAULT_ORIGIN, REDIRECT_DELAY,
};
pub use draft::{DraftStore, InMemoryDraftStore, DRAFT_STORAGE_KEY};
pub use form::{
    is_e164, is_valid_email, sanitize_phone_number, ApartmentType, ClientPayload, FormData,
    FormError, PreferencesPayload, SubmissionPayload, TourType, MAX_NOTES,
};
pub use price::{fetch_with_retry, PriceRange, PriceRangeLookup};
