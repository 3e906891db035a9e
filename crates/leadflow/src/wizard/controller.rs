use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use super::budget::{validate_custom_budget, BudgetError, BudgetInput};
use super::draft::DraftStore;
use super::form::{ApartmentType, FormData, FormError, SubmissionPayload};
use super::price::{self, PriceRange, PriceRangeLookup};
use crate::backend::BackendError;

/// Pause before redirecting after a successful submission so the user can
/// read the confirmation.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(2);

/// Default origin tag when the landing URL carries no `origin` parameter.
pub const DEFAULT_ORIGIN: &str = "Organic";

/// The five wizard steps, in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WizardStep {
    Neighborhood = 1,
    ApartmentType = 2,
    Budget = 3,
    MoveInDate = 4,
    Contact = 5,
}

impl WizardStep {
    pub const ALL: [WizardStep; 5] = [
        WizardStep::Neighborhood,
        WizardStep::ApartmentType,
        WizardStep::Budget,
        WizardStep::MoveInDate,
        WizardStep::Contact,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn title(self) -> &'static str {
        match self {
            WizardStep::Neighborhood => "Choose Neighborhood",
            WizardStep::ApartmentType => "Apartment Type",
            WizardStep::Budget => "Budget",
            WizardStep::MoveInDate => "Move-in Date",
            WizardStep::Contact => "Contact Information",
        }
    }

    pub fn successor(self) -> Option<WizardStep> {
        match self {
            WizardStep::Neighborhood => Some(WizardStep::ApartmentType),
            WizardStep::ApartmentType => Some(WizardStep::Budget),
            WizardStep::Budget => Some(WizardStep::MoveInDate),
            WizardStep::MoveInDate => Some(WizardStep::Contact),
            WizardStep::Contact => None,
        }
    }

    pub fn predecessor(self) -> Option<WizardStep> {
        match self {
            WizardStep::Neighborhood => None,
            WizardStep::ApartmentType => Some(WizardStep::Neighborhood),
            WizardStep::Budget => Some(WizardStep::ApartmentType),
            WizardStep::MoveInDate => Some(WizardStep::Budget),
            WizardStep::Contact => Some(WizardStep::MoveInDate),
        }
    }
}

/// A step's completion report: the fields it produced plus an optional
/// auto-advance override. Advancing is the default; a step passes `false`
/// to keep the user in place (e.g. re-selecting on a revisited step).
#[derive(Debug, Clone, Default)]
pub struct StepData {
    pub fields: FormData,
    pub auto_advance: Option<bool>,
}

impl From<FormData> for StepData {
    fn from(fields: FormData) -> Self {
        Self {
            fields,
            auto_advance: None,
        }
    }
}

/// Terminal submission seam; the production impl posts to the external
/// backend's public client endpoint.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit_client(&self, payload: &SubmissionPayload) -> Result<(), BackendError>;
}

#[async_trait]
impl<S: SubmissionSink + ?Sized> SubmissionSink for Arc<S> {
    async fn submit_client(&self, payload: &SubmissionPayload) -> Result<(), BackendError> {
        (**self).submit_client(payload).await
    }
}

#[async_trait]
impl<L: PriceRangeLookup + ?Sized> PriceRangeLookup for Arc<L> {
    async fn price_range(
        &self,
        neighborhood_id: &str,
        apartment_type: ApartmentType,
    ) -> Result<PriceRange, BackendError> {
        (**self).price_range(neighborhood_id, apartment_type).await
    }
}

impl<D: DraftStore + ?Sized> DraftStore for Arc<D> {
    fn load(&self) -> Option<FormData> {
        (**self).load()
    }
    fn save(&self, form: &FormData) {
        (**self).save(form)
    }
    fn clear(&self) {
        (**self).clear()
    }
}

/// Handle for an in-flight price-range fetch. Tagged with its selection key
/// and a sequence number so a resolution that lands after the user re-chose
/// can be recognized and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRangeRequest {
    seq: u64,
    neighborhood_id: String,
    apartment_type: ApartmentType,
}

impl PriceRangeRequest {
    pub fn neighborhood_id(&self) -> &str {
        &self.neighborhood_id
    }

    pub fn apartment_type(&self) -> ApartmentType {
        self.apartment_type
    }
}

/// Outcome of a manual `next()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextOutcome {
    Advanced(WizardStep),
    Submitted(SubmissionReceipt),
}

/// Successful submission: the draft is gone and the view should redirect to
/// the landing page once the delay elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub client_id: Uuid,
    pub redirect_after: Duration,
}

/// Submission failures, classified for user-facing presentation. The wizard
/// stays on the contact step so the user may retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Incomplete(#[from] FormError),
    #[error("{0}")]
    AlreadyRegistered(String),
    #[error("{0}")]
    Invalid(String),
    #[error("an error occurred while submitting")]
    Failed,
}

/// Drives the five-step lead-capture flow: sequences steps, gates forward
/// navigation on per-step validity, merges step outputs, refreshes the
/// price range when the selection pair changes, and submits at the end.
pub struct StepController<L, D, S> {
    lookup: L,
    drafts: D,
    sink: S,
    origin: String,
    current: WizardStep,
    form: FormData,
    completed: BTreeSet<WizardStep>,
    price_range: Option<PriceRange>,
    loading_price_range: bool,
    fetch_seq: u64,
    budget_input: Option<Arc<dyn BudgetInput>>,
}

impl<L, D, S> StepController<L, D, S>
where
    L: PriceRangeLookup,
    D: DraftStore,
    S: SubmissionSink,
{
    /// Mount the wizard: restore any persisted draft and capture the origin
    /// tag once from the landing URL's query string.
    pub fn new(lookup: L, drafts: D, sink: S, initial_query: Option<&str>) -> Self {
        let form = drafts.load().unwrap_or_default();
        let origin = initial_query
            .map(origin_from_query)
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());

        Self {
            lookup,
            drafts,
            sink,
            origin,
            current: WizardStep::Neighborhood,
            form,
            completed: BTreeSet::new(),
            price_range: None,
            loading_price_range: false,
            fetch_seq: 0,
            budget_input: None,
        }
    }

    pub fn current_step(&self) -> WizardStep {
        self.current
    }

    pub fn form(&self) -> &FormData {
        &self.form
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn price_range(&self) -> Option<&PriceRange> {
        self.price_range.as_ref()
    }

    pub fn is_loading_price_range(&self) -> bool {
        self.loading_price_range
    }

    pub fn is_step_complete(&self, step: WizardStep) -> bool {
        self.completed.contains(&step)
    }

    /// Whether the navigation control may fire `next()`. The view disables
    /// the button on this; `next()` itself assumes the gate held.
    pub fn can_advance(&self) -> bool {
        self.completed.contains(&self.current)
    }

    /// Attach the budget step's live-input accessor while step 3 is
    /// rendered; `next()` pulls the pending value through it.
    pub fn register_budget_input(&mut self, input: Arc<dyn BudgetInput>) {
        self.budget_input = Some(input);
    }

    /// Reactive validity reporting from a step's inputs. Membership in the
    /// completed set is revocable: a previously-valid step that turns
    /// invalid is removed.
    pub fn set_step_completed(&mut self, step: WizardStep, completed: bool) {
        if completed {
            self.completed.insert(step);
        } else {
            self.completed.remove(&step);
        }
    }

    /// A step finished with `data`: merge, mark complete, then auto-advance
    /// unless suppressed. The date step never auto-advances. Completing the
    /// apartment-type step with the selection pair in place starts a tagged
    /// price-range fetch, returned for the caller to drive; the wizard stays
    /// interactive while it is in flight.
    pub fn complete_step(&mut self, step: WizardStep, data: StepData) -> Option<PriceRangeRequest> {
        let StepData {
            fields,
            auto_advance,
        } = data;
        let fetch = self.apply_completion(step, fields);

        let should_advance = auto_advance != Some(false);
        if should_advance && step != WizardStep::MoveInDate {
            if let Some(next) = step.successor() {
                self.current = next;
            }
        }
        fetch
    }

    /// Contact-step keystroke: merge the edit and recompute step-5 validity.
    pub fn edit_contact(&mut self, patch: FormData) {
        self.form.merge(patch);
        self.drafts.save(&self.form);
        let complete = self.form.contact_complete();
        self.set_step_completed(WizardStep::Contact, complete);
    }

    /// Custom budget keystroke/blur: validate against the fetched range and
    /// update step-3 completion. The value itself is only committed at
    /// navigation time, through the registered accessor.
    pub fn edit_custom_budget(&mut self, raw: &str) -> Result<(), BudgetError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            self.set_step_completed(WizardStep::Budget, false);
            return Ok(());
        }

        let value: u32 = match trimmed.parse() {
            Ok(v) => v,
            Err(_) => {
                self.set_step_completed(WizardStep::Budget, false);
                return Err(BudgetError::NotANumber);
            }
        };

        // Without a fetched range there is no floor to enforce; manual
        // entry stays open after lookup exhaustion.
        let result = match &self.price_range {
            Some(range) => validate_custom_budget(value, range),
            None => Ok(()),
        };
        self.set_step_completed(WizardStep::Budget, result.is_ok());
        result
    }

    /// One-click suggested amount: always valid, completes step 3 and
    /// auto-advances.
    pub fn choose_suggested_budget(&mut self, amount: u32) {
        self.complete_step(
            WizardStep::Budget,
            StepData {
                fields: FormData {
                    budget: Some(amount),
                    ..FormData::default()
                },
                auto_advance: Some(true),
            },
        );
    }

    /// Manual forward navigation. On the budget step the pending input value
    /// is pulled through the accessor first, even if no change event fired.
    /// On the final step this merges and submits.
    pub async fn next(&mut self) -> Result<NextOutcome, SubmitError> {
        let step = self.current;

        let mut fields = FormData::default();
        if step == WizardStep::Budget {
            if let Some(input) = &self.budget_input {
                if let Some(value) = input.current_value() {
                    fields.budget = Some(value);
                }
            }
        }
        if let Some(request) = self.apply_completion(step, fields) {
            self.resolve_price_range(request).await;
        }

        match step.successor() {
            Some(next) => {
                self.current = next;
                Ok(NextOutcome::Advanced(next))
            }
            None => {
                let receipt = self.submit().await?;
                Ok(NextOutcome::Submitted(receipt))
            }
        }
    }

    /// Back one step; no-op on the first step.
    pub fn prev(&mut self) {
        if let Some(previous) = self.current.predecessor() {
            self.current = previous;
        }
    }

    fn apply_completion(&mut self, step: WizardStep, fields: FormData) -> Option<PriceRangeRequest> {
        self.form.merge(fields);
        self.drafts.save(&self.form);
        self.completed.insert(step);

        if step == WizardStep::ApartmentType {
            if let Some((neighborhood_id, apartment_type)) = self.form.selection_key() {
                return Some(self.begin_price_range_refresh(neighborhood_id, apartment_type));
            }
        }
        None
    }

    fn begin_price_range_refresh(
        &mut self,
        neighborhood_id: String,
        apartment_type: ApartmentType,
    ) -> PriceRangeRequest {
        self.loading_price_range = true;
        self.price_range = None;
        self.fetch_seq += 1;
        PriceRangeRequest {
            seq: self.fetch_seq,
            neighborhood_id,
            apartment_type,
        }
    }

    /// Run the bounded-retry lookup for a pending fetch and apply the
    /// resolution. Drivers that run the lookup on their own task can call
    /// [`Self::apply_price_range`] with the result instead.
    pub async fn resolve_price_range(&mut self, request: PriceRangeRequest) {
        let result = price::fetch_with_retry(
            &self.lookup,
            request.neighborhood_id(),
            request.apartment_type,
        )
        .await;
        self.apply_price_range(&request, result);
    }

    /// Apply a fetch resolution. A result whose sequence tag has been
    /// superseded is discarded outright; one whose selection key drifted
    /// (the user re-chose while it was in flight) clears the loading flag
    /// without installing stale data.
    pub fn apply_price_range(&mut self, request: &PriceRangeRequest, result: Option<PriceRange>) {
        if request.seq != self.fetch_seq {
            debug!(
                neighborhood_id = request.neighborhood_id(),
                "dropping superseded price range result"
            );
            return;
        }

        let matches_selection = self.form.selection_key().as_ref()
            == Some(&(request.neighborhood_id.clone(), request.apartment_type));
        if matches_selection {
            if result.is_none() {
                warn!(
                    neighborhood_id = request.neighborhood_id(),
                    "price range unavailable, budget entry falls back to manual"
                );
            }
            self.price_range = result;
        } else {
            debug!(
                neighborhood_id = request.neighborhood_id(),
                "dropping stale price range result"
            );
        }
        self.loading_price_range = false;
    }

    async fn submit(&mut self) -> Result<SubmissionReceipt, SubmitError> {
        let payload = self.form.submission_payload(&self.origin)?;

        match self.sink.submit_client(&payload).await {
            Ok(()) => {
                self.drafts.clear();
                Ok(SubmissionReceipt {
                    client_id: payload.client.id,
                    redirect_after: REDIRECT_DELAY,
                })
            }
            Err(BackendError::EmailExists) => Err(SubmitError::AlreadyRegistered(
                "You're already registered with this email! Please proceed to login.".to_string(),
            )),
            Err(BackendError::PhoneExists) => Err(SubmitError::AlreadyRegistered(
                "You're already registered with this phone number! Please proceed to login."
                    .to_string(),
            )),
            Err(BackendError::Validation(message)) => Err(SubmitError::Invalid(message)),
            Err(err) => {
                warn!(%err, "preferences submission failed");
                Err(SubmitError::Failed)
            }
        }
    }
}

/// Extract the `origin` tag from the landing URL's query string.
pub fn origin_from_query(query: &str) -> String {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "origin")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_defaults_to_organic() {
        assert_eq!(origin_from_query(""), "Organic");
        assert_eq!(origin_from_query("utm=123"), "Organic");
        assert_eq!(origin_from_query("?origin=Referral&utm=123"), "Referral");
        assert_eq!(origin_from_query("origin="), "Organic");
    }

    #[test]
    fn steps_are_fixed_and_ordered() {
        let ids: Vec<u8> = WizardStep::ALL.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(WizardStep::Neighborhood.predecessor(), None);
        assert_eq!(WizardStep::Contact.successor(), None);
        assert_eq!(WizardStep::Budget.title(), "Budget");
    }
}
