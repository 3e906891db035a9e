use super::price::PriceRange;

/// Step between suggested budget amounts.
const SUGGESTION_STRIDE: u32 = 500;
/// At most five intermediate suggestions before the range maximum.
const MAX_SUGGESTIONS: usize = 5;

/// Live access to the budget step's uncommitted input. Navigation pulls the
/// pending value through this capability instead of reaching into the view,
/// so typing a number and pressing "Next" works without an intervening
/// change event.
pub trait BudgetInput: Send + Sync {
    fn current_value(&self) -> Option<u32>;
}

/// Precomputed amounts offered as one-click choices: the range minimum,
/// $500 strides below the maximum, then the maximum itself.
pub fn budget_options(range: &PriceRange) -> Vec<u32> {
    let mut options = vec![range.min];
    let mut current = range.min + SUGGESTION_STRIDE;
    while current < range.max && options.len() < MAX_SUGGESTIONS {
        options.push(current);
        current += SUGGESTION_STRIDE;
    }
    if options.last() != Some(&range.max) {
        options.push(range.max);
    }
    options
}

/// Custom-entry policy: any integer at or above the fetched minimum is
/// accepted. Manual entries above the range maximum are allowed.
pub fn validate_custom_budget(value: u32, range: &PriceRange) -> Result<(), BudgetError> {
    if value < range.min {
        return Err(BudgetError::BelowMinimum { minimum: range.min });
    }
    Ok(())
}

/// Guidance copy shown under the custom input when an entry falls below the
/// market floor for the selected neighborhood and apartment size.
pub fn below_minimum_message(minimum: u32, neighborhood: &str, readable_type: &str) -> String {
    format!(
        "Most properties in {neighborhood} for a {readable_type} start at ${minimum}. \
         If that doesn't fit your budget, we might not be the best option."
    )
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("amounts below the ${minimum} minimum are not available")]
    BelowMinimum { minimum: u32 },
    #[error("please enter a valid number")]
    NotANumber,
}
