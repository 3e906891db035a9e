use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::form::ApartmentType;
use crate::backend::BackendError;

/// Market range for a (neighborhood, apartment type) pair. `available`
/// signals whether any inventory currently matches the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: u32,
    pub max: u32,
    pub available: bool,
}

/// Async dependency resolving the budget step's price range.
#[async_trait]
pub trait PriceRangeLookup: Send + Sync {
    async fn price_range(
        &self,
        neighborhood_id: &str,
        apartment_type: ApartmentType,
    ) -> Result<PriceRange, BackendError>;
}

const MAX_ATTEMPTS: usize = 3;
/// Oldest-first backoff schedule: the first retry waits longest. The tail
/// entry only comes into play if the attempt budget is ever raised.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(3),
    Duration::from_secs(2),
    Duration::from_secs(1),
];

/// Fetch with bounded retry. Exhaustion yields `None`; the caller treats the
/// range as absent and lets the user type a budget manually.
pub async fn fetch_with_retry<L: PriceRangeLookup + ?Sized>(
    lookup: &L,
    neighborhood_id: &str,
    apartment_type: ApartmentType,
) -> Option<PriceRange> {
    for attempt in 0..MAX_ATTEMPTS {
        match lookup.price_range(neighborhood_id, apartment_type).await {
            Ok(range) => return Some(range),
            Err(err) => {
                warn!(
                    neighborhood_id,
                    apartment_type = apartment_type.wire_name(),
                    attempt = attempt + 1,
                    %err,
                    "price range lookup failed"
                );
                if attempt + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(BACKOFF[attempt]).await;
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyLookup {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    #[async_trait]
    impl PriceRangeLookup for FlakyLookup {
        async fn price_range(
            &self,
            _neighborhood_id: &str,
            _apartment_type: ApartmentType,
        ) -> Result<PriceRange, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(PriceRange {
                    min: 1800,
                    max: 2400,
                    available: true,
                })
            } else {
                Err(BackendError::Transport("connection refused".to_string()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_failures() {
        let lookup = FlakyLookup {
            calls: AtomicUsize::new(0),
            succeed_on: usize::MAX,
        };
        let result = fetch_with_retry(&lookup, "d1", ApartmentType::OneBed).await;
        assert!(result.is_none());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn second_attempt_success_makes_exactly_two_calls() {
        let lookup = FlakyLookup {
            calls: AtomicUsize::new(0),
            succeed_on: 2,
        };
        let result = fetch_with_retry(&lookup, "d1", ApartmentType::OneBed).await;
        assert_eq!(
            result,
            Some(PriceRange {
                min: 1800,
                max: 2400,
                available: true,
            })
        );
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }
}
