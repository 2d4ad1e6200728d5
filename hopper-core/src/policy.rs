//! Retry-vs-dead-letter decision.

/// What to do with a message that just failed processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reject toward the wait/retry path; the message gets another attempt.
    Retry,
    /// The retry budget is spent; the message belongs in the DLQ.
    DeadLetter,
}

/// Map a cumulative failure count to a decision.
///
/// A message that has already failed `max_retries` times is exiled on the
/// boundary; there is no extra attempt beyond the configured budget.
pub fn decide(retry_count: u64, max_retries: u64) -> RetryDecision {
    if retry_count < max_retries {
        RetryDecision::Retry
    } else {
        RetryDecision::DeadLetter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_below_budget() {
        assert_eq!(decide(0, 3), RetryDecision::Retry);
        assert_eq!(decide(2, 3), RetryDecision::Retry);
    }

    #[test]
    fn dead_letters_on_the_boundary() {
        assert_eq!(decide(3, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn dead_letters_past_the_boundary() {
        // An extra failure record after exhaustion does not change the outcome.
        assert_eq!(decide(4, 3), RetryDecision::DeadLetter);
        assert_eq!(decide(u64::MAX, 3), RetryDecision::DeadLetter);
    }

    #[test]
    fn zero_budget_never_retries() {
        assert_eq!(decide(0, 0), RetryDecision::DeadLetter);
    }
}
