//! Queue and exchange naming convention.
//!
//! Every component derives object names from the main queue name through this
//! module, so the suffix convention is defined exactly once.

pub const DLQ_SUFFIX: &str = ".dlq";
pub const WAIT_SUFFIX: &str = ".wait";
pub const SYSTEM_PREFIX: &str = "amq.";

/// Role a queue plays in the retry pipeline, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Main,
    Wait,
    Dlq,
    /// Broker-owned `amq.*` queues, excluded from grouping and setup.
    System,
}

/// Dead-letter queue name for a main queue.
pub fn dlq_queue(queue: &str) -> String {
    format!("{queue}{DLQ_SUFFIX}")
}

/// Wait (delay) queue name for a main queue.
pub fn wait_queue(queue: &str) -> String {
    format!("{queue}{WAIT_SUFFIX}")
}

/// Retry exchange name for a main queue.
pub fn retry_exchange(queue: &str) -> String {
    format!("{queue}.retry")
}

/// Wait exchange name for a main queue.
pub fn wait_exchange(queue: &str) -> String {
    format!("{queue}.wait.exchange")
}

/// Classify a queue name by the suffix convention.
pub fn classify(name: &str) -> QueueRole {
    if name.starts_with(SYSTEM_PREFIX) {
        QueueRole::System
    } else if name.ends_with(DLQ_SUFFIX) {
        QueueRole::Dlq
    } else if name.ends_with(WAIT_SUFFIX) {
        QueueRole::Wait
    } else {
        QueueRole::Main
    }
}

/// Strip the role suffix, returning the main queue name.
pub fn base_name(name: &str) -> &str {
    name.strip_suffix(DLQ_SUFFIX)
        .or_else(|| name.strip_suffix(WAIT_SUFFIX))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_all_names_from_main_queue() {
        assert_eq!(dlq_queue("orders"), "orders.dlq");
        assert_eq!(wait_queue("orders"), "orders.wait");
        assert_eq!(retry_exchange("orders"), "orders.retry");
        assert_eq!(wait_exchange("orders"), "orders.wait.exchange");
    }

    #[test]
    fn classifies_by_suffix() {
        assert_eq!(classify("orders"), QueueRole::Main);
        assert_eq!(classify("orders.dlq"), QueueRole::Dlq);
        assert_eq!(classify("orders.wait"), QueueRole::Wait);
        assert_eq!(classify("amq.gen-x7Z"), QueueRole::System);
    }

    #[test]
    fn base_name_inverts_derivation() {
        assert_eq!(base_name("orders.dlq"), "orders");
        assert_eq!(base_name("orders.wait"), "orders");
        assert_eq!(base_name("orders"), "orders");
    }

    #[test]
    fn dotted_queue_names_round_trip() {
        assert_eq!(base_name(&dlq_queue("billing.invoices")), "billing.invoices");
        assert_eq!(classify("billing.invoices.wait"), QueueRole::Wait);
    }
}
