use crate::domain::{Transaction, TransactionStatus};
use crate::error::AppError;

/// Single source of truth for which status transitions are legal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionStateMachine;

impl TransactionStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn allowed_targets(from: TransactionStatus) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match from {
            Captured => &[Processing],
            Processing => &[Captured, Settled, Failed],
            Failed => &[Captured],
            Settled => &[],
        }
    }

    pub fn is_transition_allowed(&self, from: TransactionStatus, to: TransactionStatus) -> bool {
        Self::allowed_targets(from).contains(&to)
    }

    /// Moves `transaction` to `target`. A no-op when it is already there.
    ///
    /// `reason` is carried into the error for diagnostics only.
    pub fn transition(
        &self,
        transaction: &mut Transaction,
        target: TransactionStatus,
        reason: &str,
    ) -> Result<(), AppError> {
        let current = transaction.status;
        if current == target {
            return Ok(());
        }

        if !self.is_transition_allowed(current, target) {
            return Err(AppError::InvalidTransition {
                from: current,
                to: target,
                reason: reason.to_string(),
            });
        }

        transaction.status = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use TransactionStatus::*;

    fn tx_in(status: TransactionStatus) -> Transaction {
        let mut tx = Transaction::new(BigDecimal::from(100), None, None, None);
        tx.status = status;
        tx
    }

    #[test]
    fn test_allowed_edges_apply() {
        let machine = TransactionStateMachine::new();
        let edges = [
            (Captured, Processing),
            (Processing, Captured),
            (Processing, Settled),
            (Processing, Failed),
            (Failed, Captured),
        ];
        for (from, to) in edges {
            let mut tx = tx_in(from);
            machine.transition(&mut tx, to, "test").unwrap();
            assert_eq!(tx.status, to, "{} -> {} should be allowed", from, to);
        }
    }

    #[test]
    fn test_every_other_edge_is_rejected_and_leaves_status() {
        let machine = TransactionStateMachine::new();
        for from in TransactionStatus::ALL {
            for to in TransactionStatus::ALL {
                if from == to || machine.is_transition_allowed(from, to) {
                    continue;
                }
                let mut tx = tx_in(from);
                let err = machine.transition(&mut tx, to, "probe").unwrap_err();
                assert!(matches!(
                    err,
                    AppError::InvalidTransition { from: f, to: t, ref reason }
                        if f == from && t == to && reason == "probe"
                ));
                assert_eq!(tx.status, from);
            }
        }
    }

    #[test]
    fn test_same_status_is_noop() {
        let machine = TransactionStateMachine::new();
        let mut tx = tx_in(Settled);
        assert!(machine.transition(&mut tx, Settled, "noop").is_ok());
        assert_eq!(tx.status, Settled);
    }

    #[test]
    fn test_settled_is_terminal() {
        assert!(TransactionStateMachine::allowed_targets(Settled).is_empty());
    }
}
