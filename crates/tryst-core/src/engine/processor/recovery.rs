use std::ops::ControlFlow;

use super::*;

impl Processor {
    /// Rebuild in-memory state from storage on startup.
    ///
    /// The retry schedule of process subscriptions is not persisted; every
    /// subscription still OPENING or CLOSING is scheduled again at its
    /// stored sent time, so overdue commands are resent by the next sweep.
    pub(super) fn recover(&mut self) {
        let storage = Arc::clone(&self.storage);
        let txn = Transaction::begin(storage.as_ref());

        let pending_process_subscriptions = match self.process_subscriptions.recover(&txn) {
            Ok(count) => count,
            Err(e) => {
                self.halt(&e);
                return;
            }
        };

        let mut pending_correlations = 0usize;
        let counted = self
            .subscriptions
            .visit_subscription_before(&txn, i64::MAX, |subscription| {
                if subscription.correlating {
                    pending_correlations += 1;
                }
                ControlFlow::Continue(())
            });
        if let Err(e) = counted {
            self.halt(&e);
            return;
        }

        info!(
            partition_id = self.partition_id,
            pending_process_subscriptions,
            pending_correlations,
            "recovery complete"
        );
    }
}
