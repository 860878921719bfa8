use std::ops::ControlFlow;

use super::process_handlers::{close_command, open_command};
use super::*;
use crate::engine::partition::decode_partition_id;

impl Processor {
    /// Run each periodic sweep whose interval has elapsed.
    pub(super) fn run_due_sweeps(&mut self) {
        let now = self.now();

        let ttl_interval = self.correlation.message_ttl_check_interval_ms as i64;
        if now.saturating_sub(self.last_ttl_check) >= ttl_interval {
            self.last_ttl_check = now;
            match self.expire_messages(now) {
                Ok(0) => {}
                Ok(expired) => debug!(expired, "expired messages removed"),
                Err(e) => {
                    self.halt(&e);
                    return;
                }
            }
        }

        let check_interval = self.correlation.subscription_check_interval_ms as i64;
        if now.saturating_sub(self.last_subscription_check) >= check_interval {
            self.last_subscription_check = now;
            let result = self
                .resend_pending_correlations(now)
                .and_then(|_| self.resend_pending_process_subscriptions(now));
            self.check(result.map(|_| ()));
        }
    }

    /// Remove up to `message_expiry_batch_limit` messages whose deadline
    /// is before `now`. Returns the number removed.
    pub(super) fn expire_messages(&mut self, now: i64) -> StorageResult<usize> {
        let limit = self.correlation.message_expiry_batch_limit;
        self.in_transaction(|this, txn| {
            let mut expired = Vec::new();
            this.messages
                .visit_messages_with_deadline_before(txn, now, |_, message_key| {
                    if expired.len() >= limit {
                        return ControlFlow::Break(());
                    }
                    expired.push(message_key);
                    ControlFlow::Continue(())
                })?;
            for message_key in &expired {
                this.messages.remove(txn, *message_key)?;
            }
            Ok(expired.len())
        })
    }

    /// Resend correlate commands that were not acknowledged within the
    /// retry timeout. Returns the number resent.
    pub(super) fn resend_pending_correlations(&mut self, now: i64) -> StorageResult<usize> {
        let deadline = now.saturating_sub(self.correlation.subscription_retry_timeout_ms as i64);
        self.in_transaction(|this, txn| {
            let mut pending = Vec::new();
            this.subscriptions
                .visit_subscription_before(txn, deadline, |subscription| {
                    if subscription.correlating {
                        pending.push(subscription.clone());
                    }
                    ControlFlow::Continue(())
                })?;

            let mut resent = 0;
            for subscription in &pending {
                let Some(message_key) = subscription.message_key else {
                    continue;
                };
                warn!(
                    element_instance_key = subscription.element_instance_key,
                    message_key,
                    "correlation not acknowledged, resending"
                );
                this.send(
                    decode_partition_id(subscription.process_instance_key),
                    SubscriptionCommand::CorrelateProcessSubscription {
                        process_instance_key: subscription.process_instance_key,
                        element_instance_key: subscription.element_instance_key,
                        message_name: subscription.message_name.clone(),
                        correlation_key: subscription.correlation_key.clone(),
                        message_key,
                        variables: subscription.message_variables.clone(),
                        subscription_partition_id: this.partition_id,
                    },
                );
                this.subscriptions.update_sent_time(txn, subscription, now)?;
                resent += 1;
            }
            Ok(resent)
        })
    }

    /// Resend OPEN or CLOSE for process subscriptions still waiting for an
    /// acknowledgment after the retry timeout. Returns the number resent.
    pub(super) fn resend_pending_process_subscriptions(&mut self, now: i64) -> StorageResult<usize> {
        let deadline = now.saturating_sub(self.correlation.subscription_retry_timeout_ms as i64);
        self.in_transaction(|this, txn| {
            let mut pending = Vec::new();
            this.process_subscriptions
                .visit_subscription_before(txn, deadline, |subscription| {
                    pending.push(subscription.clone());
                    ControlFlow::Continue(())
                })?;

            let mut resent = 0;
            for subscription in &pending {
                let command = if subscription.is_opening() {
                    open_command(subscription)
                } else if subscription.is_closing() {
                    close_command(subscription)
                } else {
                    continue;
                };
                warn!(
                    element_instance_key = subscription.element_instance_key,
                    kind = command.kind(),
                    "subscription command not acknowledged, resending"
                );
                this.send(subscription.subscription_partition_id, command);
                this.process_subscriptions
                    .update_sent_time_in_transaction(txn, subscription, now);
                resent += 1;
            }
            Ok(resent)
        })
    }
}
