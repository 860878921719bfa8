use super::*;

#[test]
fn expire_removes_only_messages_past_deadline() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    let short = publish(&mut processor, publish_request("order-paid", "order-1", 1_000));
    let long = publish(&mut processor, publish_request("order-paid", "order-1", 60_000));

    // A deadline equal to now is not yet before now.
    harness.clock.advance(1_000);
    assert_eq!(processor.expire_messages(harness.now()).unwrap(), 0);

    harness.clock.advance(1);
    assert_eq!(processor.expire_messages(harness.now()).unwrap(), 1);

    assert!(stored_message(&processor, short).is_none());
    assert_eq!(buffered_messages(&processor, "order-paid", "order-1"), vec![long]);
}

#[test]
fn expire_purges_correlation_ledger() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_message_subscription(&mut processor, key(100), key(101), "order-paid", "order-1", true);
    let message_key = publish(&mut processor, publish_request("order-paid", "order-1", 1_000));
    harness.clock.advance(2_000);

    processor.expire_messages(harness.now()).unwrap();

    assert!(!read(&processor, |txn| processor
        .messages
        .exist_message_correlation(txn, message_key, key(100))
        .unwrap()));
}

#[test]
fn expire_respects_batch_limit() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    for _ in 0..150 {
        publish(&mut processor, publish_request("order-paid", "order-1", 1_000));
    }
    harness.clock.advance(2_000);

    assert_eq!(processor.expire_messages(harness.now()).unwrap(), 100);
    assert_eq!(processor.expire_messages(harness.now()).unwrap(), 50);
    assert_eq!(processor.expire_messages(harness.now()).unwrap(), 0);
    assert!(buffered_messages(&processor, "order-paid", "order-1").is_empty());
}

#[test]
fn due_sweeps_follow_their_intervals() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    // The first call runs every sweep.
    processor.run_due_sweeps();
    let message_key = publish(&mut processor, publish_request("order-paid", "order-1", 1_000));

    harness.clock.advance(2_000);
    processor.run_due_sweeps();
    assert!(stored_message(&processor, message_key).is_some());

    harness.clock.advance(60_000);
    processor.run_due_sweeps();
    assert!(stored_message(&processor, message_key).is_none());
    assert!(processor.is_running());
}

#[test]
fn unacknowledged_correlation_is_resent_after_timeout() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_message_subscription(&mut processor, key(100), key(101), "order-paid", "order-1", false);
    let message_key = publish(&mut processor, publish_request("order-paid", "order-1", 600_000));
    let original = of_kind(&harness.transport.take(), "correlate_process_subscription");

    harness.clock.advance(RETRY_TIMEOUT_MS);
    assert_eq!(processor.resend_pending_correlations(harness.now()).unwrap(), 0);

    harness.clock.advance(1);
    assert_eq!(processor.resend_pending_correlations(harness.now()).unwrap(), 1);

    let resent = harness.transport.take();
    assert_eq!(resent, original);
    let subscription = message_subscription(&processor, key(101), "order-paid").unwrap();
    assert_eq!(subscription.command_sent_time, Some(harness.now()));
    assert_eq!(subscription.message_key, Some(message_key));

    // The retry moved the schedule forward.
    assert_eq!(processor.resend_pending_correlations(harness.now()).unwrap(), 0);
}

#[test]
fn acknowledged_correlation_is_not_resent() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_message_subscription(&mut processor, key(100), key(101), "order-paid", "order-1", false);
    let message_key = publish(&mut processor, publish_request("order-paid", "order-1", 600_000));
    processor.handle_command(
        SubscriptionCommand::AcknowledgeCorrelation {
            process_instance_key: key(100),
            element_instance_key: key(101),
            message_name: "order-paid".to_string(),
            message_key,
        }
        .into(),
    );
    harness.transport.take();

    harness.clock.advance(RETRY_TIMEOUT_MS * 2);

    assert_eq!(processor.resend_pending_correlations(harness.now()).unwrap(), 0);
    assert!(harness.transport.take().is_empty());
}

#[test]
fn opening_subscription_resends_open() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(101), "order-paid", "order-1", true),
    });
    let original = harness.transport.take();
    let opened_at = harness.now();

    harness.clock.advance(RETRY_TIMEOUT_MS + 1);
    assert_eq!(
        processor
            .resend_pending_process_subscriptions(harness.now())
            .unwrap(),
        1
    );
    assert_eq!(harness.transport.take(), original);

    // Only the in-memory schedule moves.
    assert_eq!(
        process_subscription(&processor, key(101), "order-paid")
            .unwrap()
            .command_sent_time,
        opened_at
    );
    assert_eq!(
        processor
            .resend_pending_process_subscriptions(harness.now())
            .unwrap(),
        0
    );
}

#[test]
fn closing_subscription_resends_close() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(101), "order-paid", "order-1", true),
    });
    processor.deliver_loopback(&harness.transport);
    processor.handle_command(EngineCommand::CloseProcessSubscription {
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
    });
    let original = harness.transport.take();
    assert_eq!(of_kind(&original, "close_message_subscription").len(), 1);

    harness.clock.advance(RETRY_TIMEOUT_MS + 1);
    assert_eq!(
        processor
            .resend_pending_process_subscriptions(harness.now())
            .unwrap(),
        1
    );

    assert_eq!(harness.transport.take(), original);
}

#[test]
fn opened_subscription_is_not_resent() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(101), "order-paid", "order-1", true),
    });
    processor.deliver_loopback(&harness.transport);

    harness.clock.advance(RETRY_TIMEOUT_MS * 2);

    assert_eq!(
        processor
            .resend_pending_process_subscriptions(harness.now())
            .unwrap(),
        0
    );
    assert!(harness.transport.take().is_empty());
}
