use super::*;
use crate::state::ProcessSubscriptionState;

fn open_process_subscription(processor: &mut Processor, interrupting: bool) {
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(101), "order-paid", "order-1", interrupting),
    });
}

fn correlate_command(message_key: u64) -> SubscriptionCommand {
    SubscriptionCommand::CorrelateProcessSubscription {
        process_instance_key: key(100),
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
        correlation_key: "order-1".to_string(),
        message_key,
        variables: b"{\"amount\":5}".to_vec(),
        subscription_partition_id: PARTITION_ID,
    }
}

fn opened_command() -> SubscriptionCommand {
    SubscriptionCommand::ProcessSubscriptionOpened {
        process_instance_key: key(100),
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
        subscription_partition_id: PARTITION_ID,
    }
}

#[test]
fn open_stores_opening_subscription_and_sends_open() {
    let (_tx, mut processor, harness, _dir) = test_setup();

    open_process_subscription(&mut processor, true);

    let subscription = process_subscription(&processor, key(101), "order-paid").unwrap();
    assert_eq!(subscription.state, ProcessSubscriptionState::Opening);
    assert_eq!(subscription.subscription_partition_id, PARTITION_ID);
    assert_eq!(subscription.command_sent_time, harness.now());
    assert_eq!(subscription.element_id, "catch-order-paid");
    assert_eq!(processor.process_subscriptions.pending_count(), 1);

    let sent = harness.transport.take();
    assert_eq!(
        sent,
        vec![(
            PARTITION_ID,
            SubscriptionCommand::OpenMessageSubscription {
                process_instance_key: key(100),
                element_instance_key: key(101),
                message_name: "order-paid".to_string(),
                correlation_key: "order-1".to_string(),
                interrupting: true,
            }
        )]
    );
}

#[test]
fn open_existing_subscription_is_ignored() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, true);
    harness.transport.take();

    open_process_subscription(&mut processor, true);

    assert!(harness.transport.take().is_empty());
    assert_eq!(processor.process_subscriptions.pending_count(), 1);
}

#[test]
fn opened_acknowledgment_moves_to_opened() {
    let (_tx, mut processor, _harness, _dir) = test_setup();
    open_process_subscription(&mut processor, true);

    processor.handle_command(opened_command().into());

    let subscription = process_subscription(&processor, key(101), "order-paid").unwrap();
    assert!(subscription.is_opened());
    assert_eq!(processor.process_subscriptions.pending_count(), 0);

    // A repeated acknowledgment changes nothing.
    processor.handle_command(opened_command().into());
    assert!(process_subscription(&processor, key(101), "order-paid")
        .unwrap()
        .is_opened());
}

#[test]
fn correlate_triggers_element_and_acknowledges() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, false);
    processor.handle_command(opened_command().into());
    harness.transport.take();

    processor.handle_command(correlate_command(key(7)).into());

    let triggered = harness.bridge.take_triggered();
    assert_eq!(
        triggered,
        vec![TriggerElementRequest {
            process_instance_key: key(100),
            element_instance_key: key(101),
            element_id: "catch-order-paid".to_string(),
            message_name: "order-paid".to_string(),
            message_key: key(7),
            variables: b"{\"amount\":5}".to_vec(),
            interrupting: false,
        }]
    );
    let sent = harness.transport.take();
    assert_eq!(
        sent,
        vec![(
            PARTITION_ID,
            SubscriptionCommand::AcknowledgeCorrelation {
                process_instance_key: key(100),
                element_instance_key: key(101),
                message_name: "order-paid".to_string(),
                message_key: key(7),
            }
        )]
    );
    // Non-interrupting subscriptions keep listening.
    assert!(process_subscription(&processor, key(101), "order-paid")
        .unwrap()
        .is_opened());
}

#[test]
fn correlate_on_opening_subscription_implies_opened() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, false);
    harness.transport.take();

    processor.handle_command(correlate_command(key(7)).into());

    assert!(process_subscription(&processor, key(101), "order-paid")
        .unwrap()
        .is_opened());
    assert_eq!(processor.process_subscriptions.pending_count(), 0);
    assert_eq!(harness.bridge.take_triggered().len(), 1);
}

#[test]
fn correlate_removes_interrupting_subscription() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, true);
    processor.handle_command(opened_command().into());
    harness.transport.take();

    processor.handle_command(correlate_command(key(7)).into());

    assert!(process_subscription(&processor, key(101), "order-paid").is_none());
    assert_eq!(harness.bridge.take_triggered().len(), 1);
    let sent = harness.transport.take();
    assert_eq!(of_kind(&sent, "acknowledge_correlation").len(), 1);
}

#[test]
fn correlate_without_subscription_is_rejected() {
    let (_tx, mut processor, harness, _dir) = test_setup();

    processor.handle_command(correlate_command(key(7)).into());

    assert!(harness.bridge.take_triggered().is_empty());
    let sent = harness.transport.take();
    assert_eq!(
        sent,
        vec![(
            PARTITION_ID,
            SubscriptionCommand::RejectCorrelation {
                process_instance_key: key(100),
                element_instance_key: key(101),
                message_name: "order-paid".to_string(),
                correlation_key: "order-1".to_string(),
                message_key: key(7),
            }
        )]
    );
}

#[test]
fn correlate_on_closing_subscription_is_rejected() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, true);
    processor.handle_command(opened_command().into());
    processor.handle_command(EngineCommand::CloseProcessSubscription {
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
    });
    harness.transport.take();

    processor.handle_command(correlate_command(key(7)).into());

    assert!(harness.bridge.take_triggered().is_empty());
    let sent = harness.transport.take();
    assert_eq!(of_kind(&sent, "reject_correlation").len(), 1);
    assert!(process_subscription(&processor, key(101), "order-paid")
        .unwrap()
        .is_closing());
}

#[test]
fn close_moves_to_closing_and_sends_close() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, true);
    processor.handle_command(opened_command().into());
    harness.transport.take();
    harness.clock.advance(500);

    for _ in 0..2 {
        processor.handle_command(EngineCommand::CloseProcessSubscription {
            element_instance_key: key(101),
            message_name: "order-paid".to_string(),
        });
    }

    let subscription = process_subscription(&processor, key(101), "order-paid").unwrap();
    assert!(subscription.is_closing());
    assert_eq!(subscription.command_sent_time, harness.now());
    assert_eq!(processor.process_subscriptions.pending_count(), 1);
    // Closing twice sends a single close.
    let sent = harness.transport.take();
    assert_eq!(
        sent,
        vec![(
            PARTITION_ID,
            SubscriptionCommand::CloseMessageSubscription {
                process_instance_key: key(100),
                element_instance_key: key(101),
                message_name: "order-paid".to_string(),
            }
        )]
    );
}

#[test]
fn close_unknown_subscription_is_ignored() {
    let (_tx, mut processor, harness, _dir) = test_setup();

    processor.handle_command(EngineCommand::CloseProcessSubscription {
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
    });

    assert!(harness.transport.take().is_empty());
    assert!(processor.is_running());
}

#[test]
fn close_element_closes_every_subscription_of_the_element() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(101), "order-paid", "order-1", true),
    });
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(101), "order-cancelled", "order-1", true),
    });
    processor.handle_command(EngineCommand::OpenProcessSubscription {
        subscription: open_request(key(100), key(102), "order-paid", "order-1", true),
    });
    harness.transport.take();

    processor.handle_command(EngineCommand::CloseElementSubscriptions {
        element_instance_key: key(101),
    });

    assert!(process_subscription(&processor, key(101), "order-paid")
        .unwrap()
        .is_closing());
    assert!(process_subscription(&processor, key(101), "order-cancelled")
        .unwrap()
        .is_closing());
    assert!(process_subscription(&processor, key(102), "order-paid")
        .unwrap()
        .is_opening());
    let sent = harness.transport.take();
    assert_eq!(of_kind(&sent, "close_message_subscription").len(), 2);
}

#[test]
fn closed_acknowledgment_removes_closing_subscription_only() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, true);
    let closed = SubscriptionCommand::ProcessSubscriptionClosed {
        process_instance_key: key(100),
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
    };

    // Still opening: the acknowledgment is out of order.
    processor.handle_command(closed.clone().into());
    assert!(process_subscription(&processor, key(101), "order-paid").is_some());

    processor.handle_command(EngineCommand::CloseProcessSubscription {
        element_instance_key: key(101),
        message_name: "order-paid".to_string(),
    });
    processor.handle_command(closed.clone().into());

    assert!(process_subscription(&processor, key(101), "order-paid").is_none());
    assert_eq!(processor.process_subscriptions.pending_count(), 0);

    processor.handle_command(closed.into());
    assert!(processor.is_running());
    harness.transport.take();
}

#[test]
fn loopback_handshake_correlates_buffered_message() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    let message_key = publish(&mut processor, publish_request("order-paid", "order-1", 60_000));
    open_process_subscription(&mut processor, true);

    let delivered = processor.deliver_loopback(&harness.transport);

    let kinds: Vec<_> = delivered.iter().map(SubscriptionCommand::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "open_message_subscription",
            "process_subscription_opened",
            "correlate_process_subscription",
            "acknowledge_correlation",
        ]
    );
    let triggered = harness.bridge.take_triggered();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].message_key, message_key);
    assert_eq!(triggered[0].variables, b"{\"name\":\"order-paid\"}".to_vec());

    // Both sides are cleaned up; the message stays buffered.
    assert!(process_subscription(&processor, key(101), "order-paid").is_none());
    assert!(message_subscription(&processor, key(101), "order-paid").is_none());
    assert_eq!(processor.process_subscriptions.pending_count(), 0);
    assert_eq!(buffered_messages(&processor, "order-paid", "order-1"), vec![message_key]);
}

#[test]
fn loopback_close_removes_both_sides() {
    let (_tx, mut processor, harness, _dir) = test_setup();
    open_process_subscription(&mut processor, false);
    processor.deliver_loopback(&harness.transport);
    assert!(message_subscription(&processor, key(101), "order-paid").is_some());

    processor.handle_command(EngineCommand::CloseElementSubscriptions {
        element_instance_key: key(101),
    });
    let delivered = processor.deliver_loopback(&harness.transport);

    let kinds: Vec<_> = delivered.iter().map(SubscriptionCommand::kind).collect();
    assert_eq!(
        kinds,
        vec!["close_message_subscription", "process_subscription_closed"]
    );
    assert!(process_subscription(&processor, key(101), "order-paid").is_none());
    assert!(message_subscription(&processor, key(101), "order-paid").is_none());

    // A late message finds nobody waiting.
    publish(&mut processor, publish_request("order-paid", "order-1", 60_000));
    assert!(processor.deliver_loopback(&harness.transport).is_empty());
    assert!(harness.bridge.take_triggered().is_empty());
}
