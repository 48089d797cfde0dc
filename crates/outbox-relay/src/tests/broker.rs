//! BrokerSender acknowledgement protocol.

use super::harness::{message, MockProducer, ProduceBehavior};
use crate::{BrokerRecord, BrokerSender, MessageSender, SendError};
use outbox_core::{Headers, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn batch(ids: &[i64]) -> Vec<Message> {
    ids.iter().copied().map(message).collect()
}

#[tokio::test(start_paused = true)]
async fn all_acknowledged_is_success() {
    let producer = MockProducer::new(ProduceBehavior::Ack(Duration::from_millis(5)));
    let sender = BrokerSender::new(producer.clone());

    let result = sender
        .send_message(&CancellationToken::new(), &batch(&[1, 2, 3]))
        .await;

    assert_eq!(result, Ok(()));
    assert_eq!(producer.produced().len(), 3);
    assert_eq!(producer.purges(), 1);
}

#[tokio::test(start_paused = true)]
async fn record_carries_message_fields() {
    let producer = MockProducer::acking();
    let sender = BrokerSender::new(producer.clone());

    sender
        .send_message(&CancellationToken::new(), &batch(&[7]))
        .await
        .unwrap();

    assert_eq!(
        producer.produced(),
        vec![BrokerRecord {
            topic: "orders".to_string(),
            key: b"key-7".to_vec(),
            headers: Headers::new().with("seq", "7"),
            payload: b"payload-7".to_vec(),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn empty_batch_is_success_without_producing() {
    let producer = MockProducer::acking();
    let sender = BrokerSender::new(producer.clone());

    assert_eq!(
        sender.send_message(&CancellationToken::new(), &[]).await,
        Ok(())
    );
    assert!(producer.log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_reports_hit_the_deadline() {
    let producer = MockProducer::acking();
    producer.queue(ProduceBehavior::Ack(Duration::ZERO));
    producer.queue(ProduceBehavior::Silent);
    let sender = BrokerSender::new(producer.clone()).with_max_wait(Duration::from_millis(100));

    let started = tokio::time::Instant::now();
    let result = sender
        .send_message(&CancellationToken::new(), &batch(&[1, 2]))
        .await;

    assert_eq!(
        result,
        Err(SendError::DeadlineExceeded {
            timeout: Duration::from_millis(100),
            outstanding: 1,
        })
    );
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(producer.purges(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_abandons_the_batch() {
    let producer = MockProducer::new(ProduceBehavior::Silent);
    let sender = Arc::new(BrokerSender::new(producer.clone()));
    let cancel = CancellationToken::new();

    let task = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.send_message(&cancel, &batch(&[1])).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    assert_eq!(task.await.unwrap(), Err(SendError::Cancelled));
    assert_eq!(producer.purges(), 1);
}

#[tokio::test(start_paused = true)]
async fn partition_error_is_reported_with_location() {
    let producer = MockProducer::acking();
    producer.queue(ProduceBehavior::PartitionError);
    let sender = BrokerSender::new(producer.clone());

    let err = sender
        .send_message(&CancellationToken::new(), &batch(&[1, 2]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        SendError::Partition {
            topic: "orders".to_string(),
            partition: Some(3),
            reason: "Broker: Not leader for partition".to_string(),
        }
    );
    assert!(err.is_undeliverable());
    assert_eq!(producer.purges(), 1);
}

#[tokio::test(start_paused = true)]
async fn broker_error_is_delivery_failure() {
    let producer = MockProducer::new(ProduceBehavior::BrokerError);
    let sender = BrokerSender::new(producer.clone());

    let err = sender
        .send_message(&CancellationToken::new(), &batch(&[1]))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::DeliveryFailed(ref reason) if reason.contains("broker connections")));
    assert!(err.is_undeliverable());
}

#[tokio::test(start_paused = true)]
async fn unknown_report_is_fatal() {
    let producer = MockProducer::new(ProduceBehavior::Unknown);
    let sender = BrokerSender::new(producer.clone());

    let err = sender
        .send_message(&CancellationToken::new(), &batch(&[1]))
        .await
        .unwrap_err();

    assert_eq!(err, SendError::UnknownEvent("stats event".to_string()));
    assert!(!err.is_undeliverable());
    assert_eq!(producer.purges(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_report_channel_is_delivery_failure() {
    let producer = MockProducer::new(ProduceBehavior::Forget);
    let sender = BrokerSender::new(producer.clone());

    let err = sender
        .send_message(&CancellationToken::new(), &batch(&[1, 2]))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::DeliveryFailed(ref reason) if reason.contains("2 outstanding")));
}

#[tokio::test(start_paused = true)]
async fn enqueue_failures_stop_the_batch() {
    let producer = MockProducer::acking();
    producer.queue(ProduceBehavior::Ack(Duration::ZERO));
    producer.queue(ProduceBehavior::QueueFull);
    let sender = BrokerSender::new(producer.clone());

    let err = sender
        .send_message(&CancellationToken::new(), &batch(&[1, 2, 3]))
        .await
        .unwrap_err();
    assert_eq!(err, SendError::QueueFull);
    assert!(err.is_undeliverable());
    assert_eq!(
        producer.log(),
        vec!["produce:payload-1", "produce:payload-2", "purge"]
    );

    producer.queue(ProduceBehavior::Reject);
    let err = sender
        .send_message(&CancellationToken::new(), &batch(&[4]))
        .await
        .unwrap_err();
    assert_eq!(err, SendError::Produce("Broker: Unknown topic".to_string()));
    assert!(!err.is_undeliverable());
    assert_eq!(producer.purges(), 2);
}

#[tokio::test(start_paused = true)]
async fn purge_failure_does_not_change_the_outcome() {
    let producer = MockProducer::acking().with_failing_purge();
    let sender = BrokerSender::new(producer.clone());

    let result = sender
        .send_message(&CancellationToken::new(), &batch(&[1]))
        .await;

    assert_eq!(result, Ok(()));
    assert_eq!(producer.purges(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_are_serialized() {
    let producer = MockProducer::new(ProduceBehavior::Ack(Duration::from_millis(20)));
    let sender = Arc::new(BrokerSender::new(producer.clone()));
    let cancel = CancellationToken::new();

    let first = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.send_message(&cancel, &batch(&[1])).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.send_message(&cancel, &batch(&[2])).await })
    };

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(
        producer.log(),
        vec!["produce:payload-1", "purge", "produce:payload-2", "purge"]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_waiting_for_turn() {
    let producer = MockProducer::new(ProduceBehavior::Silent);
    let sender = Arc::new(
        BrokerSender::new(producer.clone()).with_max_wait(Duration::from_secs(1)),
    );

    let first = {
        let sender = sender.clone();
        tokio::spawn(async move {
            sender
                .send_message(&CancellationToken::new(), &batch(&[1]))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let cancel = CancellationToken::new();
    let second = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.send_message(&cancel, &batch(&[2])).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    assert_eq!(second.await.unwrap(), Err(SendError::Cancelled));
    assert!(matches!(
        first.await.unwrap(),
        Err(SendError::DeadlineExceeded { outstanding: 1, .. })
    ));
    assert_eq!(producer.log(), vec!["produce:payload-1", "purge"]);
}
