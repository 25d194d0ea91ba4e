use std::time::Duration;

use proven_messaging::Message;
use proven_messaging::validation::ValidationError;
use proven_messaging_memory::{MemoryTransport, MemoryTransportOptions};
use proven_publisher::{
    BatchingOptions, BatchingSettings, Error, FlowControlSettings, LimitExceededBehavior,
    MAX_BATCH_BYTES_CEILING, MAX_BATCH_MESSAGES_CEILING, Publisher, PublisherOptions,
    PublisherSettings, TRACE_CONTEXT_ATTRIBUTE,
};
use tracing_test::traced_test;

fn batching(max_bytes: usize, max_messages: usize, max_delay: Duration) -> PublisherSettings {
    PublisherSettings {
        batching: BatchingSettings {
            max_bytes,
            max_delay,
            max_messages,
        },
        ..PublisherSettings::default()
    }
}

fn gated() -> MemoryTransport {
    MemoryTransport::new(MemoryTransportOptions {
        gated: true,
        latency: None,
    })
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_count_threshold_then_delay() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(
        transport.clone(),
        batching(1_000_000, 2, Duration::from_secs(10)),
    );

    let handles: Vec<_> = (0..3)
        .map(|_| publisher.publish("0123456789").unwrap())
        .collect();

    transport.wait_for_dispatches(1).await;
    let dispatched = transport.dispatched().await;
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].messages.len(), 2);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(transport.dispatched().await.len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let dispatched = transport.dispatched().await;
    assert_eq!(dispatched.len(), 2);
    assert_eq!(dispatched[1].messages.len(), 1);

    let ids: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_count_threshold_then_flush() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(
        transport.clone(),
        batching(1_000_000, 2, Duration::from_secs(10)),
    );

    let handles: Vec<_> = (0..3)
        .map(|_| publisher.publish("0123456789").unwrap())
        .collect();

    publisher.flush().await.unwrap();

    let dispatched = transport.dispatched().await;
    assert_eq!(dispatched.len(), 2);
    assert_eq!(dispatched[0].messages.len(), 2);
    assert_eq!(dispatched[1].messages.len(), 1);

    for handle in handles {
        assert!(handle.await.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_byte_threshold() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), batching(25, 100, Duration::from_secs(10)));

    let _first = publisher.publish("0123456789").unwrap();
    let _second = publisher.publish("0123456789").unwrap();
    // Does not fit: closes the first batch and starts a second.
    let third = publisher.publish("0123456789").unwrap();

    transport.wait_for_dispatches(1).await;
    assert_eq!(transport.dispatched().await[0].messages.len(), 2);

    assert!(third.await.is_ok());
    assert_eq!(transport.dispatched().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_message_is_sent_alone() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), batching(100, 10, Duration::from_secs(10)));

    let small = publisher.publish("small").unwrap();
    let large = publisher.publish(vec![7u8; 500]).unwrap();

    transport.wait_for_dispatches(2).await;
    let dispatched = transport.dispatched().await;
    assert_eq!(dispatched.len(), 2);
    assert_eq!(dispatched[0].messages.len(), 1);
    assert_eq!(dispatched[0].messages[0].data(), "small");
    assert_eq!(dispatched[1].messages.len(), 1);
    assert_eq!(dispatched[1].messages[0].size(), 500);

    assert!(small.await.is_ok());
    assert!(large.await.is_ok());
}

#[tokio::test]
async fn test_thresholds_are_clamped() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(
        transport.clone(),
        batching(20 * 1024 * 1024, 5_000, Duration::from_secs(3600)),
    );

    let settings = publisher.settings();
    assert_eq!(settings.batching.max_bytes, MAX_BATCH_BYTES_CEILING);
    assert_eq!(settings.batching.max_messages, MAX_BATCH_MESSAGES_CEILING);

    let first = publisher.publish(vec![0u8; 5 * 1024 * 1024]).unwrap();
    let second = publisher.publish(vec![0u8; 5 * 1024 * 1024]).unwrap();
    publisher.flush().await.unwrap();

    assert!(first.await.is_ok());
    assert!(second.await.is_ok());

    let dispatched = transport.dispatched().await;
    assert_eq!(dispatched.len(), 2);
    assert!(
        dispatched
            .iter()
            .all(|batch| batch.messages.iter().map(Message::size).sum::<usize>()
                <= MAX_BATCH_BYTES_CEILING)
    );
}

#[tokio::test]
async fn test_set_options_merges_and_clamps() {
    let publisher = Publisher::new(MemoryTransport::default(), PublisherSettings::default());

    publisher.set_options(PublisherOptions {
        batching: Some(BatchingOptions {
            max_messages: Some(5_000),
            ..BatchingOptions::default()
        }),
        tracing_enabled: Some(true),
        ..PublisherOptions::default()
    });

    let settings = publisher.settings();
    assert_eq!(settings.batching.max_messages, MAX_BATCH_MESSAGES_CEILING);
    assert_eq!(settings.batching.max_bytes, 1024 * 1024);
    assert!(settings.tracing_enabled);
    assert!(!settings.ordering_enabled);
}

#[tokio::test]
async fn test_flush_waits_for_in_flight_batches() {
    let transport = gated();
    let publisher = Publisher::new(transport.clone(), batching(1_000_000, 1, Duration::from_secs(3600)));

    let first = publisher.publish("a").unwrap();
    let second = publisher.publish("b").unwrap();
    transport.wait_for_dispatches(2).await;

    let releaser = {
        let transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            transport.release(2);
        })
    };

    publisher.flush().await.unwrap();
    assert_eq!(publisher.outstanding_messages(), 0);

    assert!(first.await.is_ok());
    assert!(second.await.is_ok());
    releaser.await.unwrap();
}

#[tokio::test]
async fn test_dropping_without_flush_abandons_open_batch() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), batching(1_000_000, 10, Duration::from_secs(3600)));

    let handle = publisher.publish("payload").unwrap();
    drop(publisher);

    assert!(matches!(handle.await, Err(Error::Abandoned)));
    assert!(transport.dispatched().await.is_empty());
}

#[tokio::test]
async fn test_flush_when_idle() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), PublisherSettings::default());

    publisher.flush().await.unwrap();
    assert!(transport.dispatched().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_flush_timeout_leaves_batches_running() {
    let transport = gated();
    let publisher = Publisher::new(transport.clone(), PublisherSettings::default());

    let handle = publisher.publish("payload").unwrap();

    let flushed = publisher.flush_timeout(Duration::from_millis(50)).await;
    assert!(matches!(flushed, Err(Error::FlushTimeout(d)) if d == Duration::from_millis(50)));

    transport.release(1);
    assert_eq!(handle.await.unwrap(), "1");
    assert_eq!(publisher.outstanding_messages(), 0);
}

#[tokio::test]
async fn test_failed_batch_settles_each_message_once() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), batching(1_000_000, 2, Duration::from_secs(3600)));
    transport.fail_next("unavailable").await;

    let handles: Vec<_> = (0..4)
        .map(|i| publisher.publish(format!("message{i}")).unwrap())
        .collect();

    // An unordered flush succeeds even when a batch failed; failures are
    // reported through the handles.
    publisher.flush().await.unwrap();

    let results = futures::future::join_all(handles).await;
    assert!(matches!(results[0], Err(Error::Dispatch(_))));
    assert!(matches!(results[1], Err(Error::Dispatch(_))));
    assert!(results[2].is_ok());
    assert!(results[3].is_ok());
    assert_eq!(publisher.outstanding_messages(), 0);
    assert_eq!(publisher.outstanding_bytes(), 0);
}

#[tokio::test]
async fn test_invalid_message_never_reaches_a_batch() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), PublisherSettings::default());

    let result = publisher.publish(Message::default());
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::EmptyMessage))
    ));

    publisher.flush().await.unwrap();
    assert!(transport.dispatched().await.is_empty());
    assert_eq!(publisher.outstanding_messages(), 0);
}

#[tokio::test]
async fn test_flow_control_rejects_and_releases() {
    let transport = gated();
    let publisher = Publisher::new(
        transport.clone(),
        PublisherSettings {
            flow_control: FlowControlSettings {
                limit_exceeded_behavior: LimitExceededBehavior::Error,
                max_outstanding_bytes: None,
                max_outstanding_messages: Some(2),
            },
            ..batching(1_000_000, 1, Duration::from_secs(3600))
        },
    );

    let first = publisher.publish("a").unwrap();
    let second = publisher.publish("b").unwrap();
    assert_eq!(publisher.outstanding_messages(), 2);
    assert_eq!(publisher.outstanding_bytes(), 2);

    assert!(matches!(
        publisher.publish("c"),
        Err(Error::FlowControl {
            limit: 2,
            unit: "messages"
        })
    ));

    transport.release(2);
    assert!(first.await.is_ok());
    assert!(second.await.is_ok());
    publisher.flush().await.unwrap();
    assert_eq!(publisher.outstanding_messages(), 0);

    let third = publisher.publish("c").unwrap();
    transport.release(1);
    assert!(third.await.is_ok());
}

#[tokio::test]
async fn test_trace_attribute_is_overwritten() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(
        transport.clone(),
        PublisherSettings {
            tracing_enabled: true,
            ..PublisherSettings::default()
        },
    );

    let message = Message::new("payload").with_attribute(TRACE_CONTEXT_ATTRIBUTE, "mine");
    let handle = publisher.publish(message).unwrap();
    publisher.flush().await.unwrap();
    assert!(handle.await.is_ok());

    let dispatched = transport.dispatched().await;
    let traceparent = &dispatched[0].messages[0].attributes()[TRACE_CONTEXT_ATTRIBUTE];
    assert_ne!(traceparent, "mine");
    assert!(traceparent.starts_with("00-"));
}

#[tokio::test]
async fn test_tracing_disabled_leaves_attributes_alone() {
    let transport = MemoryTransport::default();
    let publisher = Publisher::new(transport.clone(), PublisherSettings::default());

    let handle = publisher.publish(Message::new("payload")).unwrap();
    publisher.flush().await.unwrap();
    assert!(handle.await.is_ok());

    let dispatched = transport.dispatched().await;
    assert!(dispatched[0].messages[0].attributes().is_empty());
}
