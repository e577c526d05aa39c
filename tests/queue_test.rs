use std::time::Duration;

use serde_json::json;

use rudder::error::Error;
use rudder::queue::memory::InMemoryQueue;
use rudder::queue::QueueClient;

#[tokio::test]
async fn delivers_in_enqueue_order() {
    let queue = InMemoryQueue::new(Duration::from_secs(30));
    queue.enqueue(json!({"n": 1})).await.unwrap();
    queue.enqueue(json!({"n": 2})).await.unwrap();

    let first = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(first.body, json!({"n": 1}));
    assert_eq!(first.dequeue_count, 1);

    let second = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(second.body, json!({"n": 2}));
}

#[tokio::test]
async fn empty_queue_dequeues_nothing() {
    let queue = InMemoryQueue::new(Duration::from_secs(30));
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn leased_message_is_invisible() {
    let queue = InMemoryQueue::new(Duration::from_secs(30));
    queue.enqueue(json!({})).await.unwrap();

    let _leased = queue.dequeue().await.unwrap().unwrap();
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn finish_removes_the_message() {
    let queue = InMemoryQueue::new(Duration::from_secs(30));
    queue.enqueue(json!({})).await.unwrap();

    let leased = queue.dequeue().await.unwrap().unwrap();
    queue.finish(&leased).await.unwrap();
    assert!(queue.is_empty());
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn expired_lease_redelivers_with_incremented_count() {
    let queue = InMemoryQueue::new(Duration::from_millis(50));
    queue.enqueue(json!({"work": true})).await.unwrap();

    let first = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(first.dequeue_count, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let second = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(second.dequeue_count, 2);
    assert_eq!(second.body, json!({"work": true}));
    assert_ne!(first.lease, second.lease);
}

#[tokio::test]
async fn finish_after_lease_expiry_is_rejected() {
    let queue = InMemoryQueue::new(Duration::from_millis(50));
    queue.enqueue(json!({})).await.unwrap();

    let leased = queue.dequeue().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let err = queue.finish(&leased).await.unwrap_err();
    assert!(matches!(err, Error::LeaseLost(_)));
    // The message survives for the next consumer.
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn extend_keeps_the_lease_alive() {
    let queue = InMemoryQueue::new(Duration::from_millis(100));
    queue.enqueue(json!({})).await.unwrap();

    let leased = queue.dequeue().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    queue.extend(&leased).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Without the extension the lease would have expired by now.
    assert!(queue.dequeue().await.unwrap().is_none());
    queue.finish(&leased).await.unwrap();
}

#[tokio::test]
async fn extend_with_lost_lease_is_rejected() {
    let queue = InMemoryQueue::new(Duration::from_millis(40));
    queue.enqueue(json!({})).await.unwrap();

    let leased = queue.dequeue().await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(70)).await;
    // Redelivered to someone else.
    let _second = queue.dequeue().await.unwrap().unwrap();

    let err = queue.extend(&leased).await.unwrap_err();
    assert!(matches!(err, Error::LeaseLost(_)));
}
