mod common;

use common::*;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;

#[tokio::test]
async fn test_cancelation_pubsub() {
    let (_store, rdb) = setup();
    let mut sub = rdb.cancelation_pubsub().await.unwrap();

    for id in ["one", "two", "three"] {
        assert_eq!(rdb.publish_cancelation(id).await.unwrap(), 1);
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let id = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(id);
    }
    assert_eq!(received, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_publish_without_subscribers() {
    let (_store, rdb) = setup();
    assert_eq!(rdb.publish_cancelation("nobody-listens").await.unwrap(), 0);
}

#[tokio::test]
async fn test_every_subscriber_receives() {
    let (_store, rdb) = setup();
    let first = rdb.cancelation_pubsub().await.unwrap();
    let second = rdb.cancelation_pubsub().await.unwrap();

    for id in ["one", "two", "three"] {
        assert_eq!(rdb.publish_cancelation(id).await.unwrap(), 2);
    }

    let expected: BTreeSet<String> = ["one", "two", "three"].iter().map(|s| s.to_string()).collect();
    for sub in [first, second] {
        let got: BTreeSet<String> = tokio::time::timeout(
            Duration::from_secs(1),
            sub.into_stream().take(3).collect::<BTreeSet<_>>(),
        )
        .await
        .unwrap();
        assert_eq!(got, expected);
    }
}

#[tokio::test]
async fn test_close_while_receiving() {
    let (store, rdb) = setup();
    let mut sub = rdb.cancelation_pubsub().await.unwrap();
    let closer = sub.closer();

    let reader = tokio::spawn(async move {
        let mut ids = Vec::new();
        while let Some(id) = sub.recv().await {
            ids.push(id);
        }
        ids
    });

    rdb.publish_cancelation("before-close").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    closer.close();

    let ids = tokio::time::timeout(Duration::from_secs(1), reader)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids, vec!["before-close"]);
    assert_eq!(rdb.publish_cancelation("after-close").await.unwrap(), 0);
    assert_eq!(store.subscriber_count(task_queue_core::keys::CANCEL_CHANNEL), 0);
}
