mod common;

use common::*;
use std::collections::HashSet;
use std::time::Duration;
use task_queue_broker::BrokerError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_never_share_a_task() {
    let (store, rdb) = setup();
    let mut expected = HashSet::new();
    for i in 0..200 {
        let queue = if i % 2 == 0 { "critical" } else { "default" };
        let msg = task_on(&format!("job_{}", i), queue);
        expected.insert(msg.id);
        rdb.enqueue(&msg).await.unwrap();
    }

    let consumers: Vec<_> = (0..16)
        .map(|_| {
            let rdb = rdb.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    match rdb.dequeue(&["critical", "default"]).await {
                        Ok(msg) => claimed.push(msg.id),
                        Err(BrokerError::NoProcessableTask) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for consumer in consumers {
        for id in consumer.await.unwrap() {
            assert!(seen.insert(id), "task {} claimed twice", id);
        }
    }

    assert_eq!(seen, expected);
    assert_eq!(in_progress(&store).len(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unique_enqueue_admits_one() {
    let (store, rdb) = setup();

    let producers: Vec<_> = (0..20)
        .map(|_| {
            let rdb = rdb.clone();
            tokio::spawn(async move {
                let msg = task("dedup").unique_key("tq:unique:dedup");
                rdb.enqueue_unique(&msg, Duration::from_secs(60)).await
            })
        })
        .collect();

    let mut admitted = 0;
    let mut duplicates = 0;
    for producer in producers {
        match producer.await.unwrap() {
            Ok(()) => admitted += 1,
            Err(BrokerError::DuplicateTask(_)) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(duplicates, 19);
    assert_eq!(queue_contents(&store, "default").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_and_recovery_keep_every_task() {
    let (store, rdb) = setup();
    for i in 0..50 {
        rdb.enqueue(&task(&format!("job_{}", i))).await.unwrap();
    }

    // half of the claimed tasks finish, the rest are left behind by a crash
    let workers: Vec<_> = (0..5)
        .map(|_| {
            let rdb = rdb.clone();
            tokio::spawn(async move {
                let mut finished = 0;
                for n in 0..5 {
                    let msg = rdb.dequeue(&["default"]).await.unwrap();
                    if n % 2 == 0 {
                        rdb.done(&msg).await.unwrap();
                        finished += 1;
                    }
                }
                finished
            })
        })
        .collect();

    let mut finished = 0;
    for worker in workers {
        finished += worker.await.unwrap();
    }

    let orphaned = rdb.requeue_all().await.unwrap();
    assert_eq!(finished, 15);
    assert_eq!(orphaned, 10);
    assert_eq!(queue_contents(&store, "default").len(), 35);
    assert!(in_progress(&store).is_empty());
}
