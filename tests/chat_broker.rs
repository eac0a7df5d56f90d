use std::sync::Arc;

use twilightbbs::chat::{Broker, ChatError, OUTBOX_CAPACITY};

// A subscriber with a full buffer loses the message; everyone else still
// receives it, and the broker reports exactly one drop.
#[tokio::test]
async fn broadcast_with_slow_consumer() {
    let broker = Broker::new();

    let mut healthy1 = broker.subscribe(1, "alice");
    let mut healthy2 = broker.subscribe(2, "bob");
    let mut slow = broker.subscribe(3, "carol");

    // Fill carol's 32-slot buffer.
    for i in 0..OUTBOX_CAPACITY {
        broker.send_to(4, "dave", 3, &format!("spam {}", i)).unwrap();
    }

    let dropped = broker.broadcast(4, "dave", "hello");
    assert_eq!(dropped, 1);

    assert_eq!(healthy1.rx.recv().await.unwrap().text, "hello");
    assert_eq!(healthy2.rx.recv().await.unwrap().text, "hello");

    // Carol's buffer holds only the spam.
    for _ in 0..OUTBOX_CAPACITY {
        assert!(slow.rx.try_recv().unwrap().text.starts_with("spam"));
    }
    assert!(slow.rx.try_recv().is_err());
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let broker = Broker::new();
    let mut sub = broker.subscribe(1, "alice");

    for i in 0..10 {
        broker.send_to(2, "bob", 1, &format!("m{}", i)).unwrap();
    }
    for i in 0..10 {
        assert_eq!(sub.rx.recv().await.unwrap().text, format!("m{}", i));
    }
}

#[tokio::test]
async fn sender_never_sees_its_own_broadcast() {
    let broker = Broker::new();
    let mut sender = broker.subscribe(1, "alice");
    let mut other = broker.subscribe(2, "bob");

    broker.broadcast(1, "alice", "hi all");

    assert_eq!(other.rx.recv().await.unwrap().text, "hi all");
    assert!(sender.rx.try_recv().is_err());
}

// Sends racing an unsubscribe either deliver or drop silently; nothing
// panics and the receiver can keep draining whatever landed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn send_concurrent_with_unsubscribe_is_safe() {
    for _ in 0..50 {
        let broker = Arc::new(Broker::new());
        let mut sub = broker.subscribe(7, "alice");

        let sender = {
            let broker = broker.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    match broker.send_to(1, "bob", 7, &format!("x{}", i)) {
                        Ok(()) | Err(ChatError::BufferFull(_)) | Err(ChatError::NodeNotFound(_)) => {}
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        let unsubscriber = {
            let broker = broker.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                broker.unsubscribe(7);
            })
        };

        sender.await.unwrap();
        unsubscriber.await.unwrap();

        // Drain whatever was delivered before the race resolved.
        while sub.rx.try_recv().is_ok() {}
    }
}

#[tokio::test]
async fn unsubscribe_does_not_close_snapshot_in_flight() {
    let broker = Broker::new();
    let mut sub = broker.subscribe(1, "alice");

    broker.send_to(2, "bob", 1, "before").unwrap();
    broker.unsubscribe(1);

    // Already-enqueued messages are still readable after unsubscribe; once
    // the broker's sender is gone, the stream ends instead of panicking.
    assert_eq!(sub.rx.recv().await.unwrap().text, "before");
    assert!(sub.rx.recv().await.is_none());
}
