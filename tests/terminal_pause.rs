use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use twilightbbs::terminal::Terminal;

// A key that arrives after the timeout expires must be readable by the next
// primitive; the expired pause may not pre-consume it.
#[tokio::test]
async fn pause_timeout_does_not_consume_late_key() {
    let (mut term, remote) = Terminal::over_duplex(80, 24, false);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    // Drain server output so writes never block.
    tokio::spawn(async move {
        let mut sink = [0u8; 256];
        while remote_rd.read(&mut sink).await.unwrap_or(0) > 0 {}
    });

    tokio::time::timeout(Duration::from_secs(3), term.pause_timeout(1))
        .await
        .expect("pause_timeout should return after its timer")
        .expect("pause_timeout should not error");

    // Now press a key; it belongs to the next read.
    remote_wr.write_all(b"A").await.unwrap();

    let key = tokio::time::timeout(Duration::from_secs(2), term.get_key())
        .await
        .expect("get_key should see the late key")
        .unwrap();
    assert_eq!(key, b'A');
}

#[tokio::test]
async fn pause_timeout_consumes_key_pressed_in_time() {
    let (mut term, remote) = Terminal::over_duplex(80, 24, false);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    tokio::spawn(async move {
        let mut sink = [0u8; 256];
        while remote_rd.read(&mut sink).await.unwrap_or(0) > 0 {}
    });

    let pause = tokio::spawn(async move {
        term.pause_timeout(5).await.unwrap();
        term
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    remote_wr.write_all(b"X").await.unwrap();

    let mut term = tokio::time::timeout(Duration::from_secs(2), pause)
        .await
        .expect("pause should return promptly after the keypress")
        .unwrap();

    // The key was consumed by the pause: the next read blocks until a new
    // byte shows up.
    let next = tokio::spawn(async move { term.get_key().await.unwrap() });
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!next.is_finished(), "key should have been consumed by pause");

    remote_wr.write_all(b"Y").await.unwrap();
    assert_eq!(next.await.unwrap(), b'Y');
}
