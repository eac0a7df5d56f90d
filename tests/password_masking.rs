use tokio::io::{AsyncReadExt, AsyncWriteExt};
use twilightbbs::terminal::Terminal;

// The caller types "secret"; the wire carries six asterisks and CRLF, the
// application receives the plaintext.
#[tokio::test]
async fn password_is_masked_on_the_wire() {
    let (mut term, remote) = Terminal::over_duplex(80, 24, true);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    let typing = tokio::spawn(async move {
        remote_wr.write_all(b"secret\r").await.unwrap();
        remote_wr
    });

    let password = term.get_password(40).await.unwrap();
    assert_eq!(password, "secret");
    typing.await.unwrap();
    drop(term);

    let mut echoed = Vec::new();
    remote_rd.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"******\r\n");
}

#[tokio::test]
async fn password_backspace_rubs_out() {
    let (mut term, remote) = Terminal::over_duplex(80, 24, true);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    tokio::spawn(async move {
        // "pw1" backspace "2" enter -> "pw2"
        remote_wr.write_all(b"pw1\x082\r").await.unwrap();
    });

    let password = term.get_password(40).await.unwrap();
    assert_eq!(password, "pw2");
    drop(term);

    let mut echoed = Vec::new();
    remote_rd.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"***\x08 \x08*\r\n");
}

#[tokio::test]
async fn line_input_echoes_and_bounds() {
    let (mut term, remote) = Terminal::over_duplex(80, 24, true);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    tokio::spawn(async move {
        remote_wr.write_all(b"hello world\r").await.unwrap();
    });

    let line = term.get_line(5).await.unwrap();
    assert_eq!(line, "hello");
    drop(term);

    let mut echoed = Vec::new();
    remote_rd.read_to_end(&mut echoed).await.unwrap();
    // Only the accepted characters echo, then CRLF.
    assert_eq!(echoed, b"hello\r\n");
}
