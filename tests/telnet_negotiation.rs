use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use twilightbbs::server::telnet;

const IAC: u8 = 255;
const WILL: u8 = 251;
const WONT: u8 = 252;
const SB: u8 = 250;
const SE: u8 = 240;

async fn pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (server, client)
}

// The first six bytes on the wire are WILL ECHO, WILL SGA; a WONT linemode
// answer is absorbed and following data bytes surface to the application.
#[tokio::test]
async fn initial_negotiation_handshake() {
    let (server, mut client) = pair().await;

    let server_task = tokio::spawn(async move {
        let (mut reader, _writer) = telnet::setup(server).await.unwrap();
        reader.read_byte().await.unwrap()
    });

    let mut head = [0u8; 6];
    client.read_exact(&mut head).await.unwrap();
    assert_eq!(head, [IAC, WILL, 1, IAC, WILL, 3]);

    // Remaining offers: DO SGA, DONT LINEMODE, DO NAWS, DO TTYPE.
    let mut rest = [0u8; 12];
    client.read_exact(&mut rest).await.unwrap();
    assert_eq!(
        rest,
        [IAC, 253, 3, IAC, 254, 34, IAC, 253, 31, IAC, 253, 24]
    );

    client.write_all(&[IAC, WONT, 34]).await.unwrap();
    client.write_all(b"A").await.unwrap();

    assert_eq!(server_task.await.unwrap(), b'A');
}

// IAC IAC in the input stream is one literal 0xFF data byte.
#[tokio::test]
async fn escaped_iac_is_literal_data() {
    let (server, mut client) = pair().await;

    let server_task = tokio::spawn(async move {
        let (mut reader, _writer) = telnet::setup(server).await.unwrap();
        let first = reader.read_byte().await.unwrap();
        let second = reader.read_byte().await.unwrap();
        (first, second)
    });

    // Drain the negotiation offers first.
    let mut offers = [0u8; 18];
    client.read_exact(&mut offers).await.unwrap();

    client.write_all(&[IAC, IAC, b'z']).await.unwrap();
    assert_eq!(server_task.await.unwrap(), (0xFF, b'z'));
}

// NAWS and TTYPE subnegotiations update the reader's terminal properties.
#[tokio::test]
async fn subnegotiation_sets_dimensions_and_type() {
    let (server, mut client) = pair().await;

    let server_task = tokio::spawn(async move {
        let (mut reader, _writer) = telnet::setup(server).await.unwrap();
        let b = reader.read_byte().await.unwrap();
        (b, reader.width, reader.height, reader.term_type.clone(), reader.ansi_capable)
    });

    let mut offers = [0u8; 18];
    client.read_exact(&mut offers).await.unwrap();

    // NAWS: 132 x 50.
    client
        .write_all(&[IAC, SB, 31, 0, 132, 0, 50, IAC, SE])
        .await
        .unwrap();
    // TTYPE IS "dumb" (not in the ANSI list).
    let mut ttype = vec![IAC, SB, 24, 0];
    ttype.extend_from_slice(b"dumb");
    ttype.extend_from_slice(&[IAC, SE]);
    client.write_all(&ttype).await.unwrap();
    client.write_all(b"Q").await.unwrap();

    let (b, width, height, term_type, ansi) = server_task.await.unwrap();
    assert_eq!(b, b'Q');
    assert_eq!((width, height), (132, 50));
    assert_eq!(term_type, "dumb");
    assert!(!ansi);
}

// Outbound data escapes 0xFF bytes as IAC IAC.
#[tokio::test]
async fn writes_escape_iac() {
    let (server, mut client) = pair().await;

    let (_reader, writer) = telnet::setup(server).await.unwrap();

    let mut offers = [0u8; 18];
    client.read_exact(&mut offers).await.unwrap();

    writer
        .lock()
        .await
        .write_data(&[1, IAC, 2])
        .await
        .unwrap();

    let mut out = [0u8; 4];
    client.read_exact(&mut out).await.unwrap();
    assert_eq!(out, [1, IAC, IAC, 2]);
}

// Oversized subnegotiations fail the read instead of buffering forever.
#[tokio::test]
async fn oversized_subnegotiation_errors() {
    let (server, mut client) = pair().await;

    let server_task = tokio::spawn(async move {
        let (mut reader, _writer) = telnet::setup(server).await.unwrap();
        reader.read_byte().await
    });

    let mut offers = [0u8; 18];
    client.read_exact(&mut offers).await.unwrap();

    let mut flood = vec![IAC, SB, 31];
    flood.extend(std::iter::repeat(7u8).take(2048));
    client.write_all(&flood).await.unwrap();

    assert!(server_task.await.unwrap().is_err());
}
