//! Telnet protocol filter.
//!
//! Wraps a raw TCP connection and exposes a byte stream with IAC sequences
//! stripped. Negotiation state (window size, terminal type, ANSI capability)
//! is collected as the peer answers the initial option offers.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub const IAC: u8 = 255; // Interpret As Command
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250; // Sub-negotiation Begin
pub const GA: u8 = 249; // Go Ahead
pub const SE: u8 = 240; // Sub-negotiation End

pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_TTYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;
pub const OPT_LINEMODE: u8 = 34;

const MAX_SUBNEG_LEN: usize = 1024;

/// Write half of a telnet connection. Data writes escape literal 0xFF bytes;
/// raw writes are used for protocol commands.
pub struct TelnetWriter {
    half: OwnedWriteHalf,
}

impl TelnetWriter {
    /// Write user data, escaping any literal IAC bytes as IAC IAC.
    pub async fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        for (i, &b) in data.iter().enumerate() {
            if b == IAC {
                if i > written {
                    self.half.write_all(&data[written..i]).await?;
                }
                self.half.write_all(&[IAC, IAC]).await?;
                written = i + 1;
            }
        }
        if written < data.len() {
            self.half.write_all(&data[written..]).await?;
        }
        Ok(())
    }

    /// Write protocol bytes without escaping.
    pub async fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.half.write_all(data).await
    }

    async fn send_command(&mut self, cmd: u8, option: u8) -> io::Result<()> {
        self.write_raw(&[IAC, cmd, option]).await
    }

    /// Echo control for password prompts.
    ///
    /// Telnet ECHO negotiation controls whether the client performs local
    /// echo. If we sent WONT ECHO many clients would switch to local echo and
    /// leak password characters while the server prints '*', so the server
    /// stays in echo mode from the client's perspective regardless of the
    /// requested sense.
    pub async fn set_echo(&mut self, _on: bool) -> io::Result<()> {
        self.send_command(WILL, OPT_ECHO).await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.half.shutdown().await;
    }
}

/// Read half of a telnet connection. IAC sequences are consumed here; the
/// negotiation replies they require are written through the shared writer.
pub struct TelnetReader {
    rd: BufReader<OwnedReadHalf>,
    writer: Arc<Mutex<TelnetWriter>>,
    pushback: Option<u8>,

    // Terminal properties discovered via negotiation.
    pub term_type: String,
    pub width: u16,
    pub height: u16,
    pub ansi_capable: bool,
}

/// Split a fresh TCP connection into a telnet reader and a shared writer, and
/// send the initial option negotiation: we WILL echo and suppress go-ahead,
/// the peer should DO suppress-go-ahead, DONT linemode, DO window-size and
/// DO terminal-type.
pub async fn setup(stream: TcpStream) -> io::Result<(TelnetReader, Arc<Mutex<TelnetWriter>>)> {
    let (rd, wr) = stream.into_split();
    let writer = Arc::new(Mutex::new(TelnetWriter { half: wr }));

    {
        let mut w = writer.lock().await;
        w.send_command(WILL, OPT_ECHO).await?;
        w.send_command(WILL, OPT_SGA).await?;
        w.send_command(DO, OPT_SGA).await?;
        w.send_command(DONT, OPT_LINEMODE).await?;
        w.send_command(DO, OPT_NAWS).await?;
        w.send_command(DO, OPT_TTYPE).await?;
    }

    let reader = TelnetReader {
        rd: BufReader::with_capacity(1024, rd),
        writer: writer.clone(),
        pushback: None,
        term_type: String::new(),
        width: 80,
        height: 24,
        // Assume ANSI until the terminal type says otherwise.
        ansi_capable: true,
    };

    Ok((reader, writer))
}

impl TelnetReader {
    /// Read a single data byte, consuming and answering any telnet protocol
    /// sequences in the stream.
    pub async fn read_byte(&mut self) -> io::Result<u8> {
        if let Some(b) = self.pushback.take() {
            return Ok(b);
        }
        loop {
            let b = self.rd.read_u8().await?;
            if b != IAC {
                return Ok(b);
            }

            let cmd = self.rd.read_u8().await?;
            match cmd {
                // Escaped IAC: a literal 0xFF data byte.
                IAC => return Ok(IAC),
                WILL | WONT => {
                    let opt = self.rd.read_u8().await?;
                    self.handle_will_wont(cmd, opt).await?;
                }
                DO | DONT => {
                    let opt = self.rd.read_u8().await?;
                    self.handle_do_dont(cmd, opt).await?;
                }
                SB => self.handle_subnegotiation().await?,
                GA => {}
                // Unknown two-byte command: skip.
                _ => {}
            }
        }
    }

    /// Wait up to `window` for negotiation answers (NAWS, TTYPE) to arrive.
    /// A real keypress arriving early is pushed back for the next read.
    pub async fn collect_negotiation(&mut self, window: Duration) {
        tokio::select! {
            res = self.read_byte() => {
                if let Ok(b) = res {
                    self.pushback = Some(b);
                }
            }
            _ = tokio::time::sleep(window) => {}
        }
    }

    async fn handle_will_wont(&mut self, cmd: u8, opt: u8) -> io::Result<()> {
        match opt {
            // Window size arrives via subnegotiation; no reply needed.
            OPT_NAWS => {}
            OPT_TTYPE => {
                if cmd == WILL {
                    // Ask the client to send its terminal type: SB TTYPE SEND SE.
                    let mut w = self.writer.lock().await;
                    w.write_raw(&[IAC, SB, OPT_TTYPE, 1, IAC, SE]).await?;
                }
            }
            OPT_LINEMODE => {
                // Refuse linemode so we get character-at-a-time input.
                if cmd == WILL {
                    let mut w = self.writer.lock().await;
                    w.send_command(DONT, OPT_LINEMODE).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_do_dont(&mut self, cmd: u8, opt: u8) -> io::Result<()> {
        match opt {
            // We already offered WILL for these; the client is confirming.
            OPT_ECHO | OPT_SGA => {}
            _ => {
                if cmd == DO {
                    let mut w = self.writer.lock().await;
                    w.send_command(WONT, opt).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_subnegotiation(&mut self) -> io::Result<()> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let b = self.rd.read_u8().await?;
            if b == IAC {
                let next = self.rd.read_u8().await?;
                if next == SE {
                    break;
                }
                if next == IAC {
                    buf.push(IAC);
                    if buf.len() > MAX_SUBNEG_LEN {
                        return Err(subneg_too_long());
                    }
                    continue;
                }
                // Unexpected command inside SB: treat as end.
                break;
            }
            buf.push(b);
            if buf.len() > MAX_SUBNEG_LEN {
                return Err(subneg_too_long());
            }
        }

        if buf.is_empty() {
            return Ok(());
        }

        match buf[0] {
            OPT_NAWS => {
                // option(1) + width(2) + height(2), big-endian.
                if buf.len() >= 5 {
                    self.width = u16::from_be_bytes([buf[1], buf[2]]);
                    self.height = u16::from_be_bytes([buf[3], buf[4]]);
                }
            }
            OPT_TTYPE => {
                // option(1) + IS(1) + type string.
                if buf.len() >= 2 && buf[1] == 0 {
                    let mut term = String::from_utf8_lossy(&buf[2..]).into_owned();
                    term.truncate(64);
                    self.ansi_capable = is_ansi_term_type(&term);
                    self.term_type = term;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

fn subneg_too_long() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "telnet subnegotiation too long")
}

/// Well-known terminal types that understand ANSI escape sequences.
fn is_ansi_term_type(term_type: &str) -> bool {
    matches!(
        term_type.to_ascii_lowercase().as_str(),
        "ansi"
            | "ansi-bbs"
            | "xterm"
            | "xterm-256color"
            | "xterm-color"
            | "vt100"
            | "vt102"
            | "linux"
            | "screen"
            | "screen-256color"
            | "tmux"
            | "tmux-256color"
            | "rxvt"
            | "rxvt-unicode"
    )
}
