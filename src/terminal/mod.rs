//! Terminal abstraction over a filtered connection.
//!
//! A [`Terminal`] owns the exclusive read half of a session link and a
//! cloneable [`TermWriter`] handle for the write half. Background producers
//! (chat fan-out, operator broadcasts) write through their own clone of the
//! writer while the session task keeps exclusive use of the reader, which is
//! how the classic "second task writes the terminal during chat" flow works
//! without interleaving partial writes.

pub mod ansi;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::server::ssh::{SshReader, SshWriter};
use crate::server::telnet::{TelnetReader, TelnetWriter};

/// Exclusive read half of a session link.
pub enum LinkReader {
    Telnet(TelnetReader),
    Ssh(SshReader),
    Pipe(ReadHalf<DuplexStream>),
}

impl LinkReader {
    /// Read one data byte. Cancellation-safe: if the returned future is
    /// dropped before completion, no byte has been consumed.
    pub async fn read_byte(&mut self) -> io::Result<u8> {
        match self {
            LinkReader::Telnet(r) => r.read_byte().await,
            LinkReader::Ssh(r) => r.read_byte().await,
            LinkReader::Pipe(r) => r.read_u8().await,
        }
    }
}

/// Shared, cloneable write half of a session link.
#[derive(Clone)]
pub enum TermWriter {
    Telnet(Arc<Mutex<TelnetWriter>>),
    Ssh(SshWriter),
    Pipe(Arc<Mutex<WriteHalf<DuplexStream>>>),
}

impl TermWriter {
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        match self {
            TermWriter::Telnet(w) => w.lock().await.write_data(data).await,
            TermWriter::Ssh(w) => w.write(data).await,
            TermWriter::Pipe(w) => w.lock().await.write_all(data).await,
        }
    }

    pub async fn send(&self, text: &str) -> io::Result<()> {
        self.write(text.as_bytes()).await
    }

    /// Write a line followed by CR+LF.
    pub async fn send_line(&self, text: &str) -> io::Result<()> {
        self.write(format!("{}\r\n", text).as_bytes()).await
    }

    /// Toggle remote echo. Only meaningful for telnet; SSH clients echo
    /// nothing in raw PTY mode and pipes have no peer.
    pub async fn set_echo(&self, on: bool) -> io::Result<()> {
        match self {
            TermWriter::Telnet(w) => w.lock().await.set_echo(on).await,
            TermWriter::Ssh(_) | TermWriter::Pipe(_) => Ok(()),
        }
    }

    /// Close the write side of the link.
    pub async fn close(&self) {
        match self {
            TermWriter::Telnet(w) => w.lock().await.shutdown().await,
            TermWriter::Ssh(w) => w.close().await,
            TermWriter::Pipe(w) => {
                let _ = w.lock().await.shutdown().await;
            }
        }
    }
}

/// High-level BBS terminal: line output with CRLF, cursor control, bounded
/// line input with echo, password input with masking.
pub struct Terminal {
    reader: LinkReader,
    writer: TermWriter,
    pub width: u16,
    pub height: u16,
    pub ansi: bool,
}

impl Terminal {
    pub fn new(reader: LinkReader, writer: TermWriter, width: u16, height: u16, ansi: bool) -> Self {
        Terminal {
            reader,
            writer,
            width: if width == 0 { 80 } else { width },
            height: if height == 0 { 24 } else { height },
            ansi,
        }
    }

    /// Build a terminal over an in-memory duplex pipe. Used by tests and
    /// local tooling; the returned stream plays the remote client.
    pub fn over_duplex(width: u16, height: u16, ansi: bool) -> (Self, DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let (rd, wr) = tokio::io::split(local);
        let term = Terminal::new(
            LinkReader::Pipe(rd),
            TermWriter::Pipe(Arc::new(Mutex::new(wr))),
            width,
            height,
            ansi,
        );
        (term, remote)
    }

    /// A cloneable handle to the write half, for producer tasks.
    pub fn writer(&self) -> TermWriter {
        self.writer.clone()
    }

    pub async fn send(&self, text: &str) -> Result<()> {
        self.writer.send(text).await?;
        Ok(())
    }

    pub async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.writer.write(data).await?;
        Ok(())
    }

    /// Write a line of text followed by CR+LF.
    pub async fn send_line(&self, text: &str) -> Result<()> {
        self.writer.send_line(text).await?;
        Ok(())
    }

    /// Clear the screen: ANSI clear-home, or 24 blank lines for dumb clients.
    pub async fn cls(&self) -> Result<()> {
        if self.ansi {
            self.send(ansi::clear_screen()).await
        } else {
            self.send(&"\r\n".repeat(24)).await
        }
    }

    /// Position the cursor (1-based row and column). No-op without ANSI.
    pub async fn goto_xy(&self, row: u16, col: u16) -> Result<()> {
        if self.ansi {
            self.send(&ansi::move_to(row, col)).await
        } else {
            Ok(())
        }
    }

    pub async fn set_color(&self, fg: i32, bg: i32) -> Result<()> {
        if self.ansi {
            self.send(&ansi::color(fg, bg)).await
        } else {
            Ok(())
        }
    }

    pub async fn reset_color(&self) -> Result<()> {
        if self.ansi {
            self.send(ansi::RESET).await
        } else {
            Ok(())
        }
    }

    pub async fn save_cursor(&self) -> Result<()> {
        if self.ansi {
            self.send(ansi::save_cursor()).await
        } else {
            Ok(())
        }
    }

    pub async fn restore_cursor(&self) -> Result<()> {
        if self.ansi {
            self.send(ansi::restore_cursor()).await
        } else {
            Ok(())
        }
    }

    pub async fn hide_cursor(&self) -> Result<()> {
        if self.ansi {
            self.send(ansi::hide_cursor()).await
        } else {
            Ok(())
        }
    }

    pub async fn show_cursor(&self) -> Result<()> {
        if self.ansi {
            self.send(ansi::show_cursor()).await
        } else {
            Ok(())
        }
    }

    pub async fn read_byte(&mut self) -> Result<u8> {
        Ok(self.reader.read_byte().await?)
    }

    /// Wait for and return a single keypress.
    pub async fn get_key(&mut self) -> Result<u8> {
        self.read_byte().await
    }

    /// Read a line of up to `max_len` characters with echo. Printable ASCII
    /// is accepted, backspace/delete rubs out the last byte, CR or LF ends
    /// the line. The returned string has no trailing CR/LF.
    pub async fn get_line(&mut self, max_len: usize) -> Result<String> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let b = self.reader.read_byte().await?;
            match b {
                b'\r' | b'\n' => {
                    self.send("\r\n").await?;
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
                8 | 127 => {
                    if buf.pop().is_some() {
                        self.send("\x08 \x08").await?;
                    }
                }
                32..=126 => {
                    if buf.len() < max_len {
                        buf.push(b);
                        self.send_bytes(&[b]).await?;
                    }
                }
                _ => {}
            }
        }
    }

    /// Read a line without echo, displaying `*` per character. Remote echo is
    /// disabled for the duration of the read and re-enabled on every exit
    /// path, including read errors.
    pub async fn get_password(&mut self, max_len: usize) -> Result<String> {
        let _ = self.writer.set_echo(false).await;

        let mut buf: Vec<u8> = Vec::new();
        loop {
            let b = match self.reader.read_byte().await {
                Ok(b) => b,
                Err(e) => {
                    let _ = self.writer.set_echo(true).await;
                    return Err(e.into());
                }
            };
            match b {
                b'\r' | b'\n' => {
                    let _ = self.writer.set_echo(true).await;
                    self.send("\r\n").await?;
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
                8 | 127 => {
                    if buf.pop().is_some() {
                        self.send("\x08 \x08").await?;
                    }
                }
                32..=126 => {
                    if buf.len() < max_len {
                        buf.push(b);
                        self.send("*").await?;
                    }
                }
                _ => {}
            }
        }
    }

    /// "Press any key to continue..." then wait for one byte.
    pub async fn pause(&mut self) -> Result<()> {
        if self.ansi {
            self.send(&format!(
                "{}Press any key to continue...{}",
                ansi::FG_BRIGHT_CYAN,
                ansi::RESET
            ))
            .await?;
        } else {
            self.send("Press any key to continue...").await?;
        }
        self.get_key().await?;
        self.send("\r\n").await?;
        Ok(())
    }

    /// Like [`Terminal::pause`], but returns after `secs` seconds if no key
    /// arrives. A key that arrives after the timeout is NOT consumed; the
    /// next read primitive will see it.
    pub async fn pause_timeout(&mut self, secs: u64) -> Result<()> {
        if self.ansi {
            self.send(&format!(
                "{}Press any key to continue...{}",
                ansi::FG_BRIGHT_CYAN,
                ansi::RESET
            ))
            .await?;
        } else {
            self.send("Press any key to continue...").await?;
        }
        tokio::select! {
            res = self.reader.read_byte() => {
                res?;
            }
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
        }
        self.send("\r\n").await?;
        Ok(())
    }

    /// Display a prompt and wait for Y or N.
    pub async fn yes_no(&mut self, prompt: &str) -> Result<bool> {
        self.send(&format!("{} (Y/N) ", prompt)).await?;
        loop {
            match self.get_key().await? {
                b'Y' | b'y' => {
                    self.send_line("Yes").await?;
                    return Ok(true);
                }
                b'N' | b'n' => {
                    self.send_line("No").await?;
                    return Ok(false);
                }
                _ => {}
            }
        }
    }

    /// Display a prompt and wait for a single keypress.
    pub async fn hotkey(&mut self, prompt: &str) -> Result<u8> {
        self.send(prompt).await?;
        self.get_key().await
    }

    /// Display a prompt and read a line.
    pub async fn ask(&mut self, prompt: &str, max_len: usize) -> Result<String> {
        self.send(prompt).await?;
        self.get_line(max_len).await
    }

    /// Close the connection (write side; the peer close unblocks the reader).
    pub async fn close(&self) {
        self.writer.close().await;
    }
}
