//! Interactive chat room session.
//!
//! Owns the full chat-screen lifecycle for one node: subscribe, join the
//! room, announce arrival, bridge the broker's outbound buffer to the
//! terminal from a producer task while the session task runs the input loop,
//! then announce departure, leave and unsubscribe.
//!
//! When the operator ships a chat template with `{{CHAT_LOG,w,h}}` and
//! `{{INPUT,w}}` fields, messages render into a bounded scrolling rectangle
//! and input is read in place. Producer output and input echo are serialised
//! through one mutex so bytes never interleave.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{oneshot, Mutex};

use super::Broker;
use crate::art::{self, DisplayFile, Field};
use crate::terminal::{ansi, Terminal, TermWriter};

pub struct RoomSessionConfig<'a> {
    pub broker: Arc<Broker>,
    pub node_id: u32,
    pub user_name: String,
    pub room: String,
    /// Optional chat screen template; the classic sequential flow is used
    /// when absent, when ANSI is off, or when required fields are missing.
    pub template: Option<&'a DisplayFile>,
}

/// Run a chat session until the caller quits or the connection drops.
pub async fn run_room_session(term: &mut Terminal, cfg: RoomSessionConfig<'_>) -> Result<()> {
    let RoomSessionConfig {
        broker,
        node_id,
        user_name,
        room,
        template,
    } = cfg;

    let room = if room.is_empty() {
        "main".to_string()
    } else {
        room
    };
    let user_name = if user_name.is_empty() {
        "Unknown".to_string()
    } else {
        user_name
    };

    let ui = template
        .filter(|_| term.ansi)
        .and_then(|df| TemplatedUi::new(term, df));

    match ui {
        Some(ui) => {
            run_templated(term, &broker, node_id, &user_name, &room, template, ui).await
        }
        None => run_simple(term, &broker, node_id, &user_name, &room).await,
    }
}

async fn run_simple(
    term: &mut Terminal,
    broker: &Arc<Broker>,
    node_id: u32,
    user_name: &str,
    room: &str,
) -> Result<()> {
    let mut sub = broker.subscribe(node_id, user_name);
    broker.join_room(node_id, room);
    broker.send_to_room(
        node_id,
        user_name,
        room,
        &format!("*** {} has joined ***", user_name),
    );

    term.cls().await?;
    term.send_line(&format!("  Chat Room: {}", room)).await?;
    term.send_line("  Type /quit to leave, /who to see users").await?;
    term.send_line("  ---------------------------------------------")
        .await?;
    term.send_line("").await?;

    let writer = term.writer();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let producer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = sub.rx.recv() => match msg {
                    Some(m) => {
                        let _ = writer
                            .send_line(&format!("\r<{}> {}", m.from_user, m.text))
                            .await;
                    }
                    None => break,
                },
                _ = &mut done_rx => break,
            }
        }
    });

    loop {
        let line = match term.get_line(200).await {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim().to_string();

        if line == "/quit" || line == "/q" {
            broker.send_to_room(
                node_id,
                user_name,
                room,
                &format!("*** {} has left ***", user_name),
            );
            break;
        }
        if line == "/who" {
            let members = broker.room_members(room);
            term.send_line(&format!("  Users in room: {}", members.join(", ")))
                .await?;
            continue;
        }
        if !line.is_empty() {
            broker.send_to_room(node_id, user_name, room, &line);
            term.send_line(&format!("<{}> {}", user_name, line)).await?;
        }
    }

    let _ = done_tx.send(());
    let _ = producer.await;
    broker.leave_room(node_id);
    broker.unsubscribe(node_id);

    term.send_line("").await?;
    term.send_line("  Left chat room.").await?;
    Ok(())
}

async fn run_templated(
    term: &mut Terminal,
    broker: &Arc<Broker>,
    node_id: u32,
    user_name: &str,
    room: &str,
    template: Option<&DisplayFile>,
    ui: TemplatedUi,
) -> Result<()> {
    let mut sub = broker.subscribe(node_id, user_name);
    broker.join_room(node_id, room);
    broker.send_to_room(
        node_id,
        user_name,
        room,
        &format!("*** {} has joined ***", user_name),
    );

    term.cls().await?;
    if let Some(df) = template {
        art::display(term, df).await?;
    }

    let ui = Arc::new(Mutex::new(ui));
    {
        let mut u = ui.lock().await;
        u.output_field("ROOM", room).await;
        u.output_field("STATUS", "Type /quit to leave, /who to list users")
            .await;
        u.append_system(&format!("*** Joined room: {} ***", room)).await;
    }

    let producer_ui = ui.clone();
    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let producer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = sub.rx.recv() => match msg {
                    Some(m) => {
                        producer_ui
                            .lock()
                            .await
                            .append_message(&m.from_user, &m.text)
                            .await;
                    }
                    None => break,
                },
                _ = &mut done_rx => break,
            }
        }
    });

    loop {
        let line = match read_input_line(term, &ui).await {
            Ok(l) => l,
            Err(_) => break,
        };
        let line = line.trim().to_string();

        if line == "/quit" || line == "/q" {
            broker.send_to_room(
                node_id,
                user_name,
                room,
                &format!("*** {} has left ***", user_name),
            );
            break;
        }
        if line == "/who" {
            let members = broker.room_members(room);
            ui.lock()
                .await
                .append_system(&format!("*** Users in room: {} ***", members.join(", ")))
                .await;
            continue;
        }
        if !line.is_empty() {
            broker.send_to_room(node_id, user_name, room, &line);
            ui.lock().await.append_message(user_name, &line).await;
        }
    }

    let _ = done_tx.send(());
    let _ = producer.await;
    broker.leave_room(node_id);
    broker.unsubscribe(node_id);

    ui.lock().await.output_field("STATUS", "Left chat room.").await;
    Ok(())
}

/// Read a line in place inside the INPUT field, without emitting CRLF.
/// Echo shares the UI mutex with the producer so async log redraws never
/// interleave with typed characters.
async fn read_input_line(term: &mut Terminal, ui: &Arc<Mutex<TemplatedUi>>) -> Result<String> {
    let max_len = {
        let mut u = ui.lock().await;
        u.input.clear();
        u.redraw_input().await;
        u.input_width()
    };

    let mut buf: Vec<u8> = Vec::new();
    loop {
        let b = term.read_byte().await?;
        match b {
            b'\r' | b'\n' => {
                let mut u = ui.lock().await;
                u.input.clear();
                u.redraw_input().await;
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
            8 | 127 => {
                if buf.pop().is_some() {
                    let mut u = ui.lock().await;
                    u.input.pop();
                    u.write("\x08 \x08").await;
                }
            }
            32..=126 => {
                if buf.len() < max_len {
                    buf.push(b);
                    let mut u = ui.lock().await;
                    u.input.push(b);
                    u.write(std::str::from_utf8(&[b]).unwrap_or("")).await;
                }
            }
            _ => {}
        }
    }
}

/// Template-driven chat screen state. All terminal writes go through this
/// struct while it is locked.
struct TemplatedUi {
    writer: TermWriter,
    fields: HashMap<String, Field>,
    log_width: usize,
    log_height: usize,
    logs: Vec<String>,
    input: Vec<u8>,
}

impl TemplatedUi {
    /// Requires CHAT_LOG with explicit width and height, and INPUT with a
    /// width. Returns None so the caller can fall back to the simple flow.
    fn new(term: &Terminal, df: &DisplayFile) -> Option<Self> {
        let fields = df.fields(term.width);

        let log = fields.get("CHAT_LOG")?;
        if log.width == 0 || log.height == 0 {
            return None;
        }
        let input = fields.get("INPUT")?;
        if input.width == 0 {
            return None;
        }

        Some(TemplatedUi {
            writer: term.writer(),
            log_width: log.width as usize,
            log_height: log.height as usize,
            fields,
            logs: Vec::new(),
            input: Vec::new(),
        })
    }

    fn input_width(&self) -> usize {
        self.fields
            .get("INPUT")
            .map(|f| f.width as usize)
            .filter(|w| *w > 0)
            .unwrap_or(200)
    }

    async fn write(&self, s: &str) {
        let _ = self.writer.send(s).await;
    }

    /// Print text into a cleared rectangle at the field site, truncating each
    /// line to the field width and clipping to its height.
    async fn output_field(&self, id: &str, text: &str) {
        let Some(f) = self.fields.get(id) else { return };
        if f.row == 0 || f.col == 0 {
            return;
        }
        let width = if f.width > 0 { f.width as usize } else { 80 };
        let height = if f.height > 0 { f.height as usize } else { 1 };

        let mut out = String::new();
        for r in 0..height {
            out.push_str(&ansi::move_to(f.row + r as u16, f.col));
            out.push_str(&" ".repeat(width));
        }
        for (i, line) in text.lines().take(height).enumerate() {
            let line: String = line.chars().take(width).collect();
            out.push_str(&ansi::move_to(f.row + i as u16, f.col));
            out.push_str(&line);
        }
        self.write(&out).await;
    }

    async fn append_system(&mut self, text: &str) {
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        self.append_log_lines(lines).await;
    }

    async fn append_message(&mut self, from_user: &str, text: &str) {
        self.append_log_lines(vec![format!("<{}> {}", from_user, text)])
            .await;
    }

    async fn append_log_lines(&mut self, lines: Vec<String>) {
        for line in lines {
            let line = line.trim_end_matches('\r').to_string();
            if line.is_empty() {
                continue;
            }
            self.logs.push(line);
        }
        if self.logs.len() > self.log_height {
            self.logs.drain(..self.logs.len() - self.log_height);
        }
        self.redraw_log().await;
        self.redraw_input().await;
    }

    async fn redraw_log(&self) {
        let Some(f) = self.fields.get("CHAT_LOG") else { return };
        let mut out = String::new();
        for r in 0..self.log_height {
            out.push_str(&ansi::move_to(f.row + r as u16, f.col));
            out.push_str(&" ".repeat(self.log_width));
        }
        for (i, line) in self.logs.iter().take(self.log_height).enumerate() {
            let line: String = line.chars().take(self.log_width).collect();
            out.push_str(&ansi::move_to(f.row + i as u16, f.col));
            out.push_str(&line);
        }
        self.write(&out).await;
    }

    async fn redraw_input(&self) {
        let Some(f) = self.fields.get("INPUT") else { return };
        if f.width == 0 {
            return;
        }
        let width = f.width as usize;
        let mut out = String::new();
        out.push_str(&ansi::move_to(f.row, f.col));
        out.push_str(&" ".repeat(width));
        out.push_str(&ansi::move_to(f.row, f.col));
        if !self.input.is_empty() {
            let shown = if self.input.len() > width {
                &self.input[self.input.len() - width..]
            } else {
                &self.input[..]
            };
            out.push_str(&String::from_utf8_lossy(shown));
        }
        self.write(&out).await;
    }
}
