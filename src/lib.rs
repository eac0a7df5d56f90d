//! # Twilight BBS - A multi-node bulletin board system
//!
//! Twilight BBS is a classic-style bulletin board server for the modern
//! internet. It accepts concurrent Telnet and SSH sessions, drives each caller
//! through operator-scripted ANSI art menus, and coordinates shared state
//! (users, message bases, file areas, live chat, and external DOS "door"
//! programs) across all connected nodes.
//!
//! ## Features
//!
//! - **Telnet + SSH**: RFC 854 option negotiation with NAWS/TTYPE detection on
//!   one port, an SSH-2 server with legacy-client-friendly host keys on another.
//! - **Scripted Menus**: Every screen is a triplet of ANSI art, ASCII art, and
//!   a Lua script. Scripts drive navigation through a queued-signal state
//!   machine and call back into host services through a stable API.
//! - **Art Fields**: `{{ID,width,height}}` placeholders embedded in art files
//!   are indexed by simulating cursor motion, then used for value overlays and
//!   in-place input fields.
//! - **Inter-node Chat**: A broker fans messages between live sessions with
//!   bounded per-subscriber buffers so a slow caller never stalls the rest.
//! - **Doors**: Classic DOS doors run under dosemu2 with DOOR.SYS or
//!   DORINFO1.DEF drop files and a single-user reservation guard.
//! - **Async Design**: Built on Tokio; one task per connection, plus a chat
//!   producer task per session while inside the chat screen.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use twilightbbs::config::Config;
//! use twilightbbs::server::BbsServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let server = BbsServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`server`] - Listeners: telnet protocol filter, SSH transport, health endpoint
//! - [`terminal`] - Byte-level terminal I/O, echo control, ANSI helpers
//! - [`art`] - Display file loading, SAUCE metadata, placeholder field index
//! - [`menu`] - Menu registry and the per-session menu engine
//! - [`script`] - Lua VM and the host API exposed to menu scripts
//! - [`chat`] - Inter-node chat broker and the chat room session
//! - [`node`] - Node manager (capacity gate) and session lifecycle
//! - [`user`], [`message`], [`filearea`] - Sled-backed repositories
//! - [`door`] - DOS door launching, drop files, reservations
//! - [`config`] - Configuration loading and defaults

pub mod art;
pub mod chat;
pub mod config;
pub mod door;
pub mod filearea;
pub mod logutil;
pub mod menu;
pub mod message;
pub mod node;
pub mod script;
pub mod server;
pub mod terminal;
pub mod user;
pub mod validation;
