//! Lua scripting runtime and the host API.
//!
//! Each menu gets a fresh [`VM`]: a Lua 5.4 state with the host API
//! registered. The script returns (or assigns to the global `menu`) a table
//! of handler functions - `on_load`, `on_enter`, `on_key`, `on_input`,
//! `on_exit` - which the engine calls with the `node` API table as the first
//! argument.
//!
//! Handlers never unwind the host. Navigation is a one-shot queued signal
//! ([`NavState`]) that handlers write and the engine reads after the handler
//! returns. State that must outlive a menu transition rides in the
//! session-scoped key-value store, not in script globals.

pub mod api_chat;
pub mod api_door;
pub mod api_file;
pub mod api_message;
pub mod api_node;
pub mod api_user;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::Utc;
use mlua::{Function, Lua, Table, Value};

use crate::art::{self, DisplayFile, Field, Loader};
use crate::chat::Broker;
use crate::config::Config;
use crate::door::{DoorProfile, Launcher};
use crate::filearea::FileRepo;
use crate::message::MessageRepo;
use crate::node::NodeManager;
use crate::terminal::Terminal;
use crate::user::{User, UserRepo};

/// Typed primitives storable in the per-session key-value store.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl SessionValue {
    pub fn from_lua(value: &Value) -> SessionValue {
        match value {
            Value::Boolean(b) => SessionValue::Bool(*b),
            Value::Integer(i) => SessionValue::Num(*i as f64),
            Value::Number(n) => SessionValue::Num(*n),
            Value::String(s) => SessionValue::Str(s.to_string_lossy().to_string()),
            _ => SessionValue::Null,
        }
    }

    pub fn to_lua(&self, lua: &Lua) -> mlua::Result<Value> {
        Ok(match self {
            SessionValue::Null => Value::Nil,
            SessionValue::Bool(b) => Value::Boolean(*b),
            SessionValue::Num(n) => Value::Number(*n),
            SessionValue::Str(s) => Value::String(lua.create_string(s)?),
        })
    }
}

/// One-shot navigation intent, written by handlers, consumed by the engine.
#[derive(Debug, Default)]
pub struct NavState {
    pub next_menu: Option<String>,
    pub gosub_menu: Option<String>,
    pub return_menu: bool,
    pub disconnect: bool,
}

/// What the engine should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavAction {
    Goto(String),
    Gosub(String),
    Return,
    Disconnect,
    Stay,
}

impl NavState {
    pub fn pending(&self) -> bool {
        self.next_menu.is_some() || self.gosub_menu.is_some() || self.return_menu || self.disconnect
    }

    /// Consume the queued signal. Disconnect always wins.
    pub fn take_action(&mut self) -> NavAction {
        if self.disconnect {
            *self = NavState::default();
            return NavAction::Disconnect;
        }
        if let Some(menu) = self.next_menu.take() {
            return NavAction::Goto(menu);
        }
        if let Some(menu) = self.gosub_menu.take() {
            return NavAction::Gosub(menu);
        }
        if self.return_menu {
            self.return_menu = false;
            return NavAction::Return;
        }
        NavAction::Stay
    }
}

/// Credentials captured during the SSH handshake; empty for Telnet callers.
#[derive(Debug, Clone, Default)]
pub struct PreAuth {
    pub username: String,
    pub password: String,
}

/// Everything a menu script can reach, shared between the engine and the
/// registered Lua functions.
pub struct ScriptCtx {
    pub node_id: u32,
    pub bbs_name: String,
    pub sysop_name: String,
    pub term: Arc<tokio::sync::Mutex<Terminal>>,
    pub loader: Loader,
    pub preauth: PreAuth,

    pub nav: Mutex<NavState>,
    pub fields: Mutex<HashMap<String, Field>>,
    pub session_vars: Mutex<HashMap<String, SessionValue>>,
    pub menu_state: Mutex<HashMap<String, HashMap<String, SessionValue>>>,
    pub current_menu: Mutex<String>,
    pub current_user: Mutex<Option<User>>,

    pub users: Option<UserRepo>,
    pub messages: Option<MessageRepo>,
    pub files: Option<FileRepo>,
    pub broker: Option<Arc<Broker>>,
    pub doors: Option<Arc<Launcher>>,
    pub door_catalog: Vec<DoorProfile>,
    pub manager: Option<Arc<NodeManager>>,
}

impl ScriptCtx {
    /// Build a context from the server's shared services.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: u32,
        config: &Config,
        term: Arc<tokio::sync::Mutex<Terminal>>,
        loader: Loader,
        preauth: PreAuth,
        users: Option<UserRepo>,
        messages: Option<MessageRepo>,
        files: Option<FileRepo>,
        broker: Option<Arc<Broker>>,
        doors: Option<Arc<Launcher>>,
        manager: Option<Arc<NodeManager>>,
    ) -> Arc<Self> {
        Arc::new(ScriptCtx {
            node_id,
            bbs_name: config.bbs.name.clone(),
            sysop_name: config.bbs.sysop.clone(),
            term,
            loader,
            preauth,
            nav: Mutex::new(NavState::default()),
            fields: Mutex::new(HashMap::new()),
            session_vars: Mutex::new(HashMap::new()),
            menu_state: Mutex::new(HashMap::new()),
            current_menu: Mutex::new(String::new()),
            current_user: Mutex::new(None),
            users,
            messages,
            files,
            broker,
            doors,
            door_catalog: config.doors.iter().map(DoorProfile::from).collect(),
            manager,
        })
    }

    /// Queue a disconnect; used by API functions when a terminal primitive
    /// fails mid-script so the engine unwinds after the handler returns.
    pub fn note_disconnect(&self) {
        self.nav.lock().unwrap().disconnect = true;
    }

    pub fn nav_pending(&self) -> bool {
        self.nav.lock().unwrap().pending()
    }

    pub fn current_user(&self) -> Option<User> {
        self.current_user.lock().unwrap().clone()
    }

    /// Name shown to other nodes: username, or "Node N" before login.
    pub fn user_display_name(&self) -> String {
        match self.current_user() {
            Some(u) => u.username,
            None => format!("Node {}", self.node_id),
        }
    }

    pub fn get_field(&self, id: &str) -> Option<Field> {
        self.fields.lock().unwrap().get(id).cloned()
    }

    pub fn current_menu_name(&self) -> String {
        self.current_menu.lock().unwrap().clone()
    }

    /// Record a logged-in user and propagate the name to presence and the
    /// node roster; the terminal follows the stored ANSI preference.
    pub async fn set_logged_in(&self, user: User) {
        if let Some(broker) = &self.broker {
            broker.update_online_name(self.node_id, &user.username);
        }
        if let Some(manager) = &self.manager {
            manager.set_user(self.node_id, &user.username);
        }
        {
            let mut term = self.term.lock().await;
            term.ansi = user.ansi_enabled;
        }
        *self.current_user.lock().unwrap() = Some(user);
    }

    /// Display a named art file and rebuild the field index from it.
    pub async fn display_named(&self, name: &str) -> Result<()> {
        let ansi = self.term.lock().await.ansi;
        let df = self.loader.find(name, ansi)?;
        self.display_df(&df).await
    }

    /// Stream a display file, index its placeholder fields, overlay the
    /// built-in values, and park the cursor at `{{CURSOR}}` when present.
    pub async fn display_df(&self, df: &DisplayFile) -> Result<()> {
        let term = self.term.lock().await;
        art::display(&term, df).await?;

        let fields = df.fields(term.width);
        *self.fields.lock().unwrap() = fields;

        self.overlay_values(&term).await?;

        if let Some(cursor) = self.get_field("CURSOR") {
            term.goto_xy(cursor.row, cursor.col).await?;
        }
        Ok(())
    }

    async fn overlay_values(&self, term: &Terminal) -> Result<()> {
        if !term.ansi {
            return Ok(());
        }

        self.print_at(term, "NODE_ID", &self.node_id.to_string()).await?;
        self.print_at(term, "NOW", &Utc::now().format("%Y-%m-%d %H:%M").to_string())
            .await?;

        let Some(u) = self.current_user() else {
            return Ok(());
        };

        self.print_at(term, "USERNAME", &u.username).await?;
        self.print_at(term, "NAME", &u.username).await?;
        self.print_at(term, "REAL_NAME", &u.real_name).await?;
        self.print_at(term, "LOCATION", &u.location).await?;
        self.print_at(term, "EMAIL", &u.email).await?;

        self.print_at(term, "LEVEL", &u.security_level.to_string()).await?;
        self.print_at(term, "SECURITY_LEVEL", &u.security_level.to_string())
            .await?;
        self.print_at(term, "CALLS", &u.total_calls.to_string()).await?;
        self.print_at(term, "TOTAL_CALLS", &u.total_calls.to_string()).await?;

        let last_on = u
            .last_call_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        self.print_at(term, "LAST_ON", &last_on).await?;
        self.print_at(term, "CREATED", &u.created_at.format("%Y-%m-%d").to_string())
            .await?;
        self.print_at(term, "UPDATED", &u.updated_at.format("%Y-%m-%d").to_string())
            .await?;

        Ok(())
    }

    /// Print a value at a field location, padded or truncated to the field's
    /// declared width.
    async fn print_at(&self, term: &Terminal, id: &str, value: &str) -> Result<()> {
        let Some(f) = self.get_field(id) else {
            return Ok(());
        };
        let text = if f.width > 0 {
            pad_or_trim(value, f.width as usize)
        } else {
            value.to_string()
        };
        term.goto_xy(f.row, f.col).await?;
        term.send(&text).await?;
        Ok(())
    }
}

/// Truncate or right-pad to an exact character width.
pub fn pad_or_trim(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count > width {
        s.chars().take(width).collect()
    } else {
        let mut out = s.to_string();
        out.extend(std::iter::repeat(' ').take(width - count));
        out
    }
}

/// Convert a user record to the table shape scripts work with.
pub fn user_table(lua: &Lua, u: &User) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set("id", u.id)?;
    t.set("name", u.username.as_str())?;
    t.set("real_name", u.real_name.as_str())?;
    t.set("location", u.location.as_str())?;
    t.set("email", u.email.as_str())?;
    t.set("level", u.security_level)?;
    t.set("calls", u.total_calls)?;
    t.set("ansi", u.ansi_enabled)?;
    if let Some(last) = u.last_call_at {
        t.set("last_on", last.format("%Y-%m-%d %H:%M").to_string())?;
    }
    t.set("created", u.created_at.format("%Y-%m-%d").to_string())?;
    Ok(t)
}

/// A Lua state with the host API registered, holding the loaded menu table.
pub struct VM {
    lua: Lua,
    menu: Option<Table>,
}

impl VM {
    /// Create a fresh VM and register every host module the session's
    /// services allow.
    pub async fn new(ctx: &Arc<ScriptCtx>) -> mlua::Result<VM> {
        let lua = Lua::new();

        api_node::register(&lua, ctx).await?;
        if ctx.users.is_some() {
            api_user::register(&lua, ctx)?;
        }
        if ctx.messages.is_some() {
            api_message::register(&lua, ctx)?;
        }
        if ctx.files.is_some() {
            api_file::register(&lua, ctx)?;
        }
        if ctx.broker.is_some() {
            api_chat::register(&lua, ctx)?;
        }
        if ctx.doors.is_some() {
            api_door::register(&lua, ctx)?;
        }

        Ok(VM { lua, menu: None })
    }

    /// Load and execute a script file. The menu table is either the script's
    /// return value or a global named `menu`.
    pub async fn load_script(&mut self, path: &Path) -> Result<()> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("load script {}: {}", path.display(), e))?;

        let chunk = self
            .lua
            .load(&source)
            .set_name(path.display().to_string());
        let value: Value = chunk
            .eval_async()
            .await
            .map_err(|e| anyhow!("script {}: {}", path.display(), e))?;

        self.menu = match value {
            Value::Table(t) => Some(t),
            _ => match self.lua.globals().get::<Value>("menu") {
                Ok(Value::Table(t)) => Some(t),
                _ => None,
            },
        };
        Ok(())
    }

    pub fn has_menu(&self) -> bool {
        self.menu.is_some()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.menu
            .as_ref()
            .and_then(|m| m.get::<Option<Function>>(name).ok().flatten())
            .is_some()
    }

    fn node_table(&self) -> mlua::Result<Table> {
        self.lua.globals().get::<Table>("node")
    }

    /// Call a menu handler with the node table as first argument. A missing
    /// handler is not an error.
    pub async fn call_handler(&self, name: &str, extra: Option<String>) -> Result<()> {
        let Some(menu) = &self.menu else {
            return Ok(());
        };
        let Some(func) = menu.get::<Option<Function>>(name)? else {
            return Ok(());
        };

        let node = self.node_table()?;
        match extra {
            Some(arg) => func.call_async::<()>((node, arg)).await?,
            None => func.call_async::<()>(node).await?,
        }
        Ok(())
    }
}
