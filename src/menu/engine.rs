//! The menu engine: the heart of a session.
//!
//! Runs a loop over scripted menus. Each iteration resolves the descriptor,
//! builds a fresh Lua VM, runs `on_load` (first visit only), streams the art,
//! indexes and overlays placeholder fields, runs `on_enter`, then dispatches
//! input to `on_key` or `on_input` until a navigation signal is queued.
//! `on_exit` fires at most once per menu entry.
//!
//! Handlers communicate purely through queued signals; nothing unwinds
//! through the host. A script error is a one-line notice to the caller and a
//! log entry, never the end of the session. A wire error anywhere is.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use log::warn;
use thiserror::Error;

use super::Registry;
use crate::logutil::clean_for_log;
use crate::script::{NavAction, ScriptCtx, VM};

const FALLBACK_MENU: &str = "main_menu";

#[derive(Debug, Error)]
enum MenuError {
    #[error("menu not found")]
    NotFound,

    #[error("user disconnected")]
    Disconnect,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Drives one session through the menu state machine.
pub struct Engine {
    registry: Arc<Registry>,
    ctx: Arc<ScriptCtx>,
    menu_stack: Vec<String>,
    loaded_menus: HashSet<String>,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, ctx: Arc<ScriptCtx>) -> Self {
        Engine {
            registry,
            ctx,
            menu_stack: Vec::new(),
            loaded_menus: HashSet::new(),
        }
    }

    /// Run the menu loop starting from `start_menu` until the session ends.
    /// Disconnects are a normal way out, not an error.
    pub async fn run(&mut self, start_menu: &str) -> anyhow::Result<()> {
        let mut current = start_menu.to_string();

        loop {
            *self.ctx.current_menu.lock().unwrap() = current.clone();
            if let Some(manager) = &self.ctx.manager {
                manager.set_menu(self.ctx.node_id, &current);
            }

            match self.run_menu(&current).await {
                Ok(()) => {}
                Err(MenuError::Disconnect) => return Ok(()),
                Err(MenuError::NotFound) => {
                    // One-shot recovery through the main menu.
                    if current != FALLBACK_MENU {
                        current = FALLBACK_MENU.to_string();
                        continue;
                    }
                    return Err(anyhow!("menu not found: {}", current));
                }
                Err(MenuError::Other(e)) => return Err(e),
            }

            let action = self.ctx.nav.lock().unwrap().take_action();
            match action {
                NavAction::Disconnect => return Ok(()),
                NavAction::Goto(name) => current = name,
                NavAction::Gosub(name) => {
                    self.menu_stack.push(current);
                    current = name;
                }
                NavAction::Return => match self.menu_stack.pop() {
                    Some(prev) => current = prev,
                    // Returning from the top of the stack ends the session.
                    None => return Ok(()),
                },
                NavAction::Stay => {}
            }
        }
    }

    /// Current gosub depth; zero again by the time the session ends.
    pub fn stack_depth(&self) -> usize {
        self.menu_stack.len()
    }

    async fn run_menu(&mut self, name: &str) -> Result<(), MenuError> {
        let Some(menu) = self.registry.get(name) else {
            warn!("Menu not found: {}", name);
            let mut term = self.ctx.term.lock().await;
            let _ = term.send_line(&format!("\r\nMenu '{}' not found.", name)).await;
            term.pause().await.map_err(|_| MenuError::Disconnect)?;
            return Err(MenuError::NotFound);
        };

        // A fresh VM per menu keeps script state from leaking between
        // screens; cross-menu state rides in the session store.
        let mut vm = VM::new(&self.ctx)
            .await
            .map_err(|e| MenuError::Other(e.into()))?;

        if let Some(script) = &menu.script_path {
            if let Err(e) = vm.load_script(script).await {
                warn!("Script error in menu {}: {}", name, clean_for_log(&e.to_string()));
                let mut term = self.ctx.term.lock().await;
                let _ = term.send_line("\r\nScript error.").await;
                term.pause().await.map_err(|_| MenuError::Disconnect)?;
            }
        }

        let has_script = vm.has_menu();

        if has_script && self.loaded_menus.insert(name.to_string()) {
            self.call_handler(&vm, name, "on_load", None).await;
        }

        self.display_menu_art(&menu).await?;

        if !has_script {
            let mut term = self.ctx.term.lock().await;
            term.pause().await.map_err(|_| MenuError::Disconnect)?;
            return Ok(());
        }

        self.call_handler(&vm, name, "on_enter", None).await;

        if self.ctx.nav_pending() {
            self.call_handler(&vm, name, "on_exit", None).await;
            return Ok(());
        }

        self.input_loop(&vm, name).await?;

        self.call_handler(&vm, name, "on_exit", None).await;
        Ok(())
    }

    async fn display_menu_art(&self, menu: &super::Menu) -> Result<(), MenuError> {
        let ansi = self.ctx.term.lock().await.ansi;
        let Some(path) = menu.display_path(ansi) else {
            return Ok(());
        };
        match self.ctx.loader.load(path) {
            Ok(df) => self
                .ctx
                .display_df(&df)
                .await
                .map_err(|_| MenuError::Disconnect),
            Err(e) => {
                warn!("Failed to load display file {}: {}", path.display(), e);
                Ok(())
            }
        }
    }

    async fn input_loop(&self, vm: &VM, menu_name: &str) -> Result<(), MenuError> {
        let has_on_key = vm.has_handler("on_key");
        let has_on_input = vm.has_handler("on_input");

        if !has_on_key && !has_on_input {
            return Ok(());
        }

        while !self.ctx.nav_pending() {
            if has_on_key {
                let key = {
                    let mut term = self.ctx.term.lock().await;
                    term.get_key().await.map_err(|_| MenuError::Disconnect)?
                };
                self.call_handler(vm, menu_name, "on_key", Some((key as char).to_string()))
                    .await;
            } else {
                let line = {
                    let mut term = self.ctx.term.lock().await;
                    term.send("> ").await.map_err(|_| MenuError::Disconnect)?;
                    term.get_line(80).await.map_err(|_| MenuError::Disconnect)?
                };
                let line = line.trim().to_string();
                if !line.is_empty() {
                    self.call_handler(vm, menu_name, "on_input", Some(line)).await;
                }
            }
        }

        Ok(())
    }

    /// Call a script handler; errors are logged and shown as one line, never
    /// fatal to the session.
    async fn call_handler(&self, vm: &VM, menu_name: &str, handler: &str, arg: Option<String>) {
        if let Err(e) = vm.call_handler(handler, arg).await {
            warn!(
                "Lua error [{}.{}]: {}",
                menu_name,
                handler,
                clean_for_log(&e.to_string())
            );
            let term = self.ctx.term.lock().await;
            let _ = term.send_line("\r\nScript error.").await;
        }
    }
}

/// Convenience used by the session runner: pick the starting menu, falling
/// back to the main menu when the welcome screen is not installed.
pub fn start_menu_for(registry: &Registry) -> String {
    if registry.get("welcome").is_some() {
        "welcome".to_string()
    } else {
        FALLBACK_MENU.to_string()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("stack_depth", &self.menu_stack.len())
            .finish()
    }
}
