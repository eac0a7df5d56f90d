//! Menu descriptors and the startup registry.
//!
//! A menu is a triplet of files sharing a base name in the menus directory:
//! `main_menu.ans` (ANSI art), `main_menu.asc` (ASCII art) and
//! `main_menu.lua` (script). All three are optional; navigation targets must
//! resolve to at least one of them.

pub mod engine;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use log::{info, warn};

/// A discovered menu and the files that make it up.
#[derive(Debug, Clone, Default)]
pub struct Menu {
    pub name: String,
    pub ans_path: Option<PathBuf>,
    pub asc_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
}

impl Menu {
    pub fn has_script(&self) -> bool {
        self.script_path.is_some()
    }

    /// The display file to stream: ANSI art when the caller supports it,
    /// ASCII otherwise, with the ANSI file as a last resort.
    pub fn display_path(&self, ansi_enabled: bool) -> Option<&Path> {
        if ansi_enabled {
            if let Some(p) = &self.ans_path {
                return Some(p);
            }
        }
        if let Some(p) = &self.asc_path {
            return Some(p);
        }
        self.ans_path.as_deref()
    }
}

/// Holds all discovered menus, scanned once at startup.
pub struct Registry {
    menus: RwLock<HashMap<String, Arc<Menu>>>,
    dirs: Vec<PathBuf>,
}

impl Registry {
    pub fn new<P: Into<PathBuf>>(dirs: impl IntoIterator<Item = P>) -> Self {
        Registry {
            menus: RwLock::new(HashMap::new()),
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Discover menu files, grouping by base name.
    pub fn scan(&self) -> Result<()> {
        let mut menus: HashMap<String, Arc<Menu>> = HashMap::new();
        let mut grouped: HashMap<String, Menu> = HashMap::new();

        for dir in &self.dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Menu directory does not exist: {}", dir.display());
                    continue;
                }
                Err(e) => return Err(anyhow!("scan menu dir {}: {}", dir.display(), e)),
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned())
                else {
                    continue;
                };
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();

                let menu = grouped.entry(stem.clone()).or_insert_with(|| Menu {
                    name: stem.clone(),
                    ..Menu::default()
                });
                match ext.as_str() {
                    "ans" => menu.ans_path = Some(path),
                    "asc" => menu.asc_path = Some(path),
                    "lua" => menu.script_path = Some(path),
                    _ => {}
                }
            }
        }

        for (name, menu) in grouped {
            menus.insert(name, Arc::new(menu));
        }

        info!("Loaded {} menus", menus.len());
        *self.menus.write().unwrap() = menus;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Menu>> {
        self.menus.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.menus.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Rescan the menu directories.
    pub fn reload(&self) -> Result<()> {
        self.scan()
    }
}
