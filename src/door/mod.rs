//! DOS door launching.
//!
//! Doors are external programs (historically DOS) run under dosemu2 in dumb
//! terminal mode, with the caller's terminal bridged to the emulator's stdio.
//! The launcher owns per-door in-use counters: a door declared single-user
//! can never be entered twice concurrently, and every reservation is released
//! when its guard drops, whatever path the session takes out.

pub mod dropfile;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::config::DoorConfig;
use crate::logutil::clean_for_log;
use crate::terminal::Terminal;
use crate::user::User;

/// Drop file formats understood by door programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropFileKind {
    DoorSys,
    DorInfo,
}

impl DropFileKind {
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("DORINFO1.DEF") {
            DropFileKind::DorInfo
        } else {
            DropFileKind::DoorSys
        }
    }
}

/// Runtime description of one door, from `[[doors]]` config or a script table.
#[derive(Debug, Clone)]
pub struct DoorProfile {
    pub name: String,
    pub command: String,
    pub description: String,
    pub drop_file: DropFileKind,
    pub min_level: i64,
    pub multiuser: bool,
}

impl From<&DoorConfig> for DoorProfile {
    fn from(cfg: &DoorConfig) -> Self {
        DoorProfile {
            name: cfg.name.clone(),
            command: cfg.command.clone(),
            description: cfg.description.clone(),
            drop_file: DropFileKind::parse(&cfg.drop_file),
            min_level: cfg.min_level,
            multiuser: cfg.multiuser,
        }
    }
}

/// Context for one door run.
#[derive(Debug, Clone)]
pub struct DoorSession {
    pub profile: DoorProfile,
    pub user: User,
    pub node_id: u32,
    pub time_left_mins: i64,
    pub com_port: u32,
    pub baud_rate: u32,
    pub bbs_name: String,
    pub sysop_name: String,
}

#[derive(Debug, Error)]
pub enum DoorError {
    #[error("door '{name}' is currently in use ({count} user(s))")]
    InUse { name: String, count: u32 },

    #[error("invalid door command: {0}")]
    InvalidCommand(String),
}

/// Releases the door reservation when dropped.
#[derive(Debug)]
pub struct DoorGuard {
    key: String,
    counters: Arc<Mutex<HashMap<String, u32>>>,
}

impl Drop for DoorGuard {
    fn drop(&mut self) {
        let mut map = self.counters.lock().unwrap();
        if let Some(count) = map.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// Manages launching DOS doors via dosemu2.
pub struct Launcher {
    dosemu_path: String,
    drive_c: String,
    temp_dir: PathBuf,
    counters: Arc<Mutex<HashMap<String, u32>>>,
}

impl Launcher {
    pub fn new(dosemu_path: &str, drive_c: &str, temp_dir: impl Into<PathBuf>) -> Self {
        Launcher {
            dosemu_path: dosemu_path.to_string(),
            drive_c: drive_c.to_string(),
            temp_dir: temp_dir.into(),
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether dosemu2 is installed and reachable.
    pub fn available(&self) -> bool {
        let path = Path::new(&self.dosemu_path);
        if path.components().count() > 1 {
            return path.exists();
        }
        // Bare command name: search PATH.
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(&self.dosemu_path).exists())
            })
            .unwrap_or(false)
    }

    /// Current user count inside a door (case-insensitive name).
    pub fn users_in_door(&self, name: &str) -> u32 {
        let key = door_key(name);
        *self.counters.lock().unwrap().get(&key).unwrap_or(&0)
    }

    /// Reserve a seat in a door. Single-user doors admit one caller at a
    /// time; the returned guard releases the seat on drop.
    pub fn reserve(&self, profile: &DoorProfile) -> Result<DoorGuard, DoorError> {
        let key = door_key(&profile.name);
        let mut map = self.counters.lock().unwrap();
        let count = map.entry(key.clone()).or_insert(0);
        if !profile.multiuser && *count >= 1 {
            return Err(DoorError::InUse {
                name: profile.name.trim().to_string(),
                count: *count,
            });
        }
        *count += 1;
        Ok(DoorGuard {
            key,
            counters: self.counters.clone(),
        })
    }

    /// Launch a door and bridge its stdio to the caller's terminal. Blocks
    /// until the door exits or the caller disconnects.
    pub async fn launch(&self, session: &DoorSession, term: &mut Terminal) -> Result<()> {
        validate_door_command(&session.profile.command)?;

        let session_dir = self.temp_dir.join(format!("node{}", session.node_id));
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| anyhow!("create session dir: {}", e))?;

        let drop_path = dropfile::write_drop_file(&session_dir, session)?;
        let drop_dir = session_dir.to_string_lossy().into_owned();

        let command = session
            .profile
            .command
            .replace("{NODE}", &session.node_id.to_string())
            .replace("{DROP}", &drop_dir);

        info!(
            "Door: launching {} for node {} (drop file: {})",
            clean_for_log(&session.profile.name),
            session.node_id,
            drop_path.display()
        );

        // Per-session DOSEMU local dir so nothing depends on a home-directory
        // ~/.dosemu existing inside containers.
        let dosemu_local = session_dir.join(".dosemu");
        std::fs::create_dir_all(&dosemu_local)
            .map_err(|e| anyhow!("create dosemu local dir: {}", e))?;
        std::fs::write(dosemu_local.join("dosemurc"), dosemu_rc())
            .map_err(|e| anyhow!("write dosemu rc: {}", e))?;

        let mut child = Command::new(&self.dosemu_path)
            .arg("-t") // dumb terminal mode
            .arg("-E")
            .arg(&command)
            .arg("--Flocal_dir")
            .arg(&dosemu_local)
            .arg("--Fdrive_c")
            .arg(&self.drive_c)
            .current_dir(&session_dir)
            .env("DOORWAY_NODE", session.node_id.to_string())
            .env("DOORWAY_DROP", drop_path.as_os_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("start dosemu: {}", e))?;

        let mut child_stdin = child.stdin.take().ok_or_else(|| anyhow!("stdin pipe"))?;
        let child_stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout pipe"))?;
        let child_stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr pipe"))?;

        // Door -> caller.
        let out_writer = term.writer();
        let out_task = tokio::spawn(async move {
            let mut rd = child_stdout;
            let mut buf = [0u8; 1024];
            loop {
                match rd.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if out_writer.write(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Door diagnostics -> caller, minus the emulator's container noise.
        let err_writer = term.writer();
        let node_id = session.node_id;
        let err_task = tokio::spawn(async move {
            let mut lines = BufReader::new(child_stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if ignore_dosemu_noise(&line) {
                    continue;
                }
                if err_writer.send_line(&line).await.is_err() {
                    warn!("Door: stderr relay lost terminal (node {})", node_id);
                    break;
                }
            }
        });

        // Caller -> door, until the door exits or the caller disconnects.
        let mut input_open = true;
        let status = loop {
            if input_open {
                tokio::select! {
                    status = child.wait() => break status,
                    res = term.read_byte() => match res {
                        Ok(b) => {
                            let _ = child_stdin.write_all(&[b]).await;
                        }
                        Err(_) => {
                            input_open = false;
                            let _ = child.start_kill();
                        }
                    }
                }
            } else {
                break child.wait().await;
            }
        };

        // Bounded drain window for the output relays.
        drop(child_stdin);
        let drain = Duration::from_millis(500);
        if tokio::time::timeout(drain, out_task).await.is_err() {
            warn!("Door: stdout relay still running after exit (node {})", session.node_id);
        }
        let _ = tokio::time::timeout(drain, err_task).await;

        match status {
            Ok(st) if st.success() => {
                info!(
                    "Door {} exited normally for node {}",
                    session.profile.name, session.node_id
                );
            }
            Ok(st) => {
                // Door exit codes are often non-zero; not an error.
                info!(
                    "Door {} exited with status {} for node {}",
                    session.profile.name, st, session.node_id
                );
            }
            Err(e) => warn!("Door {} wait error: {}", session.profile.name, e),
        }

        let _ = std::fs::remove_dir_all(&session_dir);
        Ok(())
    }
}

fn door_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn dosemu_rc() -> &'static str {
    // Keep DOSEMU quiet in container/stdio mode: emulated CPU (no /dev/kvm),
    // explicit keyboard layout, no sound probing.
    "$_cpu_vm = \"emulated\"\n\
     $_cpu_vm_dpmi = \"emulated\"\n\
     $_layout = \"us\"\n\
     $_speaker = \"off\"\n\
     $_sound = (off)\n"
}

fn ignore_dosemu_noise(line: &str) -> bool {
    line.starts_with("ERROR: KVM: error opening /dev/kvm:")
        || line.starts_with("ERROR: Unable to open console or check with X")
        || line.starts_with("Please specify your keyboard map explicitly")
        || line.starts_with("ERROR: ladspa:")
        || line.starts_with("ERROR: libao:")
        || line == "Your kernel is too old, not using Landlock"
        || line == "ERROR: landlock_init() failed"
        || line == "ERROR: kbd: EOF from stdin"
}

/// Door commands are operator-supplied but still pass a deny list: shell
/// metacharacters, control bytes, non-printable characters, 256-byte cap.
pub fn validate_door_command(cmd: &str) -> Result<(), DoorError> {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return Err(DoorError::InvalidCommand("empty".into()));
    }
    if cmd.len() > 256 {
        return Err(DoorError::InvalidCommand("too long".into()));
    }
    if cmd.chars().any(|c| matches!(c, '&' | '|' | ';' | '>' | '<' | '`' | '$')) {
        return Err(DoorError::InvalidCommand(
            "contains shell metacharacters".into(),
        ));
    }
    if cmd.chars().any(|c| !(' '..='~').contains(&c)) {
        return Err(DoorError::InvalidCommand(
            "contains non-printable characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, multiuser: bool) -> DoorProfile {
        DoorProfile {
            name: name.to_string(),
            command: "START.BAT {NODE}".to_string(),
            description: String::new(),
            drop_file: DropFileKind::DoorSys,
            min_level: 0,
            multiuser,
        }
    }

    #[test]
    fn single_user_door_denied_when_in_use() {
        let launcher = Launcher::new("/usr/bin/dosemu", "./doors/drive_c", "./data/doors_tmp");
        let cfg = profile("Legend of the Red Dragon", false);

        let guard = launcher.reserve(&cfg).expect("first reserve succeeds");
        assert_eq!(launcher.users_in_door(&cfg.name), 1);

        let err = launcher.reserve(&cfg).expect_err("second reserve fails");
        assert!(err.to_string().contains("currently in use"));

        drop(guard);
        assert_eq!(launcher.users_in_door(&cfg.name), 0);
        launcher.reserve(&cfg).expect("reserve after release succeeds");
    }

    #[test]
    fn multiuser_door_allows_concurrent() {
        let launcher = Launcher::new("/usr/bin/dosemu", "./doors/drive_c", "./data/doors_tmp");
        let cfg = profile("TradeWars", true);

        let _g1 = launcher.reserve(&cfg).unwrap();
        let _g2 = launcher.reserve(&cfg).unwrap();
        assert_eq!(launcher.users_in_door("TRADEWARS"), 2);
    }

    #[test]
    fn door_names_normalize() {
        let launcher = Launcher::new("/usr/bin/dosemu", "./doors/drive_c", "./data/doors_tmp");
        let cfg = profile("  DARKNESS ", false);
        let _g = launcher.reserve(&cfg).unwrap();
        assert_eq!(launcher.users_in_door("darkness"), 1);
        assert_eq!(launcher.users_in_door("DARKNESS"), 1);
    }

    #[test]
    fn in_use_error_has_classic_wording() {
        let launcher = Launcher::new("/usr/bin/dosemu", "./doors/drive_c", "./data/doors_tmp");
        let cfg = profile("DARKNESS", false);
        let _g = launcher.reserve(&cfg).unwrap();
        let err = launcher.reserve(&cfg).unwrap_err();
        assert_eq!(
            err.to_string(),
            "door 'DARKNESS' is currently in use (1 user(s))"
        );
    }

    #[test]
    fn command_validation() {
        assert!(validate_door_command("LORD.EXE /N{NODE}").is_ok());
        assert!(validate_door_command("").is_err());
        assert!(validate_door_command("a; rm -rf /").is_err());
        assert!(validate_door_command("a | b").is_err());
        assert!(validate_door_command("a`b`").is_err());
        assert!(validate_door_command("a $HOME").is_err());
        assert!(validate_door_command("bad\r\nnewline").is_err());
        assert!(validate_door_command(&"x".repeat(300)).is_err());
    }
}
