//! Drop file writers.
//!
//! External door programs read session context from a well-known plain-text
//! file written before launch. Two classic formats are supported bit-exactly:
//! DOOR.SYS (43 CRLF-terminated lines) and DORINFO1.DEF (13 lines).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::Local;

use super::{DoorSession, DropFileKind};

/// Write the drop file the door expects and return its path.
pub fn write_drop_file(dir: &Path, session: &DoorSession) -> Result<PathBuf> {
    match session.profile.drop_file {
        DropFileKind::DorInfo => write_dorinfo(dir, session),
        DropFileKind::DoorSys => write_door_sys(dir, session),
    }
}

/// DOOR.SYS - the most widely supported drop file format.
pub fn write_door_sys(dir: &Path, s: &DoorSession) -> Result<PathBuf> {
    let path = dir.join("DOOR.SYS");
    let u = &s.user;
    let now = Local::now();

    let lines: Vec<String> = vec![
        format!("COM{}:", s.com_port),            // 1: COM port
        s.baud_rate.to_string(),                  // 2: baud rate
        "8".into(),                               // 3: data bits
        s.node_id.to_string(),                    // 4: node number
        s.baud_rate.to_string(),                  // 5: DTE rate
        "Y".into(),                               // 6: screen display
        "Y".into(),                               // 7: printer toggle
        "Y".into(),                               // 8: page bell
        "Y".into(),                               // 9: caller alarm
        u.username.clone(),                       // 10: user name
        u.location.clone(),                       // 11: calling from
        String::new(),                            // 12: home phone
        String::new(),                            // 13: work phone
        String::new(),                            // 14: password (never sent)
        u.security_level.to_string(),             // 15: security level
        u.total_calls.to_string(),                // 16: total calls
        now.format("%m/%d/%Y").to_string(),       // 17: last call date
        (s.time_left_mins * 60).to_string(),      // 18: seconds remaining
        s.time_left_mins.to_string(),             // 19: minutes remaining
        "GR".into(),                              // 20: graphics mode (GR=ANSI)
        "25".into(),                              // 21: screen height
        "Y".into(),                               // 22: expert mode
        String::new(),                            // 23: conferences registered
        String::new(),                            // 24: current conference
        String::new(),                            // 25: expiration date
        u.id.to_string(),                         // 26: user record number
        "Y".into(),                               // 27: default protocol
        "0".into(),                               // 28: total uploads
        "0".into(),                               // 29: total downloads
        "0".into(),                               // 30: daily download K
        "999999".into(),                          // 31: daily download K limit
        now.format("%m/%d/%Y").to_string(),       // 32: caller's birthday
        String::new(),                            // 33: path to user files
        String::new(),                            // 34: path to door files
        now.format("%H:%M").to_string(),          // 35: time of this call
        now.format("%H:%M").to_string(),          // 36: time of last call
        "32768".into(),                           // 37: max daily files
        "0".into(),                               // 38: files downloaded today
        "0".into(),                               // 39: total uploaded K
        "0".into(),                               // 40: total downloaded K
        String::new(),                            // 41: user comment
        "0".into(),                               // 42: doors opened
        "0".into(),                               // 43: msgs left
    ];

    write_lines(&path, &lines)?;
    Ok(path)
}

/// DORINFO1.DEF - the RBBS-style 13-line format. The filename carries the
/// node number.
pub fn write_dorinfo(dir: &Path, s: &DoorSession) -> Result<PathBuf> {
    let path = dir.join(format!("DORINFO{}.DEF", s.node_id));
    let u = &s.user;

    let mut parts = u.real_name.splitn(2, ' ');
    let first_name = match parts.next() {
        Some("") | None => u.username.as_str(),
        Some(f) => f,
    };
    let last_name = parts.next().unwrap_or("");

    let lines: Vec<String> = vec![
        s.bbs_name.clone(),                          // 1: BBS name
        s.sysop_name.clone(),                        // 2: sysop first name
        String::new(),                               // 3: sysop last name
        format!("COM{}", s.com_port),                // 4: COM port
        format!("{} BAUD,N,8,1", s.baud_rate),       // 5: baud rate
        "0".into(),                                  // 6: network type
        first_name.to_string(),                      // 7: user first name
        last_name.to_string(),                       // 8: user last name
        u.location.clone(),                          // 9: user location
        "1".into(),                                  // 10: ANSI mode (0=no, 1=yes)
        u.security_level.to_string(),                // 11: security level
        s.time_left_mins.to_string(),                // 12: minutes remaining
        "-1".into(),                                 // 13: fossil flag (-1=door handles)
    ];

    write_lines(&path, &lines)?;
    Ok(path)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("create drop file dir: {}", e))?;
    }
    let content = lines.join("\r\n") + "\r\n";
    std::fs::write(path, content).map_err(|e| anyhow!("write {}: {}", path.display(), e))?;
    Ok(())
}
