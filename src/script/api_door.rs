//! The `door` table: door availability, the configured catalogue, and
//! launching with a config table.
//!
//! `door.launch` accepts either a name from the `[[doors]]` catalogue or a
//! full config table (`name`, `command`, `drop_file`, `min_level`,
//! `multiuser`, `description`), so operator scripts can own their own door
//! lists. The single-user reservation guard is taken before the subprocess
//! starts and released on every exit path.

use std::sync::Arc;

use log::info;
use mlua::{Lua, Table, Value};

use super::ScriptCtx;
use crate::door::{DoorProfile, DoorSession, DropFileKind};
use crate::logutil::clean_for_log;

pub fn register(lua: &Lua, ctx: &Arc<ScriptCtx>) -> mlua::Result<()> {
    let door = lua.create_table()?;

    let c = ctx.clone();
    door.set(
        "available",
        lua.create_function(move |_, ()| {
            Ok(c.doors.as_ref().map(|d| d.available()).unwrap_or(false))
        })?,
    )?;

    let c = ctx.clone();
    door.set(
        "list",
        lua.create_function(move |lua, ()| {
            let level = c.current_user().map(|u| u.security_level).unwrap_or(0);
            let t = lua.create_table()?;
            let mut i = 1;
            for profile in &c.door_catalog {
                if profile.min_level > level {
                    continue;
                }
                let dt = lua.create_table()?;
                dt.set("name", profile.name.as_str())?;
                dt.set("description", profile.description.as_str())?;
                dt.set("min_level", profile.min_level)?;
                dt.set("multiuser", profile.multiuser)?;
                t.set(i, dt)?;
                i += 1;
            }
            Ok(t)
        })?,
    )?;

    let c = ctx.clone();
    door.set(
        "launch",
        lua.create_async_function(move |_, spec: Value| {
            let c = c.clone();
            async move {
                let profile = match resolve_profile(&c, &spec) {
                    Ok(p) => p,
                    Err(msg) => return Ok(Some(msg)),
                };
                Ok(launch_profile(&c, profile).await)
            }
        })?,
    )?;

    lua.globals().set("door", door)?;
    Ok(())
}

fn resolve_profile(ctx: &ScriptCtx, spec: &Value) -> Result<DoorProfile, String> {
    match spec {
        Value::String(s) => {
            let name = s.to_string_lossy().to_string();
            ctx.door_catalog
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(name.trim()))
                .cloned()
                .ok_or_else(|| format!("door '{}' not found", name))
        }
        Value::Table(t) => profile_from_table(t),
        _ => Err("door.launch expects a name or a config table".to_string()),
    }
}

fn profile_from_table(t: &Table) -> Result<DoorProfile, String> {
    let name: String = t
        .get::<Option<String>>("name")
        .ok()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .ok_or("door config needs a name")?;
    let command: String = t
        .get::<Option<String>>("command")
        .ok()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .ok_or("door config needs a command")?;

    Ok(DoorProfile {
        name,
        command,
        description: t
            .get::<Option<String>>("description")
            .ok()
            .flatten()
            .unwrap_or_default(),
        drop_file: DropFileKind::parse(
            &t.get::<Option<String>>("drop_file")
                .ok()
                .flatten()
                .unwrap_or_default(),
        ),
        min_level: t.get::<Option<i64>>("min_level").ok().flatten().unwrap_or(0),
        multiuser: t
            .get::<Option<bool>>("multiuser")
            .ok()
            .flatten()
            .unwrap_or(false),
    })
}

/// Run a door end to end: level check, reservation, drop file, subprocess
/// bridge. Returns an error string for the script, or None on success.
pub async fn launch_profile(ctx: &ScriptCtx, profile: DoorProfile) -> Option<String> {
    let Some(launcher) = ctx.doors.clone() else {
        return Some("doors unavailable".to_string());
    };
    let Some(user) = ctx.current_user() else {
        return Some("not logged in".to_string());
    };
    if user.security_level < profile.min_level {
        return Some("insufficient security level".to_string());
    }
    if !launcher.available() {
        return Some("dosemu2 is not installed".to_string());
    }

    let guard = match launcher.reserve(&profile) {
        Ok(g) => g,
        Err(e) => return Some(e.to_string()),
    };

    info!(
        "Node {} launching door: {}",
        ctx.node_id,
        clean_for_log(&profile.name)
    );

    let session = DoorSession {
        profile,
        user,
        node_id: ctx.node_id,
        time_left_mins: 60,
        com_port: 0,
        baud_rate: 115_200,
        bbs_name: ctx.bbs_name.clone(),
        sysop_name: ctx.sysop_name.clone(),
    };

    let result = {
        let mut term = ctx.term.lock().await;
        let _ = term
            .send_line(&format!("\r\n  Launching door: {}...", session.profile.name))
            .await;
        launcher.launch(&session, &mut term).await
    };
    drop(guard);

    match result {
        Ok(()) => None,
        Err(e) => Some(format!("door error: {}", e)),
    }
}
