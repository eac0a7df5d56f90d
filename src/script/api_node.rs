//! The `node` table: terminal I/O, input, fields, navigation and session
//! state, as seen from menu scripts.
//!
//! Terminal failures inside a script surface as queued disconnect signals
//! plus a neutral return value (nil/false); scripts never observe transport
//! errors directly.

use std::sync::Arc;

use mlua::{Lua, Value};

use super::{ScriptCtx, SessionValue};
use crate::chat::room::{run_room_session, RoomSessionConfig};

pub async fn register(lua: &Lua, ctx: &Arc<ScriptCtx>) -> mlua::Result<()> {
    let (width, height, ansi) = {
        let term = ctx.term.lock().await;
        (term.width, term.height, term.ansi)
    };

    let node = lua.create_table()?;
    node.set("width", width)?;
    node.set("height", height)?;
    node.set("ansi", ansi)?;
    node.set("node_id", ctx.node_id)?;
    node.set("bbs_name", ctx.bbs_name.as_str())?;
    node.set("sysop_name", ctx.sysop_name.as_str())?;
    node.set("auth_username", ctx.preauth.username.as_str())?;
    node.set("auth_password", ctx.preauth.password.as_str())?;

    // --- Output ---

    let c = ctx.clone();
    node.set(
        "send",
        lua.create_async_function(move |_, text: String| {
            let c = c.clone();
            async move {
                let term = c.term.lock().await;
                if term.send(&text).await.is_err() {
                    c.note_disconnect();
                }
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "sendln",
        lua.create_async_function(move |_, text: String| {
            let c = c.clone();
            async move {
                let term = c.term.lock().await;
                if term.send_line(&text).await.is_err() {
                    c.note_disconnect();
                }
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "cls",
        lua.create_async_function(move |_, ()| {
            let c = c.clone();
            async move {
                let term = c.term.lock().await;
                if term.cls().await.is_err() {
                    c.note_disconnect();
                }
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "display",
        lua.create_async_function(move |_, name: String| {
            let c = c.clone();
            async move {
                c.display_named(&name).await.map_err(mlua::Error::external)
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "goto_xy",
        lua.create_async_function(move |_, (row, col): (u16, u16)| {
            let c = c.clone();
            async move {
                let term = c.term.lock().await;
                if term.goto_xy(row, col).await.is_err() {
                    c.note_disconnect();
                }
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "color",
        lua.create_async_function(move |_, (fg, bg): (i32, Option<i32>)| {
            let c = c.clone();
            async move {
                let term = c.term.lock().await;
                if term.set_color(fg, bg.unwrap_or(-1)).await.is_err() {
                    c.note_disconnect();
                }
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "pause",
        lua.create_async_function(move |_, secs: Option<u64>| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                let res = match secs {
                    Some(s) => term.pause_timeout(s).await,
                    None => term.pause().await,
                };
                if res.is_err() {
                    c.note_disconnect();
                }
                Ok(())
            }
        })?,
    )?;

    for (name, which) in [
        ("save_cursor", 0u8),
        ("restore_cursor", 1),
        ("hide_cursor", 2),
        ("show_cursor", 3),
    ] {
        let c = ctx.clone();
        node.set(
            name,
            lua.create_async_function(move |_, ()| {
                let c = c.clone();
                async move {
                    let term = c.term.lock().await;
                    let res = match which {
                        0 => term.save_cursor().await,
                        1 => term.restore_cursor().await,
                        2 => term.hide_cursor().await,
                        _ => term.show_cursor().await,
                    };
                    if res.is_err() {
                        c.note_disconnect();
                    }
                    Ok(())
                }
            })?,
        )?;
    }

    // --- Input ---

    let c = ctx.clone();
    node.set(
        "getkey",
        lua.create_async_function(move |_, ()| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                match term.get_key().await {
                    Ok(b) => Ok(Some((b as char).to_string())),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "getline",
        lua.create_async_function(move |_, max: Option<usize>| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                match term.get_line(max.unwrap_or(80)).await {
                    Ok(line) => Ok(Some(line)),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "hotkey",
        lua.create_async_function(move |_, prompt: String| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                match term.hotkey(&prompt).await {
                    Ok(b) => Ok(Some((b as char).to_string())),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "ask",
        lua.create_async_function(move |_, (prompt, max): (String, Option<usize>)| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                match term.ask(&prompt, max.unwrap_or(80)).await {
                    Ok(line) => Ok(Some(line)),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "password",
        lua.create_async_function(move |_, max: Option<usize>| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                match term.get_password(max.unwrap_or(40)).await {
                    Ok(pass) => Ok(Some(pass)),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "yesno",
        lua.create_async_function(move |_, prompt: String| {
            let c = c.clone();
            async move {
                let mut term = c.term.lock().await;
                match term.yes_no(&prompt).await {
                    Ok(answer) => Ok(answer),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(false)
                    }
                }
            }
        })?,
    )?;

    // --- Fields ---

    let c = ctx.clone();
    node.set(
        "field",
        lua.create_function(move |lua, id: String| match c.get_field(&id) {
            Some(f) => {
                let t = lua.create_table()?;
                t.set("row", f.row)?;
                t.set("col", f.col)?;
                t.set("width", f.width)?;
                t.set("height", f.height)?;
                Ok(Some(t))
            }
            None => Ok(None),
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "input_field",
        lua.create_async_function(move |_, (id, max): (String, Option<usize>)| {
            let c = c.clone();
            async move {
                let Some(f) = c.get_field(&id) else {
                    return Ok(None);
                };
                let max_len = field_input_len(&f, max);
                let mut term = c.term.lock().await;
                if term.goto_xy(f.row, f.col).await.is_err() {
                    c.note_disconnect();
                    return Ok(None);
                }
                match term.get_line(max_len).await {
                    Ok(line) => Ok(Some(line)),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "password_field",
        lua.create_async_function(move |_, (id, max): (String, Option<usize>)| {
            let c = c.clone();
            async move {
                let Some(f) = c.get_field(&id) else {
                    return Ok(None);
                };
                let max_len = field_input_len(&f, max);
                let mut term = c.term.lock().await;
                if term.goto_xy(f.row, f.col).await.is_err() {
                    c.note_disconnect();
                    return Ok(None);
                }
                match term.get_password(max_len).await {
                    Ok(pass) => Ok(Some(pass)),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(None)
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "edit_field",
        lua.create_async_function(move |_, (id, current): (String, Option<String>)| {
            let c = c.clone();
            async move {
                let Some(f) = c.get_field(&id) else {
                    return Ok(current);
                };
                let current = current.unwrap_or_default();
                let max_len = field_input_len(&f, None);
                let mut term = c.term.lock().await;

                // Show the current value, then read a replacement in place;
                // an empty entry keeps the old value.
                let shown = super::pad_or_trim(&current, max_len);
                let moved = term.goto_xy(f.row, f.col).await.is_ok()
                    && term.send(&shown).await.is_ok()
                    && term.goto_xy(f.row, f.col).await.is_ok();
                if !moved {
                    c.note_disconnect();
                    return Ok(Some(current));
                }
                match term.get_line(max_len).await {
                    Ok(line) if line.is_empty() => Ok(Some(current)),
                    Ok(line) => Ok(Some(line)),
                    Err(_) => {
                        c.note_disconnect();
                        Ok(Some(current))
                    }
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "output_field",
        lua.create_async_function(
            move |_, (id, text, w, h): (String, String, Option<u16>, Option<u16>)| {
                let c = c.clone();
                async move {
                    output_field(&c, &id, &text, w, h).await;
                    Ok(())
                }
            },
        )?,
    )?;

    // --- Navigation ---

    let c = ctx.clone();
    node.set(
        "goto_menu",
        lua.create_function(move |_, name: String| {
            c.nav.lock().unwrap().next_menu = Some(name);
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "gosub_menu",
        lua.create_function(move |_, name: String| {
            c.nav.lock().unwrap().gosub_menu = Some(name);
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "return_menu",
        lua.create_function(move |_, ()| {
            c.nav.lock().unwrap().return_menu = true;
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "disconnect",
        lua.create_function(move |_, ()| {
            c.note_disconnect();
            Ok(())
        })?,
    )?;

    // --- Session and menu state ---

    let c = ctx.clone();
    node.set(
        "set_session",
        lua.create_function(move |_, (key, value): (String, Value)| {
            c.session_vars
                .lock()
                .unwrap()
                .insert(key, SessionValue::from_lua(&value));
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "get_session",
        lua.create_function(move |lua, key: String| {
            match c.session_vars.lock().unwrap().get(&key) {
                Some(v) => v.to_lua(lua),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "set_state",
        lua.create_function(move |_, (key, value): (String, Value)| {
            let menu = c.current_menu_name();
            c.menu_state
                .lock()
                .unwrap()
                .entry(menu)
                .or_default()
                .insert(key, SessionValue::from_lua(&value));
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "get_state",
        lua.create_function(move |lua, key: String| {
            let menu = c.current_menu_name();
            match c
                .menu_state
                .lock()
                .unwrap()
                .get(&menu)
                .and_then(|m| m.get(&key))
            {
                Some(v) => v.to_lua(lua),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    // --- Inter-node ---

    let c = ctx.clone();
    node.set(
        "show_online",
        lua.create_async_function(move |_, ()| {
            let c = c.clone();
            async move {
                show_online(&c).await;
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "enter_chat",
        lua.create_async_function(move |_, room: Option<String>| {
            let c = c.clone();
            async move {
                enter_chat(&c, room).await;
                Ok(())
            }
        })?,
    )?;

    let c = ctx.clone();
    node.set(
        "launch_door",
        lua.create_async_function(move |_, name: String| {
            let c = c.clone();
            async move {
                match c.door_catalog.iter().find(|d| d.name.eq_ignore_ascii_case(name.trim())) {
                    Some(profile) => Ok(super::api_door::launch_profile(&c, profile.clone()).await),
                    None => Ok(Some(format!("door '{}' not found", name))),
                }
            }
        })?,
    )?;

    lua.globals().set("node", node)?;
    Ok(())
}

fn field_input_len(f: &crate::art::Field, max: Option<usize>) -> usize {
    max.filter(|m| *m > 0)
        .or_else(|| (f.width > 0).then_some(f.width as usize))
        .unwrap_or(80)
}

async fn output_field(c: &ScriptCtx, id: &str, text: &str, w: Option<u16>, h: Option<u16>) {
    let Some(f) = c.get_field(id) else { return };
    if f.row == 0 || f.col == 0 {
        return;
    }
    let width = w
        .filter(|x| *x > 0)
        .or_else(|| (f.width > 0).then_some(f.width))
        .unwrap_or(80) as usize;
    let height = h
        .filter(|x| *x > 0)
        .or_else(|| (f.height > 0).then_some(f.height))
        .unwrap_or(1) as usize;

    let term = c.term.lock().await;
    for r in 0..height {
        if term.goto_xy(f.row + r as u16, f.col).await.is_err() {
            c.note_disconnect();
            return;
        }
        let _ = term.send(&" ".repeat(width)).await;
    }
    for (i, line) in text.lines().take(height).enumerate() {
        let clipped: String = line.trim_end_matches('\r').chars().take(width).collect();
        let _ = term.goto_xy(f.row + i as u16, f.col).await;
        let _ = term.send(&clipped).await;
    }
}

async fn show_online(c: &ScriptCtx) {
    let mut term = c.term.lock().await;
    let Some(broker) = &c.broker else {
        let _ = term.send_line("\r\n  Who's online not available.").await;
        return;
    };

    let users = broker.list_online();
    let _ = term.send_line("").await;
    let _ = term.send_line("  Node  User               Status").await;
    let _ = term.send_line("  ----  -----------------  --------").await;
    for u in &users {
        let status = if u.room.is_empty() {
            "Online".to_string()
        } else {
            format!("Chat: {}", u.room)
        };
        let _ = term
            .send_line(&format!("  {:<4}  {:<17}  {}", u.node_id, u.user_name, status))
            .await;
    }
    if users.is_empty() {
        let _ = term.send_line("  No users online.").await;
    }
    let _ = term.send_line("").await;
    if term.pause().await.is_err() {
        c.note_disconnect();
    }
}

async fn enter_chat(c: &ScriptCtx, room: Option<String>) {
    let Some(broker) = c.broker.clone() else {
        let term = c.term.lock().await;
        let _ = term.send_line("\r\n  Chat not available.").await;
        return;
    };

    let user_name = c.user_display_name();
    let room = room.unwrap_or_else(|| "main".to_string());

    let mut term = c.term.lock().await;
    let template = c.loader.find("chat_room", term.ansi).ok();
    let result = run_room_session(
        &mut term,
        RoomSessionConfig {
            broker,
            node_id: c.node_id,
            user_name,
            room,
            template: template.as_ref(),
        },
    )
    .await;
    drop(term);

    if result.is_err() {
        c.note_disconnect();
    }
    // Redisplay the current menu unless the script queued navigation.
    let mut nav = c.nav.lock().unwrap();
    if !nav.pending() {
        nav.next_menu = Some(c.current_menu_name());
    }
}
