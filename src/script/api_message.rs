//! The `msg` table: message areas, reading, posting and new-message scans.

use std::sync::Arc;

use mlua::{Lua, Table, Value};

use super::api_user::current_level;
use super::ScriptCtx;
use crate::message::Message;

fn message_table(lua: &Lua, m: &Message, include_body: bool) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set("id", m.id)?;
    t.set("area_id", m.area_id)?;
    t.set("from", m.from_user.as_str())?;
    t.set("to", m.to_user.as_deref().unwrap_or(""))?;
    t.set("subject", m.subject.as_str())?;
    t.set("date", m.created_at.format("%Y-%m-%d %H:%M").to_string())?;
    if include_body {
        t.set("body", m.body.as_str())?;
    }
    if let Some(reply_to) = m.reply_to {
        t.set("reply_to", reply_to)?;
    }
    Ok(t)
}

pub fn register(lua: &Lua, ctx: &Arc<ScriptCtx>) -> mlua::Result<()> {
    let msg = lua.create_table()?;

    let c = ctx.clone();
    msg.set(
        "areas",
        lua.create_function(move |lua, ()| {
            let Some(repo) = &c.messages else {
                return Ok(Value::Nil);
            };
            let user_id = c.current_user().map(|u| u.id).unwrap_or(0);
            match repo.list_areas_with_new(user_id, current_level(&c)) {
                Ok(summaries) => {
                    let t = lua.create_table()?;
                    for (i, s) in summaries.iter().enumerate() {
                        let at = lua.create_table()?;
                        at.set("id", s.area.id)?;
                        at.set("name", s.area.name.as_str())?;
                        at.set("description", s.area.description.as_str())?;
                        at.set("total", s.total)?;
                        at.set("new", s.unread)?;
                        at.set("read_level", s.area.read_level)?;
                        at.set("write_level", s.area.write_level)?;
                        t.set(i + 1, at)?;
                    }
                    Ok(Value::Table(t))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    msg.set(
        "get_area",
        lua.create_function(move |lua, area_id: u64| {
            let Some(repo) = &c.messages else {
                return Ok(Value::Nil);
            };
            match repo.get_area(area_id) {
                Ok(area) => {
                    let at = lua.create_table()?;
                    at.set("id", area.id)?;
                    at.set("name", area.name.as_str())?;
                    at.set("description", area.description.as_str())?;
                    at.set("total", repo.count_messages(area.id))?;
                    Ok(Value::Table(at))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    msg.set(
        "list",
        lua.create_function(
            move |lua, (area_id, offset, limit): (u64, Option<usize>, Option<usize>)| {
                let Some(repo) = &c.messages else {
                    return Ok(Value::Nil);
                };
                match repo.list_messages(area_id, offset.unwrap_or(0), limit.unwrap_or(20)) {
                    Ok(messages) => {
                        let t = lua.create_table()?;
                        for (i, m) in messages.iter().enumerate() {
                            t.set(i + 1, message_table(lua, m, false)?)?;
                        }
                        Ok(Value::Table(t))
                    }
                    Err(_) => Ok(Value::Nil),
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    msg.set(
        "read",
        lua.create_function(move |lua, msg_id: u64| {
            let Some(repo) = &c.messages else {
                return Ok(Value::Nil);
            };
            match repo.get_message(msg_id) {
                Ok(m) => {
                    // Reading advances the caller's read pointer.
                    if let Some(user) = c.current_user() {
                        let _ = repo.mark_read(user.id, m.area_id, m.id);
                    }
                    Ok(Value::Table(message_table(lua, &m, true)?))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    msg.set(
        "post",
        lua.create_function(
            move |_,
                  (area_id, subject, body, to, reply_to): (
                u64,
                String,
                String,
                Option<String>,
                Option<u64>,
            )| {
                let Some(user) = c.current_user() else {
                    return Ok((None, Some("not logged in".to_string())));
                };
                let Some(repo) = &c.messages else {
                    return Ok((None, Some("messages unavailable".to_string())));
                };

                match repo.get_area(area_id) {
                    Ok(area) if area.write_level > user.security_level => {
                        return Ok((None, Some("insufficient security level".to_string())));
                    }
                    Err(e) => return Ok((None, Some(e.to_string()))),
                    _ => {}
                }

                let to = to.filter(|s| !s.is_empty());
                match repo.post(
                    area_id,
                    &user.username,
                    to.as_deref(),
                    &subject,
                    &body,
                    reply_to.filter(|id| *id > 0),
                ) {
                    Ok(id) => Ok((Some(id), None)),
                    Err(e) => Ok((None, Some(e.to_string()))),
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    msg.set(
        "scan_new",
        lua.create_function(move |lua, area_id: u64| {
            let Some(user) = c.current_user() else {
                return Ok(Value::Nil);
            };
            let Some(repo) = &c.messages else {
                return Ok(Value::Nil);
            };
            match repo.new_messages(user.id, area_id) {
                Ok(messages) => {
                    let t = lua.create_table()?;
                    for (i, m) in messages.iter().enumerate() {
                        t.set(i + 1, message_table(lua, m, true)?)?;
                    }
                    Ok(Value::Table(t))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    msg.set(
        "mark_read",
        lua.create_function(move |_, (area_id, msg_id): (u64, u64)| {
            if let (Some(user), Some(repo)) = (c.current_user(), c.messages.as_ref()) {
                let _ = repo.mark_read(user.id, area_id, msg_id);
            }
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    msg.set(
        "count",
        lua.create_function(move |_, area_id: u64| {
            Ok(c.messages
                .as_ref()
                .map(|r| r.count_messages(area_id))
                .unwrap_or(0))
        })?,
    )?;

    lua.globals().set("msg", msg)?;
    Ok(())
}
