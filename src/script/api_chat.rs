//! The `chat` table: direct sends, broadcasts, rooms and who's-online.

use std::sync::Arc;

use mlua::{Lua, Value};

use super::ScriptCtx;
use crate::validation;

pub fn register(lua: &Lua, ctx: &Arc<ScriptCtx>) -> mlua::Result<()> {
    let chat = lua.create_table()?;

    let c = ctx.clone();
    chat.set(
        "send",
        lua.create_function(move |_, (to_node, text): (u32, String)| {
            let Some(broker) = &c.broker else {
                return Ok(Some("chat unavailable".to_string()));
            };
            if let Err(e) = validation::validate_chat_message(&text) {
                return Ok(Some(e.to_string()));
            }
            match broker.send_to(c.node_id, &c.user_display_name(), to_node, &text) {
                Ok(()) => Ok(None),
                Err(e) => Ok(Some(e.to_string())),
            }
        })?,
    )?;

    let c = ctx.clone();
    chat.set(
        "broadcast",
        lua.create_function(move |_, text: String| {
            if let Some(broker) = &c.broker {
                broker.broadcast(c.node_id, &c.user_display_name(), &text);
            }
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    chat.set(
        "online",
        lua.create_function(move |lua, ()| {
            let Some(broker) = &c.broker else {
                return Ok(Value::Nil);
            };
            let t = lua.create_table()?;
            for (i, u) in broker.list_online().iter().enumerate() {
                let ut = lua.create_table()?;
                ut.set("node_id", u.node_id)?;
                ut.set("name", u.user_name.as_str())?;
                ut.set("room", u.room.as_str())?;
                t.set(i + 1, ut)?;
            }
            Ok(Value::Table(t))
        })?,
    )?;

    let c = ctx.clone();
    chat.set(
        "enter_room",
        lua.create_function(move |_, room: String| {
            if let Some(broker) = &c.broker {
                broker.join_room(c.node_id, &room);
                let name = c.user_display_name();
                broker.send_to_room(
                    c.node_id,
                    &name,
                    &room,
                    &format!("*** {} has joined the room ***", name),
                );
            }
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    chat.set(
        "leave_room",
        lua.create_function(move |_, ()| {
            if let Some(broker) = &c.broker {
                // Announce departure before leaving.
                if let Some(room) = broker.current_room(c.node_id) {
                    let name = c.user_display_name();
                    broker.send_to_room(
                        c.node_id,
                        &name,
                        &room,
                        &format!("*** {} has left the room ***", name),
                    );
                }
                broker.leave_room(c.node_id);
            }
            Ok(())
        })?,
    )?;

    let c = ctx.clone();
    chat.set(
        "room_members",
        lua.create_function(move |lua, room: String| {
            let Some(broker) = &c.broker else {
                return Ok(Value::Nil);
            };
            let t = lua.create_table()?;
            for (i, name) in broker.room_members(&room).iter().enumerate() {
                t.set(i + 1, name.as_str())?;
            }
            Ok(Value::Table(t))
        })?,
    )?;

    let c = ctx.clone();
    chat.set(
        "send_room",
        lua.create_function(move |_, (room, text): (String, String)| {
            if let Some(broker) = &c.broker {
                broker.send_to_room(c.node_id, &c.user_display_name(), &room, &text);
            }
            Ok(())
        })?,
    )?;

    lua.globals().set("chat", chat)?;
    Ok(())
}
