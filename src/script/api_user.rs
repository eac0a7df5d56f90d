//! The `users` table: login, registration and profile management.
//!
//! Repository failures come back to the script as error strings, never as
//! raised errors; a nil first return plus a message is the convention.

use std::sync::Arc;

use mlua::{Lua, Value};

use super::{user_table, ScriptCtx};

pub fn register(lua: &Lua, ctx: &Arc<ScriptCtx>) -> mlua::Result<()> {
    let users = lua.create_table()?;

    let c = ctx.clone();
    users.set(
        "login",
        lua.create_async_function(
            move |lua, (username, password): (String, String)| {
                let c = c.clone();
                async move {
                    let Some(repo) = &c.users else {
                        return Ok((Value::Nil, Some("users unavailable".to_string())));
                    };
                    match repo.authenticate(&username, &password) {
                        Ok(user) => {
                            let t = user_table(&lua, &user)?;
                            c.set_logged_in(user).await;
                            Ok((Value::Table(t), None))
                        }
                        Err(e) => Ok((Value::Nil, Some(e.to_string()))),
                    }
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    users.set(
        "register",
        lua.create_async_function(
            move |lua,
                  (username, password, real_name, location, email): (
                String,
                String,
                Option<String>,
                Option<String>,
                Option<String>,
            )| {
                let c = c.clone();
                async move {
                    let Some(repo) = &c.users else {
                        return Ok((Value::Nil, Some("users unavailable".to_string())));
                    };
                    if repo.exists(&username) {
                        return Ok((Value::Nil, Some("username already exists".to_string())));
                    }
                    match repo.create(
                        &username,
                        &password,
                        real_name.as_deref().unwrap_or(""),
                        location.as_deref().unwrap_or(""),
                        email.as_deref().unwrap_or(""),
                    ) {
                        Ok(user) => {
                            let t = user_table(&lua, &user)?;
                            c.set_logged_in(user).await;
                            Ok((Value::Table(t), None))
                        }
                        Err(e) => Ok((Value::Nil, Some(e.to_string()))),
                    }
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    users.set(
        "exists",
        lua.create_function(move |_, username: String| {
            Ok(c.users.as_ref().map(|r| r.exists(&username)).unwrap_or(false))
        })?,
    )?;

    let c = ctx.clone();
    users.set(
        "get_current",
        lua.create_function(move |lua, ()| match c.current_user() {
            Some(user) => Ok(Value::Table(user_table(lua, &user)?)),
            None => Ok(Value::Nil),
        })?,
    )?;

    let c = ctx.clone();
    users.set(
        "update_profile",
        lua.create_function(
            move |_, (real_name, location, email): (String, String, String)| {
                let Some(user) = c.current_user() else {
                    return Ok(Some("not logged in".to_string()));
                };
                let Some(repo) = &c.users else {
                    return Ok(Some("users unavailable".to_string()));
                };
                match repo.update_profile(&user.username, &real_name, &location, &email) {
                    Ok(()) => {
                        let mut cur = c.current_user.lock().unwrap();
                        if let Some(u) = cur.as_mut() {
                            u.real_name = real_name;
                            u.location = location;
                            u.email = email;
                        }
                        Ok(None)
                    }
                    Err(e) => Ok(Some(e.to_string())),
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    users.set(
        "update_password",
        lua.create_function(move |_, new_password: String| {
            let Some(user) = c.current_user() else {
                return Ok(Some("not logged in".to_string()));
            };
            let Some(repo) = &c.users else {
                return Ok(Some("users unavailable".to_string()));
            };
            match repo.update_password(&user.username, &new_password) {
                Ok(()) => Ok(None),
                Err(e) => Ok(Some(e.to_string())),
            }
        })?,
    )?;

    let c = ctx.clone();
    users.set(
        "update_ansi",
        lua.create_async_function(move |_, enabled: bool| {
            let c = c.clone();
            async move {
                let Some(user) = c.current_user() else {
                    return Ok(Some("not logged in".to_string()));
                };
                let Some(repo) = &c.users else {
                    return Ok(Some("users unavailable".to_string()));
                };
                match repo.update_ansi(&user.username, enabled) {
                    Ok(()) => {
                        c.term.lock().await.ansi = enabled;
                        let mut cur = c.current_user.lock().unwrap();
                        if let Some(u) = cur.as_mut() {
                            u.ansi_enabled = enabled;
                        }
                        Ok(None)
                    }
                    Err(e) => Ok(Some(e.to_string())),
                }
            }
        })?,
    )?;

    let c = ctx.clone();
    users.set(
        "list",
        lua.create_function(move |lua, ()| {
            let Some(repo) = &c.users else {
                return Ok(Value::Nil);
            };
            match repo.list() {
                Ok(all) => {
                    let t = lua.create_table()?;
                    for (i, user) in all.iter().enumerate() {
                        t.set(i + 1, user_table(lua, user)?)?;
                    }
                    Ok(Value::Table(t))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    lua.globals().set("users", users)?;
    Ok(())
}

// Shared by the message/file modules, which resolve the caller's level the
// same way.
pub(super) fn current_level(ctx: &ScriptCtx) -> i64 {
    ctx.current_user().map(|u| u.security_level).unwrap_or(0)
}
