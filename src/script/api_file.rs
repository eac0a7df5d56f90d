//! The `files` table: file areas, listings, search and download counters.

use std::sync::Arc;

use mlua::{Lua, Table, Value};

use super::api_user::current_level;
use super::ScriptCtx;
use crate::filearea::{format_size, Entry};

fn entry_table(lua: &Lua, e: &Entry) -> mlua::Result<Table> {
    let t = lua.create_table()?;
    t.set("id", e.id)?;
    t.set("area_id", e.area_id)?;
    t.set("filename", e.filename.as_str())?;
    t.set("description", e.description.as_str())?;
    t.set("size", e.size_bytes)?;
    t.set("size_str", format_size(e.size_bytes))?;
    t.set("uploader", e.uploader.as_str())?;
    t.set("downloads", e.download_count)?;
    t.set("date", e.uploaded_at.format("%Y-%m-%d").to_string())?;
    Ok(t)
}

pub fn register(lua: &Lua, ctx: &Arc<ScriptCtx>) -> mlua::Result<()> {
    let files = lua.create_table()?;

    let c = ctx.clone();
    files.set(
        "areas",
        lua.create_function(move |lua, ()| {
            let Some(repo) = &c.files else {
                return Ok(Value::Nil);
            };
            match repo.list_areas(current_level(&c)) {
                Ok(summaries) => {
                    let t = lua.create_table()?;
                    for (i, s) in summaries.iter().enumerate() {
                        let at = lua.create_table()?;
                        at.set("id", s.area.id)?;
                        at.set("name", s.area.name.as_str())?;
                        at.set("description", s.area.description.as_str())?;
                        at.set("files", s.file_count)?;
                        at.set("download_level", s.area.download_level)?;
                        at.set("upload_level", s.area.upload_level)?;
                        at.set("path", s.area.disk_path.as_str())?;
                        t.set(i + 1, at)?;
                    }
                    Ok(Value::Table(t))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    files.set(
        "get_area",
        lua.create_function(move |lua, area_id: u64| {
            let Some(repo) = &c.files else {
                return Ok(Value::Nil);
            };
            match repo.get_area(area_id) {
                Ok(area) => {
                    let at = lua.create_table()?;
                    at.set("id", area.id)?;
                    at.set("name", area.name.as_str())?;
                    at.set("description", area.description.as_str())?;
                    at.set("path", area.disk_path.as_str())?;
                    at.set("download_level", area.download_level)?;
                    at.set("upload_level", area.upload_level)?;
                    Ok(Value::Table(at))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    files.set(
        "list",
        lua.create_function(
            move |lua, (area_id, offset, limit): (u64, Option<usize>, Option<usize>)| {
                let Some(repo) = &c.files else {
                    return Ok(Value::Nil);
                };
                match repo.list_files(area_id, offset.unwrap_or(0), limit.unwrap_or(20)) {
                    Ok(entries) => {
                        let t = lua.create_table()?;
                        for (i, e) in entries.iter().enumerate() {
                            t.set(i + 1, entry_table(lua, e)?)?;
                        }
                        Ok(Value::Table(t))
                    }
                    Err(_) => Ok(Value::Nil),
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    files.set(
        "get_file",
        lua.create_function(move |lua, file_id: u64| {
            let Some(repo) = &c.files else {
                return Ok(Value::Nil);
            };
            match repo.get_file(file_id) {
                Ok(e) => Ok(Value::Table(entry_table(lua, &e)?)),
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    files.set(
        "search",
        lua.create_function(move |lua, pattern: String| {
            let Some(repo) = &c.files else {
                return Ok(Value::Nil);
            };
            match repo.search(&pattern, current_level(&c)) {
                Ok(entries) => {
                    let t = lua.create_table()?;
                    for (i, e) in entries.iter().enumerate() {
                        t.set(i + 1, entry_table(lua, e)?)?;
                    }
                    Ok(Value::Table(t))
                }
                Err(_) => Ok(Value::Nil),
            }
        })?,
    )?;

    let c = ctx.clone();
    files.set(
        "add_entry",
        lua.create_function(
            move |_,
                  (area_id, filename, description, size): (
                u64,
                String,
                Option<String>,
                Option<u64>,
            )| {
                let Some(user) = c.current_user() else {
                    return Ok((None, Some("not logged in".to_string())));
                };
                let Some(repo) = &c.files else {
                    return Ok((None, Some("files unavailable".to_string())));
                };
                match repo.add_entry(
                    area_id,
                    &filename,
                    description.as_deref().unwrap_or(""),
                    size.unwrap_or(0),
                    &user.username,
                ) {
                    Ok(id) => Ok((Some(id), None)),
                    Err(e) => Ok((None, Some(e.to_string()))),
                }
            },
        )?,
    )?;

    let c = ctx.clone();
    files.set(
        "increment_download",
        lua.create_function(move |_, file_id: u64| {
            let Some(repo) = &c.files else {
                return Ok(Some("files unavailable".to_string()));
            };
            match repo.increment_download(file_id) {
                Ok(()) => Ok(None),
                Err(e) => Ok(Some(e.to_string())),
            }
        })?,
    )?;

    lua.globals().set("files", files)?;
    Ok(())
}
