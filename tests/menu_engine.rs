use std::sync::Arc;

use tokio::io::AsyncReadExt;

use twilightbbs::art::Loader;
use twilightbbs::config::Config;
use twilightbbs::menu::engine::Engine;
use twilightbbs::menu::Registry;
use twilightbbs::script::{PreAuth, ScriptCtx};
use twilightbbs::terminal::Terminal;

struct Harness {
    engine: Engine,
    ctx: Arc<ScriptCtx>,
    remote: tokio::io::DuplexStream,
    _dir: tempfile::TempDir,
}

/// Build an engine over a temp menu directory and an in-memory terminal.
fn harness(menus: &[(&str, &str)]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    for (name, script) in menus {
        std::fs::write(dir.path().join(format!("{}.lua", name)), script).unwrap();
    }

    let registry = Arc::new(Registry::new([dir.path().to_path_buf()]));
    registry.scan().unwrap();

    let (term, remote) = Terminal::over_duplex(80, 24, true);
    let term = Arc::new(tokio::sync::Mutex::new(term));

    let config = Config::default();
    let ctx = ScriptCtx::new(
        1,
        &config,
        term,
        Loader::new([dir.path().to_path_buf()]),
        PreAuth::default(),
        None,
        None,
        None,
        None,
        None,
        None,
    );

    Harness {
        engine: Engine::new(registry, ctx.clone()),
        ctx,
        remote,
        _dir: dir,
    }
}

async fn drain(remote: tokio::io::DuplexStream) -> String {
    let mut remote = remote;
    let mut out = Vec::new();
    let _ = remote.read_to_end(&mut out).await;
    String::from_utf8_lossy(&out).into_owned()
}

// Gosub into a submenu and return: the outer menu's on_enter runs again but
// its on_load does not, and the submenu's on_exit fires exactly once.
#[tokio::test]
async fn gosub_return_does_not_rerun_on_load() {
    let mut h = harness(&[
        (
            "main_menu",
            r#"
            local M = {}
            function M.on_load(node) node.send("LOAD:main;") end
            function M.on_enter(node)
                local visits = node.get_session("visits") or 0
                node.set_session("visits", visits + 1)
                node.send("ENTER:main;")
                if visits == 0 then
                    node.gosub_menu("file_menu")
                else
                    node.disconnect()
                end
            end
            return M
            "#,
        ),
        (
            "file_menu",
            r#"
            local M = {}
            function M.on_enter(node)
                node.send("ENTER:file;")
                node.return_menu()
            end
            function M.on_exit(node) node.send("EXIT:file;") end
            return M
            "#,
        ),
    ]);

    h.engine.run("main_menu").await.unwrap();
    assert_eq!(h.engine.stack_depth(), 0);
    drop(h.engine);
    drop(h.ctx);

    let out = drain(h.remote).await;
    assert_eq!(out.matches("LOAD:main;").count(), 1, "output: {:?}", out);
    assert_eq!(out.matches("ENTER:main;").count(), 2);
    assert_eq!(out.matches("ENTER:file;").count(), 1);
    assert_eq!(out.matches("EXIT:file;").count(), 1);
}

// A goto queued inside on_enter skips the input loop entirely: on_key never
// runs and on_exit runs exactly once.
#[tokio::test]
async fn goto_in_on_enter_skips_input_loop() {
    let mut h = harness(&[
        (
            "menu_a",
            r#"
            local M = {}
            function M.on_enter(node) node.goto_menu("menu_b") end
            function M.on_key(node, key) node.send("KEY:a;") end
            function M.on_exit(node) node.send("EXIT:a;") end
            return M
            "#,
        ),
        (
            "menu_b",
            r#"
            local M = {}
            function M.on_enter(node) node.disconnect() end
            return M
            "#,
        ),
    ]);

    h.engine.run("menu_a").await.unwrap();
    drop(h.engine);
    drop(h.ctx);

    let out = drain(h.remote).await;
    assert_eq!(out.matches("KEY:a;").count(), 0, "output: {:?}", out);
    assert_eq!(out.matches("EXIT:a;").count(), 1);
}

// Navigating to an unknown menu falls back to main_menu once.
#[tokio::test]
async fn unknown_menu_falls_back_to_main_menu() {
    let mut h = harness(&[
        (
            "main_menu",
            r#"
            local M = {}
            function M.on_enter(node)
                node.send("MAIN;")
                node.disconnect()
            end
            return M
            "#,
        ),
        (
            "start",
            r#"
            local M = {}
            function M.on_enter(node) node.goto_menu("no_such_menu") end
            return M
            "#,
        ),
    ]);

    use tokio::io::AsyncWriteExt;
    let (mut remote_rd, mut remote_wr) = tokio::io::split(h.remote);

    let reader = tokio::spawn(async move {
        let mut out = Vec::new();
        let _ = remote_rd.read_to_end(&mut out).await;
        String::from_utf8_lossy(&out).into_owned()
    });

    // The "menu not found" path pauses for a key before redirecting.
    remote_wr.write_all(b" ").await.unwrap();

    h.engine.run("start").await.unwrap();
    drop(h.engine);
    drop(h.ctx);
    drop(remote_wr);

    let out = reader.await.unwrap();
    assert!(out.contains("not found"), "output: {:?}", out);
    assert!(out.contains("MAIN;"), "output: {:?}", out);
}

// Key dispatch: on_key sees each byte, and queued navigation stops the loop.
#[tokio::test]
async fn on_key_dispatch_and_navigation() {
    let mut h = harness(&[(
        "main_menu",
        r#"
        local M = {}
        function M.on_key(node, key)
            node.send("GOT:" .. key .. ";")
            if key == "q" then node.disconnect() end
        end
        return M
        "#,
    )]);

    use tokio::io::AsyncWriteExt;
    let (mut remote_rd, mut remote_wr) = tokio::io::split(h.remote);

    let reader = tokio::spawn(async move {
        let mut out = Vec::new();
        let _ = remote_rd.read_to_end(&mut out).await;
        String::from_utf8_lossy(&out).into_owned()
    });

    remote_wr.write_all(b"xq").await.unwrap();

    h.engine.run("main_menu").await.unwrap();
    drop(h.engine);
    drop(h.ctx);
    drop(remote_wr);

    let out = reader.await.unwrap();
    assert!(out.contains("GOT:x;"), "output: {:?}", out);
    assert!(out.contains("GOT:q;"), "output: {:?}", out);
}

// Line-mode dispatch: the engine prompts with "> " and hands trimmed,
// non-empty lines to on_input.
#[tokio::test]
async fn on_input_dispatch() {
    let mut h = harness(&[(
        "main_menu",
        r#"
        local M = {}
        function M.on_input(node, line)
            node.send("LINE:" .. line .. ";")
            if line == "quit" then node.disconnect() end
        end
        return M
        "#,
    )]);

    use tokio::io::AsyncWriteExt;
    let (mut remote_rd, mut remote_wr) = tokio::io::split(h.remote);

    let reader = tokio::spawn(async move {
        let mut out = Vec::new();
        let _ = remote_rd.read_to_end(&mut out).await;
        String::from_utf8_lossy(&out).into_owned()
    });

    remote_wr.write_all(b"  hello  \rquit\r").await.unwrap();

    h.engine.run("main_menu").await.unwrap();
    drop(h.engine);
    drop(h.ctx);
    drop(remote_wr);

    let out = reader.await.unwrap();
    assert!(out.contains("> "), "prompt missing: {:?}", out);
    assert!(out.contains("LINE:hello;"), "output: {:?}", out);
    assert!(out.contains("LINE:quit;"), "output: {:?}", out);
}

// A script error is a one-line notice, not the end of the session.
#[tokio::test]
async fn script_error_is_not_fatal() {
    let mut h = harness(&[(
        "main_menu",
        r#"
        local M = {}
        function M.on_enter(node)
            node.send("BEFORE;")
            error("boom")
        end
        function M.on_key(node, key) node.disconnect() end
        return M
        "#,
    )]);

    use tokio::io::AsyncWriteExt;
    let (mut remote_rd, mut remote_wr) = tokio::io::split(h.remote);

    let reader = tokio::spawn(async move {
        let mut out = Vec::new();
        let _ = remote_rd.read_to_end(&mut out).await;
        String::from_utf8_lossy(&out).into_owned()
    });

    remote_wr.write_all(b"x").await.unwrap();

    h.engine.run("main_menu").await.unwrap();
    drop(h.engine);
    drop(h.ctx);
    drop(remote_wr);

    let out = reader.await.unwrap();
    assert!(out.contains("BEFORE;"));
    assert!(out.contains("Script error."), "output: {:?}", out);
    // The error text itself never reaches the caller.
    assert!(!out.contains("boom"), "output: {:?}", out);
}
