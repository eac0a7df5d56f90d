use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncReadExt;

use twilightbbs::art::{blank_placeholders, index_fields, DisplayFile, Loader};
use twilightbbs::config::Config;
use twilightbbs::script::{PreAuth, ScriptCtx};
use twilightbbs::terminal::Terminal;
use twilightbbs::user::User;

fn test_user(name: &str) -> User {
    let now = Utc::now();
    User {
        id: 1,
        username: name.to_string(),
        password_hash: String::new(),
        real_name: "Alice A".to_string(),
        location: "Oslo".to_string(),
        email: String::new(),
        security_level: 30,
        total_calls: 12,
        last_call_at: None,
        ansi_enabled: true,
        created_at: now,
        updated_at: now,
    }
}

// Render-then-index: the indexed coordinates equal the cursor position the
// placeholder would have been printed at.
#[test]
fn render_then_index_law() {
    let art = b"line one\r\n\x1b[3;5Hmid{{F1,6}}tail";
    let fields = index_fields(art, 80);
    let f = fields.get("F1").unwrap();
    // CUP to (3,5), then "mid" advances three columns.
    assert_eq!((f.row, f.col, f.width), (3, 8, 6));

    let blanked = blank_placeholders(art);
    assert_eq!(blanked.len(), art.len());
    assert!(!blanked.windows(2).any(|w| w == b"{{"));
}

// End-to-end overlay: art positions a USERNAME field at row 5 col 10; the
// client sees the CSI positioning, 14 blanking spaces for the marker, then
// "alice" padded to the declared width printed back at the field site.
#[tokio::test]
async fn field_placeholder_overlay() {
    let (term, remote) = Terminal::over_duplex(80, 24, true);
    let term = Arc::new(tokio::sync::Mutex::new(term));

    let config = Config::default();
    let ctx = ScriptCtx::new(
        1,
        &config,
        term.clone(),
        Loader::new(["."]),
        PreAuth::default(),
        None,
        None,
        None,
        None,
        None,
        None,
    );
    *ctx.current_user.lock().unwrap() = Some(test_user("alice"));

    let df = DisplayFile {
        name: "login".into(),
        path: "login.ans".into(),
        is_ansi: true,
        data: b"\x1b[5;10H{{USERNAME,8}}".to_vec(),
        sauce: None,
    };

    ctx.display_df(&df).await.unwrap();
    drop(ctx);
    drop(term);

    let mut out = Vec::new();
    let mut remote = remote;
    remote.read_to_end(&mut out).await.unwrap();
    let out = String::from_utf8_lossy(&out);

    // The art itself: positioning plus a same-length run of spaces.
    let blanked = format!("\x1b[5;10H{}", " ".repeat("{{USERNAME,8}}".len()));
    assert!(out.starts_with(&blanked), "art not blanked: {:?}", out);
    // The overlay: reposition and print the padded value.
    assert!(
        out.contains("\x1b[5;10Halice   "),
        "overlay missing: {:?}",
        out
    );
}

// The SAUCE width hint takes precedence over the terminal width when
// indexing fields.
#[test]
fn sauce_width_drives_index() {
    use twilightbbs::art::Sauce;

    let df = DisplayFile {
        name: "wide".into(),
        path: "wide.ans".into(),
        is_ansi: true,
        data: b"\x1b[1;100H{{F}}".to_vec(),
        sauce: Some(Sauce {
            tinfo1: 132,
            ..Default::default()
        }),
    };

    let fields = df.fields(80);
    assert_eq!(fields.get("F").unwrap().col, 100);

    let narrow = DisplayFile { sauce: None, ..df };
    let fields = narrow.fields(80);
    // Without the hint, the 80-column terminal clamps the position.
    assert_eq!(fields.get("F").unwrap().col, 80);
}
