//! Log hygiene for caller-supplied text.
//!
//! Menu scripts, chat lines and terminal input can carry control bytes that
//! would corrupt the server log, or replay escape sequences on a sysop's
//! terminal tailing it. Anything logged from those sources goes through
//! [`clean_for_log`] first.

const MAX_LOGGED_CHARS: usize = 160;

/// Render a string safe for a single log line. ASCII control characters
/// become caret notation (`^[` for ESC, `^M` for CR), DEL becomes `^?`,
/// other control code points become U+FFFD, and anything past 160 characters
/// is cut with a `...` marker.
pub fn clean_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_LOGGED_CHARS) + 4);
    for (i, ch) in s.chars().enumerate() {
        if i == MAX_LOGGED_CHARS {
            out.push_str("...");
            break;
        }
        match ch {
            '\x7f' => out.push_str("^?"),
            c if c.is_ascii_control() => {
                out.push('^');
                out.push(((c as u8) ^ 0x40) as char);
            }
            c if c.is_control() => out.push('\u{fffd}'),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::clean_for_log;

    #[test]
    fn caret_escapes_ansi_sequences() {
        assert_eq!(clean_for_log("\x1b[2Jboo"), "^[[2Jboo");
    }

    #[test]
    fn caret_escapes_line_breaks_and_del() {
        assert_eq!(clean_for_log("one\r\ntwo\x7f"), "one^M^Jtwo^?");
        assert_eq!(clean_for_log("a\tb"), "a^Ib");
    }

    #[test]
    fn long_values_are_cut() {
        let long = "x".repeat(500);
        let cleaned = clean_for_log(&long);
        assert!(cleaned.ends_with("..."));
        assert_eq!(cleaned.chars().count(), 163);
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(clean_for_log("alice posted to General"), "alice posted to General");
    }
}
