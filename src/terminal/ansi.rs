//! ANSI escape sequence constants and builders used by the terminal layer
//! and by menu scripts (via the node API color/goto helpers).

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const BLINK: &str = "\x1b[5m";
pub const REVERSE: &str = "\x1b[7m";

// Foreground colors
pub const FG_BLACK: &str = "\x1b[30m";
pub const FG_RED: &str = "\x1b[31m";
pub const FG_GREEN: &str = "\x1b[32m";
pub const FG_BROWN: &str = "\x1b[33m";
pub const FG_BLUE: &str = "\x1b[34m";
pub const FG_MAGENTA: &str = "\x1b[35m";
pub const FG_CYAN: &str = "\x1b[36m";
pub const FG_GRAY: &str = "\x1b[37m";

// Bright foreground helpers (bold + foreground)
pub const FG_YELLOW: &str = "\x1b[1;33m";
pub const FG_WHITE: &str = "\x1b[1;37m";
pub const FG_BRIGHT_CYAN: &str = "\x1b[1;36m";
pub const FG_BRIGHT_GREEN: &str = "\x1b[1;32m";
pub const FG_BRIGHT_RED: &str = "\x1b[1;31m";

/// Clear the screen and home the cursor.
pub fn clear_screen() -> &'static str {
    "\x1b[2J\x1b[1;1H"
}

/// Cursor positioning sequence (1-based row and column).
pub fn move_to(row: u16, col: u16) -> String {
    format!("\x1b[{};{}H", row, col)
}

/// SGR sequence for the given foreground/background codes (30-37 / 40-47).
/// Pass a negative value to leave that side unchanged.
pub fn color(fg: i32, bg: i32) -> String {
    match (fg >= 0, bg >= 0) {
        (true, true) => format!("\x1b[{};{}m", fg, bg),
        (true, false) => format!("\x1b[{}m", fg),
        (false, true) => format!("\x1b[{}m", bg),
        (false, false) => String::new(),
    }
}

pub fn save_cursor() -> &'static str {
    "\x1b[s"
}

pub fn restore_cursor() -> &'static str {
    "\x1b[u"
}

pub fn hide_cursor() -> &'static str {
    "\x1b[?25l"
}

pub fn show_cursor() -> &'static str {
    "\x1b[?25h"
}

/// Clear the current line.
pub fn clear_line() -> &'static str {
    "\x1b[2K"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_to_is_one_based_cup() {
        assert_eq!(move_to(5, 10), "\x1b[5;10H");
    }

    #[test]
    fn color_handles_unset_sides() {
        assert_eq!(color(31, 44), "\x1b[31;44m");
        assert_eq!(color(31, -1), "\x1b[31m");
        assert_eq!(color(-1, 44), "\x1b[44m");
        assert_eq!(color(-1, -1), "");
    }
}
