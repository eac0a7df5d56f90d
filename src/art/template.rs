//! Placeholder fields embedded in display files.
//!
//! Art authors mark dynamic regions with `{{ID}}`, `{{ID,width}}` or
//! `{{ID,width,height}}` directly in the art. At render time the markers are
//! blanked to spaces; independently, the indexer simulates cursor motion
//! through the byte stream to learn the 1-based screen coordinates of every
//! marker. Only the cursor-moving CSI subset matters here (`H f A B C D`);
//! SGR and erase sequences do not move the cursor and full terminal emulation
//! is deliberately out of scope.

use std::borrow::Cow;
use std::collections::HashMap;

/// A placeholder found in a display file. `row`/`col` are 1-based terminal
/// coordinates where the marker begins. `width`/`height` of 0 mean the
/// author left them at the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: String,
    pub row: u16,
    pub col: u16,
    pub width: u16,
    pub height: u16,
}

/// Return a copy of `data` with every complete `{{...}}` marker replaced by
/// spaces of the same byte length, so nothing visible remains on screen. The
/// input is not modified; when no markers exist the original is returned
/// as-is.
pub fn blank_placeholders(data: &[u8]) -> Cow<'_, [u8]> {
    let mut out: Option<Vec<u8>> = None;
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'{' && i + 1 < data.len() && data[i + 1] == b'{' {
            if let Some(end) = find_placeholder_end(data, i + 2) {
                let buf = out.get_or_insert_with(|| data.to_vec());
                for cell in &mut buf[i..end + 2] {
                    *cell = b' ';
                }
                i = end + 2;
                continue;
            }
        }
        i += 1;
    }
    match out {
        Some(v) => Cow::Owned(v),
        None => Cow::Borrowed(data),
    }
}

/// Scan a display file and index its placeholders by simulating cursor
/// motion. The first occurrence of an ID wins; later duplicates are ignored.
/// Coordinates are clamped so `col <= term_width` and `row >= 1`.
pub fn index_fields(data: &[u8], term_width: u16) -> HashMap<String, Field> {
    let mut fields: HashMap<String, Field> = HashMap::new();
    if data.is_empty() {
        return fields;
    }

    let width = if term_width == 0 { 80 } else { term_width };
    let mut row: u16 = 1;
    let mut col: u16 = 1;
    let mut i = 0;

    // Cursor advance for n printed characters, wrapping at the right margin.
    let advance_print = |row: &mut u16, col: &mut u16, mut n: usize| {
        while n > 0 {
            if *col > width {
                *row += 1;
                *col = 1;
            }
            *col += 1;
            n -= 1;
        }
    };

    while i < data.len() {
        let b = data[i];

        if b == 0x1b {
            // ESC
            i += 1;
            if i >= data.len() {
                break;
            }
            if data[i] == b'[' {
                // CSI: consume parameters until the final byte.
                i += 1;
                let start = i;
                while i < data.len() {
                    let c = data[i];
                    if (0x40..=0x7e).contains(&c) {
                        apply_csi(&mut row, &mut col, width, &data[start..i], c);
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                continue;
            }
            // Non-CSI escape: skip one byte, best effort.
            i += 1;
            continue;
        }

        match b {
            b'\r' => {
                col = 1;
                i += 1;
                continue;
            }
            b'\n' => {
                row += 1;
                col = 1;
                i += 1;
                continue;
            }
            0x08 => {
                if col > 1 {
                    col -= 1;
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        if b == b'{' && i + 1 < data.len() && data[i + 1] == b'{' {
            if let Some(end) = find_placeholder_end(data, i + 2) {
                let payload = String::from_utf8_lossy(&data[i + 2..end]);
                if let Some((id, w, h)) = parse_field_payload(&payload) {
                    fields.entry(id.clone()).or_insert(Field {
                        id,
                        row,
                        col: col.min(width),
                        width: w,
                        height: h,
                    });
                }
                // Advance as if the marker text printed literally.
                advance_print(&mut row, &mut col, end + 2 - i);
                i = end + 2;
                continue;
            }
        }

        // Printable byte advances the cursor.
        if (0x20..0x7f).contains(&b) || b >= 0x80 {
            advance_print(&mut row, &mut col, 1);
        }
        i += 1;
    }

    fields
}

/// `start` points at the first byte after `{{`. Placeholders are literal
/// printable runs; an ESC before the closing braces aborts the match.
fn find_placeholder_end(data: &[u8], start: usize) -> Option<usize> {
    let mut i = start;
    while i + 1 < data.len() {
        if data[i] == b'}' && data[i + 1] == b'}' {
            return Some(i);
        }
        if data[i] == 0x1b {
            return None;
        }
        i += 1;
    }
    None
}

/// Parse `ID[,width[,height]]`. Zero or malformed numbers fall back to 0,
/// which downstream code treats as "use the default".
fn parse_field_payload(payload: &str) -> Option<(String, u16, u16)> {
    let mut parts = payload.splitn(3, ',');
    let id = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let width = parts
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .unwrap_or(0);
    let height = parts
        .next()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .unwrap_or(0);
    Some((id.to_string(), width, height))
}

fn apply_csi(row: &mut u16, col: &mut u16, width: u16, params: &[u8], final_byte: u8) {
    let nums = parse_csi_params(params);
    let first = |default: u16| -> u16 {
        match nums.as_deref() {
            Some([n, ..]) if *n > 0 => *n,
            _ => default,
        }
    };

    match final_byte {
        b'H' | b'f' => {
            // CUP - cursor position
            let r = first(1);
            let c = match nums.as_deref() {
                Some([_, n, ..]) if *n > 0 => *n,
                _ => 1,
            };
            *row = r;
            *col = c;
        }
        b'A' => *row = row.saturating_sub(first(1)).max(1),
        b'B' => *row = row.saturating_add(first(1)),
        b'C' => *col = col.saturating_add(first(1)),
        b'D' => *col = col.saturating_sub(first(1)).max(1),
        // SGR and erase sequences do not move the cursor.
        b'J' | b'K' | b'm' => return,
        _ => return,
    }

    if *col > width {
        *col = width;
    }
    if *row < 1 {
        *row = 1;
    }
    if *col < 1 {
        *col = 1;
    }
}

/// Split `;`-separated numeric CSI parameters. Any non-numeric parameter
/// (private sequences like `?25h`) invalidates the whole list.
fn parse_csi_params(params: &[u8]) -> Option<Vec<u16>> {
    if params.is_empty() {
        return None;
    }
    let s = std::str::from_utf8(params).ok()?;
    let mut out = Vec::new();
    for part in s.split(';') {
        if part.is_empty() {
            out.push(0);
            continue;
        }
        out.push(part.parse::<u16>().ok()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_fields_ascii() {
        let fields = index_fields(b"Hello {{TE1,8}} world\r\n", 80);
        let f = fields.get("TE1").expect("field TE1");
        assert_eq!((f.row, f.col, f.width), (1, 7, 8));
    }

    #[test]
    fn index_fields_ansi_cursor_position() {
        let fields = index_fields(b"\x1b[10;20H{{TE1,8}}", 80);
        let f = fields.get("TE1").expect("field TE1");
        assert_eq!((f.row, f.col, f.width), (10, 20, 8));
    }

    #[test]
    fn index_fields_relative_moves() {
        // Down 3, forward 5 from home.
        let fields = index_fields(b"\x1b[3B\x1b[5C{{F}}", 80);
        let f = fields.get("F").unwrap();
        assert_eq!((f.row, f.col), (4, 6));
    }

    #[test]
    fn index_fields_sgr_does_not_move() {
        let fields = index_fields(b"\x1b[1;36mAB{{F}}", 80);
        let f = fields.get("F").unwrap();
        assert_eq!((f.row, f.col), (1, 3));
    }

    #[test]
    fn index_fields_width_and_height() {
        let fields = index_fields(b"{{CHAT_LOG,60,10}}", 80);
        let f = fields.get("CHAT_LOG").unwrap();
        assert_eq!((f.width, f.height), (60, 10));
    }

    #[test]
    fn index_fields_duplicates_keep_first() {
        let fields = index_fields(b"{{X,5}}\r\n{{X,9}}", 80);
        let f = fields.get("X").unwrap();
        assert_eq!((f.row, f.width), (1, 5));
    }

    #[test]
    fn index_fields_defaults_for_odd_payloads() {
        let fields = index_fields(b"{{A,}}{{B,0}}{{C,3,0}}{{}}", 80);
        assert_eq!(fields.get("A").unwrap().width, 0);
        assert_eq!(fields.get("B").unwrap().width, 0);
        let c = fields.get("C").unwrap();
        assert_eq!((c.width, c.height), (3, 0));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let fields = index_fields(b"{{OOPS", 80);
        assert!(fields.is_empty());
        let out = blank_placeholders(b"{{OOPS");
        assert_eq!(&*out, b"{{OOPS");
    }

    #[test]
    fn blank_placeholders_preserves_length() {
        let input = b"A{{USER,30}}B";
        let out = blank_placeholders(input);
        assert_eq!(out.len(), input.len());
        assert_eq!(out[0], b'A');
        assert_eq!(out[out.len() - 1], b'B');
        assert!(out[1..out.len() - 1].iter().all(|&b| b == b' '));
        // Input untouched.
        assert_eq!(input, b"A{{USER,30}}B");
    }

    #[test]
    fn column_clamped_to_width() {
        let fields = index_fields(b"\x1b[1;200H{{F}}", 80);
        assert!(fields.get("F").unwrap().col <= 80);
    }
}
