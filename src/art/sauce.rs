//! SAUCE (Standard Architecture for Universal Comment Extensions) records.
//!
//! Classic ANSI/ASCII art carries a 128-byte metadata trailer, optionally
//! preceded by a comment block and a 0x1A EOF byte. The width/height hints
//! (TInfo1/TInfo2) drive the placeholder field index.

const SAUCE_ID: &[u8; 5] = b"SAUCE";
const COMMENT_ID: &[u8; 5] = b"COMNT";
pub const SAUCE_RECORD_SIZE: usize = 128;

#[derive(Debug, Clone, Default)]
pub struct Sauce {
    pub version: String,
    pub title: String,
    pub author: String,
    pub group: String,
    pub date: String,
    pub file_size: u32,
    pub data_type: u8,
    pub file_type: u8,
    pub tinfo1: u16, // width for ANSI/ASCII
    pub tinfo2: u16, // height for ANSI/ASCII
    pub tinfo3: u16,
    pub tinfo4: u16,
    pub comments: u8,
    pub flags: u8,
    pub tinfo_s: String, // SAUCE 00.5 font name
    pub comment_lines: Vec<String>,
}

impl Sauce {
    /// Display width from the record, or 80 as the classic default.
    pub fn width(&self) -> u16 {
        if self.tinfo1 > 0 {
            self.tinfo1
        } else {
            80
        }
    }

    /// Display height, 0 if unknown.
    pub fn height(&self) -> u16 {
        self.tinfo2
    }

    /// iCE colors flag (blink bit reused as bright background).
    pub fn has_ice_colors(&self) -> bool {
        self.flags & 0x01 != 0
    }

    /// Re-emit the canonical 128-byte record. Text fields are space-padded
    /// and TInfoS is NUL-padded per the SAUCE 00 layout, so records produced
    /// by standard tooling survive a parse/encode round trip byte-for-byte.
    pub fn encode(&self) -> [u8; SAUCE_RECORD_SIZE] {
        let mut rec = [b' '; SAUCE_RECORD_SIZE];
        rec[0..5].copy_from_slice(SAUCE_ID);
        put_padded(&mut rec[5..7], &self.version, b'0');
        put_padded(&mut rec[7..42], &self.title, b' ');
        put_padded(&mut rec[42..62], &self.author, b' ');
        put_padded(&mut rec[62..82], &self.group, b' ');
        put_padded(&mut rec[82..90], &self.date, b' ');
        rec[90..94].copy_from_slice(&self.file_size.to_le_bytes());
        rec[94] = self.data_type;
        rec[95] = self.file_type;
        rec[96..98].copy_from_slice(&self.tinfo1.to_le_bytes());
        rec[98..100].copy_from_slice(&self.tinfo2.to_le_bytes());
        rec[100..102].copy_from_slice(&self.tinfo3.to_le_bytes());
        rec[102..104].copy_from_slice(&self.tinfo4.to_le_bytes());
        rec[104] = self.comments;
        rec[105] = self.flags;
        put_padded(&mut rec[106..128], &self.tinfo_s, 0);
        rec
    }
}

fn put_padded(dst: &mut [u8], value: &str, pad: u8) {
    dst.fill(pad);
    let bytes = value.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn trim_field(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    s.trim_end_matches(['\0', ' ']).to_string()
}

/// Extract a SAUCE record from the end of a file. Returns the record (if any)
/// and the length of the art content with the SAUCE trailer, comment block
/// and EOF byte removed.
pub fn parse(data: &[u8]) -> (Option<Sauce>, usize) {
    if data.len() < SAUCE_RECORD_SIZE {
        return (None, data.len());
    }

    let rec = &data[data.len() - SAUCE_RECORD_SIZE..];
    if &rec[0..5] != SAUCE_ID {
        return (None, data.len());
    }

    let mut s = Sauce {
        version: trim_field(&rec[5..7]),
        title: trim_field(&rec[7..42]),
        author: trim_field(&rec[42..62]),
        group: trim_field(&rec[62..82]),
        date: trim_field(&rec[82..90]),
        file_size: u32::from_le_bytes([rec[90], rec[91], rec[92], rec[93]]),
        data_type: rec[94],
        file_type: rec[95],
        tinfo1: u16::from_le_bytes([rec[96], rec[97]]),
        tinfo2: u16::from_le_bytes([rec[98], rec[99]]),
        tinfo3: u16::from_le_bytes([rec[100], rec[101]]),
        tinfo4: u16::from_le_bytes([rec[102], rec[103]]),
        comments: rec[104],
        flags: rec[105],
        tinfo_s: trim_field(&rec[106..128]),
        comment_lines: Vec::new(),
    };

    let mut content_end = data.len() - SAUCE_RECORD_SIZE;

    // Optional comment block: "COMNT" + N lines of 64 bytes.
    if s.comments > 0 {
        let block_size = 5 + s.comments as usize * 64;
        if let Some(start) = content_end.checked_sub(block_size) {
            let block = &data[start..content_end];
            if &block[0..5] == COMMENT_ID {
                for i in 0..s.comments as usize {
                    let off = 5 + i * 64;
                    s.comment_lines.push(trim_field(&block[off..off + 64]));
                }
                content_end = start;
            }
        }
    }

    // Optional DOS EOF marker before the trailer.
    if content_end > 0 && data[content_end - 1] == 0x1A {
        content_end -= 1;
    }

    (Some(s), content_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Vec<u8> {
        let sauce = Sauce {
            version: "00".into(),
            title: "TWILIGHT LOGIN".into(),
            author: "nail".into(),
            group: "twilight".into(),
            date: "19960401".into(),
            file_size: 1234,
            data_type: 1,
            file_type: 1,
            tinfo1: 80,
            tinfo2: 25,
            flags: 0x01,
            ..Default::default()
        };
        sauce.encode().to_vec()
    }

    #[test]
    fn parse_extracts_dimensions_and_strips_trailer() {
        let mut data = b"art bytes".to_vec();
        data.push(0x1A);
        data.extend_from_slice(&sample_record());

        let (sauce, content_end) = parse(&data);
        let sauce = sauce.expect("sauce record");
        assert_eq!(&data[..content_end], b"art bytes");
        assert_eq!(sauce.title, "TWILIGHT LOGIN");
        assert_eq!(sauce.width(), 80);
        assert_eq!(sauce.height(), 25);
        assert!(sauce.has_ice_colors());
    }

    #[test]
    fn parse_encode_round_trip_is_byte_equal() {
        let rec = sample_record();
        let mut data = b"x".to_vec();
        data.extend_from_slice(&rec);

        let (sauce, _) = parse(&data);
        assert_eq!(sauce.unwrap().encode().to_vec(), rec);
    }

    #[test]
    fn no_sauce_returns_original_length() {
        let data = vec![b'y'; 200];
        let (sauce, content_end) = parse(&data);
        assert!(sauce.is_none());
        assert_eq!(content_end, 200);
    }

    #[test]
    fn comment_block_is_parsed_and_stripped() {
        let mut sauce = Sauce {
            version: "00".into(),
            comments: 1,
            ..Default::default()
        };
        sauce.tinfo1 = 40;

        let mut data = b"body".to_vec();
        data.extend_from_slice(b"COMNT");
        let mut line = [b' '; 64];
        line[..5].copy_from_slice(b"hello");
        data.extend_from_slice(&line);
        data.extend_from_slice(&sauce.encode());

        let (parsed, content_end) = parse(&data);
        let parsed = parsed.unwrap();
        assert_eq!(&data[..content_end], b"body");
        assert_eq!(parsed.comment_lines, vec!["hello".to_string()]);
    }
}
