//! Display file loading and rendering.
//!
//! A display file is opaque art bytes plus parsed SAUCE metadata plus the
//! derived placeholder field index. ANSI-capable clients get the raw bytes in
//! small chunks with a short delay between them, preserving the classic
//! "drawing" cadence; ASCII clients get line-by-line output with CRLF
//! normalisation.

pub mod sauce;
pub mod template;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::terminal::{ansi, Terminal};
pub use sauce::Sauce;
pub use template::{blank_placeholders, index_fields, Field};

/// A loaded ANSI or ASCII display file.
#[derive(Debug, Clone)]
pub struct DisplayFile {
    pub name: String,
    pub path: PathBuf,
    pub is_ansi: bool,
    /// Art content with any SAUCE trailer removed.
    pub data: Vec<u8>,
    pub sauce: Option<Sauce>,
}

impl DisplayFile {
    /// Width used for field indexing: the SAUCE hint wins when present,
    /// otherwise the terminal width, otherwise 80.
    pub fn index_width(&self, term_width: u16) -> u16 {
        match &self.sauce {
            Some(s) if s.tinfo1 > 0 => s.tinfo1,
            _ => {
                if term_width > 0 {
                    term_width
                } else {
                    80
                }
            }
        }
    }

    /// Compute the placeholder field index for this file.
    pub fn fields(&self, term_width: u16) -> std::collections::HashMap<String, Field> {
        index_fields(&self.data, self.index_width(term_width))
    }
}

/// Finds and loads display files from the configured asset directories.
#[derive(Debug, Clone)]
pub struct Loader {
    base_dirs: Vec<PathBuf>,
}

impl Loader {
    pub fn new<P: Into<PathBuf>>(dirs: impl IntoIterator<Item = P>) -> Self {
        Loader {
            base_dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Locate a display file by bare name, preferring `.ans` when the caller
    /// is ANSI-capable and `.asc` otherwise (with the other extension as the
    /// fallback). The name must not contain path components.
    pub fn find(&self, name: &str, ansi_enabled: bool) -> Result<DisplayFile> {
        let safe = sanitize_display_name(name)?;

        let extensions: [&str; 2] = if ansi_enabled {
            ["ans", "asc"]
        } else {
            ["asc", "ans"]
        };

        for dir in &self.base_dirs {
            for ext in extensions {
                let path = dir.join(format!("{}.{}", safe, ext));
                if let Ok(data) = std::fs::read(&path) {
                    return Ok(build_display_file(&safe, path, data));
                }
            }
        }

        Err(anyhow!("display file not found: {}", safe))
    }

    /// Read a specific file by full path.
    pub fn load(&self, path: &Path) -> Result<DisplayFile> {
        let data = std::fs::read(path)
            .map_err(|e| anyhow!("read display file {}: {}", path.display(), e))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(build_display_file(&name, path.to_path_buf(), data))
    }
}

fn build_display_file(name: &str, path: PathBuf, data: Vec<u8>) -> DisplayFile {
    let is_ansi = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("ans"))
        .unwrap_or(false);
    let (sauce, content_end) = sauce::parse(&data);
    DisplayFile {
        name: name.to_string(),
        path,
        is_ansi,
        data: data[..content_end].to_vec(),
        sauce,
    }
}

/// Display names come from operator scripts; reject anything that could walk
/// out of the asset directories.
fn sanitize_display_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("empty display name"));
    }
    if name.contains('\0') || name.contains('\\') {
        return Err(anyhow!("invalid display name"));
    }
    let path = Path::new(name);
    if path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return Err(anyhow!("invalid display name"));
    }
    Ok(name.to_string())
}

/// Chunk size for the classic ANSI "drawing" cadence.
const ANSI_CHUNK: usize = 1024;
const ANSI_CHUNK_DELAY: Duration = Duration::from_millis(5);

/// Stream a display file to a terminal. Placeholder markers are blanked in a
/// private copy before anything is written; the loaded file is not mutated.
pub async fn display(term: &Terminal, df: &DisplayFile) -> Result<()> {
    let content = blank_placeholders(&df.data);
    if df.is_ansi && term.ansi {
        display_ansi(term, &content).await
    } else {
        display_ascii(term, &content).await
    }
}

async fn display_ansi(term: &Terminal, data: &[u8]) -> Result<()> {
    for (i, chunk) in data.chunks(ANSI_CHUNK).enumerate() {
        if i > 0 {
            tokio::time::sleep(ANSI_CHUNK_DELAY).await;
        }
        term.send_bytes(chunk).await?;
    }
    Ok(())
}

async fn display_ascii(term: &Terminal, data: &[u8]) -> Result<()> {
    for line in split_lines(data) {
        term.send_line(&String::from_utf8_lossy(line)).await?;
    }
    Ok(())
}

/// Stream an ASCII display file with more-style paging. ANSI art cannot be
/// line-counted reliably, so it streams without paging.
pub async fn display_with_paging(
    term: &mut Terminal,
    df: &DisplayFile,
    page_height: u16,
) -> Result<()> {
    let content = blank_placeholders(&df.data);
    if df.is_ansi && term.ansi {
        return display_ansi(term, &content).await;
    }

    let mut line_count = 0u16;
    for line in split_lines(&content) {
        term.send_line(&String::from_utf8_lossy(line)).await?;
        line_count += 1;

        if line_count >= page_height.saturating_sub(1).max(1) {
            if term.ansi {
                term.send(&format!(
                    "{} -- More -- {}",
                    ansi::FG_BRIGHT_CYAN,
                    ansi::RESET
                ))
                .await?;
            } else {
                term.send(" -- More -- ").await?;
            }
            let key = term.get_key().await?;
            term.send(&format!("\r{}", ansi::clear_line())).await?;
            if key == b'q' || key == b'Q' || key == 27 {
                return Ok(());
            }
            line_count = 0;
        }
    }
    Ok(())
}

/// Split on LF, stripping a trailing CR from each line. The final line may
/// lack a newline.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            let mut line = &data[start..i];
            if let [head @ .., b'\r'] = line {
                line = head;
            }
            lines.push(line);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_display_name("main_menu").is_ok());
        assert!(sanitize_display_name("../secrets").is_err());
        assert!(sanitize_display_name("/etc/passwd").is_err());
        assert!(sanitize_display_name("a\\b").is_err());
        assert!(sanitize_display_name("").is_err());
    }

    #[test]
    fn split_lines_handles_crlf_and_trailing() {
        let lines = split_lines(b"one\r\ntwo\nthree");
        assert_eq!(lines, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
    }

    #[test]
    fn index_width_prefers_sauce_hint() {
        let df = DisplayFile {
            name: "t".into(),
            path: "t.ans".into(),
            is_ansi: true,
            data: Vec::new(),
            sauce: Some(Sauce {
                tinfo1: 132,
                ..Default::default()
            }),
        };
        assert_eq!(df.index_width(80), 132);

        let plain = DisplayFile {
            sauce: None,
            ..df.clone()
        };
        assert_eq!(plain.index_width(100), 100);
        assert_eq!(plain.index_width(0), 80);
    }
}
