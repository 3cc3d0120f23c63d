//! Turning an announced filename into something safe to create on disk.

use std::path::{Path, PathBuf};

use crate::error::{RelayError, Result};

/// Name used when the announced one has nothing usable left after
/// sanitisation.
const FALLBACK_NAME: &str = "received.bin";

/// Converts the raw filename bytes a sender announced into a single path
/// component.
///
/// Trailing NUL bytes are stripped (some senders include the C string
/// terminator in the declared length), invalid UTF-8 is replaced, and any
/// directory part is discarded so a hostile sender cannot write outside the
/// receiver's output directory.
#[must_use]
pub fn sanitize_filename(raw: &[u8]) -> String {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = String::from_utf8_lossy(&raw[..end]);

    let last = text
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();

    match cleaned.as_str() {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        _ => cleaned,
    }
}

/// Returns the basename a sender announces for `path`.
pub fn announced_name(path: &Path) -> Result<Vec<u8>> {
    let name = path.file_name().ok_or_else(|| RelayError::Usage {
        message: format!("{} has no file name", path.display()),
    })?;
    Ok(name.to_string_lossy().into_owned().into_bytes())
}

/// Picks where a received file is written.
///
/// An existing directory gets the sanitised name appended; anything else is
/// taken as the exact output file path.
#[must_use]
pub fn resolve_output_path(output: &Path, raw_name: &[u8]) -> PathBuf {
    if output.is_dir() {
        output.join(sanitize_filename(raw_name))
    } else {
        output.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_plain_name_expect_unchanged() {
        assert_eq!(sanitize_filename(b"report.pdf"), "report.pdf");
    }

    #[test]
    fn when_name_has_trailing_nul_expect_stripped() {
        assert_eq!(sanitize_filename(b"report.pdf\0"), "report.pdf");
        assert_eq!(sanitize_filename(b"report.pdf\0\0"), "report.pdf");
    }

    #[test]
    fn when_name_has_directories_expect_basename_only() {
        assert_eq!(sanitize_filename(b"../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(b"C:\\Users\\me\\notes.txt"), "notes.txt");
    }

    #[test]
    fn when_name_is_traversal_only_expect_fallback() {
        assert_eq!(sanitize_filename(b".."), FALLBACK_NAME);
        assert_eq!(sanitize_filename(b"dir/"), FALLBACK_NAME);
        assert_eq!(sanitize_filename(b"\0"), FALLBACK_NAME);
    }

    #[test]
    fn when_name_has_control_characters_expect_removed() {
        assert_eq!(sanitize_filename(b"bad\nname\t.txt"), "badname.txt");
    }

    #[test]
    fn when_announcing_path_expect_basename_bytes() {
        let name = announced_name(Path::new("/tmp/some/dir/photo.jpg")).unwrap();
        assert_eq!(name, b"photo.jpg");
        assert!(announced_name(Path::new("/")).is_err());
    }

    #[test]
    fn when_output_is_directory_expect_joined_path() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_output_path(dir.path(), b"a.txt");
        assert_eq!(resolved, dir.path().join("a.txt"));
    }

    #[test]
    fn when_output_is_file_path_expect_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("renamed.bin");
        assert_eq!(resolve_output_path(&target, b"a.txt"), target);
    }
}
