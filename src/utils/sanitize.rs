//! Filename sanitization utilities

/// Maximum byte length of a generated filename, extension included.
/// 255 bytes is the common filesystem bound (ext4, APFS, NTFS).
const MAX_FILENAME_BYTES: usize = 255;

/// Characters that are unsafe in filenames on at least one major OS.
const ILLEGAL_CHARS: [char; 10] = ['\0', '\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Ellipsis appended when a name had to be truncated.
const ELLIPSIS: &str = "…";

/// Sanitize a full filename (stem + extension) for safe filesystem usage.
///
/// - Illegal path characters are replaced with their fullwidth lookalikes
///   (e.g. `/` becomes `／`), which are safe on all major filesystems.
/// - Whitespace is normalized to plain spaces.
/// - Non-printable characters are dropped.
/// - A name that sanitizes to nothing becomes `unnamed`.
/// - The result is truncated on UTF-8 character boundaries to stay under
///   255 bytes including the extension, with `…` marking the cut.
///
/// Idempotent: applying it to an already-safe name returns it unchanged.
pub fn safe_filename(file_full_name: &str) -> String {
    safe_filename_with_limit(file_full_name, MAX_FILENAME_BYTES)
}

pub fn safe_filename_with_limit(file_full_name: &str, max_bytes: usize) -> String {
    let (stem, suffix) = split_extension(file_full_name);

    let mut processed = String::with_capacity(stem.len());
    for c in stem.chars() {
        if ILLEGAL_CHARS.contains(&c) {
            processed.push(fullwidth_lookalike(c));
        } else if c.is_whitespace() {
            processed.push(' ');
        } else if !c.is_control() {
            processed.push(c);
        }
    }

    let name = processed.trim();
    let name = if name.is_empty() { "unnamed" } else { name };

    truncate_filename(name, suffix, max_bytes)
}

/// Map an illegal character to a visually similar fullwidth form.
fn fullwidth_lookalike(c: char) -> char {
    // NUL has no fullwidth counterpart.
    if c == '\0' {
        return '_';
    }
    char::from_u32(c as u32 + 0xFEE0).unwrap_or('_')
}

/// Split `name.ext` into (`name`, `.ext`); a leading dot is not an extension.
fn split_extension(full_name: &str) -> (&str, &str) {
    match full_name.rfind('.') {
        Some(idx) if idx > 0 => full_name.split_at(idx),
        _ => (full_name, ""),
    }
}

/// Truncate the stem so that stem + ellipsis + suffix fits in `max_bytes`,
/// cutting only on UTF-8 character boundaries.
fn truncate_filename(name: &str, suffix: &str, max_bytes: usize) -> String {
    let suffix_len = suffix.len();
    if suffix_len > max_bytes {
        // Degenerate bound; keep whatever suffix bytes fit.
        let mut end = max_bytes;
        while end > 0 && !suffix.is_char_boundary(end) {
            end -= 1;
        }
        let kept = &suffix[..end];
        return if kept.is_empty() {
            "unnamed".to_string()
        } else {
            kept.to_string()
        };
    }

    if name.len() + suffix_len <= max_bytes {
        return format!("{name}{suffix}");
    }

    let budget = max_bytes - suffix_len;
    if budget <= ELLIPSIS.len() {
        return if budget == ELLIPSIS.len() {
            format!("{ELLIPSIS}{suffix}")
        } else {
            suffix.to_string()
        };
    }

    let mut end = budget - ELLIPSIS.len();
    while end > 0 && !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}{suffix}", &name[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_illegal_chars_with_fullwidth() {
        assert_eq!(safe_filename("a/b:c*.mp3"), "a／b：c＊.mp3");
        assert_eq!(
            safe_filename("What? \"Why\" <Now>|.flac"),
            "What？ ＂Why＂ ＜Now＞｜.flac"
        );
    }

    #[test]
    fn test_no_illegal_chars_remain() {
        let out = safe_filename("a/b\\c:d*e?f\"g<h>i|j\0.ogg");
        for c in ILLEGAL_CHARS {
            assert!(!out.contains(c), "{c:?} survived in {out:?}");
        }
    }

    #[test]
    fn test_whitespace_normalized() {
        assert_eq!(safe_filename("a\tb\nc.mp3"), "a b c.mp3");
    }

    #[test]
    fn test_empty_stem_becomes_unnamed() {
        assert_eq!(safe_filename("\u{1}\u{2}.mp3"), "unnamed.mp3");
    }

    #[test]
    fn test_legal_short_name_unchanged() {
        assert_eq!(
            safe_filename("Normal Song - Artist.flac"),
            "Normal Song - Artist.flac"
        );
    }

    #[test]
    fn test_truncation_respects_byte_bound() {
        let long = format!("{}.mp3", "歌".repeat(200));
        let out = safe_filename(&long);
        assert!(out.len() <= MAX_FILENAME_BYTES);
        assert!(out.contains(ELLIPSIS));
        assert!(out.ends_with(".mp3"));
    }

    #[test]
    fn test_truncation_keeps_char_boundaries() {
        // CJK chars are 3 bytes each; a tight budget must not split one.
        let out = safe_filename_with_limit("歌歌歌歌.mp3", 14);
        assert!(out.len() <= 14);
        assert!(out.ends_with(".mp3"));
        assert!(std::str::from_utf8(out.as_bytes()).is_ok());
    }

    #[test]
    fn test_idempotent() {
        for name in [
            "a/b:c.mp3",
            "Normal.flac",
            &format!("{}.ogg", "x".repeat(400)),
            "  padded  .m4a",
        ] {
            let once = safe_filename(name);
            assert_eq!(safe_filename(&once), once);
        }
    }
}
