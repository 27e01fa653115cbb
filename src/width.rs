//! Terminal display width helpers.
//!
//! ANSI-aware width calculation so the terminal status lines stay aligned.

use unicode_width::UnicodeWidthChar;

/// Compute the display width of a string after stripping ANSI escapes.
pub fn display_width(text: &str) -> usize {
    let clean = strip_ansi_escapes::strip(text);
    let clean_str = String::from_utf8_lossy(&clean);
    unicode_width::UnicodeWidthStr::width(&*clean_str)
}

/// Strip escapes, then truncate or pad with spaces to exactly `width` columns.
///
/// A wide character that would straddle the last column is replaced by padding.
pub fn fit_to_width(text: &str, width: usize) -> String {
    let clean = strip_ansi_escapes::strip(text);
    let clean_str = String::from_utf8_lossy(&clean);

    let mut line = String::with_capacity(width);
    let mut used = 0;
    for ch in clean_str.chars() {
        if ch == '\n' || ch == '\r' {
            break;
        }
        let ch_width = ch.width().unwrap_or(0);
        if used + ch_width > width {
            break;
        }
        line.push(ch);
        used += ch_width;
    }
    while used < width {
        line.push(' ');
        used += 1;
    }
    line
}
