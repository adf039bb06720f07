// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! A small ANSI SGR tokenizer, replacing the source's fixed string-replace
//! table (which mis-matches on partial escape sequences). Emits
//! `(text, style)` segments; the out-of-scope HTML renderer wraps each in a
//! `<span style="...">`.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SgrStyle {
    pub bold: bool,
    pub foreground: Option<u8>,
    pub background: Option<u8>,
}

impl SgrStyle {
    fn apply(&mut self, code: u32) {
        match code {
            0 => *self = SgrStyle::default(),
            1 => self.bold = true,
            22 => self.bold = false,
            30..=37 => self.foreground = Some((code - 30) as u8),
            39 => self.foreground = None,
            40..=47 => self.background = Some((code - 40) as u8),
            49 => self.background = None,
            _ => {}
        }
    }

    pub fn is_default(&self) -> bool {
        *self == SgrStyle::default()
    }
}

/// Tokenizes `input` into `(text, style)` segments. A segment's style is the
/// style in effect when that text was emitted; a malformed or unterminated
/// escape sequence is passed through verbatim as plain text rather than
/// silently dropped.
pub fn tokenize(input: &str) -> Vec<(String, SgrStyle)> {
    let mut segments = Vec::new();
    let mut style = SgrStyle::default();
    let mut text = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            text.push(c);
            continue;
        }

        if chars.peek() != Some(&'[') {
            text.push(c);
            continue;
        }

        let mut lookahead = chars.clone();
        lookahead.next(); // consume '['

        let mut params = String::new();
        let mut terminated = false;
        for lc in lookahead.by_ref() {
            if lc == 'm' {
                terminated = true;
                break;
            }
            if lc.is_ascii_digit() || lc == ';' {
                params.push(lc);
            } else {
                break;
            }
        }

        if !terminated {
            text.push(c);
            continue;
        }

        if !text.is_empty() {
            segments.push((std::mem::take(&mut text), style));
        }

        for code in params.split(';').filter(|p| !p.is_empty()) {
            if let Ok(code) = code.parse::<u32>() {
                style.apply(code);
            }
        }
        if params.is_empty() {
            style = SgrStyle::default();
        }

        chars = lookahead;
    }

    if !text.is_empty() {
        segments.push((text, style));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_single_segment() {
        let segments = tokenize("hello world");
        assert_eq!(segments, vec![("hello world".to_owned(), SgrStyle::default())]);
    }

    #[test]
    fn red_foreground_sequence_is_tokenized() {
        let segments = tokenize("\u{1b}[31mred\u{1b}[0m plain");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].0, "red");
        assert_eq!(segments[0].1.foreground, Some(1));
        assert_eq!(segments[1].0, " plain");
        assert!(segments[1].1.is_default());
    }

    #[test]
    fn unterminated_escape_is_passed_through_as_text() {
        let segments = tokenize("abc\u{1b}[31");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].0, "abc\u{1b}[31");
    }

    #[test]
    fn bold_and_color_compose() {
        let segments = tokenize("\u{1b}[1;32mbold green\u{1b}[0m");
        assert!(segments[0].1.bold);
        assert_eq!(segments[0].1.foreground, Some(2));
    }
}
