//! Reply formatting for iMessage: markdown stripping and italic glyphs.
//!
//! Messages renders plain text only, so markdown from the model shows up as
//! literal asterisks. Italics are faked with the Unicode Mathematical Italic
//! block.

use std::sync::LazyLock;

use regex::Regex;

static BOLD_STARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static BOLD_UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.+?)__").unwrap());
static EM_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());
static EM_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_([^_\n]+?)_").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.+?)\]\((.+?)\)").unwrap());
static CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`(.+?)`").unwrap());

/// Remove the markdown a chat model tends to emit despite being told not to.
///
/// Links become `text (url)`; everything else keeps only its inner text.
pub fn strip_markdown(text: &str) -> String {
    let text = BOLD_STARS.replace_all(text, "${1}");
    let text = BOLD_UNDERSCORES.replace_all(&text, "${1}");
    let text = EM_STAR.replace_all(&text, "${1}");
    let text = EM_UNDERSCORE.replace_all(&text, "${1}");
    let text = HEADING.replace_all(&text, "");
    let text = LINK.replace_all(&text, "${1} (${2})");
    let text = CODE.replace_all(&text, "${1}");
    text.into_owned()
}

/// First glyph of Mathematical Italic Capital.
const ITALIC_UPPER_A: u32 = 0x1D434;
/// First glyph of Mathematical Italic Small.
const ITALIC_LOWER_A: u32 = 0x1D44E;
/// U+1D455 is unassigned; italic h lives in Letterlike Symbols (PLANCK CONSTANT).
const ITALIC_LOWER_H: char = '\u{210E}';

/// ASCII letter → Mathematical Italic lookup, built once.
#[derive(Debug, Clone)]
pub struct ItalicMap {
    table: [char; 128],
}

impl ItalicMap {
    pub fn new() -> Self {
        let mut table = ['\0'; 128];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u8 as char;
        }
        for (i, c) in ('A'..='Z').enumerate() {
            table[c as usize] = char::from_u32(ITALIC_UPPER_A + i as u32).unwrap_or(c);
        }
        for (i, c) in ('a'..='z').enumerate() {
            table[c as usize] = if c == 'h' {
                ITALIC_LOWER_H
            } else {
                char::from_u32(ITALIC_LOWER_A + i as u32).unwrap_or(c)
            };
        }
        Self { table }
    }

    pub fn get(&self, c: char) -> char {
        if c.is_ascii() {
            self.table[c as usize]
        } else {
            c
        }
    }

    /// Map ASCII letters to italic glyphs, leaving everything else alone.
    pub fn apply(&self, text: &str) -> String {
        text.chars().map(|c| self.get(c)).collect()
    }
}

impl Default for ItalicMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a raw model answer into the text that gets sent.
pub fn format_reply(raw: &str, italic: Option<&ItalicMap>) -> String {
    let plain = strip_markdown(raw.trim());
    match italic {
        Some(map) => map.apply(&plain),
        None => plain,
    }
}
