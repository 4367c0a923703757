//! Text clean-up applied to every extracted field.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_MAX_WORD_LENGTH: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Replace or drop control characters and Unicode non-characters.
    pub translate: bool,
    /// NFKC plus whitespace collapsing.
    pub normalise: bool,
    /// Drop tokens longer than `max_word_length`.
    pub trim_words: bool,
    pub max_word_length: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            translate: true,
            normalise: true,
            trim_words: true,
            max_word_length: DEFAULT_MAX_WORD_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer {
    options: NormalizeOptions,
}

impl TextNormalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }

    pub fn with_max_word_length(max_word_length: usize) -> Self {
        Self::new(NormalizeOptions {
            max_word_length,
            ..Default::default()
        })
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut cleaned = if self.options.translate {
            translate(text)
        } else {
            text.to_string()
        };

        if self.options.normalise {
            cleaned = cleaned.nfkc().collect::<String>();
            cleaned = collapse_whitespace(&cleaned);
        }

        if self.options.trim_words {
            cleaned = trim_words(&cleaned, self.options.max_word_length);
        }

        cleaned.trim().to_string()
    }
}

fn translate(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(c),
            '\u{0}'..='\u{1f}' => Some(' '),
            '\u{7f}'..='\u{84}' | '\u{86}'..='\u{9f}' => None,
            c if is_noncharacter(c) => None,
            c => Some(c),
        })
        .collect()
}

fn is_noncharacter(c: char) -> bool {
    let cp = c as u32;
    (0xFDD0..=0xFDDF).contains(&cp) || (cp & 0xFFFE) == 0xFFFE
}

fn collapse_whitespace(input: &str) -> String {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    RE.replace_all(input, " ").into_owned()
}

fn trim_words(input: &str, max_word_length: usize) -> String {
    input
        .split_whitespace()
        .filter(|word| word.chars().count() <= max_word_length)
        .collect::<Vec<_>>()
        .join(" ")
}
