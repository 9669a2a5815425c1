//! Citation token grammar.
//!
//! A citation is `[` + tier prefix + exactly three digits + `]`. A token
//! that is immediately followed by a star rating (`[L001] [***--]`) is a
//! listing echo, not a citation.

use crate::{LessonId, Tier};
use std::collections::BTreeSet;

const TOKEN_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CitationToken {
    pub id: LessonId,
    /// Byte offset of the opening bracket.
    pub start: usize,
    /// Byte offset just past the closing bracket.
    pub end: usize,
}

pub fn scan_tokens(text: &str) -> Vec<CitationToken> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index + TOKEN_LEN <= bytes.len() {
        if let Some(token) = token_at(bytes, index) {
            tokens.push(token);
            index = token.end;
        } else {
            index += 1;
        }
    }

    tokens
}

fn token_at(bytes: &[u8], start: usize) -> Option<CitationToken> {
    let window = bytes.get(start..start + TOKEN_LEN)?;
    if window[0] != b'[' || window[5] != b']' {
        return None;
    }
    let tier = Tier::from_prefix(window[1] as char)?;
    let digits = &window[2..5];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let number = digits
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0'));

    Some(CitationToken {
        id: LessonId::new(tier, number),
        start,
        end: start + TOKEN_LEN,
    })
}

pub fn is_listing_echo(text: &str, token: &CitationToken) -> bool {
    let rest = text[token.end..].trim_start_matches([' ', '\t']);
    rest.starts_with("[*")
}

/// Unique lesson ids cited in `text`, listing echoes excluded.
pub fn extract_citations(text: &str) -> BTreeSet<LessonId> {
    scan_tokens(text)
        .into_iter()
        .filter(|token| !is_listing_echo(text, token))
        .map(|token| token.id)
        .collect()
}
