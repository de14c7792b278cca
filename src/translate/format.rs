//! Deterministic clean-up applied to every translation before it is cached.

use regex::Regex;
use std::sync::LazyLock;

static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{3000}]+").expect("inline space pattern"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +([,.;:!?])").expect("space before punctuation pattern"));
static MISSING_SPACE_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([,;])([^\s\d,;])").expect("space after separator pattern"));

/// Normalise punctuation and whitespace of a translated prompt.
pub fn format_translation(text: &str) -> String {
    let ascii: String = text.chars().map(ascii_punctuation).collect();

    let lines: Vec<String> = ascii
        .lines()
        .map(|line| {
            let line = INLINE_SPACE.replace_all(line, " ");
            let line = SPACE_BEFORE_PUNCT.replace_all(&line, "$1");
            let line = MISSING_SPACE_AFTER.replace_all(&line, "$1 $2");
            line.trim().to_string()
        })
        .collect();

    strip_wrapping_quotes(lines.join("\n").trim()).to_string()
}

fn ascii_punctuation(c: char) -> char {
    match c {
        '，' | '、' => ',',
        '。' => '.',
        '：' => ':',
        '；' => ';',
        '！' => '!',
        '？' => '?',
        '（' => '(',
        '）' => ')',
        '【' => '[',
        '】' => ']',
        '“' | '”' => '"',
        '‘' | '’' => '\'',
        other => other,
    }
}

fn strip_wrapping_quotes(text: &str) -> &str {
    let inner = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'));
    match inner {
        Some(inner) if !inner.contains('"') => inner.trim(),
        _ => text,
    }
}
