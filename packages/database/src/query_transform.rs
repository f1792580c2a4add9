//! Rewrites the portable `?` placeholder into a driver's native marker.

use std::borrow::Cow;

/// Positional parameter marker understood by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (`MySQL`, `SQLite`)
    QuestionMark,
    /// `?1`, `?2`, ... (`SQLite`)
    NumberedQuestionMark,
    /// `$1`, `$2`, ... (`PostgreSQL`)
    DollarNumber,
}

impl PlaceholderStyle {
    fn marker(self, index: usize) -> String {
        match self {
            Self::QuestionMark => "?".to_string(),
            Self::NumberedQuestionMark => format!("?{index}"),
            Self::DollarNumber => format!("${index}"),
        }
    }
}

#[derive(Clone, Copy)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Replaces every `?` that is not inside a quoted literal, a quoted
/// identifier, or a comment with the marker for `style`, numbering from 1.
///
/// `--` and `/* */` comments are recognized for every style. `#` starts a
/// line comment except in [`PlaceholderStyle::DollarNumber`] SQL, where it is
/// an operator.
///
/// Returns the translated SQL and the number of placeholders found.
#[must_use]
pub fn translate_placeholders(sql: &str, style: PlaceholderStyle) -> (Cow<'_, str>, usize) {
    let mut translated = String::with_capacity(sql.len() + 8);
    let mut count = 0;
    let mut scan = Scan::Code;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match scan {
            Scan::Quoted(open) => {
                // a doubled quote ('') closes and immediately reopens, which
                // leaves the state unchanged after both characters
                if ch == open {
                    scan = Scan::Code;
                }
            }
            Scan::LineComment => {
                if ch == '\n' {
                    scan = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if ch == '*' && chars.next_if_eq(&'/').is_some() {
                    translated.push_str("*/");
                    scan = Scan::Code;
                    continue;
                }
            }
            Scan::Code => match ch {
                '\'' | '"' | '`' => scan = Scan::Quoted(ch),
                '-' if chars.peek() == Some(&'-') => scan = Scan::LineComment,
                '#' if style != PlaceholderStyle::DollarNumber => scan = Scan::LineComment,
                '/' if chars.next_if_eq(&'*').is_some() => {
                    translated.push_str("/*");
                    scan = Scan::BlockComment;
                    continue;
                }
                '?' => {
                    count += 1;
                    translated.push_str(&style.marker(count));
                    continue;
                }
                _ => {}
            },
        }
        translated.push(ch);
    }

    if style == PlaceholderStyle::QuestionMark {
        (Cow::Borrowed(sql), count)
    } else {
        (Cow::Owned(translated), count)
    }
}
