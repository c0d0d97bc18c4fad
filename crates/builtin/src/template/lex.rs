//! Splits template source into text and actions, then tokenizes actions.

use serde_json::Value;

use super::TemplateError;

/// A top-level piece of template source after delimiter handling.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Item {
    /// Literal text, already trimmed by neighbouring `{{-`/`-}}` markers.
    Text(String),
    /// The inside of `{{ … }}` without trim markers; `offset` is the byte
    /// position of the opening `{{`.
    Action { body: String, offset: usize },
}

/// One lexeme inside an action.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Tok {
    Ident(String),
    /// `.a.b`; a bare `.` has no segments.
    Field(Vec<String>),
    /// `$name.a.b`; the root variable is `$`.
    Var(String, Vec<String>),
    Literal(Value),
    Pipe,
    LParen,
    RParen,
    Declare,
    Assign,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub tok: Tok,
    pub offset: usize,
}

fn is_trim_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Split `source` into text and action items, applying whitespace trimming
/// and dropping comments.
pub(super) fn split(source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut cursor = 0;
    let mut trim_next = false;

    while let Some(rel) = source[cursor..].find("{{") {
        let open = cursor + rel;
        let mut text = &source[cursor..open];
        if trim_next {
            text = text.trim_start_matches(is_trim_space);
        }

        let mut body_start = open + 2;
        let after_open = &source[body_start..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(is_trim_space);
        if trim_left {
            text = text.trim_end_matches(is_trim_space);
            body_start += 1;
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_owned()));
        }

        let lead = source[body_start..].len() - source[body_start..].trim_start().len();
        let (body, close) = if source[body_start + lead..].starts_with("/*") {
            let comment = body_start + lead + 2;
            let Some(end) = source[comment..].find("*/") else {
                return Err(TemplateError::syntax(source, open, "unclosed comment"));
            };
            let after = comment + end + 2;
            let Some(close) = source[after..].find("}}").map(|c| after + c) else {
                return Err(TemplateError::syntax(source, open, "unclosed action"));
            };
            let tail = source[after..close].trim();
            if !tail.is_empty() && tail != "-" {
                return Err(TemplateError::syntax(source, open, "comment ends before closing delimiter"));
            }
            (None, close)
        } else {
            let close = find_close(source, body_start)
                .ok_or_else(|| TemplateError::syntax(source, open, "unclosed action"))?;
            (Some(&source[body_start..close]), close)
        };

        let raw_tail = body.map_or_else(|| source[..close].trim_end(), |b| b);
        let trim_right = raw_tail.ends_with('-')
            && raw_tail[..raw_tail.len() - 1].ends_with(is_trim_space);

        if let Some(mut body) = body {
            if trim_right {
                body = &body[..body.len() - 1];
            }
            items.push(Item::Action {
                body: body.to_owned(),
                offset: open,
            });
        }

        trim_next = trim_right;
        cursor = close + 2;
    }

    let mut text = &source[cursor..];
    if trim_next {
        text = text.trim_start_matches(is_trim_space);
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_owned()));
    }
    Ok(items)
}

/// Byte index of the `}}` closing the action that starts at `from`,
/// skipping over quoted strings.
fn find_close(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut i = from;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize an action body. `base` is the source offset reported in errors.
pub(super) fn tokenize(body: &str, base: usize) -> Result<Vec<Token>, (usize, String)> {
    let chars: Vec<(usize, char)> = body.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_ident = |start: usize| -> (String, usize) {
        let mut j = start;
        let mut s = String::new();
        while j < chars.len() && is_ident_char(chars[j].1) {
            s.push(chars[j].1);
            j += 1;
        }
        (s, j)
    };

    let take_fields = |mut j: usize| -> (Vec<String>, usize) {
        let mut fields = Vec::new();
        while j + 1 < chars.len() && chars[j].1 == '.' && is_ident_char(chars[j + 1].1) {
            let (name, next) = take_ident(j + 1);
            fields.push(name);
            j = next;
        }
        (fields, j)
    };

    while i < chars.len() {
        let (pos, c) = chars[i];
        let offset = base + pos;
        let push = |tokens: &mut Vec<Token>, tok: Tok| tokens.push(Token { tok, offset });

        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                push(&mut tokens, Tok::Pipe);
                i += 1;
            }
            '(' => {
                push(&mut tokens, Tok::LParen);
                i += 1;
            }
            ')' => {
                push(&mut tokens, Tok::RParen);
                i += 1;
            }
            ',' => {
                push(&mut tokens, Tok::Comma);
                i += 1;
            }
            '=' => {
                push(&mut tokens, Tok::Assign);
                i += 1;
            }
            ':' if chars.get(i + 1).map(|x| x.1) == Some('=') => {
                push(&mut tokens, Tok::Declare);
                i += 2;
            }
            '.' if chars.get(i + 1).is_none_or(|x| !x.1.is_ascii_digit()) => {
                if chars.get(i + 1).is_some_and(|x| is_ident_char(x.1)) {
                    let (fields, next) = take_fields(i);
                    push(&mut tokens, Tok::Field(fields));
                    i = next;
                } else {
                    push(&mut tokens, Tok::Field(Vec::new()));
                    i += 1;
                }
            }
            '$' => {
                let (name, next) = take_ident(i + 1);
                let (fields, next) = take_fields(next);
                push(&mut tokens, Tok::Var(format!("${name}"), fields));
                i = next;
            }
            '"' => {
                let (s, next) = lex_quoted(&chars, i).ok_or((offset, "unterminated string".to_owned()))?;
                push(&mut tokens, Tok::Literal(Value::String(s)));
                i = next;
            }
            '`' => {
                let mut j = i + 1;
                let mut s = String::new();
                while j < chars.len() && chars[j].1 != '`' {
                    s.push(chars[j].1);
                    j += 1;
                }
                if j >= chars.len() {
                    return Err((offset, "unterminated raw string".to_owned()));
                }
                push(&mut tokens, Tok::Literal(Value::String(s)));
                i = j + 1;
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+' || c == '.')
                    && chars.get(i + 1).is_some_and(|x| x.1.is_ascii_digit())) =>
            {
                let mut j = i + 1;
                while j < chars.len() {
                    let d = chars[j].1;
                    let exp_sign = (d == '-' || d == '+') && matches!(chars[j - 1].1, 'e' | 'E');
                    if d.is_ascii_alphanumeric() || d == '.' || d == '_' || exp_sign {
                        j += 1;
                    } else {
                        break;
                    }
                }
                let start = pos;
                let end = chars.get(j).map_or(body.len(), |x| x.0);
                let text = &body[start..end];
                let value = parse_number(text).ok_or((offset, format!("bad number syntax: {text}")))?;
                push(&mut tokens, Tok::Literal(value));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (name, next) = take_ident(i);
                let tok = match name.as_str() {
                    "true" => Tok::Literal(Value::Bool(true)),
                    "false" => Tok::Literal(Value::Bool(false)),
                    "nil" => Tok::Literal(Value::Null),
                    _ => Tok::Ident(name),
                };
                push(&mut tokens, tok);
                i = next;
            }
            other => return Err((offset, format!("unexpected character {other:?} in action"))),
        }
    }
    Ok(tokens)
}

fn lex_quoted(chars: &[(usize, char)], start: usize) -> Option<(String, usize)> {
    let mut s = String::new();
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j].1 {
            '"' => return Some((s, j + 1)),
            '\\' => {
                j += 1;
                let escaped = match chars.get(j)?.1 {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                };
                s.push(escaped);
            }
            c => s.push(c),
        }
        j += 1;
    }
    None
}

fn parse_number(text: &str) -> Option<Value> {
    let clean = text.replace('_', "");
    if let Ok(i) = clean.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f: f64 = clean.parse().ok()?;
    serde_json::Number::from_f64(f).map(Value::Number)
}
