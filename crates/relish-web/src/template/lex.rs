//! Splitting templates into text and actions, and tokenizing actions.

use std::fmt;

use crate::error::WebError;

/// A piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece<'a> {
    Text(&'a str),
    /// The inside of `{{ ... }}`.
    Action(&'a str),
}

/// Splits `src` at `{{` / `}}`. String literals inside an action may
/// contain `}}`.
pub fn split(src: &str) -> Result<Vec<Piece<'_>>, WebError> {
    let mut pieces = Vec::new();
    let mut rest = src;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            pieces.push(Piece::Text(&rest[..open]));
        }
        let body = &rest[open + 2..];
        let close = find_close(body).ok_or_else(|| {
            WebError::Template(format!("unclosed action near '{}'", head(&rest[open..])))
        })?;
        pieces.push(Piece::Action(&body[..close]));
        rest = &body[close + 2..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_str = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_str => i += 1,
            b'"' => in_str = !in_str,
            b'}' if !in_str && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn head(s: &str) -> &str {
    let end = s.char_indices().nth(20).map_or(s.len(), |(i, _)| i);
    &s[..end]
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Str(String),
    Int(i64),
    /// `.`
    Dot,
    /// `$`
    Root,
    /// `.a.b` or `$.a.b`
    Field { root: bool, path: Vec<String> },
    Ident(String),
    LParen,
    RParen,
    Pipe,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Str(s) => write!(f, "{s:?}"),
            Tok::Int(i) => write!(f, "{i}"),
            Tok::Dot => f.write_str("."),
            Tok::Root => f.write_str("$"),
            Tok::Field { root, path } => {
                if *root {
                    f.write_str("$")?;
                }
                for p in path {
                    write!(f, ".{p}")?;
                }
                Ok(())
            }
            Tok::Ident(name) => f.write_str(name),
            Tok::LParen => f.write_str("("),
            Tok::RParen => f.write_str(")"),
            Tok::Pipe => f.write_str("|"),
        }
    }
}

/// Renders tokens back to action text.
pub fn join(toks: &[Tok]) -> String {
    let mut out = String::new();
    for (i, t) in toks.iter().enumerate() {
        let tight = i == 0 || matches!(toks[i - 1], Tok::LParen) || matches!(t, Tok::RParen);
        if !tight {
            out.push(' ');
        }
        out.push_str(&t.to_string());
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '/'
}

fn field_path(chars: &[char], i: &mut usize) -> Vec<String> {
    let mut path = Vec::new();
    while *i < chars.len() && chars[*i] == '.' && chars.get(*i + 1).is_some_and(|c| is_ident_start(*c)) {
        *i += 1;
        let start = *i;
        while *i < chars.len() && (chars[*i].is_alphanumeric() || chars[*i] == '_') {
            *i += 1;
        }
        path.push(chars[start..*i].iter().collect());
    }
    path
}

/// Tokenizes the inside of one action.
pub fn tokenize(action: &str) -> Result<Vec<Tok>, WebError> {
    let chars: Vec<char> = action.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(WebError::Template(format!("unterminated string in '{action}'"))),
                        Some('"') => break,
                        Some('\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(other) => s.push(*other),
                                None => continue,
                            }
                        }
                        Some(other) => s.push(*other),
                    }
                    i += 1;
                }
                i += 1;
                toks.push(Tok::Str(s));
            }
            '.' => {
                let path = field_path(&chars, &mut i);
                if path.is_empty() {
                    toks.push(Tok::Dot);
                    i += 1;
                } else {
                    toks.push(Tok::Field { root: false, path });
                }
            }
            '$' => {
                i += 1;
                let path = field_path(&chars, &mut i);
                if path.is_empty() {
                    toks.push(Tok::Root);
                } else {
                    toks.push(Tok::Field { root: true, path });
                }
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| WebError::Template(format!("bad number '{text}'")))?;
                toks.push(Tok::Int(n));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(WebError::Template(format!(
                    "unexpected '{other}' in action '{action}'"
                )))
            }
        }
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_braces_in_strings() {
        let pieces = split(r#"a{{call "x}}" .}}b"#).unwrap();
        assert_eq!(
            pieces,
            vec![Piece::Text("a"), Piece::Action(r#"call "x}}" ."#), Piece::Text("b")]
        );
        assert!(split("{{ .x").is_err());
    }

    #[test]
    fn tokens() {
        let toks = tokenize(r#"if .owner.name | fmt "a\"b" -3 $ $.x (y)"#).unwrap();
        assert_eq!(
            toks,
            vec![
                Tok::Ident("if".into()),
                Tok::Field { root: false, path: vec!["owner".into(), "name".into()] },
                Tok::Pipe,
                Tok::Ident("fmt".into()),
                Tok::Str("a\"b".into()),
                Tok::Int(-3),
                Tok::Root,
                Tok::Field { root: true, path: vec!["x".into()] },
                Tok::LParen,
                Tok::Ident("y".into()),
                Tok::RParen,
            ]
        );
        assert_eq!(join(&toks), r#"if .owner.name | fmt "a\"b" -3 $ $.x (y)"#);
    }
}
