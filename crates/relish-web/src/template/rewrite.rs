//! Surface template syntax to canonical form.
//!
//! | surface              | canonical                           |
//! |----------------------|-------------------------------------|
//! | `.a.b`               | `get "b" (get "a" .)`               |
//! | `fn x y`             | `call "fn" x y`                     |
//! | `if P` / `else if P` | `if nonempty (P)`                   |
//! | `range P`            | `range iterable (P)`                |
//!
//! Text outside actions and the `else`/`end` keywords pass through.

use super::lex::{self, Piece, Tok};
use crate::error::WebError;

/// Functions of the canonical form. Everything else is a Relish call.
pub const BUILTINS: [&str; 4] = ["get", "nonempty", "iterable", "call"];

pub fn rewrite(src: &str) -> Result<String, WebError> {
    let mut out = String::with_capacity(src.len());
    for piece in lex::split(src)? {
        match piece {
            Piece::Text(t) => out.push_str(t),
            Piece::Action(a) => {
                let trimmed = a.trim();
                if trimmed.starts_with("/*") && trimmed.ends_with("*/") {
                    continue;
                }
                out.push_str("{{");
                out.push_str(&lex::join(&rewrite_action(lex::tokenize(a)?)?));
                out.push_str("}}");
            }
        }
    }
    Ok(out)
}

fn ident(s: &str) -> Tok {
    Tok::Ident(s.to_string())
}

fn guarded(keyword: &[&str], guard: &str, rest: &[Tok]) -> Result<Vec<Tok>, WebError> {
    let mut out: Vec<Tok> = keyword.iter().map(|k| ident(k)).collect();
    out.push(ident(guard));
    out.push(Tok::LParen);
    out.extend(pipeline(rest)?);
    out.push(Tok::RParen);
    Ok(out)
}

fn rewrite_action(toks: Vec<Tok>) -> Result<Vec<Tok>, WebError> {
    let keyword = match toks.first() {
        Some(Tok::Ident(k)) => k.as_str(),
        _ => return pipeline(&toks),
    };
    match keyword {
        "end" => Ok(toks),
        "else" => match toks.get(1) {
            None => Ok(toks),
            Some(Tok::Ident(k)) if k == "if" => guarded(&["else", "if"], "nonempty", &toks[2..]),
            Some(_) => Err(WebError::Template("unexpected tokens after else".into())),
        },
        "if" => guarded(&["if"], "nonempty", &toks[1..]),
        "range" => guarded(&["range"], "iterable", &toks[1..]),
        "with" => {
            let mut out = vec![ident("with")];
            out.extend(pipeline(&toks[1..])?);
            Ok(out)
        }
        _ => pipeline(&toks),
    }
}

/// Splits at top-level `|` and rewrites each command.
fn pipeline(toks: &[Tok]) -> Result<Vec<Tok>, WebError> {
    if toks.is_empty() {
        return Err(WebError::Template("empty pipeline".into()));
    }
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, t) in toks.iter().enumerate() {
        match t {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| WebError::Template("unbalanced ')'".into()))?;
            }
            Tok::Pipe if depth == 0 => {
                out.extend(command(&toks[start..i])?);
                out.push(Tok::Pipe);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(WebError::Template("unbalanced '('".into()));
    }
    out.extend(command(&toks[start..])?);
    Ok(out)
}

fn command(toks: &[Tok]) -> Result<Vec<Tok>, WebError> {
    match toks {
        [] => Err(WebError::Template("empty command".into())),
        [Tok::Field { root, path }] => Ok(field(*root, path)),
        [Tok::Ident(name), rest @ ..] => {
            let mut out = if BUILTINS.contains(&name.as_str()) {
                vec![Tok::Ident(name.clone())]
            } else {
                vec![ident("call"), Tok::Str(name.clone())]
            };
            out.extend(operands(rest)?);
            Ok(out)
        }
        _ => operands(toks),
    }
}

fn operands(toks: &[Tok]) -> Result<Vec<Tok>, WebError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        match &toks[i] {
            Tok::Field { root, path } => {
                out.push(Tok::LParen);
                out.extend(field(*root, path));
                out.push(Tok::RParen);
            }
            Tok::LParen => {
                let close = matching(toks, i)?;
                out.push(Tok::LParen);
                out.extend(pipeline(&toks[i + 1..close])?);
                out.push(Tok::RParen);
                i = close;
            }
            Tok::Ident(name) => {
                return Err(WebError::Template(format!(
                    "'{name}' used as an argument; wrap the call in parentheses"
                )))
            }
            other => out.push(other.clone()),
        }
        i += 1;
    }
    Ok(out)
}

fn matching(toks: &[Tok], open: usize) -> Result<usize, WebError> {
    let mut depth = 0;
    for (i, t) in toks.iter().enumerate().skip(open) {
        match t {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(WebError::Template("unbalanced '('".into()))
}

fn field(root: bool, path: &[String]) -> Vec<Tok> {
    let mut expr = vec![if root { Tok::Root } else { Tok::Dot }];
    for name in path {
        let mut next = vec![ident("get"), Tok::Str(name.clone())];
        if expr.len() == 1 {
            next.extend(expr);
        } else {
            next.push(Tok::LParen);
            next.extend(expr);
            next.push(Tok::RParen);
        }
        expr = next;
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_surface_forms() {
        let src = "<h1>{{.owner.name}}</h1>\n\
                   {{if .tags}}{{range .tags}}<li>{{.}}</li>{{end}}{{else if $.admin}}x{{else}}none{{end}}\n\
                   {{describe . | upper}} {{with .owner}}{{fmt \"%s\" (title .name)}}{{end}}{{/* note */}}";
        insta::assert_snapshot!(rewrite(src).unwrap(), @r###"
        <h1>{{get "name" (get "owner" .)}}</h1>
        {{if nonempty (get "tags" .)}}{{range iterable (get "tags" .)}}<li>{{.}}</li>{{end}}{{else if nonempty (get "admin" $)}}x{{else}}none{{end}}
        {{call "describe" . | call "upper"}} {{with get "owner" .}}{{call "fmt" "%s" (call "title" (get "name" .))}}{{end}}
        "###);
    }

    #[test]
    fn canonical_builtins_are_kept() {
        assert_eq!(
            rewrite(r#"{{get "x" . | nonempty}}"#).unwrap(),
            r#"{{get "x" . | nonempty}}"#
        );
    }

    #[test]
    fn bare_word_argument_is_rejected() {
        assert!(rewrite("{{fmt upper .}}").is_err());
        assert!(rewrite("{{if (.x}}").is_err());
    }
}
