//! Parser for canonical-form templates.

use super::lex::{self, Piece, Tok};
use super::rewrite::BUILTINS;
use crate::error::WebError;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Str(String),
    Int(i64),
    Dot,
    Root,
    Func(String),
    Sub(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command(pub Vec<Operand>);

/// Commands joined by `|`; each result is the last argument of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline(pub Vec<Command>);

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output(Pipeline),
    If { cond: Pipeline, then: Vec<Node>, otherwise: Vec<Node> },
    Range { pipe: Pipeline, body: Vec<Node>, otherwise: Vec<Node> },
    With { pipe: Pipeline, body: Vec<Node>, otherwise: Vec<Node> },
}

enum Stop {
    Eof,
    End,
    Else,
    ElseIf(Pipeline),
}

fn err(msg: impl Into<String>) -> WebError {
    WebError::Template(msg.into())
}

pub fn parse(canonical: &str) -> Result<Vec<Node>, WebError> {
    let mut items = Vec::new();
    for piece in lex::split(canonical)? {
        items.push(match piece {
            Piece::Text(t) => Item::Text(t.to_string()),
            Piece::Action(a) => Item::Action(lex::tokenize(a)?),
        });
    }
    let mut parser = Parser { items, pos: 0 };
    match parser.nodes()? {
        (nodes, Stop::Eof) => Ok(nodes),
        _ => Err(err("unexpected {{end}} or {{else}}")),
    }
}

enum Item {
    Text(String),
    Action(Vec<Tok>),
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
}

impl Parser {
    fn nodes(&mut self) -> Result<(Vec<Node>, Stop), WebError> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let i = self.pos;
            self.pos += 1;
            let toks = match &self.items[i] {
                Item::Text(t) => {
                    nodes.push(Node::Text(t.clone()));
                    continue;
                }
                Item::Action(toks) => toks.clone(),
            };
            match toks.first() {
                Some(Tok::Ident(k)) if k == "end" => return Ok((nodes, Stop::End)),
                Some(Tok::Ident(k)) if k == "else" => {
                    return match toks.get(1) {
                        Some(Tok::Ident(k)) if k == "if" => {
                            Ok((nodes, Stop::ElseIf(pipeline(&toks[2..])?)))
                        }
                        _ => Ok((nodes, Stop::Else)),
                    };
                }
                Some(Tok::Ident(k)) if k == "if" => {
                    let cond = pipeline(&toks[1..])?;
                    nodes.push(self.if_rest(cond)?);
                }
                Some(Tok::Ident(k)) if k == "range" || k == "with" => {
                    let pipe = pipeline(&toks[1..])?;
                    let (body, stop) = self.nodes()?;
                    let otherwise = match stop {
                        Stop::End => Vec::new(),
                        Stop::Else => self.block_end()?,
                        _ => return Err(err(format!("unclosed {{{{{k}}}}}"))),
                    };
                    nodes.push(if k == "range" {
                        Node::Range { pipe, body, otherwise }
                    } else {
                        Node::With { pipe, body, otherwise }
                    });
                }
                _ => nodes.push(Node::Output(pipeline(&toks)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn if_rest(&mut self, cond: Pipeline) -> Result<Node, WebError> {
        let (then, stop) = self.nodes()?;
        let otherwise = match stop {
            Stop::End => Vec::new(),
            Stop::Else => self.block_end()?,
            Stop::ElseIf(next) => vec![self.if_rest(next)?],
            Stop::Eof => return Err(err("unclosed {{if}}")),
        };
        Ok(Node::If { cond, then, otherwise })
    }

    /// The `else` branch, which must close with `end`.
    fn block_end(&mut self) -> Result<Vec<Node>, WebError> {
        match self.nodes()? {
            (nodes, Stop::End) => Ok(nodes),
            _ => Err(err("{{else}} branch without {{end}}")),
        }
    }
}

fn pipeline(toks: &[Tok]) -> Result<Pipeline, WebError> {
    let mut commands = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;
    while i < toks.len() {
        match &toks[i] {
            Tok::Pipe => {
                commands.push(command(std::mem::take(&mut current))?);
            }
            Tok::LParen => {
                let mut depth = 0;
                let mut close = None;
                for (j, t) in toks.iter().enumerate().skip(i) {
                    match t {
                        Tok::LParen => depth += 1,
                        Tok::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                close = Some(j);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let close = close.ok_or_else(|| err("unbalanced '('"))?;
                current.push(Operand::Sub(pipeline(&toks[i + 1..close])?));
                i = close;
            }
            Tok::RParen => return Err(err("unbalanced ')'")),
            Tok::Str(s) => current.push(Operand::Str(s.clone())),
            Tok::Int(n) => current.push(Operand::Int(*n)),
            Tok::Dot => current.push(Operand::Dot),
            Tok::Root => current.push(Operand::Root),
            Tok::Ident(name) if BUILTINS.contains(&name.as_str()) => {
                current.push(Operand::Func(name.clone()))
            }
            Tok::Ident(name) => return Err(err(format!("unknown function '{name}'"))),
            Tok::Field { .. } => return Err(err("field access in canonical template")),
        }
        i += 1;
    }
    commands.push(command(current)?);
    Ok(Pipeline(commands))
}

fn command(operands: Vec<Operand>) -> Result<Command, WebError> {
    match operands.as_slice() {
        [] => Err(err("empty command")),
        [_, ..] if operands[1..].iter().any(|o| matches!(o, Operand::Func(_))) => {
            Err(err("function used as an argument"))
        }
        [Operand::Func(_), ..] | [_] => Ok(Command(operands)),
        _ => Err(err("several values without a function")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_blocks() {
        let nodes = parse(r#"{{if nonempty .}}a{{else if nonempty $}}b{{else}}c{{end}}"#).unwrap();
        let [Node::If { otherwise, .. }] = nodes.as_slice() else {
            panic!("expected one if, got {nodes:?}");
        };
        let [Node::If { then, otherwise, .. }] = otherwise.as_slice() else {
            panic!("expected else-if");
        };
        assert_eq!(then, &vec![Node::Text("b".into())]);
        assert_eq!(otherwise, &vec![Node::Text("c".into())]);
    }

    #[test]
    fn pipelines() {
        let nodes = parse(r#"{{get "x" . | call "f" 1}}"#).unwrap();
        let [Node::Output(Pipeline(cmds))] = nodes.as_slice() else {
            panic!("expected output");
        };
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].0[0], Operand::Func("call".into()));
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse("{{if nonempty .}}open").is_err());
        assert!(parse("{{end}}").is_err());
        assert!(parse("{{upper .}}").is_err());
        assert!(parse("{{. .}}").is_err());
    }
}
