//! Evaluation of parsed templates against a Relish value.

use relish_runtime::encode::escape;
use relish_runtime::{InterpreterThread, RuntimeError, Value};

use super::parse::{Command, Node, Operand, Pipeline};
use crate::error::WebError;

pub struct Executor<'t> {
    thread: &'t mut InterpreterThread,
    root: Value,
    out: String,
}

impl<'t> Executor<'t> {
    pub fn new(thread: &'t mut InterpreterThread, root: Value) -> Self {
        Executor {
            thread,
            root,
            out: String::new(),
        }
    }

    pub fn run(mut self, nodes: &[Node]) -> Result<String, WebError> {
        let dot = self.root.clone();
        self.nodes(nodes, &dot)?;
        Ok(self.out)
    }

    fn nodes(&mut self, nodes: &[Node], dot: &Value) -> Result<(), WebError> {
        for node in nodes {
            self.node(node, dot)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node, dot: &Value) -> Result<(), WebError> {
        match node {
            Node::Text(t) => self.out.push_str(t),
            Node::Output(p) => {
                let v = self.pipeline(p, dot)?;
                if !v.is_nil() {
                    self.out.push_str(&escape(&v.to_string()));
                }
            }
            Node::If { cond, then, otherwise } => {
                let branch = if truthy(&self.pipeline(cond, dot)?) { then } else { otherwise };
                self.nodes(branch, dot)?;
            }
            Node::With { pipe, body, otherwise } => {
                let v = self.pipeline(pipe, dot)?;
                if v.is_zero() {
                    self.nodes(otherwise, dot)?;
                } else {
                    self.nodes(body, &v)?;
                }
            }
            Node::Range { pipe, body, otherwise } => {
                let v = self.pipeline(pipe, dot)?;
                let items = self.items(&v)?;
                if items.is_empty() {
                    self.nodes(otherwise, dot)?;
                }
                for item in &items {
                    self.nodes(body, item)?;
                }
            }
        }
        Ok(())
    }

    /// Element values of a collection; map entries yield their values.
    fn items(&self, v: &Value) -> Result<Vec<Value>, WebError> {
        match v {
            Value::Nil => Ok(Vec::new()),
            Value::Object(obj) => Ok(self
                .thread
                .runtime()
                .persistence()
                .read_collection(self.thread.session(), obj, |c| c.values())?),
            other => Err(WebError::Template(format!("cannot range over {other}"))),
        }
    }

    fn pipeline(&mut self, p: &Pipeline, dot: &Value) -> Result<Value, WebError> {
        let mut carried = None;
        for cmd in &p.0 {
            carried = Some(self.command(cmd, dot, carried)?);
        }
        Ok(carried.unwrap_or(Value::Nil))
    }

    fn command(&mut self, cmd: &Command, dot: &Value, carried: Option<Value>) -> Result<Value, WebError> {
        let (head, rest) = match cmd.0.split_first() {
            Some(split) => split,
            None => return Err(WebError::Template("empty command".into())),
        };
        let Operand::Func(name) = head else {
            if carried.is_some() {
                return Err(WebError::Template("a value cannot receive piped input".into()));
            }
            return self.operand(head, dot);
        };
        let mut args = Vec::with_capacity(rest.len() + 1);
        for op in rest {
            args.push(self.operand(op, dot)?);
        }
        args.extend(carried);
        self.func(name, args)
    }

    fn operand(&mut self, op: &Operand, dot: &Value) -> Result<Value, WebError> {
        Ok(match op {
            Operand::Str(s) => Value::str(s),
            Operand::Int(i) => Value::Int(*i),
            Operand::Dot => dot.clone(),
            Operand::Root => self.root.clone(),
            Operand::Sub(p) => self.pipeline(p, dot)?,
            Operand::Func(name) => {
                return Err(WebError::Template(format!("'{name}' used as a value")))
            }
        })
    }

    fn func(&mut self, name: &str, mut args: Vec<Value>) -> Result<Value, WebError> {
        match name {
            "get" => match args.as_slice() {
                [_, Value::Nil] => Ok(Value::Nil),
                [_, _] => first(self.thread.call_by_name("get", args)?),
                _ => Err(arity("get", 2, args.len())),
            },
            "nonempty" => match args.as_slice() {
                [v] => Ok(Value::Bool(!v.is_zero())),
                _ => Err(arity("nonempty", 1, args.len())),
            },
            "iterable" => match args.pop() {
                Some(v) if args.is_empty() => {
                    let ok = match &v {
                        Value::Nil => true,
                        Value::Object(obj) => obj.is_collection(),
                        _ => false,
                    };
                    if ok {
                        Ok(v)
                    } else {
                        Err(WebError::Template(format!("cannot range over {v}")))
                    }
                }
                _ => Err(arity("iterable", 1, args.len() + 1)),
            },
            "call" => {
                if args.is_empty() {
                    return Err(arity("call", 1, 0));
                }
                let target = args.remove(0);
                let Some(target) = target.as_str() else {
                    return Err(WebError::Template(format!("call target {target} is not a name")));
                };
                first(self.thread.call_by_name(target, args)?)
            }
            other => Err(WebError::Template(format!("unknown function '{other}'"))),
        }
    }
}

fn truthy(v: &Value) -> bool {
    v.as_bool().unwrap_or_else(|| !v.is_zero())
}

fn first(results: Vec<Value>) -> Result<Value, WebError> {
    Ok(results.into_iter().next().unwrap_or(Value::Nil))
}

fn arity(name: &str, want: usize, got: usize) -> WebError {
    WebError::Runtime(RuntimeError::InvalidArgument(format!(
        "{name} takes {want} argument(s), got {got}"
    )))
}
