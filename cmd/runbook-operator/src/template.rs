//! Parameter substitution for runbook step configs and conditions.
//!
//! Runbook templates persist a deliberately small expression language:
//! `{{ .path.to.param }}` lookups, `{{ default "fallback" .value }}`,
//! `{{if}}/{{else}}/{{end}}` conditionals, and `{{range}}/{{end}}`
//! iteration. The renderer never touches the filesystem or the environment;
//! unresolvable lookups render as `<no value>` so conditions and `default`
//! can see them.

use serde_json::{Map, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("invalid template: {0}")]
    Parse(String),
    #[error("failed to execute template: {0}")]
    Render(String),
}

#[derive(Debug, Clone)]
enum Expr {
    /// The current context (`.`).
    Current,
    /// A dotted lookup (`.a.b`).
    Path(Vec<String>),
    /// A quoted literal.
    Literal(String),
    /// `default <fallback> <value>`.
    Default(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        expr: Expr,
        body: Vec<Node>,
    },
}

/// Renders runbook templates against a parameter map.
#[derive(Debug, Default)]
pub struct Engine;

impl Engine {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, template: &str, params: &Map<String, Value>) -> Result<String> {
        let nodes = parse(template)?;
        let ctx = Value::Object(params.clone());
        let mut out = String::new();
        render_nodes(&nodes, &ctx, &mut out)?;
        Ok(out)
    }

    /// Checks template syntax without executing it.
    pub fn validate(&self, template: &str) -> Result<()> {
        parse(template).map(|_| ())
    }

    /// Renders every string value of a config map, recursing into nested
    /// maps. Non-string leaves pass through unchanged.
    pub fn render_config(
        &self,
        config: &Map<String, Value>,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut result = Map::new();
        for (key, value) in config {
            let rendered = match value {
                Value::String(s) => Value::String(self.render(s, params).map_err(|e| {
                    TemplateError::Render(format!("config key {key:?}: {e}"))
                })?),
                Value::Object(nested) => Value::Object(self.render_config(nested, params)?),
                other => other.clone(),
            };
            result.insert(key.clone(), rendered);
        }
        Ok(result)
    }
}

fn parse(template: &str) -> Result<Vec<Node>> {
    let mut tokens = tokenize(template)?.into_iter().peekable();
    let (nodes, terminator) = parse_block(&mut tokens, false)?;
    if let Some(t) = terminator {
        return Err(TemplateError::Parse(format!("unexpected {{{{{t}}}}}")));
    }
    Ok(nodes)
}

#[derive(Debug)]
enum Token {
    Text(String),
    Action(String),
}

fn tokenize(template: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            tokens.push(Token::Text(rest[..open].to_string()));
        }
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Parse("unclosed action".to_string()))?;
        tokens.push(Token::Action(after[..close].trim().to_string()));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

type TokenIter = std::iter::Peekable<std::vec::IntoIter<Token>>;

/// Parses nodes until `end`/`else` (when inside a block) or input end.
/// Returns the nodes and the terminating keyword, if any.
fn parse_block(tokens: &mut TokenIter, in_block: bool) -> Result<(Vec<Node>, Option<String>)> {
    let mut nodes = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => nodes.push(Node::Text(text)),
            Token::Action(action) => {
                if action == "end" || action == "else" {
                    if !in_block {
                        return Err(TemplateError::Parse(format!(
                            "unexpected {{{{{action}}}}}"
                        )));
                    }
                    return Ok((nodes, Some(action)));
                }

                if let Some(cond) = action.strip_prefix("if ") {
                    let cond = parse_expr(cond)?;
                    let (then, terminator) = parse_block(tokens, true)?;
                    let (otherwise, terminator) = match terminator.as_deref() {
                        Some("else") => {
                            let (otherwise, terminator) = parse_block(tokens, true)?;
                            (otherwise, terminator)
                        }
                        other => (Vec::new(), other.map(str::to_string)),
                    };
                    if terminator.as_deref() != Some("end") {
                        return Err(TemplateError::Parse("if without end".to_string()));
                    }
                    nodes.push(Node::If {
                        cond,
                        then,
                        otherwise,
                    });
                } else if let Some(expr) = action.strip_prefix("range ") {
                    let expr = parse_expr(expr)?;
                    let (body, terminator) = parse_block(tokens, true)?;
                    if terminator.as_deref() != Some("end") {
                        return Err(TemplateError::Parse("range without end".to_string()));
                    }
                    nodes.push(Node::Range { expr, body });
                } else {
                    nodes.push(Node::Expr(parse_expr(&action)?));
                }
            }
        }
    }

    if in_block {
        return Err(TemplateError::Parse("unterminated block".to_string()));
    }
    Ok((nodes, None))
}

fn parse_expr(s: &str) -> Result<Expr> {
    let args = split_args(s)?;
    match args.as_slice() {
        [] => Err(TemplateError::Parse("empty action".to_string())),
        [single] => parse_arg(single),
        [func, fallback, value] if func == "default" => Ok(Expr::Default(
            Box::new(parse_arg(fallback)?),
            Box::new(parse_arg(value)?),
        )),
        _ => Err(TemplateError::Parse(format!("unsupported action {s:?}"))),
    }
}

fn parse_arg(arg: &str) -> Result<Expr> {
    if arg == "." {
        return Ok(Expr::Current);
    }
    if let Some(stripped) = arg.strip_prefix('"') {
        let literal = stripped
            .strip_suffix('"')
            .ok_or_else(|| TemplateError::Parse(format!("unterminated string {arg:?}")))?;
        return Ok(Expr::Literal(literal.to_string()));
    }
    if let Some(path) = arg.strip_prefix('.') {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(TemplateError::Parse(format!("bad field path {arg:?}")));
        }
        return Ok(Expr::Path(segments));
    }
    Err(TemplateError::Parse(format!("unsupported operand {arg:?}")))
}

/// Splits an action on whitespace, keeping quoted strings whole.
fn split_args(s: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(TemplateError::Parse(format!("unterminated string in {s:?}")));
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

fn render_nodes(nodes: &[Node], ctx: &Value, out: &mut String) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr(expr) => out.push_str(&value_to_string(&eval(expr, ctx))),
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                if truthy(&eval(cond, ctx)) {
                    render_nodes(then, ctx, out)?;
                } else {
                    render_nodes(otherwise, ctx, out)?;
                }
            }
            Node::Range { expr, body } => match eval(expr, ctx) {
                Value::Array(items) => {
                    for item in items {
                        render_nodes(body, &item, out)?;
                    }
                }
                Value::Object(map) => {
                    for (_, item) in map {
                        render_nodes(body, &item, out)?;
                    }
                }
                Value::Null => {}
                other => {
                    return Err(TemplateError::Render(format!(
                        "range can't iterate over {other}"
                    )));
                }
            },
        }
    }
    Ok(())
}

fn eval(expr: &Expr, ctx: &Value) -> Value {
    match expr {
        Expr::Current => ctx.clone(),
        Expr::Literal(s) => Value::String(s.clone()),
        Expr::Path(segments) => {
            let mut current = ctx;
            for segment in segments {
                match current {
                    Value::Object(map) => match map.get(segment) {
                        Some(next) => current = next,
                        None => return Value::Null,
                    },
                    _ => return Value::Null,
                }
            }
            current.clone()
        }
        Expr::Default(fallback, value) => {
            let v = eval(value, ctx);
            if matches!(&v, Value::Null) || matches!(&v, Value::String(s) if s.is_empty()) {
                eval(fallback, ctx)
            } else {
                v
            }
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "<no value>".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
