//! Expression micro-AST.
//!
//! Template-embedded expressions (`{{ plusOne }}`, `:class="active ? 'on'
//! : 'off'"`, `@click="count++"`) are parsed at compile time into this
//! small expression language and carried inside the render program. The
//! evaluator resolves [`Expr::CtxAccess`] through the render-context chain
//! and [`Expr::Ident`] through the local scope introduced by iteration and
//! slot props.

use serde::{Deserialize, Serialize};

/// Operator set for binary expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    NullishCoalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Scope-local identifier (iteration alias, slot prop, arrow param).
    Ident(String),
    /// Free identifier: resolves through the component render context.
    CtxAccess(String),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
    },
    ArrayLit(Vec<Expr>),
    ObjectLit(Vec<(String, Expr)>),
    Arrow {
        params: Vec<String>,
        body: Box<Expr>,
    },
    /// Statement sequence (inline handlers: `a = 1; b = 2`).
    Seq(Vec<Expr>),
}

impl Expr {
    /// A literal with no reads: safe to treat as constant.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::Str(_) => true,
            Expr::Unary { operand, .. } => operand.is_constant(),
            Expr::Binary { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
            Expr::Conditional { test, consequent, alternate } => {
                test.is_constant() && consequent.is_constant() && alternate.is_constant()
            }
            Expr::ArrayLit(items) => items.iter().all(Expr::is_constant),
            Expr::ObjectLit(entries) => entries.iter().all(|(_, v)| v.is_constant()),
            _ => false,
        }
    }
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprParseError {
    pub message: String,
    pub offset: usize,
}

fn lex(src: &str) -> Result<Vec<Token>, ExprParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < bytes.len() {
                let c = bytes[i] as char;
                if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(src[start..i].to_string()));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &src[start..i];
            let number = text.parse::<f64>().map_err(|_| ExprParseError {
                message: format!("malformed number `{text}`"),
                offset: start,
            })?;
            tokens.push(Token::Number(number));
            continue;
        }
        if c == '\'' || c == '"' || c == '`' {
            let quote = c;
            let start = i;
            i += 1;
            let mut value = String::new();
            loop {
                if i >= bytes.len() {
                    return Err(ExprParseError {
                        message: "unterminated string".to_string(),
                        offset: start,
                    });
                }
                let c = bytes[i] as char;
                i += 1;
                if c == quote {
                    break;
                }
                if c == '\\' && i < bytes.len() {
                    let escaped = bytes[i] as char;
                    i += 1;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    value.push(c);
                }
            }
            tokens.push(Token::Str(value));
            continue;
        }
        // Multi-char punctuation, longest first.
        const PUNCTS: &[&str] = &[
            "===", "!==", "?.", "??", "=>", "==", "!=", "<=", ">=", "&&", "||", "++", "--",
            "+=", "-=", "(", ")", "[", "]", "{", "}", ".", ",", ":", ";", "?", "+", "-", "*",
            "/", "%", "<", ">", "!", "=",
        ];
        let rest = &src[i..];
        let punct = PUNCTS.iter().find(|p| rest.starts_with(**p));
        match punct {
            Some(p) => {
                tokens.push(Token::Punct(p));
                i += p.len();
            }
            None => {
                return Err(ExprParseError {
                    message: format!("unexpected character `{c}`"),
                    offset: i,
                })
            }
        }
    }
    Ok(tokens)
}

// =============================================================================
// Parser
// =============================================================================

struct Stream {
    tokens: Vec<Token>,
    pos: usize,
}

impl Stream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek() == Some(&Token::Punct(punct_static(punct))) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprParseError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{punct}`")))
        }
    }

    fn unexpected(&self, wanted: &str) -> ExprParseError {
        ExprParseError {
            message: format!("expected {wanted}, found {:?}", self.peek()),
            offset: self.pos,
        }
    }
}

// Token::Punct holds 'static strs from the lexer table; map back for eq.
fn punct_static(p: &str) -> &'static str {
    const PUNCTS: &[&str] = &[
        "===", "!==", "?.", "??", "=>", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=",
        "-=", "(", ")", "[", "]", "{", "}", ".", ",", ":", ";", "?", "+", "-", "*", "/", "%",
        "<", ">", "!", "=",
    ];
    PUNCTS.iter().find(|s| **s == p).copied().unwrap_or("")
}

/// Parse a single expression.
pub fn parse_expr(src: &str) -> Result<Expr, ExprParseError> {
    let tokens = lex(src)?;
    let mut stream = Stream { tokens, pos: 0 };
    let expr = parse_statements(&mut stream)?;
    if stream.peek().is_some() {
        return Err(stream.unexpected("end of expression"));
    }
    Ok(expr)
}

/// Parse an inline-statement body (`a = 1; b++`). A single statement
/// parses to the statement itself.
fn parse_statements(stream: &mut Stream) -> Result<Expr, ExprParseError> {
    let mut statements = vec![parse_assignment(stream)?];
    while stream.eat(";") {
        if stream.peek().is_none() {
            break;
        }
        statements.push(parse_assignment(stream)?);
    }
    Ok(if statements.len() == 1 {
        statements.pop().unwrap_or(Expr::Null)
    } else {
        Expr::Seq(statements)
    })
}

fn parse_assignment(stream: &mut Stream) -> Result<Expr, ExprParseError> {
    let lhs = parse_conditional(stream)?;
    let op = match stream.peek() {
        Some(Token::Punct("=")) => Some(AssignOp::Assign),
        Some(Token::Punct("+=")) => Some(AssignOp::Add),
        Some(Token::Punct("-=")) => Some(AssignOp::Sub),
        _ => None,
    };
    if let Some(op) = op {
        stream.advance();
        let value = parse_assignment(stream)?;
        return Ok(Expr::Assign { target: Box::new(lhs), op, value: Box::new(value) });
    }
    Ok(lhs)
}

fn parse_conditional(stream: &mut Stream) -> Result<Expr, ExprParseError> {
    let test = parse_binary(stream, 0)?;
    if stream.eat("?") {
        let consequent = parse_assignment(stream)?;
        stream.expect(":")?;
        let alternate = parse_assignment(stream)?;
        return Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        });
    }
    Ok(test)
}

/// (precedence, op); higher binds tighter. All left-associative.
fn binary_op_info(token: &Token) -> Option<(u8, BinaryOp)> {
    let Token::Punct(p) = token else { return None };
    match *p {
        "??" => Some((5, BinaryOp::NullishCoalesce)),
        "||" => Some((10, BinaryOp::Or)),
        "&&" => Some((20, BinaryOp::And)),
        "==" | "===" => Some((30, BinaryOp::Eq)),
        "!=" | "!==" => Some((30, BinaryOp::NotEq)),
        "<" => Some((35, BinaryOp::Lt)),
        "<=" => Some((35, BinaryOp::LtEq)),
        ">" => Some((35, BinaryOp::Gt)),
        ">=" => Some((35, BinaryOp::GtEq)),
        "+" => Some((40, BinaryOp::Add)),
        "-" => Some((40, BinaryOp::Sub)),
        "*" => Some((50, BinaryOp::Mul)),
        "/" => Some((50, BinaryOp::Div)),
        "%" => Some((50, BinaryOp::Rem)),
        _ => None,
    }
}

fn parse_binary(stream: &mut Stream, min_prec: u8) -> Result<Expr, ExprParseError> {
    let mut lhs = parse_prefix(stream)?;
    while let Some(token) = stream.peek() {
        let Some((prec, op)) = binary_op_info(token) else { break };
        if prec < min_prec {
            break;
        }
        stream.advance();
        let rhs = parse_binary(stream, prec + 1)?;
        lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    Ok(lhs)
}

fn parse_prefix(stream: &mut Stream) -> Result<Expr, ExprParseError> {
    match stream.peek() {
        Some(Token::Punct("!")) => {
            stream.advance();
            let operand = parse_prefix(stream)?;
            Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) })
        }
        Some(Token::Punct("-")) => {
            stream.advance();
            let operand = parse_prefix(stream)?;
            Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) })
        }
        Some(Token::Punct("++")) | Some(Token::Punct("--")) => {
            let op = if stream.eat("++") { AssignOp::Add } else { AssignOp::Sub };
            if op == AssignOp::Sub {
                stream.advance();
            }
            let target = parse_postfix(stream)?;
            Ok(Expr::Assign {
                target: Box::new(target),
                op,
                value: Box::new(Expr::Number(1.0)),
            })
        }
        _ => parse_postfix(stream),
    }
}

fn parse_postfix(stream: &mut Stream) -> Result<Expr, ExprParseError> {
    let mut expr = parse_atom(stream)?;
    loop {
        match stream.peek() {
            Some(Token::Punct(".")) | Some(Token::Punct("?.")) => {
                let optional = stream.peek() == Some(&Token::Punct("?."));
                stream.advance();
                let property = match stream.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(stream.unexpected("property name")),
                };
                expr = Expr::Member { object: Box::new(expr), property, optional };
            }
            Some(Token::Punct("[")) => {
                stream.advance();
                let index = parse_assignment(stream)?;
                stream.expect("]")?;
                expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
            }
            Some(Token::Punct("(")) => {
                stream.advance();
                let mut args = Vec::new();
                if !stream.eat(")") {
                    loop {
                        args.push(parse_assignment(stream)?);
                        if !stream.eat(",") {
                            break;
                        }
                    }
                    stream.expect(")")?;
                }
                expr = Expr::Call { callee: Box::new(expr), args };
            }
            // Postfix increment/decrement desugars to compound assignment.
            Some(Token::Punct("++")) => {
                stream.advance();
                expr = Expr::Assign {
                    target: Box::new(expr),
                    op: AssignOp::Add,
                    value: Box::new(Expr::Number(1.0)),
                };
            }
            Some(Token::Punct("--")) => {
                stream.advance();
                expr = Expr::Assign {
                    target: Box::new(expr),
                    op: AssignOp::Sub,
                    value: Box::new(Expr::Number(1.0)),
                };
            }
            _ => break,
        }
    }
    Ok(expr)
}

fn parse_atom(stream: &mut Stream) -> Result<Expr, ExprParseError> {
    // Arrow functions: `x => body` or `(a, b) => body`.
    if let Some(arrow) = try_parse_arrow(stream)? {
        return Ok(arrow);
    }
    match stream.advance() {
        Some(Token::Number(n)) => Ok(Expr::Number(n)),
        Some(Token::Str(s)) => Ok(Expr::Str(s)),
        Some(Token::Ident(name)) => Ok(match name.as_str() {
            "true" => Expr::Bool(true),
            "false" => Expr::Bool(false),
            "null" | "undefined" => Expr::Null,
            _ => Expr::Ident(name),
        }),
        Some(Token::Punct("(")) => {
            let inner = parse_assignment(stream)?;
            stream.expect(")")?;
            Ok(inner)
        }
        Some(Token::Punct("[")) => {
            let mut items = Vec::new();
            if !stream.eat("]") {
                loop {
                    items.push(parse_assignment(stream)?);
                    if !stream.eat(",") {
                        break;
                    }
                }
                stream.expect("]")?;
            }
            Ok(Expr::ArrayLit(items))
        }
        Some(Token::Punct("{")) => {
            let mut entries = Vec::new();
            if !stream.eat("}") {
                loop {
                    let key = match stream.advance() {
                        Some(Token::Ident(name)) => name,
                        Some(Token::Str(s)) => s,
                        _ => return Err(stream.unexpected("property key")),
                    };
                    let value = if stream.eat(":") {
                        parse_assignment(stream)?
                    } else {
                        // Shorthand `{ foo }`.
                        Expr::Ident(key.clone())
                    };
                    entries.push((key, value));
                    if !stream.eat(",") {
                        break;
                    }
                }
                stream.expect("}")?;
            }
            Ok(Expr::ObjectLit(entries))
        }
        other => Err(ExprParseError {
            message: format!("unexpected token {other:?}"),
            offset: stream.pos,
        }),
    }
}

fn try_parse_arrow(stream: &mut Stream) -> Result<Option<Expr>, ExprParseError> {
    // `ident =>`
    if let (Some(Token::Ident(name)), Some(Token::Punct("=>"))) = (stream.peek(), stream.peek2()) {
        let params = vec![name.clone()];
        stream.advance();
        stream.advance();
        let body = parse_assignment(stream)?;
        return Ok(Some(Expr::Arrow { params, body: Box::new(body) }));
    }
    // `( a, b ) =>` — look ahead for the closing paren followed by `=>`.
    if stream.peek() == Some(&Token::Punct("(")) {
        let mut depth = 0usize;
        let mut end = stream.pos;
        for (offset, token) in stream.tokens[stream.pos..].iter().enumerate() {
            match token {
                Token::Punct("(") => depth += 1,
                Token::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        end = stream.pos + offset;
                        break;
                    }
                }
                _ => {}
            }
        }
        if stream.tokens.get(end + 1) == Some(&Token::Punct("=>")) {
            stream.advance(); // (
            let mut params = Vec::new();
            if !stream.eat(")") {
                loop {
                    match stream.advance() {
                        Some(Token::Ident(name)) => params.push(name),
                        _ => return Err(stream.unexpected("parameter name")),
                    }
                    if !stream.eat(",") {
                        break;
                    }
                }
                stream.expect(")")?;
            }
            stream.expect("=>")?;
            let body = parse_assignment(stream)?;
            return Ok(Some(Expr::Arrow { params, body: Box::new(body) }));
        }
    }
    Ok(None)
}

// =============================================================================
// Free-identifier rewriting
// =============================================================================

/// Identifiers never rewritten to context accesses.
const GLOBALS: &[&str] = &[
    "Math", "JSON", "Number", "String", "Boolean", "Array", "Object", "Infinity", "NaN",
    "parseInt", "parseFloat", "isNaN", "console",
];

/// Rewrite free identifiers into [`Expr::CtxAccess`] so evaluation
/// resolves them through the render context. Identifiers that are in
/// scope (iteration aliases, slot props, arrow params), global names, and
/// literal keywords stay as-is. Assignment targets are rewritten the same
/// way, preserving write-through shorthand.
pub fn rewrite_free_idents(expr: Expr, in_scope: &dyn Fn(&str) -> bool) -> Expr {
    match expr {
        Expr::Ident(name) => {
            // `$event` is the implicit inline-handler binding.
            if in_scope(&name) || GLOBALS.contains(&name.as_str()) || name == "$event" {
                Expr::Ident(name)
            } else {
                Expr::CtxAccess(name)
            }
        }
        Expr::CtxAccess(name) => Expr::CtxAccess(name),
        Expr::Member { object, property, optional } => Expr::Member {
            object: Box::new(rewrite_free_idents(*object, in_scope)),
            property,
            optional,
        },
        Expr::Index { object, index } => Expr::Index {
            object: Box::new(rewrite_free_idents(*object, in_scope)),
            index: Box::new(rewrite_free_idents(*index, in_scope)),
        },
        Expr::Call { callee, args } => Expr::Call {
            callee: Box::new(rewrite_free_idents(*callee, in_scope)),
            args: args.into_iter().map(|a| rewrite_free_idents(a, in_scope)).collect(),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(rewrite_free_idents(*operand, in_scope)),
        },
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: Box::new(rewrite_free_idents(*lhs, in_scope)),
            rhs: Box::new(rewrite_free_idents(*rhs, in_scope)),
        },
        Expr::Conditional { test, consequent, alternate } => Expr::Conditional {
            test: Box::new(rewrite_free_idents(*test, in_scope)),
            consequent: Box::new(rewrite_free_idents(*consequent, in_scope)),
            alternate: Box::new(rewrite_free_idents(*alternate, in_scope)),
        },
        Expr::Assign { target, op, value } => Expr::Assign {
            target: Box::new(rewrite_free_idents(*target, in_scope)),
            op,
            value: Box::new(rewrite_free_idents(*value, in_scope)),
        },
        Expr::ArrayLit(items) => Expr::ArrayLit(
            items.into_iter().map(|i| rewrite_free_idents(i, in_scope)).collect(),
        ),
        Expr::ObjectLit(entries) => Expr::ObjectLit(
            entries
                .into_iter()
                .map(|(k, v)| (k, rewrite_free_idents(v, in_scope)))
                .collect(),
        ),
        Expr::Arrow { params, body } => {
            // Arrow params shadow outer resolution.
            let params_clone = params.clone();
            let body = rewrite_free_idents(*body, &move |name: &str| {
                params_clone.iter().any(|p| p == name) || in_scope(name)
            });
            Expr::Arrow { params, body: Box::new(body) }
        }
        Expr::Seq(statements) => Expr::Seq(
            statements.into_iter().map(|s| rewrite_free_idents(s, in_scope)).collect(),
        ),
        literal => literal,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(src: &str) -> Expr {
        parse_expr(src).unwrap_or_else(|e| panic!("parse `{src}`: {e:?}"))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parsed("1 + 2 * 3"),
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Number(1.0)),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(Expr::Number(2.0)),
                    rhs: Box::new(Expr::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn test_member_and_index_chain() {
        assert_eq!(
            parsed("a.b[0]"),
            Expr::Index {
                object: Box::new(Expr::Member {
                    object: Box::new(Expr::Ident("a".into())),
                    property: "b".into(),
                    optional: false,
                }),
                index: Box::new(Expr::Number(0.0)),
            }
        );
    }

    #[test]
    fn test_postfix_increment_desugars() {
        assert_eq!(
            parsed("count++"),
            Expr::Assign {
                target: Box::new(Expr::Ident("count".into())),
                op: AssignOp::Add,
                value: Box::new(Expr::Number(1.0)),
            }
        );
    }

    #[test]
    fn test_conditional() {
        let expr = parsed("ok ? 'a' : 'b'");
        assert!(matches!(expr, Expr::Conditional { .. }));
    }

    #[test]
    fn test_call_with_args() {
        assert_eq!(
            parsed("add(1, x)"),
            Expr::Call {
                callee: Box::new(Expr::Ident("add".into())),
                args: vec![Expr::Number(1.0), Expr::Ident("x".into())],
            }
        );
    }

    #[test]
    fn test_arrow() {
        assert_eq!(
            parsed("e => handle(e)"),
            Expr::Arrow {
                params: vec!["e".into()],
                body: Box::new(Expr::Call {
                    callee: Box::new(Expr::Ident("handle".into())),
                    args: vec![Expr::Ident("e".into())],
                }),
            }
        );
        assert!(matches!(parsed("(a, b) => a + b"), Expr::Arrow { .. }));
    }

    #[test]
    fn test_object_shorthand() {
        assert_eq!(
            parsed("{ foo, bar: 1 }"),
            Expr::ObjectLit(vec![
                ("foo".into(), Expr::Ident("foo".into())),
                ("bar".into(), Expr::Number(1.0)),
            ])
        );
    }

    #[test]
    fn test_keywords_are_literals() {
        assert_eq!(parsed("true"), Expr::Bool(true));
        assert_eq!(parsed("null"), Expr::Null);
        assert_eq!(parsed("undefined"), Expr::Null);
    }

    #[test]
    fn test_statement_sequence() {
        assert!(matches!(parsed("a = 1; b = 2"), Expr::Seq(s) if s.len() == 2));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expr("1 +").is_err());
        assert!(parse_expr("foo(").is_err());
        assert!(parse_expr("'unterminated").is_err());
        assert!(parse_expr("a @ b").is_err());
    }

    #[test]
    fn test_rewrite_free_idents() {
        let expr = parsed("item.label + count");
        let rewritten = rewrite_free_idents(expr, &|name| name == "item");
        assert_eq!(
            rewritten,
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Member {
                    object: Box::new(Expr::Ident("item".into())),
                    property: "label".into(),
                    optional: false,
                }),
                rhs: Box::new(Expr::CtxAccess("count".into())),
            }
        );
    }

    #[test]
    fn test_rewrite_skips_globals_and_arrow_params() {
        let expr = parsed("e => Math.max(e, count)");
        let rewritten = rewrite_free_idents(expr, &|_| false);
        let Expr::Arrow { body, .. } = rewritten else { panic!("expected arrow") };
        let Expr::Call { callee, args } = *body else { panic!("expected call") };
        assert!(matches!(*callee, Expr::Member { ref object, .. }
            if **object == Expr::Ident("Math".into())));
        assert_eq!(args[0], Expr::Ident("e".into()));
        assert_eq!(args[1], Expr::CtxAccess("count".into()));
    }
}
