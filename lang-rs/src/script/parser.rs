//! Parser: logical lines → [`Node`] tree.
//!
//! Lang is line-oriented.  Each logical line is one of:
//!
//! | Line shape | Result |
//! |------------|--------|
//! | `con.if(…)` … `con.endif` (and loop/try forms) | composite statement |
//! | `return [value]`, `throw err[, msg]` | control transfer |
//! | `<lvalue> <op> <rvalue>` with a spaced `=`/`+=`/… | assignment |
//! | `key = text` | translation assignment |
//! | anything else | text expression, evaluated for its side effects |
//!
//! Inside a line there are two reading modes.  *Text mode* treats operator
//! characters literally and only recognises variables, calls and escapes.
//! *Operation mode* applies the math/condition precedence tables:
//!
//!   or  →  and  →  comparison  →  not  →  bit-or  →  bit-xor  →  bit-and  →
//!   shift  →  additive  →  multiplicative  →  unary  →  power  →  postfix  →
//!   primary
//!
//! An assignment value that does not parse as an operation falls back to
//! text mode, so `$s = Hello world!` simply stores the text.  Syntax errors
//! never abort parsing: they become [`Node::ParsingError`] nodes that raise
//! the matching errno when evaluated.

use std::rc::Rc;

use super::ast::{
    AssignOperator, ConditionOperator, FunctionDefinition, MathOperator, Node, ParsingError,
    VarModifiers,
};
use super::lexer::{
    decode_escape, logical_lines, multiline_content, source_text, tokenize, Escape, Line, Token,
    TokenKind,
};
use super::ops::parse_number;
use super::value::{Parameter, TypeConstraint, Value};

/// Parse a whole script into a statement list.
pub fn parse(src: &str) -> Node {
    let source = logical_lines(src);
    let last_line = source.lines.last().map_or(1, |l| l.number);
    let mut parser = StmtParser { lines: source.lines, pos: 0 };
    let (block, _) = parser.parse_block_until(&[]);
    let mut stmts = match block {
        Node::List(stmts) => stmts,
        other => vec![other],
    };
    if source.open_text {
        stmts.push(Node::parsing_error(
            ParsingError::Eof,
            last_line,
            "multi-line text is not closed",
        ));
    }
    tracing::trace!(statements = stmts.len(), "parsed script");
    Node::List(stmts)
}

/// Parse one expression in operation mode (`parser.op`).
pub fn parse_operation(text: &str) -> Result<Node, String> {
    parse_tokens_as(&tokenize(text), ExprMode::Math, 0)
}

/// Parse one expression in condition mode (`parser.con`).
pub fn parse_condition(text: &str) -> Result<Node, String> {
    parse_tokens_as(&tokenize(text), ExprMode::Condition, 0).map(as_condition)
}

/// True while `src` still has an unclosed block, multi-line text or line
/// continuation (used by the interactive reader to ask for more input).
pub fn is_open(src: &str) -> bool {
    let source = logical_lines(src);
    if source.open_text || source.open_continuation {
        return true;
    }
    let mut depth: i64 = 0;
    for line in &source.lines {
        match con_keyword(&line.text) {
            Some(
                "con.if" | "con.loop" | "con.while" | "con.until" | "con.repeat" | "con.foreach"
                | "con.try" | "con.softtry" | "con.nontry",
            ) => depth += 1,
            Some("con.endif" | "con.endloop" | "con.endtry") => depth -= 1,
            _ if line.text == "}" => depth -= 1,
            _ if line.text.ends_with('{') && line.text.contains("->") => depth += 1,
            _ => {}
        }
    }
    depth > 0
}

// ── Statement-level parser ────────────────────────────────────────────────────

/// The `con.xxx` keyword a line starts with, if any.
fn con_keyword(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("con.")?;
    let len = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').count();
    Some(&text[..4 + len])
}

fn line_keyword(text: &str) -> Option<&str> {
    if text == "}" {
        return Some("}");
    }
    con_keyword(text)
}

struct StmtParser {
    lines: Vec<Line>,
    pos: usize,
}

impl StmtParser {
    /// Parse statements until a line whose keyword is in `stop_at` (or EOF).
    ///
    /// The terminator line is *not* consumed; it is returned so the caller
    /// can dispatch on it.
    fn parse_block_until(&mut self, stop_at: &[&str]) -> (Node, Option<String>) {
        let mut stmts = Vec::new();
        while let Some(line) = self.lines.get(self.pos).cloned() {
            if let Some(kw) = line_keyword(&line.text) {
                if stop_at.contains(&kw) {
                    return (Node::List(stmts), Some(kw.to_owned()));
                }
            }
            self.pos += 1;
            stmts.push(self.parse_statement(&line));
        }
        (Node::List(stmts), None)
    }

    fn parse_statement(&mut self, line: &Line) -> Node {
        let text = line.text.as_str();

        if let Some(kw) = con_keyword(text) {
            return match kw {
                "con.if" => self.parse_if(line),
                "con.loop" | "con.while" | "con.until" | "con.repeat" | "con.foreach" => {
                    self.parse_loop(line)
                }
                "con.try" | "con.softtry" | "con.nontry" => self.parse_try(line),
                "con.break" | "con.continue" => parse_continue_break(line, kw),
                _ => Node::parsing_error(
                    ParsingError::InvalidConPart,
                    line.number,
                    format!("unexpected \"{kw}\""),
                ),
            };
        }
        if text == "}" {
            return Node::parsing_error(ParsingError::BracketMismatch, line.number, "unexpected }");
        }
        if text == "return" {
            return Node::Return(None);
        }
        if let Some(rest) = text.strip_prefix("return ") {
            let tokens = tokenize(rest.trim());
            return Node::Return(Some(Box::new(value_expression(&tokens, line.number))));
        }
        if let Some(rest) = text.strip_prefix("throw ") {
            return parse_throw(rest, line.number);
        }
        if let Some((lhs, op, rhs)) = split_assignment(text) {
            return self.parse_assignment(&lhs, op, &rhs, line.number);
        }
        text_expression(&tokenize(text), line.number)
    }

    fn parse_if(&mut self, first: &Line) -> Node {
        let mut parts = Vec::new();
        let mut header = first.clone();
        loop {
            let kw = con_keyword(&header.text).unwrap_or_default().to_owned();
            if kw == "con.else" {
                let (body, term) = self.parse_block_until(&["con.endif"]);
                parts.push(Node::IfStatementPartElse { body: Box::new(body) });
                if term.is_some() {
                    self.pos += 1;
                } else {
                    parts.push(eof_error(&header, "con.endif"));
                }
                break;
            }

            let condition = match control_args(&header.text, &kw, header.number, true) {
                Ok(Some(tokens)) => condition_node(&tokens, header.number),
                Ok(None) => missing_condition(&header),
                Err(e) => e,
            };
            let (body, term) = self.parse_block_until(&["con.elif", "con.else", "con.endif"]);
            parts.push(Node::IfStatementPartIf {
                condition: Box::new(condition),
                body: Box::new(body),
            });
            match term.as_deref() {
                Some("con.endif") => {
                    self.pos += 1;
                    break;
                }
                Some(_) => {
                    header = self.lines[self.pos].clone();
                    self.pos += 1;
                }
                None => {
                    parts.push(eof_error(&header, "con.endif"));
                    break;
                }
            }
        }
        Node::IfStatement(parts)
    }

    fn parse_loop(&mut self, first: &Line) -> Node {
        let kw = con_keyword(&first.text).unwrap_or_default().to_owned();
        let needs_args = kw != "con.loop";
        let args = match control_args(&first.text, &kw, first.number, needs_args) {
            Ok(args) => args,
            Err(e) => {
                // Keep the block structure intact even with a broken header.
                let (_, term) = self.parse_block_until(&["con.endloop"]);
                if term.is_some() {
                    self.pos += 1;
                }
                return Node::LoopStatement(vec![e]);
            }
        };

        let (body, term) = self.parse_block_until(&["con.else", "con.endloop"]);
        let body = Box::new(body);
        let line = first.number;
        let part = match (kw.as_str(), args) {
            ("con.while", Some(tokens)) => Node::LoopStatementPartWhile {
                condition: Box::new(condition_node(&tokens, line)),
                body,
            },
            ("con.until", Some(tokens)) => Node::LoopStatementPartUntil {
                condition: Box::new(condition_node(&tokens, line)),
                body,
            },
            ("con.repeat", Some(tokens)) => match split_pair(&tokens, line) {
                Ok((target, count)) => Node::LoopStatementPartRepeat {
                    var_pointer: Box::new(text_expression(target, line)),
                    count: Box::new(value_expression(count, line)),
                    body,
                },
                Err(e) => e,
            },
            ("con.foreach", Some(tokens)) => match split_pair(&tokens, line) {
                Ok((target, collection)) => Node::LoopStatementPartForEach {
                    var_pointer: Box::new(text_expression(target, line)),
                    collection: Box::new(value_expression(collection, line)),
                    body,
                },
                Err(e) => e,
            },
            _ => Node::LoopStatementPartLoop { body },
        };

        let mut parts = vec![part];
        let mut term = term;
        if term.as_deref() == Some("con.else") {
            let else_line = self.lines[self.pos].clone();
            self.pos += 1;
            let (body, t) = self.parse_block_until(&["con.endloop"]);
            parts.push(Node::LoopStatementPartElse { body: Box::new(body) });
            if t.is_none() {
                parts.push(eof_error(&else_line, "con.endloop"));
            }
            term = t;
        } else if term.is_none() {
            parts.push(eof_error(first, "con.endloop"));
        }
        if term.is_some() {
            self.pos += 1;
        }
        Node::LoopStatement(parts)
    }

    fn parse_try(&mut self, first: &Line) -> Node {
        const PARTS: &[&str] = &["con.catch", "con.else", "con.finally", "con.endtry"];

        let kw = con_keyword(&first.text).unwrap_or_default().to_owned();
        let (body, mut term) = self.parse_block_until(PARTS);
        let body = Box::new(body);
        let mut parts = vec![match kw.as_str() {
            "con.softtry" => Node::TryStatementPartSoftTry { body },
            "con.nontry" => Node::TryStatementPartNonTry { body },
            _ => Node::TryStatementPartTry { body },
        }];

        let mut header = first.clone();
        loop {
            let Some(kw) = term.take() else {
                parts.push(eof_error(&header, "con.endtry"));
                break;
            };
            if kw == "con.endtry" {
                self.pos += 1;
                break;
            }
            header = self.lines[self.pos].clone();
            self.pos += 1;
            match kw.as_str() {
                "con.catch" => {
                    let errors = match control_args(&header.text, &kw, header.number, false) {
                        Ok(Some(tokens)) => Some(argument_list(&tokens, header.number)),
                        Ok(None) => None,
                        Err(e) => Some(vec![e]),
                    };
                    let (body, t) = self.parse_block_until(PARTS);
                    parts.push(Node::TryStatementPartCatch { errors, body: Box::new(body) });
                    term = t;
                }
                "con.else" => {
                    let (body, t) = self.parse_block_until(&["con.finally", "con.endtry"]);
                    parts.push(Node::TryStatementPartElse { body: Box::new(body) });
                    term = t;
                }
                _ => {
                    let (body, t) = self.parse_block_until(&["con.endtry"]);
                    parts.push(Node::TryStatementPartFinally { body: Box::new(body) });
                    term = t;
                }
            }
        }
        Node::TryStatement(parts)
    }

    fn parse_assignment(&mut self, lhs: &str, op: AssignOperator, rhs: &str, line: usize) -> Node {
        let target = match parse_lvalue(lhs) {
            Ok(target) => target,
            Err(msg) => return Node::parsing_error(ParsingError::InvalidAssignment, line, msg),
        };

        let (lvalue, rvalue) = match target {
            LValue::Translation(key) => {
                if op != AssignOperator::Assign {
                    return Node::parsing_error(
                        ParsingError::InvalidAssignment,
                        line,
                        format!("\"{key}\" is not a variable"),
                    );
                }
                (Node::TextValue(key), text_expression(&tokenize(rhs), line))
            }
            LValue::Var(lvalue) => {
                let name = match &lvalue {
                    Node::VariableName { name, .. } => name.clone(),
                    _ => String::new(),
                };
                let tokens = tokenize(rhs);
                let rvalue = if op == AssignOperator::Condition {
                    condition_node(&tokens, line)
                } else if is_function_definition(&tokens) {
                    self.parse_function_definition(&tokens, line)
                } else if rhs.is_empty() {
                    if name.starts_with('&') {
                        Node::ArrayValue(Vec::new())
                    } else if name.starts_with("fp.") {
                        Node::NullValue
                    } else {
                        Node::TextValue(String::new())
                    }
                } else if name.starts_with('&') && op == AssignOperator::Assign {
                    collection_expression(&tokens, line)
                } else {
                    value_expression(&tokens, line)
                };
                (lvalue, rvalue)
            }
        };
        Node::Assignment { lvalue: Box::new(lvalue), rvalue: Box::new(rvalue), operator: op }
    }

    /// `(params)[:{RET}] -> body`, where body is `{` (block until `}`) or a
    /// single statement.
    fn parse_function_definition(&mut self, tokens: &[Token], line: usize) -> Node {
        let Some(close) = matching_paren(tokens, 0) else {
            return Node::parsing_error(ParsingError::BracketMismatch, line, "missing ) in parameter list");
        };

        let mut params = Vec::new();
        let inner = &tokens[1..close];
        if !source_text(inner).trim().is_empty() {
            let fragments = split_top_level(inner);
            let count = fragments.len();
            for (i, fragment) in fragments.into_iter().enumerate() {
                let text = source_text(fragment);
                match parse_parameter(text.trim()) {
                    Ok(p) if p.varargs && i + 1 != count => {
                        return Node::parsing_error(
                            ParsingError::InvalidParameter,
                            line,
                            "only the last parameter can be varargs",
                        );
                    }
                    Ok(p) => params.push(p),
                    Err(msg) => return Node::parsing_error(ParsingError::InvalidParameter, line, msg),
                }
            }
        }

        let rest = source_text(&tokens[close + 1..]);
        let mut rest = rest.trim();
        let mut return_constraint = None;
        if let Some(r) = rest.strip_prefix(":{") {
            let Some(end) = r.find('}') else {
                return Node::parsing_error(ParsingError::BracketMismatch, line, "missing } in return type");
            };
            match TypeConstraint::parse(&r[..end]) {
                Ok(c) => return_constraint = Some(c),
                Err(msg) => return Node::parsing_error(ParsingError::InvalidParameter, line, msg),
            }
            rest = r[end + 1..].trim_start();
        }
        let Some(body_text) = rest.strip_prefix("->") else {
            return Node::parsing_error(ParsingError::InvalidAssignment, line, "missing -> in function definition");
        };
        let body_text = body_text.trim();

        let body = if body_text == "{" {
            let (body, term) = self.parse_block_until(&["}"]);
            if term.is_some() {
                self.pos += 1;
                body
            } else {
                let mut stmts = match body {
                    Node::List(stmts) => stmts,
                    other => vec![other],
                };
                stmts.push(Node::parsing_error(ParsingError::Eof, line, "function body is not closed"));
                Node::List(stmts)
            }
        } else if body_text.is_empty() {
            return Node::parsing_error(ParsingError::InvalidAssignment, line, "missing function body");
        } else {
            let body_line = Line { text: body_text.to_owned(), number: line };
            Node::List(vec![self.parse_statement(&body_line)])
        };

        Node::FunctionDefinition(Rc::new(FunctionDefinition {
            params,
            return_constraint,
            body: Rc::new(body),
        }))
    }
}

fn eof_error(header: &Line, missing: &str) -> Node {
    Node::parsing_error(ParsingError::Eof, header.number, format!("{missing} is missing"))
}

fn missing_condition(header: &Line) -> Node {
    Node::parsing_error(ParsingError::ContFlowArgMissing, header.number, "condition is missing")
}

/// The token run inside `kw(…)`.
///
/// `Ok(None)` when the statement has no argument list and `required` is
/// false; an error node when it is malformed.
fn control_args(text: &str, kw: &str, line: usize, required: bool) -> Result<Option<Vec<Token>>, Node> {
    let rest = text[kw.len()..].trim();
    if rest.is_empty() {
        if required {
            return Err(Node::parsing_error(
                ParsingError::ContFlowArgMissing,
                line,
                format!("{kw} needs an argument list"),
            ));
        }
        return Ok(None);
    }
    let tokens = tokenize(rest);
    if !tokens[0].is(TokenKind::OpenParen) {
        return Err(Node::parsing_error(
            ParsingError::ContFlowArgMissing,
            line,
            format!("{kw} needs an argument list"),
        ));
    }
    let Some(close) = matching_paren(&tokens, 0) else {
        return Err(Node::parsing_error(ParsingError::BracketMismatch, line, "missing )"));
    };
    if !source_text(&tokens[close + 1..]).trim().is_empty() {
        return Err(Node::parsing_error(
            ParsingError::InvalidConPart,
            line,
            format!("unexpected text after {kw}(…)"),
        ));
    }
    let inner = tokens[1..close].to_vec();
    if required && source_text(&inner).trim().is_empty() {
        return Err(Node::parsing_error(
            ParsingError::ContFlowArgMissing,
            line,
            format!("{kw} needs an argument"),
        ));
    }
    Ok(Some(inner))
}

fn parse_continue_break(line: &Line, kw: &str) -> Node {
    let is_continue = kw == "con.continue";
    match control_args(&line.text, kw, line.number, false) {
        Ok(Some(tokens)) => Node::LoopStatementContinueBreak {
            number: Some(Box::new(value_expression(&tokens, line.number))),
            is_continue,
        },
        Ok(None) => Node::LoopStatementContinueBreak { number: None, is_continue },
        Err(e) => e,
    }
}

fn parse_throw(rest: &str, line: usize) -> Node {
    let tokens = tokenize(rest.trim());
    let fragments = split_top_level(&tokens);
    let error = Box::new(value_expression(fragments[0], line));
    let message = if fragments.len() > 1 {
        let end = tokens.len();
        let start = end - tokens_after_first_comma(&tokens);
        Some(Box::new(text_expression(&tokens[start..], line)))
    } else {
        None
    };
    Node::Throw { error, message }
}

/// Number of tokens after the first top-level comma.
fn tokens_after_first_comma(tokens: &[Token]) -> usize {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => return tokens.len() - i - 1,
            _ => {}
        }
    }
    0
}

/// `target, value` inside repeat/foreach headers.
fn split_pair(tokens: &[Token], line: usize) -> Result<(&[Token], &[Token]), Node> {
    let fragments = split_top_level(tokens);
    if fragments.len() != 2 {
        return Err(Node::parsing_error(
            ParsingError::ContFlowArgMissing,
            line,
            "two arguments are needed",
        ));
    }
    Ok((fragments[0], fragments[1]))
}

// ── Assignments ───────────────────────────────────────────────────────────────

/// Find a spaced assignment operator at paren depth 0.
fn split_assignment(text: &str) -> Option<(String, AssignOperator, String)> {
    let tokens = tokenize(text);
    let mut depth = 0usize;
    for (k, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => depth = depth.saturating_sub(1),
            TokenKind::Text if depth == 0 && tok.text == "=" => {
                let after_ok = tokens.get(k + 1).map_or(true, |t| t.is(TokenKind::Whitespace));
                if !after_ok || k == 0 {
                    continue;
                }
                let prev = &tokens[k - 1];
                let (op, start) = if prev.is(TokenKind::Whitespace) {
                    (AssignOperator::Assign, k - 1)
                } else if k >= 2 && tokens[k - 2].is(TokenKind::Whitespace) {
                    let op = match (prev.kind, prev.text.as_str()) {
                        (TokenKind::Operator, "+") => AssignOperator::Add,
                        (TokenKind::Operator, "-") => AssignOperator::Sub,
                        (TokenKind::Operator, "*") => AssignOperator::Mul,
                        (TokenKind::Operator, "/") => AssignOperator::Div,
                        (TokenKind::Operator, "%") => AssignOperator::Mod,
                        (TokenKind::Text, "?") => AssignOperator::Condition,
                        _ => continue,
                    };
                    (op, k - 2)
                } else {
                    continue;
                };
                let lhs = source_text(&tokens[..start]).trim().to_owned();
                if lhs.is_empty() {
                    continue;
                }
                let rhs = source_text(&tokens[k + 1..]).trim().to_owned();
                return Some((lhs, op, rhs));
            }
            _ => {}
        }
    }
    None
}

enum LValue {
    Var(Node),
    Translation(String),
}

fn is_var_start(s: &str) -> bool {
    s.starts_with('$') || s.starts_with('&') || s.starts_with("fp.")
}

fn parse_lvalue(lhs: &str) -> Result<LValue, String> {
    let mut rest = lhs;
    let mut modifiers = VarModifiers::default();
    loop {
        if let Some(r) = rest.strip_prefix("final ") {
            modifiers.final_data = true;
            rest = r.trim_start();
        } else if let Some(r) = rest.strip_prefix("static ") {
            modifiers.static_data = true;
            rest = r.trim_start();
        } else {
            break;
        }
    }

    if !is_var_start(rest) {
        if modifiers != VarModifiers::default() {
            return Err(format!("\"{rest}\" is not a variable name"));
        }
        if rest.contains(['(', ')']) || rest.starts_with("con.") || rest.starts_with("func.") {
            return Err(format!("can't assign to \"{rest}\""));
        }
        return Ok(LValue::Translation(rest.to_owned()));
    }

    let (sigil_len, allow_deref) = if rest.starts_with("fp.") {
        (3, false)
    } else {
        (1, rest.starts_with('$'))
    };
    let mut end = sigil_len;
    let bytes = rest.as_bytes();
    if allow_deref {
        while end < bytes.len() && bytes[end] == b'*' {
            end += 1;
        }
    }
    let ident_start = end;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    if end == ident_start {
        return Err(format!("\"{rest}\" is not a valid variable name"));
    }
    let name = rest[..end].to_owned();
    let mut tail = &rest[end..];

    let mut constraint = None;
    if let Some(r) = tail.strip_prefix('{') {
        let close = r.find('}').ok_or_else(|| "missing } in type constraint".to_owned())?;
        if ident_start != sigil_len {
            return Err("a dereferenced variable can't take a type constraint".to_owned());
        }
        constraint = Some(TypeConstraint::parse(&r[..close])?);
        tail = &r[close + 1..];
    }

    let mut index = None;
    if let Some(r) = tail.strip_prefix('[') {
        let inner = r.strip_suffix(']').ok_or_else(|| "missing ] in index".to_owned())?;
        index = Some(Box::new(parse_operation(inner)?));
        tail = "";
    }

    if !tail.is_empty() {
        return Err(format!("unexpected \"{tail}\" after variable name"));
    }
    Ok(LValue::Var(Node::VariableName { name, modifiers, constraint, index }))
}

fn is_function_definition(tokens: &[Token]) -> bool {
    if !tokens.first().is_some_and(|t| t.is(TokenKind::OpenParen)) {
        return false;
    }
    let Some(close) = matching_paren(tokens, 0) else {
        return false;
    };
    let rest = source_text(&tokens[close + 1..]);
    let rest = rest.trim_start();
    rest.starts_with("->") || rest.starts_with(":{")
}

/// `$a`, `$a{INT}`, `$a{number}`, `&rest...`, `fp.f`.
fn parse_parameter(text: &str) -> Result<Parameter, String> {
    let (text, varargs) = match text.strip_suffix("...") {
        Some(t) => (t, true),
        None => (text, false),
    };
    let sigil_len = if text.starts_with("fp.") {
        3
    } else if text.starts_with('$') || text.starts_with('&') {
        1
    } else {
        return Err(format!("invalid parameter \"{text}\""));
    };
    let end = sigil_len
        + text[sigil_len..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .count();
    if end == sigil_len {
        return Err(format!("invalid parameter \"{text}\""));
    }
    let mut param = Parameter::new(&text[..end]);
    param.varargs = varargs;
    let tail = &text[end..];
    if !tail.is_empty() {
        let spec = tail
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .ok_or_else(|| format!("invalid parameter \"{text}\""))?;
        if spec == "number" {
            param.number = true;
        } else {
            param.constraint = Some(TypeConstraint::parse(spec)?);
        }
    }
    Ok(param)
}

// ── Token helpers ─────────────────────────────────────────────────────────────

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn matching_bracket(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t.kind {
            TokenKind::OpenBracket => depth += 1,
            TokenKind::CloseBracket => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at commas outside parentheses.  Always yields at least one slice.
fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => {
                out.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&tokens[start..]);
    out
}

fn trim_tokens(tokens: &[Token]) -> &[Token] {
    let start = tokens.iter().position(|t| !t.is(TokenKind::Whitespace)).unwrap_or(tokens.len());
    let end = tokens.iter().rposition(|t| !t.is(TokenKind::Whitespace)).map_or(start, |i| i + 1);
    &tokens[start..end]
}

fn is_callee(tok: &Token) -> bool {
    tok.is(TokenKind::FuncName) || (tok.is(TokenKind::VarName) && tok.text.starts_with("fp."))
}

// ── Text mode ─────────────────────────────────────────────────────────────────

/// A number, `null` or plain text literal.
fn literal_node(word: &str) -> Node {
    if word == "null" {
        return Node::NullValue;
    }
    match parse_number(word) {
        Some(Value::Int(n)) => Node::IntValue(n),
        Some(Value::Long(n)) => Node::LongValue(n),
        Some(Value::Float(x)) => Node::FloatValue(x),
        Some(Value::Double(x)) => Node::DoubleValue(x),
        _ => Node::TextValue(word.to_owned()),
    }
}

/// Collapse a node run into one node; a lone word becomes a literal.
fn single_value(mut nodes: Vec<Node>) -> Node {
    match nodes.len() {
        0 => Node::TextValue(String::new()),
        1 => match nodes.pop() {
            Some(Node::TextValue(word)) => literal_node(&word),
            Some(node) => node,
            None => Node::TextValue(String::new()),
        },
        _ => Node::List(nodes),
    }
}

fn text_expression(tokens: &[Token], line: usize) -> Node {
    single_value(parse_text(trim_tokens(tokens), line))
}

/// Text-mode reading of a token run.
fn parse_text(tokens: &[Token], line: usize) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, nodes: &mut Vec<Node>| {
        if !word.is_empty() {
            nodes.push(Node::TextValue(std::mem::take(word)));
        }
    };

    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        let next_is_paren = tokens.get(i + 1).is_some_and(|t| t.is(TokenKind::OpenParen));
        match tok.kind {
            TokenKind::Escape => {
                flush(&mut word, &mut nodes);
                nodes.push(match decode_escape(&tok.text) {
                    Escape::Sequence(c) => Node::EscapeSequence(c),
                    Escape::Unicode(c) => Node::TextValue(c.to_string()),
                    Escape::Invalid => Node::TextValue(tok.text.clone()),
                });
                i += 1;
            }
            TokenKind::MultilineText => {
                flush(&mut word, &mut nodes);
                nodes.push(Node::TextValue(multiline_content(&tok.text)));
                i += 1;
            }
            TokenKind::Unpack => {
                flush(&mut word, &mut nodes);
                let name = tok.text.trim_end_matches("...");
                nodes.push(Node::ArgumentUnpack(name.to_owned()));
                i += 1;
            }
            TokenKind::FuncName | TokenKind::VarName if is_callee(tok) && next_is_paren => {
                flush(&mut word, &mut nodes);
                let (node, next) = parse_call(tokens, i, line);
                nodes.push(node);
                i = next;
            }
            TokenKind::FuncName | TokenKind::VarName => {
                flush(&mut word, &mut nodes);
                nodes.push(Node::UnprocessedVariableName(tok.text.clone()));
                i += 1;
            }
            TokenKind::Whitespace => {
                flush(&mut word, &mut nodes);
                nodes.push(Node::TextValue(tok.text.clone()));
                i += 1;
            }
            _ => {
                word.push_str(&tok.text);
                i += 1;
            }
        }
    }
    flush(&mut word, &mut nodes);

    // Adjacent plain text (whitespace included) becomes one node.
    let mut merged: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        match (merged.last_mut(), node) {
            (Some(Node::TextValue(prev)), Node::TextValue(s)) => prev.push_str(&s),
            (_, node) => merged.push(node),
        }
    }
    merged
}

/// Parse `callee(args)` (and any chained `(args)`) starting at `start`.
/// Returns the call node and the index after it.
fn parse_call(tokens: &[Token], start: usize, line: usize) -> (Node, usize) {
    let name = tokens[start].text.clone();
    let Some(close) = matching_paren(tokens, start + 1) else {
        return (
            Node::parsing_error(ParsingError::BracketMismatch, line, format!("missing ) after {name}(")),
            tokens.len(),
        );
    };
    let inner = &tokens[start + 2..close];
    let mut node = make_call(&name, inner, line);
    let mut i = close + 1;
    while tokens.get(i).is_some_and(|t| t.is(TokenKind::OpenParen)) {
        let Some(close) = matching_paren(tokens, i) else {
            return (
                Node::parsing_error(ParsingError::BracketMismatch, line, "missing ) in chained call"),
                tokens.len(),
            );
        };
        node = Node::FunctionCallPreviousNodeValue {
            callee: Box::new(node),
            args: argument_list(&tokens[i + 1..close], line),
        };
        i = close + 1;
    }
    (node, i)
}

fn make_call(name: &str, inner: &[Token], line: usize) -> Node {
    match name {
        "parser.op" | "parser.math" => match parse_tokens_as(inner, ExprMode::Math, line) {
            Ok(node) => node,
            Err(msg) => Node::parsing_error(ParsingError::InvalidExpression, line, msg),
        },
        "parser.con" => match parse_tokens_as(inner, ExprMode::Condition, line) {
            Ok(node) => as_condition(node),
            Err(msg) => Node::parsing_error(ParsingError::InvalidExpression, line, msg),
        },
        "parser.text" => single_value(parse_text(trim_tokens(inner), line)),
        _ => Node::FunctionCall { name: name.to_owned(), args: argument_list(inner, line) },
    }
}

/// Arguments of a call: fragments separated by explicit separator nodes.
fn argument_list(tokens: &[Token], line: usize) -> Vec<Node> {
    if trim_tokens(tokens).is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    for (i, fragment) in split_top_level(tokens).into_iter().enumerate() {
        if i > 0 {
            args.push(Node::ArgumentSeparator(",".to_owned()));
        }
        let nodes = parse_text(trim_tokens(fragment), line);
        if nodes.len() == 1 {
            args.push(single_value(nodes));
        } else {
            args.extend(nodes);
        }
    }
    args
}

/// The right side of `&name = a, b, c`.
fn collection_expression(tokens: &[Token], line: usize) -> Node {
    let fragments = split_top_level(tokens);
    if fragments.len() == 1 {
        return value_expression(tokens, line);
    }
    Node::ArrayValue(
        fragments
            .into_iter()
            .map(|f| {
                let f = trim_tokens(f);
                if f.is_empty() {
                    Node::TextValue(String::new())
                } else {
                    value_expression(f, line)
                }
            })
            .collect(),
    )
}

/// Operation mode with a text-mode fallback.
fn value_expression(tokens: &[Token], line: usize) -> Node {
    let tokens = trim_tokens(tokens);
    match parse_tokens_as(tokens, ExprMode::Math, line) {
        Ok(node) => node,
        Err(_) => text_expression(tokens, line),
    }
}

fn condition_node(tokens: &[Token], line: usize) -> Node {
    match parse_tokens_as(tokens, ExprMode::Condition, line) {
        Ok(node) => as_condition(node),
        Err(msg) => Node::parsing_error(ParsingError::InvalidConPart, line, msg),
    }
}

fn as_condition(node: Node) -> Node {
    match node {
        Node::Condition { .. } | Node::ParsingError { .. } => node,
        other => Node::Condition {
            operator: ConditionOperator::Truth,
            left: Box::new(other),
            right: None,
        },
    }
}

// ── Operation mode ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprMode {
    Math,
    Condition,
}

fn parse_tokens_as(tokens: &[Token], mode: ExprMode, line: usize) -> Result<Node, String> {
    let tokens = trim_tokens(tokens);
    if tokens.is_empty() {
        return Err("empty expression".to_owned());
    }
    let mut p = ExprParser { tokens, pos: 0, mode, line };
    let node = p.parse_top()?;
    p.skip_ws();
    if let Some(tok) = p.tokens.get(p.pos) {
        return Err(format!("unexpected \"{}\"", tok.text));
    }
    Ok(node)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    mode: ExprMode,
    line: usize,
}

impl<'a> ExprParser<'a> {
    fn skip_ws(&mut self) {
        while self.tokens.get(self.pos).is_some_and(|t| t.is(TokenKind::Whitespace)) {
            self.pos += 1;
        }
    }

    fn peek_op(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let tokens = self.tokens;
        tokens
            .get(self.pos)
            .filter(|t| t.is(TokenKind::Operator))
            .map(|t| t.text.as_str())
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_top(&mut self) -> Result<Node, String> {
        match self.mode {
            ExprMode::Condition => self.parse_or(),
            ExprMode::Math => self.parse_bitor(),
        }
    }

    fn condition(operator: ConditionOperator, left: Node, right: Option<Node>) -> Node {
        Node::Condition { operator, left: Box::new(left), right: right.map(Box::new) }
    }

    fn math(operator: MathOperator, left: Node, right: Option<Node>) -> Node {
        Node::Math { operator, left: Box::new(left), right: right.map(Box::new) }
    }

    fn parse_or(&mut self) -> Result<Node, String> {
        let mut left = self.parse_and()?;
        while self.eat_op("||") {
            let right = self.parse_and()?;
            left = Self::condition(ConditionOperator::Or, left, Some(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, String> {
        let mut left = self.parse_comparison()?;
        while self.eat_op("&&") {
            let right = self.parse_comparison()?;
            left = Self::condition(ConditionOperator::And, left, Some(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Node, String> {
        let mut left = self.parse_not()?;
        while let Some(op) = self.peek_op().and_then(ConditionOperator::from_symbol) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Self::condition(op, left, Some(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Node, String> {
        if self.eat_op("!") {
            let operand = self.parse_not()?;
            return Ok(Self::condition(ConditionOperator::Not, operand, None));
        }
        self.parse_bitor()
    }

    fn parse_binary(
        &mut self,
        table: &[(&str, MathOperator)],
        next: fn(&mut Self) -> Result<Node, String>,
    ) -> Result<Node, String> {
        let mut left = next(self)?;
        loop {
            let Some(op) = self.peek_op() else { break };
            let Some(&(_, operator)) = table.iter().find(|(sym, _)| *sym == op) else { break };
            self.pos += 1;
            let right = next(self)?;
            left = Self::math(operator, left, Some(right));
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Node, String> {
        self.parse_binary(&[("|", MathOperator::BitwiseOr)], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> Result<Node, String> {
        self.parse_binary(&[("^", MathOperator::BitwiseXor)], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> Result<Node, String> {
        self.parse_binary(&[("&", MathOperator::BitwiseAnd)], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> Result<Node, String> {
        self.parse_binary(
            &[
                ("<<", MathOperator::Lshift),
                (">>", MathOperator::Rshift),
                (">>>", MathOperator::Rzshift),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Node, String> {
        self.parse_binary(
            &[("+", MathOperator::Add), ("-", MathOperator::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Node, String> {
        self.parse_binary(
            &[
                ("*", MathOperator::Mul),
                ("/", MathOperator::Div),
                ("~/", MathOperator::FloorDiv),
                ("%", MathOperator::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Node, String> {
        let operator = match self.peek_op() {
            Some("+") => MathOperator::Pos,
            Some("-") => MathOperator::Inv,
            Some("~") => MathOperator::BitwiseNot,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        let operand = self.parse_unary()?;
        Ok(match (operator, operand) {
            (MathOperator::Inv, Node::IntValue(n)) => Node::IntValue(n.wrapping_neg()),
            (MathOperator::Inv, Node::LongValue(n)) => Node::LongValue(n.wrapping_neg()),
            (MathOperator::Inv, Node::FloatValue(x)) => Node::FloatValue(-x),
            (MathOperator::Inv, Node::DoubleValue(x)) => Node::DoubleValue(-x),
            (operator, operand) => Self::math(operator, operand, None),
        })
    }

    /// `**` is right-associative and binds tighter than unary minus on its
    /// left, looser on its right: `-2 ** 2` is `-(2 ** 2)`, `2 ** -1` works.
    fn parse_power(&mut self) -> Result<Node, String> {
        let base = self.parse_postfix()?;
        if self.eat_op("**") {
            let exponent = self.parse_unary()?;
            return Ok(Self::math(MathOperator::Pow, base, Some(exponent)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Node, String> {
        let mut node = self.parse_primary()?;
        loop {
            // No whitespace allowed before `[` or `(`.
            let Some(tok) = self.tokens.get(self.pos) else { break };
            match tok.kind {
                TokenKind::OpenBracket => {
                    let close = matching_bracket(self.tokens, self.pos)
                        .ok_or_else(|| "missing ]".to_owned())?;
                    let inner = &self.tokens[self.pos + 1..close];
                    let index = parse_tokens_as(inner, ExprMode::Math, self.line)?;
                    node = Self::math(MathOperator::GetItem, node, Some(index));
                    self.pos = close + 1;
                }
                TokenKind::OpenParen if is_call_result(&node) => {
                    let close = matching_paren(self.tokens, self.pos)
                        .ok_or_else(|| "missing )".to_owned())?;
                    let args = argument_list(&self.tokens[self.pos + 1..close], self.line);
                    node = Node::FunctionCallPreviousNodeValue { callee: Box::new(node), args };
                    self.pos = close + 1;
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Node, String> {
        self.skip_ws();
        let Some(tok) = self.tokens.get(self.pos) else {
            return Err("operand expected".to_owned());
        };
        if tok.is(TokenKind::OpenParen) {
            let close =
                matching_paren(self.tokens, self.pos).ok_or_else(|| "missing )".to_owned())?;
            let inner = &self.tokens[self.pos + 1..close];
            let node = parse_tokens_as(inner, self.mode, self.line)?;
            self.pos = close + 1;
            return Ok(node);
        }

        let start = self.pos;
        let mut end = start;
        while end < self.tokens.len() {
            let tok = &self.tokens[end];
            match tok.kind {
                TokenKind::Operator | TokenKind::CloseParen | TokenKind::CloseBracket => break,
                TokenKind::OpenBracket | TokenKind::OpenParen => break,
                TokenKind::Whitespace => {
                    let next = self.tokens[end..].iter().find(|t| !t.is(TokenKind::Whitespace));
                    match next {
                        Some(t) if !matches!(
                            t.kind,
                            TokenKind::Operator
                                | TokenKind::CloseParen
                                | TokenKind::CloseBracket
                                | TokenKind::OpenParen
                                | TokenKind::OpenBracket
                        ) => end += 1,
                        _ => break,
                    }
                }
                _ if is_callee(tok)
                    && self.tokens.get(end + 1).is_some_and(|t| t.is(TokenKind::OpenParen)) =>
                {
                    end = match matching_paren(self.tokens, end + 1) {
                        Some(close) => close + 1,
                        None => self.tokens.len(),
                    };
                    // Chained calls belong to the operand too.
                    while self.tokens.get(end).is_some_and(|t| t.is(TokenKind::OpenParen)) {
                        match matching_paren(self.tokens, end) {
                            Some(close) => end = close + 1,
                            None => end = self.tokens.len(),
                        }
                    }
                }
                _ => end += 1,
            }
        }
        if end == start {
            return Err(format!("operand expected before \"{}\"", self.tokens[start].text));
        }
        self.pos = end;
        Ok(single_value(parse_text(&self.tokens[start..end], self.line)))
    }
}

fn is_call_result(node: &Node) -> bool {
    matches!(
        node,
        Node::FunctionCall { .. }
            | Node::FunctionCallPreviousNodeValue { .. }
            | Node::UnprocessedVariableName(_)
            | Node::Math { operator: MathOperator::GetItem, .. }
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::NodeType;

    fn stmts(src: &str) -> Vec<Node> {
        match parse(src) {
            Node::List(stmts) => stmts,
            other => panic!("expected list, got {other:?}"),
        }
    }

    fn one(src: &str) -> Node {
        let mut s = stmts(src);
        assert_eq!(s.len(), 1, "{s:?}");
        s.remove(0)
    }

    fn rvalue(src: &str) -> Node {
        match one(src) {
            Node::Assignment { rvalue, .. } => *rvalue,
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn empty_source() {
        assert!(stmts("").is_empty());
        assert!(stmts("# just a comment\n\n").is_empty());
    }

    #[test]
    fn math_precedence() {
        assert_eq!(rvalue("$x = 1 + 2 * 3").to_string(), "(1 + (2 * 3))");
        assert_eq!(rvalue("$x = (1 + 2) * 3").to_string(), "((1 + 2) * 3)");
        assert_eq!(rvalue("$x = 2 ** 3 ** 2").to_string(), "(2 ** (3 ** 2))");
        assert_eq!(rvalue("$x = -2 ** 2").to_string(), "(-(2 ** 2))");
        assert_eq!(rvalue("$x = 1 | 2 & 3").to_string(), "(1 | (2 & 3))");
    }

    #[test]
    fn negative_literals_fold() {
        assert!(matches!(rvalue("$x = -5"), Node::IntValue(-5)));
        assert!(matches!(rvalue("$x = 2 ** -1"), Node::Math { operator: MathOperator::Pow, .. }));
    }

    #[test]
    fn number_literals() {
        assert!(matches!(rvalue("$x = 42"), Node::IntValue(42)));
        assert!(matches!(rvalue("$x = 42L"), Node::LongValue(42)));
        assert!(matches!(rvalue("$x = 1.5"), Node::DoubleValue(_)));
        assert!(matches!(rvalue("$x = 1.5f"), Node::FloatValue(_)));
        assert!(matches!(rvalue("$x = 3000000000"), Node::LongValue(3_000_000_000)));
        assert!(matches!(rvalue("$x = null"), Node::NullValue));
    }

    #[test]
    fn text_fallback() {
        let v = rvalue("$s = Hello world!");
        assert!(matches!(v, Node::TextValue(ref s) if s == "Hello world!"), "{v:?}");
        assert!(matches!(rvalue("$s ="), Node::TextValue(s) if s.is_empty()));
    }

    #[test]
    fn variables_in_operations() {
        let v = rvalue("$y = $x + 3");
        assert_eq!(v.to_string(), "($x + 3)");
    }

    #[test]
    fn index_and_compound_assignment() {
        match one("$x += 2") {
            Node::Assignment { operator, .. } => assert_eq!(operator, AssignOperator::Add),
            other => panic!("{other:?}"),
        }
        assert_eq!(rvalue("$v = &a[1 + 1]").to_string(), "(&a [] (1 + 1))");
        match one("&a[0] = 7") {
            Node::Assignment { lvalue, .. } => {
                assert!(matches!(*lvalue, Node::VariableName { index: Some(_), .. }))
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn modifiers_and_constraints() {
        match one("final $x{INT|LONG} = 1") {
            Node::Assignment { lvalue, .. } => match *lvalue {
                Node::VariableName { name, modifiers, constraint, .. } => {
                    assert_eq!(name, "$x");
                    assert!(modifiers.final_data);
                    assert!(constraint.is_some());
                }
                other => panic!("{other:?}"),
            },
            other => panic!("{other:?}"),
        }
        assert!(matches!(one("final foo = 1"), Node::ParsingError { .. }));
    }

    #[test]
    fn collection_assignment() {
        match rvalue("&a = 1, two, 3") {
            Node::ArrayValue(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[1], Node::TextValue(ref s) if s == "two"));
            }
            other => panic!("{other:?}"),
        }
        assert!(matches!(rvalue("&a ="), Node::ArrayValue(ref v) if v.is_empty()));
    }

    #[test]
    fn translation_assignment() {
        match one("greeting.hello = Hello, world") {
            Node::Assignment { lvalue, rvalue, .. } => {
                assert!(matches!(*lvalue, Node::TextValue(ref k) if k == "greeting.hello"));
                assert!(matches!(*rvalue, Node::TextValue(ref s) if s == "Hello, world"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn call_arguments_are_separated() {
        match one("func.println(a, $b c)") {
            Node::FunctionCall { name, args } => {
                assert_eq!(name, "func.println");
                let kinds: Vec<NodeType> = args.iter().map(Node::node_type).collect();
                assert_eq!(
                    kinds,
                    vec![
                        NodeType::TextValue,
                        NodeType::ArgumentSeparator,
                        NodeType::UnprocessedVariableName,
                        NodeType::TextValue,
                    ]
                );
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn chained_calls() {
        match one("func.f(1)(2)") {
            Node::FunctionCallPreviousNodeValue { callee, args } => {
                assert!(matches!(*callee, Node::FunctionCall { .. }));
                assert_eq!(args.len(), 1);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn missing_paren_is_bracket_mismatch() {
        let node = one("func.println(abc");
        assert!(matches!(
            node.find_parsing_error(),
            Some(Node::ParsingError { error: ParsingError::BracketMismatch, .. })
        ));
    }

    #[test]
    fn if_elif_else() {
        let src = "con.if($a == 1)\n  x\ncon.elif($a)\n  y\ncon.else\n  z\ncon.endif";
        match one(src) {
            Node::IfStatement(parts) => {
                let kinds: Vec<NodeType> = parts.iter().map(Node::node_type).collect();
                assert_eq!(
                    kinds,
                    vec![NodeType::IfStatementPartIf, NodeType::IfStatementPartIf, NodeType::IfStatementPartElse]
                );
                match &parts[1] {
                    Node::IfStatementPartIf { condition, .. } => assert!(matches!(
                        **condition,
                        Node::Condition { operator: ConditionOperator::Truth, .. }
                    )),
                    other => panic!("{other:?}"),
                }
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unclosed_if_reports_eof() {
        let node = one("con.if(1)\nx");
        assert!(matches!(
            node.find_parsing_error(),
            Some(Node::ParsingError { error: ParsingError::Eof, .. })
        ));
    }

    #[test]
    fn if_without_condition() {
        let node = one("con.if\nx\ncon.endif");
        assert!(matches!(
            node.find_parsing_error(),
            Some(Node::ParsingError { error: ParsingError::ContFlowArgMissing, .. })
        ));
    }

    #[test]
    fn stray_keywords() {
        assert!(matches!(
            one("con.endloop"),
            Node::ParsingError { error: ParsingError::InvalidConPart, .. }
        ));
        assert!(matches!(
            one("}"),
            Node::ParsingError { error: ParsingError::BracketMismatch, .. }
        ));
    }

    #[test]
    fn loops() {
        let node = one("con.repeat($i, 3)\n  x\ncon.else\n  y\ncon.endloop");
        match node {
            Node::LoopStatement(parts) => {
                assert!(matches!(parts[0], Node::LoopStatementPartRepeat { .. }));
                assert!(matches!(parts[1], Node::LoopStatementPartElse { .. }));
            }
            other => panic!("{other:?}"),
        }
        let node = one("con.foreach($[e], &list)\ncon.break(2)\ncon.endloop");
        match node {
            Node::LoopStatement(parts) => match &parts[0] {
                Node::LoopStatementPartForEach { body, .. } => {
                    assert!(matches!(
                        body.children()[0],
                        Node::LoopStatementContinueBreak { number: Some(_), is_continue: false }
                    ));
                }
                other => panic!("{other:?}"),
            },
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn try_parts() {
        let src = "con.try\n a\ncon.catch($LANG_ERROR_DIV_BY_ZERO)\n b\ncon.catch\n c\ncon.else\n d\ncon.finally\n e\ncon.endtry";
        match one(src) {
            Node::TryStatement(parts) => {
                let kinds: Vec<NodeType> = parts.iter().map(Node::node_type).collect();
                assert_eq!(
                    kinds,
                    vec![
                        NodeType::TryStatementPartTry,
                        NodeType::TryStatementPartCatch,
                        NodeType::TryStatementPartCatch,
                        NodeType::TryStatementPartElse,
                        NodeType::TryStatementPartFinally,
                    ]
                );
                assert!(matches!(&parts[2], Node::TryStatementPartCatch { errors: None, .. }));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn function_definitions() {
        let src = "fp.add = ($a{number}, $b):{INT} -> {\n  return $a + $b\n}\nfunc.println(x)";
        let s = stmts(src);
        assert_eq!(s.len(), 2);
        match &s[0] {
            Node::Assignment { rvalue, .. } => match &**rvalue {
                Node::FunctionDefinition(def) => {
                    assert_eq!(def.params.len(), 2);
                    assert!(def.params[0].number);
                    assert!(def.return_constraint.is_some());
                    assert!(matches!(def.body.children()[0], Node::Return(Some(_))));
                }
                other => panic!("{other:?}"),
            },
            other => panic!("{other:?}"),
        }

        match rvalue("fp.inc = ($x) -> return $x + 1") {
            Node::FunctionDefinition(def) => assert_eq!(def.body.children().len(), 1),
            other => panic!("{other:?}"),
        }

        match rvalue("fp.all = (&args...) -> return &args") {
            Node::FunctionDefinition(def) => assert!(def.params[0].varargs),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn throw_with_message() {
        match one("throw $LANG_ERROR_DIV_BY_ZERO, bad input") {
            Node::Throw { error, message } => {
                assert!(matches!(*error, Node::UnprocessedVariableName(_)));
                assert!(message.is_some());
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn condition_assignment() {
        match one("$b ?= $a < 3 && !$c") {
            Node::Assignment { rvalue, operator, .. } => {
                assert_eq!(operator, AssignOperator::Condition);
                assert_eq!(rvalue.to_string(), "(($a < 3) && (!$c))");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn parser_functions() {
        match one("func.println(parser.op(1 + 2))") {
            Node::FunctionCall { args, .. } => {
                assert!(matches!(args[0], Node::Math { operator: MathOperator::Add, .. }))
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn open_blocks() {
        assert!(is_open("con.if(1)"));
        assert!(!is_open("con.if(1)\ncon.endif"));
        assert!(is_open("fp.f = () -> {"));
        assert!(!is_open("fp.f = () -> {\n}"));
        assert!(is_open("$t = {{{ text"));
        assert!(is_open("$x = 1 + \\"));
        assert!(!is_open("$x = 1"));
    }
}
