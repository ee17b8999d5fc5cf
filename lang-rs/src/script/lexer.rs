//! Lexer: source text → logical lines → tokens.
//!
//! Two passes:
//!
//! 1. [`logical_lines`] joins `\`-continued physical lines, drops `#`
//!    comments and keeps `{{{ … }}}` multi-line text (which may span
//!    physical lines and nest) inside a single logical line.
//! 2. [`tokenize`] splits one logical line into sigil-aware [`Token`]s.
//!
//! Tokens keep their exact source text, so any run of tokens can be turned
//! back into the text it came from.  Whether an operator token *means* an
//! operator is the parser's decision: in argument context it is plain text.

// ── Logical lines ─────────────────────────────────────────────────────────────

/// One logical line and the physical line number it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub number: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SourceLines {
    pub lines: Vec<Line>,
    /// A `{{{` literal was still open at end of input.
    pub open_text: bool,
    /// The input ended on a continuation marker.
    pub open_continuation: bool,
}

fn starts_with_at(chars: &[char], i: usize, pat: &str) -> bool {
    let mut j = i;
    for p in pat.chars() {
        if chars.get(j) != Some(&p) {
            return false;
        }
        j += 1;
    }
    true
}

/// Split `src` into logical lines.  Blank lines are dropped.
pub fn logical_lines(src: &str) -> SourceLines {
    let chars: Vec<char> = src.chars().collect();
    let len = chars.len();
    let mut out = SourceLines::default();
    let mut cur = String::new();
    let mut line_no = 1;
    let mut start_line = 1;
    let mut depth = 0usize;
    let mut i = 0;

    let flush = |cur: &mut String, start: usize, lines: &mut Vec<Line>| {
        let text = cur.trim();
        if !text.is_empty() {
            lines.push(Line { text: text.to_owned(), number: start });
        }
        cur.clear();
    };

    while i < len {
        let c = chars[i];

        // Inside {{{ … }}}: copy verbatim, track nesting.
        if depth > 0 {
            if c == '\\' && i + 1 < len {
                cur.push(c);
                cur.push(chars[i + 1]);
                if chars[i + 1] == '\n' {
                    line_no += 1;
                }
                i += 2;
            } else if starts_with_at(&chars, i, "{{{") {
                depth += 1;
                cur.push_str("{{{");
                i += 3;
            } else if starts_with_at(&chars, i, "}}}") {
                depth -= 1;
                cur.push_str("}}}");
                i += 3;
            } else {
                if c == '\n' {
                    line_no += 1;
                    if cur.ends_with('\r') {
                        cur.pop();
                    }
                }
                cur.push(c);
                i += 1;
            }
            continue;
        }

        match c {
            '\\' => {
                let mut j = i + 1;
                while j < len && matches!(chars[j], ' ' | '\t' | '\r') {
                    j += 1;
                }
                if j >= len {
                    // Continuation marker at end of input.
                    out.open_continuation = true;
                    i = j;
                } else if chars[j] == '\n' {
                    line_no += 1;
                    i = j + 1;
                } else {
                    cur.push('\\');
                    cur.push(chars[i + 1]);
                    i += 2;
                }
            }
            '#' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '{' if starts_with_at(&chars, i, "{{{") => {
                depth = 1;
                cur.push_str("{{{");
                i += 3;
            }
            '\n' => {
                flush(&mut cur, start_line, &mut out.lines);
                line_no += 1;
                start_line = line_no;
                i += 1;
            }
            '\r' => i += 1,
            _ => {
                cur.push(c);
                i += 1;
            }
        }
    }
    out.open_text = depth > 0;
    flush(&mut cur, start_line, &mut out.lines);
    out
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    /// A run of characters with no special meaning.
    Text,
    /// `\x` or `\u{HEX}`.
    Escape,
    /// `{{{ … }}}`, delimiters included.
    MultilineText,
    /// `$name`, `$*name`, `$[name]`, `&name`, `fp.name`.
    VarName,
    /// `&name...` in an argument list.
    Unpack,
    /// `func.name`, `linker.name`, `parser.name`.
    FuncName,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Comma,
    Operator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self { kind, text: text.into() }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }
}

/// Concatenate the source text of `tokens`.
pub fn source_text(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Operators, longest first so matching is greedy.
const OPERATORS: &[&str] = &[
    "===", "!==", ">>>", "**", "~/", "==", "!=", "<=", ">=", "<<", ">>", "&&", "||", "=~", "+", "-",
    "*", "/", "%", "^", "|", "~", "!", "<", ">",
];

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '%' | '^' | '|' | '~' | '!' | '=' | '<' | '>')
}

fn is_special(c: char) -> bool {
    c == ' '
        || c == '\t'
        || c == '\n'
        || matches!(c, '\\' | '$' | '&' | '(' | ')' | '[' | ']' | ',' | '{')
        || is_operator_char(c)
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_ident_char)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn at(&self, pat: &str) -> bool {
        starts_with_at(&self.chars, self.pos, pat)
    }

    fn take_from(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn next_token(&mut self) -> Option<Token> {
        let c = self.peek()?;
        let start = self.pos;

        let kind = match c {
            ' ' | '\t' | '\n' => {
                while matches!(self.peek(), Some(' ' | '\t' | '\n')) {
                    self.pos += 1;
                }
                TokenKind::Whitespace
            }
            '\\' => {
                self.pos += 1;
                match self.peek() {
                    None => TokenKind::Text,
                    Some('u') if self.peek_at(1) == Some('{') => {
                        while let Some(c) = self.peek() {
                            self.pos += 1;
                            if c == '}' {
                                break;
                            }
                        }
                        TokenKind::Escape
                    }
                    Some(_) => {
                        self.pos += 1;
                        TokenKind::Escape
                    }
                }
            }
            '{' if self.at("{{{") => {
                self.read_multiline();
                TokenKind::MultilineText
            }
            '$' => {
                self.pos += 1;
                match self.peek() {
                    Some(c) if c == '*' || c == '[' || is_ident_char(c) => {
                        self.read_var_tail();
                        TokenKind::VarName
                    }
                    _ => TokenKind::Text,
                }
            }
            '&' => {
                self.pos += 1;
                match self.peek() {
                    Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                        while self.peek().is_some_and(is_ident_char) {
                            self.pos += 1;
                        }
                        if self.at("...") {
                            self.pos += 3;
                            TokenKind::Unpack
                        } else {
                            TokenKind::VarName
                        }
                    }
                    Some('&') => {
                        self.pos += 1;
                        TokenKind::Operator
                    }
                    _ => TokenKind::Operator,
                }
            }
            '(' => {
                self.pos += 1;
                TokenKind::OpenParen
            }
            ')' => {
                self.pos += 1;
                TokenKind::CloseParen
            }
            '[' => {
                self.pos += 1;
                TokenKind::OpenBracket
            }
            ']' => {
                self.pos += 1;
                TokenKind::CloseBracket
            }
            ',' => {
                self.pos += 1;
                TokenKind::Comma
            }
            '{' => {
                self.pos += 1;
                TokenKind::Text
            }
            c if is_operator_char(c) => match OPERATORS.iter().find(|op| self.at(op)) {
                Some(op) => {
                    self.pos += op.chars().count();
                    TokenKind::Operator
                }
                None => {
                    // A lone `=`.
                    self.pos += 1;
                    TokenKind::Text
                }
            },
            _ => {
                while self.peek().is_some_and(|c| !is_special(c)) {
                    self.pos += 1;
                }
                let word = self.take_from(start);
                classify_word(&word)
            }
        };
        Some(Token::new(kind, self.take_from(start)))
    }

    /// After `$`: derefs, then a `[…]` reference or an identifier.
    fn read_var_tail(&mut self) {
        while self.peek() == Some('*') {
            self.pos += 1;
        }
        if self.peek() == Some('[') {
            let mut depth = 0usize;
            while let Some(c) = self.peek() {
                self.pos += 1;
                match c {
                    '[' => depth += 1,
                    ']' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
        } else {
            while self.peek().is_some_and(is_ident_char) {
                self.pos += 1;
            }
        }
    }

    fn read_multiline(&mut self) {
        self.pos += 3;
        let mut depth = 1usize;
        while self.pos < self.chars.len() {
            if self.peek() == Some('\\') {
                self.pos = (self.pos + 2).min(self.chars.len());
            } else if self.at("{{{") {
                depth += 1;
                self.pos += 3;
            } else if self.at("}}}") {
                depth -= 1;
                self.pos += 3;
                if depth == 0 {
                    return;
                }
            } else {
                self.pos += 1;
            }
        }
    }
}

fn classify_word(word: &str) -> TokenKind {
    if let Some(rest) = word.strip_prefix("fp.") {
        if is_ident(rest) {
            return TokenKind::VarName;
        }
    }
    for prefix in ["func.", "linker.", "parser."] {
        if let Some(rest) = word.strip_prefix(prefix) {
            if is_ident(rest) {
                return TokenKind::FuncName;
            }
        }
    }
    TokenKind::Text
}

/// Split one logical line into tokens.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut lexer = Lexer { chars: line.chars().collect(), pos: 0 };
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token() {
        tokens.push(tok);
    }
    tokens
}

// ── Literal helpers ───────────────────────────────────────────────────────────

/// What an escape token stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// `\x`: resolved by the evaluator (`\n`, `\t`, …).
    Sequence(char),
    /// `\u{HEX}`: already decoded.
    Unicode(char),
    /// `\u{…}` with a bad code point.
    Invalid,
}

pub fn decode_escape(text: &str) -> Escape {
    let body = &text[1..];
    if let Some(hex) = body.strip_prefix("u{").and_then(|s| s.strip_suffix('}')) {
        return match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
            Some(c) => Escape::Unicode(c),
            None => Escape::Invalid,
        };
    }
    match body.chars().next() {
        Some(c) => Escape::Sequence(c),
        None => Escape::Invalid,
    }
}

/// The content of a `{{{ … }}}` token with escaped delimiters restored.
pub fn multiline_content(raw: &str) -> String {
    let inner = raw.strip_prefix("{{{").unwrap_or(raw);
    let inner = inner.strip_suffix("}}}").unwrap_or(inner);
    inner.replace("\\{{{", "{{{").replace("\\}}}", "}}}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<(TokenKind, String)> {
        tokenize(line).into_iter().map(|t| (t.kind, t.text)).collect()
    }

    fn texts(src: &str) -> Vec<String> {
        logical_lines(src).lines.into_iter().map(|l| l.text).collect()
    }

    #[test]
    fn lines_drop_comments_and_blanks() {
        assert_eq!(texts("a = 1 # note\n\n  b = 2\n# only comment"), vec!["a = 1", "b = 2"]);
    }

    #[test]
    fn escaped_hash_is_not_a_comment() {
        assert_eq!(texts("a \\# b"), vec!["a \\# b"]);
    }

    #[test]
    fn continuation_joins_lines() {
        let src = logical_lines("$x = 1 + \\\n2\n$y");
        assert_eq!(src.lines[0].text, "$x = 1 + 2");
        assert_eq!(src.lines[0].number, 1);
        assert_eq!(src.lines[1].number, 3);
        assert!(!src.open_continuation);
        assert!(logical_lines("$x = \\").open_continuation);
    }

    #[test]
    fn multiline_text_spans_lines() {
        let src = logical_lines("$t = {{{a\n# not a comment\nb}}}\n$u = 1");
        assert_eq!(src.lines.len(), 2);
        assert_eq!(src.lines[0].text, "$t = {{{a\n# not a comment\nb}}}");
        assert!(!src.open_text);
    }

    #[test]
    fn multiline_text_nests_and_escapes() {
        let src = logical_lines("{{{ {{{ }}} \\}}} }}}");
        assert!(!src.open_text);
        assert!(logical_lines("$t = {{{ open").open_text);
        assert!(logical_lines("$t = {{{ {{{ }}}").open_text);
        assert_eq!(multiline_content("{{{a\\}}}b}}}"), "a}}}b");
    }

    #[test]
    fn tokenizes_variables() {
        let toks = kinds("$x&arr fp.f $*p $[x] $[[x]]");
        let vars: Vec<_> = toks
            .iter()
            .filter(|(k, _)| *k == TokenKind::VarName)
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(vars, vec!["$x", "&arr", "fp.f", "$*p", "$[x]", "$[[x]]"]);
    }

    #[test]
    fn tokenizes_calls_and_operators() {
        let toks = kinds("func.add($a, 1) ** -2 && !x");
        assert_eq!(toks[0], (TokenKind::FuncName, "func.add".to_owned()));
        assert_eq!(toks[1].0, TokenKind::OpenParen);
        assert_eq!(toks[2].0, TokenKind::VarName);
        assert_eq!(toks[3].0, TokenKind::Comma);
        assert!(toks.iter().any(|(k, t)| *k == TokenKind::Operator && t == "**"));
        assert!(toks.iter().any(|(k, t)| *k == TokenKind::Operator && t == "&&"));
        assert!(toks.iter().any(|(k, t)| *k == TokenKind::Operator && t == "!"));
    }

    #[test]
    fn lone_equals_and_dollar_are_text() {
        assert_eq!(kinds("=")[0].0, TokenKind::Text);
        assert_eq!(kinds("5$")[1], (TokenKind::Text, "$".to_owned()));
    }

    #[test]
    fn unpack_and_escapes() {
        let toks = kinds("&args... \\n \\u{41}");
        assert_eq!(toks[0], (TokenKind::Unpack, "&args...".to_owned()));
        assert_eq!(toks[2], (TokenKind::Escape, "\\n".to_owned()));
        assert_eq!(decode_escape("\\n"), Escape::Sequence('n'));
        assert_eq!(decode_escape("\\u{41}"), Escape::Unicode('A'));
        assert_eq!(decode_escape("\\u{zz}"), Escape::Invalid);
    }

    #[test]
    fn source_text_round_trips() {
        let line = "func.println(Hello, $name! {{{ raw }}} 1.5 -> {INT})";
        assert_eq!(source_text(&tokenize(line)), line);
    }
}
