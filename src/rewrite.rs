//! Token-level rewriting of generated scripts.
//!
//! The script is tokenized with a small Python lexer that understands
//! names, numbers, string literals (all quote styles and prefixes),
//! comments, brackets and line continuations. Rewrite rules then replace
//! whole `Name` tokens only, so identifiers that merely contain the
//! reporter name, and any text inside strings or comments, pass through
//! untouched. Import statements are never rewritten. Everything outside a
//! replaced reference is copied byte for byte.

use crate::errors::RewriteError;

/// Name the rewritten script uses for the sample channel.
pub const QUEUE_NAME: &str = "__queue";
/// Name of the factory that builds the capturing reporter class.
pub const FACTORY_NAME: &str = "__queue_reporter_factory";
/// The reporter class intercepted by default.
pub const REPORTER_CLASS: &str = "StateDataReporter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    String,
    Comment,
    Op,
    Newline,
    Whitespace,
    Continuation,
}

/// A lexical token; `start..end` is a byte range into the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Replace every `Name` token equal to `token` with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub token: String,
    pub replacement: String,
}

impl RewriteRule {
    pub fn new(token: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            replacement: replacement.into(),
        }
    }

    /// `StateDataReporter` -> `__queue_reporter_factory(__queue)`
    pub fn reporter_factory() -> Self {
        Self::new(REPORTER_CLASS, format!("{FACTORY_NAME}({QUEUE_NAME})"))
    }
}

/// Statement appended to every rewritten script.
pub fn end_of_stream_statement() -> String {
    format!("{QUEUE_NAME}.put(None)")
}

/// Apply `rules` to `source` and append the end-of-stream statement.
///
/// Names inside `import` and `from ... import` statements are left alone.
/// A dotted reference such as `app.StateDataReporter` is replaced as a
/// whole, module path included. Fails without producing any output when
/// the source cannot be tokenized.
pub fn rewrite(source: &str, rules: &[RewriteRule]) -> Result<String, RewriteError> {
    let tokens = tokenize(source)?;

    let mut out = String::with_capacity(source.len() + 64);
    let mut depth = 0usize;
    let mut statement_start = true;
    let mut in_import = false;
    // output offset where the current dotted name began
    let mut chain: Option<usize> = None;
    let mut after_dot = false;

    for token in &tokens {
        let text = token.text(source);
        match token.kind {
            TokenKind::Whitespace | TokenKind::Comment | TokenKind::Continuation => {
                out.push_str(text);
                continue;
            }
            TokenKind::Newline => {
                if depth == 0 {
                    statement_start = true;
                    in_import = false;
                    chain = None;
                    after_dot = false;
                }
                out.push_str(text);
                continue;
            }
            TokenKind::Name => {
                if statement_start && (text == "import" || text == "from") {
                    in_import = true;
                }
                if !after_dot {
                    chain = Some(out.len());
                }
                let rule = if in_import {
                    None
                } else {
                    rules.iter().find(|rule| rule.token == text)
                };
                match rule {
                    Some(rule) => {
                        if let Some(start) = chain {
                            out.truncate(start);
                        }
                        out.push_str(&rule.replacement);
                    }
                    None => out.push_str(text),
                }
                statement_start = false;
                after_dot = false;
            }
            TokenKind::Op => {
                match text {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                after_dot = text == ".";
                if !after_dot {
                    chain = None;
                }
                statement_start = text == ";" && depth == 0;
                if statement_start {
                    in_import = false;
                }
                out.push_str(text);
            }
            TokenKind::Number | TokenKind::String => {
                chain = None;
                after_dot = false;
                statement_start = false;
                out.push_str(text);
            }
        }
    }

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&end_of_stream_statement());
    out.push('\n');
    Ok(out)
}

/// Split `source` into tokens covering every byte of it.
pub fn tokenize(source: &str) -> Result<Vec<Token>, RewriteError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    // open brackets with their positions, innermost last
    brackets: Vec<(char, usize, usize)>,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            brackets: Vec::new(),
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
    }

    fn run(mut self) -> Result<Vec<Token>, RewriteError> {
        while let Some(c) = self.peek() {
            let (start, line, column) = (self.pos, self.line, self.column);
            let kind = self.next_kind(c, line, column)?;
            self.tokens.push(Token {
                kind,
                start,
                end: self.pos,
                line,
                column,
            });
        }

        if let Some(&(open, line, column)) = self.brackets.last() {
            return Err(RewriteError::new(
                line,
                column,
                format!("EOF in multi-line statement: '{open}' is never closed"),
            ));
        }
        if let Some(last) = self.tokens.last() {
            if last.kind == TokenKind::Continuation {
                return Err(RewriteError::new(
                    last.line,
                    last.column,
                    "EOF in multi-line statement: line continuation at end of input",
                ));
            }
        }
        Ok(self.tokens)
    }

    fn next_kind(&mut self, c: char, line: usize, column: usize) -> Result<TokenKind, RewriteError> {
        let kind = match c {
            '#' => {
                self.bump_while(|c| c != '\n' && c != '\r');
                TokenKind::Comment
            }
            '\n' => {
                self.bump();
                TokenKind::Newline
            }
            '\r' => {
                self.bump();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                TokenKind::Newline
            }
            ' ' | '\t' | '\x0c' => {
                self.bump_while(|c| matches!(c, ' ' | '\t' | '\x0c'));
                TokenKind::Whitespace
            }
            '\\' => {
                self.bump();
                match self.peek() {
                    Some('\n') => {
                        self.bump();
                    }
                    Some('\r') => {
                        self.bump();
                        if self.peek() == Some('\n') {
                            self.bump();
                        }
                    }
                    None => {}
                    Some(_) => {
                        return Err(RewriteError::new(
                            line,
                            column,
                            "unexpected character after line continuation character",
                        ))
                    }
                }
                TokenKind::Continuation
            }
            '"' | '\'' => {
                self.string(line, column)?;
                TokenKind::String
            }
            c if is_name_start(c) => {
                let start = self.pos;
                self.bump_while(is_name_char);
                let word = &self.src[start..self.pos];
                if is_string_prefix(word) && matches!(self.peek(), Some('"' | '\'')) {
                    self.string(line, column)?;
                    TokenKind::String
                } else {
                    TokenKind::Name
                }
            }
            c if c.is_ascii_digit()
                || (c == '.' && self.peek_nth(1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                self.number();
                TokenKind::Number
            }
            '(' | '[' | '{' => {
                self.bump();
                self.brackets.push((c, line, column));
                TokenKind::Op
            }
            ')' | ']' | '}' => {
                self.bump();
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.brackets.pop() {
                    Some((open, _, _)) if open == expected => {}
                    Some((open, _, _)) => {
                        return Err(RewriteError::new(
                            line,
                            column,
                            format!("closing '{c}' does not match opening '{open}'"),
                        ))
                    }
                    None => {
                        return Err(RewriteError::new(line, column, format!("unmatched '{c}'")))
                    }
                }
                TokenKind::Op
            }
            _ => {
                self.bump();
                TokenKind::Op
            }
        };
        Ok(kind)
    }

    /// Consume a string literal starting at its opening quote.
    fn string(&mut self, line: usize, column: usize) -> Result<(), RewriteError> {
        let quote = match self.bump() {
            Some(q) => q,
            None => return Err(RewriteError::new(line, column, "expected a quote")),
        };
        let triple = self.peek() == Some(quote) && self.peek_nth(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        loop {
            match self.bump() {
                None => {
                    let message = if triple {
                        "EOF in multi-line string"
                    } else {
                        "unterminated string literal"
                    };
                    return Err(RewriteError::new(line, column, message));
                }
                Some('\\') => {
                    // escapes (including in raw strings) never close the literal
                    self.bump();
                }
                Some('\n') if !triple => {
                    return Err(RewriteError::new(line, column, "unterminated string literal"));
                }
                Some(c) if c == quote => {
                    if !triple {
                        return Ok(());
                    }
                    if self.peek() == Some(quote) && self.peek_nth(1) == Some(quote) {
                        self.bump();
                        self.bump();
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn number(&mut self) {
        let mut prev = '\0';
        while let Some(c) = self.peek() {
            let exponent_sign = matches!(c, '+' | '-') && matches!(prev, 'e' | 'E');
            if !(c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign) {
                break;
            }
            prev = c;
            self.bump();
        }
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_name_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite_for_capture(source: &str) -> Result<String, RewriteError> {
        rewrite(source, &[RewriteRule::reporter_factory()])
    }

    const FACTORY: &str = "__queue_reporter_factory(__queue)";

    fn kinds(source: &str) -> Vec<(TokenKind, String)> {
        tokenize(source)
            .unwrap()
            .iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text(source).to_string()))
            .collect()
    }

    #[test]
    fn tokens_cover_the_whole_source() {
        let source = "x = f(1, 'a') # note\n\ty = 2.5e-3\n";
        let tokens = tokenize(source).unwrap();
        let joined: String = tokens.iter().map(|t| t.text(source)).collect();
        assert_eq!(joined, source);
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn recognises_literals_and_comments() {
        let toks = kinds("a = rb'x' + \"\"\"doc\nmore\"\"\" # tail\n");
        assert_eq!(toks[0], (TokenKind::Name, "a".into()));
        assert_eq!(toks[2], (TokenKind::String, "rb'x'".into()));
        assert_eq!(toks[4], (TokenKind::String, "\"\"\"doc\nmore\"\"\"".into()));
        assert_eq!(toks[5], (TokenKind::Comment, "# tail".into()));
        assert_eq!(toks[6], (TokenKind::Newline, "\n".into()));
    }

    #[test]
    fn numbers_with_exponents_are_single_tokens() {
        let toks = kinds("x = 1.5e-3 - .5\n");
        assert_eq!(toks[2], (TokenKind::Number, "1.5e-3".into()));
        assert_eq!(toks[4], (TokenKind::Number, ".5".into()));
    }

    #[test]
    fn rewrites_exact_reporter_tokens_only() {
        let source = "\
from sys import stdout
r = StateDataReporter(stdout, 100, step=True)
MyStateDataReporter(1)
StateDataReporterX = 3
s = 'StateDataReporter'  # StateDataReporter
";
        let out = rewrite_for_capture(source).unwrap();
        let expected = format!(
            "\
from sys import stdout
r = {FACTORY}(stdout, 100, step=True)
MyStateDataReporter(1)
StateDataReporterX = 3
s = 'StateDataReporter'  # StateDataReporter
__queue.put(None)
"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn script_without_reporter_only_gains_end_statement() {
        let out = rewrite_for_capture("print('hi')").unwrap();
        assert_eq!(out, "print('hi')\n__queue.put(None)\n");

        let out = rewrite_for_capture("").unwrap();
        assert_eq!(out, "__queue.put(None)\n");
    }

    #[test]
    fn end_statement_is_last_and_top_level() {
        let source = "for i in range(3):\n    simulation.step(10)\n";
        let out = rewrite_for_capture(source).unwrap();
        let last = out.lines().last().unwrap();
        assert_eq!(last, "__queue.put(None)");
        assert!(out.starts_with(source));
    }

    #[test]
    fn reporter_inside_brackets_and_continuations() {
        let source = "simulation.reporters.append(\n    StateDataReporter(stdout,\n        10))\nx = 1 + \\\n    2\n";
        let out = rewrite_for_capture(source).unwrap();
        assert!(out.contains(&format!("    {FACTORY}(stdout,\n")));
        assert!(out.contains("x = 1 + \\\n    2\n"));
    }

    #[test]
    fn import_statements_are_left_alone() {
        let source = "\
from openmm.app import StateDataReporter, PDBFile
from openmm.app import (
    StateDataReporter,
)
import StateDataReporter; r = StateDataReporter(stdout, 1)
";
        let out = rewrite_for_capture(source).unwrap();
        let expected = format!(
            "\
from openmm.app import StateDataReporter, PDBFile
from openmm.app import (
    StateDataReporter,
)
import StateDataReporter; r = {FACTORY}(stdout, 1)
__queue.put(None)
"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn qualified_reporter_is_replaced_with_its_module_path() {
        let source = "\
import openmm.app as app
r = app.StateDataReporter(stdout, 10)
s = openmm.app.StateDataReporter(stdout, 10)
t = make().StateDataReporter
";
        let out = rewrite_for_capture(source).unwrap();
        let expected = format!(
            "\
import openmm.app as app
r = {FACTORY}(stdout, 10)
s = {FACTORY}(stdout, 10)
t = make().{FACTORY}
__queue.put(None)
"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn custom_rules_apply_to_names() {
        let rules = [RewriteRule::new("DCDReporter", "NullReporter")];
        let out = rewrite("r = DCDReporter('out.dcd', 10)\n", &rules).unwrap();
        assert_eq!(out, "r = NullReporter('out.dcd', 10)\n__queue.put(None)\n");
    }

    #[test]
    fn unterminated_string_is_rejected() {
        let err = rewrite_for_capture("x = 'abc\ny = 1\n").unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn unterminated_triple_quote_is_rejected() {
        let err = rewrite_for_capture("x = 1\ndoc = '''never\nclosed\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("multi-line string"));
    }

    #[test]
    fn unbalanced_brackets_are_rejected() {
        let err = rewrite_for_capture("f(StateDataReporter(1)\n").unwrap_err();
        assert!(err.message.contains("never closed"));

        let err = rewrite_for_capture("x = [1, 2)\n").unwrap_err();
        assert!(err.message.contains("does not match"));

        let err = rewrite_for_capture("x = 1)\n").unwrap_err();
        assert!(err.message.contains("unmatched"));
    }

    #[test]
    fn trailing_continuation_is_rejected() {
        assert!(rewrite_for_capture("x = 1 + \\\n").is_err());
        assert!(rewrite_for_capture("x = 1 \\ 2\n").is_err());
    }

    #[test]
    fn escaped_quotes_do_not_close_strings() {
        let source = "a = 'it\\'s StateDataReporter'\nb = r\"\\\"\"\n";
        let out = rewrite_for_capture(source).unwrap();
        assert!(out.starts_with(source));
    }

    #[test]
    fn crlf_line_endings_survive() {
        let source = "r = StateDataReporter(stdout, 1)\r\nprint(r)\r\n";
        let out = rewrite_for_capture(source).unwrap();
        assert_eq!(
            out,
            format!("r = {FACTORY}(stdout, 1)\r\nprint(r)\r\n__queue.put(None)\n")
        );
    }
}
