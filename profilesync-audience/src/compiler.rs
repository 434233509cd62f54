//! The audience rule language.
//!
//! ```text
//! document    := directive* expression?
//! directive   := DELETE | OBSOLETE | RENAMED FROM string (',' string)*
//!              | DESCRIPTION string
//! expression  := term ((AND | OR) term)*
//! term        := '(' expression ')' | comparison
//! comparison  := (string | identifier) ('=' | '<>' | CONTAINS) string
//! ```
//!
//! Keywords are case-insensitive. Strings are single-quoted; `''` inside a
//! string is a literal quote. A word that is followed by a comparison
//! operator is always a field name, so `Description = 'x'` is a rule.
//!
//! Several audiences can share one file: each starts with an
//! `[Audience Name]` header line. Blank lines and lines starting with `#`
//! are ignored.

use crate::error::CompileError;
use crate::spec::{AudienceSpec, Rule, RuleToken};
use profilesync_model::{BooleanOperator, ComparisonOperator};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Deepest parenthesis nesting a rule may use.
pub const MAX_NESTING: usize = 64;

/// Parses rule text into [`AudienceSpec`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudienceSpecCompiler;

/// Outcome of compiling several audiences; failures do not stop the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchCompile {
    pub specs: Vec<AudienceSpec>,
    pub errors: Vec<CompileError>,
}

/// One section of a multi-audience file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    pub name: String,
    pub text: String,
    /// 1-based line of the section header.
    pub line: usize,
}

impl AudienceSpecCompiler {
    /// Parses the rule text of one audience.
    pub fn parse(name: &str, text: &str) -> Result<AudienceSpec, Vec<CompileError>> {
        let lexemes = lex(name, text)?;
        let end = text.chars().count();
        Parser {
            audience: name,
            lexemes,
            pos: 0,
            end,
            depth: 0,
        }
        .document()
        .map_err(|e| vec![e])
    }

    /// Compiles each `(name, text)` pair, logging and dropping failures.
    pub fn compile_batch<I, N, T>(sources: I) -> BatchCompile
    where
        I: IntoIterator<Item = (N, T)>,
        N: AsRef<str>,
        T: AsRef<str>,
    {
        let mut batch = BatchCompile::default();
        for (name, text) in sources {
            match Self::parse(name.as_ref(), text.as_ref()) {
                Ok(spec) => {
                    debug!(audience = %spec.name, rules = spec.rules.len(), "compiled audience");
                    batch.specs.push(spec);
                }
                Err(errors) => {
                    for e in &errors {
                        warn!(audience = %e.audience, offset = e.offset, "{}", e.message);
                    }
                    batch.errors.extend(errors);
                }
            }
        }
        batch
    }

    /// Splits a multi-audience file into its sections.
    pub fn split_document(text: &str) -> Result<Vec<RuleSource>, CompileError> {
        let mut sections: Vec<RuleSource> = Vec::new();
        let mut names = HashSet::new();
        let mut offset = 0;

        for (i, raw) in text.split('\n').enumerate() {
            let line_offset = offset;
            offset += raw.chars().count() + 1;

            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                if name.is_empty() {
                    return Err(CompileError::new("", line_offset, "empty audience name in section header"));
                }
                if !names.insert(name.to_string()) {
                    return Err(CompileError::new(name, line_offset, "audience declared twice"));
                }
                sections.push(RuleSource {
                    name: name.to_string(),
                    text: String::new(),
                    line: i + 1,
                });
                continue;
            }
            match sections.last_mut() {
                Some(section) => {
                    if !section.text.is_empty() {
                        section.text.push('\n');
                    }
                    section.text.push_str(raw.trim_end_matches('\r'));
                }
                None => {
                    return Err(CompileError::new("", line_offset, "rule text before the first [audience] header"));
                }
            }
        }
        Ok(sections)
    }

    /// Splits and compiles a multi-audience file.
    pub fn compile_document(text: &str) -> Result<BatchCompile, CompileError> {
        let sections = Self::split_document(text)?;
        Ok(Self::compile_batch(sections.into_iter().map(|s| (s.name, s.text))))
    }
}

// ── Lexer ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Str(String),
    Word(String),
    Eq,
    Ne,
    Open,
    Close,
    Comma,
}

#[derive(Debug, Clone)]
struct Lexeme {
    tok: Tok,
    offset: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn lex(audience: &str, text: &str) -> Result<Vec<Lexeme>, Vec<CompileError>> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut errors = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' => {
                out.push(Lexeme { tok: Tok::Open, offset: start });
                i += 1;
            }
            ')' => {
                out.push(Lexeme { tok: Tok::Close, offset: start });
                i += 1;
            }
            ',' => {
                out.push(Lexeme { tok: Tok::Comma, offset: start });
                i += 1;
            }
            '=' => {
                out.push(Lexeme { tok: Tok::Eq, offset: start });
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                out.push(Lexeme { tok: Tok::Ne, offset: start });
                i += 2;
            }
            '\'' => {
                let mut value = String::new();
                let mut closed = false;
                i += 1;
                while i < chars.len() {
                    if chars[i] == '\'' {
                        if chars.get(i + 1) == Some(&'\'') {
                            value.push('\'');
                            i += 2;
                            continue;
                        }
                        closed = true;
                        i += 1;
                        break;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                if closed {
                    out.push(Lexeme {
                        tok: Tok::Str(value),
                        offset: start,
                    });
                } else {
                    errors.push(CompileError::new(audience, start, "unterminated string"));
                }
            }
            c if is_word_char(c) => {
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                out.push(Lexeme {
                    tok: Tok::Word(chars[start..i].iter().collect()),
                    offset: start,
                });
            }
            other => {
                errors.push(CompileError::new(audience, start, format!("unexpected character '{other}'")));
                i += 1;
            }
        }
    }

    if errors.is_empty() { Ok(out) } else { Err(errors) }
}

// ── Parser ──────────────────────────────────────────────────────

struct Parser<'a> {
    audience: &'a str,
    lexemes: Vec<Lexeme>,
    pos: usize,
    end: usize,
    depth: usize,
}

/// Rule tokens plus what is needed to pick the overall operator.
#[derive(Default)]
struct Expression {
    tokens: Vec<RuleToken>,
    connectors: Vec<BooleanOperator>,
    parenthesized: bool,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn peek_tok(&self, ahead: usize) -> Option<&Tok> {
        self.lexemes.get(self.pos + ahead).map(|l| &l.tok)
    }

    fn bump(&mut self) -> Option<Lexeme> {
        let lexeme = self.lexemes.get(self.pos).cloned();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |l| l.offset)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(self.audience, self.offset(), message)
    }

    fn at_keyword(&self, ahead: usize, keyword: &str) -> bool {
        matches!(self.peek_tok(ahead), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn comparison_op(tok: Option<&Tok>) -> Option<ComparisonOperator> {
        match tok {
            Some(Tok::Eq) => Some(ComparisonOperator::Equals),
            Some(Tok::Ne) => Some(ComparisonOperator::NotEquals),
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case("contains") => Some(ComparisonOperator::Contains),
            _ => None,
        }
    }

    /// A directive keyword that is not being used as a field name.
    fn at_directive(&self, keyword: &str) -> bool {
        self.at_keyword(0, keyword) && Self::comparison_op(self.peek_tok(1)).is_none()
    }

    fn expect_string(&mut self, what: &str) -> Result<String, CompileError> {
        match self.peek_tok(0) {
            Some(Tok::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn document(mut self) -> Result<AudienceSpec, CompileError> {
        let mut spec = AudienceSpec::new(self.audience);
        let mut directives = 0;

        loop {
            if self.at_directive("delete") {
                self.pos += 1;
                spec.should_delete = true;
            } else if self.at_directive("obsolete") {
                self.pos += 1;
                spec.is_obsolete = true;
            } else if self.at_directive("renamed") {
                self.pos += 1;
                if !self.at_keyword(0, "from") {
                    return Err(self.error("expected FROM after RENAMED"));
                }
                self.pos += 1;
                spec.previous_names.push(self.expect_string("a quoted previous name")?);
                while self.peek_tok(0) == Some(&Tok::Comma) {
                    self.pos += 1;
                    spec.previous_names.push(self.expect_string("a quoted previous name")?);
                }
            } else if self.at_directive("description") {
                self.pos += 1;
                spec.description = Some(self.expect_string("a quoted description")?);
            } else {
                break;
            }
            directives += 1;
        }

        if self.peek().is_some() {
            let mut expr = Expression::default();
            self.expression(&mut expr)?;
            if self.peek().is_some() {
                return Err(self.error("unexpected input after rule expression"));
            }
            let all_or = !expr.connectors.is_empty() && expr.connectors.iter().all(|op| *op == BooleanOperator::Or);
            spec.boolean_operator = if all_or && !expr.parenthesized {
                BooleanOperator::Or
            } else {
                BooleanOperator::And
            };
            spec.rules = expr.tokens;
        } else if directives == 0 {
            return Err(CompileError::new(self.audience, 0, "rule text is empty"));
        }

        Ok(spec)
    }

    fn expression(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        self.term(expr)?;
        loop {
            let op = if self.at_keyword(0, "and") {
                BooleanOperator::And
            } else if self.at_keyword(0, "or") {
                BooleanOperator::Or
            } else {
                return Ok(());
            };
            self.pos += 1;
            expr.tokens.push(RuleToken::connector(op));
            expr.connectors.push(op);
            self.term(expr)?;
        }
    }

    fn term(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        if self.peek_tok(0) == Some(&Tok::Open) {
            if self.depth == MAX_NESTING {
                return Err(self.error(format!("parentheses nested deeper than {MAX_NESTING}")));
            }
            self.pos += 1;
            self.depth += 1;
            expr.parenthesized = true;
            expr.tokens.push(RuleToken::Open);
            self.expression(expr)?;
            if self.peek_tok(0) != Some(&Tok::Close) {
                return Err(self.error("expected ')'"));
            }
            self.pos += 1;
            self.depth -= 1;
            expr.tokens.push(RuleToken::Close);
            return Ok(());
        }
        self.comparison(expr)
    }

    fn comparison(&mut self, expr: &mut Expression) -> Result<(), CompileError> {
        let field = match self.peek_tok(0) {
            Some(Tok::Str(s) | Tok::Word(s)) => s.clone(),
            _ => return Err(self.error("expected a field name or '('")),
        };
        self.bump();
        let op = Self::comparison_op(self.peek_tok(0)).ok_or_else(|| self.error("expected '=', '<>' or CONTAINS"))?;
        self.bump();
        let value = self.expect_string("a quoted value")?;
        expr.tokens.push(RuleToken::Comparison(Rule::new(field, op, value)));
        Ok(())
    }
}
