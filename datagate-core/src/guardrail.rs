//! SQL guardrail: validation and row-limit rewriting of candidate SQL.
//!
//! The guardrail sits in front of every guarded execution. It accepts only a
//! single read-only `SELECT`/`WITH` statement whose `FROM`/`JOIN` targets are
//! all in the source's allowlist, and rewrites accepted SQL to carry a row
//! limit.
//!
//! This is a pattern check, not a SQL parser. Table references are found by
//! scanning the token following each `FROM`/`JOIN` (and comma-separated
//! `FROM` lists); references hidden in engine-specific syntax elsewhere are
//! not seen. It is layered on top of read-only connections, never instead of
//! them.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. trailing semicolons and whitespace are stripped
//! 2. the statement must begin with `SELECT` or `WITH`
//! 3. no `;` may remain
//! 4. no forbidden keyword may appear as a whole word
//! 5. every table token must be allowlisted

use crate::error::DataGateError;
use crate::models::Dialect;
use crate::tables::AllowList;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

/// DML, DDL, session, and administrative verbs never allowed in a query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "call", "execute", "copy", "vacuum", "analyze", "reset", "set", "show", "explain", "listen",
    "unlisten", "notify",
];

/// Pre-compiled guardrail patterns.
struct GuardrailPatterns {
    leading_verb: Regex,
    forbidden: Regex,
    limit: Regex,
}

static PATTERNS: LazyLock<GuardrailPatterns> = LazyLock::new(GuardrailPatterns::compile);

impl GuardrailPatterns {
    fn instance() -> &'static Self {
        &PATTERNS
    }

    // Patterns are literals
    #[allow(clippy::expect_used)]
    fn compile() -> Self {
        let forbidden = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
        Self {
            leading_verb: Regex::new(r"(?i)^(select|with)\b").expect("Invalid leading verb pattern"),
            forbidden: Regex::new(&forbidden).expect("Invalid forbidden keyword pattern"),
            limit: Regex::new(r"(?i)\blimit\b").expect("Invalid limit pattern"),
        }
    }
}

/// Validator and rewriter bound to one dialect's naming rules.
///
/// # Example
/// ```rust
/// use datagate_core::Guardrail;
///
/// let guardrail = Guardrail::new(Some("public"), 100);
/// let allowed = vec!["public.orders".to_string()];
///
/// let sql = guardrail.prepare("SELECT * FROM orders;", &allowed).unwrap();
/// assert_eq!(sql, "SELECT * FROM orders LIMIT 100");
///
/// let err = guardrail.prepare("SELECT * FROM users", &allowed).unwrap_err();
/// assert_eq!(err.to_string(), "Table not allowed: users");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guardrail {
    default_schema: Option<String>,
    max_rows: usize,
    lexers: &'static [LexRules],
}

impl Guardrail {
    /// Guardrail for an unknown dialect.
    ///
    /// SQL is read under every supported dialect's quoting and comment rules;
    /// a table hidden under any reading is still checked, and text that is
    /// malformed under some reading is rejected.
    pub fn new(default_schema: Option<&str>, max_rows: usize) -> Self {
        Self {
            default_schema: default_schema.map(str::to_string),
            max_rows,
            lexers: LexRules::ALL,
        }
    }

    /// Guardrail using the dialect's default schema for bare table names and
    /// its own quoting and comment rules.
    pub fn for_dialect(dialect: Dialect, max_rows: usize) -> Self {
        Self {
            lexers: LexRules::for_dialect(dialect),
            ..Self::new(dialect.default_schema(), max_rows)
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Validates `sql` against `allowed_tables`.
    ///
    /// # Errors
    /// Returns [`DataGateError::GuardrailRejection`] naming the first failed
    /// check.
    pub fn validate(&self, sql: &str, allowed_tables: &[String]) -> crate::Result<()> {
        let allow = AllowList::new(allowed_tables, self.default_schema.as_deref());
        check(sql, &allow, self.lexers).map_err(|reason| {
            warn!(%reason, "Guardrail rejected query");
            DataGateError::rejected(reason)
        })
    }

    /// Validates `sql` and returns it rewritten with this guardrail's row limit.
    ///
    /// # Errors
    /// Same as [`Guardrail::validate`].
    pub fn prepare(&self, sql: &str, allowed_tables: &[String]) -> crate::Result<String> {
        self.validate(sql, allowed_tables)?;
        Ok(enforce_limit(sql, self.max_rows))
    }
}

/// Validates `sql` with Postgres-style resolution of bare table names.
///
/// # Errors
/// Returns [`DataGateError::GuardrailRejection`] with the reason.
pub fn validate_sql(sql: &str, allowed_tables: &[String]) -> crate::Result<()> {
    Guardrail::new(Some("public"), usize::MAX).validate(sql, allowed_tables)
}

/// Appends `LIMIT max_rows` unless a whole-word `LIMIT` is already present.
///
/// Idempotent: applying it twice yields the same SQL as applying it once.
pub fn enforce_limit(sql: &str, max_rows: usize) -> String {
    let body = strip_terminators(sql);
    if GuardrailPatterns::instance().limit.is_match(body) {
        return body.to_string();
    }
    // A trailing line comment would swallow a same-line LIMIT
    let separator = match body.rsplit('\n').next() {
        Some(last_line) if last_line.contains("--") => "\n",
        _ => " ",
    };
    format!("{}{}LIMIT {}", body, separator, max_rows)
}

fn strip_terminators(sql: &str) -> &str {
    sql.trim_start()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

fn check(sql: &str, allow: &AllowList, lexers: &[LexRules]) -> Result<(), String> {
    let patterns = GuardrailPatterns::instance();
    let body = strip_terminators(sql);

    if !patterns.leading_verb.is_match(body) {
        return Err("Only SELECT queries are allowed".to_string());
    }

    if body.contains(';') {
        return Err("Multiple statements are not allowed".to_string());
    }

    if let Some(found) = patterns.forbidden.find(body) {
        return Err(format!(
            "Forbidden keyword: {}",
            found.as_str().to_lowercase()
        ));
    }

    // A table found under any reading is reported ahead of malformed text
    let mut malformed = None;
    for &rules in lexers {
        let tokens = match tokenize(body, rules) {
            Ok(tokens) => tokens,
            Err(reason) => {
                malformed.get_or_insert(reason);
                continue;
            }
        };
        let local_names = cte_names(body, &tokens);
        for table in table_references(body, &tokens) {
            let is_cte =
                !table.name.contains('.') && local_names.contains(&table.name.to_lowercase());
            if !is_cte && !allow.contains(&table.name) {
                return Err(format!("Table not allowed: {}", table.raw));
            }
        }
    }

    malformed.map_or(Ok(()), Err)
}

/// Table references of `sql` as the guardrail sees them.
///
/// Returns the union over all lexing rules, in order of first appearance.
/// Readings under which `sql` is malformed contribute nothing.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let body = strip_terminators(sql);
    let mut seen = HashSet::new();
    let mut tables = Vec::new();
    for &rules in LexRules::ALL {
        let Ok(tokens) = tokenize(body, rules) else {
            continue;
        };
        for table in table_references(body, &tokens) {
            if seen.insert(table.raw.clone()) {
                tables.push(table.raw);
            }
        }
    }
    tables
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableRef {
    /// Text as written, quotes included
    raw: String,
    /// Unquoted segments joined by `.`
    name: String,
}

/// Quoting and comment conventions of one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LexRules {
    /// `\` escapes the next character inside `'` strings
    backslash_escapes: bool,
    /// `\` escapes the next character inside `"` text
    backslash_in_double_quotes: bool,
    /// `--` needs trailing whitespace, `#` starts a line comment, and `/*!`
    /// bodies are executable
    mysql_comments: bool,
    /// `$tag$` strings, `E'..'` escape strings, and nested block comments
    postgres_literals: bool,
    /// `[name]` is a quoted identifier
    bracket_identifiers: bool,
}

impl LexRules {
    const POSTGRES: Self = Self {
        backslash_escapes: false,
        backslash_in_double_quotes: false,
        mysql_comments: false,
        postgres_literals: true,
        bracket_identifiers: false,
    };
    const SQLITE: Self = Self {
        backslash_escapes: false,
        backslash_in_double_quotes: false,
        mysql_comments: false,
        postgres_literals: false,
        bracket_identifiers: true,
    };
    /// Default `sql_mode`: `"` delimits a string
    const MYSQL: Self = Self {
        backslash_escapes: true,
        backslash_in_double_quotes: true,
        mysql_comments: true,
        postgres_literals: false,
        bracket_identifiers: false,
    };
    /// `ANSI_QUOTES`: `"` delimits an identifier
    const MYSQL_ANSI: Self = Self {
        backslash_in_double_quotes: false,
        ..Self::MYSQL
    };

    const ALL: &'static [Self] = &[Self::POSTGRES, Self::SQLITE, Self::MYSQL, Self::MYSQL_ANSI];

    fn for_dialect(dialect: Dialect) -> &'static [Self] {
        match dialect {
            Dialect::PostgreSql => &[Self::POSTGRES],
            // The server's sql_mode is not known here
            Dialect::MySql => &[Self::MYSQL, Self::MYSQL_ANSI],
            Dialect::Sqlite => &[Self::SQLITE],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted(String),
    Dot,
    Comma,
    Open,
    Close,
    Other,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

impl Token {
    fn text<'a>(&self, sql: &'a str) -> &'a str {
        &sql[self.start..self.end]
    }

    fn is_word(&self, sql: &str, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text(sql).eq_ignore_ascii_case(word)
    }

    fn is_any_word(&self, sql: &str, words: &[&str]) -> bool {
        words.iter().any(|w| self.is_word(sql, w))
    }

    fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::Quoted(_))
    }

    /// Identifier value: unescaped for quoted names, as written otherwise.
    fn name(&self, sql: &str) -> String {
        match &self.kind {
            TokenKind::Quoted(name) => name.clone(),
            _ => self.text(sql).to_string(),
        }
    }
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn malformed(what: &str) -> String {
    format!("Malformed SQL: unterminated {}", what)
}

/// Lexes just enough SQL to find identifiers: comments and string literals
/// are skipped, quoted identifiers are unescaped.
///
/// Returns the rejection reason if a quote or comment is left open.
fn tokenize(sql: &str, rules: LexRules) -> Result<Vec<Token>, String> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '-' if starts_line_comment(sql, start, rules) => {
                skip_line(&mut chars);
                continue;
            }
            '#' if rules.mysql_comments => {
                skip_line(&mut chars);
                continue;
            }
            '/' if chars.peek().is_some_and(|&(_, n)| n == '*') => {
                chars.next();
                if rules.mysql_comments && chars.peek().is_some_and(|&(_, n)| n == '!') {
                    chars.next();
                    continue;
                }
                skip_block_comment(&mut chars, rules.postgres_literals)?;
                continue;
            }
            '\'' => {
                // E'..' accepts backslash escapes even with standard strings on
                let escape_string = rules.postgres_literals
                    && tokens.last().is_some_and(|t| {
                        t.end == start && t.kind == TokenKind::Word && t.text(sql).eq_ignore_ascii_case("e")
                    });
                consume_quoted(&mut chars, '\'', rules.backslash_escapes || escape_string)
                    .ok_or_else(|| malformed("string literal"))?;
                continue;
            }
            '$' if rules.postgres_literals => match dollar_tag(&sql[start..]) {
                Some(tag) => {
                    skip_dollar_quoted(sql, start, tag, &mut chars)?;
                    continue;
                }
                None => {
                    consume_word(&mut chars, false);
                    TokenKind::Word
                }
            },
            '"' => TokenKind::Quoted(
                consume_quoted(&mut chars, '"', rules.backslash_in_double_quotes)
                    .ok_or_else(|| malformed("quoted identifier"))?,
            ),
            '`' => TokenKind::Quoted(
                consume_quoted(&mut chars, '`', false)
                    .ok_or_else(|| malformed("quoted identifier"))?,
            ),
            '[' if rules.bracket_identifiers => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == ']' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(malformed("quoted identifier"));
                }
                TokenKind::Quoted(name)
            }
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '(' => TokenKind::Open,
            ')' => TokenKind::Close,
            c if is_word_char(c) => {
                // Postgres ends a number at `$`, which may open a dollar quote
                let allow_dollar = !(rules.postgres_literals && c.is_ascii_digit());
                consume_word(&mut chars, allow_dollar);
                TokenKind::Word
            }
            _ => TokenKind::Other,
        };
        let end = chars.peek().map_or(sql.len(), |&(i, _)| i);
        tokens.push(Token { kind, start, end });
    }

    Ok(tokens)
}

fn consume_word(chars: &mut Chars<'_>, allow_dollar: bool) {
    while chars
        .peek()
        .is_some_and(|&(_, n)| is_word_char(n) && (allow_dollar || n != '$'))
    {
        chars.next();
    }
}

fn skip_line(chars: &mut Chars<'_>) {
    for (_, n) in chars.by_ref() {
        if n == '\n' {
            break;
        }
    }
}

fn starts_line_comment(sql: &str, at: usize, rules: LexRules) -> bool {
    let rest = &sql[at..];
    if !rest.starts_with("--") {
        return false;
    }
    if !rules.mysql_comments {
        return true;
    }
    rest[2..].chars().next().is_none_or(char::is_whitespace)
}

fn skip_block_comment(chars: &mut Chars<'_>, nested: bool) -> Result<(), String> {
    let mut depth = 1usize;
    let mut prev = '\0';
    for (_, n) in chars.by_ref() {
        if prev == '*' && n == '/' {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Ok(());
            }
            prev = '\0';
            continue;
        }
        if nested && prev == '/' && n == '*' {
            depth = depth.saturating_add(1);
            prev = '\0';
            continue;
        }
        prev = n;
    }
    Err(malformed("block comment"))
}

/// The `$tag$` opening a dollar-quoted string at the start of `rest`, if any.
///
/// The tag may be empty (`$$`); otherwise it is an identifier without `$`.
fn dollar_tag(rest: &str) -> Option<&str> {
    let body = rest.strip_prefix('$')?;
    let close = body.find('$')?;
    let tag = &body[..close];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_alphabetic() || (i > 0 && c.is_ascii_digit()));
    valid.then(|| &rest[..close.saturating_add(2)])
}

/// Skips the dollar-quoted string opened by `tag` at `start`.
fn skip_dollar_quoted(
    sql: &str,
    start: usize,
    tag: &str,
    chars: &mut Chars<'_>,
) -> Result<(), String> {
    let body_start = start.saturating_add(tag.len());
    let close = sql[body_start..]
        .find(tag)
        .ok_or_else(|| malformed("dollar-quoted string"))?;
    let end = body_start.saturating_add(close).saturating_add(tag.len());
    while chars.peek().is_some_and(|&(i, _)| i < end) {
        chars.next();
    }
    Ok(())
}

/// Consumes up to the closing `quote`; a doubled quote is an escaped quote.
///
/// Returns `None` if the input ends first.
fn consume_quoted(chars: &mut Chars<'_>, quote: char, backslash_escapes: bool) -> Option<String> {
    let mut value = String::new();
    while let Some((_, c)) = chars.next() {
        if backslash_escapes && c == '\\' {
            value.push(chars.next()?.1);
            continue;
        }
        if c == quote {
            if chars.peek().is_some_and(|&(_, n)| n == quote) {
                chars.next();
                value.push(quote);
                continue;
            }
            return Some(value);
        }
        value.push(c);
    }
    None
}

/// Index just past the `)` matching the `(` at `open`.
fn skip_parens(tokens: &[Token], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Open => depth = depth.saturating_add(1),
            TokenKind::Close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i.saturating_add(1);
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

/// Names defined by a leading `WITH` clause.
fn cte_names(sql: &str, tokens: &[Token]) -> HashSet<String> {
    let mut names = HashSet::new();
    if !tokens.first().is_some_and(|t| t.is_word(sql, "with")) {
        return names;
    }

    let mut i = 1;
    if tokens.get(i).is_some_and(|t| t.is_word(sql, "recursive")) {
        i = i.saturating_add(1);
    }
    while let Some(token) = tokens.get(i).filter(|t| t.is_name()) {
        names.insert(token.name(sql).to_lowercase());
        i = i.saturating_add(1);
        if tokens.get(i).is_some_and(|t| t.kind == TokenKind::Open) {
            i = skip_parens(tokens, i);
        }
        if !tokens.get(i).is_some_and(|t| t.is_word(sql, "as")) {
            break;
        }
        i = i.saturating_add(1);
        if tokens.get(i).is_some_and(|t| t.is_word(sql, "not")) {
            i = i.saturating_add(1);
        }
        if tokens.get(i).is_some_and(|t| t.is_word(sql, "materialized")) {
            i = i.saturating_add(1);
        }
        if !tokens.get(i).is_some_and(|t| t.kind == TokenKind::Open) {
            break;
        }
        i = skip_parens(tokens, i);
        if !tokens.get(i).is_some_and(|t| t.kind == TokenKind::Comma) {
            break;
        }
        i = i.saturating_add(1);
    }

    names
}

/// Words that end a table expression rather than alias it.
const CLAUSE_WORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "natural", "on", "using", "group",
    "order", "having", "limit", "offset", "union", "intersect", "except", "window", "fetch", "for",
    "straight_join", "tablesample",
];

/// Keywords that may sit between `FROM`/`JOIN` and the table.
const TABLE_MODIFIERS: &[&str] = &["lateral", "only"];

/// Table references after every `FROM`/`JOIN`, in order of appearance.
fn table_references(sql: &str, tokens: &[Token]) -> Vec<TableRef> {
    let mut refs = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let is_from = token.is_word(sql, "from");
        if !is_from && !token.is_word(sql, "join") {
            continue;
        }
        if is_from && is_expression_from(sql, tokens, i) {
            continue;
        }

        let mut pos = i.saturating_add(1);
        loop {
            while tokens.get(pos).is_some_and(|t| t.is_any_word(sql, TABLE_MODIFIERS)) {
                pos = pos.saturating_add(1);
            }
            let Some(next) = tokens.get(pos) else {
                break;
            };
            match next.kind {
                TokenKind::Open => {
                    let mut inner = pos;
                    while tokens.get(inner).is_some_and(|t| t.kind == TokenKind::Open) {
                        inner = inner.saturating_add(1);
                    }
                    // Subqueries are scanned on their own FROM/JOIN; a
                    // parenthesized join starts with a table.
                    if tokens
                        .get(inner)
                        .is_none_or(|t| t.is_any_word(sql, &["select", "with", "values"]))
                    {
                        break;
                    }
                    pos = inner;
                    continue;
                }
                TokenKind::Word | TokenKind::Quoted(_) => {
                    let (table, after) = qualified_name(sql, tokens, pos);
                    refs.push(table);
                    pos = after;
                }
                _ => {
                    refs.push(TableRef {
                        raw: next.text(sql).to_string(),
                        name: String::new(),
                    });
                    break;
                }
            }

            if !is_from {
                break;
            }
            pos = skip_alias(sql, tokens, pos);
            if tokens.get(pos).is_some_and(|t| t.kind == TokenKind::Comma) {
                pos = pos.saturating_add(1);
            } else {
                break;
            }
        }
    }

    refs
}

/// True for `FROM` inside `EXTRACT(.. FROM x)`-style calls and `IS DISTINCT FROM`.
fn is_expression_from(sql: &str, tokens: &[Token], at: usize) -> bool {
    let prev = at.checked_sub(1).and_then(|i| tokens.get(i));
    let before_prev = at.checked_sub(2).and_then(|i| tokens.get(i));
    if prev.is_some_and(|t| t.is_word(sql, "distinct"))
        && before_prev.is_some_and(|t| t.is_any_word(sql, &["is", "not"]))
    {
        return true;
    }

    let mut depth = 0usize;
    for j in (0..at).rev() {
        match tokens[j].kind {
            TokenKind::Close => depth = depth.saturating_add(1),
            TokenKind::Open if depth == 0 => {
                return j.checked_sub(1).and_then(|k| tokens.get(k)).is_some_and(|t| {
                    t.is_any_word(sql, &["extract", "substring", "trim", "overlay", "position"])
                });
            }
            TokenKind::Open => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    false
}

/// Reads `segment(.segment)*` starting at `start`.
fn qualified_name(sql: &str, tokens: &[Token], start: usize) -> (TableRef, usize) {
    let first = &tokens[start];
    let mut segments = vec![first.name(sql)];
    let mut last = start;
    while tokens.get(last.saturating_add(1)).is_some_and(|t| t.kind == TokenKind::Dot)
        && tokens.get(last.saturating_add(2)).is_some_and(Token::is_name)
    {
        segments.push(tokens[last.saturating_add(2)].name(sql));
        last = last.saturating_add(2);
    }

    let table = TableRef {
        raw: sql[first.start..tokens[last].end].to_string(),
        name: segments.join("."),
    };
    (table, last.saturating_add(1))
}

/// Skips `[AS] alias [(columns)]` after a table.
fn skip_alias(sql: &str, tokens: &[Token], mut pos: usize) -> usize {
    if tokens.get(pos).is_some_and(|t| t.is_word(sql, "as")) {
        pos = pos.saturating_add(1);
    }
    if tokens
        .get(pos)
        .is_some_and(|t| t.is_name() && !t.is_any_word(sql, CLAUSE_WORDS))
    {
        pos = pos.saturating_add(1);
        if tokens.get(pos).is_some_and(|t| t.kind == TokenKind::Open) {
            pos = skip_parens(tokens, pos);
        }
    }
    pos
}
