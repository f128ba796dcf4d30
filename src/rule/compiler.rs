//! Parses the surface form of rules files (§4.1, §6 "Rules files") into
//! compiled [`Rule`] records, installing each into a [`RuleRegistry`].
//!
//! Grammar (§4.1):
//! ```text
//! rule [<name>] [in { <patterns> }] [out { <names> }]
//!      (if <expr> | when <stmt> | always)* [then] <body>
//! using { in {…} out {…} if {…} } define { <rules> }
//! metric <name> { ... }   # no-op
//! ```
//!
//! The header portion (keywords, `in`/`out`/`if` argument lists) is scanned
//! with a small brace-balancing cursor of our own rather than routing
//! through [`super::lang::Lexer`], since bodies and map tables can contain a
//! literal `#` (e.g. `{#f00}`) that the expression lexer would otherwise
//! treat as a line comment. Once a body's brace group has been carved out
//! as raw text, it's handed to [`super::lang::ExprParser`] to become
//! statements or an expression.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::lang::ExprParser;
use super::registry::RuleRegistry;
use super::{Body, Condition, Rule, RuleId, RuleKind, UsingFrame, UsingStack};
use crate::errors::{EngineError, LocationSuffix};
use crate::tag_store::TagName;

/// A dotted tag name (`foo.bar`), optionally ending in a `.*` glob suffix
/// when used as an input pattern (§4.1).
static TAG_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*(\.\*)?$").unwrap());

fn parse_tag_names(file: &Path, line: usize, group: &str) -> Result<Vec<TagName>, EngineError> {
    split_words(group)
        .into_iter()
        .map(|word| {
            if TAG_NAME_PATTERN.is_match(&word) {
                Ok(TagName::new(word))
            } else {
                Err(syntax_err(file, line, &format!("'{word}' is not a valid tag name")))
            }
        })
        .collect()
}

/// Assigns rule ids unique within one run (shared across every rules file
/// loaded into a single [`RuleRegistry`]).
#[derive(Default)]
pub struct RuleIdAllocator(u32);

impl RuleIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> RuleId {
        let id = RuleId(self.0);
        self.0 += 1;
        id
    }
}

const KEYWORDS: &[&str] = &["in", "out", "if", "when", "always", "then", "claim", "map"];

pub fn compile_source(
    file: &Path,
    source: &str,
    ids: &mut RuleIdAllocator,
    registry: &mut RuleRegistry,
) -> Result<(), EngineError> {
    let mut cursor = Cursor::new(source);
    let mut using_stack = UsingStack::new();
    parse_declarations(file, &mut cursor, ids, registry, &mut using_stack)
}

fn parse_declarations(
    file: &Path,
    cursor: &mut Cursor,
    ids: &mut RuleIdAllocator,
    registry: &mut RuleRegistry,
    using_stack: &mut UsingStack,
) -> Result<(), EngineError> {
    loop {
        cursor.skip_ws_and_comments();
        if cursor.at_eof() {
            return Ok(());
        }
        let line = cursor.line();
        let keyword = cursor.read_ident().ok_or_else(|| syntax_err(file, line, "expected a declaration keyword"))?;
        match keyword.as_str() {
            "rule" => parse_rule(file, cursor, ids, registry, using_stack, line)?,
            "using" => parse_using(file, cursor, ids, registry, using_stack)?,
            "metric" => parse_metric(file, cursor, line)?,
            other => return Err(syntax_err(file, line, &format!("unexpected declaration '{other}'"))),
        }
    }
}

fn parse_metric(file: &Path, cursor: &mut Cursor, line: usize) -> Result<(), EngineError> {
    cursor.skip_ws_and_comments();
    // Optional name before the no-op body.
    if cursor.peek() != Some('{') {
        cursor.read_ident().ok_or_else(|| syntax_err(file, line, "expected metric name or body"))?;
        cursor.skip_ws_and_comments();
    }
    cursor
        .read_brace_group()
        .ok_or_else(|| syntax_err(file, line, "expected metric body"))?;
    Ok(())
}

fn parse_using(
    file: &Path,
    cursor: &mut Cursor,
    ids: &mut RuleIdAllocator,
    registry: &mut RuleRegistry,
    using_stack: &mut UsingStack,
) -> Result<(), EngineError> {
    let line = cursor.line();
    cursor.skip_ws_and_comments();
    let header = cursor
        .read_brace_group()
        .ok_or_else(|| syntax_err(file, line, "expected 'using { ... }' header"))?;
    let frame = parse_using_header(file, &header, line)?;

    cursor.skip_ws_and_comments();
    let define_kw = cursor
        .read_ident()
        .ok_or_else(|| syntax_err(file, line, "expected 'define' after 'using { ... }'"))?;
    if define_kw != "define" {
        return Err(syntax_err(file, line, "expected 'define' after 'using { ... }'"));
    }
    cursor.skip_ws_and_comments();
    let body = cursor
        .read_brace_group()
        .ok_or_else(|| syntax_err(file, line, "expected 'define { ... }' body"))?;

    using_stack.push(frame);
    let mut inner = Cursor::new(&body);
    let result = parse_declarations(file, &mut inner, ids, registry, using_stack);
    using_stack.pop();
    result
}

fn parse_using_header(file: &Path, header: &str, line: usize) -> Result<UsingFrame, EngineError> {
    let mut cursor = Cursor::new(header);
    let mut frame = UsingFrame::default();
    loop {
        cursor.skip_ws_and_comments();
        if cursor.at_eof() {
            break;
        }
        let kw = cursor
            .read_ident()
            .ok_or_else(|| syntax_err(file, line, "expected 'in'/'out'/'if' inside using header"))?;
        cursor.skip_ws_and_comments();
        let group = cursor
            .read_brace_group()
            .ok_or_else(|| syntax_err(file, line, &format!("expected '{{ ... }}' after '{kw}'")))?;
        match kw.as_str() {
            "in" => frame.inputs.extend(parse_tag_names(file, line, &group)?),
            "out" => frame.outputs.extend(parse_tag_names(file, line, &group)?),
            "if" => frame.conditions.push(Condition::If {
                expr: ExprParser::parse_expr_source(&group)
                    .map_err(|e| syntax_err(file, line, &format!("bad 'if' expression: {e}")))?,
                source: group.trim().to_string(),
            }),
            other => return Err(syntax_err(file, line, &format!("unexpected using-header clause '{other}'"))),
        }
    }
    Ok(frame)
}

fn parse_rule(
    file: &Path,
    cursor: &mut Cursor,
    ids: &mut RuleIdAllocator,
    registry: &mut RuleRegistry,
    using_stack: &UsingStack,
    start_line: usize,
) -> Result<(), EngineError> {
    cursor.skip_ws_and_comments();

    let mut name = String::new();
    if let Some(peeked) = cursor.peek_ident() {
        if !KEYWORDS.contains(&peeked.as_str()) && peeked != "claim" && peeked != "map" {
            name = cursor.read_ident().unwrap();
            cursor.skip_ws_and_comments();
        }
    }

    let mut inputs: Vec<TagName> = Vec::new();
    let mut outputs: Vec<TagName> = Vec::new();
    let mut conditions: Vec<Condition> = Vec::new();
    let mut seen_out = false;

    loop {
        cursor.skip_ws_and_comments();
        let Some(kw) = cursor.peek_ident() else { break };
        match kw.as_str() {
            "in" => {
                if seen_out {
                    return Err(syntax_err(file, start_line, "'in' clause may not follow 'out'"));
                }
                cursor.read_ident();
                cursor.skip_ws_and_comments();
                let group = cursor
                    .read_brace_group()
                    .ok_or_else(|| syntax_err(file, start_line, "expected '{ ... }' after 'in'"))?;
                inputs.extend(parse_tag_names(file, start_line, &group)?);
            }
            "out" => {
                cursor.read_ident();
                cursor.skip_ws_and_comments();
                let group = cursor
                    .read_brace_group()
                    .ok_or_else(|| syntax_err(file, start_line, "expected '{ ... }' after 'out'"))?;
                let names: Vec<TagName> = parse_tag_names(file, start_line, &group)?;
                if names.iter().any(TagName::is_glob) {
                    return Err(syntax_err(file, start_line, "'out' names may not be globs"));
                }
                outputs.extend(names);
                seen_out = true;
            }
            "if" => {
                cursor.read_ident();
                cursor.skip_ws_and_comments();
                let group = cursor
                    .read_brace_group()
                    .ok_or_else(|| syntax_err(file, start_line, "expected '{ ... }' after 'if'"))?;
                let expr = ExprParser::parse_expr_source(&group)
                    .map_err(|e| syntax_err(file, start_line, &format!("bad 'if' expression: {e}")))?;
                conditions.push(Condition::If {
                    expr,
                    source: group.trim().to_string(),
                });
            }
            "when" => {
                cursor.read_ident();
                cursor.skip_ws_and_comments();
                let group = cursor
                    .read_brace_group()
                    .ok_or_else(|| syntax_err(file, start_line, "expected '{ ... }' after 'when'"))?;
                let mut stmts = ExprParser::parse_block_source(&group)
                    .map_err(|e| syntax_err(file, start_line, &format!("bad 'when' statement: {e}")))?;
                let stmt = if stmts.len() == 1 {
                    stmts.pop().unwrap()
                } else {
                    return Err(syntax_err(file, start_line, "'when' expects exactly one statement"));
                };
                conditions.push(Condition::When {
                    stmt,
                    source: group.trim().to_string(),
                });
            }
            "always" => {
                cursor.read_ident();
            }
            "then" => {
                cursor.read_ident();
                break;
            }
            _ => break,
        }
    }

    cursor.skip_ws_and_comments();
    let (kind, body) = parse_body(file, cursor, start_line)?;

    let prefix = using_stack.effective_prefix();
    let mut all_inputs = prefix.inputs;
    all_inputs.extend(inputs);
    let mut all_outputs = prefix.outputs;
    all_outputs.extend(outputs);
    let mut all_conditions = prefix.conditions;
    all_conditions.extend(conditions);

    if matches!(kind, RuleKind::Claim) && !all_outputs.is_empty() {
        return Err(syntax_err(file, start_line, "a claim rule may not declare 'out' tags"));
    }

    let id = ids.next();
    registry.add_rule(Rule {
        id,
        name,
        source_file: file.to_path_buf(),
        inputs: super::dedup_preserve_order(all_inputs),
        outputs: super::dedup_preserve_order(all_outputs),
        conditions: all_conditions,
        kind,
        body,
    })?;
    Ok(())
}

fn parse_body(file: &Path, cursor: &mut Cursor, line: usize) -> Result<(RuleKind, Body), EngineError> {
    if let Some(kw) = cursor.peek_ident() {
        match kw.as_str() {
            "claim" => {
                cursor.read_ident();
                cursor.skip_ws_and_comments();
                let group = cursor
                    .read_brace_group()
                    .ok_or_else(|| syntax_err(file, line, "expected '{ ... }' after 'claim'"))?;
                let expr = ExprParser::parse_expr_source(&group)
                    .map_err(|e| syntax_err(file, line, &format!("bad claim expression: {e}")))?;
                return Ok((
                    RuleKind::Claim,
                    Body::Claim {
                        expr,
                        source: group.trim().to_string(),
                    },
                ));
            }
            "map" => {
                cursor.read_ident();
                cursor.skip_ws_and_comments();
                let group = cursor
                    .read_brace_group()
                    .ok_or_else(|| syntax_err(file, line, "expected '{ ... }' after 'map'"))?;
                let table = parse_map_table(file, &group, line)?;
                return Ok((RuleKind::Map, Body::Map(table)));
            }
            _ => {}
        }
    }
    let group = cursor
        .read_brace_group()
        .ok_or_else(|| syntax_err(file, line, "expected a rule body"))?;
    if let Some(bad_line) = nested_rule_declaration_line(&group) {
        return Err(syntax_err(
            file,
            line + bad_line,
            "rule bodies may not conditionally define other rules",
        ));
    }
    let stmts = ExprParser::parse_block_source(&group)
        .map_err(|e| syntax_err(file, line, &format!("bad rule body: {e}")))?;
    Ok((RuleKind::Default, Body::Block(stmts)))
}

fn parse_map_table(file: &Path, body: &str, line: usize) -> Result<Vec<(Vec<String>, Vec<String>)>, EngineError> {
    let mut cursor = Cursor::new(body);
    let mut groups = Vec::new();
    loop {
        cursor.skip_ws_and_comments();
        if cursor.at_eof() {
            break;
        }
        let group = cursor
            .read_brace_group()
            .ok_or_else(|| syntax_err(file, line, "expected '{ ... }' tuple in map table"))?;
        groups.push(split_words(&group));
    }
    if groups.len() % 2 != 0 {
        return Err(syntax_err(file, line, "map table has an unmatched tuple"));
    }
    Ok(groups.chunks(2).map(|pair| (pair[0].clone(), pair[1].clone())).collect())
}

/// First line (1-based, relative to the slice start) whose trimmed text
/// starts with `rule` followed by whitespace or end of input — the §4.2/§9
/// lexical check that forbids conditionally defining rules inside a body.
fn nested_rule_declaration_line(body: &str) -> Option<usize> {
    for (idx, raw_line) in body.lines().enumerate() {
        let trimmed = raw_line.trim_start();
        if trimmed == "rule" || trimmed.starts_with("rule ") || trimmed.starts_with("rule\t") {
            return Some(idx + 1);
        }
    }
    None
}

fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn syntax_err(file: &Path, line: usize, message: &str) -> EngineError {
    EngineError::SyntaxError {
        file: file.to_path_buf(),
        at: LocationSuffix(Some(line)),
        message: message.to_string(),
    }
}

/// A brace-balancing, comment-aware cursor over raw rules-file text. Not a
/// general tokenizer: it only knows how to skip whitespace/`#`-comments,
/// read bare identifiers, and carve out a balanced `{ ... }` span verbatim
/// (so a map table's `{#f00}` survives intact for [`super::lang`] to never
/// see, and a default body's statement text is handed to
/// [`super::lang::ExprParser`] unmodified).
struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn line(&self) -> usize {
        1 + self.src[..self.pos].matches('\n').count()
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            while let Some(c) = self.peek() {
                if c.is_whitespace() {
                    self.pos += c.len_utf8();
                } else {
                    break;
                }
            }
            if self.peek() == Some('#') {
                while let Some(c) = self.peek() {
                    self.pos += c.len_utf8();
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }
            break;
        }
    }

    fn peek_ident(&self) -> Option<String> {
        let mut chars = self.src[self.pos..].chars();
        let mut s = String::new();
        match chars.next() {
            Some(c) if c.is_alphabetic() || c == '_' => s.push(c),
            _ => return None,
        }
        for c in chars {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
            } else {
                break;
            }
        }
        Some(s)
    }

    fn read_ident(&mut self) -> Option<String> {
        let ident = self.peek_ident()?;
        self.pos += ident.len();
        Some(ident)
    }

    /// Reads a balanced `{ ... }` group starting at the current position
    /// (which must be `{`), returning the inner text with the outer braces
    /// stripped.
    fn read_brace_group(&mut self) -> Option<String> {
        if self.peek() != Some('{') {
            return None;
        }
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            let c = self.peek()?;
            self.pos += c.len_utf8();
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(self.src[start + 1..self.pos - 1].to_string());
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        let mut ids = RuleIdAllocator::new();
        compile_source(Path::new("#test"), src, &mut ids, &mut registry).unwrap();
        registry
    }

    #[test]
    fn simple_default_rule_with_using_prefix() {
        let registry = compile(
            r#"
            using { in {x} } define {
                rule out {y} always { set y [expr {$x + 1}] }
            }
            "#,
        );
        let rules: Vec<_> = registry.all_rules().collect();
        assert_eq!(rules.len(), 1);
        let rule = rules[0];
        assert_eq!(rule.inputs, vec![TagName::new("x")]);
        assert_eq!(rule.outputs, vec![TagName::new("y")]);
        assert!(matches!(rule.kind, RuleKind::Default));
    }

    #[test]
    fn map_rule_table() {
        let registry = compile("rule in {color} out {hex} map { {red} {#f00}  {green} {#0f0} }");
        let rule = registry.all_rules().next().unwrap();
        assert!(matches!(rule.kind, RuleKind::Map));
        match &rule.body {
            Body::Map(table) => {
                assert_eq!(table.len(), 2);
                assert_eq!(table[0], (vec!["red".to_string()], vec!["#f00".to_string()]));
            }
            _ => panic!("expected map body"),
        }
    }

    #[test]
    fn claim_rule() {
        let registry = compile("rule in {count} always claim {$count >= 0}");
        let rule = registry.all_rules().next().unwrap();
        assert!(matches!(rule.kind, RuleKind::Claim));
        assert_eq!(rule.outputs.len(), 0);
    }

    #[test]
    fn in_after_out_is_a_syntax_error() {
        let mut registry = RuleRegistry::new();
        let mut ids = RuleIdAllocator::new();
        let err = compile_source(
            Path::new("#test"),
            "rule out {y} in {x} always { set y 1 }",
            &mut ids,
            &mut registry,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::SyntaxError { .. }));
    }

    #[test]
    fn nested_rule_declaration_is_rejected() {
        let mut registry = RuleRegistry::new();
        let mut ids = RuleIdAllocator::new();
        let err = compile_source(
            Path::new("#test"),
            "rule out {y} always {\nrule out {z} always { set z 1 }\n}",
            &mut ids,
            &mut registry,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::SyntaxError { .. }));
    }
}
