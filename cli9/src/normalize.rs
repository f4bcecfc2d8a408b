//! Source preparation before parsing.
//!
//! Chat text is not shell text: mentions contain `<` and `>`, code arrives
//! in fenced blocks and stray parentheses are common. Everything here turns
//! such input into something the grammar accepts, then hands the result to
//! the wrapper layer.

use chumsky::error::SimpleReason;
use chumsky::prelude::*;
use cli9_sdk::{ShellError, ShellResult};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use crate::ast::{self, Wrapper};
use crate::grammar::{self, Node};
use crate::lexer::{lexer, Token};

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(@!|@&|@|#|a?:\w+:)\d+>").unwrap());
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(<<\s*)```(\w*)(\s+.*?\n)```$").unwrap());
static HEREDOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<<\s*['"]?([A-Za-z_][A-Za-z0-9_]*)['"]?"#).unwrap());

/// Wrap platform mentions in single quotes unless already quoted.
fn quote_mentions(text: &str) -> String {
    MENTION
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let found = &caps[0];
            let Some(m) = caps.get(0) else {
                return found.to_string();
            };
            let before = text[..m.start()].chars().next_back();
            let after = text[m.end()..].chars().next();
            if matches!(before, Some('\'' | '"')) || matches!(after, Some('\'' | '"')) {
                found.to_string()
            } else {
                format!("'{found}'")
            }
        })
        .into_owned()
}

/// Quote `body` as one single-quoted shell word.
fn single_quoted(body: &str) -> String {
    format!("'{}'", body.replace('\'', "'\"'\"'"))
}

/// Attach here-document bodies to their `<<` as a quoted word.
fn inline_heredocs(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut index = 0;
    while index < lines.len() {
        let line = lines[index];
        index += 1;
        let Some((range, delimiter)) = HEREDOC.captures_iter(line).find_map(|caps| {
            let m = caps.get(0)?;
            let preceded = line[..m.start()].ends_with('<');
            (!preceded).then(|| (m.range(), caps[1].to_string()))
        }) else {
            out.push(line.to_string());
            continue;
        };

        let Some(end) = lines[index..]
            .iter()
            .position(|candidate| candidate.trim() == delimiter)
        else {
            // no terminator: `<< 'word'` is already a quoted word
            out.push(line.to_string());
            continue;
        };
        let body = lines[index..index + end].join("\n");
        index += end + 1;
        out.push(format!(
            "{}<< {}{}",
            &line[..range.start],
            single_quoted(&body),
            &line[range.end..]
        ));
    }
    out.join("\n")
}

/// Text ready for the lexer, or `NoCommand` when nothing is left.
pub fn normalize(source: &str) -> ShellResult<String> {
    let text = quote_mentions(source);
    let kept: Vec<&str> = text
        .split('\n')
        .map(str::trim_end)
        .filter(|line| {
            let line = line.trim_start();
            !line.is_empty() && !line.starts_with('#')
        })
        .collect();
    let text = kept
        .join("\n")
        .replace("\n\\n", "\n\n")
        .replace("\\\n", " ");
    if text.trim().is_empty() {
        return Err(ShellError::NoCommand);
    }
    let text = FENCE.replace(&text, "${1}BLOCK_EOF${3}BLOCK_EOF").into_owned();
    Ok(inline_heredocs(&text))
}

fn describe<T: Display + Hash + Eq>(error: &Simple<T>) -> String {
    if let SimpleReason::Custom(message) = error.reason() {
        return message.clone();
    }
    match error.found() {
        Some(found) => format!("Unexpected '{found}' at position {}", error.span().start),
        None => "Unexpected end of input".to_string(),
    }
}

/// Lex and parse once; on failure, the message and the position of the
/// parenthesis to escape, if the failure sits at or after one.
fn attempt(text: &str) -> Result<Vec<Node>, (String, Option<usize>)> {
    let tokens = lexer()
        .parse(text)
        .map_err(|errors| (errors.first().map_or_else(String::new, describe), None))?;
    let parens: Vec<usize> = tokens
        .iter()
        .filter(|(token, _)| matches!(token, Token::LParen | Token::RParen))
        .map(|(_, span)| span.start)
        .collect();
    grammar::parse_tokens(tokens, text.chars().count()).map_err(|errors| {
        let Some(error) = errors.first() else {
            return ("Invalid syntax".to_string(), None);
        };
        let at = error.span().start;
        let paren = if matches!(error.found(), Some(Token::LParen | Token::RParen)) {
            Some(at)
        } else {
            parens.iter().rev().copied().find(|start| *start <= at)
        };
        (describe(error), paren)
    })
}

fn escape_at(text: &str, position: usize) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    for (index, c) in text.chars().enumerate() {
        if index == position {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse already normalized text. A parenthesis the grammar trips over is
/// escaped and the parse retried; each distinct error is retried once.
pub fn syntax(text: &str) -> ShellResult<(String, Vec<Node>)> {
    retry(text, attempt)
}

fn retry<T>(
    text: &str,
    attempt: impl Fn(&str) -> Result<T, (String, Option<usize>)>,
) -> ShellResult<(String, T)> {
    let mut text = text.to_string();
    let mut seen = HashSet::new();
    loop {
        match attempt(&text) {
            Ok(nodes) => return Ok((text, nodes)),
            Err((message, paren)) => {
                if !seen.insert(message.clone()) {
                    return Err(ShellError::parsing(message));
                }
                let Some(position) = paren else {
                    return Err(ShellError::parsing(message));
                };
                tracing::trace!(position, %message, "escaping parenthesis and retrying");
                text = escape_at(&text, position);
            }
        }
    }
}

/// Parse a fragment without normalization, e.g. a `$(...)` body.
pub fn parse_fragment(text: &str, depth: usize) -> ShellResult<Vec<Wrapper>> {
    let (text, nodes) = syntax(text)?;
    nodes.iter().map(|node| ast::build(node, &text, depth)).collect()
}

/// Normalize, parse and wrap a whole script.
pub fn parse_script(source: &str) -> ShellResult<Vec<Wrapper>> {
    let text = normalize(source)?;
    parse_fragment(&text, 0)
}

/// A parsed script, shared between invocations.
#[derive(Debug)]
pub struct Script {
    pub checksum: String,
    pub nodes: Vec<Wrapper>,
}

#[derive(Debug, Default)]
struct Entries {
    scripts: HashMap<String, Arc<Script>>,
    /// Checksums from least to most recently used.
    order: VecDeque<String>,
}

impl Entries {
    fn touch(&mut self, checksum: &str) {
        if let Some(at) = self.order.iter().position(|c| c == checksum) {
            if let Some(key) = self.order.remove(at) {
                self.order.push_back(key);
            }
        }
    }
}

/// Parsed scripts keyed by the SHA-256 of their source, evicting the least
/// recently used past `capacity`.
#[derive(Debug)]
pub struct ScriptCache {
    capacity: usize,
    entries: Mutex<Entries>,
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ScriptCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Entries::default()),
        }
    }

    #[must_use]
    pub fn checksum(source: &str) -> String {
        hex::encode(Sha256::digest(source.as_bytes()))
    }

    pub fn parse(&self, source: &str) -> ShellResult<Arc<Script>> {
        let checksum = Self::checksum(source);
        {
            let mut entries = self.entries();
            if let Some(hit) = entries.scripts.get(&checksum).cloned() {
                entries.touch(&checksum);
                return Ok(hit);
            }
        }
        let script = Arc::new(Script {
            nodes: parse_script(source)?,
            checksum: checksum.clone(),
        });
        if self.capacity == 0 {
            return Ok(script);
        }
        let mut entries = self.entries();
        if entries.scripts.insert(checksum.clone(), Arc::clone(&script)).is_some() {
            entries.touch(&checksum);
        } else {
            entries.order.push_back(checksum);
        }
        while entries.order.len() > self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.scripts.remove(&oldest);
            }
        }
        Ok(script)
    }

    #[must_use]
    pub fn contains(&self, source: &str) -> bool {
        self.entries().scripts.contains_key(&Self::checksum(source))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().scripts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().scripts.is_empty()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Text actually run for an executed file: a `#!` line names the
/// interpreter, which receives the file's path.
#[must_use]
pub fn shebang(text: &str, path: &str) -> Option<String> {
    let first = text.lines().next()?;
    let interpreter = first.strip_prefix("#!")?.trim();
    Some(format!("{interpreter} {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_filtering() {
        let text = normalize("  # comment\necho a   \n\n   \necho \\\n  b").unwrap();
        assert_eq!(text, "echo a\necho    b");
        assert_eq!(normalize("# only\n\n").unwrap_err(), ShellError::NoCommand);
    }

    #[test]
    fn test_mentions_are_quoted() {
        assert_eq!(
            normalize("echo <@123456789012345678> '<#1>'").unwrap(),
            "echo '<@123456789012345678>' '<#1>'"
        );
        assert_eq!(
            normalize("echo <a:wave:123456789012345678>").unwrap(),
            "echo '<a:wave:123456789012345678>'"
        );
    }

    #[test]
    fn test_heredoc_is_inlined() {
        let text = normalize("cat << EOF\nit's\n  here\nEOF\necho after").unwrap();
        assert_eq!(text, "cat << 'it'\"'\"'s\n  here'\necho after");
    }

    #[test]
    fn test_fenced_block() {
        let text = normalize("cat << ```py\nprint(1)\n```").unwrap();
        assert_eq!(text, "cat << 'print(1)'");
    }

    #[test]
    fn test_paren_retry() {
        let (text, nodes) = syntax("echo :)").unwrap();
        assert_eq!(text, "echo :\\)");
        assert_eq!(nodes.len(), 1);

        let (text, _) = syntax("echo (hi)").unwrap();
        assert_eq!(text, "echo \\(hi\\)");
    }

    #[test]
    fn test_repeated_error_stops_retrying() {
        let calls = std::cell::Cell::new(0);
        let failing = |_: &str| -> Result<(), (String, Option<usize>)> {
            calls.set(calls.get() + 1);
            Err(("Unexpected end of input".to_string(), Some(0)))
        };
        assert_eq!(
            retry("(x", failing).unwrap_err(),
            ShellError::parsing("Unexpected end of input")
        );
        assert_eq!(calls.get(), 2);

        assert!(matches!(syntax("f() { echo").unwrap_err(), ShellError::Parsing(_)));
    }

    #[test]
    fn test_unrecoverable() {
        assert!(matches!(
            syntax("if true; then echo").unwrap_err(),
            ShellError::Parsing(_)
        ));
        assert!(matches!(syntax("echo 'open").unwrap_err(), ShellError::Parsing(_)));
    }

    #[test]
    fn test_cache_reuses_scripts() {
        let cache = ScriptCache::default();
        let first = cache.parse("echo a").unwrap();
        let second = cache.parse("echo a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert!(cache.parse("   ").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let cache = ScriptCache::new(2);
        cache.parse("echo a").unwrap();
        cache.parse("echo b").unwrap();
        cache.parse("echo a").unwrap();
        cache.parse("echo c").unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("echo a"));
        assert!(!cache.contains("echo b"));
        assert!(cache.contains("echo c"));

        let disabled = ScriptCache::new(0);
        assert!(disabled.parse("echo a").is_ok());
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_shebang() {
        assert_eq!(
            shebang("#!/bin/run\necho", "/home/user/x").as_deref(),
            Some("/bin/run /home/user/x")
        );
        assert_eq!(shebang("echo", "/x"), None);
    }
}
