//! Typed syntax tree for cli9 scripts
//!
//! Every grammar construct becomes one [`Wrapper`]: the source text it
//! spans, how deeply it is nested and its typed children. Wrappers are
//! built once and never rewritten; evaluation only changes the context
//! around them.

use cli9_sdk::{ShellError, ShellResult};

use crate::expr::Expression;
use crate::grammar::{Node, NodeKind, RedirectOp};
use crate::lexer::{Part, Span, Word};
use crate::normalize::parse_fragment;

#[derive(Debug, Clone)]
pub struct Wrapper {
    pub span: Span,
    pub text: String,
    pub depth: usize,
    pub kind: WrapperKind,
}

#[derive(Debug, Clone)]
pub enum WrapperKind {
    Word(WordNode),
    /// Words, assignments and redirects in source order.
    Command(Vec<Wrapper>),
    /// Elements separated by [`WrapperKind::Operator`]s.
    List(Vec<Wrapper>),
    Operator(String),
    /// Stages separated by [`WrapperKind::Pipe`]s.
    Pipeline(Vec<Wrapper>),
    Pipe,
    Redirect {
        op: RedirectOp,
        target: Box<Wrapper>,
    },
    Assignment(WordNode),
    Parameter {
        name: String,
        indexes: Vec<String>,
    },
    /// `{` body `}`
    Compound(Vec<Wrapper>),
    ReservedWord(String),
    If(Vec<Wrapper>),
    For(Vec<Wrapper>),
    Loop(Vec<Wrapper>),
    Function(Vec<Wrapper>),
    Tilde(String),
    /// Top-level nodes of a `$(...)` body.
    Substitution(Vec<Wrapper>),
    /// A `[ ... ]` command.
    Expression(Expression),
}

/// Word text with its expansions still to be evaluated.
#[derive(Debug, Clone)]
pub struct WordNode {
    pub pieces: Vec<Piece>,
    /// Expanded text splits on whitespace into several arguments.
    pub split: bool,
}

#[derive(Debug, Clone)]
pub enum Piece {
    Text(String),
    Expansion(Wrapper),
}

impl WordNode {
    /// A word that evaluates to `text` as is.
    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            pieces: vec![Piece::Text(text.into())],
            split: false,
        }
    }

    /// Text of a word without expansions.
    #[must_use]
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Expansion(_) => return None,
            }
        }
        Some(out)
    }

    /// The single expansion this word consists of, if any.
    #[must_use]
    pub fn sole_expansion(&self) -> Option<&Wrapper> {
        match self.pieces.as_slice() {
            [Piece::Expansion(wrapper)] => Some(wrapper),
            _ => None,
        }
    }
}

impl Wrapper {
    /// Name of the variant, as shown in diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match &self.kind {
            WrapperKind::Word(_) => "Word",
            WrapperKind::Command(_) => "Command",
            WrapperKind::List(_) => "List",
            WrapperKind::Operator(_) => "Operator",
            WrapperKind::Pipeline(_) => "Pipeline",
            WrapperKind::Pipe => "Pipe",
            WrapperKind::Redirect { .. } => "Redirect",
            WrapperKind::Assignment(_) => "Assignment",
            WrapperKind::Parameter { .. } => "Parameter",
            WrapperKind::Compound(_) => "Compound",
            WrapperKind::ReservedWord(_) => "ReservedWord",
            WrapperKind::If(_) => "If",
            WrapperKind::For(_) => "For",
            WrapperKind::Loop(_) => "Loop",
            WrapperKind::Function(_) => "Function",
            WrapperKind::Tilde(_) => "Tilde",
            WrapperKind::Substitution(_) => "Substitution",
            WrapperKind::Expression(_) => "Expression",
        }
    }

    /// A plain word argument, used when alias expansion appends arguments.
    #[must_use]
    pub fn literal_word(text: &str, depth: usize) -> Self {
        Self {
            span: 0..0,
            text: text.to_string(),
            depth,
            kind: WrapperKind::Word(WordNode::literal(text)),
        }
    }

    #[must_use]
    pub fn reserved_word(&self) -> Option<&str> {
        match &self.kind {
            WrapperKind::ReservedWord(word) => Some(word),
            _ => None,
        }
    }
}

fn slice(source: &str, span: &Span) -> String {
    source
        .chars()
        .skip(span.start)
        .take(span.end.saturating_sub(span.start))
        .collect()
}

fn word_node(word: &Word, span: &Span, depth: usize) -> ShellResult<WordNode> {
    let mut pieces = Vec::with_capacity(word.parts.len());
    for part in &word.parts {
        let expansion = |text: String, kind| Wrapper {
            span: span.clone(),
            text,
            depth: depth + 1,
            kind,
        };
        let piece = match part {
            Part::Text(text) => Piece::Text(text.clone()),
            Part::Param { name, indexes } => {
                let text = format!("${{{name}{}}}", indexes.iter().map(|i| format!("[{i}]")).collect::<String>());
                Piece::Expansion(expansion(
                    text,
                    WrapperKind::Parameter {
                        name: name.clone(),
                        indexes: indexes.clone(),
                    },
                ))
            }
            Part::Subst(source) => Piece::Expansion(expansion(
                format!("$({source})"),
                WrapperKind::Substitution(parse_fragment(source, depth + 2)?),
            )),
            Part::Tilde(text) => {
                Piece::Expansion(expansion(text.clone(), WrapperKind::Tilde(text.clone())))
            }
        };
        pieces.push(piece);
    }
    Ok(WordNode {
        pieces,
        split: !word.quoted && word.has_expansions(),
    })
}

/// `[ ... ]` commands become expressions.
fn expression(node: &Node, text: &str) -> ShellResult<Option<Expression>> {
    let literal = |part: Option<&Node>| match part.map(|p| &p.kind) {
        Some(NodeKind::Word(word)) => word.literal(),
        _ => None,
    };
    if node.parts.len() < 2
        || literal(node.parts.first()).as_deref() != Some("[")
        || literal(node.parts.last()).as_deref() != Some("]")
    {
        return Ok(None);
    }
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    Expression::parse(inner).map(Some)
}

/// Build the typed tree for one generic node.
pub fn build(node: &Node, source: &str, depth: usize) -> ShellResult<Wrapper> {
    let text = slice(source, &node.span);
    let children = || -> ShellResult<Vec<Wrapper>> {
        node.parts
            .iter()
            .map(|part| build(part, source, depth + 1))
            .collect()
    };

    let kind = match &node.kind {
        NodeKind::List => WrapperKind::List(children()?),
        NodeKind::Operator(op) => WrapperKind::Operator(op.clone()),
        NodeKind::Pipeline => WrapperKind::Pipeline(children()?),
        NodeKind::Pipe => WrapperKind::Pipe,
        NodeKind::Command => match expression(node, &text)? {
            Some(expression) => WrapperKind::Expression(expression),
            None => WrapperKind::Command(children()?),
        },
        NodeKind::Word(word) => WrapperKind::Word(word_node(word, &node.span, depth)?),
        NodeKind::Assignment(word) => WrapperKind::Assignment(word_node(word, &node.span, depth)?),
        NodeKind::Redirect(op) => {
            let target = node
                .parts
                .first()
                .ok_or_else(|| ShellError::parsing(format!("Redirect '{}' has no target", op.symbol())))?;
            WrapperKind::Redirect {
                op: *op,
                target: Box::new(build(target, source, depth + 1)?),
            }
        }
        NodeKind::ReservedWord(word) => WrapperKind::ReservedWord(word.clone()),
        NodeKind::Compound => WrapperKind::Compound(children()?),
        NodeKind::If => WrapperKind::If(children()?),
        NodeKind::For => WrapperKind::For(children()?),
        NodeKind::Loop => WrapperKind::Loop(children()?),
        NodeKind::Function => WrapperKind::Function(children()?),
    };

    Ok(Wrapper {
        span: node.span.clone(),
        text,
        depth,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::parse_script;

    fn one(source: &str) -> Wrapper {
        let mut nodes = parse_script(source).unwrap();
        assert_eq!(nodes.len(), 1);
        nodes.remove(0)
    }

    #[test]
    fn test_source_text_and_depth() {
        let list = one("echo a && echo b");
        assert_eq!(list.name(), "List");
        assert_eq!(list.depth, 0);
        let WrapperKind::List(parts) = &list.kind else {
            panic!("expected list");
        };
        assert_eq!(parts[0].text, "echo a");
        assert_eq!(parts[0].depth, 1);
        assert_eq!(parts[2].text, "echo b");
    }

    #[test]
    fn test_word_expansions() {
        let command = one("echo \"$x\" $(echo y) ~/z");
        let WrapperKind::Command(parts) = &command.kind else {
            panic!("expected command");
        };
        let WrapperKind::Word(quoted) = &parts[1].kind else {
            panic!("expected word");
        };
        assert!(!quoted.split);
        assert!(matches!(
            quoted.sole_expansion().map(|w| &w.kind),
            Some(WrapperKind::Parameter { name, .. }) if name == "x"
        ));

        let WrapperKind::Word(subst) = &parts[2].kind else {
            panic!("expected word");
        };
        assert!(subst.split);
        let Some(WrapperKind::Substitution(inner)) = subst.sole_expansion().map(|w| &w.kind) else {
            panic!("expected substitution");
        };
        assert_eq!(inner[0].text, "echo y");
        assert!(inner[0].depth > 0);

        let WrapperKind::Word(tilde) = &parts[3].kind else {
            panic!("expected word");
        };
        assert!(!tilde.split);
        assert_eq!(tilde.as_literal(), None);
    }

    #[test]
    fn test_bracket_commands_are_expressions() {
        let node = one("[ 1 \\< 2 ]");
        assert_eq!(node.name(), "Expression");
        let node = one("[x]");
        assert_eq!(node.name(), "Command");
    }

    #[test]
    fn test_bad_substitution_fails_at_parse_time() {
        assert!(matches!(
            parse_script("echo $(if true)").unwrap_err(),
            ShellError::Parsing(_)
        ));
    }
}
