//! Grammar for cli9 scripts
//!
//! Parses the token stream into a generic syntax tree: one node kind per
//! grammar construct, children in source order, every node carrying the
//! character span it covers. The wrapper layer turns it into typed nodes.

use crate::lexer::{Span, Token, Word};
use chumsky::prelude::*;
use chumsky::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectOp {
    /// `< file`
    Input,
    /// `<< body`
    HereDoc,
    /// `<<< word`
    HereString,
    /// `> file`
    Output,
    /// `>> file`
    Append,
}

impl RedirectOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Input => "<",
            Self::HereDoc => "<<",
            Self::HereString => "<<<",
            Self::Output => ">",
            Self::Append => ">>",
        }
    }

    /// Redirects feeding the command's input.
    #[must_use]
    pub const fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::HereDoc | Self::HereString)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    List,
    Operator(String),
    Pipeline,
    Pipe,
    Command,
    Word(Word),
    Assignment(Word),
    Redirect(RedirectOp),
    ReservedWord(String),
    Compound,
    If,
    For,
    Loop,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub parts: Vec<Node>,
}

impl Node {
    fn leaf(kind: NodeKind, span: Span) -> Self {
        Self {
            kind,
            span,
            parts: Vec::new(),
        }
    }

    fn branch(kind: NodeKind, span: Span, parts: Vec<Self>) -> Self {
        Self { kind, span, parts }
    }
}

/// Words that cannot start a simple command.
const RESERVED: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "do", "done", "while", "until", "function", "{",
    "}",
];

/// Parse a token stream into top-level nodes, one per line.
pub fn parse_tokens(tokens: Vec<(Token, Span)>, len: usize) -> Result<Vec<Node>, Vec<Simple<Token>>> {
    parser().parse(Stream::from_iter(len..len + 1, tokens.into_iter()))
}

pub fn parser() -> impl Parser<Token, Vec<Node>, Error = Simple<Token>> {
    let body = recursive(|body| list(pipeline(body), true)).boxed();
    let line = list(pipeline(body), false);

    line.separated_by(just(Token::Newline).repeated().at_least(1))
        .allow_leading()
        .allow_trailing()
        .then_ignore(end())
}

fn word() -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    filter_map(|span: Span, tok| match tok {
        Token::Word(word) => Ok(Node::leaf(NodeKind::Word(word), span)),
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
}

/// A word allowed in command position.
fn command_word() -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    filter_map(|span: Span, tok| match tok {
        Token::Word(ref word)
            if !word.assign && !RESERVED.iter().any(|reserved| word.is_reserved(reserved)) =>
        {
            Ok(Node::leaf(NodeKind::Word(word.clone()), span))
        }
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
}

fn assignment() -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    filter_map(|span: Span, tok| match tok {
        Token::Word(ref word) if word.assign => {
            Ok(Node::leaf(NodeKind::Assignment(word.clone()), span))
        }
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
}

fn reserved(name: &'static str) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    filter_map(move |span: Span, tok| match tok {
        Token::Word(ref word) if word.is_reserved(name) => {
            Ok(Node::leaf(NodeKind::ReservedWord(name.to_string()), span))
        }
        _ => Err(Simple::expected_input_found(span, None, Some(tok))),
    })
}

fn punct(token: Token, name: &'static str) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    just(token).map_with_span(move |_, span| Node::leaf(NodeKind::ReservedWord(name.to_string()), span))
}

fn newlines() -> impl Parser<Token, (), Error = Simple<Token>> + Clone {
    just(Token::Newline).repeated().ignored()
}

fn redirect() -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    choice((
        just(Token::Less).to(RedirectOp::Input),
        just(Token::DLess).to(RedirectOp::HereDoc),
        just(Token::TLess).to(RedirectOp::HereString),
        just(Token::Great).to(RedirectOp::Output),
        just(Token::DGreat).to(RedirectOp::Append),
    ))
    .then(word())
    .map_with_span(|(op, target), span| Node::branch(NodeKind::Redirect(op), span, vec![target]))
}

/// Assignments and redirects, then a command word and its arguments.
fn command() -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    let prefix = assignment().or(redirect()).repeated();
    let rest = command_word().then(redirect().or(word()).repeated());

    prefix
        .then(rest.or_not())
        .try_map(|(mut parts, rest), span: Span| {
            if let Some((name, args)) = rest {
                parts.push(name);
                parts.extend(args);
            }
            if parts.is_empty() {
                return Err(Simple::custom(span, "expected a command"));
            }
            Ok(Node::branch(NodeKind::Command, span, parts))
        })
}

fn brace_group(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    reserved("{")
        .then(body)
        .then(reserved("}"))
        .map_with_span(|((open, body), close), span| {
            Node::branch(NodeKind::Compound, span, vec![open, body, close])
        })
}

/// `if c; then a; elif c; then a; else a; fi`
fn if_clause(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    let branch = |keyword: &'static str| {
        reserved(keyword)
            .then(body.clone())
            .then(reserved("then"))
            .then(body.clone())
            .map(|(((keyword, condition), then), action)| vec![keyword, condition, then, action])
    };

    branch("if")
        .then(branch("elif").repeated())
        .then(reserved("else").then(body.clone()).or_not())
        .then(reserved("fi"))
        .map_with_span(|(((first, elifs), otherwise), fi), span| {
            let mut parts = first;
            parts.extend(elifs.into_iter().flatten());
            if let Some((keyword, action)) = otherwise {
                parts.push(keyword);
                parts.push(action);
            }
            parts.push(fi);
            Node::branch(NodeKind::If, span, parts)
        })
}

/// `for name in words; do body; done`
fn for_clause(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    let separator = choice((just(Token::Semi), just(Token::Newline))).repeated();

    reserved("for")
        .then(word())
        .then_ignore(newlines())
        .then(reserved("in").then(word().repeated()).or_not())
        .then_ignore(separator)
        .then(reserved("do"))
        .then(body)
        .then(reserved("done"))
        .map_with_span(|(((((keyword, name), items), open), body), close), span| {
            let mut parts = vec![keyword, name];
            if let Some((keyword, words)) = items {
                parts.push(keyword);
                parts.extend(words);
            }
            parts.extend([open, body, close]);
            Node::branch(NodeKind::For, span, parts)
        })
}

/// `while c; do body; done` and `until c; do body; done`
fn loop_clause(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    reserved("while")
        .or(reserved("until"))
        .then(body.clone())
        .then(reserved("do"))
        .then(body)
        .then(reserved("done"))
        .map_with_span(|((((keyword, condition), open), body), close), span| {
            Node::branch(NodeKind::Loop, span, vec![keyword, condition, open, body, close])
        })
}

/// `function name { ... }`, `function name() { ... }` or `name() { ... }`
fn function_def(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    let parens = punct(Token::LParen, "(").then(punct(Token::RParen, ")"));
    let keyword_form = reserved("function")
        .then(word())
        .then(parens.clone().or_not())
        .map(|((keyword, name), parens)| {
            let mut parts = vec![keyword, name];
            if let Some((open, close)) = parens {
                parts.extend([open, close]);
            }
            parts
        });
    let short_form = command_word()
        .then(parens)
        .map(|(name, (open, close))| vec![name, open, close]);

    keyword_form
        .or(short_form)
        .then_ignore(newlines())
        .then(brace_group(body))
        .map_with_span(|(mut parts, group), span| {
            parts.push(group);
            Node::branch(NodeKind::Function, span, parts)
        })
}

/// A pipeline element: a compound construct or a simple command.
fn element(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    choice((
        if_clause(body.clone()),
        for_clause(body.clone()),
        loop_clause(body.clone()),
        function_def(body.clone()),
        brace_group(body),
        command(),
    ))
}

fn pipeline(
    body: impl Parser<Token, Node, Error = Simple<Token>> + Clone + 'static,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    let pipe = just(Token::Pipe)
        .map_with_span(|_, span| Node::leaf(NodeKind::Pipe, span))
        .then_ignore(newlines());

    element(body.clone())
        .then(pipe.then(element(body)).repeated())
        .map_with_span(|(first, rest), span| {
            if rest.is_empty() {
                return first;
            }
            let mut parts = vec![first];
            for (pipe, stage) in rest {
                parts.push(pipe);
                parts.push(stage);
            }
            Node::branch(NodeKind::Pipeline, span, parts)
        })
        .boxed()
}

/// Pipelines joined by `&&`, `||`, `;` and `&`. Inside compound bodies
/// newlines separate elements as well.
fn list(
    pipeline: impl Parser<Token, Node, Error = Simple<Token>> + Clone + 'static,
    multiline: bool,
) -> impl Parser<Token, Node, Error = Simple<Token>> + Clone {
    let and_or = choice((just(Token::AndAnd).to("&&"), just(Token::OrOr).to("||")))
        .map_with_span(|op, span| Node::leaf(NodeKind::Operator(op.to_string()), span))
        .then_ignore(newlines());

    let sequential = if multiline {
        choice((just(Token::Semi), just(Token::Amp), just(Token::Newline))).boxed()
    } else {
        choice((just(Token::Semi), just(Token::Amp))).boxed()
    };
    let separator = sequential
        .repeated()
        .at_least(1)
        .map_with_span(|_, span| Node::leaf(NodeKind::Operator(";".to_string()), span));

    let leading = if multiline {
        newlines().boxed()
    } else {
        empty().boxed()
    };

    leading
        .ignore_then(pipeline.clone())
        .then(and_or.or(separator.clone()).then(pipeline).repeated())
        .then(separator.or_not())
        .map_with_span(|((first, rest), trailing), span| {
            if rest.is_empty() && trailing.is_none() {
                return first;
            }
            let mut parts = vec![first];
            for (op, element) in rest {
                parts.push(op);
                parts.push(element);
            }
            parts.extend(trailing);
            Node::branch(NodeKind::List, span, parts)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lexer;

    fn parse(input: &str) -> Vec<Node> {
        let tokens = lexer().parse(input).unwrap();
        parse_tokens(tokens, input.chars().count()).unwrap()
    }

    fn kinds(node: &Node) -> Vec<String> {
        node.parts
            .iter()
            .map(|part| match &part.kind {
                NodeKind::Word(word) => format!("word:{word}"),
                NodeKind::ReservedWord(word) => format!("rw:{word}"),
                NodeKind::Operator(op) => format!("op:{op}"),
                other => format!("{other:?}").to_lowercase(),
            })
            .collect()
    }

    #[test]
    fn test_simple_command() {
        let nodes = parse("echo hello world");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, NodeKind::Command);
        assert_eq!(kinds(&nodes[0]), vec!["word:echo", "word:hello", "word:world"]);
        assert_eq!(nodes[0].span, 0..16);
    }

    #[test]
    fn test_lines_are_separate_nodes() {
        let nodes = parse("echo a\n\necho b; echo c\n");
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind, NodeKind::Command);
        assert_eq!(nodes[1].kind, NodeKind::List);
        assert_eq!(kinds(&nodes[1]), vec!["command", "op:;", "command"]);
    }

    #[test]
    fn test_list_and_pipeline() {
        let nodes = parse("a | b && c || d;");
        assert_eq!(
            kinds(&nodes[0]),
            vec!["pipeline", "op:&&", "command", "op:||", "command", "op:;"]
        );
        assert_eq!(kinds(&nodes[0].parts[0]), vec!["command", "pipe", "command"]);
    }

    #[test]
    fn test_assignments_and_redirects() {
        let nodes = parse("x=1 y+=2 cat < in > out x=3");
        let parts = &nodes[0].parts;
        assert!(matches!(parts[0].kind, NodeKind::Assignment(_)));
        assert!(matches!(parts[1].kind, NodeKind::Assignment(_)));
        assert!(matches!(parts[2].kind, NodeKind::Word(_)));
        assert_eq!(parts[3].kind, NodeKind::Redirect(RedirectOp::Input));
        assert_eq!(parts[4].kind, NodeKind::Redirect(RedirectOp::Output));
        // assignments after the command name are plain arguments
        assert!(matches!(parts[5].kind, NodeKind::Word(_)));
    }

    #[test]
    fn test_if_clause() {
        let nodes = parse("if a; then b; elif c\nthen d\nelse e; fi");
        assert_eq!(nodes[0].kind, NodeKind::If);
        assert_eq!(
            kinds(&nodes[0]),
            vec![
                "rw:if", "list", "rw:then", "list", "rw:elif", "list", "rw:then", "list",
                "rw:else", "list", "rw:fi"
            ]
        );
    }

    #[test]
    fn test_for_and_loops() {
        let nodes = parse("for x in 1:3 b; do echo $x; done");
        assert_eq!(
            kinds(&nodes[0]),
            vec!["rw:for", "word:x", "rw:in", "word:1:3", "word:b", "rw:do", "list", "rw:done"]
        );

        let nodes = parse("until false\ndo\n  echo x\ndone");
        assert_eq!(nodes[0].kind, NodeKind::Loop);
        assert_eq!(
            kinds(&nodes[0]),
            vec!["rw:until", "list", "rw:do", "list", "rw:done"]
        );
    }

    #[test]
    fn test_functions() {
        let nodes = parse("greet() { echo hi; }");
        assert_eq!(nodes[0].kind, NodeKind::Function);
        assert_eq!(kinds(&nodes[0]), vec!["word:greet", "rw:(", "rw:)", "compound"]);

        let nodes = parse("function greet {\n echo hi\n}");
        assert_eq!(kinds(&nodes[0]), vec!["rw:function", "word:greet", "compound"]);
    }

    #[test]
    fn test_reserved_words_are_arguments() {
        let nodes = parse("echo if then fi");
        assert_eq!(nodes[0].kind, NodeKind::Command);
        assert_eq!(nodes[0].parts.len(), 4);
    }

    #[test]
    fn test_errors() {
        let tokens = lexer().parse("echo )").unwrap();
        let errors = parse_tokens(tokens, 6).unwrap_err();
        assert_eq!(errors[0].found(), Some(&Token::RParen));
        assert_eq!(errors[0].span(), 5..6);

        let tokens = lexer().parse("if true; then echo").unwrap();
        assert!(parse_tokens(tokens, 18).is_err());
    }
}
