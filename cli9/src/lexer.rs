//! Lexer for cli9 scripts
//!
//! Turns normalized source text into spanned tokens. Words keep their
//! expansions (`$name`, `${name[i]}`, `$(...)`, leading `~`) as parts so
//! the wrapper layer can evaluate them later.

use chumsky::prelude::*;
use std::fmt;
use std::ops::Range;

pub type Span = Range<usize>;

/// One piece of a word after quote removal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Part {
    Text(String),
    /// `$name`, `${name}` or `${name[i][j]}`.
    Param { name: String, indexes: Vec<String> },
    /// Raw source of a `$( ... )` command substitution.
    Subst(String),
    /// `~` or `~name` at the start of a word.
    Tilde(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Word {
    pub parts: Vec<Part>,
    /// Any segment was single or double quoted.
    pub quoted: bool,
    /// Starts with an unquoted `name=` or `name+=`.
    pub assign: bool,
}

impl Word {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text(text.into())],
            quoted: false,
            assign: false,
        }
    }

    /// The word's text when it holds no expansions.
    #[must_use]
    pub fn literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                _ => return None,
            }
        }
        Some(out)
    }

    #[must_use]
    pub fn is_reserved(&self, word: &str) -> bool {
        !self.quoted && self.literal().is_some_and(|text| text == word)
    }

    #[must_use]
    pub fn has_expansions(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Param { .. } | Part::Subst(_)))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                Part::Text(text) | Part::Tilde(text) => f.write_str(text)?,
                Part::Param { name, indexes } => {
                    write!(f, "${{{name}")?;
                    for index in indexes {
                        write!(f, "[{index}]")?;
                    }
                    f.write_str("}")?;
                }
                Part::Subst(source) => write!(f, "$({source})")?,
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Word(Word),

    // Operators
    AndAnd,  // &&
    OrOr,    // ||
    Pipe,    // |
    Semi,    // ;
    Amp,     // &
    Newline, // \n

    // Redirections
    Less,  // <
    DLess, // <<
    TLess, // <<<
    Great, // >
    DGreat, // >>

    LParen, // (
    RParen, // )
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(word) => write!(f, "{word}"),
            Self::AndAnd => f.write_str("&&"),
            Self::OrOr => f.write_str("||"),
            Self::Pipe => f.write_str("|"),
            Self::Semi => f.write_str(";"),
            Self::Amp => f.write_str("&"),
            Self::Newline => f.write_str("\\n"),
            Self::Less => f.write_str("<"),
            Self::DLess => f.write_str("<<"),
            Self::TLess => f.write_str("<<<"),
            Self::Great => f.write_str(">"),
            Self::DGreat => f.write_str(">>"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
        }
    }
}

#[derive(Clone, Debug)]
enum Segment {
    Bare(Vec<Part>),
    Single(String),
    Double(Vec<Part>),
}

/// Split `name[a][b]` into the name and its indexes.
fn param(body: &str) -> Part {
    match body.find('[') {
        Some(open) if body.ends_with(']') => {
            let name = body[..open].to_string();
            let indexes = body[open + 1..body.len() - 1]
                .split("][")
                .map(ToString::to_string)
                .collect();
            Part::Param { name, indexes }
        }
        _ => Part::Param {
            name: body.to_string(),
            indexes: Vec::new(),
        },
    }
}

/// Source text up to the matching `)`, quotes and nesting respected.
fn balanced() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    recursive(|balanced| {
        let quoted = |q: char| {
            just(q)
                .ignore_then(filter(move |c: &char| *c != q).repeated())
                .then_ignore(just(q))
                .collect::<String>()
                .map(move |body| format!("{q}{body}{q}"))
        };
        let nested = balanced
            .delimited_by(just('('), just(')'))
            .map(|inner: String| format!("({inner})"));
        let escaped = just('\\')
            .ignore_then(any())
            .map(|c: char| format!("\\{c}"));
        let plain = none_of("()'\"\\").map(|c: char| c.to_string());

        choice((quoted('\''), quoted('"'), nested, escaped, plain))
            .repeated()
            .map(|parts: Vec<String>| parts.concat())
    })
}

fn expansion() -> impl Parser<char, Part, Error = Simple<char>> + Clone {
    let name = filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .collect::<String>();

    let subst = just("$(")
        .ignore_then(balanced())
        .then_ignore(just(')'))
        .map(Part::Subst);
    let braced = just("${")
        .ignore_then(none_of("}").repeated().at_least(1).collect::<String>())
        .then_ignore(just('}'))
        .map(|body| param(&body));
    let simple = just('$')
        .ignore_then(name.or(one_of("@#").map(|c: char| c.to_string())))
        .map(|name| Part::Param {
            name,
            indexes: Vec::new(),
        });

    choice((subst, braced, simple))
}

/// Merge neighbouring text parts.
fn merge(parts: Vec<Part>) -> Vec<Part> {
    let mut out: Vec<Part> = Vec::with_capacity(parts.len());
    for part in parts {
        match (out.last_mut(), part) {
            (_, Part::Text(text)) if text.is_empty() => {}
            (Some(Part::Text(prev)), Part::Text(text)) => prev.push_str(&text),
            (_, part) => out.push(part),
        }
    }
    out
}

fn is_assignment(text: &str) -> bool {
    let Some(eq) = text.find('=') else {
        return false;
    };
    let name = text[..eq].strip_suffix('+').unwrap_or(&text[..eq]);
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn word(segments: Vec<Segment>) -> Word {
    let quoted = segments
        .iter()
        .any(|s| matches!(s, Segment::Single(_) | Segment::Double(_)));
    let mut assign = false;
    let mut parts = Vec::new();
    for (index, segment) in segments.into_iter().enumerate() {
        match segment {
            Segment::Bare(bare) => {
                let mut bare = merge(bare);
                if index == 0 {
                    assign = matches!(bare.first(), Some(Part::Text(text)) if is_assignment(text));
                    if let Some(Part::Text(text)) = bare.first_mut() {
                        if text.starts_with('~') {
                            let end = text.find('/').unwrap_or(text.len());
                            let tilde = text[..end].to_string();
                            *text = text[end..].to_string();
                            parts.push(Part::Tilde(tilde));
                        }
                    }
                }
                parts.extend(bare);
            }
            Segment::Single(text) => parts.push(Part::Text(text)),
            Segment::Double(inner) => parts.extend(inner),
        }
    }
    Word {
        parts: merge(parts),
        quoted,
        assign,
    }
}

pub fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = Simple<char>> {
    let comment = just('#')
        .then(filter(|c: &char| *c != '\n').repeated())
        .ignored();

    // Whitespace (not including newlines)
    let ws = filter(|c: &char| *c == ' ' || *c == '\t' || *c == '\r').repeated();

    let dollar = just('$').to(Part::Text("$".to_string()));

    let sq_seg = just('\'')
        .ignore_then(filter(|c: &char| *c != '\'').repeated())
        .then_ignore(just('\''))
        .collect::<String>()
        .map(Segment::Single);

    let dq_escape = just('\\').ignore_then(any()).map(|c: char| {
        Part::Text(match c {
            '"' | '\\' | '$' | '`' => c.to_string(),
            '\n' => String::new(),
            _ => format!("\\{c}"),
        })
    });
    let dq_seg = just('"')
        .ignore_then(
            choice((
                dq_escape,
                expansion(),
                dollar.clone(),
                none_of("\"\\$").map(|c: char| Part::Text(c.to_string())),
            ))
            .repeated(),
        )
        .then_ignore(just('"'))
        .map(Segment::Double);

    // Backslash-escape outside quotes: \X is a literal X, \<newline> joins lines
    let escaped_char = just('\\')
        .ignore_then(any())
        .map(|c: char| Part::Text(if c == '\n' { String::new() } else { c.to_string() }));

    let word_char = filter(|c: &char| {
        !c.is_whitespace()
            && !matches!(c, '|' | '&' | ';' | '<' | '>' | '(' | ')' | '\'' | '"' | '\\' | '$')
    })
    .map(|c: char| Part::Text(c.to_string()));

    let bare_seg = choice((escaped_char, expansion(), dollar, word_char))
        .repeated()
        .at_least(1)
        .map(Segment::Bare);

    let compound_word = choice((bare_seg, sq_seg, dq_seg))
        .repeated()
        .at_least(1)
        .map(|segments| Token::Word(word(segments)));

    let operator = choice((
        just("&&").to(Token::AndAnd),
        just("||").to(Token::OrOr),
        just("<<<").to(Token::TLess),
        just("<<").to(Token::DLess),
        just(">>").to(Token::DGreat),
        just('|').to(Token::Pipe),
        just(';').to(Token::Semi),
        just('&').to(Token::Amp),
        just('<').to(Token::Less),
        just('>').to(Token::Great),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('\n').to(Token::Newline),
    ));

    let token = operator
        .or(compound_word)
        .map_with_span(|token, span| (token, span));

    // Whitespace, then an optional comment running to the end of the line
    let skip = ws.then(comment.or_not()).ignored();

    skip.clone()
        .ignore_then(token.then_ignore(skip).repeated())
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        lexer()
            .parse(input)
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    fn bare(text: &str) -> Token {
        Token::Word(Word::text(text))
    }

    #[test]
    fn test_simple_command() {
        assert_eq!(lex("echo hello"), vec![bare("echo"), bare("hello")]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex("a && b || c | d; e"),
            vec![
                bare("a"),
                Token::AndAnd,
                bare("b"),
                Token::OrOr,
                bare("c"),
                Token::Pipe,
                bare("d"),
                Token::Semi,
                bare("e"),
            ]
        );
        assert_eq!(
            lex("cat <<< x >> y < z"),
            vec![
                bare("cat"),
                Token::TLess,
                bare("x"),
                Token::DGreat,
                bare("y"),
                Token::Less,
                bare("z"),
            ]
        );
    }

    #[test]
    fn test_quotes() {
        let tokens = lex("echo 'a $b' \"c $d\"");
        let Token::Word(single) = &tokens[1] else {
            panic!("expected word");
        };
        assert_eq!(single.parts, vec![Part::Text("a $b".into())]);
        assert!(single.quoted);

        let Token::Word(double) = &tokens[2] else {
            panic!("expected word");
        };
        assert_eq!(
            double.parts,
            vec![
                Part::Text("c ".into()),
                Part::Param {
                    name: "d".into(),
                    indexes: vec![]
                }
            ]
        );
    }

    #[test]
    fn test_expansions() {
        let tokens = lex("echo ${x[0][key]}$(echo (a) ')') ~/docs");
        let Token::Word(word) = &tokens[1] else {
            panic!("expected word");
        };
        assert_eq!(
            word.parts,
            vec![
                Part::Param {
                    name: "x".into(),
                    indexes: vec!["0".into(), "key".into()]
                },
                Part::Subst("echo (a) ')'".into()),
            ]
        );
        let Token::Word(home) = &tokens[2] else {
            panic!("expected word");
        };
        assert_eq!(
            home.parts,
            vec![Part::Tilde("~".into()), Part::Text("/docs".into())]
        );
    }

    #[test]
    fn test_assignment_flag() {
        let Token::Word(word) = &lex("x+=1")[0] else {
            panic!("expected word");
        };
        assert!(word.assign);
        let Token::Word(word) = &lex("'x'=1")[0] else {
            panic!("expected word");
        };
        assert!(!word.assign);
        for text in ["name=value", "name='quoted value'", "x=$y", "_a1=1"] {
            let Token::Word(word) = &lex(text)[0] else {
                panic!("expected word");
            };
            assert!(word.assign, "{text}");
        }
        let Token::Word(word) = &lex("1x=1")[0] else {
            panic!("expected word");
        };
        assert!(!word.assign);
    }

    #[test]
    fn test_escapes_and_comments() {
        assert_eq!(lex("echo a\\;b # trailing"), vec![bare("echo"), bare("a;b")]);
        assert_eq!(lex("echo $ 5"), vec![bare("echo"), bare("$"), bare("5")]);
    }

    #[test]
    fn test_spans() {
        let spans: Vec<Span> = lexer()
            .parse("ls  -a")
            .unwrap()
            .into_iter()
            .map(|(_, span)| span)
            .collect();
        assert_eq!(spans, vec![0..2, 4..6]);
    }
}
