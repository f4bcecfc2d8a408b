//! Parser for the `[ ... ]` expression language.

use chumsky::prelude::*;
use cli9_sdk::Value;

/// Words that never parse as names.
const KEYWORDS: &[&str] = &["and", "or", "not", "in", "is", "True", "False", "None"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Name(String),
    /// `$name` or `${name}`.
    Variable(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `a < b <= c`: every adjacent pair must hold.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

#[derive(Debug, Clone)]
enum Postfix {
    Attr(String),
    Index(Expr),
    Call(Vec<Arg>),
}

fn name() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    text::ident().try_map(|name: String, span| {
        if KEYWORDS.contains(&name.as_str()) {
            Err(Simple::custom(span, format!("unexpected keyword '{name}'")))
        } else {
            Ok(name)
        }
    })
}

fn string(quote: char) -> impl Parser<char, String, Error = Simple<char>> + Clone {
    let escape = just('\\').ignore_then(any()).map(|c| match c {
        'n' => '\n',
        't' => '\t',
        other => other,
    });
    just(quote)
        .ignore_then(
            filter(move |c: &char| *c != quote && *c != '\\')
                .or(escape)
                .repeated(),
        )
        .then_ignore(just(quote))
        .collect()
}

/// A numeric literal carrying `sign`, so that `-9223372036854775808` fits.
fn number(sign: &'static str) -> impl Parser<char, Value, Error = Simple<char>> + Clone {
    text::int(10)
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .try_map(move |(whole, fraction): (String, Option<String>), span| match fraction {
            Some(fraction) => format!("{sign}{whole}.{fraction}")
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| Simple::custom(span, e.to_string())),
            None => format!("{sign}{whole}")
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Simple::custom(span, "OverflowError: integer literal out of range")),
        })
}

fn variable() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    let raw = filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .collect::<String>();
    just('$').ignore_then(
        raw.clone()
            .delimited_by(just('{'), just('}'))
            .or(raw),
    )
}

fn comparison_op() -> impl Parser<char, CmpOp, Error = Simple<char>> + Clone {
    choice((
        just("==").to(CmpOp::Eq),
        just("!=").to(CmpOp::Ne),
        just("<=").to(CmpOp::Le),
        just(">=").to(CmpOp::Ge),
        just('<').to(CmpOp::Lt),
        just('>').to(CmpOp::Gt),
        text::keyword("not")
            .then(text::whitespace())
            .then(text::keyword("in"))
            .to(CmpOp::NotIn),
        text::keyword("in").to(CmpOp::In),
        text::keyword("is")
            .then(text::whitespace())
            .then(text::keyword("not"))
            .to(CmpOp::IsNot),
        text::keyword("is").to(CmpOp::Is),
    ))
    .padded()
}

fn apply(lhs: Expr, postfix: Postfix) -> Expr {
    match postfix {
        Postfix::Attr(attr) => Expr::Attr(Box::new(lhs), attr),
        Postfix::Index(index) => Expr::Index(Box::new(lhs), Box::new(index)),
        Postfix::Call(call) => {
            let mut args = Vec::new();
            let mut kwargs = Vec::new();
            for arg in call {
                match arg {
                    Arg::Positional(expr) => args.push(expr),
                    Arg::Keyword(name, expr) => kwargs.push((name, expr)),
                }
            }
            Expr::Call {
                func: Box::new(lhs),
                args,
                kwargs,
            }
        }
    }
}

pub fn parser() -> impl Parser<char, Expr, Error = Simple<char>> {
    let expr = recursive(|expr| {
        let literal = choice((
            number(""),
            string('\'').map(Value::Str),
            string('"').map(Value::Str),
            text::keyword("True").to(Value::Bool(true)),
            text::keyword("False").to(Value::Bool(false)),
            text::keyword("None").to(Value::Null),
        ))
        .map(Expr::Literal);

        let items = expr
            .clone()
            .padded()
            .separated_by(just(','))
            .allow_trailing();
        let list = items
            .clone()
            .delimited_by(just('['), just(']'))
            .map(Expr::List);
        let dict = expr
            .clone()
            .padded()
            .then_ignore(just(':'))
            .then(expr.clone().padded())
            .separated_by(just(','))
            .allow_trailing()
            .delimited_by(just('{'), just('}'))
            .map(Expr::Dict);
        let paren = expr.clone().padded().delimited_by(just('('), just(')'));

        let atom = choice((
            literal,
            variable().map(Expr::Variable),
            name().map(Expr::Name),
            list,
            dict,
            paren,
        ))
        .padded()
        .boxed();

        let arg = text::ident()
            .then_ignore(just('=').padded())
            .then(expr.clone())
            .map(|(name, value)| Arg::Keyword(name, value))
            .or(expr.clone().map(Arg::Positional))
            .padded();
        let postfix = choice((
            just('.').ignore_then(text::ident()).map(Postfix::Attr),
            expr.clone()
                .padded()
                .delimited_by(just('['), just(']'))
                .map(Postfix::Index),
            arg.separated_by(just(','))
                .allow_trailing()
                .delimited_by(just('('), just(')'))
                .map(Postfix::Call),
        ));
        let primary = atom.then(postfix.padded().repeated()).foldl(apply).boxed();

        let negative = just('-').ignore_then(number("-")).map(Expr::Literal);
        let unary = negative
            .or(just('-')
                .padded()
                .repeated()
                .then(primary)
                .foldr(|_, e| Expr::Unary(UnaryOp::Neg, Box::new(e))))
            .boxed();

        let product = unary
            .clone()
            .then(
                choice((
                    just("//").to(BinOp::FloorDiv),
                    just('*').to(BinOp::Mul),
                    just('/').to(BinOp::Div),
                    just('%').to(BinOp::Mod),
                ))
                .padded()
                .then(unary)
                .repeated(),
            )
            .foldl(|lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
            .boxed();

        let sum = product
            .clone()
            .then(
                choice((just('+').to(BinOp::Add), just('-').to(BinOp::Sub)))
                    .padded()
                    .then(product)
                    .repeated(),
            )
            .foldl(|lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
            .boxed();

        let comparison = sum
            .clone()
            .then(comparison_op().then(sum).repeated())
            .map(|(first, rest)| {
                if rest.is_empty() {
                    first
                } else {
                    Expr::Compare(Box::new(first), rest)
                }
            })
            .boxed();

        let negation = text::keyword("not")
            .padded()
            .repeated()
            .then(comparison)
            .foldr(|_, e| Expr::Unary(UnaryOp::Not, Box::new(e)))
            .boxed();

        let conjunction = negation
            .clone()
            .then(text::keyword("and").padded().ignore_then(negation).repeated())
            .foldl(|lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs)))
            .boxed();

        conjunction
            .clone()
            .then(text::keyword("or").padded().ignore_then(conjunction).repeated())
            .foldl(|lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs)))
    });
    expr.padded().then_ignore(end())
}
