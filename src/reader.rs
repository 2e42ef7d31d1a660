//! Source text to [`Value`] trees.
//!
//! The grammar is small enough that each construct gets its own nom parser:
//! sequences (`(..)`, `[..]`, `{..}`), reader macros (`'x`, `` `x ``, `~x`, `~@x`,
//! `@x`), metadata (`^{..} x`), strings and bare atoms. Parsers share a
//! crate-private error type, [`SyntaxError`], so the precise reason for a failure
//! survives nom's backtracking and can be turned into a [`ParseError`] with a
//! context snippet at the failure position.

use std::rc::Rc;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, one_of},
    combinator::{recognize, value},
    error::ErrorKind,
    multi::many0_count,
    sequence::pair,
};

use crate::ast::{NumberType, Value, list, sym};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Characters that end a bare token (in addition to whitespace)
const SPECIAL_CHARS: &str = "()[]{};\"'`@^";

/// Reader limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Maximum nesting of sequences and reader macros
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SyntaxErrorKind {
    Nom(ErrorKind),
    UnterminatedString,
    InvalidEscape(char),
    Unclosed(char),
    UnexpectedCloser(char),
    UnexpectedEnd,
    TooDeeplyNested(usize),
    MissingMetadataMap,
}

/// A syntax failure and the input remaining where it happened
#[derive(Debug, Clone, PartialEq)]
struct SyntaxError<'a> {
    input: &'a str,
    kind: SyntaxErrorKind,
}

impl<'a> nom::error::ParseError<&'a str> for SyntaxError<'a> {
    fn from_error_kind(input: &'a str, kind: ErrorKind) -> Self {
        SyntaxError {
            input,
            kind: SyntaxErrorKind::Nom(kind),
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, O> = IResult<&'a str, O, SyntaxError<'a>>;

/// Abort the parse: failures are not retried by `alt`
fn fail<O>(input: &str, kind: SyntaxErrorKind) -> PResult<'_, O> {
    Err(nom::Err::Failure(SyntaxError { input, kind }))
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | ',')
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Whitespace, commas and `;` comments (to end of line)
fn trivia(input: &str) -> PResult<'_, ()> {
    let (input, _) = many0_count(alt((
        take_while1(is_whitespace),
        recognize(pair(char(';'), take_while(|c: char| c != '\n'))),
    )))
    .parse(input)?;
    Ok((input, ()))
}

fn skip_trivia(input: &str) -> &str {
    match trivia(input) {
        Ok((rest, ())) => rest,
        Err(_) => input,
    }
}

/// Parse one form, after any leading trivia
fn parse_form(input: &str, depth: usize, max_depth: usize) -> PResult<'_, Value> {
    if depth >= max_depth {
        return fail(input, SyntaxErrorKind::TooDeeplyNested(max_depth));
    }
    let (input, ()) = trivia(input)?;
    match input.chars().next() {
        None => fail(input, SyntaxErrorKind::UnexpectedEnd),
        Some(c @ (')' | ']' | '}')) => fail(input, SyntaxErrorKind::UnexpectedCloser(c)),
        Some(_) => alt((
            |input| parse_sequence(input, depth, max_depth),
            |input| parse_reader_macro(input, depth, max_depth),
            |input| parse_metadata(input, depth, max_depth),
            parse_string,
            parse_atom,
        ))
        .parse(input),
    }
}

/// `(..)` list, `[..]` vector or `{..}` hash-map
fn parse_sequence(input: &str, depth: usize, max_depth: usize) -> PResult<'_, Value> {
    let (mut input, open) = one_of("([{").parse(input)?;
    let close = closer_for(open);
    let mut items = Vec::new();

    loop {
        let (rest, ()) = trivia(input)?;
        match rest.chars().next() {
            None => return fail(rest, SyntaxErrorKind::Unclosed(close)),
            Some(c) if c == close => {
                input = &rest[c.len_utf8()..];
                break;
            }
            Some(_) => {
                let (rest, item) = parse_form(rest, depth + 1, max_depth)?;
                items.push(item);
                input = rest;
            }
        }
    }

    let items = Rc::new(items);
    let seq = match open {
        '(' => Value::List(items),
        '[' => Value::Vector(items),
        _ => Value::HashMap(items),
    };
    Ok((input, seq))
}

/// Prefix shorthands that wrap the next form: `'x` is `(quote x)` and so on
fn parse_reader_macro(input: &str, depth: usize, max_depth: usize) -> PResult<'_, Value> {
    let (input, name) = alt((
        value("splice-unquote", tag("~@")),
        value("unquote", char('~')),
        value("quote", char('\'')),
        value("quasiquote", char('`')),
        value("deref", char('@')),
    ))
    .parse(input)?;
    let (input, form) = parse_form(input, depth + 1, max_depth)?;
    Ok((input, list(vec![sym(name), form])))
}

/// `^{meta} target` is `(with-meta target {meta})`
fn parse_metadata(input: &str, depth: usize, max_depth: usize) -> PResult<'_, Value> {
    let (input, _) = char('^').parse(input)?;
    let (input, ()) = trivia(input)?;
    if !input.starts_with('{') {
        return fail(input, SyntaxErrorKind::MissingMetadataMap);
    }
    let (input, meta) = parse_sequence(input, depth + 1, max_depth)?;
    let (input, target) = parse_form(input, depth + 1, max_depth)?;
    Ok((input, list(vec![sym("with-meta"), target, meta])))
}

/// String literal. Only `\n`, `\"` and `\\` are valid escapes.
fn parse_string(input: &str) -> PResult<'_, Value> {
    let (body, _) = char('"').parse(input)?;

    // Locate the closing quote first so that an unterminated string is reported
    // as such even when it also contains a bad escape.
    let mut escaped = false;
    let mut end = None;
    for (i, c) in body.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            end = Some(i);
            break;
        }
    }
    let Some(end) = end else {
        return fail(&input[input.len()..], SyntaxErrorKind::UnterminatedString);
    };

    let raw = &body[..end];
    let mut text = String::with_capacity(raw.len());
    let mut chars = raw.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => text.push('\n'),
            Some((_, '"')) => text.push('"'),
            Some((_, '\\')) => text.push('\\'),
            Some((_, other)) => return fail(&body[i..], SyntaxErrorKind::InvalidEscape(other)),
            None => return fail(&body[i..], SyntaxErrorKind::UnterminatedString),
        }
    }

    Ok((&body[end + 1..], Value::String(text)))
}

/// Numbers, keywords, `true`/`false`/`nil` and symbols
fn parse_atom(input: &str) -> PResult<'_, Value> {
    let (rest, token) =
        take_while1(|c: char| !is_whitespace(c) && !SPECIAL_CHARS.contains(c)).parse(input)?;
    Ok((rest, classify_token(token)))
}

fn classify_token(token: &str) -> Value {
    if token.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        // Out-of-range or malformed numerals like `1+` or `-` stay symbols
        return match token.parse::<NumberType>() {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::Symbol(token.to_owned()),
        };
    }
    if let Some(name) = token.strip_prefix(':') {
        return Value::Keyword(name.to_owned());
    }
    match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "nil" => Value::Nil,
        _ => Value::Symbol(token.to_owned()),
    }
}

fn to_parse_error(source: &str, err: nom::Err<SyntaxError<'_>>) -> Error {
    let err = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            return Error::ParseError(ParseError::from_message(
                ParseErrorKind::Incomplete,
                "incomplete input",
            ));
        }
    };

    let byte_offset = source.len().saturating_sub(err.input.len());
    let char_offset = source
        .get(..byte_offset)
        .map_or(0, |consumed| consumed.chars().count());
    let next_char = err.input.chars().next().map(String::from);

    let (kind, message, found) = match err.kind {
        SyntaxErrorKind::Nom(kind) => (
            ParseErrorKind::InvalidSyntax,
            format!("invalid syntax ({kind:?})"),
            next_char,
        ),
        SyntaxErrorKind::UnterminatedString => (
            ParseErrorKind::Incomplete,
            "expected closing quote, got end of input".to_owned(),
            None,
        ),
        SyntaxErrorKind::InvalidEscape(c) => (
            ParseErrorKind::InvalidSyntax,
            format!("invalid escape sequence '\\{c}' in string"),
            Some(format!("\\{c}")),
        ),
        SyntaxErrorKind::Unclosed(c) => (
            ParseErrorKind::Incomplete,
            format!("expected '{c}', got end of input"),
            None,
        ),
        SyntaxErrorKind::UnexpectedCloser(c) => (
            ParseErrorKind::InvalidSyntax,
            format!("unexpected '{c}'"),
            Some(c.to_string()),
        ),
        SyntaxErrorKind::UnexpectedEnd => (
            ParseErrorKind::Incomplete,
            "expected form, got end of input".to_owned(),
            None,
        ),
        SyntaxErrorKind::TooDeeplyNested(max) => (
            ParseErrorKind::TooDeeplyNested,
            format!("expression too deeply nested (max depth: {max})"),
            next_char,
        ),
        SyntaxErrorKind::MissingMetadataMap => (
            ParseErrorKind::InvalidSyntax,
            "expected '{' after '^'".to_owned(),
            next_char,
        ),
    };

    Error::ParseError(ParseError::with_context_and_found(
        kind,
        message,
        source,
        char_offset,
        found,
    ))
}

/// Reads forms one at a time from a source buffer.
///
/// After a parse error the rest of the buffer is discarded.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    source: &'a str,
    remaining: &'a str,
    config: ParseConfig,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_config(source, ParseConfig::default())
    }

    pub fn with_config(source: &'a str, config: ParseConfig) -> Self {
        Reader {
            source,
            remaining: source,
            config,
        }
    }

    /// Whether anything other than whitespace and comments is left
    pub fn has_more(&self) -> bool {
        !skip_trivia(self.remaining).is_empty()
    }

    /// Read the next form, or [`Value::Undefined`] when the buffer is exhausted
    pub fn parse_one(&mut self) -> Result<Value, Error> {
        let start = skip_trivia(self.remaining);
        if start.is_empty() {
            self.remaining = start;
            return Ok(Value::Undefined);
        }

        match parse_form(start, 0, self.config.max_depth) {
            Ok((rest, form)) => {
                self.remaining = rest;
                log::trace!(target: "reader", "read {form}");
                Ok(form)
            }
            Err(err) => {
                self.remaining = "";
                let err = to_parse_error(self.source, err);
                log::debug!(target: "reader", "{err}");
                Err(err)
            }
        }
    }
}

/// Yields each form in turn; stops after the last form or the first error
impl Iterator for Reader<'_> {
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parse_one() {
            Ok(Value::Undefined) => None,
            other => Some(other),
        }
    }
}

/// Read the first form of `input` ([`Value::Undefined`] if there is none)
pub fn read_str(input: &str) -> Result<Value, Error> {
    Reader::new(input).parse_one()
}
