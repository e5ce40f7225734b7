#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the magnet console.
//!
//! The lexer uses `regal` to produce a bounded token stream and the parser
//! walks the [`catalog`](super::catalog) grammar with `winnow` over those
//! tokens, so neither stage allocates.

use super::catalog::{self, CommandTag, KeywordTag, Node, ValueSpec};
use core::fmt;
use core::ops::Range;
use core::time::Duration;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use crate::charger::ChargerFlags;
use crate::hardpoint::HardpointCommand;

/// Maximum number of tokens produced per console line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;
const MAX_VALUES: usize = 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Duration literal ending in `ms` or `s`.
    #[regex(r"[0-9]+(?:ms|s)", priority = 2)]
    Duration,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Identifier or keyword (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Grammar errors emitted by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    OutOfRange {
        label: &'static str,
        max: u32,
        span: Range<usize>,
    },
    InvalidDuration {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::InvalidInteger { span } => {
                write!(f, "invalid integer literal at {span:?}")
            }
            GrammarErrorKind::OutOfRange { label, max, span } => {
                write!(f, "{label} at {span:?} exceeds {max}")
            }
            GrammarErrorKind::InvalidDuration { span } => {
                write!(f, "invalid duration literal at {span:?}")
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Wrapper type enabling a consistent error surface for consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) if tok.kind != TokenKind::Eol => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                _ => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_integer(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidInteger {
                span: token.span.clone(),
            },
        }
    }

    fn out_of_range(label: &'static str, max: u32, token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::OutOfRange {
                label,
                max,
                span: token.span.clone(),
            },
        }
    }

    fn invalid_duration(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidDuration {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

impl From<LexError> for ParseError<'_> {
    fn from(error: LexError) -> Self {
        ParseError::Lex(error)
    }
}

impl<'a> From<GrammarError<'a>> for ParseError<'a> {
    fn from(error: GrammarError<'a>) -> Self {
        ParseError::Grammar(error)
    }
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    On(OnCommand),
    Off,
    Status,
    Wait(Duration),
    Fault(FaultCommand),
    Hardpoint(HardpointCommand),
    Pwm(u16),
    Button,
    /// `None` asks for the default number of events.
    History(Option<u8>),
    Help(HelpCommand<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OnCommand {
    /// `None` asks for the configured minimum.
    pub repetitions: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultCommand {
    /// Fail the next charger session with these flags.
    Inject(ChargerFlags),
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Tokenize the provided line.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        push_token(
            &mut buffer,
            Token {
                kind: record.token,
                lexeme: &line[span.clone()],
                span,
            },
        )?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        push_token(
            &mut buffer,
            Token {
                kind: TokenKind::Error,
                lexeme: partial.fragment,
                span: start..start + partial.fragment.len(),
            },
        )?;
    }

    Ok(buffer)
}

fn push_token<'a>(buffer: &mut TokenBuffer<'a>, token: Token<'a>) -> Result<(), LexError> {
    buffer.push(token).map_err(|_| LexError::TooManyTokens {
        processed: MAX_TOKENS + 1,
    })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(GrammarError::invalid_token(token).into());
    }

    let (command, rest) = parse_tokens_partial(tokens.as_slice())?;

    if let Some(token) = rest.iter().find(|token| token.kind != TokenKind::Eol) {
        return Err(GrammarError::unexpected("end of command", Some(token)).into());
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let command_token = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        match catalog::find(command_token.lexeme) {
            Some(spec) => {
                let mut state = CommandState::new(spec.tag);
                parse_node(spec.grammar, input, &mut state)?;
                state.finish()
            }
            None => {
                *input = snapshot;
                Err(ErrMode::Backtrack(GrammarError::unexpected(
                    "command keyword",
                    Some(&command_token),
                )))
            }
        }
    }
}

fn parse_node<'src, 'slice>(
    node: &'static Node,
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match node {
        Node::End => Ok(()),
        Node::Value {
            spec,
            optional,
            next,
        } => {
            if at_line_end(input) {
                return if *optional {
                    Ok(())
                } else {
                    Err(ErrMode::Backtrack(GrammarError::unexpected(
                        spec.label(),
                        input.first(),
                    )))
                };
            }

            let value = parse_value(input, *spec)?;
            state.push(value)?;
            parse_node(next, input, state)
        }
        Node::Topic { next } => {
            parse_topic(input, state)?;
            parse_node(next, input, state)
        }
    }
}

fn at_line_end(input: &Input<'_, '_>) -> bool {
    input.first().is_none_or(|token| token.kind == TokenKind::Eol)
}

fn parse_topic<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            state.topic = Some(token.lexeme);
            *input = rest;
            Ok(())
        }
        Some((token, _)) if token.kind == TokenKind::Eol => Ok(()),
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            "identifier",
            Some(token),
        ))),
        None => Ok(()),
    }
}

fn parse_value<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    spec: ValueSpec,
) -> Result<ChoiceValue, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match spec {
        ValueSpec::Integer { label, max } => {
            let integer_token = expect_kind(TokenKind::Integer, label).parse_next(input)?;
            let value = parse_integer(&integer_token).map_err(ErrMode::Cut)?;
            if value > max {
                return Err(ErrMode::Cut(GrammarError::out_of_range(
                    label,
                    max,
                    &integer_token,
                )));
            }
            Ok(ChoiceValue::Integer(value))
        }
        ValueSpec::Duration => {
            let duration_token = expect_kind(TokenKind::Duration, "duration").parse_next(input)?;
            let duration = parse_duration(&duration_token).map_err(ErrMode::Cut)?;
            Ok(ChoiceValue::Duration(duration))
        }
        ValueSpec::Keyword(branches) => {
            let keyword_token = expect_kind(TokenKind::Ident, spec.label()).parse_next(input)?;
            catalog::find_keyword(branches, keyword_token.lexeme)
                .map(|branch| ChoiceValue::Keyword(branch.tag))
                .ok_or_else(|| {
                    ErrMode::Backtrack(GrammarError::unexpected(
                        spec.label(),
                        Some(&keyword_token),
                    ))
                })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChoiceValue {
    Integer(u32),
    Duration(Duration),
    Keyword(KeywordTag),
}

struct CommandState<'a> {
    tag: CommandTag,
    values: HeaplessVec<ChoiceValue, MAX_VALUES>,
    topic: Option<&'a str>,
}

impl<'a> CommandState<'a> {
    fn new(tag: CommandTag) -> Self {
        Self {
            tag,
            values: HeaplessVec::new(),
            topic: None,
        }
    }

    fn push(&mut self, value: ChoiceValue) -> Result<(), ErrMode<GrammarError<'a>>> {
        self.values
            .push(value)
            .map_err(|_| ErrMode::Cut(GrammarError::unexpected("end of command", None)))
    }

    fn finish(self) -> Result<Command<'a>, ErrMode<GrammarError<'a>>> {
        use ChoiceValue::{Duration as Dur, Integer as Int, Keyword as Kw};

        let command = match (self.tag, self.values.as_slice()) {
            (CommandTag::On, []) => Command::On(OnCommand { repetitions: None }),
            (CommandTag::On, [Int(count)]) => Command::On(OnCommand {
                repetitions: Some(*count as u16),
            }),
            (CommandTag::Off, []) => Command::Off,
            (CommandTag::Status, []) => Command::Status,
            (CommandTag::Wait, [Dur(duration)]) => Command::Wait(*duration),
            (CommandTag::Fault, [Kw(keyword)]) => Command::Fault(fault_command(*keyword)),
            (CommandTag::Hardpoint, [Int(id), Int(word)]) => {
                Command::Hardpoint(HardpointCommand {
                    hardpoint_id: *id as u8,
                    command: *word as u16,
                })
            }
            (CommandTag::Pwm, [Int(width)]) => Command::Pwm(*width as u16),
            (CommandTag::Button, []) => Command::Button,
            (CommandTag::History, []) => Command::History(None),
            (CommandTag::History, [Int(count)]) => Command::History(Some(*count as u8)),
            (CommandTag::Help, []) => Command::Help(HelpCommand { topic: self.topic }),
            _ => {
                return Err(ErrMode::Backtrack(GrammarError::unexpected(
                    "command arguments",
                    None,
                )));
            }
        };

        Ok(command)
    }
}

const fn fault_command(keyword: KeywordTag) -> FaultCommand {
    let flags = match keyword {
        KeywordTag::FaultTimeout => ChargerFlags::TIMEOUT,
        KeywordTag::FaultOvervoltage => ChargerFlags::OVERVOLTAGE,
        KeywordTag::FaultSupplyLow => ChargerFlags::SUPPLY_UNDERVOLTAGE,
        KeywordTag::FaultSupplyHigh => ChargerFlags::SUPPLY_OVERVOLTAGE,
        KeywordTag::FaultOvercurrent => ChargerFlags::OVERCURRENT,
        KeywordTag::FaultRange => ChargerFlags::TARGET_OUT_OF_RANGE,
        KeywordTag::FaultClear => return FaultCommand::Clear,
    };
    FaultCommand::Inject(flags)
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

fn parse_integer<'a>(token: &Token<'a>) -> Result<u32, GrammarError<'a>> {
    token
        .lexeme
        .parse::<u32>()
        .map_err(|_| GrammarError::invalid_integer(token))
}

fn parse_duration<'a>(token: &Token<'a>) -> Result<Duration, GrammarError<'a>> {
    let text = token.lexeme;
    if let Some(rest) = text.strip_suffix("ms") {
        let millis = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_millis(millis.into()))
    } else if let Some(rest) = text.strip_suffix('s') {
        let seconds = rest
            .parse::<u32>()
            .map_err(|_| GrammarError::invalid_duration(token))?;
        Ok(Duration::from_secs(seconds.into()))
    } else {
        Err(GrammarError::invalid_duration(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_on_with_and_without_count() {
        assert_eq!(
            parse_ok("on"),
            Command::On(OnCommand { repetitions: None })
        );
        assert_eq!(
            parse_ok("on 5\r\n"),
            Command::On(OnCommand {
                repetitions: Some(5)
            })
        );
    }

    #[test]
    fn parses_wait_units() {
        assert_eq!(
            parse_ok("wait 150ms"),
            Command::Wait(Duration::from_millis(150))
        );
        assert_eq!(parse_ok("wait 3s"), Command::Wait(Duration::from_secs(3)));
    }

    #[test]
    fn parses_fault_keywords() {
        assert_eq!(
            parse_ok("fault timeout"),
            Command::Fault(FaultCommand::Inject(ChargerFlags::TIMEOUT))
        );
        assert_eq!(
            parse_ok("fault supply-low"),
            Command::Fault(FaultCommand::Inject(ChargerFlags::SUPPLY_UNDERVOLTAGE))
        );
        assert_eq!(
            parse_ok("fault clear"),
            Command::Fault(FaultCommand::Clear)
        );
    }

    #[test]
    fn parses_hardpoint_pair() {
        assert_eq!(
            parse_ok("hardpoint 3 0"),
            Command::Hardpoint(HardpointCommand {
                hardpoint_id: 3,
                command: 0,
            })
        );
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_ok("off"), Command::Off);
        assert_eq!(parse_ok("status"), Command::Status);
        assert_eq!(parse_ok("button"), Command::Button);
        assert_eq!(parse_ok("pwm 1900"), Command::Pwm(1_900));
    }

    #[test]
    fn parses_history_with_optional_count() {
        assert_eq!(parse_ok("history"), Command::History(None));
        assert_eq!(parse_ok("history 4"), Command::History(Some(4)));
        match parse("history 13") {
            Err(ParseError::Grammar(err)) => assert!(matches!(
                err.kind,
                GrammarErrorKind::OutOfRange { max: 12, .. }
            )),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help off"),
            Command::Help(HelpCommand { topic: Some("off") })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn supports_case_insensitive_keywords() {
        assert_eq!(
            parse_ok("FAULT Overcurrent"),
            Command::Fault(FaultCommand::Inject(ChargerFlags::OVERCURRENT))
        );
    }

    #[test]
    fn rejects_out_of_range_hardpoint_id() {
        match parse("hardpoint 256 1") {
            Err(ParseError::Grammar(err)) => assert!(matches!(
                err.kind,
                GrammarErrorKind::OutOfRange { max: 255, .. }
            )),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_required_argument() {
        match parse("wait") {
            Err(ParseError::Grammar(err)) => assert_eq!(
                err.kind,
                GrammarErrorKind::UnexpectedEnd {
                    expected: "duration"
                }
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_arguments() {
        assert!(matches!(
            parse("off now"),
            Err(ParseError::Grammar(GrammarError {
                kind: GrammarErrorKind::UnexpectedToken { .. }
            }))
        ));
    }

    #[test]
    fn rejects_invalid_token() {
        match parse("on 2$") {
            Err(ParseError::Grammar(err)) => {
                assert!(matches!(err.kind, GrammarErrorKind::InvalidToken { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn lexer_emits_error_token_for_unknown_symbol() {
        let tokens = lex("pwm 1500$").expect("lexing should succeed");
        let last = tokens.last().expect("expected at least one token");
        assert_eq!(last.kind, TokenKind::Error);
        assert_eq!(last.lexeme, "$");
    }
}
