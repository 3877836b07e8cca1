// Lexer for .gasm kernel listings.
//
// Tokenizes the textual selection format: kernels, register allocation
// lines, blocks and instructions. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters and out-of-range literals produce
//                `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

use crate::isa::Immediate;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Listing token types.
///
/// Register-like operands are lexed whole (`%3`, `f0.1`, `acc0`, `g4.2`) and
/// carry their parsed numbers. Identifiers (opcodes, kernel names, attribute
/// names) carry no value; use the span to retrieve the text.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|;[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("kernel")]
    Kernel,
    #[token("simd")]
    Simd,
    #[token("alloc")]
    Alloc,
    #[token("block")]
    Block,
    #[token("null")]
    Null,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,

    // ── Operands ──
    /// `%N`: virtual register.
    #[regex(r"%[0-9]+", parse_prefixed)]
    VReg(u32),

    /// `f<nr>.<subnr>`: physical flag.
    #[regex(r"f[0-9]+\.[0-9]+", parse_pair)]
    Flag((u32, u32)),

    /// `acc<nr>`: accumulator.
    #[regex(r"acc[0-9]+", parse_acc)]
    Acc(u32),

    /// `g<nr>` or `g<nr>.<subnr>`: physical general register.
    #[regex(r"g[0-9]+(\.[0-9]+)?", parse_grf)]
    Grf((u32, u32)),

    /// `@N`: label.
    #[regex(r"@[0-9]+", parse_prefixed)]
    Label(u32),

    /// `#int` or `#float`.
    #[regex(r"#-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_immediate)]
    Imm(Immediate),

    /// Bare integer (SIMD width, attribute values).
    #[regex(r"[0-9]+", parse_int)]
    Int(u64),

    // ── Identifiers ──
    // Placed after keywords; logos prioritises fixed `#[token]` matches
    // and the register regexes over this catch-all.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Kernel => write!(f, "kernel"),
            Token::Simd => write!(f, "simd"),
            Token::Alloc => write!(f, "alloc"),
            Token::Block => write!(f, "block"),
            Token::Null => write!(f, "null"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::VReg(n) => write!(f, "%{n}"),
            Token::Flag((nr, subnr)) => write!(f, "f{nr}.{subnr}"),
            Token::Acc(nr) => write!(f, "acc{nr}"),
            Token::Grf((nr, 0)) => write!(f, "g{nr}"),
            Token::Grf((nr, subnr)) => write!(f, "g{nr}.{subnr}"),
            Token::Label(n) => write!(f, "@{n}"),
            Token::Imm(imm) => write!(f, "{imm}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_prefixed(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()[1..].parse().ok()
}

fn parse_pair(lex: &mut logos::Lexer<'_, Token>) -> Option<(u32, u32)> {
    let (nr, subnr) = lex.slice()[1..].split_once('.')?;
    Some((nr.parse().ok()?, subnr.parse().ok()?))
}

fn parse_acc(lex: &mut logos::Lexer<'_, Token>) -> Option<u32> {
    lex.slice()["acc".len()..].parse().ok()
}

fn parse_grf(lex: &mut logos::Lexer<'_, Token>) -> Option<(u32, u32)> {
    let body = &lex.slice()[1..];
    match body.split_once('.') {
        Some((nr, subnr)) => Some((nr.parse().ok()?, subnr.parse().ok()?)),
        None => Some((body.parse().ok()?, 0)),
    }
}

fn parse_immediate(lex: &mut logos::Lexer<'_, Token>) -> Option<Immediate> {
    let body = &lex.slice()[1..];
    if body.contains(['.', 'e', 'E']) {
        body.parse().ok().map(Immediate::Float)
    } else {
        body.parse().ok().map(Immediate::Int)
    }
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a listing into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}
