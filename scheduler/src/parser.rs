// Parser for .gasm kernel listings.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub listing: Option<Listing>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a listing. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = listing_parser(source);
    let (listing, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        listing,
        errors: all_errors,
    }
}

// ── Main parser builder ──

fn listing_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Listing, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Flags ──

    let flag = select! {
        Token::Flag((nr, subnr)) => FlagKind::Physical { nr, subnr },
        Token::VReg(n) => FlagKind::Virtual(n),
    }
    .map_with(|kind, e| FlagDecl {
        kind,
        span: e.span(),
    });

    let predicate = choice((just(Token::Plus).to(false), just(Token::Minus).to(true)))
        .then(flag.clone())
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map_with(|(inverse, flag), e| PredicateDecl {
            inverse,
            flag,
            span: e.span(),
        });

    // ── Operands ──

    let operand = select! {
        Token::VReg(n) => OperandKind::Virtual(n),
        Token::Flag((nr, subnr)) => OperandKind::Flag { nr, subnr },
        Token::Acc(nr) => OperandKind::Acc(nr),
        Token::Null => OperandKind::Null,
        Token::Imm(imm) => OperandKind::Imm(imm),
        Token::Label(n) => OperandKind::Label(n),
    }
    .map_with(|kind, e| OperandDecl {
        kind,
        span: e.span(),
    });

    let operand_list = operand
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>();

    // `dsts = srcs`, or only sources when there is no `=`.
    let operands = operand_list
        .clone()
        .then(
            just(Token::Equals)
                .ignore_then(operand_list.clone().or_not())
                .or_not(),
        )
        .map(|(first, rest)| match rest {
            Some(src) => (first, src.unwrap_or_default()),
            None => (Vec::new(), first),
        })
        .or_not()
        .map(Option::unwrap_or_default);

    // ── Attributes ──

    let attr_value = select! {
        Token::Int(n) = e => AttrValue::Int(n, e.span()),
    }
    .or(flag.clone().map(AttrValue::Flag));

    let attr = ident
        .clone()
        .then(just(Token::Equals).ignore_then(attr_value).or_not())
        .map_with(|(name, value), e| AttrDecl {
            name,
            value,
            span: e.span(),
        });

    let attrs = attr
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .or_not()
        .map(Option::unwrap_or_default);

    // ── Instruction ──

    let insn = predicate
        .or_not()
        .then(ident.clone())
        .then(operands)
        .then(attrs)
        .map_with(|(((predicate, opcode), (dst, src)), attrs), e| InsnDecl {
            predicate,
            opcode,
            dst,
            src,
            attrs,
            span: e.span(),
        });

    // ── Block ──

    let block = just(Token::Block)
        .ignore_then(
            insn.repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|insns, e| BlockDecl {
            insns,
            span: e.span(),
        });

    // ── Allocation ──

    let alloc_entry = select! { Token::VReg(n) => n }
        .then_ignore(just(Token::Equals))
        .then(select! { Token::Grf(grf) => grf })
        .map_with(|(reg, (nr, subnr)), e| AllocEntry {
            reg,
            nr,
            subnr,
            span: e.span(),
        });

    let alloc = just(Token::Alloc)
        .ignore_then(
            alloc_entry
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map_with(|entries, e| AllocDecl {
            entries,
            span: e.span(),
        });

    let item = choice((alloc.map(KernelItem::Alloc), block.map(KernelItem::Block)));

    // ── Kernel ──

    let simd = just(Token::Simd).ignore_then(select! {
        Token::Int(n) = e => (n, e.span()),
    });

    let kernel = just(Token::Kernel)
        .ignore_then(ident)
        .then(simd)
        .then(
            item.repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((name, (simd, simd_span)), items), e| KernelDecl {
            name,
            simd,
            simd_span,
            items,
            span: e.span(),
        });

    // ── Listing ──

    kernel
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|kernels, e| Listing {
            kernels,
            span: e.span(),
        })
}

// ── Tests ──
