// AST node types for .gasm kernel listings.
//
// Every node carries a `SimpleSpan` for error reporting in the resolver.
// Numbers are kept as written; range checks happen during resolution.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::isa::Immediate;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A listing: one or more kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub kernels: Vec<KernelDecl>,
    pub span: Span,
}

// ── kernel: 'kernel' IDENT 'simd' INT '{' item* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct KernelDecl {
    pub name: Ident,
    pub simd: u64,
    pub simd_span: Span,
    pub items: Vec<KernelItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KernelItem {
    Alloc(AllocDecl),
    Block(BlockDecl),
}

// ── alloc: 'alloc' (VREG '=' GRF),+ ──

#[derive(Debug, Clone, PartialEq)]
pub struct AllocDecl {
    pub entries: Vec<AllocEntry>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocEntry {
    pub reg: u32,
    pub nr: u32,
    pub subnr: u32,
    pub span: Span,
}

// ── block: 'block' '{' insn* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct BlockDecl {
    pub insns: Vec<InsnDecl>,
    pub span: Span,
}

// ── insn: predicate? IDENT (operands ('=' operands)?)? attrs? ──

#[derive(Debug, Clone, PartialEq)]
pub struct InsnDecl {
    pub predicate: Option<PredicateDecl>,
    pub opcode: Ident,
    pub dst: Vec<OperandDecl>,
    pub src: Vec<OperandDecl>,
    pub attrs: Vec<AttrDecl>,
    pub span: Span,
}

/// `(+flag)` or `(-flag)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateDecl {
    pub inverse: bool,
    pub flag: FlagDecl,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagDecl {
    pub kind: FlagKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlagKind {
    Physical { nr: u32, subnr: u32 },
    Virtual(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperandDecl {
    pub kind: OperandKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandKind {
    Virtual(u32),
    Flag { nr: u32, subnr: u32 },
    Acc(u32),
    Null,
    Imm(Immediate),
    Label(u32),
}

/// `name` or `name=value` inside `[...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDecl {
    pub name: Ident,
    pub value: Option<AttrValue>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(u64, Span),
    Flag(FlagDecl),
}

// ── Identifiers ──

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
