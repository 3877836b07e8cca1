// resolve.rs — Turn a parsed listing into scheduler kernels
//
// Walks the AST, resolves opcode mnemonics and attributes, range-checks
// register numbers, and builds each kernel's `Selection` (instruction ids in
// program order) and optional `RegAllocation`.
//
// Preconditions: `listing` is a well-formed AST from the parser.
// Postconditions: returns every kernel that resolved without errors plus all
//                 accumulated diagnostics.
// Failure modes: unknown opcodes (E0101), bad SIMD widths (E0102), operands
//                out of range (E0103), operand-count overflow (E0104) and
//                malformed attributes (E0100). Resolution continues past errors.
// Side effects: none.

use crate::ast::*;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::Reg;
use crate::isa::{
    FlagReg, Instruction, Kernel, Opcode, Operand, SelectionBuilder, SimdWidth, MAX_ACC_REGISTER,
    MAX_DST_NUM, MAX_FLAG_REGISTER, MAX_SRC_NUM,
};
use crate::regalloc::{GrfReg, RegAllocation, GEN_GRF_COUNT};

/// Largest virtual register number a listing may use.
pub const MAX_VIRTUAL_REG: u32 = u16::MAX as u32;
/// Bytes per general register (sub-register offsets are byte offsets).
pub const GRF_BYTES: u32 = 32;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub kernels: Vec<Kernel>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolveResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Resolve every kernel of `listing`.
pub fn resolve(listing: &Listing) -> ResolveResult {
    let mut kernels = Vec::with_capacity(listing.kernels.len());
    let mut diagnostics = Vec::new();
    for decl in &listing.kernels {
        let mut resolver = KernelResolver::default();
        let kernel = resolver.kernel(decl);
        let failed = resolver.diagnostics.iter().any(Diagnostic::is_error);
        diagnostics.append(&mut resolver.diagnostics);
        if !failed {
            kernels.push(kernel);
        }
    }
    ResolveResult {
        kernels,
        diagnostics,
    }
}

// ── Per-kernel resolver ─────────────────────────────────────────────────────

#[derive(Default)]
struct KernelResolver {
    diagnostics: Vec<Diagnostic>,
}

impl KernelResolver {
    fn error(&mut self, code: crate::diag::DiagCode, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    fn kernel(&mut self, decl: &KernelDecl) -> Kernel {
        let simd_width = match SimdWidth::from_lanes(decl.simd) {
            Some(width) => width,
            None => {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagLevel::Error,
                        decl.simd_span,
                        format!("invalid SIMD width {} in kernel `{}`", decl.simd, decl.name.name),
                    )
                    .with_code(codes::E0102)
                    .with_hint("use `simd 8` or `simd 16`"),
                );
                SimdWidth::Simd8
            }
        };

        let mut builder = SelectionBuilder::new();
        let mut allocation: Option<RegAllocation> = None;
        for item in &decl.items {
            match item {
                KernelItem::Alloc(alloc) => {
                    let map = allocation.get_or_insert_with(RegAllocation::new);
                    for entry in &alloc.entries {
                        if let Some((reg, grf)) = self.alloc_entry(entry) {
                            if map.get(reg).is_some() {
                                self.diagnostics.push(Diagnostic::new(
                                    DiagLevel::Warning,
                                    entry.span,
                                    format!("%{} allocated twice; the last entry wins", reg.0),
                                ));
                            }
                            map.insert(reg, grf);
                        }
                    }
                }
                KernelItem::Block(block) => {
                    builder.block();
                    for insn in &block.insns {
                        if let Some(insn) = self.insn(insn) {
                            builder.push(insn);
                        }
                    }
                }
            }
        }

        Kernel {
            name: decl.name.name.clone(),
            simd_width,
            selection: builder.finish(),
            allocation,
        }
    }

    fn alloc_entry(&mut self, entry: &AllocEntry) -> Option<(Reg, GrfReg)> {
        let reg = self.virtual_reg(entry.reg, entry.span)?;
        if entry.nr >= GEN_GRF_COUNT || entry.subnr >= GRF_BYTES {
            self.error(
                codes::E0103,
                entry.span,
                format!(
                    "g{}.{} is outside the register file (g0-g{}, sub-register 0-{})",
                    entry.nr,
                    entry.subnr,
                    GEN_GRF_COUNT - 1,
                    GRF_BYTES - 1
                ),
            );
            return None;
        }
        Some((
            reg,
            GrfReg {
                nr: entry.nr,
                subnr: entry.subnr,
            },
        ))
    }

    fn virtual_reg(&mut self, n: u32, span: Span) -> Option<Reg> {
        if n > MAX_VIRTUAL_REG {
            self.error(
                codes::E0103,
                span,
                format!("virtual register %{n} out of range (max %{MAX_VIRTUAL_REG})"),
            );
            return None;
        }
        Some(Reg(n))
    }

    fn insn(&mut self, decl: &InsnDecl) -> Option<Instruction> {
        let Some(opcode) = Opcode::from_mnemonic(&decl.opcode.name) else {
            self.error(
                codes::E0101,
                decl.opcode.span,
                format!("unknown opcode `{}`", decl.opcode.name),
            );
            return None;
        };

        if decl.dst.len() > MAX_DST_NUM || decl.src.len() > MAX_SRC_NUM {
            self.error(
                codes::E0104,
                decl.span,
                format!(
                    "`{}` has {} destinations and {} sources (max {} and {})",
                    opcode,
                    decl.dst.len(),
                    decl.src.len(),
                    MAX_DST_NUM,
                    MAX_SRC_NUM
                ),
            );
            return None;
        }

        let before = self.diagnostics.len();
        let dst: Vec<Operand> = decl.dst.iter().filter_map(|op| self.operand(op)).collect();
        let src: Vec<Operand> = decl.src.iter().filter_map(|op| self.operand(op)).collect();
        let mut insn = Instruction::new(opcode, dst, src);

        if let Some(pred) = &decl.predicate {
            if let Some(flag) = self.flag(&pred.flag) {
                insn = insn.with_predicate(flag, pred.inverse);
            }
        }
        for attr in &decl.attrs {
            self.attr(&mut insn, attr);
        }

        (self.diagnostics.len() == before).then_some(insn)
    }

    fn operand(&mut self, decl: &OperandDecl) -> Option<Operand> {
        match decl.kind {
            OperandKind::Virtual(n) => self.virtual_reg(n, decl.span).map(Operand::Virtual),
            OperandKind::Flag { nr, subnr } => {
                self.physical_flag(nr, subnr, decl.span)?;
                Some(Operand::Flag { nr, subnr })
            }
            OperandKind::Acc(nr) => {
                if nr >= MAX_ACC_REGISTER {
                    self.error(
                        codes::E0103,
                        decl.span,
                        format!("accumulator acc{nr} out of range (acc0 only)"),
                    );
                    return None;
                }
                Some(Operand::Acc { nr })
            }
            OperandKind::Null => Some(Operand::Null),
            OperandKind::Imm(imm) => Some(Operand::Imm(imm)),
            OperandKind::Label(n) => Some(Operand::Label(n)),
        }
    }

    fn physical_flag(&mut self, nr: u32, subnr: u32, span: Span) -> Option<()> {
        if nr >= MAX_FLAG_REGISTER || subnr >= 2 {
            self.error(
                codes::E0103,
                span,
                format!(
                    "flag f{nr}.{subnr} out of range (f0.0-f{}.1)",
                    MAX_FLAG_REGISTER - 1
                ),
            );
            return None;
        }
        Some(())
    }

    fn flag(&mut self, decl: &FlagDecl) -> Option<FlagReg> {
        match decl.kind {
            FlagKind::Physical { nr, subnr } => {
                self.physical_flag(nr, subnr, decl.span)?;
                Some(FlagReg::Physical { nr, subnr })
            }
            FlagKind::Virtual(n) => self.virtual_reg(n, decl.span).map(FlagReg::Virtual),
        }
    }

    fn attr(&mut self, insn: &mut Instruction, attr: &AttrDecl) {
        match (attr.name.name.as_str(), &attr.value) {
            ("acc", None) => insn.state.acc_wr_enable = true,
            ("nomask", None) => insn.state.no_mask = true,
            ("bti" | "fn", Some(AttrValue::Int(value, span))) => match u8::try_from(*value) {
                Ok(byte) => insn.function = byte,
                Err(_) => self.error(
                    codes::E0103,
                    *span,
                    format!("`{}={}` does not fit in 8 bits", attr.name.name, value),
                ),
            },
            ("flag", Some(AttrValue::Flag(flag))) => {
                if let Some(flag) = self.flag(flag) {
                    insn.state.flag = flag;
                }
            }
            ("acc" | "nomask" | "bti" | "fn" | "flag", _) => self.error(
                codes::E0100,
                attr.span,
                format!("malformed attribute `{}`", attr.name.name),
            ),
            (name, _) => self.error(
                codes::E0100,
                attr.name.span,
                format!("unknown attribute `{name}`"),
            ),
        }
    }
}
