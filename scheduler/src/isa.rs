// isa.rs — Selection instruction model consumed by the scheduler
//
// Instructions are "almost Gen" instructions: opcode, destination and source
// operands, execution state (predicate, flag, accumulator write enable) and
// an 8-bit function field carrying the binding table index of memory
// messages. Operands still name virtual registers; after register allocation
// the mapping lives in `regalloc::RegAllocation`, the operands are not
// rewritten.
//
// Preconditions: instructions are built through `Instruction::new` (operand
//                counts checked) and placed with `SelectionBuilder`.
// Postconditions: every placed instruction has a unique, program-ordered id.
// Failure modes: operand-count contract violations panic.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::id::{BlockId, IdAllocator, InsnId, Reg};
use crate::regalloc::RegAllocation;

/// No more than 4 destinations (samples and untyped reads).
pub const MAX_DST_NUM: usize = 4;
/// No more than 8 sources (typed writes).
pub const MAX_SRC_NUM: usize = 8;
/// Number of physical flag registers.
pub const MAX_FLAG_REGISTER: u32 = 8;
/// Number of physical accumulators.
pub const MAX_ACC_REGISTER: u32 = 1;
/// Binding table index reserved for shared local memory.
pub const LOCAL_MEMORY_BTI: u8 = 0xfe;

// ── SIMD width ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SimdWidth {
    Simd8,
    Simd16,
}

impl SimdWidth {
    pub fn from_lanes(lanes: u64) -> Option<SimdWidth> {
        match lanes {
            8 => Some(SimdWidth::Simd8),
            16 => Some(SimdWidth::Simd16),
            _ => None,
        }
    }

    pub fn lanes(self) -> u32 {
        match self {
            SimdWidth::Simd8 => 8,
            SimdWidth::Simd16 => 16,
        }
    }
}

// ── Opcodes ─────────────────────────────────────────────────────────────────

/// Scheduling family of an opcode. The latency model is keyed by family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpFamily {
    Label,
    Unary,
    Binary,
    Ternary,
    Compare,
    Jump,
    Eot,
    NoOp,
    Wait,
    Math,
    Barrier,
    UntypedRead,
    UntypedWrite,
    ByteGather,
    ByteScatter,
}

macro_rules! declare_opcodes {
    ($($variant:ident => $mnemonic:literal, $family:ident;)*) => {
        /// Selection opcodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            pub fn family(self) -> OpFamily {
                match self {
                    $(Opcode::$variant => OpFamily::$family,)*
                }
            }

            pub fn from_mnemonic(name: &str) -> Option<Opcode> {
                match name {
                    $($mnemonic => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

declare_opcodes! {
    Label => "label", Label;
    Mov => "mov", Unary;
    Rndz => "rndz", Unary;
    Rnde => "rnde", Unary;
    Rndd => "rndd", Unary;
    Rndu => "rndu", Unary;
    Frc => "frc", Unary;
    Lzd => "lzd", Unary;
    Not => "not", Unary;
    Sel => "sel", Binary;
    And => "and", Binary;
    Or => "or", Binary;
    Xor => "xor", Binary;
    Shr => "shr", Binary;
    Shl => "shl", Binary;
    Rsr => "rsr", Binary;
    Rsl => "rsl", Binary;
    Asr => "asr", Binary;
    Add => "add", Binary;
    Mul => "mul", Binary;
    Mac => "mac", Binary;
    Mach => "mach", Binary;
    Mad => "mad", Ternary;
    Math => "math", Math;
    Cmp => "cmp", Compare;
    Jmpi => "jmpi", Jump;
    Eot => "eot", Eot;
    Nop => "nop", NoOp;
    Wait => "wait", Wait;
    Barrier => "barrier", Barrier;
    UntypedRead => "untyped_read", UntypedRead;
    UntypedWrite => "untyped_write", UntypedWrite;
    ByteGather => "byte_gather", ByteGather;
    ByteScatter => "byte_scatter", ByteScatter;
}

impl Opcode {
    pub fn reads_memory(self) -> bool {
        matches!(self, Opcode::UntypedRead | Opcode::ByteGather)
    }

    pub fn writes_memory(self) -> bool {
        matches!(self, Opcode::UntypedWrite | Opcode::ByteScatter)
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Jmpi)
    }

    pub fn is_label(self) -> bool {
        matches!(self, Opcode::Label)
    }

    pub fn is_eot(self) -> bool {
        matches!(self, Opcode::Eot)
    }

    /// Compares write the instruction's flag register.
    pub fn is_compare(self) -> bool {
        matches!(self, Opcode::Cmp)
    }

    /// Workgroup synchronization: reads and writes both memory domains.
    pub fn is_barrier_like(self) -> bool {
        matches!(self, Opcode::Barrier | Opcode::Wait)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// ── Operands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Immediate {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int(v) => write!(f, "#{v}"),
            Immediate::Float(v) => write!(f, "#{v:?}"),
        }
    }
}

/// A register operand as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Operand {
    /// Virtual general register (allocated later, or mapped post-allocation).
    Virtual(Reg),
    /// Physical flag register `f<nr>.<subnr>`.
    Flag { nr: u32, subnr: u32 },
    /// Physical accumulator `acc<nr>`.
    Acc { nr: u32 },
    /// The null architecture register.
    Null,
    Imm(Immediate),
    /// Jump target / label index.
    Label(u32),
}

impl Operand {
    /// Immediates, labels and the null register carry no dependency.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Operand::Null | Operand::Imm(_) | Operand::Label(_))
    }

    pub fn as_reg(&self) -> Option<Reg> {
        match self {
            Operand::Virtual(reg) => Some(*reg),
            _ => None,
        }
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Virtual(reg)
    }
}

impl From<Immediate> for Operand {
    fn from(imm: Immediate) -> Self {
        Operand::Imm(imm)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Virtual(reg) => write!(f, "%{}", reg.0),
            Operand::Flag { nr, subnr } => write!(f, "f{nr}.{subnr}"),
            Operand::Acc { nr } => write!(f, "acc{nr}"),
            Operand::Null => write!(f, "null"),
            Operand::Imm(imm) => write!(f, "{imm}"),
            Operand::Label(index) => write!(f, "@{index}"),
        }
    }
}

// ── Execution state ─────────────────────────────────────────────────────────

/// Flag register: a physical flag, or a virtual boolean register that flag
/// allocation has not yet turned into a physical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlagReg {
    Physical { nr: u32, subnr: u32 },
    Virtual(Reg),
}

impl Default for FlagReg {
    fn default() -> Self {
        FlagReg::Physical { nr: 0, subnr: 0 }
    }
}

impl fmt::Display for FlagReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagReg::Physical { nr, subnr } => write!(f, "f{nr}.{subnr}"),
            FlagReg::Virtual(reg) => write!(f, "%{}", reg.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Predicate {
    #[default]
    None,
    Normal,
    Inverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InsnState {
    pub predicate: Predicate,
    /// Flag read by the predicate and written by compares.
    pub flag: FlagReg,
    pub acc_wr_enable: bool,
    pub no_mask: bool,
}

// ── Instruction ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub id: InsnId,
    pub opcode: Opcode,
    pub dst: Vec<Operand>,
    pub src: Vec<Operand>,
    pub state: InsnState,
    /// BTI for memory messages, math function / condition otherwise.
    pub function: u8,
}

impl Instruction {
    /// Create an unplaced instruction. Its id is assigned by
    /// `SelectionBuilder::push`.
    pub fn new(opcode: Opcode, dst: Vec<Operand>, src: Vec<Operand>) -> Self {
        assert!(
            dst.len() <= MAX_DST_NUM,
            "{} has {} destinations (max {})",
            opcode,
            dst.len(),
            MAX_DST_NUM
        );
        assert!(
            src.len() <= MAX_SRC_NUM,
            "{} has {} sources (max {})",
            opcode,
            src.len(),
            MAX_SRC_NUM
        );
        Instruction {
            id: InsnId(u32::MAX),
            opcode,
            dst,
            src,
            state: InsnState::default(),
            function: 0,
        }
    }

    /// One destination, one source.
    pub fn alu1(opcode: Opcode, dst: impl Into<Operand>, src: impl Into<Operand>) -> Self {
        Self::new(opcode, vec![dst.into()], vec![src.into()])
    }

    /// One destination, two sources.
    pub fn alu2(
        opcode: Opcode,
        dst: impl Into<Operand>,
        src0: impl Into<Operand>,
        src1: impl Into<Operand>,
    ) -> Self {
        Self::new(opcode, vec![dst.into()], vec![src0.into(), src1.into()])
    }

    pub fn label(index: u32) -> Self {
        Self::new(Opcode::Label, Vec::new(), vec![Operand::Label(index)])
    }

    pub fn jmpi(target: u32) -> Self {
        Self::new(Opcode::Jmpi, Vec::new(), vec![Operand::Label(target)])
    }

    pub fn with_predicate(mut self, flag: FlagReg, inverse: bool) -> Self {
        self.state.predicate = if inverse {
            Predicate::Inverse
        } else {
            Predicate::Normal
        };
        self.state.flag = flag;
        self
    }

    pub fn with_flag(mut self, flag: FlagReg) -> Self {
        self.state.flag = flag;
        self
    }

    pub fn with_acc_write(mut self) -> Self {
        self.state.acc_wr_enable = true;
        self
    }

    pub fn with_no_mask(mut self) -> Self {
        self.state.no_mask = true;
        self
    }

    pub fn with_bti(mut self, bti: u8) -> Self {
        self.function = bti;
        self
    }

    pub fn with_function(mut self, function: u8) -> Self {
        self.function = function;
        self
    }

    pub fn reads_memory(&self) -> bool {
        self.opcode.reads_memory()
    }

    pub fn writes_memory(&self) -> bool {
        self.opcode.writes_memory()
    }

    pub fn is_memory_access(&self) -> bool {
        self.reads_memory() || self.writes_memory()
    }

    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    pub fn is_label(&self) -> bool {
        self.opcode.is_label()
    }

    pub fn is_predicated(&self) -> bool {
        self.state.predicate != Predicate::None
    }

    /// Instructions nothing may be reordered across, in either direction.
    pub fn is_schedule_barrier(&self) -> bool {
        self.opcode.is_branch()
            || self.opcode.is_label()
            || self.opcode.is_eot()
            || self.opcode.is_barrier_like()
    }

    /// Virtual registers named by this instruction, flags included.
    pub fn virtual_regs(&self) -> impl Iterator<Item = Reg> + '_ {
        let flag = match self.state.flag {
            FlagReg::Virtual(reg) if self.is_predicated() || self.opcode.is_compare() => {
                Some(reg)
            }
            _ => None,
        };
        self.dst
            .iter()
            .chain(self.src.iter())
            .filter_map(Operand::as_reg)
            .chain(flag)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.predicate {
            Predicate::None => {}
            Predicate::Normal => write!(f, "(+{}) ", self.state.flag)?,
            Predicate::Inverse => write!(f, "(-{}) ", self.state.flag)?,
        }
        write!(f, "{}", self.opcode)?;
        if !self.dst.is_empty() {
            write!(f, " {} =", join_operands(&self.dst))?;
        }
        if !self.src.is_empty() {
            write!(f, " {}", join_operands(&self.src))?;
        }

        let mut attrs = Vec::new();
        if self.state.acc_wr_enable {
            attrs.push("acc".to_string());
        }
        if self.state.no_mask {
            attrs.push("nomask".to_string());
        }
        if self.is_memory_access() {
            attrs.push(format!("bti={}", self.function));
        } else if self.function != 0 {
            attrs.push(format!("fn={}", self.function));
        }
        if self.opcode.is_compare() {
            attrs.push(format!("flag={}", self.state.flag));
        }
        if !attrs.is_empty() {
            write!(f, " [{}]", attrs.join(", "))?;
        }
        Ok(())
    }
}

fn join_operands(ops: &[Operand]) -> String {
    ops.iter()
        .map(|op| op.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Blocks and selections ───────────────────────────────────────────────────

/// The instructions emitted for one IR basic block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionBlock {
    pub id: BlockId,
    pub insns: Vec<Instruction>,
}

/// Instruction selection result for a kernel: its blocks in layout order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub blocks: Vec<SelectionBlock>,
    reg_num: u32,
}

impl Selection {
    /// Number of virtual registers (temporaries included).
    pub fn reg_num(&self) -> u32 {
        self.reg_num
    }

    /// Number of instructions of the largest block.
    pub fn largest_block_size(&self) -> usize {
        self.blocks.iter().map(|b| b.insns.len()).max().unwrap_or(0)
    }

    pub fn insn_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insns.len()).sum()
    }
}

/// Builds a `Selection`, assigning program-ordered instruction ids.
#[derive(Debug, Default)]
pub struct SelectionBuilder {
    ids: IdAllocator,
    blocks: Vec<SelectionBlock>,
}

impl SelectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh virtual register.
    pub fn reg(&mut self) -> Reg {
        self.ids.alloc_reg()
    }

    /// Start a new block; following pushes go into it.
    pub fn block(&mut self) -> BlockId {
        let id = self.ids.alloc_block();
        self.blocks.push(SelectionBlock {
            id,
            insns: Vec::new(),
        });
        id
    }

    /// Append to the current block.
    pub fn push(&mut self, mut insn: Instruction) -> InsnId {
        if self.blocks.is_empty() {
            self.block();
        }
        for reg in insn.virtual_regs().collect::<Vec<_>>() {
            self.ids.reserve_reg(reg);
        }
        insn.id = self.ids.alloc_insn();
        let id = insn.id;
        if let Some(block) = self.blocks.last_mut() {
            block.insns.push(insn);
        }
        id
    }

    pub fn finish(self) -> Selection {
        Selection {
            reg_num: self.ids.reg_count(),
            blocks: self.blocks,
        }
    }
}

// ── Kernel ──────────────────────────────────────────────────────────────────

/// A kernel: its selection plus the global facts the scheduler consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kernel {
    pub name: String,
    pub simd_width: SimdWidth,
    pub selection: Selection,
    pub allocation: Option<RegAllocation>,
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "kernel {} simd {} {{",
            self.name,
            self.simd_width.lanes()
        )?;
        if let Some(allocation) = &self.allocation {
            if !allocation.is_empty() {
                writeln!(f, "  {allocation}")?;
            }
        }
        for block in &self.selection.blocks {
            writeln!(f, "  block {{")?;
            for insn in &block.insns {
                writeln!(f, "    {insn}")?;
            }
            writeln!(f, "  }}")?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        assert_eq!(Opcode::from_mnemonic("fma"), None);
    }

    #[test]
    fn facets_follow_opcode() {
        assert!(Opcode::UntypedRead.reads_memory());
        assert!(Opcode::ByteScatter.writes_memory());
        assert!(!Opcode::Add.reads_memory());
        assert!(Opcode::Cmp.is_compare());
        assert!(Opcode::Wait.is_barrier_like());
    }

    #[test]
    fn schedule_barriers() {
        let barriers: Vec<Opcode> = Opcode::ALL
            .iter()
            .copied()
            .filter(|op| Instruction::new(*op, vec![], vec![]).is_schedule_barrier())
            .collect();
        assert_eq!(
            barriers,
            vec![
                Opcode::Label,
                Opcode::Jmpi,
                Opcode::Eot,
                Opcode::Wait,
                Opcode::Barrier
            ]
        );
    }

    #[test]
    #[should_panic(expected = "destinations")]
    fn too_many_destinations_panics() {
        Instruction::new(Opcode::UntypedRead, vec![Operand::Null; 5], vec![]);
    }

    #[test]
    fn display_listing_syntax() {
        let insn = Instruction::alu2(Opcode::Add, Reg(2), Reg(1), Immediate::Int(1))
            .with_predicate(FlagReg::Physical { nr: 0, subnr: 1 }, false)
            .with_acc_write();
        assert_eq!(insn.to_string(), "(+f0.1) add %2 = %1, #1 [acc]");

        let cmp = Instruction::alu2(Opcode::Cmp, Operand::Null, Reg(2), Immediate::Float(4.0))
            .with_flag(FlagReg::Virtual(Reg(9)));
        assert_eq!(cmp.to_string(), "cmp null = %2, #4.0 [flag=%9]");

        let store = Instruction::new(
            Opcode::UntypedWrite,
            vec![],
            vec![Reg(0).into(), Reg(1).into()],
        )
        .with_bti(LOCAL_MEMORY_BTI);
        assert_eq!(store.to_string(), "untyped_write %0, %1 [bti=254]");
        assert_eq!(Instruction::label(3).to_string(), "label @3");
    }

    #[test]
    fn builder_assigns_ids_and_register_count() {
        let mut b = SelectionBuilder::new();
        b.block();
        let r0 = b.reg();
        let i0 = b.push(Instruction::alu1(Opcode::Mov, r0, Immediate::Int(0)));
        let i1 = b.push(Instruction::alu1(Opcode::Mov, Reg(6), r0));
        b.block();
        let i2 = b.push(
            Instruction::alu2(Opcode::Cmp, Operand::Null, r0, Immediate::Int(0))
                .with_flag(FlagReg::Virtual(Reg(11))),
        );
        let sel = b.finish();
        assert_eq!((i0, i1, i2), (InsnId(0), InsnId(1), InsnId(2)));
        assert_eq!(sel.reg_num(), 12);
        assert_eq!(sel.blocks.len(), 2);
        assert_eq!(sel.largest_block_size(), 2);
        assert_eq!(sel.insn_count(), 3);
    }
}
