// id.rs — Stable identifiers for selection instructions and scheduling state
//
// Instruction ids are allocated in program order when a selection is built
// and never change afterwards, so a rescheduled block can always be matched
// back against its original order. DAG node ids are block-local indices into
// the scheduler's node pool.

use serde::Serialize;

/// Virtual register number (pre-allocation register name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Reg(pub u32);

/// Stable identifier for a selection instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InsnId(pub u32);

/// Index of a basic block inside its selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockId(pub u32);

/// Index of a node in the per-block DAG pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Allocator for stable IDs. Produces monotonically increasing IDs in
/// allocation (program) order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_insn: u32,
    next_block: u32,
    next_reg: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_insn(&mut self) -> InsnId {
        let id = InsnId(self.next_insn);
        self.next_insn += 1;
        id
    }

    pub fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    pub fn alloc_reg(&mut self) -> Reg {
        let id = Reg(self.next_reg);
        self.next_reg += 1;
        id
    }

    /// Make sure future register allocations never collide with `reg`.
    pub fn reserve_reg(&mut self, reg: Reg) {
        self.next_reg = self.next_reg.max(reg.0 + 1);
    }

    /// Number of virtual registers handed out or reserved so far.
    pub fn reg_count(&self) -> u32 {
        self.next_reg
    }
}
