// deps.rs — Resource indexing and dependency tracking for one basic block
//
// Every trackable resource (general register, flag, accumulator, memory
// domain) maps to a flat slot. The tracker walks a block three times:
//
//   1. forward: read-after-write and write-after-write edges,
//   2. backward: write-after-read edges (the forward scan cannot see a
//      later writer of something an earlier instruction reads),
//   3. barrier closure: labels, branches, end-of-thread and synchronization
//      instructions are ordered against every other instruction.
//
// Every edge goes from an earlier to a later instruction, so the graph is
// acyclic by construction.
//
// Preconditions: operand indices are in range for the chosen policy; the
//                post-allocation index has an allocation for every register.
// Postconditions: `ScheduleDag` holds one node per instruction and all edges.
// Failure modes: out-of-range resources panic (upstream contract violation).
// Side effects: none.

use serde::Serialize;

use crate::dag::ScheduleDag;
use crate::id::{NodeId, Reg};
use crate::isa::{
    FlagReg, Instruction, Operand, SimdWidth, LOCAL_MEMORY_BTI, MAX_ACC_REGISTER,
    MAX_FLAG_REGISTER,
};
use crate::regalloc::{RegAllocation, GEN_GRF_COUNT};

/// Flag slots: every flag register has two 16-bit halves.
pub const FLAG_SLOTS: u32 = MAX_FLAG_REGISTER * 2;
/// Accumulator slots.
pub const ACC_SLOTS: u32 = MAX_ACC_REGISTER;
/// Tracked memory domains (global and local).
pub const MEMORY_DOMAINS: u32 = 2;

/// Do we schedule before or after register allocation?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SchedulePolicy {
    /// LIFO scheduling, zero-cycle instructions (limits register pressure).
    PreAlloc,
    /// FIFO scheduling with the latency model (limits latency problems).
    PostAlloc,
}

impl SchedulePolicy {
    pub fn name(self) -> &'static str {
        match self {
            SchedulePolicy::PreAlloc => "pre-alloc",
            SchedulePolicy::PostAlloc => "post-alloc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDomain {
    Global = 0,
    Local = 1,
}

impl MemoryDomain {
    pub fn of(insn: &Instruction) -> MemoryDomain {
        if insn.function == LOCAL_MEMORY_BTI {
            MemoryDomain::Local
        } else {
            MemoryDomain::Global
        }
    }
}

// ── Resource index ──────────────────────────────────────────────────────────

/// Maps resources to slots of the last-writer table.
#[derive(Debug, Clone, Copy)]
pub struct ResourceIndex<'a> {
    policy: SchedulePolicy,
    /// Register slots before the flag slots.
    grf_num: u32,
    simd_width: SimdWidth,
    allocation: Option<&'a RegAllocation>,
}

impl<'a> ResourceIndex<'a> {
    /// Virtual registers index themselves.
    pub fn pre_alloc(reg_num: u32, simd_width: SimdWidth) -> Self {
        ResourceIndex {
            policy: SchedulePolicy::PreAlloc,
            grf_num: reg_num,
            simd_width,
            allocation: None,
        }
    }

    /// Physical registers, paired in SIMD16.
    pub fn post_alloc(simd_width: SimdWidth, allocation: &'a RegAllocation) -> Self {
        let grf_num = match simd_width {
            SimdWidth::Simd8 => GEN_GRF_COUNT,
            SimdWidth::Simd16 => GEN_GRF_COUNT / 2,
        };
        ResourceIndex {
            policy: SchedulePolicy::PostAlloc,
            grf_num,
            simd_width,
            allocation: Some(allocation),
        }
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    pub fn grf_num(&self) -> u32 {
        self.grf_num
    }

    pub fn slot_count(&self) -> usize {
        (self.grf_num + FLAG_SLOTS + ACC_SLOTS + MEMORY_DOMAINS) as usize
    }

    pub fn reg_slot(&self, reg: Reg) -> u32 {
        match self.allocation {
            None => {
                assert!(
                    reg.0 < self.grf_num,
                    "virtual register %{} out of range ({} registers)",
                    reg.0,
                    self.grf_num
                );
                reg.0
            }
            Some(allocation) => {
                let physical = allocation.gen_reg(reg);
                assert!(
                    physical.nr < GEN_GRF_COUNT,
                    "g{} is outside the register file",
                    physical.nr
                );
                match self.simd_width {
                    SimdWidth::Simd8 => physical.nr,
                    SimdWidth::Simd16 => physical.nr / 2,
                }
            }
        }
    }

    pub fn physical_flag_slot(&self, nr: u32, subnr: u32) -> u32 {
        assert!(
            nr < MAX_FLAG_REGISTER && subnr < 2,
            "flag f{nr}.{subnr} out of range"
        );
        self.grf_num + 2 * nr + subnr
    }

    /// Slot of the flag an instruction predicates on or compares into.
    /// Virtual flags are still ordinary registers.
    pub fn flag_slot(&self, flag: FlagReg) -> u32 {
        match flag {
            FlagReg::Physical { nr, subnr } => self.physical_flag_slot(nr, subnr),
            FlagReg::Virtual(reg) => self.reg_slot(reg),
        }
    }

    pub fn acc_slot(&self, nr: u32) -> u32 {
        assert!(nr < MAX_ACC_REGISTER, "accumulator acc{nr} out of range");
        self.grf_num + FLAG_SLOTS + nr
    }

    pub fn memory_slot(&self, domain: MemoryDomain) -> u32 {
        self.grf_num + FLAG_SLOTS + ACC_SLOTS + domain as u32
    }

    /// `None` for immediates, labels and the null register.
    pub fn operand_slot(&self, op: &Operand) -> Option<u32> {
        match op {
            Operand::Virtual(reg) => Some(self.reg_slot(*reg)),
            Operand::Flag { nr, subnr } => Some(self.physical_flag_slot(*nr, *subnr)),
            Operand::Acc { nr } => Some(self.acc_slot(*nr)),
            Operand::Null | Operand::Imm(_) | Operand::Label(_) => None,
        }
    }

    /// Every slot `insn` reads: sources, predicate flag, memory.
    /// Synchronization reads both memory domains.
    pub fn for_each_read(&self, insn: &Instruction, mut f: impl FnMut(u32)) {
        for src in &insn.src {
            if let Some(slot) = self.operand_slot(src) {
                f(slot);
            }
        }
        if insn.is_predicated() {
            f(self.flag_slot(insn.state.flag));
        }
        if insn.reads_memory() {
            f(self.memory_slot(MemoryDomain::of(insn)));
        }
        if insn.opcode.is_barrier_like() {
            f(self.memory_slot(MemoryDomain::Local));
            f(self.memory_slot(MemoryDomain::Global));
        }
    }

    /// Every slot `insn` writes: destinations, compare flag, accumulator,
    /// memory. Synchronization writes both memory domains.
    pub fn for_each_write(&self, insn: &Instruction, mut f: impl FnMut(u32)) {
        for dst in &insn.dst {
            if let Some(slot) = self.operand_slot(dst) {
                f(slot);
            }
        }
        if insn.opcode.is_compare() {
            f(self.flag_slot(insn.state.flag));
        }
        if insn.state.acc_wr_enable {
            f(self.acc_slot(0));
        }
        if insn.writes_memory() {
            f(self.memory_slot(MemoryDomain::of(insn)));
        }
        if insn.opcode.is_barrier_like() {
            f(self.memory_slot(MemoryDomain::Local));
            f(self.memory_slot(MemoryDomain::Global));
        }
    }

    pub fn reads(&self, insn: &Instruction) -> Vec<u32> {
        let mut slots = Vec::new();
        self.for_each_read(insn, |s| slots.push(s));
        slots
    }

    pub fn writes(&self, insn: &Instruction) -> Vec<u32> {
        let mut slots = Vec::new();
        self.for_each_write(insn, |s| slots.push(s));
        slots
    }
}

// ── Dependency tracker ──────────────────────────────────────────────────────

/// Builds the schedule DAG of a block.
#[derive(Debug)]
pub struct DependencyTracker<'a> {
    index: ResourceIndex<'a>,
    /// Last node that wrote each slot (nearest upcoming writer in pass 2).
    last_writer: Vec<Option<NodeId>>,
}

impl<'a> DependencyTracker<'a> {
    pub fn new(index: ResourceIndex<'a>) -> Self {
        DependencyTracker {
            last_writer: vec![None; index.slot_count()],
            index,
        }
    }

    pub fn index(&self) -> &ResourceIndex<'a> {
        &self.index
    }

    /// Reset before scheduling a new block (and between passes).
    pub fn clear(&mut self) {
        self.last_writer.iter_mut().for_each(|w| *w = None);
    }

    /// Build the DAG of `insns` into `dag` (rewound first). Returns the
    /// number of nodes.
    pub fn build(&mut self, dag: &mut ScheduleDag, insns: &[Instruction]) -> usize {
        dag.rewind();
        self.clear();

        // Pass 1: read-after-write and write-after-write.
        for (pos, insn) in insns.iter().enumerate() {
            let node = dag.new_node(pos);
            let last = &self.last_writer;
            self.index.for_each_read(insn, |slot| {
                if let Some(writer) = last[slot as usize] {
                    dag.add_dependency(node, writer);
                }
            });
            self.index.for_each_write(insn, |slot| {
                if let Some(writer) = last[slot as usize] {
                    dag.add_dependency(node, writer);
                }
            });
            self.update_writes(insn, node);
        }

        // Pass 2: write-after-read, walking backwards.
        self.clear();
        for (pos, insn) in insns.iter().enumerate().rev() {
            let node = NodeId(pos as u32);
            let next = &self.last_writer;
            self.index.for_each_read(insn, |slot| {
                if let Some(writer) = next[slot as usize] {
                    dag.add_dependency(writer, node);
                }
            });
            self.update_writes(insn, node);
        }

        // Pass 3: labels, branches, EOT and synchronization are barriers.
        for (pos, insn) in insns.iter().enumerate() {
            if insn.is_schedule_barrier() {
                make_barrier(dag, pos, insns.len());
            }
        }

        log::trace!(
            "dependency DAG: {} nodes, {} edges",
            dag.len(),
            dag.edge_count()
        );
        insns.len()
    }

    fn update_writes(&mut self, insn: &Instruction, node: NodeId) {
        let last = &mut self.last_writer;
        self.index.for_each_write(insn, |slot| last[slot as usize] = Some(node));
    }
}

/// The barrier depends on every node before it; every node after it
/// depends on the barrier.
fn make_barrier(dag: &mut ScheduleDag, barrier: usize, insn_num: usize) {
    let barrier_id = NodeId(barrier as u32);
    for pos in 0..barrier {
        dag.add_dependency(barrier_id, NodeId(pos as u32));
    }
    for pos in barrier + 1..insn_num {
        dag.add_dependency(NodeId(pos as u32), barrier_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Immediate, Opcode};
    use crate::regalloc::GrfReg;

    fn r(n: u32) -> Reg {
        Reg(n)
    }

    fn build(insns: &[Instruction], reg_num: u32) -> ScheduleDag {
        let mut dag = ScheduleDag::with_capacity(insns.len());
        let mut tracker = DependencyTracker::new(ResourceIndex::pre_alloc(reg_num, SimdWidth::Simd8));
        tracker.build(&mut dag, insns);
        dag
    }

    fn edge(dag: &ScheduleDag, from: u32, to: u32) -> bool {
        dag.depends_on(NodeId(to), NodeId(from))
    }

    #[test]
    fn slot_layout_pre_alloc() {
        let idx = ResourceIndex::pre_alloc(10, SimdWidth::Simd16);
        assert_eq!(idx.reg_slot(r(3)), 3);
        assert_eq!(idx.physical_flag_slot(0, 1), 11);
        assert_eq!(idx.physical_flag_slot(7, 1), 10 + 15);
        assert_eq!(idx.acc_slot(0), 10 + 16);
        assert_eq!(idx.memory_slot(MemoryDomain::Global), 10 + 17);
        assert_eq!(idx.memory_slot(MemoryDomain::Local), 10 + 18);
        assert_eq!(idx.slot_count(), 10 + 19);
        assert_eq!(idx.flag_slot(FlagReg::Virtual(r(4))), 4);
    }

    #[test]
    fn simd16_pairs_physical_registers() {
        let mut ra = RegAllocation::new();
        ra.insert(r(0), GrfReg::new(10));
        ra.insert(r(1), GrfReg::new(11));
        ra.insert(r(2), GrfReg::new(12));
        let idx16 = ResourceIndex::post_alloc(SimdWidth::Simd16, &ra);
        assert_eq!(idx16.grf_num(), 64);
        assert_eq!(idx16.reg_slot(r(0)), idx16.reg_slot(r(1)));
        assert_ne!(idx16.reg_slot(r(1)), idx16.reg_slot(r(2)));

        let idx8 = ResourceIndex::post_alloc(SimdWidth::Simd8, &ra);
        assert_eq!(idx8.grf_num(), 128);
        assert_ne!(idx8.reg_slot(r(0)), idx8.reg_slot(r(1)));
    }

    #[test]
    fn ignored_operands_have_no_slot() {
        let idx = ResourceIndex::pre_alloc(4, SimdWidth::Simd8);
        assert_eq!(idx.operand_slot(&Operand::Null), None);
        assert_eq!(idx.operand_slot(&Operand::Imm(Immediate::Int(3))), None);
        assert_eq!(idx.operand_slot(&Operand::Label(1)), None);
        assert_eq!(idx.operand_slot(&Operand::Acc { nr: 0 }), Some(4 + 16));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn flag_out_of_range_panics() {
        ResourceIndex::pre_alloc(4, SimdWidth::Simd8).physical_flag_slot(8, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn virtual_register_out_of_range_panics() {
        ResourceIndex::pre_alloc(4, SimdWidth::Simd8).reg_slot(r(4));
    }

    #[test]
    fn read_after_write_edge() {
        let insns = vec![
            Instruction::alu1(Opcode::Mov, r(1), r(0)),
            Instruction::alu1(Opcode::Mov, r(2), r(1)),
        ];
        let dag = build(&insns, 3);
        assert!(edge(&dag, 0, 1));
        assert_eq!(dag.node(NodeId(1)).ref_num, 1);
    }

    #[test]
    fn write_after_read_edge_from_backward_pass() {
        // 0 reads %1, 1 overwrites %1: 1 must wait for 0.
        let insns = vec![
            Instruction::alu1(Opcode::Mov, r(2), r(1)),
            Instruction::alu1(Opcode::Mov, r(1), Immediate::Int(7)),
        ];
        let dag = build(&insns, 3);
        assert!(edge(&dag, 0, 1));
        assert!(!edge(&dag, 1, 0));
    }

    #[test]
    fn write_after_write_edge() {
        let insns = vec![
            Instruction::alu1(Opcode::Mov, r(1), Immediate::Int(1)),
            Instruction::alu1(Opcode::Mov, r(1), Immediate::Int(2)),
        ];
        let dag = build(&insns, 2);
        assert!(edge(&dag, 0, 1));
    }

    #[test]
    fn compare_flag_orders_predicated_reader() {
        let flag = FlagReg::Physical { nr: 0, subnr: 1 };
        let insns = vec![
            Instruction::alu2(Opcode::Cmp, Operand::Null, r(0), Immediate::Int(0)).with_flag(flag),
            Instruction::alu1(Opcode::Mov, r(1), Immediate::Int(1)).with_predicate(flag, false),
            Instruction::alu1(Opcode::Mov, r(2), Immediate::Int(1))
                .with_predicate(FlagReg::Physical { nr: 0, subnr: 0 }, false),
        ];
        let dag = build(&insns, 3);
        assert!(edge(&dag, 0, 1));
        assert!(!edge(&dag, 0, 2));
    }

    #[test]
    fn accumulator_writes_are_ordered() {
        let insns = vec![
            Instruction::alu2(Opcode::Mach, r(0), r(1), r(2)).with_acc_write(),
            Instruction::alu2(Opcode::Mul, r(3), r(1), r(2)).with_acc_write(),
        ];
        let dag = build(&insns, 4);
        assert!(edge(&dag, 0, 1));
    }

    #[test]
    fn memory_domains_are_independent() {
        let insns = vec![
            Instruction::new(Opcode::UntypedWrite, vec![], vec![r(0).into(), r(1).into()]).with_bti(1),
            Instruction::new(Opcode::UntypedRead, vec![r(2).into()], vec![r(0).into()])
                .with_bti(LOCAL_MEMORY_BTI),
            Instruction::new(Opcode::UntypedRead, vec![r(3).into()], vec![r(0).into()]).with_bti(2),
        ];
        let dag = build(&insns, 4);
        assert!(!edge(&dag, 0, 1), "local read must not wait on a global write");
        assert!(edge(&dag, 0, 2), "global read waits on the global write");
    }

    #[test]
    fn loads_are_not_ordered_against_each_other() {
        let insns = vec![
            Instruction::new(Opcode::UntypedRead, vec![r(1).into()], vec![r(0).into()]),
            Instruction::new(Opcode::UntypedRead, vec![r(2).into()], vec![r(0).into()]),
        ];
        let dag = build(&insns, 3);
        assert_eq!(dag.edge_count(), 0);
    }

    #[test]
    fn synchronization_orders_memory_both_ways() {
        let insns = vec![
            Instruction::new(Opcode::ByteScatter, vec![], vec![r(0).into(), r(1).into()]),
            Instruction::new(Opcode::Barrier, vec![], vec![]),
            Instruction::new(Opcode::ByteGather, vec![r(2).into()], vec![r(0).into()]),
        ];
        let dag = build(&insns, 3);
        assert!(edge(&dag, 0, 1));
        assert!(edge(&dag, 1, 2));
    }

    #[test]
    fn label_and_branch_close_the_block() {
        let insns = vec![
            Instruction::label(0),
            Instruction::alu1(Opcode::Mov, r(0), Immediate::Int(1)),
            Instruction::alu1(Opcode::Mov, r(1), Immediate::Int(2)),
            Instruction::jmpi(1),
        ];
        let dag = build(&insns, 2);
        for i in 1..4 {
            assert!(edge(&dag, 0, i));
        }
        for i in 0..3 {
            assert!(edge(&dag, i, 3));
        }
        assert!(!edge(&dag, 1, 2));
        assert_eq!(dag.node(NodeId(0)).ref_num, 0);
    }

    #[test]
    fn edges_point_forward_in_program_order() {
        let insns = vec![
            Instruction::alu2(Opcode::Add, r(2), r(0), r(1)),
            Instruction::alu2(Opcode::Add, r(0), r(2), r(1)),
            Instruction::new(Opcode::Wait, vec![], vec![]),
            Instruction::alu2(Opcode::Mul, r(1), r(0), r(2)),
            Instruction::new(Opcode::Eot, vec![], vec![]),
        ];
        let dag = build(&insns, 3);
        for (id, node) in dag.nodes() {
            for child in &node.children {
                assert!(child.0 > id.0, "edge {:?} -> {:?} points backwards", id, child);
            }
        }
    }
}
