// verify.rs — Machine-checkable evidence that a schedule is legal
//
// Checks a scheduled selection against the selection it was produced from,
// independently of the DAG: every ordered pair of instructions is compared
// directly through the resource index.
//
// Preconditions: `before` and `after` come from the same kernel; the index
//                is the one the scheduling pass used.
// Postconditions: `ScheduleCert` records each obligation separately.
// Failure modes: none (a failed obligation is a `false`, not an error).
// Side effects: none.

use std::collections::HashMap;

use crate::deps::ResourceIndex;
use crate::id::InsnId;
use crate::isa::{Instruction, Selection};

/// Evidence produced by a verification step.
pub trait StageCert {
    fn all_pass(&self) -> bool;

    /// Named obligations with their outcome, in check order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

/// Postconditions of a scheduling pass (C1-C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCert {
    /// C1: every block holds exactly the instructions it held before.
    pub c1_permutation: bool,
    /// C2: every read/write conflict keeps its original order.
    pub c2_dependencies_preserved: bool,
    /// C3: labels, branches, EOT and synchronization did not move relative
    /// to any other instruction.
    pub c3_barriers_fixed: bool,
}

impl StageCert for ScheduleCert {
    fn all_pass(&self) -> bool {
        self.c1_permutation && self.c2_dependencies_preserved && self.c3_barriers_fixed
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("C1_permutation", self.c1_permutation),
            ("C2_dependencies_preserved", self.c2_dependencies_preserved),
            ("C3_barriers_fixed", self.c3_barriers_fixed),
        ]
    }
}

impl ScheduleCert {
    fn passing() -> Self {
        ScheduleCert {
            c1_permutation: true,
            c2_dependencies_preserved: true,
            c3_barriers_fixed: true,
        }
    }

    fn merge(self, other: ScheduleCert) -> Self {
        ScheduleCert {
            c1_permutation: self.c1_permutation && other.c1_permutation,
            c2_dependencies_preserved: self.c2_dependencies_preserved
                && other.c2_dependencies_preserved,
            c3_barriers_fixed: self.c3_barriers_fixed && other.c3_barriers_fixed,
        }
    }
}

/// Verify every block of `after` against the matching block of `before`.
pub fn verify_schedule(before: &Selection, after: &Selection, index: &ResourceIndex) -> ScheduleCert {
    if before.blocks.len() != after.blocks.len() {
        return ScheduleCert {
            c1_permutation: false,
            c2_dependencies_preserved: false,
            c3_barriers_fixed: false,
        };
    }
    before
        .blocks
        .iter()
        .zip(&after.blocks)
        .fold(ScheduleCert::passing(), |cert, (b, a)| {
            let block_ok = b.id == a.id;
            let mut block = verify_block(&b.insns, &a.insns, index);
            block.c1_permutation &= block_ok;
            cert.merge(block)
        })
}

/// Verify one scheduled block against its original order.
pub fn verify_block(before: &[Instruction], after: &[Instruction], index: &ResourceIndex) -> ScheduleCert {
    let Some(position) = permutation_positions(before, after) else {
        return ScheduleCert {
            c1_permutation: false,
            c2_dependencies_preserved: false,
            c3_barriers_fixed: false,
        };
    };

    let reads: Vec<Vec<u32>> = before.iter().map(|i| index.reads(i)).collect();
    let writes: Vec<Vec<u32>> = before.iter().map(|i| index.writes(i)).collect();

    let mut cert = ScheduleCert::passing();
    for i in 0..before.len() {
        for j in i + 1..before.len() {
            let kept = position[&before[i].id] < position[&before[j].id];
            if kept {
                continue;
            }
            if before[i].is_schedule_barrier() || before[j].is_schedule_barrier() {
                cert.c3_barriers_fixed = false;
            }
            if conflicts(&reads[i], &writes[i], &reads[j], &writes[j]) {
                cert.c2_dependencies_preserved = false;
            }
        }
    }
    cert
}

/// Position of each instruction id in `after`, or `None` when `after` is not
/// a permutation of `before`.
fn permutation_positions(before: &[Instruction], after: &[Instruction]) -> Option<HashMap<InsnId, usize>> {
    if before.len() != after.len() {
        return None;
    }
    let mut position = HashMap::with_capacity(after.len());
    for (pos, insn) in after.iter().enumerate() {
        if position.insert(insn.id, pos).is_some() {
            return None;
        }
    }
    let same_set = before.iter().all(|insn| {
        position
            .get(&insn.id)
            .is_some_and(|&pos| after[pos] == *insn)
    });
    same_set.then_some(position)
}

/// Read-after-write, write-after-read or write-after-write on a shared slot.
fn conflicts(reads_a: &[u32], writes_a: &[u32], reads_b: &[u32], writes_b: &[u32]) -> bool {
    let shares = |x: &[u32], y: &[u32]| x.iter().any(|s| y.contains(s));
    shares(writes_a, reads_b) || shares(reads_a, writes_b) || shares(writes_a, writes_b)
}
