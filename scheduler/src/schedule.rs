// schedule.rs — Local forward list scheduling of selection blocks
//
// Every block is scheduled twice, both times with a forward list scheduler
// over the dependency DAG:
//
// Before register allocation the goal is low register pressure. Ready
// instructions are taken LIFO and complete in zero cycles, so a producer's
// consumers become ready at once and are issued right behind it ("zero
// cycled LIFO scheduling").
//
// After register allocation the goal is hiding latency. Ready instructions
// are taken FIFO, issuing advances a simulated clock by the instruction's
// throughput and the result is visible `latency` cycles later.
//
// Preconditions: SIMD width is 8 or 16; post-allocation scheduling has a
//                register allocation covering every virtual register.
// Postconditions: each block holds the same instructions in a new order that
//                 respects every DAG edge.
// Failure modes: a dependency cycle (stall with nothing ready or executing)
//                returns an `E0500` diagnostic; the block is left untouched.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::dag::{NodeList, ScheduleDag};
use crate::deps::{DependencyTracker, ResourceIndex};
use crate::diag::{codes, Diagnostic};
use crate::id::{BlockId, InsnId, NodeId};
use crate::isa::{Instruction, Opcode, Selection, SelectionBlock, SimdWidth};
use crate::latency;
use crate::regalloc::RegAllocation;

pub use crate::deps::SchedulePolicy;

// ── Configuration ───────────────────────────────────────────────────────────

/// Pass switches. Both passes are on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub pre_alloc: bool,
    pub post_alloc: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            pre_alloc: true,
            post_alloc: true,
        }
    }
}

pub const PRE_ALLOC_ENV: &str = "OCL_PRE_ALLOC_INSN_SCHEDULE";
pub const POST_ALLOC_ENV: &str = "OCL_POST_ALLOC_INSN_SCHEDULE";

impl ScheduleOptions {
    /// Defaults overridden by `OCL_PRE_ALLOC_INSN_SCHEDULE` and
    /// `OCL_POST_ALLOC_INSN_SCHEDULE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ScheduleOptions::default();
        ScheduleOptions {
            pre_alloc: switch_value(lookup(PRE_ALLOC_ENV).as_deref(), defaults.pre_alloc),
            post_alloc: switch_value(lookup(POST_ALLOC_ENV).as_deref(), defaults.post_alloc),
        }
    }
}

fn switch_value(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "0" | "false" | "off" | "no") => false,
        Some(v) if matches!(v.as_str(), "1" | "true" | "on" | "yes") => true,
        _ => default,
    }
}

/// What the scheduling passes need to know about the kernel being compiled.
#[derive(Debug, Clone, Copy)]
pub struct GenContext<'a> {
    pub simd_width: SimdWidth,
    pub allocation: Option<&'a RegAllocation>,
    pub options: ScheduleOptions,
}

impl<'a> GenContext<'a> {
    pub fn new(simd_width: SimdWidth) -> Self {
        GenContext {
            simd_width,
            allocation: None,
            options: ScheduleOptions::default(),
        }
    }

    pub fn with_allocation(mut self, allocation: &'a RegAllocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn with_options(mut self, options: ScheduleOptions) -> Self {
        self.options = options;
        self
    }

    /// Resource index for `policy` over `selection`.
    pub fn resource_index(&self, selection: &Selection, policy: SchedulePolicy) -> ResourceIndex<'a> {
        match policy {
            SchedulePolicy::PreAlloc => ResourceIndex::pre_alloc(selection.reg_num(), self.simd_width),
            SchedulePolicy::PostAlloc => {
                let allocation = self
                    .allocation
                    .expect("post-allocation scheduling needs a register allocation");
                ResourceIndex::post_alloc(self.simd_width, allocation)
            }
        }
    }
}

// ── Trace ───────────────────────────────────────────────────────────────────

/// One issued instruction of the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub insn: InsnId,
    pub opcode: Opcode,
    /// Cycle the issue port was taken.
    pub start_cycle: u32,
    /// Cycle the instruction left the port.
    pub issue_cycle: u32,
    pub retire_cycle: u32,
}

/// Simulation summary for one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockTrace {
    pub block: BlockId,
    pub issues: Vec<IssueRecord>,
    pub edges: usize,
    pub stall_cycles: u32,
    /// Simulated cycle when the last instruction was issued.
    pub final_cycle: u32,
}

/// Result of one scheduling pass over a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub policy: SchedulePolicy,
    pub blocks: Vec<BlockTrace>,
}

impl ScheduleReport {
    pub fn total_cycles(&self) -> u32 {
        self.blocks.iter().map(|b| b.final_cycle).sum()
    }
}

impl fmt::Display for ScheduleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ScheduleReport ({}, {} blocks)",
            self.policy.name(),
            self.blocks.len()
        )?;
        for trace in &self.blocks {
            writeln!(
                f,
                "  block {}: {} insns, {} edges, {} stall cycles, {} cycles",
                trace.block.0,
                trace.issues.len(),
                trace.edges,
                trace.stall_cycles,
                trace.final_cycle
            )?;
            for issue in &trace.issues {
                writeln!(
                    f,
                    "    i{} {} @{}..{} -> {}",
                    issue.insn.0,
                    issue.opcode,
                    issue.start_cycle,
                    issue.issue_cycle,
                    issue.retire_cycle
                )?;
            }
        }
        Ok(())
    }
}

// ── Scheduler ───────────────────────────────────────────────────────────────

/// Schedules the blocks of one selection. Owns the scratch state (node pool,
/// lists, last-writer table) that is reset between blocks.
pub struct SelectionScheduler<'a> {
    policy: SchedulePolicy,
    simd_width: SimdWidth,
    dag: ScheduleDag,
    /// Instructions that can be issued.
    ready: NodeList,
    /// Instructions that are executing.
    active: NodeList,
    tracker: DependencyTracker<'a>,
}

impl<'a> SelectionScheduler<'a> {
    pub fn new(ctx: &GenContext<'a>, selection: &Selection, policy: SchedulePolicy) -> Self {
        SelectionScheduler {
            policy,
            simd_width: ctx.simd_width,
            dag: ScheduleDag::with_capacity(selection.largest_block_size()),
            ready: NodeList::default(),
            active: NodeList::default(),
            tracker: DependencyTracker::new(ctx.resource_index(selection, policy)),
        }
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// DAG of the block last passed to `build_dag`.
    pub fn dag(&self) -> &ScheduleDag {
        &self.dag
    }

    /// Build the DAG of `insns` and seed the ready list with every node that
    /// has no dependency, in program order. Returns the instruction count.
    pub fn build_dag(&mut self, insns: &[Instruction]) -> usize {
        self.ready.fast_clear();
        self.active.fast_clear();
        let insn_num = self.tracker.build(&mut self.dag, insns);
        for pos in 0..insn_num {
            let id = NodeId(pos as u32);
            if self.dag.node(id).ref_num == 0 {
                self.dag.push_back(&mut self.ready, id);
            }
        }
        insn_num
    }

    /// Run the ready/active simulation over the DAG built from `insns`.
    /// Returns the new order as positions into `insns`.
    pub fn schedule_dag(
        &mut self,
        block: BlockId,
        insns: &[Instruction],
        mut insn_num: usize,
    ) -> Result<(Vec<usize>, BlockTrace), Diagnostic> {
        let mut order = Vec::with_capacity(insn_num);
        let mut trace = BlockTrace {
            block,
            issues: Vec::with_capacity(insn_num),
            edges: self.dag.edge_count(),
            stall_cycles: 0,
            final_cycle: 0,
        };
        let mut cycle: u32 = 0;

        while insn_num > 0 {
            self.retire(cycle);

            let to_schedule = match self.policy {
                SchedulePolicy::PostAlloc => self.ready.front(),
                SchedulePolicy::PreAlloc => self.ready.back(),
            };

            let Some(id) = to_schedule else {
                if self.active.is_empty() {
                    return Err(Diagnostic::error(
                        codes::E0500,
                        format!(
                            "internal error: dependency cycle in block {} ({} of {} instructions \
                             never became ready)",
                            block.0,
                            insn_num,
                            insns.len()
                        ),
                    ));
                }
                cycle += 1;
                trace.stall_cycles += 1;
                continue;
            };

            let pos = self.dag.node(id).insn;
            let insn = &insns[pos];
            let start_cycle = cycle;
            if self.policy == SchedulePolicy::PostAlloc {
                cycle += latency::throughput(insn.opcode, self.simd_width);
            }

            self.dag.unlink(&mut self.ready, id);
            self.dag.push_back(&mut self.active, id);
            // Before allocation the instruction completes at once, which
            // gives a true LIFO order.
            let retired_cycle = match self.policy {
                SchedulePolicy::PostAlloc => cycle + latency::latency(insn.opcode),
                SchedulePolicy::PreAlloc => cycle,
            };
            self.dag.node_mut(id).retired_cycle = retired_cycle;

            order.push(pos);
            trace.issues.push(IssueRecord {
                insn: insn.id,
                opcode: insn.opcode,
                start_cycle,
                issue_cycle: cycle,
                retire_cycle: retired_cycle,
            });
            insn_num -= 1;
        }

        trace.final_cycle = cycle;
        Ok((order, trace))
    }

    /// Retire every finished instruction and release its dependents.
    fn retire(&mut self, cycle: u32) {
        let mut cursor = self.active.front();
        while let Some(id) = cursor {
            if self.dag.node(id).retired_cycle > cycle {
                cursor = self.dag.next_in_list(id);
                continue;
            }
            cursor = self.dag.unlink(&mut self.active, id);
            for k in 0..self.dag.node(id).children.len() {
                let child = self.dag.node(id).children[k];
                let node = self.dag.node_mut(child);
                node.ref_num -= 1;
                if node.ref_num == 0 {
                    self.dag.push_back(&mut self.ready, child);
                }
            }
        }
    }

    /// Build, simulate and reorder one block in place.
    pub fn schedule_block(&mut self, block: &mut SelectionBlock) -> Result<BlockTrace, Diagnostic> {
        let insn_num = self.build_dag(&block.insns);
        let (order, trace) = self.schedule_dag(block.id, &block.insns, insn_num)?;
        block.insns = permute(std::mem::take(&mut block.insns), &order);
        log::debug!(
            "{}: block {} scheduled ({} insns, {} edges, {} cycles)",
            self.policy.name(),
            block.id.0,
            trace.issues.len(),
            trace.edges,
            trace.final_cycle
        );
        Ok(trace)
    }
}

/// Reorder `insns` so that position `i` of the result is `insns[order[i]]`.
fn permute(insns: Vec<Instruction>, order: &[usize]) -> Vec<Instruction> {
    let mut slots: Vec<Option<Instruction>> = insns.into_iter().map(Some).collect();
    order
        .iter()
        .map(|&pos| {
            slots[pos]
                .take()
                .unwrap_or_else(|| panic!("instruction {pos} scheduled twice"))
        })
        .collect()
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Schedule every block to limit register pressure. `Ok(None)` when the
/// pass is disabled.
pub fn schedule_pre_reg_allocation(
    ctx: &GenContext,
    selection: &mut Selection,
) -> Result<Option<ScheduleReport>, Diagnostic> {
    if !ctx.options.pre_alloc {
        return Ok(None);
    }
    schedule_selection(ctx, selection, SchedulePolicy::PreAlloc).map(Some)
}

/// Schedule every block to hide latency, using the register allocation in
/// `ctx`. `Ok(None)` when the pass is disabled.
pub fn schedule_post_reg_allocation(
    ctx: &GenContext,
    selection: &mut Selection,
) -> Result<Option<ScheduleReport>, Diagnostic> {
    if !ctx.options.post_alloc {
        return Ok(None);
    }
    schedule_selection(ctx, selection, SchedulePolicy::PostAlloc).map(Some)
}

fn schedule_selection(
    ctx: &GenContext,
    selection: &mut Selection,
    policy: SchedulePolicy,
) -> Result<ScheduleReport, Diagnostic> {
    log::info!(
        "{} scheduling: {} blocks, {} insns, SIMD{}",
        policy.name(),
        selection.blocks.len(),
        selection.insn_count(),
        ctx.simd_width.lanes()
    );
    let mut scheduler = SelectionScheduler::new(ctx, selection, policy);
    let mut blocks = Vec::with_capacity(selection.blocks.len());
    for block in &mut selection.blocks {
        blocks.push(scheduler.schedule_block(block)?);
    }
    Ok(ScheduleReport { policy, blocks })
}

// ── Tests ───────────────────────────────────────────────────────────────────
