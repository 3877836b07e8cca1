// dot.rs — Graphviz DOT output for schedule DAGs
//
// Builds the dependency DAG of every block of a kernel and renders it in DOT
// format, one cluster per block, suitable for `dot` or other Graphviz
// layout engines.
//
// Preconditions: the kernel resolved cleanly; post-allocation rendering needs
//                a register allocation in `ctx`.
// Postconditions: returns a valid DOT string.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::dag::ScheduleDag;
use crate::deps::{DependencyTracker, SchedulePolicy};
use crate::isa::{Instruction, Kernel};
use crate::schedule::GenContext;

/// Emit the dependency DAGs of `kernel` as a Graphviz DOT string.
pub fn emit_dot(kernel: &Kernel, ctx: &GenContext, policy: SchedulePolicy) -> String {
    let selection = &kernel.selection;
    let mut tracker = DependencyTracker::new(ctx.resource_index(selection, policy));
    let mut dag = ScheduleDag::with_capacity(selection.largest_block_size());

    let name = sanitize(&kernel.name);
    let mut buf = String::new();
    writeln!(buf, "digraph {name} {{").unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    label=\"{} ({})\";", kernel.name, policy.name()).unwrap();

    for block in &selection.blocks {
        tracker.build(&mut dag, &block.insns);
        let b = block.id.0;
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_b{b} {{").unwrap();
        writeln!(buf, "        label=\"block {b}\";").unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        for (id, node) in dag.nodes() {
            let attrs = node_attrs(&block.insns[node.insn]);
            writeln!(buf, "        b{b}_n{} [{attrs}];", id.0).unwrap();
        }
        for (id, node) in dag.nodes() {
            for child in &node.children {
                writeln!(buf, "        b{b}_n{} -> b{b}_n{};", id.0, child.0).unwrap();
            }
        }
        writeln!(buf, "    }}").unwrap();
    }

    writeln!(buf, "}}").unwrap();
    buf
}

fn node_attrs(insn: &Instruction) -> String {
    let (shape, color) = if insn.is_schedule_barrier() {
        ("box", "lightsalmon")
    } else if insn.is_memory_access() {
        ("cylinder", "lightyellow")
    } else {
        ("box", "lightblue")
    };
    let label = escape(&format!("i{}: {}", insn.id.0, insn));
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
