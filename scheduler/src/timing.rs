// timing.rs — Mermaid Gantt timing chart output for post-allocation schedules
//
// Transforms the simulation trace of a scheduling pass into a Mermaid Gantt
// chart: one section per block, one bar per instruction from the cycle it
// took the issue port to the cycle its result is visible.
//
// Preconditions: each report comes from a scheduling pass over the named kernel.
// Postconditions: returns a complete, valid Mermaid Gantt chart.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::schedule::{BlockTrace, ScheduleReport};

/// Emit the traces of `reports` (kernel name, report) as a Mermaid Gantt
/// chart string.
pub fn emit_timing_chart(reports: &[(&str, &ScheduleReport)]) -> String {
    let mut buf = String::new();
    writeln!(buf, "gantt").unwrap();
    writeln!(buf, "    title Instruction Schedule Timing").unwrap();
    writeln!(buf, "    dateFormat x").unwrap();
    writeln!(buf, "    axisFormat %Q").unwrap();

    for (kernel, report) in reports {
        for trace in &report.blocks {
            emit_block_section(&mut buf, kernel, report, trace);
        }
    }
    buf
}

fn emit_block_section(buf: &mut String, kernel: &str, report: &ScheduleReport, trace: &BlockTrace) {
    writeln!(buf).unwrap();
    writeln!(
        buf,
        "    section {} block {} [{}] ({} cycles)",
        kernel,
        trace.block.0,
        report.policy.name(),
        trace.final_cycle
    )
    .unwrap();
    let prefix = sanitize(kernel);
    for issue in &trace.issues {
        // Zero-duration entries (labels, zero-cycle passes) are omitted.
        if issue.retire_cycle == issue.start_cycle {
            continue;
        }
        writeln!(
            buf,
            "    i{} {} :{}_b{}_i{}, {}, {}",
            issue.insn.0,
            issue.opcode,
            prefix,
            trace.block.0,
            issue.insn.0,
            issue.start_cycle,
            issue.retire_cycle
        )
        .unwrap();
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
