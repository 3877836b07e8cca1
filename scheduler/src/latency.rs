// latency.rs — Gen7 latency/throughput estimates per opcode family
//
// Kind-of roughly estimated numbers, not measured hardware timings. Only the
// post-allocation policy consults them. Changing a value changes the shape
// of every post-allocation schedule.

use crate::isa::{OpFamily, Opcode, SimdWidth};

/// Timing estimate for one opcode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInfo {
    /// Cycles from issue until the result is visible to dependents.
    pub latency: u32,
    /// Cycles the issue port is busy for a SIMD16 instruction.
    pub simd16: u32,
    /// Cycles the issue port is busy for a SIMD8 instruction.
    pub simd8: u32,
}

const fn info(latency: u32, simd16: u32, simd8: u32) -> ScheduleInfo {
    ScheduleInfo {
        latency,
        simd16,
        simd8,
    }
}

pub const fn family_info(family: OpFamily) -> ScheduleInfo {
    //                                   latency  simd16  simd8
    match family {
        OpFamily::Label => info(0, 0, 0),
        OpFamily::Unary => info(20, 4, 2),
        OpFamily::Binary => info(20, 4, 2),
        OpFamily::Ternary => info(20, 4, 2),
        OpFamily::Compare => info(20, 4, 2),
        OpFamily::Jump => info(14, 1, 1),
        OpFamily::Eot => info(20, 1, 1),
        OpFamily::NoOp => info(20, 2, 2),
        OpFamily::Wait => info(20, 2, 2),
        OpFamily::Math => info(20, 4, 2),
        OpFamily::Barrier => info(80, 1, 1),
        OpFamily::UntypedRead => info(80, 1, 1),
        OpFamily::UntypedWrite => info(80, 1, 1),
        OpFamily::ByteGather => info(80, 1, 1),
        OpFamily::ByteScatter => info(80, 1, 1),
    }
}

pub fn latency(opcode: Opcode) -> u32 {
    family_info(opcode.family()).latency
}

pub fn throughput(opcode: Opcode, simd_width: SimdWidth) -> u32 {
    let info = family_info(opcode.family());
    match simd_width {
        SimdWidth::Simd8 => info.simd8,
        SimdWidth::Simd16 => info.simd16,
    }
}
