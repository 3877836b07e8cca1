// regalloc.rs — Register allocation result consumed by post-allocation scheduling
//
// The allocator itself lives outside this crate. What the scheduler needs
// from it is the virtual → physical GRF mapping, used to compute coarsened
// dependency slots once registers are shared.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::id::Reg;
use crate::isa::{Selection, SimdWidth};

/// Number of general registers per hardware thread.
pub const GEN_GRF_COUNT: u32 = 128;

/// A physical general register (`g<nr>` or `g<nr>.<subnr>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GrfReg {
    pub nr: u32,
    pub subnr: u32,
}

impl GrfReg {
    pub fn new(nr: u32) -> Self {
        GrfReg { nr, subnr: 0 }
    }
}

impl fmt::Display for GrfReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subnr == 0 {
            write!(f, "g{}", self.nr)
        } else {
            write!(f, "g{}.{}", self.nr, self.subnr)
        }
    }
}

/// Virtual → physical register map produced by register allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegAllocation {
    map: BTreeMap<Reg, GrfReg>,
}

impl RegAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reg: Reg, grf: GrfReg) {
        self.map.insert(reg, grf);
    }

    pub fn get(&self, reg: Reg) -> Option<GrfReg> {
        self.map.get(&reg).copied()
    }

    /// Physical register of an allocated virtual register.
    ///
    /// Panics if `reg` was never allocated: the allocator guarantees every
    /// register reaching post-allocation scheduling has a home.
    pub fn gen_reg(&self, reg: Reg) -> GrfReg {
        match self.map.get(&reg) {
            Some(grf) => *grf,
            None => panic!("virtual register %{} has no physical register", reg.0),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Reg, GrfReg)> + '_ {
        self.map.iter().map(|(r, g)| (*r, *g))
    }

    /// First virtual register used by `selection` that has no allocation.
    pub fn first_unallocated(&self, selection: &Selection) -> Option<Reg> {
        selection
            .blocks
            .iter()
            .flat_map(|b| b.insns.iter())
            .flat_map(|insn| insn.virtual_regs())
            .find(|reg| !self.map.contains_key(reg))
    }

    /// Round-robin placement over the register file, starting after the
    /// thread payload (g0/g1). SIMD16 values occupy register pairs. Values
    /// share registers once the file wraps around, which only adds
    /// dependencies.
    pub fn round_robin(reg_num: u32, simd_width: SimdWidth) -> Self {
        let stride = match simd_width {
            SimdWidth::Simd8 => 1,
            SimdWidth::Simd16 => 2,
        };
        let first = 2;
        let slots = (GEN_GRF_COUNT - first) / stride;
        let mut allocation = RegAllocation::new();
        for i in 0..reg_num {
            let nr = first + (i % slots) * stride;
            allocation.insert(Reg(i), GrfReg::new(nr));
        }
        allocation
    }
}

impl fmt::Display for RegAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .map
            .iter()
            .map(|(reg, grf)| format!("%{} = {}", reg.0, grf))
            .collect();
        write!(f, "alloc {}", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_alloc_line() {
        let mut ra = RegAllocation::new();
        ra.insert(Reg(1), GrfReg { nr: 4, subnr: 2 });
        ra.insert(Reg(0), GrfReg::new(2));
        assert_eq!(ra.to_string(), "alloc %0 = g2, %1 = g4.2");
    }

    #[test]
    fn round_robin_simd16_uses_pairs() {
        let ra = RegAllocation::round_robin(3, SimdWidth::Simd16);
        assert_eq!(ra.gen_reg(Reg(0)).nr, 2);
        assert_eq!(ra.gen_reg(Reg(1)).nr, 4);
        assert_eq!(ra.gen_reg(Reg(2)).nr, 6);
    }

    #[test]
    fn round_robin_wraps_inside_register_file() {
        let ra = RegAllocation::round_robin(300, SimdWidth::Simd8);
        assert!(ra.iter().all(|(_, g)| g.nr >= 2 && g.nr < GEN_GRF_COUNT));
        assert_eq!(ra.gen_reg(Reg(126)).nr, 2);
    }

    #[test]
    #[should_panic(expected = "no physical register")]
    fn missing_register_panics() {
        RegAllocation::new().gen_reg(Reg(3));
    }
}
