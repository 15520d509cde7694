//! Phi elimination by parallel-copy sequentialization.
//!
//! Runs after coloring, so every vreg this pass touches already has a
//! physical register — there is nothing left to color, only copies to
//! schedule. That also means a brand new scratch value minted here can't go
//! through the usual vreg-then-color path (coloring already happened); the
//! scratch is picked directly as a register unused by the copy bundle being
//! broken. Because of that, this pass doesn't edit the IR at all: its
//! output is a side table of register-to-register moves keyed by the
//! predecessor block that must execute them, just before that block's
//! terminator. `back::codegen` consumes the table directly and `phis` are
//! never emitted as instructions.

use crate::back::asm::{Register, ALLOCATABLE};
use crate::common::{Map, Set};

use super::ir::{BlockId, Function, VReg};

pub fn resolve(func: &Function, colors: &Map<VReg, Register>) -> Map<BlockId, Vec<(Register, Register)>> {
    let mut out: Map<BlockId, Vec<(Register, Register)>> = Map::new();

    for (&b, block) in &func.blocks {
        if block.phis.is_empty() {
            continue;
        }
        let preds: Set<BlockId> = block.phis.iter().flat_map(|p| p.incomings.keys().copied()).collect();
        for p in preds {
            let mut copies: Vec<(Register, Register)> = vec![];
            for phi in &block.phis {
                let Some(&src_vreg) = phi.incomings.get(&p) else { continue };
                let dst_reg = *colors
                    .get(&phi.dst)
                    .unwrap_or_else(|| panic!("phi destination {} has no assigned register", phi.dst));
                let src_reg = *colors
                    .get(&src_vreg)
                    .unwrap_or_else(|| panic!("phi operand {src_vreg} has no assigned register"));
                copies.push((dst_reg, src_reg));
            }
            out.entry(p).or_default().extend(sequentialize(copies));
        }
    }

    out
}

/// Schedule a parallel copy `{dst_i <- src_i}` as a sequence of ordinary
/// moves. Identity copies are elided. A leaf (a destination nobody else
/// reads from) can always run immediately; once only cycles remain, one
/// member is saved to a scratch register first, which turns the cycle into
/// a chain that the leaf rule then drains normally.
pub(crate) fn sequentialize(copies: Vec<(Register, Register)>) -> Vec<(Register, Register)> {
    let mut pending: Vec<(Register, Register)> = copies.into_iter().filter(|(d, s)| d != s).collect();
    let mut result = vec![];

    while !pending.is_empty() {
        if let Some(idx) = pending.iter().position(|&(d, _)| !pending.iter().any(|&(_, s)| s == d)) {
            result.push(pending.remove(idx));
            continue;
        }

        let used: Set<Register> = pending.iter().flat_map(|&(d, s)| [d, s]).collect();
        let &scratch = ALLOCATABLE
            .iter()
            .find(|r| !used.contains(r))
            .expect("phi elimination ran out of scratch registers for a cycle");
        let (d0, _) = pending[0];
        result.push((scratch, d0));
        for (_, s) in pending.iter_mut() {
            if *s == d0 {
                *s = scratch;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(copies: Vec<(Register, Register)>) -> Vec<(Register, Register)> {
        sequentialize(copies)
    }

    #[test]
    fn identity_copy_is_elided() {
        assert!(run(vec![(Register::S1, Register::S1)]).is_empty());
    }

    #[test]
    fn independent_copies_need_no_scratch() {
        let seq = run(vec![(Register::S1, Register::A0), (Register::S2, Register::A1)]);
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn two_cycle_swap_uses_exactly_one_scratch() {
        let seq = run(vec![(Register::S1, Register::S2), (Register::S2, Register::S1)]);
        assert_eq!(seq.len(), 3);
        let scratch_dsts = seq.iter().filter(|(d, _)| *d != Register::S1 && *d != Register::S2).count();
        assert_eq!(scratch_dsts, 1);
    }

    #[test]
    fn three_cycle_sequentializes_to_three_copies_plus_scratch() {
        let seq = run(vec![
            (Register::S1, Register::S2),
            (Register::S2, Register::S3),
            (Register::S3, Register::S1),
        ]);
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn executing_the_sequence_reproduces_the_parallel_swap() {
        // Simulate a tiny register file and play the sequence back.
        let mut regs: Map<Register, i32> = Map::new();
        regs.insert(Register::S1, 10);
        regs.insert(Register::S2, 20);
        for (dst, src) in run(vec![(Register::S1, Register::S2), (Register::S2, Register::S1)]) {
            let v = *regs.get(&src).unwrap_or(&0);
            regs.insert(dst, v);
        }
        assert_eq!(regs[&Register::S1], 20);
        assert_eq!(regs[&Register::S2], 10);
    }
}
