//! Block-level liveness analysis.
//!
//! Produces live-in/live-out vreg sets per block via the standard backward
//! fixed-point dataflow. Phis get the usual SSA treatment: a phi's operand
//! for the edge `b -> s` is live-out of `b` (not live-in of `b` itself), and
//! a phi's destination is "defined" at the top of the block that hosts it,
//! not live-in to that block. `regalloc` re-walks each block backward from
//! `live_out` to recover the precise per-instruction live sets it needs for
//! interference; this pass only needs to get the block boundaries right.

use crate::common::{Map, Set};

use super::ir::{BlockId, Function, VReg};

pub struct Liveness {
    pub live_in: Map<BlockId, Set<VReg>>,
    pub live_out: Map<BlockId, Set<VReg>>,
}

impl Liveness {
    pub fn build(func: &Function) -> Liveness {
        let ids = func.block_ids();
        let mut live_in: Map<BlockId, Set<VReg>> = ids.iter().map(|&b| (b, Set::new())).collect();
        let mut live_out: Map<BlockId, Set<VReg>> = ids.iter().map(|&b| (b, Set::new())).collect();

        let mut changed = true;
        while changed {
            changed = false;
            // Process blocks in reverse of their natural id order — not load-bearing
            // for correctness, but tends to converge faster for the forward-growing
            // control flow this builder emits (loops aside).
            for &b in ids.iter().rev() {
                let block = &func.blocks[&b];

                let mut out: Set<VReg> = Set::new();
                for succ in block.term.successors() {
                    let succ_block = &func.blocks[&succ];
                    let phi_dsts: Set<VReg> = succ_block.phis.iter().map(|p| p.dst).collect();
                    for v in &live_in[&succ] {
                        if !phi_dsts.contains(v) {
                            out.insert(*v);
                        }
                    }
                    for phi in &succ_block.phis {
                        if let Some(&v) = phi.incomings.get(&b) {
                            out.insert(v);
                        }
                    }
                }

                let mut live = out.clone();
                live.extend(block.term.uses());
                for insn in block.insns.iter().rev() {
                    if let Some(d) = insn.dst() {
                        live.remove(&d);
                    }
                    live.extend(insn.uses());
                }
                for phi in &block.phis {
                    live.remove(&phi.dst);
                }

                if live != live_in[&b] {
                    live_in.insert(b, live);
                    changed = true;
                }
                if out != live_out[&b] {
                    live_out.insert(b, out);
                    changed = true;
                }
            }
        }

        Liveness { live_in, live_out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::front::{check, parse};
    use crate::middle::build::build;
    use crate::middle::mem2reg;

    fn liveness_of_main(src: &str) -> (crate::middle::ir::Function, Liveness) {
        let prog = parse(src).unwrap();
        check(&prog).unwrap();
        let mut m = build(&prog).unwrap();
        let mut f = m.funcs.remove(&id("main")).unwrap();
        mem2reg::run(&mut f);
        let live = Liveness::build(&f);
        (f, live)
    }

    #[test]
    fn value_dead_after_last_use_is_not_live_out_of_its_block() {
        let (f, live) = liveness_of_main("void main() { int x = 1; printInt(x); int y = 2; printInt(y); }");
        assert!(live.live_out[&f.entry].is_empty());
    }

    #[test]
    fn value_live_across_if_merge_is_live_out_of_both_branches() {
        let (f, live) = liveness_of_main(
            "void main() { int x = 0; int y = 1; if (x == 0) { y = y + 1; } printInt(y); }",
        );
        // Every block that isn't the final use site must still be consistent:
        // live_in of a block is a subset of what's live_out of its predecessors.
        for b in f.block_ids() {
            for succ in f.blocks[&b].term.successors() {
                for v in &live.live_in[&succ] {
                    if f.blocks[&succ].phis.iter().any(|p| p.dst == *v) {
                        continue;
                    }
                    assert!(live.live_out[&b].contains(v), "{v} live-in to {succ} but not live-out of {b}");
                }
            }
        }
    }

    #[test]
    fn loop_counter_is_live_across_the_back_edge() {
        let (f, live) = liveness_of_main("void main() { int i = 0; while (i < 10) { i = i + 1; } }");
        let header = f
            .block_ids()
            .into_iter()
            .find(|&b| f.preds(b).len() == 2)
            .expect("loop header has two predecessors");
        assert!(!live.live_in[&header].is_empty() || !f.blocks[&header].phis.is_empty());
    }
}
