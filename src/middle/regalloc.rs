//! Graph-coloring register allocation.
//!
//! No coalescing: a `Copy(dst, src)` simply doesn't get an interference edge
//! between `dst` and `src`, which is enough to let equal-colored copies fall
//! out as identity moves at emission time without a separate coalescing
//! pass.
//!
//! Calling convention pressure is modeled as forbidden colors rather than
//! precolored graph nodes: any vreg live across a `call` may not be given a
//! caller-saved register (`a0`-`a7`, `t0`-`t6`), which is what drives the
//! allocator toward callee-saved registers for values that outlive a call.
//! Physical argument/return registers themselves never appear as graph
//! nodes — `back::codegen` materializes the ABI boundary as ordinary `mv`s
//! into/out of whatever register each vreg was colored, ahead of `call` and
//! after `ret`.
//!
//! A spilled vreg is turned into an `alloca` slot with a fresh `load` before
//! each use and a `store` after each def — this compiler's generic
//! memory-cell lowering, run back through the same allocator. The slot's
//! own address vreg is short-lived and colors easily; the frame offset it
//! resolves to is assigned later, by `back::codegen`, alongside every other
//! `alloca` in the function.

use crate::back::asm::{Register, ALLOCATABLE};
use crate::common::{Map, Set};

use super::ir::{BlockId, Function, Insn, VReg};
use super::liveness::Liveness;

const WORD: i32 = 4;
const MAX_SPILL_ROUNDS: u32 = 10;

/// Caller-saved registers: any vreg live across a `call` may not use one of
/// these, since the callee is free to clobber it.
fn caller_saved() -> Set<Register> {
    use Register::*;
    [A0, A1, A2, A3, A4, A5, A6, A7, T0, T1, T2, T3, T4, T5, T6].into_iter().collect()
}

pub fn allocate(func: &mut Function) -> Map<VReg, Register> {
    for _ in 0..MAX_SPILL_ROUNDS {
        let live = Liveness::build(func);
        let (graph, forbidden) = build_interference(func, &live);

        match try_color(&graph, &forbidden) {
            Ok(colors) => return colors,
            Err(spills) => {
                spill_rewrite(func, &spills);
                dce(func);
            }
        }
    }
    panic!("register allocator did not converge after {MAX_SPILL_ROUNDS} spill rounds");
}

fn build_interference(
    func: &Function,
    live: &Liveness,
) -> (Map<VReg, Set<VReg>>, Map<VReg, Set<Register>>) {
    let mut graph: Map<VReg, Set<VReg>> = Map::new();
    let mut forbidden: Map<VReg, Set<Register>> = Map::new();
    let touch = |g: &mut Map<VReg, Set<VReg>>, v: VReg| {
        g.entry(v).or_default();
    };
    let mut interfere = |g: &mut Map<VReg, Set<VReg>>, a: VReg, b: VReg| {
        if a == b {
            return;
        }
        g.entry(a).or_default().insert(b);
        g.entry(b).or_default().insert(a);
    };

    for (&b, block) in &func.blocks {
        let mut live_set = live.live_out[&b].clone();
        for &v in &live_set {
            touch(&mut graph, v);
        }

        for insn in block.insns.iter().rev() {
            if let Some(d) = insn.dst() {
                touch(&mut graph, d);
                let copy_src = if let Insn::Copy(_, s) = insn { Some(*s) } else { None };
                for &other in live_set.iter() {
                    if Some(other) == copy_src {
                        continue;
                    }
                    interfere(&mut graph, d, other);
                }
                if matches!(insn, Insn::Call(..)) {
                    for &other in live_set.iter() {
                        if other != d {
                            forbidden.entry(other).or_default().extend(caller_saved());
                        }
                    }
                }
                live_set.remove(&d);
            }
            for u in insn.uses() {
                touch(&mut graph, u);
                live_set.insert(u);
            }
        }

        for phi in &block.phis {
            touch(&mut graph, phi.dst);
            for &other in live_set.iter() {
                interfere(&mut graph, phi.dst, other);
            }
            live_set.remove(&phi.dst);
        }
    }

    (graph, forbidden)
}

/// Chaitin-style simplify/spill, no coalescing. `Ok` gives a complete color
/// assignment; `Err` gives the vregs that must be spilled before retrying.
fn try_color(
    graph: &Map<VReg, Set<VReg>>,
    forbidden: &Map<VReg, Set<Register>>,
) -> Result<Map<VReg, Register>, Set<VReg>> {
    let k = ALLOCATABLE.len();

    let mut degree: Map<VReg, usize> = graph.iter().map(|(&v, n)| (v, n.len())).collect();
    let mut remaining: Set<VReg> = graph.keys().copied().collect();
    let mut stack: Vec<VReg> = vec![];

    while !remaining.is_empty() {
        if let Some(&v) = remaining.iter().find(|&&v| degree[&v] < k) {
            simplify(v, graph, &mut degree, &mut remaining);
            stack.push(v);
            continue;
        }
        // No node of degree < k: pick the highest-degree node as a spill
        // candidate (a "high degree, low use density" heuristic, simplified
        // to degree alone).
        let v = *remaining.iter().max_by_key(|&&v| degree[&v]).expect("remaining is non-empty");
        simplify(v, graph, &mut degree, &mut remaining);
        stack.push(v);
    }

    let mut colors: Map<VReg, Register> = Map::new();
    let mut spills: Set<VReg> = Set::new();
    while let Some(v) = stack.pop() {
        let used: Set<Register> = graph
            .get(&v)
            .into_iter()
            .flatten()
            .filter_map(|n| colors.get(n).copied())
            .collect();
        let banned = forbidden.get(&v);
        let choice = ALLOCATABLE.iter().find(|r| {
            !used.contains(*r) && !banned.is_some_and(|b| b.contains(*r))
        });
        match choice {
            Some(&r) => {
                colors.insert(v, r);
            }
            None => {
                spills.insert(v);
            }
        }
    }

    if spills.is_empty() {
        Ok(colors)
    } else {
        Err(spills)
    }
}

fn simplify(
    v: VReg,
    graph: &Map<VReg, Set<VReg>>,
    degree: &mut Map<VReg, usize>,
    remaining: &mut Set<VReg>,
) {
    remaining.remove(&v);
    for n in graph.get(&v).into_iter().flatten() {
        if remaining.contains(n) {
            if let Some(d) = degree.get_mut(n) {
                *d = d.saturating_sub(1);
            }
        }
    }
}

fn spill_rewrite(func: &mut Function, spills: &Set<VReg>) {
    let mut slots: Map<VReg, VReg> = Map::new();
    for &v in spills {
        let p = func.fresh_vreg();
        func.blocks.get_mut(&func.entry).expect("entry exists").insns.insert(0, Insn::Alloca(p, WORD));
        slots.insert(v, p);
    }

    for b in func.block_ids() {
        let phi_stores: Vec<Insn> = func.blocks[&b]
            .phis
            .iter()
            .filter_map(|p| slots.get(&p.dst).map(|&slot| Insn::Store(slot, p.dst)))
            .collect();

        let old_insns = std::mem::take(&mut func.blocks.get_mut(&b).expect("block exists").insns);
        let mut new_insns = Vec::with_capacity(old_insns.len() + phi_stores.len());
        new_insns.extend(phi_stores);
        for mut insn in old_insns {
            let mut loads: Vec<Insn> = vec![];
            insn.map_uses(|v| {
                if let Some(&slot) = slots.get(&v) {
                    let fresh = func_fresh(func);
                    loads.push(Insn::Load(fresh, slot));
                    fresh
                } else {
                    v
                }
            });
            new_insns.extend(loads);
            let spilled_def = insn.dst().filter(|d| slots.contains_key(d));
            new_insns.push(insn);
            if let Some(d) = spilled_def {
                new_insns.push(Insn::Store(slots[&d], d));
            }
        }
        func.blocks.get_mut(&b).expect("block exists").insns = new_insns;
    }

    for b in func.block_ids() {
        let incoming: Vec<(BlockId, VReg)> = func.blocks[&b]
            .phis
            .iter()
            .flat_map(|p| p.incomings.iter().map(|(&pred, &v)| (pred, v)))
            .filter(|(_, v)| slots.contains_key(v))
            .collect();
        for (pred, v) in incoming {
            let slot = slots[&v];
            let fresh = func.fresh_vreg();
            func.blocks.get_mut(&pred).expect("predecessor exists").insns.push(Insn::Load(fresh, slot));
            for phi in func.blocks.get_mut(&b).expect("block exists").phis.iter_mut() {
                if phi.incomings.get(&pred) == Some(&v) {
                    phi.incomings.insert(pred, fresh);
                }
            }
        }
    }
}

/// `map_uses`'s closure can't hold `&mut Function` (it already borrows
/// `func.blocks[b].insns` via the outer iteration), so mint fresh vreg ids
/// through the counter directly instead of going through `Function::fresh_vreg`.
fn func_fresh(func: &mut Function) -> VReg {
    let v = VReg(func.next_vreg);
    func.next_vreg += 1;
    v
}

/// Remove instructions whose result is unused and which have no side effect.
pub fn dce(func: &mut Function) {
    loop {
        let mut used: Set<VReg> = Set::new();
        for block in func.blocks.values() {
            for phi in &block.phis {
                for &v in phi.incomings.values() {
                    used.insert(v);
                }
            }
            for insn in &block.insns {
                for u in insn.uses() {
                    used.insert(u);
                }
            }
            for u in block.term.uses() {
                used.insert(u);
            }
        }

        let mut changed = false;
        for block in func.blocks.values_mut() {
            let before = block.insns.len();
            block.insns.retain(|insn| match insn {
                Insn::Store(..) | Insn::Call(..) => true,
                other => other.dst().map_or(true, |d| used.contains(&d)),
            });
            if block.insns.len() != before {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::front::{check, parse};
    use crate::middle::build::build;
    use crate::middle::mem2reg;

    fn colored(src: &str) -> (Function, Map<VReg, Register>) {
        let prog = parse(src).unwrap();
        check(&prog).unwrap();
        let mut m = build(&prog).unwrap();
        let mut f = m.funcs.remove(&id("main")).unwrap();
        mem2reg::run(&mut f);
        let colors = allocate(&mut f);
        (f, colors)
    }

    #[test]
    fn straight_line_function_colors_without_spilling() {
        let (_, colors) = colored("void main() { int x = 1; int y = 2; printInt(x + y); }");
        assert!(!colors.is_empty());
    }

    #[test]
    fn simultaneously_live_values_get_different_colors() {
        let (f, colors) = colored("void main() { int a = 1; int b = 2; printInt(a + b); }");
        let live = Liveness::build(&f);
        for b in f.block_ids() {
            let mut live_set = live.live_out[&b].clone();
            for insn in f.blocks[&b].insns.iter().rev() {
                if let Some(d) = insn.dst() {
                    for &other in &live_set {
                        if other != d {
                            if let (Some(cd), Some(co)) = (colors.get(&d), colors.get(&other)) {
                                assert_ne!(cd, co);
                            }
                        }
                    }
                    live_set.remove(&d);
                }
                live_set.extend(insn.uses());
            }
        }
    }

    #[test]
    fn dce_removes_dead_constant() {
        let prog = parse("void main() { int x = 1; printInt(2); }").unwrap();
        check(&prog).unwrap();
        let mut m = build(&prog).unwrap();
        let mut f = m.funcs.remove(&id("main")).unwrap();
        mem2reg::run(&mut f);
        dce(&mut f);
        let has_dead_const = f.blocks.values().any(|b| {
            b.insns.iter().any(|i| matches!(i, Insn::ConstInt(_, 1)))
        });
        assert!(!has_dead_const);
    }
}
