//! Promotion of non-escaping stack cells to SSA values.
//!
//! An `alloca` is promotable iff every use of its result is the `addr`
//! operand of a direct `load` or `store` — nothing ever computes a derived
//! pointer from it (`getelementptr`), passes it to a call, or stores the
//! pointer itself as a value. Every `alloca` this compiler emits already
//! points to a single primitive word (every Mx* value is 4 bytes, and
//! locals/fields/elements never alias a stack cell), so the "primitive
//! pointed-to type" half of the promotability condition is automatic here;
//! only the escape check does real work.
//!
//! Phi placement uses the iterated dominance frontier of each cell's def
//! sites; renaming is the classical dominator-tree DFS with a per-cell
//! stack of reaching definitions. Because this builder's `load`s are always
//! consumed immediately within the block that issues them (never cached
//! across blocks before this pass runs), renaming doesn't need a separate
//! def-use map: a single substitution table, keyed by the now-unique vreg
//! ids `build` minted, is enough to thread reaching values through later
//! uses of a promoted `load`'s result.

use crate::common::{Map, Set};

use super::cfg::Dom;
use super::ir::*;

pub fn run(func: &mut Function) {
    let dom = Dom::build(func);
    let promotable = promotable_cells(func);
    if promotable.is_empty() {
        return;
    }

    let mut defsites: Map<VReg, Set<BlockId>> = Map::new();
    for (&b, block) in &func.blocks {
        for insn in &block.insns {
            if let Insn::Store(addr, _) = insn {
                if promotable.contains(addr) {
                    defsites.entry(*addr).or_default().insert(b);
                }
            }
        }
    }

    let mut cell_for_phi: Map<VReg, VReg> = Map::new();
    for &cell in &promotable {
        let sites = defsites.get(&cell).cloned().unwrap_or_default();
        for b in iterated_df(&dom, &sites) {
            let p = func.fresh_vreg();
            func.blocks.get_mut(&b).expect("frontier block exists").phis.push(Phi {
                dst: p,
                incomings: Map::new(),
            });
            cell_for_phi.insert(p, cell);
        }
    }

    // Every cell gets a fallback reaching definition in the entry block —
    // reading a local before its first store is undefined, and this is as
    // good a value as any.
    let mut stacks: Map<VReg, Vec<VReg>> = Map::new();
    for &cell in &promotable {
        let undef = func.fresh_vreg();
        func.blocks
            .get_mut(&func.entry)
            .expect("entry exists")
            .insns
            .insert(0, Insn::ConstInt(undef, 0));
        stacks.insert(cell, vec![undef]);
    }

    let mut subst: Map<VReg, VReg> = Map::new();
    rename(func, &dom, &promotable, &cell_for_phi, func.entry, &mut stacks, &mut subst);
}

fn resolve(subst: &Map<VReg, VReg>, v: VReg) -> VReg {
    *subst.get(&v).unwrap_or(&v)
}

/// Every `alloca` whose result never does anything but feed a direct
/// `load`/`store`.
fn promotable_cells(func: &Function) -> Set<VReg> {
    let mut allocas: Set<VReg> = Set::new();
    for block in func.blocks.values() {
        for insn in &block.insns {
            if let Insn::Alloca(v, _) = insn {
                allocas.insert(*v);
            }
        }
    }
    let mut escaped: Set<VReg> = Set::new();
    for block in func.blocks.values() {
        for insn in &block.insns {
            match insn {
                Insn::Load(_, _) => {}
                Insn::Store(_, val) => {
                    if allocas.contains(val) {
                        escaped.insert(*val);
                    }
                }
                other => {
                    for u in other.uses() {
                        if allocas.contains(&u) {
                            escaped.insert(u);
                        }
                    }
                }
            }
        }
        for u in block.term.uses() {
            if allocas.contains(&u) {
                escaped.insert(u);
            }
        }
    }
    allocas.retain(|v| !escaped.contains(v));
    allocas
}

fn iterated_df(dom: &Dom, defsites: &Set<BlockId>) -> Set<BlockId> {
    let mut worklist: Vec<BlockId> = defsites.iter().copied().collect();
    let mut in_result: Set<BlockId> = Set::new();
    while let Some(b) = worklist.pop() {
        let Some(frontier) = dom.frontier.get(&b) else { continue };
        for &f in frontier {
            if in_result.insert(f) {
                worklist.push(f);
            }
        }
    }
    in_result
}

#[allow(clippy::too_many_arguments)]
fn rename(
    func: &mut Function,
    dom: &Dom,
    promotable: &Set<VReg>,
    cell_for_phi: &Map<VReg, VReg>,
    b: BlockId,
    stacks: &mut Map<VReg, Vec<VReg>>,
    subst: &mut Map<VReg, VReg>,
) {
    let mut pushed_cells: Vec<VReg> = vec![];

    let phi_dsts: Vec<VReg> = func.blocks[&b].phis.iter().map(|p| p.dst).collect();
    for dst in phi_dsts {
        let cell = cell_for_phi[&dst];
        stacks.get_mut(&cell).expect("cell has a stack").push(dst);
        pushed_cells.push(cell);
    }

    let old_insns = std::mem::take(&mut func.blocks.get_mut(&b).expect("block exists").insns);
    let mut new_insns = Vec::with_capacity(old_insns.len());
    for mut insn in old_insns {
        insn.map_uses(|v| resolve(subst, v));
        match insn {
            Insn::Alloca(v, _) if promotable.contains(&v) => {}
            Insn::Load(dst, addr) if promotable.contains(&addr) => {
                let reaching = *stacks[&addr].last().expect("cell always has a reaching def");
                subst.insert(dst, reaching);
            }
            Insn::Store(addr, val) if promotable.contains(&addr) => {
                stacks.get_mut(&addr).expect("cell has a stack").push(val);
                pushed_cells.push(addr);
            }
            other => new_insns.push(other),
        }
    }
    func.blocks.get_mut(&b).expect("block exists").insns = new_insns;
    func.blocks.get_mut(&b).expect("block exists").term.map_uses(|v| resolve(subst, v));

    let successors = func.blocks[&b].term.successors();
    for s in successors {
        for phi in &mut func.blocks.get_mut(&s).expect("successor exists").phis {
            if let Some(&cell) = cell_for_phi.get(&phi.dst) {
                let reaching = *stacks[&cell].last().expect("cell always has a reaching def");
                phi.incomings.insert(b, reaching);
            }
        }
    }

    let children = dom.children.get(&b).cloned().unwrap_or_default();
    for child in children {
        rename(func, dom, promotable, cell_for_phi, child, stacks, subst);
    }

    for cell in pushed_cells {
        stacks.get_mut(&cell).expect("cell has a stack").pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::front::{check, parse};
    use crate::middle::build::build;

    fn mem2reg_main(src: &str) -> Function {
        let prog = parse(src).unwrap();
        check(&prog).unwrap();
        let mut m = build(&prog).unwrap();
        let mut f = m.funcs.remove(&id("main")).unwrap();
        run(&mut f);
        f
    }

    fn has_alloca(f: &Function) -> bool {
        f.blocks.values().any(|b| b.insns.iter().any(|i| matches!(i, Insn::Alloca(..))))
    }

    #[test]
    fn straight_line_locals_are_fully_promoted() {
        let f = mem2reg_main("void main() { int x = 1; int y = x + 2; printInt(y); }");
        assert!(!has_alloca(&f));
        assert!(f.blocks.values().all(|b| b.insns.iter().all(|i| !matches!(i, Insn::Load(..) | Insn::Store(..)))));
    }

    #[test]
    fn if_merge_gets_a_phi() {
        let f = mem2reg_main("void main() { int x; if (true) { x = 1; } else { x = 2; } printInt(x); }");
        let phi_count: usize = f.blocks.values().map(|b| b.phis.len()).sum();
        assert_eq!(phi_count, 1);
        let phi = f.blocks.values().find(|b| !b.phis.is_empty()).unwrap().phis[0].clone();
        assert_eq!(phi.incomings.len(), 2);
    }

    #[test]
    fn loop_variable_gets_a_phi_at_header() {
        let f = mem2reg_main("void main() { int i = 0; while (i < 10) { i = i + 1; } }");
        let phi_count: usize = f.blocks.values().map(|b| b.phis.len()).sum();
        assert_eq!(phi_count, 1);
    }

    #[test]
    fn every_vreg_is_defined_exactly_once_after_promotion() {
        let f = mem2reg_main("void main() { int x = 0; while (x < 5) { x = x + 1; } printInt(x); }");
        let mut defs: Map<VReg, u32> = Map::new();
        for b in f.blocks.values() {
            for p in &b.phis {
                *defs.entry(p.dst).or_insert(0) += 1;
            }
            for i in &b.insns {
                if let Some(d) = i.dst() {
                    *defs.entry(d).or_insert(0) += 1;
                }
            }
        }
        assert!(defs.values().all(|&n| n == 1));
    }

    #[test]
    fn escaping_cell_is_not_promoted() {
        // Taking a field address via `this` keeps the field's own storage
        // live in memory; that's not an `alloca` at all in this builder
        // (fields are heap slots), so instead exercise an address that
        // genuinely escapes: none exist in this surface language without
        // pointers, so this test instead checks a non-escaping local in
        // the presence of a call is still promoted (calls don't take
        // addresses in Mx*).
        let f = mem2reg_main("void main() { int x = 1; printInt(x); x = 2; printInt(x); }");
        assert!(!has_alloca(&f));
    }
}
