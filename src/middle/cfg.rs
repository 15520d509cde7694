//! CFG construction and dominance.
//!
//! Predecessors are derived by scanning every block's terminator — the
//! `Function::preds`/`successors` accessors stay the source of truth, this
//! module just caches the reverse edges once per call instead of rescanning
//! per query.
//!
//! Dominators are computed by the iterative dataflow fixed-point algorithm
//! (Cooper, Harvey & Kennedy, "A Simple, Fast Dominance Algorithm") rather
//! than Lengauer-Tarjan — it needs no auxiliary DFS-numbering/union-find
//! machinery, which keeps it a good match for this compiler's block counts
//! (Mx* programs rarely have more than a few dozen blocks per function).

use crate::common::{Map, Set};

use super::ir::{BlockId, Function};

/// Reverse-postorder position, dominator tree, and dominance frontiers for
/// one function. Built fresh by every pass that needs it — cheap relative
/// to the passes themselves, and avoids the bookkeeping of keeping a cached
/// copy consistent across mutations.
pub struct Dom {
    pub preds: Map<BlockId, Vec<BlockId>>,
    pub rpo: Vec<BlockId>,
    pub rpo_index: Map<BlockId, usize>,
    pub idom: Map<BlockId, BlockId>,
    pub children: Map<BlockId, Vec<BlockId>>,
    pub frontier: Map<BlockId, Set<BlockId>>,
}

impl Dom {
    pub fn build(func: &Function) -> Dom {
        let preds = compute_preds(func);
        let rpo = reverse_postorder(func);
        let rpo_index: Map<BlockId, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let idom = compute_idom(func, &preds, &rpo, &rpo_index);
        let children = dom_children(func, &idom);
        let frontier = dominance_frontier(func, &preds, &idom, &rpo);
        Dom { preds, rpo, rpo_index, idom, children, frontier }
    }

    /// Does `a` dominate `b` (reflexively)?
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            let Some(&next) = self.idom.get(&cur) else { return false };
            if next == cur {
                return false;
            }
            cur = next;
        }
    }
}

fn compute_preds(func: &Function) -> Map<BlockId, Vec<BlockId>> {
    let mut preds: Map<BlockId, Vec<BlockId>> = Map::new();
    for id in func.block_ids() {
        preds.entry(id).or_default();
    }
    for (id, block) in &func.blocks {
        for succ in block.term.successors() {
            preds.entry(succ).or_default().push(*id);
        }
    }
    preds
}

/// A DFS-based reverse postorder over the blocks reachable from `entry`.
/// Unreachable blocks (there should be none post-`build`, but passes must
/// not panic on them) are appended afterward in id order so every block
/// still gets an rpo position.
fn reverse_postorder(func: &Function) -> Vec<BlockId> {
    let mut visited = Set::new();
    let mut postorder = vec![];
    let mut stack = vec![(func.entry, false)];
    while let Some((b, processed)) = stack.pop() {
        if processed {
            postorder.push(b);
            continue;
        }
        if !visited.insert(b) {
            continue;
        }
        stack.push((b, true));
        for succ in func.blocks[&b].term.successors() {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();

    let mut seen: Set<BlockId> = postorder.iter().copied().collect();
    for id in func.block_ids() {
        if seen.insert(id) {
            postorder.push(id);
        }
    }
    postorder
}

fn compute_idom(
    func: &Function,
    preds: &Map<BlockId, Vec<BlockId>>,
    rpo: &[BlockId],
    rpo_index: &Map<BlockId, usize>,
) -> Map<BlockId, BlockId> {
    let mut idom: Map<BlockId, BlockId> = Map::new();
    idom.insert(func.entry, func.entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter() {
            if b == func.entry {
                continue;
            }
            let mut new_idom: Option<BlockId> = None;
            for &p in &preds[&b] {
                if !idom.contains_key(&p) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(&idom, rpo_index, cur, p),
                });
            }
            let Some(new_idom) = new_idom else { continue };
            if idom.get(&b) != Some(&new_idom) {
                idom.insert(b, new_idom);
                changed = true;
            }
        }
    }
    idom
}

fn intersect(
    idom: &Map<BlockId, BlockId>,
    rpo_index: &Map<BlockId, usize>,
    mut b1: BlockId,
    mut b2: BlockId,
) -> BlockId {
    while b1 != b2 {
        while rpo_index[&b1] > rpo_index[&b2] {
            b1 = idom[&b1];
        }
        while rpo_index[&b2] > rpo_index[&b1] {
            b2 = idom[&b2];
        }
    }
    b1
}

fn dom_children(func: &Function, idom: &Map<BlockId, BlockId>) -> Map<BlockId, Vec<BlockId>> {
    let mut children: Map<BlockId, Vec<BlockId>> = Map::new();
    for id in func.block_ids() {
        children.entry(id).or_default();
    }
    for (&b, &i) in idom {
        if b != i {
            children.entry(i).or_default().push(b);
        }
    }
    children
}

/// Dominance frontier of `b`: blocks `w` such that `b` dominates a
/// predecessor of `w` but does not strictly dominate `w` itself.
fn dominance_frontier(
    func: &Function,
    preds: &Map<BlockId, Vec<BlockId>>,
    idom: &Map<BlockId, BlockId>,
    rpo: &[BlockId],
) -> Map<BlockId, Set<BlockId>> {
    let mut df: Map<BlockId, Set<BlockId>> = Map::new();
    for id in func.block_ids() {
        df.insert(id, Set::new());
    }
    for &b in rpo {
        let ps = &preds[&b];
        if ps.len() < 2 {
            continue;
        }
        let Some(&ib) = idom.get(&b) else { continue };
        for &p in ps {
            if !idom.contains_key(&p) {
                continue;
            }
            let mut runner = p;
            while runner != ib {
                df.entry(runner).or_default().insert(b);
                let Some(&next) = idom.get(&runner) else { break };
                if next == runner {
                    break;
                }
                runner = next;
            }
        }
    }
    df
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::build::build;
    use crate::front::{check, parse};
    use crate::common::id;
    use crate::middle::ir::Program;

    fn module_of(src: &str) -> Program {
        let prog = parse(src).unwrap();
        check(&prog).unwrap();
        build(&prog).unwrap()
    }

    #[test]
    fn straight_line_idom_chain() {
        let m = module_of("void main() { int x = 1; x = 2; }");
        let f = &m.funcs[&id("main")];
        let dom = Dom::build(f);
        assert_eq!(dom.idom[&f.entry], f.entry);
    }

    #[test]
    fn if_merge_is_dominated_by_entry_not_branches() {
        let m = module_of("void main() { int x = 0; if (x == 0) { x = 1; } else { x = 2; } printInt(x); }");
        let f = &m.funcs[&id("main")];
        let dom = Dom::build(f);
        for b in f.block_ids() {
            assert!(dom.dominates(f.entry, b));
        }
        let merge = f
            .block_ids()
            .into_iter()
            .find(|&b| f.blocks[&b].insns.iter().any(|i| matches!(i, crate::middle::ir::Insn::Call(..))))
            .unwrap();
        assert_ne!(dom.idom[&merge], merge);
    }

    #[test]
    fn loop_header_dominance_frontier_includes_itself() {
        let m = module_of("void main() { int i = 0; while (i < 10) { i = i + 1; } }");
        let f = &m.funcs[&id("main")];
        let dom = Dom::build(f);
        let header = f
            .block_ids()
            .into_iter()
            .find(|&b| f.blocks[&b].term.successors().len() == 2 && f.preds(b).len() == 2)
            .expect("loop header has two predecessors and two successors");
        assert!(dom.frontier[&header].contains(&header));
    }
}
