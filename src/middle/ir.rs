//! The SSA intermediate representation.
//!
//! This replaces the toy three-address `tir` the course skeleton shipped
//! with a richer memory+value model the rest of the pipeline (`cfg`,
//! `mem2reg`, `liveness`, `regalloc`, `critical_edge`, `phi_elim`) operates
//! on: every local starts life as a stack `Alloca`, gets promoted to a pure
//! SSA value by `mem2reg` where legal, and flows into the register
//! allocator as a virtual register that competes for one of the 27 machine
//! registers `back::asm::ALLOCATABLE` names.

use derive_more::derive::Display;

use crate::common::{Id, Map, Set};
use crate::front::ast::BOp;

/// A virtual register: an SSA value. Distinct from a machine register —
/// `regalloc` is the pass that maps these onto `back::asm::Reg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("%{_0}")]
pub struct VReg(pub u32);

/// A basic block label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("bb{_0}")]
pub struct BlockId(pub u32);

/// Interned string-literal id; the index into [`Program::strings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("str{_0}")]
pub struct StrId(pub u32);

/// A whole compiled program: every function plus the deduplicated string
/// pool and the layout of every class (needed by `codegen` to know field
/// offsets; Mx* has no inheritance, so no vtable is needed).
#[derive(Debug, Default)]
pub struct Program {
    pub funcs: Map<Id, Function>,
    pub strings: Vec<String>,
    pub classes: Map<Id, ClassLayout>,
    pub globals: Vec<GlobalDecl>,
}

impl Program {
    /// Deduplicate a string literal into the pool, returning its id.
    pub fn intern_string(&mut self, s: &str) -> StrId {
        if let Some(i) = self.strings.iter().position(|existing| existing == s) {
            return StrId(i as u32);
        }
        self.strings.push(s.to_string());
        StrId((self.strings.len() - 1) as u32)
    }
}

/// A module-level variable. Initializers that are themselves a constant
/// (an int/bool/null/string literal) are baked into `init` directly;
/// anything else (a reference to another global, a call, a `new`) is left
/// `Zero` here and instead assigned by the synthesized `__init` function,
/// called from `main`'s prologue (see `middle::build`).
#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub name: Id,
    pub init: GlobalInit,
}

#[derive(Debug, Clone, Copy)]
pub enum GlobalInit {
    Zero,
    Int(i32),
    Str(StrId),
}

/// Field layout within a class's heap object. Field 0 sits right after the
/// object header (there is none beyond what `malloc` itself returns — Mx*
/// objects carry no type tag since there is no runtime reflection or
/// virtual dispatch), at offset 0, word-sized fields thereafter.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    pub fields: Vec<(Id, i32)>,
    pub size: i32,
    pub has_ctor: bool,
}

impl ClassLayout {
    pub fn offset_of(&self, field: Id) -> i32 {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, off)| *off)
            .unwrap_or_else(|| panic!("class layout has no field {field}"))
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: Id,
    pub params: Vec<VReg>,
    pub entry: BlockId,
    pub blocks: Map<BlockId, BasicBlock>,
    /// Monotonic counters the builder hands out fresh ids from; regalloc's
    /// spill rewriting and phi_elim's scratch logic both mint new ones from
    /// here too, so they must stay in the builder's `Function`, not local
    /// to `build.rs`.
    pub next_vreg: u32,
    pub next_block: u32,
}

impl Function {
    pub fn fresh_vreg(&mut self) -> VReg {
        let v = VReg(self.next_vreg);
        self.next_vreg += 1;
        v
    }

    pub fn fresh_block(&mut self) -> BlockId {
        let b = BlockId(self.next_block);
        self.next_block += 1;
        b
    }

    /// Blocks in a deterministic order (ascending id), used by every pass
    /// that needs a stable iteration order (stable output, stable fixpoint
    /// iteration order for liveness).
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    pub fn preds(&self, target: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|(_, b)| b.term.successors().contains(&target))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct BasicBlock {
    pub phis: Vec<Phi>,
    pub insns: Vec<Insn>,
    pub term: Term,
}

#[derive(Debug, Clone)]
pub struct Phi {
    pub dst: VReg,
    /// One incoming value per predecessor, keyed by predecessor block.
    /// `BTreeMap` keeps the order deterministic regardless of how
    /// predecessors were discovered.
    pub incomings: Map<BlockId, VReg>,
}

#[derive(Debug, Clone)]
pub enum Insn {
    ConstInt(VReg, i32),
    ConstBool(VReg, bool),
    ConstStr(VReg, StrId),
    ConstNull(VReg),
    /// Plain SSA copy; introduced by mem2reg for trivial renames and by
    /// phi_elim for parallel-copy sequencing.
    Copy(VReg, VReg),
    Binary(VReg, BOp, VReg, VReg),
    /// Integer negation: `0 - x`. `front::ast::UnOp::Neg` lowers to this.
    Neg(VReg, VReg),
    /// Boolean complement: `icmp eq x, false`. `UnOp::Not` lowers to this.
    Not(VReg, VReg),
    /// A stack slot for a not-yet-promoted local; `mem2reg` removes every
    /// `Alloca` whose address never escapes (is never passed to a function
    /// or stored into memory) by replacing its loads/stores with direct
    /// SSA value flow.
    Alloca(VReg, i32),
    Load(VReg, VReg),
    Store(VReg, VReg),
    /// Pointer + constant byte offset, used for field access and for the
    /// array length word at `ptr - 4`.
    GepConst(VReg, VReg, i32),
    /// Pointer + `index * elem_size` (no bounds check — out-of-range access
    /// is left undefined behavior, same as null-deref and overflow).
    GepIndex(VReg, VReg, VReg, i32),
    Call(Option<VReg>, Id, Vec<VReg>),
    /// `malloc(size)`, the one allocation primitive the ABI names; `new`
    /// and `new T[n]` both lower through this.
    Malloc(VReg, VReg),
    /// The address of a module-level global.
    GlobalAddr(VReg, Id),
}

impl Insn {
    pub fn dst(&self) -> Option<VReg> {
        use Insn::*;
        match self {
            ConstInt(d, _) | ConstBool(d, _) | ConstStr(d, _) | ConstNull(d) | Copy(d, _) | Binary(d, ..)
            | Neg(d, _) | Not(d, _) | Alloca(d, _) | Load(d, _) | GepConst(d, ..) | GepIndex(d, ..)
            | Malloc(d, _) | GlobalAddr(d, _) => Some(*d),
            Store(..) => None,
            Call(d, ..) => *d,
        }
    }

    pub fn uses(&self) -> Vec<VReg> {
        use Insn::*;
        match self {
            ConstInt(..) | ConstBool(..) | ConstStr(..) | ConstNull(..) | Alloca(..) | GlobalAddr(..) => vec![],
            Copy(_, s) | Neg(_, s) | Not(_, s) | Load(_, s) => vec![*s],
            Binary(_, _, l, r) => vec![*l, *r],
            Store(addr, val) => vec![*addr, *val],
            GepConst(_, base, _) => vec![*base],
            GepIndex(_, base, idx, _) => vec![*base, *idx],
            Malloc(_, size) => vec![*size],
            Call(_, _, args) => args.clone(),
        }
    }

    /// Rewrite every use in place (used by `regalloc`'s spill rewriting and
    /// by `phi_elim`'s renaming).
    pub fn map_uses(&mut self, mut f: impl FnMut(VReg) -> VReg) {
        use Insn::*;
        match self {
            ConstInt(..) | ConstBool(..) | ConstStr(..) | ConstNull(..) | Alloca(..) | GlobalAddr(..) => {}
            Copy(_, s) | Neg(_, s) | Not(_, s) | Load(_, s) => *s = f(*s),
            Binary(_, _, l, r) => {
                *l = f(*l);
                *r = f(*r);
            }
            Store(addr, val) => {
                *addr = f(*addr);
                *val = f(*val);
            }
            GepConst(_, base, _) => *base = f(*base),
            GepIndex(_, base, idx, _) => {
                *base = f(*base);
                *idx = f(*idx);
            }
            Malloc(_, size) => *size = f(*size),
            Call(_, _, args) => {
                for a in args {
                    *a = f(*a);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Term {
    #[default]
    Unreachable,
    Ret(Option<VReg>),
    Jmp(BlockId),
    Br(VReg, BlockId, BlockId),
}

impl Term {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Term::Unreachable | Term::Ret(_) => vec![],
            Term::Jmp(b) => vec![*b],
            Term::Br(_, t, f) => vec![*t, *f],
        }
    }

    pub fn uses(&self) -> Vec<VReg> {
        match self {
            Term::Unreachable | Term::Jmp(_) | Term::Ret(None) => vec![],
            Term::Ret(Some(v)) => vec![*v],
            Term::Br(c, _, _) => vec![*c],
        }
    }

    pub fn map_uses(&mut self, mut f: impl FnMut(VReg) -> VReg) {
        match self {
            Term::Unreachable | Term::Jmp(_) | Term::Ret(None) => {}
            Term::Ret(Some(v)) => *v = f(*v),
            Term::Br(c, _, _) => *c = f(*c),
        }
    }
}

/// All vregs a block defines: phi destinations plus every instruction dst.
pub fn defs_in_block(b: &BasicBlock) -> Set<VReg> {
    let mut s = Set::new();
    for p in &b.phis {
        s.insert(p.dst);
    }
    for i in &b.insns {
        if let Some(d) = i.dst() {
            s.insert(d);
        }
    }
    s
}
