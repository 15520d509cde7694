//! RV32IM instruction vocabulary.
//!
//! This models the instruction set as a small tagged enum rendered via
//! `Display`, rather than building strings directly in `codegen` — keeps
//! the two concerns (what instruction to emit, how it's spelled as text)
//! independently testable, and matches how most of this compiler's other
//! polymorphic IR nodes are modeled (tag plus operands, dispatch by match).
//!
//! # Registers
//!
//! RISC-V has 32 integer registers. Five are reserved and never considered
//! by the allocator: `zero` (hardwired), `ra` (return address, owned by the
//! call/return sequence itself), `sp` (stack pointer), `gp`/`tp` (global
//! and thread pointer, unused by this freestanding runtime but still not
//! ours to clobber). `fp` doubles as `s0`; this compiler always calls it
//! `fp` to keep the frame-pointer role visually distinct from the
//! callee-saved temporaries.
//!
//! The remaining 27 — `fp`, `s1`, `a0`-`a7`, `s2`-`s11`, `t0`-`t6` — are
//! `ALLOCATABLE`, exactly `regalloc`'s k.
//!
//! # Calling convention (RV32 ILP32)
//!
//! Arguments 1-8 go in `a0`-`a7`; the rest live on the stack just above the
//! caller's own frame. The return value comes back in `a0`. `a0`-`a7` and
//! `t0`-`t6` are caller-saved (a callee is free to clobber them); `fp` and
//! `s1`-`s11` are callee-saved, restored before `ret`.
#![allow(dead_code)]

use derive_more::Display;

use crate::common::Id;

/// Word size for RV32: every Mx* value (int, bool, pointer) is 4 bytes.
pub const WORD: i32 = 4;

/// Registers for the actual RISC-V machine, in `x0`-`x31` order.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Register {
    #[display("zero")]
    Zero,
    #[display("ra")]
    Ra,
    #[display("sp")]
    Sp,
    #[display("gp")]
    Gp,
    #[display("tp")]
    Tp,
    #[display("t0")]
    T0,
    #[display("t1")]
    T1,
    #[display("t2")]
    T2,
    #[display("fp")]
    Fp,
    #[display("s1")]
    S1,
    #[display("a0")]
    A0,
    #[display("a1")]
    A1,
    #[display("a2")]
    A2,
    #[display("a3")]
    A3,
    #[display("a4")]
    A4,
    #[display("a5")]
    A5,
    #[display("a6")]
    A6,
    #[display("a7")]
    A7,
    #[display("s2")]
    S2,
    #[display("s3")]
    S3,
    #[display("s4")]
    S4,
    #[display("s5")]
    S5,
    #[display("s6")]
    S6,
    #[display("s7")]
    S7,
    #[display("s8")]
    S8,
    #[display("s9")]
    S9,
    #[display("s10")]
    S10,
    #[display("s11")]
    S11,
    #[display("t3")]
    T3,
    #[display("t4")]
    T4,
    #[display("t5")]
    T5,
    #[display("t6")]
    T6,
}

/// Argument registers, in calling-convention order.
pub const ARG_REGISTERS: [Register; 8] =
    [Register::A0, Register::A1, Register::A2, Register::A3, Register::A4, Register::A5, Register::A6, Register::A7];

/// The 27 registers the allocator may assign, k for graph coloring.
/// Order doubles as color-preference order — low colors
/// land on `fp`/`s1` before the argument registers, leaving `a0`-`a7` free
/// for values that are about to flow into or out of a call anyway.
pub const ALLOCATABLE: [Register; 27] = [
    Register::Fp,
    Register::S1,
    Register::A0,
    Register::A1,
    Register::A2,
    Register::A3,
    Register::A4,
    Register::A5,
    Register::A6,
    Register::A7,
    Register::S2,
    Register::S3,
    Register::S4,
    Register::S5,
    Register::S6,
    Register::S7,
    Register::S8,
    Register::S9,
    Register::S10,
    Register::S11,
    Register::T0,
    Register::T1,
    Register::T2,
    Register::T3,
    Register::T4,
    Register::T5,
    Register::T6,
]
;

pub fn is_callee_saved(r: Register) -> bool {
    use Register::*;
    matches!(r, Fp | S1 | S2 | S3 | S4 | S5 | S6 | S7 | S8 | S9 | S10 | S11)
}

/// A location an instruction can address: a register-relative offset, or a
/// symbol (global, string literal, function) to be loaded/called
/// PC-relatively via the `la`/`jal` pseudo-ops.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
pub enum Mem {
    #[display("{_1}({_0})")]
    Reg(Register, i32),
    #[display("{_0}")]
    Symbol(Id),
}

/// A RISC-V instruction, one variant per mnemonic family actually needed by
/// this compiler's output. Pseudo-ops (`la`, `li`, `mv`, `call`, `ret`,
/// `j`) are spelled as themselves here and left to the assembler to expand
/// — GNU `as` handles `%hi`/`%lo` splitting and branch-range relaxation,
/// so this emitter never has to.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Insn {
    Label(Id),
    Comment(String),
    La { dst: Register, sym: Id },
    Li { dst: Register, imm: i32 },
    Mv { dst: Register, src: Register },
    Lw { dst: Register, src: Mem },
    Sw { src: Register, dst: Mem },
    Arith { op: ArithOp, dst: Register, lhs: Register, rhs: Register },
    ArithI { op: ArithOp, dst: Register, lhs: Register, imm: i32 },
    /// `dst = 1 if lhs < rhs else 0` (signed).
    Slt { dst: Register, lhs: Register, rhs: Register },
    Seqz { dst: Register, src: Register },
    Snez { dst: Register, src: Register },
    /// `dst = dst xor 1` — flips a 0/1 boolean, used to realize `le`/`ge`
    /// from `gt`/`lt`.
    Not01 { dst: Register },
    Call { target: Id },
    Jalr { target: Register },
    Ret,
    J { target: Id },
    Branch { cond: Cond, lhs: Register, rhs: Register, target: Id },
    Directive(String),
}

impl std::fmt::Display for Insn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Insn::*;
        match self {
            Label(l) => write!(f, "{l}:"),
            Comment(s) => write!(f, "  # {s}"),
            La { dst, sym } => write!(f, "  la {dst}, {sym}"),
            Li { dst, imm } => write!(f, "  li {dst}, {imm}"),
            Mv { dst, src } => write!(f, "  mv {dst}, {src}"),
            Lw { dst, src } => write!(f, "  lw {dst}, {src}"),
            Sw { src, dst } => write!(f, "  sw {src}, {dst}"),
            Arith { op, dst, lhs, rhs } => write!(f, "  {op} {dst}, {lhs}, {rhs}"),
            ArithI { op, dst, lhs, imm } => write!(f, "  {op}i {dst}, {lhs}, {imm}"),
            Slt { dst, lhs, rhs } => write!(f, "  slt {dst}, {lhs}, {rhs}"),
            Seqz { dst, src } => write!(f, "  seqz {dst}, {src}"),
            Snez { dst, src } => write!(f, "  snez {dst}, {src}"),
            Not01 { dst } => write!(f, "  xori {dst}, {dst}, 1"),
            Call { target } => write!(f, "  call {target}"),
            Jalr { target } => write!(f, "  jalr {target}"),
            Ret => write!(f, "  ret"),
            J { target } => write!(f, "  j {target}"),
            Branch { cond, lhs, rhs, target } => write!(f, "  b{cond} {lhs}, {rhs}, {target}"),
            Directive(s) => write!(f, "  {s}"),
        }
    }
}

/// Branch conditions. `Le`/`Gt` are standard GNU-`as` pseudo-branches
/// (`ble a, b, L` assembles as `bge b, a, L`); relying on the assembler for
/// that swap keeps this enum a direct mirror of `front::ast::BOp`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum Cond {
    #[display("eq")]
    Eq,
    #[display("ne")]
    Ne,
    #[display("lt")]
    Lt,
    #[display("le")]
    Le,
    #[display("gt")]
    Gt,
    #[display("ge")]
    Ge,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum ArithOp {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("rem")]
    Rem,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("xor")]
    Xor,
    #[display("sll")]
    Sll,
    #[display("sra")]
    Sra,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;

    #[test]
    fn allocatable_excludes_reserved_registers() {
        use Register::*;
        for r in [Zero, Ra, Sp, Gp, Tp] {
            assert!(!ALLOCATABLE.contains(&r));
        }
        assert_eq!(ALLOCATABLE.len(), 27);
    }

    #[test]
    fn instruction_display_matches_gnu_as_syntax() {
        let i = Insn::Arith { op: ArithOp::Add, dst: Register::T0, lhs: Register::A0, rhs: Register::A1 };
        assert_eq!(i.to_string(), "  add t0, a0, a1");
        let b = Insn::Branch { cond: Cond::Le, lhs: Register::T0, rhs: Register::T1, target: id("bb3") };
        assert_eq!(b.to_string(), "  ble t0, t1, bb3");
    }
}
