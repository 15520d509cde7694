//! AST -> IR lowering.
//!
//! Every local and every parameter is lowered to an `alloca` in the
//! function's entry block; reads become `load`, writes become `store`.
//! This sidesteps on-the-fly SSA construction entirely — `mem2reg`
//! (`middle::mem2reg`) promotes whichever cells never have their address
//! escape. Short-circuit `&&`/`||` and every loop/branch construct lower to
//! plain control flow over freshly minted blocks; `break`/`continue` consult
//! a pair of target stacks maintained while lowering a function body.

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::{id, Id, Map, Set};
use crate::front::ast::{self, BOp, Expr, ExprKind, FuncDecl, Stmt, Type, UnOp};

use super::ir::*;

#[derive(Display)]
#[display("IR build error: {}", self.0)]
pub struct BuildError(String);

impl Debug for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn err<T>(msg: impl Into<String>) -> Result<T, BuildError> {
    Err(BuildError(msg.into()))
}

/// All Mx* values are 4 bytes: ints, bools, and pointers alike.
const WORD: i32 = 4;

/// The synthesized function running non-constant global initializers,
/// called as the first act of `main`.
const INIT_FN: &str = "__init";

/// Read-only tables shared by every function being lowered.
struct Ctx {
    classes: Map<Id, ClassLayout>,
    globals: Set<Id>,
}

pub fn build(prog: &ast::Program) -> Result<Program, BuildError> {
    let mut module = Program::default();

    let mut classes = Map::new();
    for c in &prog.classes {
        let fields: Vec<(Id, i32)> = c
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name, i as i32 * WORD))
            .collect();
        let size = fields.len() as i32 * WORD;
        classes.insert(
            c.name,
            ClassLayout { fields, size, has_ctor: c.ctor.is_some() },
        );
    }
    module.classes = classes.clone();

    let global_names: Set<Id> = prog.globals.iter().map(|g| g.name).collect();
    let ctx = Ctx { classes, globals: global_names };

    // Constant-foldable initializers are baked into the GlobalDecl directly;
    // everything else is deferred to __init.
    let mut deferred: Vec<&ast::VarDecl> = vec![];
    let mut globals_out = vec![];
    for g in &prog.globals {
        let ginit = match &g.init {
            None => GlobalInit::Zero,
            Some(e) => match const_global_init(e, &mut module) {
                Some(gi) => gi,
                None => {
                    deferred.push(g);
                    GlobalInit::Zero
                }
            },
        };
        globals_out.push(GlobalDecl { name: g.name, init: ginit });
    }
    module.globals = globals_out;

    let has_init = !deferred.is_empty();
    if has_init {
        let f = build_init_fn(&mut module, &ctx, &deferred);
        module.funcs.insert(f.name, f);
    }

    for f in &prog.funcs {
        let is_main = f.name.as_str() == "main" && f.owner.is_none();
        let func = lower_function(&mut module, &ctx, f, None, is_main && has_init);
        module.funcs.insert(func.name, func);
    }
    for c in &prog.classes {
        if let Some(ctor) = &c.ctor {
            let func = lower_function(&mut module, &ctx, ctor, Some(c.name), false);
            module.funcs.insert(func.name, func);
        }
        for m in &c.methods {
            let func = lower_function(&mut module, &ctx, m, Some(c.name), false);
            module.funcs.insert(func.name, func);
        }
    }

    if !module.funcs.contains_key(&id("main")) {
        return err("lowered module has no main function");
    }

    Ok(module)
}

/// Does `e` fold to something a `GlobalInit` can represent directly? `None`
/// means the initializer must run at program start via `__init`.
fn const_global_init(e: &Expr, module: &mut Program) -> Option<GlobalInit> {
    match &e.kind {
        ExprKind::IntLit(n) => Some(GlobalInit::Int(*n)),
        ExprKind::BoolLit(b) => Some(GlobalInit::Int(*b as i32)),
        ExprKind::StrLit(s) => Some(GlobalInit::Str(module.intern_string(s))),
        ExprKind::Null => Some(GlobalInit::Zero),
        _ => None,
    }
}

fn build_init_fn(module: &mut Program, ctx: &Ctx, globals: &[&ast::VarDecl]) -> Function {
    let mut st = FnState::new(id(INIT_FN), None);
    for g in globals {
        let init = g.init.as_ref().expect("deferred global always has an initializer");
        let val = st.lower_expr(module, ctx, init);
        let addr = st.fresh_vreg();
        st.emit(Insn::GlobalAddr(addr, g.name));
        st.emit(Insn::Store(addr, val));
    }
    st.terminate(Term::Ret(None));
    st.finish()
}

fn lower_function(module: &mut Program, ctx: &Ctx, f: &FuncDecl, owner: Option<Id>, call_init: bool) -> Function {
    let name = match owner {
        Some(c) => id(format!("{c}.{}", f.name)),
        None => f.name,
    };
    let mut st = FnState::new(name, owner);

    if let Some(class) = owner {
        let this_param = st.fresh_vreg();
        st.func.params.push(this_param);
        let ptr = st.alloc_local(id("this"));
        st.emit(Insn::Store(ptr, this_param));
        let _ = class;
    }
    for (pname, _pty) in &f.params {
        let p = st.fresh_vreg();
        st.func.params.push(p);
        let ptr = st.alloc_local(*pname);
        st.emit(Insn::Store(ptr, p));
    }

    if call_init {
        st.emit(Insn::Call(None, id(INIT_FN), vec![]));
    }

    st.lower_block(module, ctx, &f.body);

    if matches!(st.term_of(st.cur), Term::Unreachable) {
        let ret = match f.ret {
            Type::Void => Term::Ret(None),
            _ => {
                let z = st.fresh_vreg();
                st.emit(Insn::ConstInt(z, 0));
                Term::Ret(Some(z))
            }
        };
        st.terminate(ret);
    }

    st.finish()
}

/// Per-function lowering state: the [`Function`] under construction, the
/// current insertion block, the lexical scope stack (name -> alloca
/// pointer), and the break/continue target stacks.
struct FnState {
    func: Function,
    cur: BlockId,
    scopes: Vec<Map<Id, VReg>>,
    owner: Option<Id>,
    breaks: Vec<BlockId>,
    continues: Vec<BlockId>,
}

impl FnState {
    fn new(name: Id, owner: Option<Id>) -> Self {
        let mut func = Function {
            name,
            params: vec![],
            entry: BlockId(0),
            blocks: Map::new(),
            next_vreg: 0,
            next_block: 0,
        };
        let entry = func.fresh_block();
        func.entry = entry;
        func.blocks.insert(entry, BasicBlock::default());
        FnState { func, cur: entry, scopes: vec![Map::new()], owner, breaks: vec![], continues: vec![] }
    }

    fn finish(mut self) -> Function {
        prune_unreachable(&mut self.func);
        self.func
    }

    fn fresh_vreg(&mut self) -> VReg {
        self.func.fresh_vreg()
    }

    fn fresh_block(&mut self) -> BlockId {
        let b = self.func.fresh_block();
        self.func.blocks.insert(b, BasicBlock::default());
        b
    }

    fn emit(&mut self, insn: Insn) {
        self.func.blocks.get_mut(&self.cur).expect("cur block exists").insns.push(insn);
    }

    /// Allocas always live in the entry block regardless of the block
    /// currently being built — mem2reg classifies by use, not position.
    fn emit_entry(&mut self, insn: Insn) {
        let entry = self.func.entry;
        self.func.blocks.get_mut(&entry).expect("entry block exists").insns.push(insn);
    }

    fn term_of(&self, b: BlockId) -> &Term {
        &self.func.blocks[&b].term
    }

    fn set_term(&mut self, b: BlockId, term: Term) {
        self.func.blocks.get_mut(&b).expect("block exists").term = term;
    }

    /// Set `cur`'s terminator, then open a fresh (unreachable) block as the
    /// new `cur` so later statements in the same AST block still have
    /// somewhere legal to land — they can never execute, and `finish`
    /// prunes the dead block away.
    fn terminate(&mut self, term: Term) {
        self.set_term(self.cur, term);
        self.cur = self.fresh_block();
    }

    /// Jump `cur` to `target` only if it isn't already terminated (an `if`
    /// branch or loop body that already returned/broke stays as-is).
    fn close_with(&mut self, target: BlockId) {
        if matches!(self.term_of(self.cur), Term::Unreachable) {
            self.set_term(self.cur, Term::Jmp(target));
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(Map::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup_ptr(&self, name: Id) -> Option<VReg> {
        self.scopes.iter().rev().find_map(|s| s.get(&name).copied())
    }

    /// Allocate a stack cell for a named local/parameter and bind it in the
    /// innermost scope.
    fn alloc_local(&mut self, name: Id) -> VReg {
        let ptr = self.fresh_vreg();
        self.emit_entry(Insn::Alloca(ptr, WORD));
        self.scopes.last_mut().expect("scope stack not empty").insert(name, ptr);
        ptr
    }

    /// An unnamed stack cell used by short-circuit lowering.
    fn alloc_temp(&mut self) -> VReg {
        let ptr = self.fresh_vreg();
        self.emit_entry(Insn::Alloca(ptr, WORD));
        ptr
    }

    /// A value nobody reads, minted so that every branch of a `void` call
    /// expression can still hand back a properly-defined [`VReg`].
    fn void_placeholder(&mut self) -> VReg {
        let v = self.fresh_vreg();
        self.emit(Insn::ConstInt(v, 0));
        v
    }

    fn this_ptr(&self) -> VReg {
        self.lookup_ptr(id("this")).expect("'this' only referenced inside a method")
    }

    // --- statements ---

    fn lower_block(&mut self, module: &mut Program, ctx: &Ctx, stmts: &[Stmt]) {
        self.push_scope();
        for s in stmts {
            self.lower_stmt(module, ctx, s);
        }
        self.pop_scope();
    }

    fn lower_stmt(&mut self, module: &mut Program, ctx: &Ctx, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(v) => {
                let ptr = self.alloc_local(v.name);
                if let Some(init) = &v.init {
                    let val = self.lower_expr(module, ctx, init);
                    self.emit(Insn::Store(ptr, val));
                }
            }
            Stmt::Assign(lhs, rhs) => {
                let val = self.lower_expr(module, ctx, rhs);
                self.lower_store(module, ctx, lhs, val);
            }
            Stmt::Expr(e) => {
                self.lower_expr(module, ctx, e);
            }
            Stmt::If { cond, tt, ff } => {
                let c = self.lower_expr(module, ctx, cond);
                let then_blk = self.fresh_block();
                let else_blk = self.fresh_block();
                let merge = self.fresh_block();
                self.set_term(self.cur, Term::Br(c, then_blk, else_blk));

                self.cur = then_blk;
                self.lower_block(module, ctx, tt);
                self.close_with(merge);

                self.cur = else_blk;
                self.lower_block(module, ctx, ff);
                self.close_with(merge);

                self.cur = merge;
            }
            Stmt::While { cond, body } => {
                let header = self.fresh_block();
                let body_blk = self.fresh_block();
                let exit = self.fresh_block();
                self.set_term(self.cur, Term::Jmp(header));

                self.cur = header;
                let c = self.lower_expr(module, ctx, cond);
                self.set_term(header, Term::Br(c, body_blk, exit));

                self.continues.push(header);
                self.breaks.push(exit);
                self.cur = body_blk;
                self.lower_block(module, ctx, body);
                self.close_with(header);
                self.continues.pop();
                self.breaks.pop();

                self.cur = exit;
            }
            Stmt::For { init, cond, step, body } => {
                self.push_scope();
                if let Some(init) = init {
                    self.lower_stmt(module, ctx, init);
                }
                let header = self.fresh_block();
                let body_blk = self.fresh_block();
                let step_blk = self.fresh_block();
                let exit = self.fresh_block();
                self.set_term(self.cur, Term::Jmp(header));

                self.cur = header;
                let c = match cond {
                    Some(cond) => self.lower_expr(module, ctx, cond),
                    None => {
                        let v = self.fresh_vreg();
                        self.emit(Insn::ConstBool(v, true));
                        v
                    }
                };
                self.set_term(header, Term::Br(c, body_blk, exit));

                self.continues.push(step_blk);
                self.breaks.push(exit);
                self.cur = body_blk;
                self.lower_block(module, ctx, body);
                self.close_with(step_blk);

                self.cur = step_blk;
                if let Some(step) = step {
                    self.lower_stmt(module, ctx, step);
                }
                self.close_with(header);
                self.continues.pop();
                self.breaks.pop();

                self.cur = exit;
                self.pop_scope();
            }
            Stmt::Break => {
                let target = *self.breaks.last().expect("sema rejects break outside a loop");
                self.terminate(Term::Jmp(target));
            }
            Stmt::Continue => {
                let target = *self.continues.last().expect("sema rejects continue outside a loop");
                self.terminate(Term::Jmp(target));
            }
            Stmt::Return(value) => {
                let v = value.as_ref().map(|e| self.lower_expr(module, ctx, e));
                self.terminate(Term::Ret(v));
            }
            Stmt::Block(body) => {
                self.lower_block(module, ctx, body);
            }
        }
    }

    fn lower_store(&mut self, module: &mut Program, ctx: &Ctx, lhs: &Expr, val: VReg) {
        match &lhs.kind {
            ExprKind::Var(name) => {
                if let Some(ptr) = self.lookup_ptr(*name) {
                    self.emit(Insn::Store(ptr, val));
                } else if ctx.globals.contains(name) {
                    let addr = self.fresh_vreg();
                    self.emit(Insn::GlobalAddr(addr, *name));
                    self.emit(Insn::Store(addr, val));
                } else {
                    let class = self.owner.expect("unresolved assignment target escaped sema");
                    let layout = &ctx.classes[&class];
                    let offset = layout.offset_of(*name);
                    let this = self.this_ptr();
                    let this_val = self.fresh_vreg();
                    self.emit(Insn::Load(this_val, this));
                    let addr = self.fresh_vreg();
                    self.emit(Insn::GepConst(addr, this_val, offset));
                    self.emit(Insn::Store(addr, val));
                }
            }
            ExprKind::Field(obj, name) => {
                let Type::Class(class) = obj.ty() else {
                    unreachable!("field assignment target must have class type");
                };
                let objval = self.lower_expr(module, ctx, obj);
                let layout = &ctx.classes[&class];
                let offset = layout.offset_of(*name);
                let addr = self.fresh_vreg();
                self.emit(Insn::GepConst(addr, objval, offset));
                self.emit(Insn::Store(addr, val));
            }
            ExprKind::Index(arr, idx) => {
                let arrval = self.lower_expr(module, ctx, arr);
                let idxval = self.lower_expr(module, ctx, idx);
                let addr = self.fresh_vreg();
                self.emit(Insn::GepIndex(addr, arrval, idxval, WORD));
                self.emit(Insn::Store(addr, val));
            }
            _ => unreachable!("sema only allows var/field/index assignment targets"),
        }
    }

    // --- expressions ---

    fn lower_expr(&mut self, module: &mut Program, ctx: &Ctx, e: &Expr) -> VReg {
        match &e.kind {
            ExprKind::IntLit(n) => {
                let v = self.fresh_vreg();
                self.emit(Insn::ConstInt(v, *n));
                v
            }
            ExprKind::BoolLit(b) => {
                let v = self.fresh_vreg();
                self.emit(Insn::ConstBool(v, *b));
                v
            }
            ExprKind::StrLit(s) => {
                let sid = module.intern_string(s);
                let v = self.fresh_vreg();
                self.emit(Insn::ConstStr(v, sid));
                v
            }
            ExprKind::Null => {
                let v = self.fresh_vreg();
                self.emit(Insn::ConstNull(v));
                v
            }
            ExprKind::This => {
                let ptr = self.this_ptr();
                let v = self.fresh_vreg();
                self.emit(Insn::Load(v, ptr));
                v
            }
            ExprKind::Var(name) => self.lower_var(ctx, *name),
            ExprKind::Unary(op, inner) => {
                let iv = self.lower_expr(module, ctx, inner);
                let v = self.fresh_vreg();
                match op {
                    UnOp::Neg => self.emit(Insn::Neg(v, iv)),
                    UnOp::Not => self.emit(Insn::Not(v, iv)),
                }
                v
            }
            ExprKind::Binary(op, lhs, rhs) => self.lower_binary(module, ctx, *op, lhs, rhs),
            ExprKind::Field(obj, name) => {
                let Type::Class(class) = obj.ty() else {
                    unreachable!("field access target must have class type");
                };
                let objval = self.lower_expr(module, ctx, obj);
                let layout = &ctx.classes[&class];
                let offset = layout.offset_of(*name);
                let addr = self.fresh_vreg();
                self.emit(Insn::GepConst(addr, objval, offset));
                let v = self.fresh_vreg();
                self.emit(Insn::Load(v, addr));
                v
            }
            ExprKind::Index(arr, idx) => {
                let arrval = self.lower_expr(module, ctx, arr);
                let idxval = self.lower_expr(module, ctx, idx);
                let addr = self.fresh_vreg();
                self.emit(Insn::GepIndex(addr, arrval, idxval, WORD));
                let v = self.fresh_vreg();
                self.emit(Insn::Load(v, addr));
                v
            }
            ExprKind::FuncCall(name, args) => self.lower_func_call(module, ctx, *name, args, &e.ty()),
            ExprKind::MethodCall(obj, name, args) => self.lower_method_call(module, ctx, obj, *name, args, &e.ty()),
            ExprKind::New(ty, args) => self.lower_new(module, ctx, ty, args),
            ExprKind::NewArray(_base, dims) => self.lower_new_array(module, ctx, dims),
            ExprKind::Len(inner) => {
                let val = self.lower_expr(module, ctx, inner);
                let addr = self.fresh_vreg();
                self.emit(Insn::GepConst(addr, val, -WORD));
                let v = self.fresh_vreg();
                self.emit(Insn::Load(v, addr));
                v
            }
        }
    }

    fn lower_var(&mut self, ctx: &Ctx, name: Id) -> VReg {
        if let Some(ptr) = self.lookup_ptr(name) {
            let v = self.fresh_vreg();
            self.emit(Insn::Load(v, ptr));
            return v;
        }
        if ctx.globals.contains(&name) {
            let addr = self.fresh_vreg();
            self.emit(Insn::GlobalAddr(addr, name));
            let v = self.fresh_vreg();
            self.emit(Insn::Load(v, addr));
            return v;
        }
        let class = self.owner.expect("unresolved variable escaped sema");
        let layout = &ctx.classes[&class];
        let offset = layout.offset_of(name);
        let this = self.this_ptr();
        let this_val = self.fresh_vreg();
        self.emit(Insn::Load(this_val, this));
        let addr = self.fresh_vreg();
        self.emit(Insn::GepConst(addr, this_val, offset));
        let v = self.fresh_vreg();
        self.emit(Insn::Load(v, addr));
        v
    }

    fn lower_binary(&mut self, module: &mut Program, ctx: &Ctx, op: BOp, lhs: &Expr, rhs: &Expr) -> VReg {
        if op.is_short_circuit() {
            return self.lower_short_circuit(module, ctx, op, lhs, rhs);
        }
        let lty = lhs.ty();
        if op == BOp::Add && lty == Type::Str {
            let l = self.lower_expr(module, ctx, lhs);
            let r = self.lower_expr(module, ctx, rhs);
            return self.string_call("string.add", vec![l, r]);
        }
        if lty == Type::Str && matches!(op, BOp::Eq | BOp::Ne | BOp::Lt | BOp::Le | BOp::Gt | BOp::Ge) {
            let name = match op {
                BOp::Eq => "string.eq",
                BOp::Ne => "string.ne",
                BOp::Lt => "string.lt",
                BOp::Le => "string.le",
                BOp::Gt => "string.gt",
                BOp::Ge => "string.ge",
                _ => unreachable!(),
            };
            let l = self.lower_expr(module, ctx, lhs);
            let r = self.lower_expr(module, ctx, rhs);
            return self.string_call(name, vec![l, r]);
        }
        let l = self.lower_expr(module, ctx, lhs);
        let r = self.lower_expr(module, ctx, rhs);
        let v = self.fresh_vreg();
        self.emit(Insn::Binary(v, op, l, r));
        v
    }

    fn lower_short_circuit(&mut self, module: &mut Program, ctx: &Ctx, op: BOp, lhs: &Expr, rhs: &Expr) -> VReg {
        let result = self.alloc_temp();
        let l = self.lower_expr(module, ctx, lhs);
        let rhs_blk = self.fresh_block();
        let short_blk = self.fresh_block();
        let merge = self.fresh_block();

        match op {
            BOp::And => self.set_term(self.cur, Term::Br(l, rhs_blk, short_blk)),
            BOp::Or => self.set_term(self.cur, Term::Br(l, short_blk, rhs_blk)),
            _ => unreachable!("only && and || short-circuit"),
        }

        self.cur = rhs_blk;
        let r = self.lower_expr(module, ctx, rhs);
        self.emit(Insn::Store(result, r));
        self.close_with(merge);

        self.cur = short_blk;
        let shortcut = self.fresh_vreg();
        self.emit(Insn::ConstBool(shortcut, matches!(op, BOp::Or)));
        self.emit(Insn::Store(result, shortcut));
        self.close_with(merge);

        self.cur = merge;
        let v = self.fresh_vreg();
        self.emit(Insn::Load(v, result));
        v
    }

    fn string_call(&mut self, name: &str, args: Vec<VReg>) -> VReg {
        let dst = self.fresh_vreg();
        self.emit(Insn::Call(Some(dst), id(name), args));
        dst
    }

    fn lower_func_call(&mut self, module: &mut Program, ctx: &Ctx, name: Id, args: &[Expr], ret: &Type) -> VReg {
        let argvals: Vec<VReg> = args.iter().map(|a| self.lower_expr(module, ctx, a)).collect();
        if *ret == Type::Void {
            self.emit(Insn::Call(None, name, argvals));
            self.void_placeholder()
        } else {
            let dst = self.fresh_vreg();
            self.emit(Insn::Call(Some(dst), name, argvals));
            dst
        }
    }

    fn lower_method_call(
        &mut self,
        module: &mut Program,
        ctx: &Ctx,
        obj: &Expr,
        name: Id,
        args: &[Expr],
        ret: &Type,
    ) -> VReg {
        if obj.ty() == Type::Str {
            let objval = self.lower_expr(module, ctx, obj);
            let mut argvals = vec![objval];
            argvals.extend(args.iter().map(|a| self.lower_expr(module, ctx, a)));
            let symbol = match name.as_str() {
                "substring" => "string.substring",
                "parseInt" => "string.parseInt",
                "ord" => "string.ord",
                other => unreachable!("unsupported string method {other} escaped sema"),
            };
            return self.string_call(symbol, argvals);
        }
        let Type::Class(class) = obj.ty() else {
            unreachable!("method call receiver must be a class or string");
        };
        let objval = self.lower_expr(module, ctx, obj);
        let mut argvals = vec![objval];
        argvals.extend(args.iter().map(|a| self.lower_expr(module, ctx, a)));
        let symbol = id(format!("{class}.{name}"));
        if *ret == Type::Void {
            self.emit(Insn::Call(None, symbol, argvals));
            self.void_placeholder()
        } else {
            let dst = self.fresh_vreg();
            self.emit(Insn::Call(Some(dst), symbol, argvals));
            dst
        }
    }

    fn lower_new(&mut self, module: &mut Program, ctx: &Ctx, ty: &Type, args: &[Expr]) -> VReg {
        let Type::Class(class) = ty else {
            unreachable!("'new' of a non-class type escaped sema");
        };
        let layout = &ctx.classes[class];
        let size = layout.size.max(WORD);
        let size_v = self.fresh_vreg();
        self.emit(Insn::ConstInt(size_v, size));
        let ptr = self.fresh_vreg();
        self.emit(Insn::Malloc(ptr, size_v));
        if layout.has_ctor {
            let mut argvals = vec![ptr];
            argvals.extend(args.iter().map(|a| self.lower_expr(module, ctx, a)));
            let symbol = id(format!("{class}.{class}"));
            self.emit(Insn::Call(None, symbol, argvals));
        }
        ptr
    }

    /// `new T[n1][n2]...`: allocates a length-prefixed block of `n1`
    /// elements (pointers, for every dimension but the last) and, for
    /// `dims.len() > 1`, loops from `0` to `n1` recursively allocating and
    /// storing each inner array.
    fn lower_new_array(&mut self, module: &mut Program, ctx: &Ctx, dims: &[Expr]) -> VReg {
        let n = self.lower_expr(module, ctx, &dims[0]);
        let word_v = self.fresh_vreg();
        self.emit(Insn::ConstInt(word_v, WORD));
        let elems_bytes = self.fresh_vreg();
        self.emit(Insn::Binary(elems_bytes, BOp::Mul, n, word_v));
        let total_bytes = self.fresh_vreg();
        self.emit(Insn::Binary(total_bytes, BOp::Add, elems_bytes, word_v));
        let raw = self.fresh_vreg();
        self.emit(Insn::Malloc(raw, total_bytes));
        self.emit(Insn::Store(raw, n));
        let arr = self.fresh_vreg();
        self.emit(Insn::GepConst(arr, raw, WORD));

        if dims.len() > 1 {
            let idx_ptr = self.alloc_temp();
            let zero = self.fresh_vreg();
            self.emit(Insn::ConstInt(zero, 0));
            self.emit(Insn::Store(idx_ptr, zero));

            let header = self.fresh_block();
            let body_blk = self.fresh_block();
            let step_blk = self.fresh_block();
            let exit = self.fresh_block();
            self.set_term(self.cur, Term::Jmp(header));

            self.cur = header;
            let i_h = self.fresh_vreg();
            self.emit(Insn::Load(i_h, idx_ptr));
            let cond = self.fresh_vreg();
            self.emit(Insn::Binary(cond, BOp::Lt, i_h, n));
            self.set_term(header, Term::Br(cond, body_blk, exit));

            self.cur = body_blk;
            let i_b = self.fresh_vreg();
            self.emit(Insn::Load(i_b, idx_ptr));
            let inner = self.lower_new_array(module, ctx, &dims[1..]);
            let slot = self.fresh_vreg();
            self.emit(Insn::GepIndex(slot, arr, i_b, WORD));
            self.emit(Insn::Store(slot, inner));
            self.close_with(step_blk);

            self.cur = step_blk;
            let i_s = self.fresh_vreg();
            self.emit(Insn::Load(i_s, idx_ptr));
            let one = self.fresh_vreg();
            self.emit(Insn::ConstInt(one, 1));
            let next = self.fresh_vreg();
            self.emit(Insn::Binary(next, BOp::Add, i_s, one));
            self.emit(Insn::Store(idx_ptr, next));
            self.close_with(header);

            self.cur = exit;
        }

        arr
    }
}

/// Drop blocks unreachable from the entry — the dead continuations
/// `terminate` opens after every `return`/`break`/`continue` so later
/// statements in the same AST block have somewhere to land.
fn prune_unreachable(func: &mut Function) {
    let mut reachable = Set::new();
    let mut stack = vec![func.entry];
    while let Some(b) = stack.pop() {
        if !reachable.insert(b) {
            continue;
        }
        if let Some(block) = func.blocks.get(&b) {
            for s in block.term.successors() {
                stack.push(s);
            }
        }
    }
    func.blocks.retain(|id, _| reachable.contains(id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::{check, parse};

    fn build_ok(src: &str) -> Program {
        let prog = parse(src).unwrap();
        check(&prog).unwrap();
        build(&prog).unwrap()
    }

    fn every_block_has_one_terminator(f: &Function) -> bool {
        f.blocks.values().all(|b| !matches!(b.term, Term::Unreachable))
    }

    #[test]
    fn straight_line_function_has_one_block_with_a_ret() {
        let m = build_ok("void main() { int x = 1; }");
        let f = &m.funcs[&id("main")];
        assert!(every_block_has_one_terminator(f));
        assert!(matches!(f.blocks[&f.entry].term, Term::Ret(None)));
    }

    #[test]
    fn if_else_produces_three_extra_blocks() {
        let m = build_ok("void main() { int x = 0; if (x == 0) { x = 1; } else { x = 2; } }");
        let f = &m.funcs[&id("main")];
        assert!(f.blocks.len() >= 4);
        assert!(every_block_has_one_terminator(f));
    }

    #[test]
    fn break_in_while_targets_exit_block() {
        let m = build_ok("void main() { while (true) { break; } }");
        let f = &m.funcs[&id("main")];
        assert!(every_block_has_one_terminator(f));
    }

    #[test]
    fn dead_code_after_return_is_pruned() {
        let m = build_ok("int main() { return 1; int x = 2; return x; }");
        let f = &m.funcs[&id("main")];
        // Only the entry block should survive: nothing reaches the block
        // that would have held `int x = 2;`.
        assert_eq!(f.blocks.len(), 1);
    }

    #[test]
    fn class_ctor_and_method_get_mangled_names() {
        let m = build_ok(
            r#"
            class P {
                int x;
                P(int v) { x = v; }
                int getX() { return x; }
            }
            void main() { P p = new P(7); printlnInt(p.getX()); }
        "#,
        );
        assert!(m.funcs.contains_key(&id("P.P")));
        assert!(m.funcs.contains_key(&id("P.getX")));
    }

    #[test]
    fn global_with_non_constant_init_generates_init_fn() {
        let prog = parse("int x = 1 + 2; void main() { printInt(x); }").unwrap();
        check(&prog).unwrap();
        let m = build(&prog).unwrap();
        assert!(m.funcs.contains_key(&id(INIT_FN)));
    }

    #[test]
    fn global_constant_init_has_no_init_fn() {
        let prog = parse("int x = 5; void main() { printInt(x); }").unwrap();
        check(&prog).unwrap();
        let m = build(&prog).unwrap();
        assert!(!m.funcs.contains_key(&id(INIT_FN)));
    }

    #[test]
    fn string_concatenation_lowers_to_runtime_call() {
        let m = build_ok(r#"void main() { string s = "a" + "b"; }"#);
        let f = &m.funcs[&id("main")];
        let has_call = f.blocks.values().any(|b| {
            b.insns
                .iter()
                .any(|i| matches!(i, Insn::Call(_, name, _) if name.as_str() == "string.add"))
        });
        assert!(has_call);
    }
}
