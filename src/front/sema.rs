//! The semantic checker.
//!
//! Walks a freshly parsed [`Program`], resolves every name to a local,
//! parameter, field, global, or function, type-checks every expression and
//! statement, and fills in each [`Expr`]'s [`TypeSlot`] via
//! [`Expr::set_ty`]. By the time [`check`] returns `Ok`, the builder
//! (`middle::build`) can assume the program is well-typed and every name
//! reference is meaningful — it does no resolution of its own.

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::{id, Id, Map};

use super::ast::*;

#[derive(Display)]
#[display("Semantic error: {}", self.0)]
pub struct SemaError(String);

impl Debug for SemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn err<T>(msg: impl Into<String>) -> Result<T, SemaError> {
    Err(SemaError(msg.into()))
}

/// A free function or method signature.
struct FuncSig {
    params: Vec<Type>,
    ret: Type,
}

struct ClassInfo {
    fields: Map<Id, Type>,
    methods: Map<Id, FuncSig>,
    ctor_params: Option<Vec<Type>>,
}

struct Globals {
    classes: Map<Id, ClassInfo>,
    funcs: Map<Id, FuncSig>,
    globals: Map<Id, Type>,
}

/// Lexical scope stack for locals/params, one frame per block.
struct Scopes(Vec<Map<Id, Type>>);

impl Scopes {
    fn push(&mut self) {
        self.0.push(Map::new());
    }
    fn pop(&mut self) {
        self.0.pop();
    }
    fn declare(&mut self, name: Id, ty: Type) -> Result<(), SemaError> {
        let top = self.0.last_mut().expect("scope stack must not be empty");
        if top.contains_key(&name) {
            return err(format!("{name} is already declared in this scope"));
        }
        top.insert(name, ty);
        Ok(())
    }
    fn lookup(&self, name: Id) -> Option<Type> {
        self.0.iter().rev().find_map(|s| s.get(&name).cloned())
    }
}

fn builtins() -> Map<Id, FuncSig> {
    let mut m = Map::new();
    let f = |params: Vec<Type>, ret: Type| FuncSig { params, ret };
    m.insert(id("print"), f(vec![Type::Str], Type::Void));
    m.insert(id("println"), f(vec![Type::Str], Type::Void));
    m.insert(id("printInt"), f(vec![Type::Int], Type::Void));
    m.insert(id("printlnInt"), f(vec![Type::Int], Type::Void));
    m.insert(id("getString"), f(vec![], Type::Str));
    m.insert(id("getInt"), f(vec![], Type::Int));
    m.insert(id("toString"), f(vec![Type::Int], Type::Str));
    m
}

pub fn check(prog: &Program) -> Result<(), SemaError> {
    let mut classes = Map::new();
    for c in &prog.classes {
        if classes.contains_key(&c.name) {
            return err(format!("class {} is declared more than once", c.name));
        }
        let mut fields = Map::new();
        for f in &c.fields {
            if fields.insert(f.name, f.ty.clone()).is_some() {
                return err(format!("class {} declares field {} more than once", c.name, f.name));
            }
        }
        let mut methods = Map::new();
        for m in &c.methods {
            let sig = FuncSig {
                params: m.params.iter().map(|(_, t)| t.clone()).collect(),
                ret: m.ret.clone(),
            };
            if methods.insert(m.name, sig).is_some() {
                return err(format!("class {} declares method {} more than once", c.name, m.name));
            }
        }
        let ctor_params = c
            .ctor
            .as_ref()
            .map(|ctor| ctor.params.iter().map(|(_, t)| t.clone()).collect());
        classes.insert(
            c.name,
            ClassInfo { fields, methods, ctor_params },
        );
    }

    let mut funcs = builtins();
    for f in &prog.funcs {
        let sig = FuncSig {
            params: f.params.iter().map(|(_, t)| t.clone()).collect(),
            ret: f.ret.clone(),
        };
        if funcs.insert(f.name, sig).is_some() {
            return err(format!("function {} is declared more than once", f.name));
        }
    }

    let mut globals = Map::new();
    for g in &prog.globals {
        if globals.insert(g.name, g.ty.clone()).is_some() {
            return err(format!("global {} is declared more than once", g.name));
        }
    }

    let ctx = Globals { classes, funcs, globals };

    // Global initializers see only other globals, never `this` or locals.
    for g in &prog.globals {
        if let Some(init) = &g.init {
            let mut scopes = Scopes(vec![Map::new()]);
            let ty = check_expr(init, &ctx, &mut scopes, None)?;
            expect_assignable(&g.ty, &ty, &ctx)?;
        }
    }

    for c in &prog.classes {
        if let Some(ctor) = &c.ctor {
            if ctor.name != c.name {
                return err(format!("constructor of {} must be named {}", c.name, c.name));
            }
            check_func(ctor, &ctx, Some(c.name))?;
        }
        for m in &c.methods {
            check_func(m, &ctx, Some(c.name))?;
        }
    }

    let mut saw_main = false;
    for f in &prog.funcs {
        if f.name.as_str() == "main" {
            saw_main = true;
            if f.ret != Type::Int && f.ret != Type::Void {
                return err("main must return int or void");
            }
            if !f.params.is_empty() {
                return err("main must take no parameters");
            }
        }
        check_func(f, &ctx, None)?;
    }
    if !saw_main {
        return err("program has no main function");
    }

    Ok(())
}

fn check_func(f: &FuncDecl, ctx: &Globals, owner: Option<Id>) -> Result<(), SemaError> {
    let mut scopes = Scopes(vec![Map::new()]);
    for (name, ty) in &f.params {
        scopes.declare(*name, ty.clone())?;
    }
    let ret = f.ret.clone();
    check_block(&f.body, ctx, &mut scopes, owner, &ret, 0)?;
    Ok(())
}

fn check_block(
    stmts: &[Stmt],
    ctx: &Globals,
    scopes: &mut Scopes,
    owner: Option<Id>,
    ret: &Type,
    loop_depth: u32,
) -> Result<(), SemaError> {
    scopes.push();
    for s in stmts {
        check_stmt(s, ctx, scopes, owner, ret, loop_depth)?;
    }
    scopes.pop();
    Ok(())
}

fn check_stmt(
    stmt: &Stmt,
    ctx: &Globals,
    scopes: &mut Scopes,
    owner: Option<Id>,
    ret: &Type,
    loop_depth: u32,
) -> Result<(), SemaError> {
    match stmt {
        Stmt::VarDecl(v) => {
            if let Some(init) = &v.init {
                let ty = check_expr(init, ctx, scopes, owner)?;
                expect_assignable(&v.ty, &ty, ctx)?;
            }
            scopes.declare(v.name, v.ty.clone())?;
        }
        Stmt::Assign(lhs, rhs) => {
            let lty = check_expr(lhs, ctx, scopes, owner)?;
            if !matches!(lhs.kind, ExprKind::Var(_) | ExprKind::Field(..) | ExprKind::Index(..)) {
                return err("left side of assignment must be a variable, field, or array element");
            }
            let rty = check_expr(rhs, ctx, scopes, owner)?;
            expect_assignable(&lty, &rty, ctx)?;
        }
        Stmt::Expr(e) => {
            check_expr(e, ctx, scopes, owner)?;
        }
        Stmt::If { cond, tt, ff } => {
            let cty = check_expr(cond, ctx, scopes, owner)?;
            expect_eq(&Type::Bool, &cty, "if condition")?;
            check_block(tt, ctx, scopes, owner, ret, loop_depth)?;
            check_block(ff, ctx, scopes, owner, ret, loop_depth)?;
        }
        Stmt::While { cond, body } => {
            let cty = check_expr(cond, ctx, scopes, owner)?;
            expect_eq(&Type::Bool, &cty, "while condition")?;
            check_block(body, ctx, scopes, owner, ret, loop_depth + 1)?;
        }
        Stmt::For { init, cond, step, body } => {
            scopes.push();
            if let Some(init) = init {
                check_stmt(init, ctx, scopes, owner, ret, loop_depth)?;
            }
            if let Some(cond) = cond {
                let cty = check_expr(cond, ctx, scopes, owner)?;
                expect_eq(&Type::Bool, &cty, "for condition")?;
            }
            if let Some(step) = step {
                check_stmt(step, ctx, scopes, owner, ret, loop_depth)?;
            }
            check_block(body, ctx, scopes, owner, ret, loop_depth + 1)?;
            scopes.pop();
        }
        Stmt::Break => {
            if loop_depth == 0 {
                return err("break outside of a loop");
            }
        }
        Stmt::Continue => {
            if loop_depth == 0 {
                return err("continue outside of a loop");
            }
        }
        Stmt::Return(value) => match (value, ret) {
            (None, Type::Void) => {}
            (None, _) => return err(format!("function must return a value of type {ret}")),
            (Some(e), _) => {
                let ty = check_expr(e, ctx, scopes, owner)?;
                expect_assignable(ret, &ty, ctx)?;
            }
        },
        Stmt::Block(body) => {
            check_block(body, ctx, scopes, owner, ret, loop_depth)?;
        }
    }
    Ok(())
}

fn expect_eq(want: &Type, got: &Type, what: &str) -> Result<(), SemaError> {
    if want != got {
        return err(format!("{what} must have type {want}, found {got}"));
    }
    Ok(())
}

/// Is a value of type `from` assignable to a location of type `to`? Mx*
/// allows `null` into any class or array type, and otherwise requires exact
/// type equality (no numeric widening, no class subtyping).
fn expect_assignable(to: &Type, from: &Type, _ctx: &Globals) -> Result<(), SemaError> {
    if to == from {
        return Ok(());
    }
    if matches!(from, Type::Null) && matches!(to, Type::Class(_) | Type::Array(_)) {
        return Ok(());
    }
    err(format!("cannot assign a value of type {from} to a location of type {to}"))
}

fn class_of<'a>(ctx: &'a Globals, ty: &Type) -> Option<&'a ClassInfo> {
    match ty {
        Type::Class(name) => ctx.classes.get(name),
        _ => None,
    }
}

fn check_expr(e: &Expr, ctx: &Globals, scopes: &mut Scopes, owner: Option<Id>) -> Result<Type, SemaError> {
    let ty = check_expr_kind(&e.kind, ctx, scopes, owner)?;
    e.set_ty(ty.clone());
    Ok(ty)
}

fn check_expr_kind(kind: &ExprKind, ctx: &Globals, scopes: &mut Scopes, owner: Option<Id>) -> Result<Type, SemaError> {
    match kind {
        ExprKind::IntLit(_) => Ok(Type::Int),
        ExprKind::BoolLit(_) => Ok(Type::Bool),
        ExprKind::StrLit(_) => Ok(Type::Str),
        ExprKind::Null => Ok(Type::Null),
        ExprKind::This => match owner {
            Some(class) => Ok(Type::Class(class)),
            None => err("'this' used outside of a method"),
        },
        ExprKind::Var(name) => scopes
            .lookup(*name)
            .or_else(|| ctx.globals.get(name).cloned())
            .or_else(|| owner.and_then(|c| ctx.classes.get(&c)).and_then(|c| c.fields.get(name).cloned()))
            .ok_or_else(|| SemaError(format!("undeclared variable {name}"))),
        ExprKind::Unary(op, inner) => {
            let ty = check_expr(inner, ctx, scopes, owner)?;
            match op {
                UnOp::Neg => {
                    expect_eq(&Type::Int, &ty, "operand of unary -")?;
                    Ok(Type::Int)
                }
                UnOp::Not => {
                    expect_eq(&Type::Bool, &ty, "operand of !")?;
                    Ok(Type::Bool)
                }
            }
        }
        ExprKind::Binary(op, lhs, rhs) => {
            let lty = check_expr(lhs, ctx, scopes, owner)?;
            let rty = check_expr(rhs, ctx, scopes, owner)?;
            check_binary(*op, &lty, &rty)
        }
        ExprKind::Field(obj, name) => {
            let oty = check_expr(obj, ctx, scopes, owner)?;
            let class = class_of(ctx, &oty).ok_or_else(|| SemaError(format!("{oty} has no field {name}")))?;
            class
                .fields
                .get(name)
                .cloned()
                .ok_or_else(|| SemaError(format!("{oty} has no field {name}")))
        }
        ExprKind::Index(arr, idx) => {
            let aty = check_expr(arr, ctx, scopes, owner)?;
            let ity = check_expr(idx, ctx, scopes, owner)?;
            expect_eq(&Type::Int, &ity, "array index")?;
            match aty {
                Type::Array(elem) => Ok(*elem),
                other => err(format!("cannot index into a value of type {other}")),
            }
        }
        ExprKind::FuncCall(name, args) => {
            let sig = ctx
                .funcs
                .get(name)
                .ok_or_else(|| SemaError(format!("undeclared function {name}")))?;
            check_args(&sig.params, args, ctx, scopes, owner)?;
            Ok(sig.ret.clone())
        }
        ExprKind::MethodCall(obj, name, args) => {
            let oty = check_expr(obj, ctx, scopes, owner)?;
            if oty == Type::Str {
                return check_string_method(*name, args, ctx, scopes, owner);
            }
            let class = class_of(ctx, &oty).ok_or_else(|| SemaError(format!("{oty} has no method {name}")))?;
            let sig = class
                .methods
                .get(name)
                .ok_or_else(|| SemaError(format!("{oty} has no method {name}")))?;
            let params = sig.params.clone();
            let ret = sig.ret.clone();
            check_args(&params, args, ctx, scopes, owner)?;
            Ok(ret)
        }
        ExprKind::New(ty, args) => {
            if let Type::Class(name) = ty {
                let class = ctx
                    .classes
                    .get(name)
                    .ok_or_else(|| SemaError(format!("unknown class {name}")))?;
                match &class.ctor_params {
                    Some(params) => {
                        let params = params.clone();
                        check_args(&params, args, ctx, scopes, owner)?;
                    }
                    None if !args.is_empty() => {
                        return err(format!("class {name} has no constructor to take arguments"));
                    }
                    None => {}
                }
                Ok(ty.clone())
            } else {
                err(format!("cannot construct a value of non-class type {ty}"))
            }
        }
        ExprKind::NewArray(base, dims) => {
            for d in dims {
                let dty = check_expr(d, ctx, scopes, owner)?;
                expect_eq(&Type::Int, &dty, "array dimension")?;
            }
            let mut ty = base.clone();
            for _ in dims {
                ty = Type::Array(Box::new(ty));
            }
            Ok(ty)
        }
        ExprKind::Len(inner) => {
            let ty = check_expr(inner, ctx, scopes, owner)?;
            match ty {
                Type::Array(_) | Type::Str => Ok(Type::Int),
                other => err(format!("{other} has no length")),
            }
        }
    }
}

/// The builtin `string` methods (`.length()`/`.size()` are sugared by the
/// parser into [`ExprKind::Len`] before this ever sees them): `substring`,
/// `parseInt`, `ord`.
fn check_string_method(
    name: Id,
    args: &[Expr],
    ctx: &Globals,
    scopes: &mut Scopes,
    owner: Option<Id>,
) -> Result<Type, SemaError> {
    match name.as_str() {
        "substring" => {
            check_args(&[Type::Int, Type::Int], args, ctx, scopes, owner)?;
            Ok(Type::Str)
        }
        "parseInt" => {
            check_args(&[], args, ctx, scopes, owner)?;
            Ok(Type::Int)
        }
        "ord" => {
            check_args(&[Type::Int], args, ctx, scopes, owner)?;
            Ok(Type::Int)
        }
        other => err(format!("string has no method {other}")),
    }
}

fn check_args(
    params: &[Type],
    args: &[Expr],
    ctx: &Globals,
    scopes: &mut Scopes,
    owner: Option<Id>,
) -> Result<(), SemaError> {
    if params.len() != args.len() {
        return err(format!("expected {} arguments, found {}", params.len(), args.len()));
    }
    for (p, a) in params.iter().zip(args) {
        let aty = check_expr(a, ctx, scopes, owner)?;
        expect_assignable(p, &aty, ctx)?;
    }
    Ok(())
}

fn check_binary(op: BOp, lty: &Type, rty: &Type) -> Result<Type, SemaError> {
    use BOp::*;
    match op {
        Add if *lty == Type::Str && *rty == Type::Str => Ok(Type::Str),
        Add | Sub | Mul | Div | Mod | Shl | Shr | BAnd | BOr | BXor => {
            expect_eq(&Type::Int, lty, "left operand")?;
            expect_eq(&Type::Int, rty, "right operand")?;
            Ok(Type::Int)
        }
        Lt | Le | Gt | Ge if *lty == Type::Str && *rty == Type::Str => Ok(Type::Bool),
        Lt | Le | Gt | Ge => {
            expect_eq(&Type::Int, lty, "left operand")?;
            expect_eq(&Type::Int, rty, "right operand")?;
            Ok(Type::Bool)
        }
        Eq | Ne => {
            if lty != rty && !(matches!(lty, Type::Null) || matches!(rty, Type::Null)) {
                return err(format!("cannot compare {lty} with {rty}"));
            }
            Ok(Type::Bool)
        }
        And | Or => {
            expect_eq(&Type::Bool, lty, "left operand")?;
            expect_eq(&Type::Bool, rty, "right operand")?;
            Ok(Type::Bool)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse::parse;

    fn ok(src: &str) {
        let prog = parse(src).unwrap();
        check(&prog).unwrap();
    }

    fn fails(src: &str) {
        let prog = parse(src).unwrap();
        assert!(check(&prog).is_err());
    }

    #[test]
    fn hello_world_checks() {
        ok(r#"void main() { println("hello"); }"#);
    }

    #[test]
    fn requires_main() {
        fails("void notMain() {}");
    }

    #[test]
    fn rejects_type_mismatch() {
        fails("void main() { int x = true; }");
    }

    #[test]
    fn rejects_break_outside_loop() {
        fails("void main() { break; }");
    }

    #[test]
    fn allows_break_in_while() {
        ok("void main() { while (true) { break; } }");
    }

    #[test]
    fn class_field_and_method_resolve() {
        ok(r#"
            class P {
                int x;
                P(int v) { x = v; }
                int getX() { return x; }
            }
            void main() {
                P p = new P(3);
                printlnInt(p.getX());
            }
        "#);
    }

    #[test]
    fn null_assignable_to_class_and_array() {
        ok(r#"
            class P { int x; }
            void main() {
                P p = null;
                int[] a = null;
            }
        "#);
    }

    #[test]
    fn string_concat_and_length() {
        ok(r#"
            void main() {
                string s = "a" + "b";
                printlnInt(s.length());
            }
        "#);
    }

    #[test]
    fn string_builtin_methods_resolve() {
        ok(r#"
            void main() {
                string s = "hello";
                string sub = s.substring(1, 3);
                int n = sub.parseInt();
                int c = s.ord(0);
            }
        "#);
    }

    #[test]
    fn string_relational_operators_typecheck() {
        ok(r#"
            void main() {
                string a = "abc";
                string b = "abd";
                bool r = a < b && a <= b && a > b && a >= b;
            }
        "#);
    }
}
