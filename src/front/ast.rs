//! The abstract syntax tree.
//!
//! This is the read-only artifact the IR builder (`middle::build`) consumes.
//! Per the semantic-predecessor contract, by the time a [`Program`] reaches
//! the builder every [`Expr`] has had its `ty` filled in by [`super::sema`]
//! and every name has a well-defined meaning (local, param, field, global,
//! or function) that the builder resolves using ordinary lexical scoping —
//! there is no separate symbol-resolution table threaded through the AST.

use std::cell::Cell;

use crate::common::Id;

/// Mx* surface types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Str,
    Void,
    /// The type of the `null` literal before it unifies with a class or
    /// array type; never appears as a declared type.
    Null,
    Class(Id),
    Array(Box<Type>),
    /// Placeholder filled in by `sema`; never observed by the IR builder.
    Unknown,
}

impl Type {
    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Int | Type::Bool)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Str => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Class(name) => write!(f, "{name}"),
            Type::Array(elem) => write!(f, "{elem}[]"),
            Type::Unknown => write!(f, "<unknown>"),
        }
    }
}

#[derive(Debug)]
pub struct Program {
    pub globals: Vec<VarDecl>,
    pub classes: Vec<ClassDecl>,
    pub funcs: Vec<FuncDecl>,
}

#[derive(Debug)]
pub struct VarDecl {
    pub name: Id,
    pub ty: Type,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub struct ClassDecl {
    pub name: Id,
    pub fields: Vec<VarDecl>,
    /// At most one user-defined constructor; Mx* does not support overloads.
    pub ctor: Option<FuncDecl>,
    pub methods: Vec<FuncDecl>,
}

#[derive(Debug)]
pub struct FuncDecl {
    pub name: Id,
    /// `Some(class)` for methods and constructors; used by the builder to
    /// mangle the emitted symbol as `Class.method` and to thread an
    /// implicit `this` parameter.
    pub owner: Option<Id>,
    pub params: Vec<(Id, Type)>,
    pub ret: Type,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    VarDecl(VarDecl),
    Assign(Expr, Expr),
    Expr(Expr),
    If {
        cond: Expr,
        tt: Vec<Stmt>,
        ff: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    /// Filled in by `sema::check`; `Type::Unknown` until then.
    pub ty: Cell<TypeSlot>,
}

/// `Cell` needs a `Copy`-free swap; we round-trip through `take`/`set`
/// instead of requiring `Type: Copy`.
#[derive(Debug, Clone)]
pub struct TypeSlot(pub Type);

impl Default for TypeSlot {
    fn default() -> Self {
        TypeSlot(Type::Unknown)
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            kind,
            ty: Cell::new(TypeSlot::default()),
        }
    }

    pub fn ty(&self) -> Type {
        let slot = self.ty.take();
        let ty = slot.0.clone();
        self.ty.set(slot);
        ty
    }

    pub fn set_ty(&self, ty: Type) {
        self.ty.set(TypeSlot(ty));
    }
}

#[derive(Debug)]
pub enum ExprKind {
    IntLit(i32),
    BoolLit(bool),
    StrLit(String),
    Null,
    This,
    Var(Id),
    Unary(UnOp, Box<Expr>),
    Binary(BOp, Box<Expr>, Box<Expr>),
    Field(Box<Expr>, Id),
    Index(Box<Expr>, Box<Expr>),
    /// A call whose callee is a bare name resolved to a free function (not
    /// a method call through an object).
    FuncCall(Id, Vec<Expr>),
    MethodCall(Box<Expr>, Id, Vec<Expr>),
    New(Type, Vec<Expr>),
    /// `new T[dims[0]][dims[1]]...`; every dimension must be given
    /// explicitly (trailing empty `[]` dimensions are not supported).
    NewArray(Type, Vec<Expr>),
    Len(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BAnd,
    BOr,
    BXor,
    And,
    Or,
}

impl BOp {
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BOp::And | BOp::Or)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BOp::Lt | BOp::Le | BOp::Gt | BOp::Ge | BOp::Eq | BOp::Ne
        )
    }
}
