//! The parser

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::*;

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn err<T>(msg: impl Into<String>) -> Result<T, ParseError> {
    Err(ParseError(msg.into()))
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = vec![];
    loop {
        match lexer.next() {
            Ok(Some(tok)) => tokens.push((tok.kind, tok.text.to_string())),
            Ok(None) => break,
            Err(e) => return err(e.to_string()),
        }
    }
    Parser { tokens, pos: 0 }.program()
}

struct Parser {
    tokens: Vec<(TokenKind, String)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|(k, _)| k)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|(k, _)| k)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek() == Some(&kind)
    }

    fn text(&self) -> &str {
        &self.tokens[self.pos].1
    }

    fn advance(&mut self) -> (TokenKind, String) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> Result<String, ParseError> {
        if self.at(kind) {
            Ok(self.advance().1)
        } else {
            err(format!(
                "expected {kind}, found {} at token {}",
                self.peek()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "end of input".into()),
                self.pos
            ))
        }
    }

    fn ident(&mut self) -> Result<Id, ParseError> {
        self.eat(TokenKind::Id).map(crate::common::id)
    }

    fn program(&mut self) -> Result<Program, ParseError> {
        let mut globals = vec![];
        let mut classes = vec![];
        let mut funcs = vec![];

        while self.peek().is_some() {
            if self.at(TokenKind::KwClass) {
                classes.push(self.class_decl()?);
            } else {
                let ty = self.ty()?;
                let name = self.ident()?;
                if self.at(TokenKind::LParen) {
                    funcs.push(self.func_rest(name, ty, None)?);
                } else {
                    let init = self.var_init()?;
                    self.eat(TokenKind::Semi)?;
                    globals.push(VarDecl { name, ty, init });
                }
            }
        }

        Ok(Program { globals, classes, funcs })
    }

    fn var_init(&mut self) -> Result<Option<Expr>, ParseError> {
        if self.at(TokenKind::Assign) {
            self.advance();
            Ok(Some(self.expr()?))
        } else {
            Ok(None)
        }
    }

    fn class_decl(&mut self) -> Result<ClassDecl, ParseError> {
        self.eat(TokenKind::KwClass)?;
        let name = self.ident()?;
        self.eat(TokenKind::LBrace)?;

        let mut fields = vec![];
        let mut ctor = None;
        let mut methods = vec![];

        while !self.at(TokenKind::RBrace) {
            // A constructor looks like `Id '('`, reusing the class name.
            if self.at(TokenKind::Id) && self.text() == name.as_str() && self.peek_at(1) == Some(&TokenKind::LParen) {
                self.advance();
                let f = self.func_rest(name, Type::Void, Some(name))?;
                if ctor.is_some() {
                    return err(format!("class {name} declares more than one constructor"));
                }
                ctor = Some(f);
                continue;
            }

            let ty = self.ty()?;
            let field_name = self.ident()?;
            if self.at(TokenKind::LParen) {
                methods.push(self.func_rest(field_name, ty, Some(name))?);
            } else {
                self.eat(TokenKind::Semi)?;
                fields.push(VarDecl {
                    name: field_name,
                    ty,
                    init: None,
                });
            }
        }
        self.eat(TokenKind::RBrace)?;

        Ok(ClassDecl { name, fields, ctor, methods })
    }

    fn func_rest(&mut self, name: Id, ret: Type, owner: Option<Id>) -> Result<FuncDecl, ParseError> {
        self.eat(TokenKind::LParen)?;
        let mut params = vec![];
        if !self.at(TokenKind::RParen) {
            loop {
                let ty = self.ty()?;
                let pname = self.ident()?;
                params.push((pname, ty));
                if self.at(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RParen)?;
        let body = self.block()?;
        Ok(FuncDecl { name, owner, params, ret, body })
    }

    fn ty(&mut self) -> Result<Type, ParseError> {
        let mut base = match self.peek() {
            Some(TokenKind::KwInt) => {
                self.advance();
                Type::Int
            }
            Some(TokenKind::KwBool) => {
                self.advance();
                Type::Bool
            }
            Some(TokenKind::KwString) => {
                self.advance();
                Type::Str
            }
            Some(TokenKind::KwVoid) => {
                self.advance();
                Type::Void
            }
            Some(TokenKind::Id) => {
                let name = self.ident()?;
                Type::Class(name)
            }
            _ => return err(format!("expected a type, found token {}", self.pos)),
        };
        while self.at(TokenKind::LBracket) && self.peek_at(1) == Some(&TokenKind::RBracket) {
            self.advance();
            self.advance();
            base = Type::Array(Box::new(base));
        }
        Ok(base)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.eat(TokenKind::LBrace)?;
        let mut stmts = vec![];
        while !self.at(TokenKind::RBrace) {
            stmts.push(self.stmt()?);
        }
        self.eat(TokenKind::RBrace)?;
        Ok(stmts)
    }

    /// True if the tokens at the current position start a type (used to
    /// disambiguate a local var-decl statement from an expression
    /// statement, both of which may start with an identifier).
    fn starts_type(&self) -> bool {
        match self.peek() {
            Some(TokenKind::KwInt | TokenKind::KwBool | TokenKind::KwString | TokenKind::KwVoid) => true,
            Some(TokenKind::Id) => self.peek_at(1) == Some(&TokenKind::Id),
            _ => false,
        }
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(TokenKind::KwIf) => self.if_stmt(),
            Some(TokenKind::KwWhile) => self.while_stmt(),
            Some(TokenKind::KwFor) => self.for_stmt(),
            Some(TokenKind::KwBreak) => {
                self.advance();
                self.eat(TokenKind::Semi)?;
                Ok(Stmt::Break)
            }
            Some(TokenKind::KwContinue) => {
                self.advance();
                self.eat(TokenKind::Semi)?;
                Ok(Stmt::Continue)
            }
            Some(TokenKind::KwReturn) => {
                self.advance();
                let value = if self.at(TokenKind::Semi) { None } else { Some(self.expr()?) };
                self.eat(TokenKind::Semi)?;
                Ok(Stmt::Return(value))
            }
            _ if self.starts_type() => {
                let ty = self.ty()?;
                let name = self.ident()?;
                let init = self.var_init()?;
                self.eat(TokenKind::Semi)?;
                Ok(Stmt::VarDecl(VarDecl { name, ty, init }))
            }
            _ => self.simple_stmt(),
        }
    }

    /// An assignment or bare expression statement, terminated by `;`.
    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let e = self.expr()?;
        let stmt = if self.at(TokenKind::Assign) {
            self.advance();
            let rhs = self.expr()?;
            Stmt::Assign(e, rhs)
        } else {
            Stmt::Expr(e)
        };
        self.eat(TokenKind::Semi)?;
        Ok(stmt)
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.eat(TokenKind::KwIf)?;
        self.eat(TokenKind::LParen)?;
        let cond = self.expr()?;
        self.eat(TokenKind::RParen)?;
        let tt = self.stmt_as_block()?;
        let ff = if self.at(TokenKind::KwElse) {
            self.advance();
            if self.at(TokenKind::KwIf) {
                vec![self.if_stmt()?]
            } else {
                self.stmt_as_block()?
            }
        } else {
            vec![]
        };
        Ok(Stmt::If { cond, tt, ff })
    }

    /// A statement used as a block body: braces are optional, matching
    /// C/Java's single-statement `if`/`while`/`for` bodies.
    fn stmt_as_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.at(TokenKind::LBrace) {
            self.block()
        } else {
            Ok(vec![self.stmt()?])
        }
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.eat(TokenKind::KwWhile)?;
        self.eat(TokenKind::LParen)?;
        let cond = self.expr()?;
        self.eat(TokenKind::RParen)?;
        let body = self.stmt_as_block()?;
        Ok(Stmt::While { cond, body })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.eat(TokenKind::KwFor)?;
        self.eat(TokenKind::LParen)?;
        let init = if self.at(TokenKind::Semi) {
            None
        } else if self.starts_type() {
            let ty = self.ty()?;
            let name = self.ident()?;
            let init = self.var_init()?;
            Some(Box::new(Stmt::VarDecl(VarDecl { name, ty, init })))
        } else {
            let e = self.expr()?;
            let stmt = if self.at(TokenKind::Assign) {
                self.advance();
                let rhs = self.expr()?;
                Stmt::Assign(e, rhs)
            } else {
                Stmt::Expr(e)
            };
            Some(Box::new(stmt))
        };
        self.eat(TokenKind::Semi)?;
        let cond = if self.at(TokenKind::Semi) { None } else { Some(self.expr()?) };
        self.eat(TokenKind::Semi)?;
        let step = if self.at(TokenKind::RParen) {
            None
        } else {
            let e = self.expr()?;
            let stmt = if self.at(TokenKind::Assign) {
                self.advance();
                let rhs = self.expr()?;
                Stmt::Assign(e, rhs)
            } else {
                Stmt::Expr(e)
            };
            Some(Box::new(stmt))
        };
        self.eat(TokenKind::RParen)?;
        let body = self.stmt_as_block()?;
        Ok(Stmt::For { init, cond, step, body })
    }

    // --- Expressions, by ascending precedence. ---

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.at(TokenKind::OrOr) {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::new(ExprKind::Binary(BOp::Or, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.bitor_expr()?;
        while self.at(TokenKind::AndAnd) {
            self.advance();
            let rhs = self.bitor_expr()?;
            lhs = Expr::new(ExprKind::Binary(BOp::And, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn bitor_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.bitxor_expr()?;
        while self.at(TokenKind::Pipe) {
            self.advance();
            let rhs = self.bitxor_expr()?;
            lhs = Expr::new(ExprKind::Binary(BOp::BOr, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn bitxor_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.bitand_expr()?;
        while self.at(TokenKind::Caret) {
            self.advance();
            let rhs = self.bitand_expr()?;
            lhs = Expr::new(ExprKind::Binary(BOp::BXor, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn bitand_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.eq_expr()?;
        while self.at(TokenKind::Amp) {
            self.advance();
            let rhs = self.eq_expr()?;
            lhs = Expr::new(ExprKind::Binary(BOp::BAnd, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn eq_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.rel_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::EqEq) => BOp::Eq,
                Some(TokenKind::Ne) => BOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.rel_expr()?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn rel_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.shift_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Lt) => BOp::Lt,
                Some(TokenKind::Le) => BOp::Le,
                Some(TokenKind::Gt) => BOp::Gt,
                Some(TokenKind::Ge) => BOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.shift_expr()?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn shift_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.add_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Shl) => BOp::Shl,
                Some(TokenKind::Shr) => BOp::Shr,
                _ => break,
            };
            self.advance();
            let rhs = self.add_expr()?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BOp::Add,
                Some(TokenKind::Minus) => BOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.mul_expr()?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BOp::Mul,
                Some(TokenKind::Slash) => BOp::Div,
                Some(TokenKind::Percent) => BOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.unary_expr()?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(TokenKind::Minus) => {
                self.advance();
                let e = self.unary_expr()?;
                Ok(Expr::new(ExprKind::Unary(UnOp::Neg, Box::new(e))))
            }
            Some(TokenKind::Bang) => {
                self.advance();
                let e = self.unary_expr()?;
                Ok(Expr::new(ExprKind::Unary(UnOp::Not, Box::new(e))))
            }
            _ => self.postfix_expr(),
        }
    }

    fn postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.primary_expr()?;
        loop {
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.advance();
                    let name = self.ident()?;
                    if self.at(TokenKind::LParen) {
                        let args = self.args()?;
                        if name.as_str() == "size" || name.as_str() == "length" {
                            e = Expr::new(ExprKind::Len(Box::new(e)));
                        } else {
                            e = Expr::new(ExprKind::MethodCall(Box::new(e), name, args));
                        }
                    } else {
                        e = Expr::new(ExprKind::Field(Box::new(e), name));
                    }
                }
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let idx = self.expr()?;
                    self.eat(TokenKind::RBracket)?;
                    e = Expr::new(ExprKind::Index(Box::new(e), Box::new(idx)));
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.eat(TokenKind::LParen)?;
        let mut args = vec![];
        if !self.at(TokenKind::RParen) {
            loop {
                args.push(self.expr()?);
                if self.at(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::RParen)?;
        Ok(args)
    }

    fn primary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(TokenKind::Num) => {
                let text = self.advance().1;
                let n: i32 = text
                    .parse()
                    .map_err(|_| ParseError(format!("integer literal {text} out of range")))?;
                Ok(Expr::new(ExprKind::IntLit(n)))
            }
            Some(TokenKind::KwTrue) => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(true)))
            }
            Some(TokenKind::KwFalse) => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(false)))
            }
            Some(TokenKind::KwNull) => {
                self.advance();
                Ok(Expr::new(ExprKind::Null))
            }
            Some(TokenKind::KwThis) => {
                self.advance();
                Ok(Expr::new(ExprKind::This))
            }
            Some(TokenKind::Str) => {
                let text = self.advance().1;
                Ok(Expr::new(ExprKind::StrLit(unescape(&text))))
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let e = self.expr()?;
                self.eat(TokenKind::RParen)?;
                Ok(e)
            }
            Some(TokenKind::KwNew) => self.new_expr(),
            Some(TokenKind::Id) => {
                let name = self.ident()?;
                if self.at(TokenKind::LParen) {
                    let args = self.args()?;
                    Ok(Expr::new(ExprKind::FuncCall(name, args)))
                } else {
                    Ok(Expr::new(ExprKind::Var(name)))
                }
            }
            _ => err(format!("expected an expression at token {}", self.pos)),
        }
    }

    fn new_expr(&mut self) -> Result<Expr, ParseError> {
        self.eat(TokenKind::KwNew)?;
        let base = match self.peek() {
            Some(TokenKind::KwInt) => {
                self.advance();
                Type::Int
            }
            Some(TokenKind::KwBool) => {
                self.advance();
                Type::Bool
            }
            Some(TokenKind::KwString) => {
                self.advance();
                Type::Str
            }
            Some(TokenKind::Id) => Type::Class(self.ident()?),
            _ => return err(format!("expected a type after 'new' at token {}", self.pos)),
        };
        if self.at(TokenKind::LBracket) {
            let mut dims = vec![];
            while self.at(TokenKind::LBracket) {
                self.advance();
                dims.push(self.expr()?);
                self.eat(TokenKind::RBracket)?;
            }
            Ok(Expr::new(ExprKind::NewArray(base, dims)))
        } else {
            let args = if self.at(TokenKind::LParen) { self.args()? } else { vec![] };
            Ok(Expr::new(ExprKind::New(base, args)))
        }
    }
}

/// Resolve Mx* string-literal escapes (`\n \t \\ \"`). Anything else passes
/// through unescaped — the lexer already validated the literal's shape.
fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('0') => out.push('\0'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello_world() {
        let prog = parse(r#"void main() { print("hello"); }"#).unwrap();
        assert_eq!(prog.funcs.len(), 1);
        assert_eq!(prog.funcs[0].name.as_str(), "main");
    }

    #[test]
    fn parses_class_with_ctor_and_field_assign() {
        let src = r#"
            class P {
                int x;
                P(int v) { x = v; }
            }
            void main() {
                P p = new P(7);
                printlnInt(p.x);
            }
        "#;
        let prog = parse(src).unwrap();
        assert_eq!(prog.classes.len(), 1);
        assert!(prog.classes[0].ctor.is_some());
    }

    #[test]
    fn parses_for_loop_and_array_index() {
        let src = r#"
            void main() {
                int[] a = new int[5];
                int sum = 0;
                for (int i = 0; i < 5; i = i + 1) {
                    sum = sum + a[i];
                }
            }
        "#;
        parse(src).unwrap();
    }

    #[test]
    fn dangling_else_binds_to_nearest_if() {
        let src = r#"
            void main() {
                if (true) if (false) x = 1; else x = 2;
            }
        "#;
        let prog = parse(src).unwrap();
        let Stmt::If { ff, .. } = &prog.funcs[0].body[0] else { panic!() };
        assert!(ff.is_empty());
    }

    #[test]
    fn reports_error_location() {
        let err = parse("int x").unwrap_err();
        assert!(err.to_string().contains("Parse error"));
    }
}
