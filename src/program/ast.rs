//! Input representation handed over by the front end.
//!
//! The engine never parses source text: an external front end produces this
//! tree (declarations plus structured statement bodies) together with source
//! positions, and [`super::ProgramGraph::build`] normalizes it. The shapes
//! here mirror what the analyzed language can express — classes with single
//! inheritance, async functions, parametric collections, and the handful of
//! expression forms the analyses interpret.

use serde::{Deserialize, Serialize};

use super::types::Pos;
use crate::ttype::{Prim, Ty};

/// A whole program: the unit of analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<FunctionDecl>,
    pub classes: Vec<ClassDecl>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, func: FunctionDecl) -> Self {
        self.functions.push(func);
        self
    }

    pub fn with_class(mut self, class: ClassDecl) -> Self {
        self.classes.push(class);
        self
    }
}

/// A class declaration with single inheritance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    /// Name of the parent class, if any.
    pub parent: Option<String>,
    pub is_abstract: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub pos: Pos,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_abstract: false,
            fields: Vec::new(),
            methods: Vec::new(),
            pos: Pos::default(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: FunctionDecl) -> Self {
        self.methods.push(method);
        self
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }
}

/// A field declaration. Fields start out holding their (untainted) default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Option<Ty>,
    pub pos: Pos,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            pos: Pos::default(),
        }
    }

    pub fn typed(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            pos: Pos::default(),
        }
    }
}

/// A function or method declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// Declared return type hint, checked against the inferred type.
    pub ret: Option<Ty>,
    pub is_async: bool,
    pub is_abstract: bool,
    pub is_static: bool,
    pub is_constructor: bool,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret: None,
            is_async: false,
            is_abstract: false,
            is_static: false,
            is_constructor: false,
            body: Vec::new(),
            pos: Pos::default(),
        }
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: None,
        });
        self
    }

    pub fn param_typed(mut self, name: impl Into<String>, ty: Ty) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty: Some(ty),
        });
        self
    }

    pub fn returns(mut self, ty: Ty) -> Self {
        self.ret = Some(ty);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn abstract_method(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn constructor(mut self) -> Self {
        self.is_constructor = true;
        self
    }

    pub fn with_body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }
}

/// A declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Option<Ty>,
}

/// A statement with its source position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

impl Stmt {
    pub fn new(kind: StmtKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    /// `local = value;`
    pub fn assign(line: u32, local: impl Into<String>, value: Expr) -> Self {
        Self::new(
            StmtKind::Assign {
                local: local.into(),
                value,
            },
            Pos::line(line),
        )
    }

    /// `obj->field = value;`
    pub fn field_set(line: u32, obj: Expr, field: impl Into<String>, value: Expr) -> Self {
        Self::new(
            StmtKind::FieldSet {
                obj,
                field: field.into(),
                value,
            },
            Pos::line(line),
        )
    }

    /// Expression evaluated for effect.
    pub fn expr(line: u32, expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr), Pos::line(line))
    }

    /// `return value;` / `return;`
    pub fn ret(line: u32, value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(value), Pos::line(line))
    }

    /// `if (cond) { .. } else { .. }`
    pub fn if_else(line: u32, cond: Expr, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Self {
        Self::new(
            StmtKind::If {
                cond,
                then_body,
                else_body,
            },
            Pos::line(line),
        )
    }

    /// `while (cond) { .. }`
    pub fn while_loop(line: u32, cond: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::While { cond, body }, Pos::line(line))
    }
}

/// Statement forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    Assign {
        local: String,
        value: Expr,
    },
    FieldSet {
        obj: Expr,
        field: String,
        value: Expr,
    },
    Expr(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
}

/// Expression forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// `$this` inside a method body.
    This,
    /// A local variable read.
    Local(String),
    /// A literal of the given primitive type; the analyses only need types.
    Literal(Prim),
    /// Read of an external-input superglobal — always a taint source.
    Superglobal(String),
    /// `obj->field`
    FieldGet { obj: Box<Expr>, field: String },
    /// A call; see [`Callee`] for dispatch forms.
    Call { callee: Callee, args: Vec<Expr> },
    /// `new Class(args)`
    New { class: String, args: Vec<Expr> },
    /// `await expr` — a suspension point, sequential for the analysis.
    Await(Box<Expr>),
    /// Collection literal `vec[e1, e2, ..]`.
    CollectionLit(Vec<Expr>),
    /// Higher-order per-element map applying the named function.
    CollectionMap { recv: Box<Expr>, callback: String },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn local(name: impl Into<String>) -> Self {
        Expr::Local(name.into())
    }

    pub fn null() -> Self {
        Expr::Literal(Prim::Null)
    }

    pub fn field(obj: Expr, name: impl Into<String>) -> Self {
        Expr::FieldGet {
            obj: Box::new(obj),
            field: name.into(),
        }
    }

    /// Direct function call.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Callee::Function(name.into()),
            args,
        }
    }

    /// Instance method call.
    pub fn method(recv: Expr, name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Callee::Method {
                recv: Box::new(recv),
                name: name.into(),
            },
            args,
        }
    }

    /// Static method call.
    pub fn static_call(class: impl Into<String>, name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Callee::Static {
                class: class.into(),
                name: name.into(),
            },
            args,
        }
    }

    /// Explicit forwarding call to the parent constructor.
    pub fn parent_ctor(args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Callee::ParentConstructor,
            args,
        }
    }

    pub fn new_instance(class: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::New {
            class: class.into(),
            args,
        }
    }

    pub fn awaited(expr: Expr) -> Self {
        Expr::Await(Box::new(expr))
    }

    pub fn map_collection(recv: Expr, callback: impl Into<String>) -> Self {
        Expr::CollectionMap {
            recv: Box::new(recv),
            callback: callback.into(),
        }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Unary {
            op: UnOp::Not,
            expr: Box::new(expr),
        }
    }
}

/// What a call dispatches through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    /// Top-level function, by fully-qualified name.
    Function(String),
    /// Instance method, dispatched on the receiver's inferred type.
    Method { recv: Box<Expr>, name: String },
    /// Static method on a named class.
    Static { class: String, name: String },
    /// Explicit `parent::__construct(..)` forwarding inside a constructor.
    ParentConstructor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Comparison and logical operators yield fresh booleans; their result
    /// does not carry operand taint.
    pub fn is_comparison(&self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Concat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    Not,
    Neg,
}
