// ABOUTME: Abstract syntax tree for Lea programs

use std::rc::Rc;

/// 1-based source position carried by every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Pos { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    DivInt,
    Rem,
    Concat,
    Range,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Forward,  // />
    Spread,   // />>>
    Parallel, // \>
    Reverse,  // </
    Compose,  // </>
    Tap,      // @>
}

/// Template string element: literal run or parsed interpolation.
#[derive(Debug, Clone)]
pub enum TemplateElem {
    Lit(String),
    Expr(Expr),
}

/// `:: Param (:> Result)?` annotation. Annotations are accepted everywhere
/// but only enforced under `#validate`.
#[derive(Debug, Clone)]
pub struct TypeAnn {
    pub name: String,
    pub result: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub type_ann: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecoratorSpec {
    pub name: String,
    pub args: Vec<Expr>,
    pub pos: Pos,
}

/// A function literal. Shared behind `Rc` so closing over one does not clone
/// its body.
#[derive(Debug, Clone)]
pub struct FunctionLit {
    pub params: Vec<Param>,
    pub body: Expr,
    pub decorators: Vec<DecoratorSpec>,
    pub attachments: Vec<String>,
    pub return_ann: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Literal(Expr),
    Binder(String),
    Wildcard,
    TypeTag(String),
    List {
        items: Vec<Pattern>,
        rest: Option<String>,
    },
    Record {
        fields: Vec<(String, Option<Pattern>)>,
        rest: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        Expr { kind, pos }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Template(Vec<TemplateElem>),
    Bool(bool),
    Null,
    List(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    Ident(String),
    Placeholder,
    InputRef,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Function(Rc<FunctionLit>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Pipe {
        kind: PipeKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        name: String,
    },
    Await(Box<Expr>),
    Block(Vec<Stmt>),
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

impl Stmt {
    pub fn new(kind: StmtKind, pos: Pos) -> Self {
        Stmt { kind, pos }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Let {
        name: String,
        mutable: bool,
        type_ann: Option<TypeAnn>,
        value: Expr,
    },
    /// Reassignment of a `maybe` binding.
    Assign {
        name: String,
        value: Expr,
    },
    Expr(Expr),
    ContextDef {
        name: String,
        default: Expr,
    },
    Provide {
        name: String,
        value: Expr,
        body: Option<Vec<Stmt>>,
    },
    Return(Option<Expr>),
    /// Reserved; evaluates to nothing (there is no module system).
    Use(String),
}

/// A parsed source text: an ordered list of statements.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}
