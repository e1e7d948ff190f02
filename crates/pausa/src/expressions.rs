//! The parsed form of a program: statements and expressions with source positions.

use crate::{ExcType, parse::CodeRange};

/// A literal value appearing in source code.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// Conversion applied to an f-string interpolation (`!s`, `!r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) enum Conversion {
    None,
    Str,
    Repr,
}

#[derive(Debug, Clone)]
pub(crate) enum FStringPart {
    Literal(String),
    Interpolation {
        expr: Box<ExprLoc>,
        conversion: Conversion,
        format_spec: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    FString(Vec<FStringPart>),
    Name(String),
    List(Vec<ExprLoc>),
    Tuple(Vec<ExprLoc>),
    Dict(Vec<(ExprLoc, ExprLoc)>),
    Op {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    And(Vec<ExprLoc>),
    Or(Vec<ExprLoc>),
    Not(Box<ExprLoc>),
    Neg(Box<ExprLoc>),
    Pos(Box<ExprLoc>),
    /// `a < b <= c`, one entry per operator.
    Compare {
        left: Box<ExprLoc>,
        comparisons: Vec<(CmpOperator, ExprLoc)>,
    },
    IfElse {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Call {
        func: Box<ExprLoc>,
        args: Vec<ExprLoc>,
        kwargs: Vec<(String, ExprLoc)>,
    },
    /// `obj.method(...)`, kept apart from `Call` so no bound method object is needed.
    MethodCall {
        object: Box<ExprLoc>,
        method: String,
        args: Vec<ExprLoc>,
        kwargs: Vec<(String, ExprLoc)>,
    },
    Attribute {
        object: Box<ExprLoc>,
        attr: String,
    },
    Subscript {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    Slice {
        lower: Option<Box<ExprLoc>>,
        upper: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    Await(Box<ExprLoc>),
    /// `*expr` in a call's positional arguments.
    Starred(Box<ExprLoc>),
}

/// Left-hand side of an assignment or `for` loop.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    Name(String),
    Subscript { object: ExprLoc, index: ExprLoc },
    Tuple(Vec<Target>),
}

/// Modules the sandbox knows how to import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Module {
    Os,
    Asyncio,
    Pathlib,
}

impl Module {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "os" => Some(Self::Os),
            "asyncio" => Some(Self::Asyncio),
            "pathlib" => Some(Self::Pathlib),
            _ => None,
        }
    }

    /// Names importable with `from <module> import <name>`.
    pub fn exports(self) -> &'static [&'static str] {
        match self {
            Self::Os => &["getenv", "environ"],
            Self::Asyncio => &["gather"],
            Self::Pathlib => &["Path", "PurePosixPath", "PosixPath"],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: String,
    pub default: Option<ExprLoc>,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Node>,
    pub position: CodeRange,
}

#[derive(Debug, Clone)]
pub(crate) struct ExceptHandler {
    /// `None` for a bare `except:`.
    pub exc_type: Option<ExprLoc>,
    pub name: Option<String>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) struct Try {
    pub body: Vec<Node>,
    pub handlers: Vec<ExceptHandler>,
    pub or_else: Vec<Node>,
    pub finally: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Expr(ExprLoc),
    Assign {
        targets: Vec<Target>,
        value: ExprLoc,
    },
    AugAssign {
        target: Target,
        op: Operator,
        value: ExprLoc,
        position: CodeRange,
    },
    If {
        test: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    While {
        test: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    For {
        target: Target,
        iter: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
        position: CodeRange,
    },
    Break(CodeRange),
    Continue(CodeRange),
    Pass,
    FunctionDef(FunctionDef),
    Return {
        value: Option<ExprLoc>,
        position: CodeRange,
    },
    Global(Vec<String>),
    Try(Try),
    Raise {
        exc: Option<ExprLoc>,
        position: CodeRange,
    },
    Assert {
        test: ExprLoc,
        msg: Option<ExprLoc>,
        position: CodeRange,
    },
    Import {
        module: Module,
        binding: String,
    },
    /// `from module import name as binding`.
    ImportFrom {
        module: Module,
        names: Vec<(String, String)>,
        position: CodeRange,
    },
}

/// Exception type named by a builtin identifier such as `ValueError`.
pub(crate) fn exc_type_for_name(name: &str) -> Option<ExcType> {
    name.parse().ok()
}
