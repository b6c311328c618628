use crate::value::Number;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    In,
    NotIn,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Mod,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "in" => BinaryOp::In,
            "not in" => BinaryOp::NotIn,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

/// The right-hand side of `|`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Name(String),                           // x | upper
    Call { name: String, args: Vec<Expr> }, // x | f(a, b)
}

impl Filter {
    pub fn name(&self) -> &str {
        match self {
            Filter::Name(name) | Filter::Call { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    StringLit(String),
    NumericLit(Number),
    BoolLit(bool),
    NullLit,
    ArrayLit(Vec<Expr>),
    TupleLit(Vec<Expr>),
    ObjectLit(Vec<(Expr, Expr)>),
    Identifier(String),
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
        computed: bool, // foo['bar'] vs foo.bar
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Filter {
        operand: Box<Expr>,
        filter: Filter,
    },
    Test {
        operand: Box<Expr>,
        negate: bool,
        name: String,
        args: Vec<Expr>,
    },
    Slice {
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    KeywordArgument {
        key: String,
        value: Box<Expr>,
    },
    /// `a if test else b`, yielding the selected operand itself.
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Node name used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::StringLit(_) => "StringLiteral",
            Expr::NumericLit(_) => "NumericLiteral",
            Expr::BoolLit(_) => "BoolLiteral",
            Expr::NullLit => "NullLiteral",
            Expr::ArrayLit(_) => "ArrayLiteral",
            Expr::TupleLit(_) => "TupleLiteral",
            Expr::ObjectLit(_) => "ObjectLiteral",
            Expr::Identifier(_) => "Identifier",
            Expr::Member { .. } => "MemberExpression",
            Expr::Call { .. } => "CallExpression",
            Expr::Binary { .. } => "BinaryExpression",
            Expr::Unary { .. } => "UnaryExpression",
            Expr::Filter { .. } => "FilterExpression",
            Expr::Test { .. } => "TestExpression",
            Expr::Slice { .. } => "SliceExpression",
            Expr::KeywordArgument { .. } => "KeywordArgumentExpression",
            Expr::Conditional { .. } => "ConditionalExpression",
        }
    }
}

/// What a `for` binds on each iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopTarget {
    Identifier(String), // for message in messages
    Tuple(Vec<String>), // for key, value in pairs
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Expr(Expr),
    Set {
        assignee: Expr,
        value: Expr,
    },
    If {
        test: Expr,
        body: Vec<Node>,
        alternate: Vec<Node>, // else body, or a single nested If for elif
    },
    For {
        target: LoopTarget,
        iterable: Expr,
        body: Vec<Node>,
    },
}

/// A parsed template. Immutable once built and safe to share between threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub body: Vec<Node>,
}
