use std::fmt;
use std::ops::Not;

use super::Value;

/// Binary operators supported in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    And,
    Or,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 15] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Eq,
        BinaryOp::Neq,
        BinaryOp::Gt,
        BinaryOp::Gte,
        BinaryOp::Lt,
        BinaryOp::Lte,
    ];

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
        }
    }

    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// Binding strength; higher binds tighter.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Gt
            | BinaryOp::Gte
            | BinaryOp::Lt
            | BinaryOp::Lte => 3,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::BitOr => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::BitAnd => 5,
        }
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
        }
    }

    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "!" => Some(UnaryOp::Not),
            "-" => Some(UnaryOp::Neg),
            _ => None,
        }
    }
}

/// Assignment operators. Compound forms read the target, combine, then write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
        }
    }

    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(AssignOp::Set),
            "+=" => Some(AssignOp::Add),
            "-=" => Some(AssignOp::Sub),
            "*=" => Some(AssignOp::Mul),
            "/=" => Some(AssignOp::Div),
            _ => None,
        }
    }

    /// The binary operator a compound assignment applies, `None` for `=`.
    #[must_use]
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
        }
    }
}

/// Caller-facing expression tree. Built in code with the helpers below or
/// produced by [`parse`](crate::parse), then lowered into the knowledge
/// base's node graph by [`KnowledgeBaseBuilder::build`](super::KnowledgeBaseBuilder::build).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Value),
    Variable(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
}

/// One entry of a Then block.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    /// A function or method call evaluated for its effect.
    Call(Expr),
}

/// A reference to a root identifier bound in the data context.
#[must_use]
pub fn var(name: &str) -> Expr {
    Expr::Variable(name.to_owned())
}

/// A literal value.
#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

/// A call to a registered function.
#[must_use]
pub fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(name.to_owned(), args)
}

/// `Retract("rule")` as a statement.
#[must_use]
pub fn retract(rule: &str) -> Statement {
    Statement::Call(call("Retract", vec![lit(rule)]))
}

/// `Complete()` as a statement.
#[must_use]
pub fn complete() -> Statement {
    Statement::Call(call("Complete", Vec::new()))
}

impl Expr {
    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Expr {
        Expr::Binary(op, Box::new(self), Box::new(other.into()))
    }

    #[must_use]
    pub fn field(self, name: &str) -> Expr {
        Expr::Field(Box::new(self), name.to_owned())
    }

    #[must_use]
    pub fn index(self, selector: impl Into<Expr>) -> Expr {
        Expr::Index(Box::new(self), Box::new(selector.into()))
    }

    #[must_use]
    pub fn method(self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::MethodCall(Box::new(self), name.to_owned(), args)
    }

    #[must_use]
    pub fn equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    #[must_use]
    pub fn not_equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Neq, other)
    }

    #[must_use]
    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    #[must_use]
    pub fn gte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gte, other)
    }

    #[must_use]
    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    #[must_use]
    pub fn lte(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lte, other)
    }

    #[must_use]
    pub fn plus(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    #[must_use]
    pub fn minus(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }

    #[must_use]
    pub fn times(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mul, other)
    }

    #[must_use]
    pub fn divided_by(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Div, other)
    }

    #[must_use]
    pub fn modulo(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mod, other)
    }

    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    /// `self = value`
    #[must_use]
    pub fn assign(self, value: impl Into<Expr>) -> Statement {
        self.assign_with(AssignOp::Set, value)
    }

    /// `self += value`
    #[must_use]
    pub fn add_assign(self, value: impl Into<Expr>) -> Statement {
        self.assign_with(AssignOp::Add, value)
    }

    #[must_use]
    pub fn assign_with(self, op: AssignOp, value: impl Into<Expr>) -> Statement {
        Statement::Assign {
            target: self,
            op,
            value: value.into(),
        }
    }

    /// Use a call expression as a statement.
    #[must_use]
    pub fn invoke(self) -> Statement {
        Statement::Call(self)
    }

    fn binding_power(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            _ => u8::MAX,
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Constant(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Constant(Value::Int(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Constant(Value::from(v))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Constant(Value::Float(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Constant(Value::Bool(v))
    }
}

/// String literals become string constants, never variables.
impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Constant(Value::from(v))
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    write!(f, "(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    write!(f, ")")
}

/// Renders rule-language text. Parentheses are inserted only where
/// precedence requires them, so the output parses back to the same tree.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{v}"),
            Expr::Variable(name) => f.write_str(name),
            Expr::Field(object, name) => write!(f, "{object}.{name}"),
            Expr::Index(object, selector) => write!(f, "{object}[{selector}]"),
            Expr::Unary(op, operand) => {
                if operand.binding_power() == u8::MAX {
                    write!(f, "{op}{operand}")
                } else {
                    write!(f, "{op}({operand})")
                }
            }
            Expr::Binary(op, left, right) => {
                let p = op.precedence();
                if left.binding_power() < p {
                    write!(f, "({left})")?;
                } else {
                    write!(f, "{left}")?;
                }
                write!(f, " {op} ")?;
                if right.binding_power() <= p {
                    write!(f, "({right})")
                } else {
                    write!(f, "{right}")
                }
            }
            Expr::Call(name, args) => {
                f.write_str(name)?;
                write_args(f, args)
            }
            Expr::MethodCall(receiver, name, args) => {
                write!(f, "{receiver}.{name}")?;
                write_args(f, args)
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Assign { target, op, value } => write!(f, "{target} {op} {value}"),
            Statement::Call(expr) => write!(f, "{expr}"),
        }
    }
}
