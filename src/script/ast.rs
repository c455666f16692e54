//! Syntax tree for the snippet language

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value` keeps every target in order
    Assign { targets: Vec<Target>, value: Expr },
    AugAssign { target: Target, op: BinOp, value: Expr },
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt> },
    For { target: Target, iter: Expr, body: Vec<Stmt> },
    While { cond: Expr, body: Vec<Stmt> },
    Break,
    Continue,
    Pass,
    /// `import a.b` and `from a.b import c`; only the module path is kept
    Import { module: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Index { obj: Expr, index: Expr },
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Lit(String),
    Field { expr: Expr, spec: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub conds: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    FString(Vec<FPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    ListComp { elt: Box<Expr>, generator: Box<Comprehension> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    BoolOp { op: BoolOp, left: Box<Expr>, right: Box<Expr> },
    Compare { left: Box<Expr>, rest: Vec<(CmpOp, Expr)> },
    IfExp { cond: Box<Expr>, then: Box<Expr>, orelse: Box<Expr> },
    Index { obj: Box<Expr>, index: Box<Expr> },
    Slice {
        obj: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Attr { obj: Box<Expr>, name: String },
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
}

/// Visit the expressions inside an assignment target.
pub fn walk_target<'a>(target: &'a Target, visit: &mut dyn FnMut(&'a Expr)) {
    match target {
        Target::Name(_) => {}
        Target::Index { obj, index } => {
            walk_expr(obj, visit);
            walk_expr(index, visit);
        }
        Target::Tuple(items) => items.iter().for_each(|t| walk_target(t, visit)),
    }
}

pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::None | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Name(_) => {}
        Expr::FString(parts) => {
            for part in parts {
                if let FPart::Field { expr, .. } = part {
                    walk_expr(expr, visit);
                }
            }
        }
        Expr::List(items) | Expr::Tuple(items) => items.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                walk_expr(k, visit);
                walk_expr(v, visit);
            }
        }
        Expr::ListComp { elt, generator } => {
            walk_expr(elt, visit);
            walk_target(&generator.target, visit);
            walk_expr(&generator.iter, visit);
            generator.conds.iter().for_each(|c| walk_expr(c, visit));
        }
        Expr::Unary { operand, .. } => walk_expr(operand, visit),
        Expr::Binary { left, right, .. } | Expr::BoolOp { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::Compare { left, rest } => {
            walk_expr(left, visit);
            rest.iter().for_each(|(_, e)| walk_expr(e, visit));
        }
        Expr::IfExp { cond, then, orelse } => {
            walk_expr(cond, visit);
            walk_expr(then, visit);
            walk_expr(orelse, visit);
        }
        Expr::Index { obj, index } => {
            walk_expr(obj, visit);
            walk_expr(index, visit);
        }
        Expr::Slice { obj, lower, upper, step } => {
            walk_expr(obj, visit);
            for part in [lower, upper, step].into_iter().flatten() {
                walk_expr(part, visit);
            }
        }
        Expr::Attr { obj, .. } => walk_expr(obj, visit),
        Expr::Call { func, args, kwargs } => {
            walk_expr(func, visit);
            args.iter().for_each(|e| walk_expr(e, visit));
            kwargs.iter().for_each(|(_, e)| walk_expr(e, visit));
        }
    }
}
