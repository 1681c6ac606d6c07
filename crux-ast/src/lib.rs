#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Span used for nodes built by passes rather than read from source.
pub fn synthetic_span() -> Span {
    span(0, 0)
}

pub type Ident = Spanned<String>;

pub fn ident(name: impl Into<String>) -> Ident {
    Spanned::new(synthetic_span(), name.into())
}

/// Identity of a binder (function definition, lambda, parameter).
///
/// Ids are minted from a process-wide counter, so two parses of the same text
/// yield distinct definitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(1);

impl NodeId {
    pub fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub functions: Vec<FunctionDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub params: Vec<Param>,
    pub returns: Option<Expr>,
    pub decorators: Vec<Expr>,
    pub body: Expr,
}

impl FunctionDef {
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.node.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub id: NodeId,
    pub name: Ident,
    pub annotation: Option<Expr>,
}

impl Param {
    pub fn new(name: Ident, annotation: Option<Expr>) -> Self {
        Self {
            id: NodeId::fresh(),
            name,
            annotation,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub id: NodeId,
    pub params: Vec<Param>,
    pub body: Box<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Name(String),
    /// Hole in a rewrite pattern; written `$X` when formatted.
    PatternVar(String),
    Num(i64),
    Constant(Constant),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Slice>,
    },
    Tuple(Vec<Expr>),
    Starred(Box<Expr>),
    Lambda(Lambda),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Slice {
    Index(Expr),
    Range {
        lower: Option<Expr>,
        upper: Option<Expr>,
        step: Option<Expr>,
    },
    Extended(Vec<Slice>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    True,
    False,
    None,
    Ellipsis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    USub,
    UAdd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
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

/// Operator names as they appear in `_op_<Name>` definitions.
impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "Add",
            BinOp::Sub => "Sub",
            BinOp::Mult => "Mult",
            BinOp::Div => "Div",
            BinOp::FloorDiv => "FloorDiv",
            BinOp::Mod => "Mod",
            BinOp::Pow => "Pow",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Not => "Not",
            UnaryOp::USub => "USub",
            UnaryOp::UAdd => "UAdd",
        }
    }
}

impl BoolOp {
    pub fn name(self) -> &'static str {
        match self {
            BoolOp::And => "And",
            BoolOp::Or => "Or",
        }
    }
}

impl CmpOp {
    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "Eq",
            CmpOp::NotEq => "NotEq",
            CmpOp::Lt => "Lt",
            CmpOp::LtE => "LtE",
            CmpOp::Gt => "Gt",
            CmpOp::GtE => "GtE",
            CmpOp::In => "In",
            CmpOp::NotIn => "NotIn",
            CmpOp::Is => "Is",
            CmpOp::IsNot => "IsNot",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self { span, kind }
    }

    pub fn synthetic(kind: ExprKind) -> Self {
        Self::new(synthetic_span(), kind)
    }

    pub fn name(id: impl Into<String>) -> Self {
        Self::synthetic(ExprKind::Name(id.into()))
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        Self::synthetic(ExprKind::Call {
            func: Box::new(func),
            args,
        })
    }

    pub fn lambda(params: Vec<Param>, body: Expr) -> Self {
        Self::synthetic(ExprKind::Lambda(Lambda {
            id: NodeId::fresh(),
            params,
            body: Box::new(body),
        }))
    }

    pub fn as_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Name(_) => "Name",
            ExprKind::PatternVar(_) => "PatternVar",
            ExprKind::Num(_) => "Num",
            ExprKind::Constant(_) => "Constant",
            ExprKind::Call { .. } => "Call",
            ExprKind::BinOp { .. } => "BinOp",
            ExprKind::UnaryOp { .. } => "UnaryOp",
            ExprKind::BoolOp { .. } => "BoolOp",
            ExprKind::Compare { .. } => "Compare",
            ExprKind::Subscript { .. } => "Subscript",
            ExprKind::Tuple(_) => "Tuple",
            ExprKind::Starred(_) => "Starred",
            ExprKind::Lambda(_) => "Lambda",
        }
    }

    /// Pre-order traversal over this node and every nested expression.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Name(_) | ExprKind::PatternVar(_) | ExprKind::Num(_) | ExprKind::Constant(_) => {}
            ExprKind::Call { func, args } => {
                func.walk(f);
                for a in args {
                    a.walk(f);
                }
            }
            ExprKind::BinOp { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            ExprKind::UnaryOp { operand, .. } => operand.walk(f),
            ExprKind::BoolOp { values, .. } | ExprKind::Tuple(values) => {
                for v in values {
                    v.walk(f);
                }
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                left.walk(f);
                for c in comparators {
                    c.walk(f);
                }
            }
            ExprKind::Subscript { value, slice } => {
                value.walk(f);
                slice.walk(f);
            }
            ExprKind::Starred(inner) => inner.walk(f),
            ExprKind::Lambda(lambda) => {
                for p in &lambda.params {
                    if let Some(a) = &p.annotation {
                        a.walk(f);
                    }
                }
                lambda.body.walk(f);
            }
        }
    }

    /// Rebuild this node with every direct child replaced by `f(child)`.
    pub fn try_map_children<E>(self, f: &mut impl FnMut(Expr) -> Result<Expr, E>) -> Result<Expr, E> {
        let span = self.span;
        let kind = match self.kind {
            leaf @ (ExprKind::Name(_) | ExprKind::PatternVar(_) | ExprKind::Num(_) | ExprKind::Constant(_)) => leaf,
            ExprKind::Call { func, args } => ExprKind::Call {
                func: Box::new(f(*func)?),
                args: args.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
            },
            ExprKind::BinOp { op, left, right } => ExprKind::BinOp {
                op,
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
            },
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op,
                operand: Box::new(f(*operand)?),
            },
            ExprKind::BoolOp { op, values } => ExprKind::BoolOp {
                op,
                values: values.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
            },
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => ExprKind::Compare {
                left: Box::new(f(*left)?),
                ops,
                comparators: comparators.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
            },
            ExprKind::Subscript { value, slice } => ExprKind::Subscript {
                value: Box::new(f(*value)?),
                slice: Box::new(slice.try_map_exprs(f)?),
            },
            ExprKind::Tuple(elts) => {
                ExprKind::Tuple(elts.into_iter().map(&mut *f).collect::<Result<_, _>>()?)
            }
            ExprKind::Starred(inner) => ExprKind::Starred(Box::new(f(*inner)?)),
            ExprKind::Lambda(Lambda { id, params, body }) => {
                let params = params
                    .into_iter()
                    .map(|p| {
                        Ok(Param {
                            id: p.id,
                            name: p.name,
                            annotation: p.annotation.map(&mut *f).transpose()?,
                        })
                    })
                    .collect::<Result<_, E>>()?;
                ExprKind::Lambda(Lambda {
                    id,
                    params,
                    body: Box::new(f(*body)?),
                })
            }
        };
        Ok(Expr { span, kind })
    }

    /// Deep copy that mints new identities for every binder inside.
    pub fn fresh_copy(&self) -> Expr {
        fn refresh(e: Expr) -> Result<Expr, std::convert::Infallible> {
            let e = e.try_map_children(&mut refresh)?;
            Ok(match e.kind {
                ExprKind::Lambda(Lambda { params, body, .. }) => Expr {
                    span: e.span,
                    kind: ExprKind::Lambda(Lambda {
                        id: NodeId::fresh(),
                        params: params
                            .into_iter()
                            .map(|p| Param {
                                id: NodeId::fresh(),
                                ..p
                            })
                            .collect(),
                        body,
                    }),
                },
                other => Expr {
                    span: e.span,
                    kind: other,
                },
            })
        }
        match refresh(self.clone()) {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }

    pub fn mentions_name(&self, name: &str) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if e.as_name() == Some(name) {
                found = true;
            }
        });
        found
    }
}

impl Slice {
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        match self {
            Slice::Index(e) => e.walk(f),
            Slice::Range { lower, upper, step } => {
                for e in [lower, upper, step].into_iter().flatten() {
                    e.walk(f);
                }
            }
            Slice::Extended(dims) => {
                for d in dims {
                    d.walk(f);
                }
            }
        }
    }

    pub fn try_map_exprs<E>(self, f: &mut impl FnMut(Expr) -> Result<Expr, E>) -> Result<Slice, E> {
        Ok(match self {
            Slice::Index(e) => Slice::Index(f(e)?),
            Slice::Range { lower, upper, step } => Slice::Range {
                lower: lower.map(&mut *f).transpose()?,
                upper: upper.map(&mut *f).transpose()?,
                step: step.map(&mut *f).transpose()?,
            },
            Slice::Extended(dims) => Slice::Extended(
                dims.into_iter()
                    .map(|d| d.try_map_exprs(f))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}
