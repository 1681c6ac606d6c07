#![forbid(unsafe_code)]

use crate::logic::{Op, QuantKind, SortError, Term};

/// Prefix that routes a name straight into the logic.
pub const INTRINSIC_PREFIX: &str = "_z_";

/// Logic-level operations reachable from source as `_z_<name>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Wrapbool,
    Wrapint,
    Wrapfunc,
    Bool,
    Int,
    Func,
    Isbool,
    Isint,
    Isfunc,
    Istuple,
    Isnone,
    Isdefined,
    Eq,
    Neq,
    Distinct,
    T,
    F,
    N,
    Implies,
    And,
    Or,
    Not,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Concat,
    Forall,
    Thereexists,
}

impl Intrinsic {
    /// Lookup by capitalised name (`_z_wrapbool` is `Wrapbool`).
    pub fn lookup(name: &str) -> Option<Intrinsic> {
        use Intrinsic::*;
        Some(match name {
            "Wrapbool" => Wrapbool,
            "Wrapint" => Wrapint,
            "Wrapfunc" => Wrapfunc,
            "Bool" => Bool,
            "Int" => Int,
            "Func" => Func,
            "Isbool" => Isbool,
            "Isint" => Isint,
            "Isfunc" => Isfunc,
            "Istuple" => Istuple,
            "Isnone" => Isnone,
            "Isdefined" => Isdefined,
            "Eq" => Eq,
            "Neq" => Neq,
            "Distinct" => Distinct,
            "T" => T,
            "F" => F,
            "N" => N,
            "Implies" => Implies,
            "And" => And,
            "Or" => Or,
            "Not" => Not,
            "Lt" => Lt,
            "Lte" => Lte,
            "Gt" => Gt,
            "Gte" => Gte,
            "Add" => Add,
            "Sub" => Sub,
            "Concat" => Concat,
            "Forall" => Forall,
            "Thereexists" => Thereexists,
            _ => return None,
        })
    }

    pub fn quantifier(self) -> Option<QuantKind> {
        match self {
            Intrinsic::Forall => Some(QuantKind::Forall),
            Intrinsic::Thereexists => Some(QuantKind::Exists),
            _ => None,
        }
    }

    /// The intrinsic used as a plain value. Only `_z_n` (the none value) has
    /// one; the rest must be called.
    pub fn as_value(self) -> Option<Term> {
        match self {
            Intrinsic::N => Some(Term::none()),
            _ => None,
        }
    }

    /// Apply to already compiled arguments, checking sorts.
    pub fn apply(self, args: Vec<Term>) -> Result<Term, SortError> {
        use Intrinsic::*;
        let op = match self {
            Wrapbool => Op::WrapBool,
            Wrapint => Op::WrapInt,
            Wrapfunc => Op::WrapFunc,
            Bool => Op::ToBool,
            Int => Op::ToInt,
            Func => Op::ToFunc,
            Isbool => Op::IsBool,
            Isint => Op::IsInt,
            Isfunc => Op::IsFunc,
            Isnone => Op::IsNone,
            Eq => Op::Eq,
            Distinct => Op::Distinct,
            T => Op::Truthy,
            F => Op::Falsy,
            N => Op::None,
            Implies => Op::Implies,
            And => Op::And,
            Or => Op::Or,
            Not => Op::Not,
            Lt => Op::Lt,
            Lte => Op::Le,
            Gt => Op::Gt,
            Gte => Op::Ge,
            Add => Op::Add,
            Sub => Op::Sub,
            Concat => Op::Concat,
            Istuple => {
                let x = single(self, args)?;
                let cons = Term::apply(Op::IsCons, vec![x.clone()])?;
                let empty = Term::apply(Op::IsEmpty, vec![x])?;
                return Ok(Term::Apply(Op::Or, vec![cons, empty]));
            }
            Isdefined => {
                let x = single(self, args)?;
                return Ok(Term::not(Term::apply(Op::IsUndef, vec![x])?));
            }
            Neq => {
                let eq = Term::apply(Op::Eq, args)?;
                return Ok(Term::not(eq));
            }
            Forall | Thereexists => {
                return Err(SortError {
                    op: "quantifier",
                    message: "must be applied to a lambda".to_string(),
                });
            }
        };
        Term::apply(op, args)
    }
}

fn single(which: Intrinsic, mut args: Vec<Term>) -> Result<Term, SortError> {
    if args.len() != 1 {
        return Err(SortError {
            op: if which == Intrinsic::Istuple { "istuple" } else { "isdefined" },
            message: format!("takes 1 argument(s), got {}", args.len()),
        });
    }
    Ok(args.remove(0))
}
