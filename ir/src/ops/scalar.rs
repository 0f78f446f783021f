use std::fmt;

use graft_dtype::DType;
use itertools::Itertools;

/// Scalar operations applied element by element by [`Elemwise`](super::Elemwise).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    Maximum,
    Neg,
    Abs,
    Exp,
    Log,
    Log1p,
}

impl ScalarOp {
    pub const fn arity(self) -> usize {
        match self {
            Self::Add | Self::Sub | Self::Mul | Self::TrueDiv | Self::Maximum => 2,
            Self::Neg | Self::Abs | Self::Exp | Self::Log | Self::Log1p => 1,
        }
    }

    /// Operations whose result is always floating point.
    pub const fn upcasts_to_float(self) -> bool {
        matches!(self, Self::TrueDiv | Self::Exp | Self::Log | Self::Log1p)
    }

    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Maximum)
    }

    pub fn out_dtype(self, inputs: &[DType]) -> Option<DType> {
        let dtype = DType::least_upper_dtype(inputs)?;
        Some(if self.upcasts_to_float() { dtype.to_float() } else { dtype })
    }

    pub fn eval(self, args: &[f64]) -> f64 {
        let arg = |i: usize| args.get(i).copied().unwrap_or(f64::NAN);
        match self {
            Self::Add => arg(0) + arg(1),
            Self::Sub => arg(0) - arg(1),
            Self::Mul => arg(0) * arg(1),
            Self::TrueDiv => arg(0) / arg(1),
            Self::Maximum => {
                let (a, b) = (arg(0), arg(1));
                if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
            }
            Self::Neg => -arg(0),
            Self::Abs => arg(0).abs(),
            Self::Exp => arg(0).exp(),
            Self::Log => arg(0).ln(),
            Self::Log1p => arg(0).ln_1p(),
        }
    }
}

/// Expression tree over the inputs of a fused elementwise node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarExpr {
    Input(usize),
    Apply(ScalarOp, Vec<ScalarExpr>),
}

impl ScalarExpr {
    /// `op(i0, i1, ...)` over the op's own arity.
    pub fn of(op: ScalarOp) -> Self {
        Self::Apply(op, (0..op.arity()).map(Self::Input).collect())
    }

    pub fn dtype(&self, inputs: &[DType]) -> Option<DType> {
        match self {
            Self::Input(i) => inputs.get(*i).copied(),
            Self::Apply(op, args) => {
                let dtypes = args.iter().map(|a| a.dtype(inputs)).collect::<Option<Vec<_>>>()?;
                op.out_dtype(&dtypes)
            }
        }
    }

    /// Evaluate with intermediate results normalized to their own dtype, matching what the
    /// unfused graph computes.
    pub fn eval(&self, values: &[f64], dtypes: &[DType]) -> f64 {
        self.eval_typed(values, dtypes).0
    }

    fn eval_typed(&self, values: &[f64], dtypes: &[DType]) -> (f64, DType) {
        match self {
            Self::Input(i) => {
                (values.get(*i).copied().unwrap_or(f64::NAN), dtypes.get(*i).copied().unwrap_or(DType::Float64))
            }
            Self::Apply(op, args) => {
                let (args, arg_dtypes): (Vec<f64>, Vec<DType>) =
                    args.iter().map(|a| a.eval_typed(values, dtypes)).unzip();
                let dtype = op.out_dtype(&arg_dtypes).unwrap_or(DType::Float64);
                (dtype.normalize(op.eval(&args)), dtype)
            }
        }
    }

    /// Replace every `Input(i)` by `f(i)`.
    pub fn substitute(&self, f: &impl Fn(usize) -> ScalarExpr) -> ScalarExpr {
        match self {
            Self::Input(i) => f(*i),
            Self::Apply(op, args) => Self::Apply(*op, args.iter().map(|a| a.substitute(f)).collect()),
        }
    }

    /// Number of scalar operations in the tree.
    pub fn size(&self) -> usize {
        match self {
            Self::Input(_) => 0,
            Self::Apply(_, args) => 1 + args.iter().map(Self::size).sum::<usize>(),
        }
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "i{i}"),
            Self::Apply(op, args) => write!(f, "{op}({})", args.iter().join(", ")),
        }
    }
}
