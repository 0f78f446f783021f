//! The standard rewrites and the database that schedules them.
//!
//! | position | entry                     | kind        | tags                          |
//! |----------|---------------------------|-------------|-------------------------------|
//! | 0        | `merge1`                  | global      | fast_run, fast_compile, merge |
//! | 1        | `canonicalize`            | equilibrium | fast_run, fast_compile        |
//! | 1.2      | `merge1.2`                | global      | fast_run, fast_compile, merge |
//! | 1.5      | `stabilize`               | equilibrium | fast_run                      |
//! | 2        | `specialize`              | equilibrium | fast_run, fast_compile        |
//! | 48.5     | `serialize_inc_subtensor` | global      | fast_run                      |
//! | 49       | `elemwise_fusion`         | equilibrium | fast_run, fusion              |
//! | 49.2     | `merge2`                  | global      | fast_run, fast_compile, merge |
//! | 49.5     | `add_destroy_handler`     | global      | fast_run, inplace             |
//! | 70       | `inplace`                 | equilibrium | fast_run, inplace             |
//! | 75       | `inplace_elemwise`        | global      | fast_run, inplace             |
//! | 100      | `merge3`                  | global      | fast_run, fast_compile, merge |

mod algebraic;
mod asserts;
mod folding;
mod fusion;
mod inplace;
mod merge;
mod shape;
mod subtensor;

pub use algebraic::{add_zero, div_one, div_self, log_exp, log1p, mul_one, mul_zero, neg_neg, sub_self};
pub use asserts::{remove_all_assert, useless_assert, useless_view};
pub use folding::ConstantFolding;
pub use fusion::ElemwiseFusion;
pub use inplace::{AddDestroyHandler, InplaceElemwise, InplaceIncSubtensor};
pub use merge::MergeRewriter;
pub use shape::{reshape_chain, useless_reshape};
pub use subtensor::SerializeIncSubtensor;

use graft_ir::ops::Alloc;
use graft_ir::{FunctionGraph, TensorData, VarId};
use once_cell::sync::Lazy;

use crate::db::RewriteDb;
use crate::error::Result;

const FAST: &[&str] = &["fast_run", "fast_compile"];
const RUN: &[&str] = &["fast_run"];
const MERGE: &[&str] = &["fast_run", "fast_compile", "merge"];
const STABLE: &[&str] = &["fast_run", "stabilize"];
const UNSAFE: &[&str] = &["unsafe"];
const INPLACE: &[&str] = &["fast_run", "inplace"];

/// The standard database, built on first use.
///
/// # Panics
///
/// On first use, if the standard rewrites fail to register. That is a bug in this crate,
/// not something a caller can recover from.
pub static OPTDB: Lazy<RewriteDb> =
    Lazy::new(|| build_standard_db().unwrap_or_else(|error| panic!("standard rewrite database: {error}")));

pub fn build_standard_db() -> Result<RewriteDb> {
    let mut canonicalize = RewriteDb::new();
    canonicalize.register_local("constant_folding", ConstantFolding, FAST, 0.0)?;
    canonicalize.register_local("reshape_chain", reshape_chain(), FAST, 1.0)?;
    canonicalize.register_local("useless_reshape", useless_reshape(), FAST, 2.0)?;
    canonicalize.register_local("add_zero", add_zero(), FAST, 3.0)?;
    canonicalize.register_local("mul_one", mul_one(), FAST, 4.0)?;
    canonicalize.register_local("mul_zero", mul_zero(), RUN, 5.0)?;
    canonicalize.register_local("div_one", div_one(), RUN, 6.0)?;
    canonicalize.register_local("neg_neg", neg_neg(), FAST, 7.0)?;
    canonicalize.register_local("sub_self", sub_self(), RUN, 8.0)?;
    canonicalize.register_local("useless_assert", useless_assert(), FAST, 9.0)?;
    canonicalize.register_local("remove_all_assert", remove_all_assert(), UNSAFE, 10.0)?;
    canonicalize.register_local("div_self", div_self(), UNSAFE, 11.0)?;

    let mut stabilize = RewriteDb::new();
    stabilize.register_local("constant_folding", ConstantFolding, FAST, 0.0)?;
    stabilize.register_local("log1p", log1p(), STABLE, 1.0)?;
    stabilize.register_local("log_exp", log_exp(), STABLE, 2.0)?;

    let mut specialize = RewriteDb::new();
    specialize.register_local("constant_folding", ConstantFolding, FAST, 0.0)?;
    specialize.register_local("useless_assert", useless_assert(), FAST, 1.0)?;
    specialize.register_local("useless_view", useless_view(), RUN, 2.0)?;

    let mut fusion = RewriteDb::new();
    fusion.register_local("fuse_elemwise", ElemwiseFusion, &["fast_run", "fusion"], 0.0)?;

    let mut inplace = RewriteDb::new();
    inplace.register_local("inplace_inc_subtensor", InplaceIncSubtensor, INPLACE, 0.0)?;

    let mut db = RewriteDb::new();
    db.register_global("merge1", MergeRewriter, MERGE, 0.0)?;
    db.register_group("canonicalize", canonicalize, FAST, 1.0)?;
    db.register_global("merge1.2", MergeRewriter, MERGE, 1.2)?;
    db.register_group("stabilize", stabilize, RUN, 1.5)?;
    db.register_group("specialize", specialize, FAST, 2.0)?;
    db.register_global("serialize_inc_subtensor", SerializeIncSubtensor, RUN, 48.5)?;
    db.register_group("elemwise_fusion", fusion, &["fast_run", "fusion"], 49.0)?;
    db.register_global("merge2", MergeRewriter, MERGE, 49.2)?;
    db.register_global("add_destroy_handler", AddDestroyHandler, INPLACE, 49.5)?;
    db.register_group("inplace", inplace, INPLACE, 70.0)?;
    db.register_global("inplace_elemwise", InplaceElemwise, INPLACE, 75.0)?;
    db.register_global("merge3", MergeRewriter, MERGE, 100.0)?;
    Ok(db)
}

// ===== Helpers shared by the rewrites =====

/// The literal value of `var`, if it is a constant.
pub(crate) fn constant_value(fgraph: &FunctionGraph, var: VarId) -> Option<&TensorData> {
    fgraph.var(var).constant().map(|data| data.as_ref())
}

/// Whether every element of `var` equals `value`: a constant, or an `Alloc` of one.
pub(crate) fn is_constant_fill(fgraph: &FunctionGraph, var: VarId, value: f64) -> bool {
    if let Some(data) = constant_value(fgraph, var) {
        return data.all_equal(value);
    }
    fgraph.var(var).owner_node().is_some_and(|node| {
        let apply = fgraph.node(node);
        apply.op_as::<Alloc>().is_some()
            && constant_value(fgraph, apply.inputs()[0]).is_some_and(|data| data.all_equal(value))
    })
}

/// Whether `new` may stand in for `old`.
pub(crate) fn compatible(fgraph: &FunctionGraph, old: VarId, new: VarId) -> bool {
    fgraph.var(old).ty().is_super(fgraph.var(new).ty())
}
