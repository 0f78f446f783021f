//! The operation capability.
//!
//! The operation catalog is open: anything implementing [`Op`] (plus `PartialEq + Hash`) can
//! be applied in a graph. The graph only needs type inference, alias declarations and,
//! optionally, an evaluation hook.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::{ApplyId, FunctionGraph};
use crate::types::TensorType;
use crate::value::TensorData;

/// `output index -> input indices` for destroy and view declarations.
pub type AliasMap = BTreeMap<usize, SmallVec<[usize; 2]>>;

pub type OpRef = Arc<dyn Op>;

pub trait Op: DynOp + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Dispatch key for local rewrites (`"elemwise"`, `"reshape"`, ...).
    fn family(&self) -> &'static str;

    /// Output types for the given input types.
    fn infer_types(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>>;

    /// Outputs that overwrite (and so destroy) inputs.
    fn destroy_map(&self) -> AliasMap {
        AliasMap::new()
    }

    /// Outputs that share storage with inputs without writing to them.
    fn view_map(&self) -> AliasMap {
        AliasMap::new()
    }

    /// Reference evaluation. `None` when the op has no evaluation hook.
    fn perform(&self, _inputs: &[&TensorData]) -> Option<Result<Vec<TensorData>>> {
        None
    }

    /// Veto for constant folding of `node`, an application of this op in `fgraph`.
    fn do_constant_folding(&self, _fgraph: &FunctionGraph, _node: ApplyId) -> bool {
        true
    }
}

/// Object-safe structural equality and hashing, derived for every `Op + PartialEq + Hash`.
pub trait DynOp {
    fn dyn_eq(&self, other: &dyn Op) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Op + PartialEq + Hash> DynOp for T {
    fn dyn_eq(&self, other: &dyn Op) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Op {
    pub fn downcast_ref<T: Op>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Op>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl PartialEq for dyn Op {
    fn eq(&self, other: &Self) -> bool {
        self.dyn_eq(other)
    }
}

impl Eq for dyn Op {}

impl Hash for dyn Op {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dyn_hash(state);
    }
}

pub trait IntoOpRef {
    fn into_op(self) -> OpRef;
}

impl<T: Op> IntoOpRef for T {
    fn into_op(self) -> OpRef {
        Arc::new(self)
    }
}

/// Input indices an op destroys, across all outputs.
pub fn destroyed_inputs(op: &dyn Op) -> SmallVec<[usize; 2]> {
    let mut inputs: SmallVec<[usize; 2]> = op.destroy_map().into_values().flatten().collect();
    inputs.sort_unstable();
    inputs.dedup();
    inputs
}
