use std::ops::Index;
use std::sync::Arc;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use super::{ApplyId, VarId};
use crate::error::{InvalidAliasMapSnafu, Result, TypeInferenceSnafu, UnknownNodeSnafu, UnknownVariableSnafu};
use crate::op::{AliasMap, Op, OpRef};
use crate::types::TensorType;
use crate::value::TensorData;

/// A typed value slot.
#[derive(derive_more::Debug, Clone)]
pub struct Variable {
    pub(crate) ty: TensorType,
    pub(crate) owner: Option<(ApplyId, usize)>,
    #[debug(skip)]
    pub(crate) constant: Option<Arc<TensorData>>,
    pub(crate) name: Option<String>,
}

impl Variable {
    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    /// Producing node and output position.
    pub fn owner(&self) -> Option<(ApplyId, usize)> {
        self.owner
    }

    pub fn owner_node(&self) -> Option<ApplyId> {
        self.owner.map(|(node, _)| node)
    }

    pub fn constant(&self) -> Option<&Arc<TensorData>> {
        self.constant.as_ref()
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// One application of an [`Op`] to ordered inputs.
#[derive(Debug, Clone)]
pub struct Apply {
    pub(crate) op: OpRef,
    pub(crate) inputs: SmallVec<[VarId; 4]>,
    pub(crate) outputs: SmallVec<[VarId; 2]>,
}

impl Apply {
    pub fn op(&self) -> &OpRef {
        &self.op
    }

    pub fn op_as<T: Op>(&self) -> Option<&T> {
        self.op.downcast_ref::<T>()
    }

    pub fn family(&self) -> &'static str {
        self.op.family()
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }
}

/// Append-only storage for variables and nodes.
///
/// Nodes created here are *detached* until a [`FunctionGraph`](super::FunctionGraph) imports
/// them. Ids are only meaningful for the arena that issued them; indexing with a foreign id
/// panics, the `get_*` accessors return `None`.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    vars: Vec<Variable>,
    applies: Vec<Apply>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_var(&mut self, var: Variable) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(var);
        id
    }

    /// A free (ownerless, non-constant) variable, typically a graph input.
    pub fn input(&mut self, name: &str, ty: TensorType) -> VarId {
        self.push_var(Variable { ty, owner: None, constant: None, name: Some(name.to_string()) })
    }

    pub fn constant(&mut self, data: TensorData) -> VarId {
        self.push_var(Variable { ty: data.tensor_type(), owner: None, constant: Some(Arc::new(data)), name: None })
    }

    /// Create a detached node, inferring its output types.
    pub fn apply(&mut self, op: OpRef, inputs: &[VarId]) -> Result<ApplyId> {
        let types = inputs
            .iter()
            .map(|&var| self.get_var(var).map(|v| v.ty.clone()).context(UnknownVariableSnafu { var }))
            .collect::<Result<Vec<_>>>()?;
        let out_types = op.infer_types(&types)?;
        check_alias_map(op.as_ref(), &op.destroy_map(), inputs.len())?;
        check_alias_map(op.as_ref(), &op.view_map(), inputs.len())?;

        let id = ApplyId(self.applies.len() as u32);
        let outputs = out_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| self.push_var(Variable { ty, owner: Some((id, i)), constant: None, name: None }))
            .collect();
        self.applies.push(Apply { op, inputs: inputs.into(), outputs });
        Ok(id)
    }

    /// Create a detached single-output node and return its output.
    pub fn apply1(&mut self, op: OpRef, inputs: &[VarId]) -> Result<VarId> {
        let name = op.to_string();
        let node = self.apply(op, inputs)?;
        match self.applies[node.index()].outputs.as_slice() {
            [out] => Ok(*out),
            outs => TypeInferenceSnafu { op: name, reason: format!("expected one output, got {}", outs.len()) }.fail(),
        }
    }

    pub fn get_var(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(id.index())
    }

    pub fn get_node(&self, id: ApplyId) -> Option<&Apply> {
        self.applies.get(id.index())
    }

    pub(crate) fn node_checked(&self, node: ApplyId) -> Result<&Apply> {
        self.get_node(node).context(UnknownNodeSnafu { node })
    }

    pub(crate) fn var_checked(&self, var: VarId) -> Result<&Variable> {
        self.get_var(var).context(UnknownVariableSnafu { var })
    }

    pub fn set_name(&mut self, var: VarId, name: &str) {
        if let Some(v) = self.vars.get_mut(var.index()) {
            v.name = Some(name.to_string());
        }
    }

    pub fn num_variables(&self) -> usize {
        self.vars.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.applies.len()
    }

    pub(crate) fn set_input(&mut self, node: ApplyId, index: usize, var: VarId) {
        self.applies[node.index()].inputs[index] = var;
    }
}

fn check_alias_map(op: &dyn Op, map: &AliasMap, count: usize) -> Result<()> {
    for &index in map.values().flatten() {
        ensure!(index < count, InvalidAliasMapSnafu { op: op.to_string(), index, count });
    }
    Ok(())
}

impl Index<VarId> for NodeArena {
    type Output = Variable;

    fn index(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }
}

impl Index<ApplyId> for NodeArena {
    type Output = Apply;

    fn index(&self, id: ApplyId) -> &Apply {
        &self.applies[id.index()]
    }
}
