//! The address space: a flat map from node id to variable node.
//!
//! This is the server's value store. Writes replace the value in place
//! (last write wins) and no history is retained; a written value becomes
//! visible to the next sample tick.

use std::collections::HashMap;

use thiserror::Error;

use crate::node::{NodeId, VariableAttributes, VariableNode};
use crate::value::{DataType, Value};

/// Errors from address-space operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpaceError {
    /// The operation referenced a node id that is not present.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Attempted to add a node id that already exists.
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// A write's value type disagrees with the node's declared type.
    #[error("type mismatch on {node}: declared {expected}, got {actual}")]
    TypeMismatch {
        node: NodeId,
        expected: DataType,
        actual: DataType,
    },
}

/// In-memory value store.
#[derive(Debug, Clone, Default)]
pub struct AddressSpace {
    nodes: HashMap<NodeId, VariableNode>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable node. The declared data type is taken from `initial`.
    pub fn add_variable(
        &mut self,
        id: impl Into<NodeId>,
        initial: Value,
        attrs: VariableAttributes,
    ) -> Result<(), SpaceError> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(SpaceError::DuplicateNode(id));
        }
        self.nodes
            .insert(id.clone(), VariableNode::new(id, initial, attrs));
        Ok(())
    }

    /// Read the current value of a node, by copy.
    pub fn read(&self, id: &NodeId) -> Result<Value, SpaceError> {
        self.nodes
            .get(id)
            .map(|node| node.value().clone())
            .ok_or_else(|| SpaceError::UnknownNode(id.clone()))
    }

    /// Replace a node's value. The value's type must match the node's
    /// declared type exactly; mismatches are rejected, never coerced.
    pub fn write(&mut self, id: &NodeId, value: Value) -> Result<(), SpaceError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| SpaceError::UnknownNode(id.clone()))?;

        if value.data_type() != node.data_type() {
            return Err(SpaceError::TypeMismatch {
                node: id.clone(),
                expected: node.data_type(),
                actual: value.data_type(),
            });
        }

        node.set_value(value);
        Ok(())
    }

    /// Remove a node. Monitored items targeting it are cleaned up by the
    /// sampler on its next tick.
    pub fn remove_variable(&mut self, id: &NodeId) -> Result<VariableNode, SpaceError> {
        self.nodes
            .remove(id)
            .ok_or_else(|| SpaceError::UnknownNode(id.clone()))
    }

    /// Full node access, for metadata queries (HTTP API, access checks).
    pub fn node(&self, id: &NodeId) -> Option<&VariableNode> {
        self.nodes.get(id)
    }

    /// Iterate all nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &VariableNode> {
        self.nodes.values()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
