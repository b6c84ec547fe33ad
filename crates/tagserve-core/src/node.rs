//! Variable nodes and their identifiers.

use serde::{Deserialize, Serialize};

use crate::value::{AccessLevel, DataType, Value};

/// Identifier of one node in the address space.
///
/// Opaque, comparable, hashable; stable for the lifetime of the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Immutable descriptive metadata of a variable node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableAttributes {
    /// Human-readable name for displays.
    pub display_name: String,

    /// Optional longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Read/write access mask.
    pub access: AccessLevel,
}

impl VariableAttributes {
    /// New attributes with the given display name, read/write access and
    /// no description.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            description: None,
            access: AccessLevel::READ_WRITE,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access = AccessLevel::READ_ONLY;
        self
    }
}

/// One variable in the address space.
///
/// Created once by the bootstrap; the value is mutated only through
/// [`AddressSpace::write`](crate::space::AddressSpace::write), everything
/// else is immutable.
#[derive(Debug, Clone)]
pub struct VariableNode {
    id: NodeId,
    data_type: DataType,
    value: Value,
    attrs: VariableAttributes,
}

impl VariableNode {
    /// The declared data type is taken from the initial value.
    pub(crate) fn new(id: NodeId, initial: Value, attrs: VariableAttributes) -> Self {
        Self {
            id,
            data_type: initial.data_type(),
            value: initial,
            attrs,
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn attrs(&self) -> &VariableAttributes {
        &self.attrs
    }

    pub(crate) fn set_value(&mut self, value: Value) {
        self.value = value;
    }
}
