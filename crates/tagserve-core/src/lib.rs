//! # tagserve-core
//!
//! Core tag data model and address space implementation.
//!
//! This crate provides:
//! - Scalar value types (Value, DataType, AccessLevel)
//! - Node identifiers and variable attributes
//! - The in-memory address space (value store)
//!
//! This crate is intentionally runtime-agnostic and contains no async code;
//! the monitoring engine and transports build on top of it.

pub mod node;
pub mod space;
pub mod value;

pub use node::{NodeId, VariableAttributes, VariableNode};
pub use space::{AddressSpace, SpaceError};
pub use value::{AccessLevel, DataType, Value};
