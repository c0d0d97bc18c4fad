//! # Stepkit Action
//!
//! The uniform contract every built-in action implements:
//! `operation × inputs → response + metadata | OperationError`.
//!
//! ## Core Types
//!
//! - [`BuiltinAction`] -- a named set of async operations
//! - [`ActionOutput`] -- primary response plus metadata (never absent)
//! - [`OperationError`] -- one error shape with a stable [`ErrorKind`]
//! - [`ActionContext`] -- workflow/step identifiers and cancellation
//! - [`Instrumented`] -- timing, metrics and audit envelope
//! - [`ActionRegistry`] -- dispatcher keyed by action name
//!
//! Inputs arrive as a dynamic map and are deserialized into typed structs
//! with [`parse_input`] at the operation boundary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// The action trait.
pub mod action;
/// Per-call context.
pub mod context;
/// Error taxonomy and conversions.
pub mod error;
pub mod input;
/// Operation results.
pub mod output;
/// Dispatcher.
pub mod registry;
pub mod wrapper;

pub use action::{BuiltinAction, unknown_operation};
pub use context::ActionContext;
pub use error::{Cancelled, ErrorKind, IntoOperationError, OperationError, ResultExt};
pub use input::{Inputs, parse_input, primary_path};
pub use output::{ActionOutput, IoStats};
pub use registry::ActionRegistry;
pub use wrapper::Instrumented;
