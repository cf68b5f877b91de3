//! kubediag Tools - Tool Registry and Execution Engine
//!
//! This crate provides the tool layer for kubediag:
//! - Schema: typed, closed parameter schemas
//! - Registry: tool descriptors and implementation bindings
//! - Runner: timeout-bounded tool execution
//! - Builtins: the built-in Kubernetes tool catalog

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtins;
pub mod error;
pub mod registry;
pub mod runner;
pub mod schema;

pub use error::{Error, Result};
pub use registry::{
    SafetyLevel, Tool, ToolCategory, ToolContext, ToolDescriptor, ToolRegistry, ToolResult,
};
pub use runner::{RunnerConfig, ToolRunner};
pub use schema::{ParamSpec, ParamType, ParamsSchema, SchemaViolation};
