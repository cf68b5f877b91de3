//! kubediag Skills - Diagnostic Skill Catalog
//!
//! A skill wraps a tool with a fixed intent (for example "logs of the
//! previous container instance"). Many skills may reference one tool.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SkillCatalog`] | YAML/JSON catalog document |
//! | [`SkillRegistry`] | Immutable, tool-checked skill lookup |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod registry;
pub mod skill;

pub use error::{Error, Result};
pub use registry::SkillRegistry;
pub use skill::{Skill, SkillCatalog, SkillSpec, DEFAULT_CATALOG};
