//! paramdoc-core: resolution engine for interpolated parameter documents
//!
//! This crate loads hierarchical YAML/JSON parameter documents whose string
//! values embed `${...}` expressions (absolute and relative references,
//! resolver calls, quoted arithmetic) and resolves them lazily, at most once
//! per node, with cycle detection and aggregated error reporting.
//!
//! # Example
//!
//! ```rust
//! use paramdoc_core::Config;
//!
//! let yaml = r#"
//! base: 10
//! scaled: "${eval:'${..base}*2'}"
//! train:
//!   lr: null
//!   actual_lr: ${resolve_default:5e-4,${.lr}}
//! "#;
//!
//! let config = Config::from_yaml(yaml).unwrap();
//! assert_eq!(config.get("scaled").unwrap().as_i64(), Some(20));
//! assert_eq!(config.get("train.actual_lr").unwrap().as_f64(), Some(5e-4));
//! ```

pub mod arith;
pub mod cache;
pub mod engine;
pub mod error;
pub mod interpolation;
pub mod overrides;
pub mod path;
pub mod resolver;
mod stack;
pub mod tree;
pub mod value;

mod config;

pub use config::{Config, ConfigOptions};
pub use engine::{resolve, Engine, Resolution};
pub use error::{Error, ErrorKind, ErrorReport, Result};
pub use resolver::{builtin_registry, FnResolver, Resolver, ResolverContext, ResolverRegistry};
pub use tree::{NodeId, Tree};
pub use value::Value;
