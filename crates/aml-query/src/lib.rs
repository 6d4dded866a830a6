//! AML item query compiler
//!
//! Translates a hierarchical "Item" query tree (a root entity with nested
//! logical groups and property filters) into SQL for a schema where every
//! item type maps to one table.
//!
//! ## Features
//!
//! - **Streaming compilation**: structural events drive an explicit frame stack
//! - **Typed criteria**: literals render per the property's declared type
//! - **Relational filters**: a nested `Item` under a property becomes an outer join
//! - **Permissions**: secured table functions or a legacy row predicate
//! - **Output modes**: full select, clause subsets, row count, row offset
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aml_query::{compile_aml, CompileSettings, StaticMetadata};
//! use std::sync::Arc;
//!
//! let compiler = compile_aml(
//!     r#"<Item type="Part"><name condition="like">A*</name></Item>"#,
//!     CompileSettings::default(),
//!     Arc::new(StaticMetadata::new()),
//! )?;
//! let sql = compiler.render()?;
//! ```

pub mod compiler;
pub mod context;
pub mod criteria;
pub mod error;
mod frame;
pub mod literal;
pub mod markup;
pub mod metadata;
pub mod permission;
pub mod render;
pub mod select;
pub mod settings;

// Re-exports
pub use compiler::SqlCompiler;
pub use context::{DeferredPredicate, EntityContext, JoinTable, OrderColumn};
pub use criteria::Condition;
pub use error::{CompileError, CompileResult};
pub use markup::{compile_aml, feed_aml};
pub use metadata::{MetadataProvider, PropertyMeta, PropertyType, StaticMetadata};
pub use permission::{PermissionClauseBuilder, PermissionMode};
pub use render::ClauseAssembler;
pub use settings::{ClauseSet, CompileSettings, OutputMode};
