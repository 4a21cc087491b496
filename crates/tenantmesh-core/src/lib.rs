//! TenantMesh Core Types and Traits
//!
//! This crate provides the fundamental types and traits shared by the
//! template provisioning and channel routing crates:
//! - Hierarchical node paths and tenant identifiers
//! - Tenant template records and manifest parsing
//! - `TemplateStore` and `CoordinationStore` abstractions
//! - An in-memory coordination store
//! - Core error types

pub mod coordination;
pub mod error;
pub mod memory_store;
pub mod path;
pub mod template;
pub mod template_store;
pub mod tenant;

pub use coordination::{ChildrenChange, ChildrenChangeStream, CoordinationStore};
pub use error::{Error, Result};
pub use memory_store::MemoryCoordinationStore;
pub use path::NodePath;
pub use template::{DEFAULT_CONTENT_FOLDER, TEMPLATE_MANIFEST_FILE, TenantTemplate};
pub use template_store::{TemplateEntry, TemplateFolder, TemplateStore};
pub use tenant::{TenantId, TenantLayout};
