//! Protobuf Schema Registry
//!
//! Holds the accepted protobuf schema of one or more named registries and
//! gates every change to it. A candidate descriptor set is compared with the
//! accepted one entity by entity, linted, and judged by a compatibility
//! profile before it may replace the accepted schema.
//!
//! ## Features
//!
//! - **Structural Diff**: Messages, enums and services matched by qualified
//!   name; fields and enum values by number, methods by name
//! - **Scoped Checks**: Whole domain, package, file, single type, or a type
//!   reached through a resource binding
//! - **Compatibility Profiles**: `avro-evolve`, `proto-evolve`, `allow-add`,
//!   `allow-none`, `allow-all`
//! - **Git Storage**: Every accepted change is a commit, with a SHA256
//!   checksum guarding the stored descriptor set
//! - **Shadow Registries**: Follow an upstream registry while keeping their
//!   own extra files
//!
//! ## Architecture
//!
//! ```text
//!  candidate FileDescriptorSet
//!            │
//!            ▼
//!   ProtoDomain (domain) ── Scope (scope) ──▶ Selection
//!            │                                   │
//!            ├────────── ProtoDiff (diff) ◀──────┤
//!            └───────── ProtoLinter (lint) ◀─────┘
//!                             │ merge
//!                             ▼
//!               Report ── ValidationProfile (profile)
//!                             │
//!                             ▼
//!        SchemaRegistry (registry) ── SchemaStore (store)
//! ```

pub mod binding;
pub mod checksum;
pub mod config;
pub mod diff;
pub mod domain;
pub mod error;
pub mod lint;
pub mod profile;
pub mod registry;
pub mod report;
pub mod scope;
pub mod store;
pub mod validate;

pub use binding::{BindingResolver, BindingTarget, Bindings, ResourceBinding};
pub use checksum::Checksum;
pub use config::RegistryConfig;
pub use diff::{diff, ProtoDiff};
pub use domain::ProtoDomain;
pub use error::{LoadError, RegistryError, Result};
pub use lint::{lint, LintConfig, LintRule, ProtoLinter};
pub use profile::{ProfileOptions, Profiles, ValidationProfile};
pub use registry::{Registries, RegistrySettings, SchemaContext, SchemaRegistry};
pub use report::{ChangeRecord, ChangeType, Report, Severity};
pub use scope::Scope;
pub use store::{Comment, GitStore, MemoryStore, SchemaStore};
pub use validate::{validate, Pipeline};
