//! Core domain types and algorithms for the odin pipeline executor.
//!
//! This crate holds everything that is independent of Kubernetes and of any
//! particular persistence backend:
//! - the [`Task`](task::Task) definition and its configuration structs,
//! - pipeline/task label rules and short-id generation,
//! - DAG construction and parallel topological ordering,
//! - the `^task.path` reference mini-language,
//! - SHA-1 hashing of files and argument vectors used for task fingerprints.

pub mod dag;
pub mod error;
pub mod hash;
pub mod label;
pub mod reference;
pub mod task;

pub use dag::{Graph, build_graph, dot_graph, topo_sort_parallel};
pub use error::{Error, Result};
pub use hash::{hash_args, hash_files, hash_text};
pub use label::{child_label, generate_pipeline_label, is_child_label, validate_pipeline_name};
pub use reference::{extract_path, is_reference, parse_reference, rewrite_references};
pub use task::{
    ConfigMapRef, CpuRequest, ResourceKind, SecretRef, SecurityContext, Task, VolumeRef,
};
