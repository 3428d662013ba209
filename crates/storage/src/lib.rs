//! Storage locations for apkport.
//!
//! Everything the transfer pipeline reads or writes goes through a
//! [`StorageLocation`], which hides whether the bytes live behind a direct
//! filesystem path or inside a permission-scoped [`DocumentTree`]. All
//! operations are blocking and are meant to run on worker threads.

pub mod error;
mod location;
mod models;
mod path;
pub mod tree;

pub use crate::location::{StorageLocation, TreeNode};
pub use crate::models::{Stat, WalkEntry};
pub use crate::path::{validate as validate_path, validate_name};
pub use crate::tree::{DocumentTree, ReadSeek, TreeHandle, WriteSeek};
