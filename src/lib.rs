#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod collector;
mod deps;
mod error;
mod host;
mod item;
mod sources;
mod state;
mod tree;

pub use crate::collector::Leaf;
pub use crate::deps::{DependencyContext, TaskDeps, TaskRef};
pub use crate::error::{SourceSetError, TreeError};
pub use crate::host::{BaseDir, BuildPhase, PathResolver, SourceHost, Unrestricted};
pub use crate::item::{Producer, SourceItem};
pub use crate::sources::{ItemView, SourceSet};
pub use crate::tree::{FileTree, Patterns};
