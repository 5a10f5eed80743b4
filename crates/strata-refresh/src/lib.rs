//! Workspace and file system reconciliation.
//!
//! A [`UnifiedTree`] walks the union of a workspace subtree and the matching
//! directory tree breadth-first, pairing each resource with what the disk
//! says about it. Visitors decide per node whether to descend; children are
//! listed lazily and merged by name.
//!
//! # Key Types
//!
//! - [`FileStat`]: packed file system attributes of one location
//! - [`FileSystemStat`]: the file system queries a walk needs ([`LocalFileSystem`] on disk)
//! - [`ResourceTree`]: the workspace side ([`WorkspaceTree`] in memory)
//! - [`UnifiedTree`]: the merged walk, with [`UnifiedTreeVisitor`] callbacks
//! - [`SyncVisitor`]: classifies out-of-sync resources into a [`SyncReport`]

pub mod error;
pub mod fs;
pub mod prefix_pool;
pub mod resource;
pub mod stat;
pub mod sync;
pub mod unified;

pub use error::{RefreshError, RefreshResult};
pub use fs::{platform_file_system, FileSystemStat, LocalFileSystem, ReadOnlyRule};
pub use prefix_pool::PrefixPool;
pub use resource::{ResourceInfo, ResourceKind, ResourceTree, WorkspaceTree};
pub use stat::FileStat;
pub use sync::{is_synchronized, sync_report, Discrepancy, SyncFinding, SyncReport, SyncVisitor};
pub use unified::{NodeId, UnifiedTree, UnifiedTreeNode, UnifiedTreeVisitor};
