use std::path::{Path, PathBuf};

use strata_types::{Depth, ResourcePath};
use tracing::debug;

use crate::error::RefreshResult;
use crate::fs::FileSystemStat;
use crate::resource::{ResourceKind, ResourceTree};
use crate::unified::{NodeId, UnifiedTree, UnifiedTreeNode, UnifiedTreeVisitor};

/// How the workspace and the file system disagree about one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discrepancy {
    /// Known to the workspace, gone from disk.
    MissingOnDisk,
    /// On disk, unknown to the workspace.
    MissingInWorkspace { is_folder: bool },
    /// A file on one side, a folder on the other.
    KindChanged,
    /// A file changed on disk since the workspace last synchronized.
    Modified { workspace: i64, disk: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncFinding {
    pub path: ResourcePath,
    pub location: PathBuf,
    pub kind: Discrepancy,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub findings: Vec<SyncFinding>,
    /// Nodes visited by the walk.
    pub visited: usize,
}

impl SyncReport {
    pub fn is_synchronized(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Compares every node of a [`UnifiedTree`] walk.
///
/// Does not descend below a resource missing on either side: everything
/// under it is missing as well.
#[derive(Debug, Default)]
pub struct SyncVisitor {
    report: SyncReport,
    stop_at_first: bool,
}

impl SyncVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Halt the walk at the first discrepancy.
    pub fn stop_at_first(mut self) -> Self {
        self.stop_at_first = true;
        self
    }

    pub fn into_report(self) -> SyncReport {
        self.report
    }

    fn classify(node: &UnifiedTreeNode) -> (Option<Discrepancy>, bool) {
        let Some(info) = node.workspace_info() else {
            let kind = Discrepancy::MissingInWorkspace {
                is_folder: node.is_folder(),
            };
            return (Some(kind), false);
        };
        if !node.exists_in_file_system() {
            return (Some(Discrepancy::MissingOnDisk), false);
        }
        let is_file = info.kind == ResourceKind::File;
        if is_file != node.is_file() {
            return (Some(Discrepancy::KindChanged), false);
        }
        if is_file && info.local_sync != node.last_modified() {
            let kind = Discrepancy::Modified {
                workspace: info.local_sync,
                disk: node.last_modified(),
            };
            return (Some(kind), false);
        }
        (None, !is_file)
    }
}

impl UnifiedTreeVisitor for SyncVisitor {
    fn visit(&mut self, tree: &mut UnifiedTree<'_>, id: NodeId) -> RefreshResult<bool> {
        self.report.visited += 1;
        let node = tree.node(id);
        let (finding, descend) = Self::classify(node);
        let Some(kind) = finding else {
            return Ok(descend);
        };
        debug!(path = %node.path(), ?kind, "out of sync");
        self.report.findings.push(SyncFinding {
            path: node.path().clone(),
            location: node.location().to_path_buf(),
            kind,
        });
        if self.stop_at_first {
            tree.halt();
        }
        Ok(descend)
    }
}

/// Every discrepancy between `workspace` below `root` and the file system
/// below `location`.
pub fn sync_report(
    fs: &dyn FileSystemStat,
    workspace: &dyn ResourceTree,
    root: &ResourcePath,
    location: &Path,
    depth: Depth,
) -> RefreshResult<SyncReport> {
    let mut visitor = SyncVisitor::new();
    UnifiedTree::new(fs, workspace, root.clone(), location).accept(&mut visitor, depth)?;
    Ok(visitor.into_report())
}

/// Whether `workspace` below `root` matches the file system, stopping at
/// the first difference.
pub fn is_synchronized(
    fs: &dyn FileSystemStat,
    workspace: &dyn ResourceTree,
    root: &ResourcePath,
    location: &Path,
    depth: Depth,
) -> RefreshResult<bool> {
    let mut visitor = SyncVisitor::new().stop_at_first();
    UnifiedTree::new(fs, workspace, root.clone(), location).accept(&mut visitor, depth)?;
    Ok(visitor.into_report().is_synchronized())
}
