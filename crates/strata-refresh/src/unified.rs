use std::collections::VecDeque;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use strata_types::{CancelToken, Depth, ResourcePath};
use tracing::{debug, warn};

use crate::error::{RefreshError, RefreshResult};
use crate::fs::FileSystemStat;
use crate::prefix_pool::PrefixPool;
use crate::resource::{ResourceInfo, ResourceTree};
use crate::stat::FileStat;

/// Index of a node in its [`UnifiedTree`].
///
/// Ids are renumbered whenever the walk moves to the next level, so an id
/// is only meaningful during the visit that produced it.
pub type NodeId = usize;

/// One resource as seen by both the workspace and the file system.
#[derive(Clone, Debug)]
pub struct UnifiedTreeNode {
    path: ResourcePath,
    location: PathBuf,
    stat: FileStat,
    workspace: Option<ResourceInfo>,
    first_child: Option<NodeId>,
    child_count: usize,
    children_added: bool,
}

impl UnifiedTreeNode {
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// File system location of the resource.
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn local_name(&self) -> Option<&str> {
        self.path.last_segment()
    }

    pub fn stat(&self) -> FileStat {
        self.stat
    }

    pub fn workspace_info(&self) -> Option<ResourceInfo> {
        self.workspace
    }

    pub fn exists_in_workspace(&self) -> bool {
        self.workspace.is_some()
    }

    pub fn exists_in_file_system(&self) -> bool {
        self.stat.is_valid()
    }

    /// Whether the file system has a folder here.
    pub fn is_folder(&self) -> bool {
        self.stat.is_folder()
    }

    /// Whether the file system has a file here.
    pub fn is_file(&self) -> bool {
        self.stat.is_file()
    }

    pub fn last_modified(&self) -> i64 {
        self.stat.last_modified()
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    fn may_have_children(&self) -> bool {
        self.stat.is_folder() || self.workspace.is_some_and(|info| info.kind.is_container())
    }
}

/// Callback for [`UnifiedTree::accept`].
pub trait UnifiedTreeVisitor {
    /// Visit `node`. Return `true` to descend into its children.
    fn visit(&mut self, tree: &mut UnifiedTree<'_>, node: NodeId) -> RefreshResult<bool>;
}

impl<F> UnifiedTreeVisitor for F
where
    F: FnMut(&mut UnifiedTree<'_>, NodeId) -> RefreshResult<bool>,
{
    fn visit(&mut self, tree: &mut UnifiedTree<'_>, node: NodeId) -> RefreshResult<bool> {
        self(tree, node)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueItem {
    Node(NodeId),
    /// Separates breadth-first levels.
    LevelMarker,
    /// Ends one node's block of children.
    ChildrenMarker,
}

/// Breadth-first walk over the union of a workspace subtree and the
/// matching file system subtree.
///
/// Children of a node are computed only when the visitor descends, by a
/// merge-join of the sorted file system listing with the sorted workspace
/// members. Symbolic links to directories that would make the walk cycle,
/// or that lead back inside the root, are not followed. Only the nodes of
/// the level being visited and the queued next level are held in memory.
pub struct UnifiedTree<'a> {
    fs: &'a dyn FileSystemStat,
    workspace: &'a dyn ResourceTree,
    root: ResourcePath,
    root_location: PathBuf,
    cancel: CancelToken,
    nodes: Vec<UnifiedTreeNode>,
    queue: VecDeque<QueueItem>,
    level: usize,
    child_level_valid: bool,
    halted: bool,
    root_real: PrefixPool,
    followed_links: PrefixPool,
}

impl<'a> UnifiedTree<'a> {
    /// A tree rooted at workspace resource `root`, stored on disk at
    /// `root_location`.
    pub fn new(
        fs: &'a dyn FileSystemStat,
        workspace: &'a dyn ResourceTree,
        root: ResourcePath,
        root_location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fs,
            workspace,
            root,
            root_location: root_location.into(),
            cancel: CancelToken::new(),
            nodes: Vec::new(),
            queue: VecDeque::new(),
            level: 0,
            child_level_valid: false,
            halted: false,
            root_real: PrefixPool::new(1),
            followed_links: PrefixPool::new(16),
        }
    }

    /// Poll `cancel` once per visited node.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn root(&self) -> &ResourcePath {
        &self.root
    }

    /// Breadth-first level of the nodes being visited (root = 0).
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn node(&self, id: NodeId) -> &UnifiedTreeNode {
        &self.nodes[id]
    }

    /// Nodes currently held: the level being visited plus whatever is
    /// queued behind it.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children of `id`, computing and queueing them if needed.
    ///
    /// Empty when the children would lie beyond the requested depth.
    pub fn children(&mut self, id: NodeId) -> RefreshResult<Vec<NodeId>> {
        self.add_node_children_to_queue(id)?;
        let node = &self.nodes[id];
        Ok(match node.first_child {
            Some(first) => (first..first + node.child_count).collect(),
            None => Vec::new(),
        })
    }

    /// End the walk after the current visit.
    pub fn halt(&mut self) {
        self.halted = true;
        self.queue.clear();
    }

    /// Walk the tree down to `depth`, calling `visitor` on every node.
    pub fn accept<V>(&mut self, visitor: &mut V, depth: Depth) -> RefreshResult<()>
    where
        V: UnifiedTreeVisitor + ?Sized,
    {
        let depth = depth.limit();
        self.initialize_queue();
        self.set_level(0, depth);

        while let Some(item) = self.queue.pop_front() {
            let id = match item {
                QueueItem::ChildrenMarker => continue,
                QueueItem::LevelMarker => {
                    if !self.set_level(self.level + 1, depth) {
                        break;
                    }
                    self.compact_nodes();
                    continue;
                }
                QueueItem::Node(id) => id,
            };
            if self.cancel.is_canceled() {
                self.queue.clear();
                debug!(root = %self.root, visited = id, "unified tree walk canceled");
                return Err(RefreshError::Canceled);
            }
            let descend = visitor.visit(self, id)?;
            if self.halted {
                break;
            }
            if descend {
                self.add_node_children_to_queue(id)?;
            } else {
                self.remove_node_children_from_queue(id);
            }
        }
        self.queue.clear();
        debug!(root = %self.root, level = self.level, "unified tree walk finished");
        Ok(())
    }

    fn initialize_queue(&mut self) {
        self.nodes.clear();
        self.queue.clear();
        self.halted = false;
        self.followed_links.clear();
        self.root_real.clear();
        if let Some(real) = self.fs.canonical(&self.root_location) {
            self.root_real.insert_shorter(&dir_key(&real));
        }

        let stat = self.fs.stat(&self.root_location);
        let workspace = self.workspace.info(&self.root);
        if stat.is_valid() || workspace.is_some() {
            let root = self.create_node(self.root.clone(), self.root_location.clone(), stat, workspace);
            self.queue.push_back(QueueItem::Node(root));
        }
        self.queue.push_back(QueueItem::LevelMarker);
    }

    fn set_level(&mut self, level: usize, depth: usize) -> bool {
        self.level = level;
        self.child_level_valid = level < depth;
        level <= depth
    }

    fn create_node(
        &mut self,
        path: ResourcePath,
        location: PathBuf,
        stat: FileStat,
        workspace: Option<ResourceInfo>,
    ) -> NodeId {
        self.nodes.push(UnifiedTreeNode {
            path,
            location,
            stat,
            workspace,
            first_child: None,
            child_count: 0,
            children_added: false,
        });
        self.nodes.len() - 1
    }

    /// Drop the nodes of finished levels and renumber the queued ones in
    /// queue order.
    fn compact_nodes(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let mut old: Vec<Option<UnifiedTreeNode>> = std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let mut remap: Vec<Option<NodeId>> = vec![None; old.len()];
        for item in self.queue.iter_mut() {
            let QueueItem::Node(id) = item else {
                continue;
            };
            if let Some(node) = old[*id].take() {
                remap[*id] = Some(self.nodes.len());
                self.nodes.push(node);
            }
            *id = remap[*id].unwrap_or(*id);
        }
        for node in &mut self.nodes {
            node.first_child = node.first_child.and_then(|first| remap[first]);
            if node.first_child.is_none() {
                node.child_count = 0;
            }
        }
        debug!(root = %self.root, level = self.level, nodes = self.nodes.len(), "unified tree nodes compacted");
    }

    fn add_node_children_to_queue(&mut self, id: NodeId) -> RefreshResult<()> {
        if !self.child_level_valid || self.nodes[id].children_added {
            return Ok(());
        }
        self.add_children(id)?;
        if self.queue.is_empty() {
            return Ok(());
        }
        // Tidy up behind the last node of a children block; after the last
        // node of a level, the children just added close the next level.
        if self.queue.front() == Some(&QueueItem::ChildrenMarker) {
            self.queue.pop_front();
        }
        if self.queue.front() == Some(&QueueItem::LevelMarker) {
            self.queue.push_back(QueueItem::LevelMarker);
        }
        Ok(())
    }

    fn remove_node_children_from_queue(&mut self, id: NodeId) {
        let Some(first) = self.nodes[id].first_child else {
            return;
        };
        let mut level_marker = false;
        while let Some(item) = self.queue.pop_back() {
            match item {
                QueueItem::Node(n) if n == first => break,
                QueueItem::LevelMarker => level_marker = true,
                _ => {}
            }
        }
        if level_marker {
            self.queue.push_back(QueueItem::LevelMarker);
        }
        let node = &mut self.nodes[id];
        node.first_child = None;
        node.child_count = 0;
    }

    fn add_children(&mut self, id: NodeId) -> RefreshResult<()> {
        self.nodes[id].children_added = true;
        let parent = &self.nodes[id];
        if !parent.may_have_children() {
            return Ok(());
        }
        let parent_path = parent.path.clone();
        let parent_location = parent.location.clone();

        let on_disk = if parent.exists_in_file_system() && parent.is_folder() {
            self.fs.list(&parent_location)?
        } else {
            Vec::new()
        };
        let in_workspace = match parent.workspace {
            Some(info) if info.kind.is_container() => self.workspace.members(&parent_path),
            _ => Vec::new(),
        };

        let mut disk = on_disk.iter().peekable();
        let mut members = in_workspace.iter().peekable();
        let mut added = 0;
        loop {
            let (name, from_disk, from_workspace) = match (disk.peek(), members.peek()) {
                (None, None) => break,
                (Some(d), None) => (d.as_str(), true, false),
                (None, Some(m)) => (m.as_str(), false, true),
                (Some(d), Some(m)) => match m.as_str().cmp(d.as_str()) {
                    std::cmp::Ordering::Equal => (m.as_str(), true, true),
                    std::cmp::Ordering::Greater => (d.as_str(), true, false),
                    std::cmp::Ordering::Less => (m.as_str(), false, true),
                },
            };
            let name = name.to_string();
            if from_disk {
                disk.next();
            }
            if from_workspace {
                members.next();
            }

            let path = match parent_path.join(&name) {
                Ok(path) => path,
                Err(e) => {
                    warn!(parent = %parent_path, name = %name, error = %e, "skipping unrepresentable child");
                    continue;
                }
            };
            let location = parent_location.join(&name);
            let stat = if from_disk {
                self.fs.stat(&location)
            } else {
                FileStat::NONE
            };
            let workspace = if from_workspace {
                self.workspace.info(&path)
            } else {
                None
            };
            if !from_workspace && stat.is_folder() && self.is_recursive_link(&parent_location, &location) {
                debug!(path = %path, "not following recursive symbolic link");
                continue;
            }

            let child = self.create_node(path, location, stat, workspace);
            let parent = &mut self.nodes[id];
            if parent.first_child.is_none() {
                parent.first_child = Some(child);
            }
            parent.child_count += 1;
            self.queue.push_back(QueueItem::Node(child));
            added += 1;
        }
        if added > 0 {
            self.queue.push_back(QueueItem::ChildrenMarker);
        }
        Ok(())
    }

    /// Whether `location` is a link to a directory whose traversal would
    /// revisit an ancestor, the root's own subtree, or an already-followed
    /// region.
    fn is_recursive_link(&mut self, parent: &Path, location: &Path) -> bool {
        let Some(target) = self.fs.resolve_link(location) else {
            return false;
        };
        let target = dir_key(&target);
        if let Some(real_parent) = self.fs.canonical(parent) {
            if dir_key(&real_parent).starts_with(&target) {
                return true;
            }
        }
        if self.root_real.has_prefix_of(&target) || self.followed_links.has_prefix_of(&target) {
            return true;
        }
        self.followed_links.insert_shorter(&target);
        false
    }
}

/// Canonical directory path with a trailing separator, so that string
/// prefixes line up with directory ancestry.
fn dir_key(path: &Path) -> String {
    let mut key = path.to_string_lossy().into_owned();
    if !key.ends_with(MAIN_SEPARATOR) {
        key.push(MAIN_SEPARATOR);
    }
    key
}
