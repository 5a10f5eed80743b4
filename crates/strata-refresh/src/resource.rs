use std::collections::BTreeMap;

use strata_types::{ResourcePath, TypeError};

/// Kind of a workspace resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Root,
    Project,
    Folder,
    File,
}

impl ResourceKind {
    /// Whether resources of this kind have members.
    pub fn is_container(self) -> bool {
        !matches!(self, ResourceKind::File)
    }
}

/// What the workspace knows about one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    /// Last-modified time of the file system content when the workspace
    /// last synchronized with it, in ms since the Unix epoch.
    pub local_sync: i64,
}

impl ResourceInfo {
    pub fn new(kind: ResourceKind, local_sync: i64) -> Self {
        Self { kind, local_sync }
    }
}

/// The workspace's own view of its resources.
pub trait ResourceTree {
    /// Information about `path`, or `None` if the workspace has no such
    /// resource.
    fn info(&self, path: &ResourcePath) -> Option<ResourceInfo>;

    /// Names of the direct members of `path`, sorted.
    fn members(&self, path: &ResourcePath) -> Vec<String>;
}

/// In-memory [`ResourceTree`].
///
/// The root always exists. Adding a resource creates its missing
/// ancestors: the first segment as a project, the others as folders.
#[derive(Clone, Debug)]
pub struct WorkspaceTree {
    resources: BTreeMap<ResourcePath, ResourceInfo>,
}

impl Default for WorkspaceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceTree {
    pub fn new() -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(ResourcePath::root(), ResourceInfo::new(ResourceKind::Root, 0));
        Self { resources }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.len() == 1
    }

    pub fn add_project(&mut self, name: &str) -> Result<ResourcePath, TypeError> {
        let path = ResourcePath::project(name)?;
        self.resources
            .entry(path.clone())
            .or_insert(ResourceInfo::new(ResourceKind::Project, 0));
        Ok(path)
    }

    /// Add a folder (or project, for a single segment) and its ancestors.
    pub fn add_folder(&mut self, path: &ResourcePath) {
        self.ensure_parents(path);
        self.resources
            .entry(path.clone())
            .or_insert(ResourceInfo::new(container_kind(path), 0));
    }

    /// Add or update a file synchronized at `local_sync`.
    ///
    /// A single-segment path cannot be a file; it becomes a project.
    pub fn add_file(&mut self, path: &ResourcePath, local_sync: i64) {
        if path.segment_count() < 2 {
            self.add_folder(path);
            return;
        }
        self.ensure_parents(path);
        self.resources
            .insert(path.clone(), ResourceInfo::new(ResourceKind::File, local_sync));
    }

    /// Remove `path` and everything below it. The root cannot be removed.
    pub fn remove(&mut self, path: &ResourcePath) -> usize {
        if path.is_root() {
            return 0;
        }
        let doomed: Vec<ResourcePath> = self
            .resources
            .range(path.clone()..)
            .map(|(p, _)| p)
            .take_while(|p| p.as_str().starts_with(path.as_str()))
            .filter(|p| path.is_prefix_of(p))
            .cloned()
            .collect();
        for p in &doomed {
            self.resources.remove(p);
        }
        doomed.len()
    }

    fn ensure_parents(&mut self, path: &ResourcePath) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if self.resources.contains_key(&p) {
                break;
            }
            let next = p.parent();
            let kind = container_kind(&p);
            self.resources.insert(p, ResourceInfo::new(kind, 0));
            parent = next;
        }
    }
}

fn container_kind(path: &ResourcePath) -> ResourceKind {
    match path.segment_count() {
        0 => ResourceKind::Root,
        1 => ResourceKind::Project,
        _ => ResourceKind::Folder,
    }
}

impl ResourceTree for WorkspaceTree {
    fn info(&self, path: &ResourcePath) -> Option<ResourceInfo> {
        self.resources.get(path).copied()
    }

    fn members(&self, path: &ResourcePath) -> Vec<String> {
        let depth = path.segment_count() + 1;
        let mut names: Vec<String> = self
            .resources
            .range(path.clone()..)
            .map(|(p, _)| p)
            .take_while(|p| p.as_str().starts_with(path.as_str()))
            .filter(|p| p.segment_count() == depth && path.is_prefix_of(p))
            .filter_map(|p| p.last_segment().map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::new(s).unwrap()
    }

    #[test]
    fn adding_a_file_creates_ancestors() {
        let mut tree = WorkspaceTree::new();
        tree.add_file(&p("/proj/src/main.rs"), 10);
        assert_eq!(tree.info(&p("/proj")).unwrap().kind, ResourceKind::Project);
        assert_eq!(tree.info(&p("/proj/src")).unwrap().kind, ResourceKind::Folder);
        assert_eq!(
            tree.info(&p("/proj/src/main.rs")),
            Some(ResourceInfo::new(ResourceKind::File, 10))
        );
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn members_are_direct_children_sorted() {
        let mut tree = WorkspaceTree::new();
        tree.add_file(&p("/p/b.txt"), 1);
        tree.add_file(&p("/p/a/x.txt"), 1);
        tree.add_file(&p("/p/a.b"), 1);
        tree.add_project("q").unwrap();
        tree.add_file(&p("/pp/z"), 1);

        assert_eq!(tree.members(&ResourcePath::root()), vec!["p", "pp", "q"]);
        assert_eq!(tree.members(&p("/p")), vec!["a", "a.b", "b.txt"]);
        assert_eq!(tree.members(&p("/p/a")), vec!["x.txt"]);
        assert!(tree.members(&p("/p/b.txt")).is_empty());
    }

    #[test]
    fn remove_drops_the_subtree_only() {
        let mut tree = WorkspaceTree::new();
        tree.add_file(&p("/p/a/x.txt"), 1);
        tree.add_file(&p("/p/ab"), 1);
        assert_eq!(tree.remove(&p("/p/a")), 2);
        assert!(tree.info(&p("/p/ab")).is_some());
        assert_eq!(tree.remove(&ResourcePath::root()), 0);
    }
}
