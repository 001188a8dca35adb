//! Tree construction: project a collection graph onto a path index.
//!
//! The build runs in three steps over a single graph traversal:
//!
//! 1. resolve: depth-first walk from the mount root, listing the children of
//!    each manifest digest exactly once
//! 2. inclusion: decide per digest whether the node appears in the mount
//! 3. layout: assign names and inodes, linking shared subgraphs at every
//!    path that reaches them
//!
//! The resulting [`TreeIndex`] is immutable and shared without locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::{Collection, Digest, Matcher, Node, RegistryClient};
use tracing::{debug, info, warn};

use super::error::TreeError;
use super::inode_table::InodeTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
}

/// A synthetic path bound to exactly one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub ino: u64,
    pub path: String,
    /// Last path segment, empty for the root
    pub name: String,
    pub kind: EntryKind,
    pub digest: Digest,
    /// Parent inode; the root is its own parent
    pub parent: u64,
    /// Child inodes in declared order
    pub children: Vec<u64>,
}

impl PathEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Read-only path index produced by [`TreeBuilder::build`]
#[derive(Debug)]
pub struct TreeIndex {
    reference: String,
    /// Entries indexed by `ino - 1`
    entries: Vec<PathEntry>,
    inodes: InodeTable,
    nodes: HashMap<Digest, Arc<Node>>,
}

impl TreeIndex {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn root(&self) -> &PathEntry {
        &self.entries[0]
    }

    pub fn entry(&self, ino: u64) -> Option<&PathEntry> {
        let index = usize::try_from(ino.checked_sub(1)?).ok()?;
        self.entries.get(index)
    }

    pub fn lookup(&self, path: &str) -> Option<&PathEntry> {
        self.entry(self.inodes.get_inode(path)?)
    }

    /// Find a named child of a directory
    pub fn child(&self, parent: u64, name: &str) -> Option<&PathEntry> {
        let parent = self.entry(parent)?;
        if !parent.is_dir() {
            return None;
        }
        self.lookup(&InodeTable::join(&parent.path, name))
    }

    /// Immediate children of a directory in order
    pub fn children(&self, ino: u64) -> impl Iterator<Item = &PathEntry> {
        self.entry(ino)
            .into_iter()
            .flat_map(move |e| e.children.iter().filter_map(move |&c| self.entry(c)))
    }

    /// Node store lookup by digest
    pub fn node(&self, digest: &Digest) -> Option<&Arc<Node>> {
        self.nodes.get(digest)
    }

    pub fn node_at(&self, path: &str) -> Option<&Arc<Node>> {
        self.node(&self.lookup(path)?.digest)
    }

    /// Number of path entries, including the root
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.inodes.paths()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PathEntry> {
        self.entries.iter()
    }
}

/// Resolved graph: node store plus child lists per manifest digest
#[derive(Default)]
struct Graph {
    nodes: HashMap<Digest, Arc<Node>>,
    children: HashMap<Digest, Vec<Arc<Node>>>,
}

struct Frame {
    digest: Digest,
    children: Vec<Arc<Node>>,
    next: usize,
}

/// Builds a [`TreeIndex`] from a resolved collection
pub struct TreeBuilder {
    client: Arc<dyn RegistryClient>,
    matcher: Option<Arc<dyn Matcher>>,
}

impl TreeBuilder {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client,
            matcher: None,
        }
    }

    pub fn with_matcher(mut self, matcher: Option<Arc<dyn Matcher>>) -> Self {
        self.matcher = matcher;
        self
    }

    pub async fn build(&self, collection: &Collection) -> Result<TreeIndex, TreeError> {
        let root = collection
            .mount_root()
            .ok_or_else(|| TreeError::EmptyCollection(collection.reference.clone()))?;

        let graph = self.resolve(collection, root.clone()).await?;

        let mut inclusion = HashMap::new();
        let index = self.layout(collection, &graph, &root, &mut inclusion);

        info!(
            reference = %collection.reference,
            nodes = graph.nodes.len(),
            entries = index.len(),
            "tree built"
        );
        Ok(index)
    }

    async fn list_children(
        &self,
        collection: &Collection,
        node: &Node,
    ) -> Result<Vec<Arc<Node>>, TreeError> {
        let children = if collection.is_synthetic_root(node) {
            collection.roots.clone()
        } else if node.is_manifest() {
            self.client
                .children(node)
                .await
                .map_err(TreeError::Traversal)?
        } else {
            Vec::new()
        };
        debug!(digest = %node.digest, children = children.len(), "listed children");
        Ok(children.into_iter().map(Arc::new).collect())
    }

    /// Depth-first walk listing each manifest's children once
    async fn resolve(&self, collection: &Collection, root: Node) -> Result<Graph, TreeError> {
        let mut graph = Graph::default();

        // A blob root is mounted as a directory holding that single file
        let root = Arc::new(root);
        let root_children = if root.is_manifest() {
            self.list_children(collection, &root).await?
        } else {
            vec![root.clone()]
        };

        graph.nodes.insert(root.digest.clone(), root.clone());
        graph
            .children
            .insert(root.digest.clone(), root_children.clone());

        let mut on_stack = HashSet::from([root.digest.clone()]);
        let mut stack = vec![Frame {
            digest: root.digest.clone(),
            children: root_children,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.children.get(frame.next).cloned() else {
                on_stack.remove(&frame.digest);
                stack.pop();
                continue;
            };
            frame.next += 1;

            if on_stack.contains(&child.digest) && child.is_manifest() {
                return Err(TreeError::Cycle(child.digest.clone()));
            }
            if graph.nodes.contains_key(&child.digest) {
                // Shared subgraph: already resolved through another parent
                continue;
            }

            graph.nodes.insert(child.digest.clone(), child.clone());
            if child.is_manifest() {
                let children = self.list_children(collection, &child).await?;
                graph.children.insert(child.digest.clone(), children.clone());
                on_stack.insert(child.digest.clone());
                stack.push(Frame {
                    digest: child.digest.clone(),
                    children,
                    next: 0,
                });
            }
        }

        Ok(graph)
    }

    /// Whether a digest appears in the mount.
    ///
    /// Blobs are included when accepted by the matcher. Manifests are
    /// included when at least one descendant blob is. Without a matcher
    /// everything is included.
    fn included(
        &self,
        graph: &Graph,
        digest: &Digest,
        memo: &mut HashMap<Digest, bool>,
    ) -> bool {
        let Some(matcher) = &self.matcher else {
            return true;
        };
        if let Some(&included) = memo.get(digest) {
            return included;
        }
        let Some(node) = graph.nodes.get(digest) else {
            return false;
        };

        let included = if node.is_manifest() {
            // Mark in progress so a malformed graph cannot recurse forever
            memo.insert(digest.clone(), false);
            graph
                .children
                .get(digest)
                .map(|children| {
                    children
                        .iter()
                        .any(|c| self.included(graph, &c.digest, memo))
                })
                .unwrap_or(false)
        } else {
            matcher.accepts(&node.attributes)
        };

        memo.insert(digest.clone(), included);
        included
    }

    fn layout(
        &self,
        collection: &Collection,
        graph: &Graph,
        root: &Node,
        memo: &mut HashMap<Digest, bool>,
    ) -> TreeIndex {
        let mut inodes = InodeTable::new();
        let mut entries = vec![PathEntry {
            ino: InodeTable::ROOT_INODE,
            path: "/".to_string(),
            name: String::new(),
            kind: EntryKind::Directory,
            digest: root.digest.clone(),
            parent: InodeTable::ROOT_INODE,
            children: Vec::new(),
        }];

        let mut pending = vec![(InodeTable::ROOT_INODE, root.digest.clone())];
        while let Some((dir_ino, dir_digest)) = pending.pop() {
            let Some(children) = graph.children.get(&dir_digest) else {
                continue;
            };
            let included: Vec<Arc<Node>> = children
                .iter()
                .filter(|c| self.included(graph, &c.digest, memo))
                .cloned()
                .collect();

            let dir_path = entries[(dir_ino - 1) as usize].path.clone();
            let mut child_inos = Vec::with_capacity(included.len());

            for (name, node) in assign_names(&included) {
                let path = InodeTable::join(&dir_path, &name);
                let ino = inodes.insert(&path);
                if ino as usize != entries.len() + 1 {
                    warn!(path = %path, "skipping duplicate path");
                    continue;
                }

                let kind = if node.is_manifest() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                entries.push(PathEntry {
                    ino,
                    path,
                    name,
                    kind,
                    digest: node.digest.clone(),
                    parent: dir_ino,
                    children: Vec::new(),
                });
                child_inos.push(ino);

                if kind == EntryKind::Directory {
                    pending.push((ino, node.digest.clone()));
                }
            }

            entries[(dir_ino - 1) as usize].children = child_inos;
        }

        TreeIndex {
            reference: collection.reference.clone(),
            entries,
            inodes,
            nodes: graph.nodes.clone(),
        }
    }
}

/// Replace characters that cannot appear in a path segment
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\0' { '_' } else { c })
        .collect()
}

/// Name derived from the node: its declared name, else its encoded digest
fn base_name(node: &Node) -> String {
    match node.name().map(sanitize) {
        Some(name) if !name.is_empty() && name != "." && name != ".." => name,
        _ => node.digest.encoded().to_string(),
    }
}

/// `report.txt` → `report-<short digest>.txt`
fn disambiguate(name: &str, digest: &Digest) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, digest.short(), ext),
        _ => format!("{}-{}", name, digest.short()),
    }
}

/// Assign unique sibling names.
///
/// The same digest listed twice under one name collapses to one entry.
/// When distinct digests share a name, every one of them gets a short digest
/// suffix, so the outcome does not depend on listing order. A suffixed name
/// that still collides falls back to the full encoded digest.
fn assign_names(children: &[Arc<Node>]) -> Vec<(String, Arc<Node>)> {
    let mut seen = HashSet::new();
    let candidates: Vec<(String, Arc<Node>)> = children
        .iter()
        .map(|c| (base_name(c), c.clone()))
        .filter(|(name, c)| seen.insert((name.clone(), c.digest.clone())))
        .collect();

    let mut digests_per_name: HashMap<&str, HashSet<&Digest>> = HashMap::new();
    for (name, node) in &candidates {
        digests_per_name
            .entry(name.as_str())
            .or_default()
            .insert(&node.digest);
    }

    let mut named: Vec<(String, Arc<Node>, bool)> = candidates
        .iter()
        .map(|(name, node)| {
            if digests_per_name[name.as_str()].len() > 1 {
                (disambiguate(name, &node.digest), node.clone(), true)
            } else {
                (name.clone(), node.clone(), false)
            }
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for (name, _, _) in &named {
        *counts.entry(name.clone()).or_default() += 1;
    }
    for (name, node, suffixed) in named.iter_mut() {
        if *suffixed && counts[name.as_str()] > 1 {
            let base = base_name(node);
            *name = match base.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => {
                    format!("{}-{}.{}", stem, node.digest.encoded(), ext)
                }
                _ => format!("{}-{}", base, node.digest.encoded()),
            };
        }
    }

    let mut taken = HashSet::new();
    named
        .into_iter()
        .filter_map(|(name, node, _)| {
            if taken.insert(name.clone()) {
                Some((name, node))
            } else {
                warn!(name = %name, digest = %node.digest, "dropping colliding entry");
                None
            }
        })
        .collect()
}
