//! Arena-backed dashboard execution tree.

use crate::error::{ExecutionError, Result};
use crate::publisher::{InputDef, ParamDef, Publisher};
use crate::with_run::WithRun;
use dashdeps_core::{ResourceKind, RuntimeDependency};
use std::sync::Arc;

/// Position of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Raw arena index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Description of a node to add.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Unqualified name, e.g. `query.q1`
    pub name: String,

    /// Resource kind
    pub kind: ResourceKind,

    /// SQL to run, for executable leaves
    pub sql: Option<String>,

    /// Values this node needs from elsewhere in the tree
    pub dependencies: Vec<RuntimeDependency>,
}

impl NodeSpec {
    /// Create a spec with no SQL and no dependencies.
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            sql: None,
            dependencies: Vec::new(),
        }
    }

    /// Set the SQL.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, dependency: RuntimeDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// A node in the tree.
#[derive(Debug)]
pub struct TreeNode {
    name: String,
    kind: ResourceKind,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
    publisher: Option<Publisher>,
    dependencies: Vec<RuntimeDependency>,
    sql: Option<String>,
    with_run: Option<Arc<WithRun>>,
}

impl TreeNode {
    fn new(spec: NodeSpec, parent: Option<NodeIndex>) -> Self {
        let publisher = if spec.kind.is_container() || spec.kind == ResourceKind::With {
            None
        } else {
            Some(Publisher::new(spec.name.clone()))
        };
        Self {
            name: spec.name,
            kind: spec.kind,
            parent,
            children: Vec::new(),
            publisher,
            dependencies: spec.dependencies,
            sql: spec.sql,
            with_run: None,
        }
    }

    /// Unqualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Parent node, `None` at the root.
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    /// Child nodes in insertion order.
    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    /// The publisher this node owns, if it can own producible values.
    pub fn publisher(&self) -> Option<&Publisher> {
        self.publisher.as_ref()
    }

    /// Declared runtime dependencies.
    pub fn dependencies(&self) -> &[RuntimeDependency] {
        &self.dependencies
    }

    /// SQL for executable leaves.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// The with-run handle, for with nodes.
    pub fn with_run(&self) -> Option<&Arc<WithRun>> {
        self.with_run.as_ref()
    }
}

/// A dashboard tree. Nodes refer to their parent by index.
#[derive(Debug)]
pub struct DashboardTree {
    nodes: Vec<TreeNode>,
}

impl DashboardTree {
    /// Create a tree with the given root.
    pub fn new(root: NodeSpec) -> Self {
        Self {
            nodes: vec![TreeNode::new(root, None)],
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeIndex {
        NodeIndex(0)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty (never true; the root always exists).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Access a node.
    pub fn node(&self, idx: NodeIndex) -> &TreeNode {
        &self.nodes[idx.0]
    }

    /// All nodes with their indices, root first.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeIndex(i), n))
    }

    /// Find a node by name.
    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.nodes().find(|(_, n)| n.name == name).map(|(i, _)| i)
    }

    /// Add a child node.
    pub fn add_node(&mut self, parent: NodeIndex, spec: NodeSpec) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        self.nodes.push(TreeNode::new(spec, Some(parent)));
        self.nodes[parent.0].children.push(idx);
        idx
    }

    /// Add a with-run owned by `owner`.
    pub fn add_with(
        &mut self,
        owner: NodeIndex,
        name: &str,
        sql: impl Into<String>,
        dependencies: Vec<RuntimeDependency>,
    ) -> Result<NodeIndex> {
        let run = Arc::new(WithRun::new(name));
        self.publisher_mut(owner)?.add_with_run(Arc::clone(&run));

        let spec = NodeSpec {
            name: run.unqualified_name(),
            kind: ResourceKind::With,
            sql: Some(sql.into()),
            dependencies,
        };
        let idx = self.add_node(owner, spec);
        self.nodes[idx.0].with_run = Some(run);
        Ok(idx)
    }

    /// Add an input owned by `owner`.
    pub fn add_input(&mut self, owner: NodeIndex, input: InputDef) -> Result<()> {
        self.publisher_mut(owner)?.add_input(input);
        Ok(())
    }

    /// Add a param owned by `owner`.
    pub fn add_param(&mut self, owner: NodeIndex, param: ParamDef) -> Result<()> {
        self.publisher_mut(owner)?.add_param(param);
        Ok(())
    }

    /// Every publisher in the tree.
    pub fn publishers(&self) -> impl Iterator<Item = &Publisher> {
        self.nodes.iter().filter_map(|n| n.publisher.as_ref())
    }

    /// Nearest publisher strictly above `idx`, skipping nodes that own none.
    pub fn parent_publisher(&self, idx: NodeIndex) -> Option<(NodeIndex, &Publisher)> {
        let mut current = self.node(idx).parent;
        while let Some(parent) = current {
            let node = self.node(parent);
            if let Some(publisher) = node.publisher.as_ref() {
                return Some((parent, publisher));
            }
            current = node.parent;
        }
        None
    }

    /// Visit publishers from `start` upwards.
    ///
    /// Starts with `start`'s own publisher (or the nearest one above it).
    /// Stops when `visit` returns `Ok(false)`, returns an error, or the
    /// root is passed.
    pub fn walk_up_publishers<'a, E, F>(
        &'a self,
        start: NodeIndex,
        mut visit: F,
    ) -> std::result::Result<(), E>
    where
        F: FnMut(NodeIndex, &'a Publisher) -> std::result::Result<bool, E>,
    {
        let mut current = match self.node(start).publisher.as_ref() {
            Some(publisher) => Some((start, publisher)),
            None => self.parent_publisher(start),
        };
        while let Some((idx, publisher)) = current {
            if !visit(idx, publisher)? {
                break;
            }
            current = self.parent_publisher(idx);
        }
        Ok(())
    }

    fn publisher_mut(&mut self, owner: NodeIndex) -> Result<&mut Publisher> {
        let node = &mut self.nodes[owner.0];
        match node.publisher.as_mut() {
            Some(publisher) => Ok(publisher),
            None => Err(ExecutionError::NotAPublisher(node.name.clone())),
        }
    }
}
