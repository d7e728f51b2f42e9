//! Resolution of a node's runtime dependencies to delivery channels.

use crate::error::{ExecutionError, Result};
use crate::extract::extract_with_value;
use crate::publisher::{DeliveryReceiver, SubscribeOptions};
use crate::tree::{DashboardTree, NodeIndex};
use dashdeps_core::{
    DependencyError, ResolvedRuntimeDependencyValue, ResourceKind, RuntimeDependency,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A dependency bound to the publisher that will deliver its value.
#[derive(Debug)]
pub struct ResolvedRuntimeDependency {
    dependency: RuntimeDependency,
    publisher_name: String,
    receiver: Option<DeliveryReceiver>,
    value: Option<ResolvedRuntimeDependencyValue>,
}

impl ResolvedRuntimeDependency {
    /// Bind a dependency to a delivery channel.
    pub fn new(dependency: RuntimeDependency, receiver: DeliveryReceiver, publisher_name: impl Into<String>) -> Self {
        Self {
            dependency,
            publisher_name: publisher_name.into(),
            receiver: Some(receiver),
            value: None,
        }
    }

    /// The declared dependency.
    pub fn dependency(&self) -> &RuntimeDependency {
        &self.dependency
    }

    /// Name of the node whose publisher provides the value.
    pub fn publisher_name(&self) -> &str {
        &self.publisher_name
    }

    /// The delivered value, once `resolve` has returned.
    pub fn value(&self) -> Option<&ResolvedRuntimeDependencyValue> {
        self.value.as_ref()
    }

    /// Wait for the value.
    ///
    /// The channel is read at most once; later calls return the stored value.
    pub async fn resolve(&mut self, cancel: &CancellationToken) -> &ResolvedRuntimeDependencyValue {
        if let Some(receiver) = self.receiver.take() {
            let name = self.dependency.name();
            let received = tokio::select! {
                received = receiver => {
                    received.unwrap_or(Err(DependencyError::PublisherDropped(name)))
                }
                _ = cancel.cancelled() => Err(DependencyError::Cancelled(name)),
            };
            self.value = Some(received);
        }
        self.value
            .get_or_insert_with(|| Err(DependencyError::PublisherDropped(self.dependency.name())))
    }
}

/// All resolved dependencies of one consuming node.
#[derive(Debug, Default)]
pub struct ResolvedDependencies {
    owner: String,
    dependencies: BTreeMap<String, ResolvedRuntimeDependency>,
}

impl ResolvedDependencies {
    /// Name of the consuming node.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the node has no dependencies.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Look up by dependency name.
    pub fn get(&self, name: &str) -> Option<&ResolvedRuntimeDependency> {
        self.dependencies.get(name)
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedRuntimeDependency> {
        self.dependencies.values()
    }

    /// Every dependency feeding `parent_property`.
    pub fn find_dependencies_for_parent_property(
        &self,
        parent_property: &str,
    ) -> Vec<&ResolvedRuntimeDependency> {
        self.dependencies
            .values()
            .filter(|d| d.dependency.parent_property_name == parent_property)
            .collect()
    }

    /// The single dependency feeding `parent_property`, if any.
    ///
    /// # Panics
    ///
    /// Panics if more than one dependency targets the property: static
    /// validation must never let two values feed the same field.
    pub fn find_dependency_for_parent_property(
        &self,
        parent_property: &str,
    ) -> Option<&ResolvedRuntimeDependency> {
        let mut matches = self.find_dependencies_for_parent_property(parent_property);
        if matches.len() > 1 {
            panic!(
                "find_dependency_for_parent_property for {}, parent property {}, returned {} results",
                self.owner,
                parent_property,
                matches.len()
            );
        }
        matches.pop()
    }

    /// Abort if two dependencies would land in the same consumer slot.
    ///
    /// Plain properties take at most one dependency each; `args` may take
    /// several, but never two for the same argument.
    fn check_exclusive_targets(&self) {
        let properties: BTreeSet<&str> = self
            .dependencies
            .values()
            .filter(|d| d.dependency.arg.is_none())
            .map(|d| d.dependency.parent_property_name.as_str())
            .collect();
        for property in properties {
            self.find_dependency_for_parent_property(property);
        }

        let mut args = BTreeSet::new();
        for resolved in self.dependencies.values().filter(|d| d.dependency.arg.is_some()) {
            let target = resolved.dependency.target_name();
            if !args.insert(target.clone()) {
                panic!(
                    "runtime dependencies of {} feed argument {} more than once",
                    self.owner, target
                );
            }
        }
    }

    /// Wait for every dependency, stopping at the first error.
    pub async fn resolve_all(&mut self, cancel: &CancellationToken) -> std::result::Result<(), DependencyError> {
        for dependency in self.dependencies.values_mut() {
            if let Err(e) = dependency.resolve(cancel).await {
                return Err(e.clone());
            }
        }
        Ok(())
    }

    /// Resolved values as JSON, keyed by consumer slot (`title`, `args.ids`).
    ///
    /// Dependencies without a value yet are skipped.
    pub fn values_by_target(&self) -> BTreeMap<String, Value> {
        self.dependencies
            .values()
            .filter_map(|d| {
                let value = d.value.as_ref()?.as_ref().ok()?.to_json().ok()?;
                Some((d.dependency.target_name(), value))
            })
            .collect()
    }
}

/// Bind every dependency `consumer` declares to the nearest publisher providing it.
///
/// Must run during setup, before any producer can publish.
///
/// # Panics
///
/// Panics if a dependency is declared twice, or if two dependencies feed
/// the same consumer slot.
pub fn resolve_dependencies(tree: &DashboardTree, consumer: NodeIndex) -> Result<ResolvedDependencies> {
    let node = tree.node(consumer);
    let mut resolved = ResolvedDependencies {
        owner: node.name().to_string(),
        dependencies: BTreeMap::new(),
    };

    for dependency in node.dependencies() {
        if resolved.dependencies.contains_key(&dependency.name()) {
            panic!(
                "runtime dependency {} of {} is declared more than once",
                dependency,
                node.name()
            );
        }

        let mut found = None;
        tree.walk_up_publishers(consumer, |_, publisher| {
            if publisher.provides(dependency) {
                found = Some(publisher);
                return Ok::<_, ExecutionError>(false);
            }
            Ok(true)
        })?;

        // validation should make this impossible
        let Some(publisher) = found else {
            return Err(ExecutionError::UnresolvedDependency {
                consumer: node.name().to_string(),
                dependency: dependency.to_string(),
            });
        };

        let mut options = SubscribeOptions::new();
        if dependency.property_path.item_type == ResourceKind::With {
            options = with_value_options(dependency.clone(), options);
        }

        let receiver = publisher.subscribe(&dependency.source_resource_name(), options)?;
        debug!(
            "Resolved {} of {} to publisher {}",
            dependency,
            node.name(),
            publisher.name()
        );
        resolved.dependencies.insert(
            dependency.name(),
            ResolvedRuntimeDependency::new(dependency.clone(), receiver, publisher.name()),
        );
    }

    resolved.check_exclusive_targets();
    Ok(resolved)
}

/// Attach the projection a with reference asks for.
fn with_value_options(dependency: RuntimeDependency, options: SubscribeOptions) -> SubscribeOptions {
    options.with_transform(move |published| {
        let value = published.as_ref().map_err(Clone::clone)?;
        let Some(data) = value.as_table() else {
            return Ok(value.clone());
        };
        let name = dependency.target_name();
        extract_with_value(data, &dependency.property_path, &name).map_err(|e| {
            DependencyError::WithValue {
                name,
                path: dependency.property_path.original.clone(),
                source: Box::new(e),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{InputDef, ParamDef};
    use crate::tree::NodeSpec;
    use dashdeps_core::{ArgTarget, DependencyValue, LeafData, LeafDataColumn, PropertyPath};
    use serde_json::json;

    fn dep(raw: &str, property: &str) -> RuntimeDependency {
        RuntimeDependency::new(PropertyPath::parse(raw).unwrap(), property)
    }

    fn arg(raw: &str, name: &str) -> RuntimeDependency {
        RuntimeDependency::for_arg(PropertyPath::parse(raw).unwrap(), ArgTarget::Named(name.into()))
    }

    fn result() -> LeafData {
        LeafData::new(vec![
            LeafDataColumn::new("a", "INT8"),
            LeafDataColumn::new("b", "TEXT"),
        ])
        .with_row([("a", json!(1)), ("b", json!("x"))])
        .with_row([("a", json!(2)), ("b", json!("y"))])
    }

    #[tokio::test]
    async fn test_divergent_with_projections() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        let with = tree.add_with(root, "w1", "select a, b", vec![]).unwrap();
        let container = tree.add_node(root, NodeSpec::new("container.c1", ResourceKind::Container));
        let table = tree.add_node(
            container,
            NodeSpec::new("table.t1", ResourceKind::Table)
                .with_sql("select 1")
                .with_dependency(arg("with.w1.rows[*].a", "ids"))
                .with_dependency(arg("with.w1.rows[1].b", "name"))
                .with_dependency(dep("with.w1", "data")),
        );

        let mut resolved = resolve_dependencies(&tree, table).unwrap();
        assert_eq!(resolved.len(), 3);
        assert!(resolved.iter().all(|d| d.publisher_name() == "dashboard.d1"));

        let publisher = tree.node(root).publisher().unwrap();
        let run = tree.node(with).with_run().unwrap();
        publisher.set_with_value(run, Ok(result()));

        let cancel = CancellationToken::new();
        resolved.resolve_all(&cancel).await.unwrap();

        let values = resolved.values_by_target();
        assert_eq!(values["args.ids"], json!([1, 2]));
        assert_eq!(values["args.name"], json!("y"));
        assert_eq!(values["data"]["rows"][0]["a"], json!(1));

        let args = resolved.find_dependencies_for_parent_property("args");
        assert_eq!(args.len(), 2);
        let data = resolved.find_dependency_for_parent_property("data").unwrap();
        assert!(matches!(data.value(), Some(Ok(DependencyValue::Table(_)))));
    }

    #[tokio::test]
    async fn test_extraction_error_is_wrapped() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        let with = tree.add_with(root, "w1", "select a, b", vec![]).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card).with_dependency(dep("with.w1.rows[9].a", "title")),
        );
        let mut resolved = resolve_dependencies(&tree, card).unwrap();

        let publisher = tree.node(root).publisher().unwrap();
        publisher.set_with_value(tree.node(with).with_run().unwrap(), Ok(result()));

        let err = resolved.resolve_all(&CancellationToken::new()).await.unwrap_err();
        match err {
            DependencyError::WithValue { name, path, source } => {
                assert_eq!(name, "title");
                assert_eq!(path, "with.w1.rows[9].a");
                assert_eq!(
                    *source,
                    DependencyError::RowIndexOutOfRange {
                        name: "title".to_string(),
                        index: 9,
                        row_count: 2
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_error_passes_through_transform() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        let with = tree.add_with(root, "w1", "select a", vec![]).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card).with_dependency(dep("with.w1.rows[0].a", "title")),
        );
        let mut resolved = resolve_dependencies(&tree, card).unwrap();

        let failure = DependencyError::RunFailed("syntax error".to_string());
        tree.node(root)
            .publisher()
            .unwrap()
            .set_with_value(tree.node(with).with_run().unwrap(), Err(failure.clone()));

        assert_eq!(resolved.resolve_all(&CancellationToken::new()).await, Err(failure));
    }

    #[test]
    fn test_closest_publisher_wins() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_param(root, ParamDef::new("limit")).unwrap();
        let query = tree.add_node(root, NodeSpec::new("query.q1", ResourceKind::Query).with_sql("select $1"));
        tree.add_param(query, ParamDef::new("limit")).unwrap();
        let with = tree
            .add_with(query, "w1", "select $1", vec![arg("param.limit", "limit")])
            .unwrap();

        let resolved = resolve_dependencies(&tree, with).unwrap();
        assert_eq!(resolved.iter().next().unwrap().publisher_name(), "query.q1");
    }

    #[test]
    fn test_unresolved_dependency_is_fatal() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card).with_dependency(dep("input.missing", "title")),
        );
        let err = resolve_dependencies(&tree, card).unwrap_err();
        assert!(matches!(err, ExecutionError::UnresolvedDependency { .. }));
        assert!(err.to_string().contains("cannot resolve runtime dependency"));
    }

    #[tokio::test]
    async fn test_input_dependency() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("region")).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card).with_dependency(dep("self.input.region", "title")),
        );
        let mut resolved = resolve_dependencies(&tree, card).unwrap();

        tree.node(root).publisher().unwrap().set_input_value("region", json!("eu-west-1"));
        resolved.resolve_all(&CancellationToken::new()).await.unwrap();
        assert_eq!(resolved.values_by_target()["title"], json!("eu-west-1"));
    }

    #[tokio::test]
    async fn test_cancelled_resolution() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("region")).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card).with_dependency(dep("input.region", "title")),
        );
        let mut resolved = resolve_dependencies(&tree, card).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolved.resolve_all(&cancel).await.unwrap_err();
        assert!(matches!(err, DependencyError::Cancelled(_)));

        // the stored outcome is returned again without another read
        let dep = resolved.find_dependency_for_parent_property("title").unwrap();
        assert!(matches!(dep.value(), Some(Err(DependencyError::Cancelled(_)))));
    }

    #[tokio::test]
    async fn test_dropped_publisher() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("region")).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card).with_dependency(dep("input.region", "title")),
        );
        let mut resolved = resolve_dependencies(&tree, card).unwrap();
        drop(tree);

        let err = resolved.resolve_all(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, DependencyError::PublisherDropped(_)));
    }

    #[test]
    #[should_panic(expected = "returned 2 results")]
    fn test_two_dependencies_for_one_property_panics() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("a")).unwrap();
        tree.add_input(root, InputDef::new("b")).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card)
                .with_dependency(dep("input.a", "title"))
                .with_dependency(dep("input.b", "title")),
        );
        let _ = resolve_dependencies(&tree, card);
    }

    #[test]
    #[should_panic(expected = "feed argument args.ids more than once")]
    fn test_two_dependencies_for_one_argument_panic() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("a")).unwrap();
        tree.add_input(root, InputDef::new("b")).unwrap();
        let table = tree.add_node(
            root,
            NodeSpec::new("table.t1", ResourceKind::Table)
                .with_sql("select 1")
                .with_dependency(arg("input.a", "ids"))
                .with_dependency(arg("input.b", "ids")),
        );
        let _ = resolve_dependencies(&tree, table);
    }

    #[test]
    #[should_panic(expected = "is declared more than once")]
    fn test_repeated_declaration_panics() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("a")).unwrap();
        let card = tree.add_node(
            root,
            NodeSpec::new("card.c1", ResourceKind::Card)
                .with_dependency(dep("input.a", "title"))
                .with_dependency(dep("input.a", "title")),
        );
        let _ = resolve_dependencies(&tree, card);
    }

    #[test]
    fn test_distinct_arguments_share_args_property() {
        let mut tree = DashboardTree::new(NodeSpec::new("dashboard.d1", ResourceKind::Dashboard));
        let root = tree.root();
        tree.add_input(root, InputDef::new("a")).unwrap();
        tree.add_input(root, InputDef::new("b")).unwrap();
        let table = tree.add_node(
            root,
            NodeSpec::new("table.t1", ResourceKind::Table)
                .with_sql("select 1")
                .with_dependency(arg("input.a", "first"))
                .with_dependency(arg("input.b", "second")),
        );
        let resolved = resolve_dependencies(&tree, table).unwrap();
        assert_eq!(resolved.find_dependencies_for_parent_property("args").len(), 2);
    }
}
