//! JSON fixtures describing a dashboard, its canned leaf results and its inputs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dashdeps_core::{ArgTarget, DependencyError, LeafData, PropertyPath, ResourceKind, RuntimeDependency};
use dashdeps_execution::{
    DashboardTree, ExecutionInputs, InputDef, LeafExecutor, LeafRequest, NodeIndex, NodeSpec, ParamDef,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// A complete run description.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    /// Root of the dashboard tree
    pub dashboard: NodeFixture,

    /// Canned leaf results keyed by node name
    #[serde(default)]
    pub results: HashMap<String, LeafData>,

    /// Input values keyed by input short name
    #[serde(default)]
    pub inputs: HashMap<String, Value>,

    /// Param arguments keyed by node name, then param short name
    #[serde(default)]
    pub args: HashMap<String, HashMap<String, Value>>,
}

/// A dashboard node.
#[derive(Debug, Deserialize)]
pub struct NodeFixture {
    /// Unqualified name, e.g. `query.q1`
    pub name: String,
    /// Resource kind
    pub kind: ResourceKind,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub withs: Vec<WithFixture>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub params: Vec<ParamFixture>,
    #[serde(default)]
    pub depends_on: Vec<DependencyFixture>,
    #[serde(default)]
    pub children: Vec<NodeFixture>,
}

/// A with owned by a node.
#[derive(Debug, Deserialize)]
pub struct WithFixture {
    /// Short name
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub depends_on: Vec<DependencyFixture>,
}

/// A param owned by a node.
#[derive(Debug, Deserialize)]
pub struct ParamFixture {
    /// Short name
    pub name: String,
    #[serde(default)]
    pub default: Option<Value>,
}

/// A runtime dependency: `{"path": "with.w1.rows[0].a", "property": "title"}`
/// or `{"path": "input.i1", "arg": "region"}`.
#[derive(Debug, Deserialize)]
pub struct DependencyFixture {
    /// Property path of the source
    pub path: String,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub arg: Option<ArgTarget>,
}

impl DependencyFixture {
    fn to_dependency(&self) -> Result<RuntimeDependency> {
        let path = PropertyPath::parse(&self.path)?;
        match (&self.arg, &self.property) {
            (Some(arg), _) => Ok(RuntimeDependency::for_arg(path, arg.clone())),
            (None, Some(property)) => Ok(RuntimeDependency::new(path, property.clone())),
            (None, None) => bail!("dependency on '{}' names neither a property nor an arg", self.path),
        }
    }
}

impl Fixture {
    /// Parse a fixture from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid fixture")
    }

    /// Read and parse a fixture file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Build the execution tree.
    pub fn build_tree(&self) -> Result<DashboardTree> {
        let mut tree = DashboardTree::new(node_spec(&self.dashboard)?);
        let root = tree.root();
        attach(&mut tree, root, &self.dashboard)?;
        debug!("Built tree of {} node(s)", tree.len());
        Ok(tree)
    }

    /// Values supplied from outside the tree.
    pub fn execution_inputs(&self) -> ExecutionInputs {
        ExecutionInputs {
            inputs: self.inputs.clone(),
            args: self.args.clone(),
        }
    }

    /// Executor answering from `results`.
    pub fn executor(&self) -> FixtureExecutor {
        FixtureExecutor {
            results: self.results.clone(),
        }
    }
}

fn node_spec(node: &NodeFixture) -> Result<NodeSpec> {
    let mut spec = NodeSpec::new(&node.name, node.kind);
    spec.sql = node.sql.clone();
    for dependency in &node.depends_on {
        spec = spec.with_dependency(dependency.to_dependency()?);
    }
    Ok(spec)
}

/// Register `node`'s withs, inputs and params on `idx`, then add its children.
fn attach(tree: &mut DashboardTree, idx: NodeIndex, node: &NodeFixture) -> Result<()> {
    for input in &node.inputs {
        tree.add_input(idx, InputDef::new(input))?;
    }
    for param in &node.params {
        let mut def = ParamDef::new(&param.name);
        if let Some(default) = &param.default {
            def = def.with_default(default.clone());
        }
        tree.add_param(idx, def)?;
    }
    for with in &node.withs {
        let dependencies = with
            .depends_on
            .iter()
            .map(DependencyFixture::to_dependency)
            .collect::<Result<Vec<_>>>()?;
        tree.add_with(idx, &with.name, with.sql.clone(), dependencies)
            .with_context(|| format!("with '{}' on {}", with.name, node.name))?;
    }
    for child in &node.children {
        let child_idx = tree.add_node(idx, node_spec(child)?);
        attach(tree, child_idx, child)?;
    }
    Ok(())
}

/// Answers leaf requests from canned results.
#[derive(Debug, Clone)]
pub struct FixtureExecutor {
    results: HashMap<String, LeafData>,
}

#[async_trait]
impl LeafExecutor for FixtureExecutor {
    async fn execute(&self, request: &LeafRequest) -> Result<LeafData, DependencyError> {
        debug!("Fixture result for {} with {:?}", request.name, request.resolved);
        self.results
            .get(&request.name)
            .cloned()
            .ok_or_else(|| DependencyError::RunFailed(format!("no fixture result for {}", request.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashdeps_execution::{DashboardExecution, RunStatus};
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const FIXTURE: &str = r#"{
        "dashboard": {
            "name": "dashboard.d1",
            "kind": "dashboard",
            "inputs": ["region"],
            "withs": [
                {"name": "stuff1", "sql": "select 'x' as a, 2 as b"}
            ],
            "children": [
                {
                    "name": "container.c1",
                    "kind": "container",
                    "children": [
                        {
                            "name": "card.total",
                            "kind": "card",
                            "sql": "select count(*) from t where a = $1 and region = $2",
                            "params": [{"name": "limit", "default": 5}],
                            "depends_on": [
                                {"path": "with.stuff1.rows[0].a", "arg": 0},
                                {"path": "input.region", "arg": "region"}
                            ]
                        },
                        {
                            "name": "text.label",
                            "kind": "text",
                            "depends_on": [
                                {"path": "with.stuff1.rows[*].b", "property": "value"}
                            ]
                        }
                    ]
                }
            ]
        },
        "results": {
            "with.stuff1": {
                "columns": [{"name": "a", "data_type": "TEXT"}, {"name": "b", "data_type": "INT8"}],
                "rows": [{"a": "x", "b": 2}]
            },
            "card.total": {
                "columns": [{"name": "count", "data_type": "INT8"}],
                "rows": [{"count": 7}]
            }
        },
        "inputs": {"region": "us-east-1"}
    }"#;

    #[test]
    fn test_build_tree() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let tree = fixture.build_tree().unwrap();

        assert_eq!(tree.len(), 5);
        let with = tree.find("with.stuff1").unwrap();
        assert_eq!(tree.node(with).parent(), Some(tree.root()));
        let card = tree.find("card.total").unwrap();
        assert_eq!(tree.node(card).dependencies().len(), 2);
        assert_eq!(tree.node(card).publisher().unwrap().params().len(), 1);
    }

    #[test]
    fn test_dependency_needs_a_target() {
        let dependency = DependencyFixture {
            path: "input.region".to_string(),
            property: None,
            arg: None,
        };
        assert!(dependency.to_dependency().is_err());

        let dependency = DependencyFixture {
            path: "with.".to_string(),
            property: Some("title".to_string()),
            arg: None,
        };
        assert!(dependency.to_dependency().is_err());
    }

    #[test]
    fn test_with_on_container_is_rejected() {
        let text = r#"{
            "dashboard": {
                "name": "dashboard.d1",
                "kind": "dashboard",
                "children": [
                    {"name": "container.c1", "kind": "container", "withs": [{"name": "w", "sql": "select 1"}]}
                ]
            }
        }"#;
        let fixture = Fixture::from_json(text).unwrap();
        let err = fixture.build_tree().unwrap_err();
        assert!(format!("{err:#}").contains("container.c1"));
    }

    #[tokio::test]
    async fn test_run_fixture_end_to_end() {
        let fixture = Fixture::from_json(FIXTURE).unwrap();
        let execution = DashboardExecution::new(fixture.build_tree().unwrap(), Arc::new(fixture.executor()));
        let report = execution
            .run(fixture.execution_inputs(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed(), 0);
        let card = report.node("card.total").unwrap();
        assert_eq!(card.status, RunStatus::Complete);
        assert_eq!(card.dependency_values["args[0]"], json!("x"));
        assert_eq!(card.dependency_values["args.region"], json!("us-east-1"));
        assert_eq!(card.data.as_ref().unwrap().rows[0]["count"], json!(7));

        let label = report.node("text.label").unwrap();
        assert_eq!(label.dependency_values["value"], json!([2]));
        assert!(label.data.is_none());
    }

    #[tokio::test]
    async fn test_missing_result_fails_node() {
        let mut fixture = Fixture::from_json(FIXTURE).unwrap();
        fixture.results.remove("card.total");
        let execution = DashboardExecution::new(fixture.build_tree().unwrap(), Arc::new(fixture.executor()));
        let report = execution
            .run(fixture.execution_inputs(), CancellationToken::new())
            .await
            .unwrap();

        let card = report.node("card.total").unwrap();
        assert_eq!(card.status, RunStatus::Error);
        assert_eq!(card.error.as_deref(), Some("no fixture result for card.total"));
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FIXTURE.as_bytes()).unwrap();
        let fixture = Fixture::load(file.path()).unwrap();
        assert_eq!(fixture.dashboard.name, "dashboard.d1");

        let err = Fixture::load(Path::new("/nonexistent/fixture.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read fixture"));
    }
}
