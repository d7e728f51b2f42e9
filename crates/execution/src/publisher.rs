//! Ownership and fan-out of producible values.
//!
//! Every tree node that can own with results, inputs or params carries a
//! [`Publisher`]. Consumers subscribe during setup and each receive a
//! one-shot channel; when the value is published it is sent to every
//! subscriber (through that subscriber's own transform) and the channels
//! are closed.

use crate::error::{ExecutionError, Result};
use crate::with_run::WithRun;
use dashdeps_core::{
    DependencyValue, ResolvedRuntimeDependencyValue, ResourceKind, RuntimeDependency,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Per-subscriber projection applied to a published value.
pub type Transform =
    Box<dyn Fn(&ResolvedRuntimeDependencyValue) -> ResolvedRuntimeDependencyValue + Send + Sync>;

/// Receiving end of a delivery channel.
pub type DeliveryReceiver = oneshot::Receiver<ResolvedRuntimeDependencyValue>;

/// Options for a single subscription.
#[derive(Default)]
pub struct SubscribeOptions {
    transform: Option<Transform>,
}

impl SubscribeOptions {
    /// Create default options (value delivered as published).
    pub fn new() -> Self {
        Self::default()
    }

    /// Project the published value before delivery.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&ResolvedRuntimeDependencyValue) -> ResolvedRuntimeDependencyValue
            + Send
            + Sync
            + 'static,
    {
        self.transform = Some(Box::new(transform));
        self
    }
}

struct SubscribeTarget {
    sender: oneshot::Sender<ResolvedRuntimeDependencyValue>,
    transform: Option<Transform>,
}

#[derive(Default)]
pub(crate) struct SubscriptionTable {
    targets: HashMap<String, Vec<SubscribeTarget>>,
    published: HashSet<String>,
}

/// A user supplied input owned by a publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDef {
    /// Short name (`region` for `input.region`)
    pub name: String,
}

impl InputDef {
    /// Create an input definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn resource_name(&self) -> String {
        format!("{}.{}", ResourceKind::Input, self.name)
    }
}

/// A declared parameter owned by a publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    /// Short name (`region` for `param.region`)
    pub short_name: String,

    /// Value used when no argument is supplied
    pub default: Option<Value>,
}

impl ParamDef {
    /// Create a param definition.
    pub fn new(short_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            default: None,
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn resource_name(&self) -> String {
        format!("{}.{}", ResourceKind::Param, self.short_name)
    }
}

/// Owner of a namespace of producible values and their subscriptions.
pub struct Publisher {
    name: String,
    pub(crate) with_runs: HashMap<String, Arc<WithRun>>,
    inputs: HashMap<String, InputDef>,
    params: Vec<ParamDef>,
    subscriptions: Mutex<SubscriptionTable>,
}

impl Publisher {
    /// Create a publisher for the named node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            with_runs: HashMap::new(),
            inputs: HashMap::new(),
            params: Vec::new(),
            subscriptions: Mutex::new(SubscriptionTable::default()),
        }
    }

    /// Name of the owning node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a with-run, keyed by its unqualified name.
    pub fn add_with_run(&mut self, run: Arc<WithRun>) {
        self.with_runs.insert(run.unqualified_name(), run);
    }

    /// Register an input.
    pub fn add_input(&mut self, input: InputDef) {
        self.inputs.insert(input.resource_name(), input);
    }

    /// Register a param.
    pub fn add_param(&mut self, param: ParamDef) {
        self.params.push(param);
    }

    /// Owned with-runs, keyed by unqualified name.
    pub fn with_runs(&self) -> &HashMap<String, Arc<WithRun>> {
        &self.with_runs
    }

    /// Owned params.
    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    /// Whether this publisher owns the value `dependency` addresses.
    pub fn provides(&self, dependency: &RuntimeDependency) -> bool {
        let resource_name = dependency.source_resource_name();
        match dependency.property_path.item_type {
            ResourceKind::With => self.with_runs.contains_key(&resource_name),
            ResourceKind::Input => self.inputs.contains_key(&resource_name),
            // params are declared locally, so compare short names
            ResourceKind::Param => self
                .params
                .iter()
                .any(|p| p.short_name == dependency.property_path.name),
            _ => false,
        }
    }

    /// Subscribe to the value published under `name`.
    ///
    /// Never blocks. Subscribing to a name that has already been published
    /// is rejected, since no further value would ever arrive.
    pub fn subscribe(&self, name: &str, options: SubscribeOptions) -> Result<DeliveryReceiver> {
        let mut table = self.lock_subscriptions();
        if table.published.contains(name) {
            warn!("Late subscription to {} on {}", name, self.name);
            return Err(ExecutionError::SubscribeAfterPublish {
                publisher: self.name.clone(),
                name: name.to_string(),
            });
        }

        // capacity one: publishing never waits on a slow or absent reader
        let (sender, receiver) = oneshot::channel();
        table.targets.entry(name.to_string()).or_default().push(SubscribeTarget {
            sender,
            transform: options.transform,
        });
        trace!("Subscribed to {} on {}", name, self.name);
        Ok(receiver)
    }

    /// Deliver `value` to every subscriber of `name` and close their channels.
    ///
    /// Publishing a name with no subscribers, or publishing twice, is a no-op.
    /// Returns the number of subscribers served.
    pub fn publish(&self, name: &str, value: ResolvedRuntimeDependencyValue) -> usize {
        let mut table = self.lock_subscriptions();
        self.publish_locked(&mut table, name, value)
    }

    pub(crate) fn publish_locked(
        &self,
        table: &mut SubscriptionTable,
        name: &str,
        value: ResolvedRuntimeDependencyValue,
    ) -> usize {
        table.published.insert(name.to_string());
        let Some(targets) = table.targets.remove(name) else {
            trace!("No subscribers for {} on {}", name, self.name);
            return 0;
        };

        let count = targets.len();
        for target in targets {
            let delivered = match &target.transform {
                Some(transform) => transform(&value),
                None => value.clone(),
            };
            // dropping the sender closes the channel
            if target.sender.send(delivered).is_err() {
                debug!("Subscriber to {} on {} went away before delivery", name, self.name);
            }
        }
        debug!("Published {} on {} to {} subscriber(s)", name, self.name, count);
        count
    }

    /// Publish the value of one owned input.
    ///
    /// Returns false if this publisher does not own `input.<name>`.
    pub fn set_input_value(&self, name: &str, value: Value) -> bool {
        let resource_name = format!("{}.{}", ResourceKind::Input, name);
        if !self.inputs.contains_key(&resource_name) {
            return false;
        }
        self.publish(&resource_name, Ok(DependencyValue::Json(value)));
        true
    }

    /// Publish every owned input present in `values` (keyed by short name).
    pub fn publish_input_values(&self, values: &HashMap<String, Value>) {
        for input in self.inputs.values() {
            if let Some(value) = values.get(&input.name) {
                self.publish(&input.resource_name(), Ok(DependencyValue::Json(value.clone())));
            } else {
                debug!("No value supplied for input {} on {}", input.name, self.name);
            }
        }
    }

    /// Publish every owned param: the supplied arg, else the default, else null.
    pub fn publish_param_values(&self, args: &HashMap<String, Value>) {
        for param in &self.params {
            let value = args
                .get(&param.short_name)
                .or(param.default.as_ref())
                .cloned()
                .unwrap_or(Value::Null);
            self.publish(&param.resource_name(), Ok(DependencyValue::Json(value)));
        }
    }

    pub(crate) fn lock_subscriptions(&self) -> MutexGuard<'_, SubscriptionTable> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("with_runs", &self.with_runs.keys().collect::<Vec<_>>())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("params", &self.params)
            .finish()
    }
}
