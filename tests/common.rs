//! Shared test utilities: a configurable mock module with call recording,
//! plus event collection helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use modkit::event::{handler, Event, EventBus, EventHandler};
use modkit::{DependencySpec, Module, ModuleContext, ModuleDescriptor, ModuleError, ServiceValue};

/// Shared hook-invocation log; entries look like `"reporter:initialize"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// API surface a test module publishes into the registry.
#[derive(Debug)]
pub struct TestApi {
    pub module: String,
    pub version: String,
}

/// Configurable mock module.
pub struct TestModule {
    descriptor: ModuleDescriptor,
    calls: CallLog,
    fail_on: Option<&'static str>,
    publish_api: bool,
    init_delay: Option<Duration>,
    state: Mutex<Value>,
    snapshots: bool,
    captured: Mutex<HashMap<String, ServiceValue>>,
    handlers: Vec<(String, EventHandler)>,
}

impl TestModule {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(name, version),
            calls: call_log(),
            fail_on: None,
            publish_api: false,
            init_delay: None,
            state: Mutex::new(Value::Null),
            snapshots: false,
            captured: Mutex::new(HashMap::new()),
            handlers: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dep: DependencySpec) -> Self {
        self.descriptor = self.descriptor.with_dependency(dep);
        self
    }

    /// Make the named hook fail every time it runs.
    pub fn failing(mut self, hook: &'static str) -> Self {
        self.fail_on = Some(hook);
        self
    }

    /// Publish a [`TestApi`] into the registry on initialize.
    pub fn with_api(mut self) -> Self {
        self.publish_api = true;
        self
    }

    /// Delay `initialize` to widen concurrency windows.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    /// Enable snapshot/restore with an initial state.
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Mutex::new(state);
        self.snapshots = true;
        self
    }

    /// Share a call log with other modules for cross-module ordering checks.
    pub fn with_calls(mut self, calls: CallLog) -> Self {
        self.calls = calls;
        self
    }

    /// Declare an event subscription for the loader to install.
    pub fn with_handler(mut self, topic: &str, event_handler: EventHandler) -> Self {
        self.handlers.push((topic.to_string(), event_handler));
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Dependency value captured at initialize, if any.
    pub fn captured(&self, name: &str) -> Option<ServiceValue> {
        self.captured.lock().unwrap().get(name).cloned()
    }

    pub fn current_state(&self) -> Value {
        self.state.lock().unwrap().clone()
    }

    pub fn set_state(&self, state: Value) {
        *self.state.lock().unwrap() = state;
    }

    fn record(&self, hook: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.descriptor.name, hook));
    }

    fn maybe_fail(&self, hook: &'static str) -> Result<(), ModuleError> {
        if self.fail_on == Some(hook) {
            return Err(ModuleError::OperationError(format!(
                "{hook} failed by test configuration"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Module for TestModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    async fn initialize(&self, context: &ModuleContext) -> Result<(), ModuleError> {
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("initialize");
        for dep in &self.descriptor.dependencies {
            if let Some(value) = context.dependency(&dep.name) {
                self.captured.lock().unwrap().insert(dep.name.clone(), value);
            }
        }
        self.maybe_fail("initialize")
    }

    async fn activate(&self) -> Result<(), ModuleError> {
        self.record("activate");
        self.maybe_fail("activate")
    }

    async fn deactivate(&self) -> Result<(), ModuleError> {
        self.record("deactivate");
        self.maybe_fail("deactivate")
    }

    async fn dispose(&self) -> Result<(), ModuleError> {
        self.record("dispose");
        self.maybe_fail("dispose")
    }

    fn api(&self) -> Option<ServiceValue> {
        if self.publish_api {
            Some(Arc::new(TestApi {
                module: self.descriptor.name.clone(),
                version: self.descriptor.version.clone(),
            }))
        } else {
            None
        }
    }

    fn event_handlers(&self) -> Vec<(String, EventHandler)> {
        self.handlers
            .iter()
            .map(|(topic, h)| (topic.clone(), Arc::clone(h)))
            .collect()
    }

    async fn snapshot(&self) -> Option<Value> {
        if self.snapshots {
            self.record("snapshot");
            Some(self.current_state())
        } else {
            None
        }
    }

    async fn restore(&self, state: Value) -> Result<(), ModuleError> {
        self.record("restore");
        self.set_state(state);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ModuleError> {
        self.maybe_fail("health_check")
    }
}

/// Collect every event published on a topic.
pub fn collect_events(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe(
        topic,
        handler(move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(event);
            }
        }),
    );
    events
}
