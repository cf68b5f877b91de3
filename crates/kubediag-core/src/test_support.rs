//! Shared fixtures for unit tests

#![allow(missing_docs)]

use crate::catalog::Catalog;
use crate::confirmation::ConfirmationManager;
use crate::environment::{Environment, EnvironmentSpec};
use crate::executor::{ExecutorConfig, PlanExecutor};
use crate::invoker::StepInvoker;
use crate::retry::RetryConfig;
use crate::safety::{SafetyGate, SafetyPolicy};
use async_trait::async_trait;
use kubediag_skills::SkillRegistry;
use kubediag_tools::{Tool, ToolContext, ToolRegistry, ToolRunner};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = Box<dyn Fn(u32, &Value) -> kubediag_tools::Result<Value> + Send + Sync>;

/// Tool binding driven by a closure of (call number, params)
pub struct ScriptedTool {
    handler: Handler,
    delay: Duration,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<Value>>,
}

impl ScriptedTool {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(u32, &Value) -> kubediag_tools::Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(output: impl Into<Value>) -> Arc<Self> {
        let output = output.into();
        Arc::new(Self::new(move |_, _| Ok(output.clone())))
    }

    pub fn failing(error: kubediag_tools::Error) -> Arc<Self> {
        Arc::new(Self::new(move |_, _| Err(error.clone())))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    async fn invoke(&self, params: Value, _ctx: &ToolContext) -> kubediag_tools::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(params.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(call, &params)
    }
}

/// Built-in catalog with the given bindings
pub fn catalog_with(bindings: &[(&str, Arc<ScriptedTool>)]) -> (Arc<Catalog>, ToolRunner) {
    let mut tools = ToolRegistry::with_builtins();
    for (name, tool) in bindings {
        let tool: Arc<dyn Tool> = Arc::clone(tool) as Arc<dyn Tool>;
        tools.bind(name, tool).unwrap();
    }
    let skills = SkillRegistry::builtin(&tools).unwrap();
    let tools = Arc::new(tools);
    let catalog = Arc::new(Catalog::new(Arc::clone(&tools), Arc::new(skills)));
    (catalog, ToolRunner::with_defaults(tools))
}

pub fn environment(patterns: &[&str]) -> Arc<Environment> {
    Arc::new(
        Environment::from_spec(EnvironmentSpec {
            id: "staging".to_string(),
            display_name: Some("Staging".to_string()),
            namespace_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            connection_ref: "ctx-staging".to_string(),
            description: None,
            default_namespace: Some("payments".to_string()),
        })
        .unwrap(),
    )
}

pub fn gate() -> Arc<SafetyGate> {
    Arc::new(SafetyGate::new(SafetyPolicy::default()).unwrap())
}

/// Retry policy with short delays
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(40))
        .with_jitter(false)
}

pub fn executor(
    runner: ToolRunner,
    confirmations: Arc<ConfirmationManager>,
    max_in_flight: usize,
) -> PlanExecutor {
    PlanExecutor::new(
        gate(),
        StepInvoker::new(runner),
        confirmations,
        ExecutorConfig {
            max_in_flight,
            retry: fast_retry(),
        },
    )
}

pub const DESCRIBE_OOM: &str = "Name: payments-7f9\n\
State: Waiting\n  Reason: CrashLoopBackOff\n\
Last State: Terminated\n  Reason: OOMKilled\n  Exit Code: 137\n\
Restart Count: 6";

pub const LOGS_OK: &str = "starting payments service on :8080\nloaded 12000 rates into cache";
