//! Hand-written fakes for the collaborator traits
//!
//! All fakes are cheap to clone (shared state behind `Arc`) so a test can keep
//! one handle for assertions and pass another into the component under test.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use capacity_core::models::{Alert, Node};
use capacity_core::traits::{
    AlertSink, LoadSample, LoadSampler, NodeProbe, QueryExecutor, QueueLoad, TaskContext,
    TaskHandler, WorkerContext, WorkerRuntime,
};
use capacity_core::{CapacityError, CapacityResult};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

/// Task handler whose behaviour is driven by the payload
///
/// Recognised payload keys:
/// - `"fail": true` fails every attempt
/// - `"fail_times": n` fails the first `n` attempts
/// - `"panic": true` panics inside the handler
/// - `"sleep_ms": n` sleeps before finishing
#[derive(Debug, Clone)]
pub struct ScriptedTaskHandler {
    name: String,
    attempts: Arc<Mutex<Vec<(String, u32)>>>,
    succeeded: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTaskHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attempts: Arc::new(Mutex::new(Vec::new())),
            succeeded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(task_id, attempt)` for every invocation, in call order
    pub fn attempts(&self) -> Vec<(String, u32)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.succeeded.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedTaskHandler {
    async fn handle(&self, context: &TaskContext) -> CapacityResult<Value> {
        self.attempts
            .lock()
            .unwrap()
            .push((context.task_id.clone(), context.attempt));

        let payload = &context.payload;
        if let Some(ms) = payload.get("sleep_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if payload.get("panic").and_then(Value::as_bool) == Some(true) {
            panic!("scripted panic for task {}", context.task_id);
        }
        if payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(CapacityError::TaskExecution(format!(
                "scripted failure for task {}",
                context.task_id
            )));
        }
        if let Some(times) = payload.get("fail_times").and_then(Value::as_u64) {
            if u64::from(context.attempt) <= times {
                return Err(CapacityError::TaskExecution(format!(
                    "scripted failure {} of {times}",
                    context.attempt
                )));
            }
        }

        self.succeeded.lock().unwrap().push(context.task_id.clone());
        Ok(json!({ "task_id": context.task_id, "attempt": context.attempt }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Task handler that records payloads in the order they start and finish
///
/// When built with [`RecordingTaskHandler::gated`] every task waits for a
/// permit released through [`RecordingTaskHandler::release`], which lets a
/// test hold a task in flight while it enqueues more work.
#[derive(Debug, Clone)]
pub struct RecordingTaskHandler {
    name: String,
    started: Arc<Mutex<Vec<Value>>>,
    completed: Arc<Mutex<Vec<Value>>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

impl RecordingTaskHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            gate: None,
            delay: None,
        }
    }

    pub fn gated(name: &str) -> Self {
        let mut handler = Self::new(name);
        handler.gate = Some(Arc::new(Semaphore::new(0)));
        handler
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn started(&self) -> Vec<Value> {
        self.started.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<Value> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for RecordingTaskHandler {
    async fn handle(&self, context: &TaskContext) -> CapacityResult<Value> {
        self.started.lock().unwrap().push(context.payload.clone());

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| CapacityError::Internal(e.to_string()))?;
            permit.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.completed.lock().unwrap().push(context.payload.clone());
        Ok(context.payload.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Query executor that answers with the node id it ran on
#[derive(Debug, Clone, Default)]
pub struct MockQueryExecutor {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    failing_nodes: Arc<Mutex<HashSet<String>>>,
    delay: Option<Duration>,
}

impl MockQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_node(&self, node_id: &str) {
        self.failing_nodes.lock().unwrap().insert(node_id.to_string());
    }

    pub fn heal_node(&self, node_id: &str) {
        self.failing_nodes.lock().unwrap().remove(node_id);
    }

    /// `(node_id, query)` pairs in call order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for MockQueryExecutor {
    async fn execute(&self, node: &Node, query: &str, params: &[Value]) -> CapacityResult<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((node.id.clone(), query.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_nodes.lock().unwrap().contains(&node.id) {
            return Err(CapacityError::QueryExecution(format!(
                "node {} refused the query",
                node.id
            )));
        }
        Ok(json!({ "node": node.id, "rows": params.len() }))
    }
}

/// Alert sink that keeps every delivered alert
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn deliver(&self, alert: &Alert) -> CapacityResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CapacityError::Internal("alert sink unavailable".to_string()));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Load sampler returning whatever the test last set
#[derive(Debug, Clone)]
pub struct FixedLoadSampler {
    sample: Arc<Mutex<LoadSample>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FixedLoadSampler {
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            sample: Arc::new(Mutex::new(LoadSample::new(cpu_percent, memory_percent))),
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64) {
        *self.sample.lock().unwrap() = LoadSample::new(cpu_percent, memory_percent);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LoadSampler for FixedLoadSampler {
    fn sample(&self) -> CapacityResult<LoadSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CapacityError::Internal("load sampling failed".to_string()));
        }
        Ok(*self.sample.lock().unwrap())
    }
}

/// Node probe with per-node scripted answers
///
/// Nodes are healthy unless marked down; a hanging node never answers so the
/// caller's timeout is exercised.
#[derive(Debug, Clone, Default)]
pub struct ScriptedNodeProbe {
    down: Arc<Mutex<HashSet<String>>>,
    hanging: Arc<Mutex<HashSet<String>>>,
    probes: Arc<Mutex<HashMap<String, usize>>>,
}

impl ScriptedNodeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, node_id: &str, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(node_id.to_string());
        } else {
            set.remove(node_id);
        }
    }

    pub fn set_hanging(&self, node_id: &str, hanging: bool) {
        let mut set = self.hanging.lock().unwrap();
        if hanging {
            set.insert(node_id.to_string());
        } else {
            set.remove(node_id);
        }
    }

    pub fn probe_count(&self, node_id: &str) -> usize {
        self.probes
            .lock()
            .unwrap()
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl NodeProbe for ScriptedNodeProbe {
    async fn probe(&self, node: &Node) -> CapacityResult<()> {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(node.id.clone())
            .or_insert(0) += 1;

        let hanging = self.hanging.lock().unwrap().contains(&node.id);
        if hanging {
            std::future::pending::<()>().await;
        }
        if self.down.lock().unwrap().contains(&node.id) {
            return Err(CapacityError::Internal(format!("node {} is down", node.id)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Crash,
    Panic,
    Hang,
}

/// Worker runtime that idles until drained and can inject faults per worker
///
/// Each worker confirms startup, then beats on its heartbeat interval until it
/// is drained or a fault is injected through [`MockWorkerRuntime::crash`],
/// [`MockWorkerRuntime::panic`] or [`MockWorkerRuntime::hang`].
#[derive(Debug, Clone)]
pub struct MockWorkerRuntime {
    queues: Arc<Mutex<Vec<QueueLoad>>>,
    running: Arc<Mutex<HashMap<String, String>>>,
    started: Arc<AtomicUsize>,
    faults: Arc<Mutex<HashMap<String, Fault>>>,
    crash_on_start: Arc<AtomicBool>,
}

impl MockWorkerRuntime {
    pub fn new(queues: &[(&str, usize)]) -> Self {
        let queues = queues
            .iter()
            .map(|(name, weight)| QueueLoad {
                name: name.to_string(),
                weight: *weight,
                depth: 0,
            })
            .collect();
        Self {
            queues: Arc::new(Mutex::new(queues)),
            running: Arc::new(Mutex::new(HashMap::new())),
            started: Arc::new(AtomicUsize::new(0)),
            faults: Arc::new(Mutex::new(HashMap::new())),
            crash_on_start: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn single_queue() -> Self {
        Self::new(&[("default", 1)])
    }

    pub fn set_depth(&self, queue: &str, depth: usize) {
        if let Some(load) = self
            .queues
            .lock()
            .unwrap()
            .iter_mut()
            .find(|q| q.name == queue)
        {
            load.depth = depth;
        }
    }

    /// Every worker started from now on fails right after startup
    pub fn set_crash_on_start(&self, crash: bool) {
        self.crash_on_start.store(crash, Ordering::SeqCst);
    }

    pub fn crash(&self, worker_id: &str) {
        self.faults
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), Fault::Crash);
    }

    pub fn panic(&self, worker_id: &str) {
        self.faults
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), Fault::Panic);
    }

    /// Stops the worker's heartbeat without ending it
    pub fn hang(&self, worker_id: &str) {
        self.faults
            .lock()
            .unwrap()
            .insert(worker_id.to_string(), Fault::Hang);
    }

    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn running_on(&self, queue: &str) -> usize {
        self.running
            .lock()
            .unwrap()
            .values()
            .filter(|q| q.as_str() == queue)
            .count()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn fault(&self, worker_id: &str) -> Option<Fault> {
        self.faults.lock().unwrap().get(worker_id).copied()
    }
}

struct RunningGuard {
    running: Arc<Mutex<HashMap<String, String>>>,
    worker_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.worker_id);
        }
    }
}

#[async_trait]
impl WorkerRuntime for MockWorkerRuntime {
    fn queue_loads(&self) -> Vec<QueueLoad> {
        self.queues.lock().unwrap().clone()
    }

    async fn run_worker(&self, mut context: WorkerContext) -> CapacityResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.running
            .lock()
            .unwrap()
            .insert(context.worker_id.clone(), context.queue.clone());
        let _guard = RunningGuard {
            running: self.running.clone(),
            worker_id: context.worker_id.clone(),
        };

        context.mark_online();
        if self.crash_on_start.load(Ordering::SeqCst) {
            return Err(CapacityError::WorkerCrashed {
                worker_id: context.worker_id.clone(),
            });
        }

        let tick = context.heartbeat_interval.min(Duration::from_millis(10));
        loop {
            if context.is_draining() {
                return Ok(());
            }
            match self.fault(&context.worker_id) {
                Some(Fault::Crash) => {
                    return Err(CapacityError::WorkerCrashed {
                        worker_id: context.worker_id.clone(),
                    })
                }
                Some(Fault::Panic) => panic!("injected panic in {}", context.worker_id),
                Some(Fault::Hang) => {}
                None => context.beat(),
            }
            tokio::select! {
                _ = context.drained() => return Ok(()),
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }
}
