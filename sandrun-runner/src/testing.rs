//! In-memory repositories for tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sandrun_client::pod::{Pod, WatchEvent};
use sandrun_core::domain::request::ExecutionRequest;
use sandrun_core::domain::result::ExecutionResult;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::config::SandboxMode;
use crate::error::SandboxError;
use crate::manager::SandboxManager;
use crate::repository::{ArtifactStore, ClusterApi, PodEvents};

type Respond = dyn Fn(&ExecutionRequest) -> Result<ExecutionResult, SandboxError> + Send + Sync;

/// Sandbox answering every job with a canned response
pub struct FakeManager {
    respond: Box<Respond>,
    seen: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
}

impl FakeManager {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&ExecutionRequest) -> Result<ExecutionResult, SandboxError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            seen: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
        }
    }

    /// Run ids passed to `run_tests`, in call order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxManager for FakeManager {
    async fn run_tests(
        &self,
        request: &ExecutionRequest,
        _cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        self.seen.lock().unwrap().push(request.run_id.clone());
        (self.respond)(request)
    }

    async fn cleanup(&self, run_id: &str) -> Result<(), SandboxError> {
        self.cleaned.lock().unwrap().push(run_id.to_string());
        Ok(())
    }

    fn mode(&self) -> SandboxMode {
        SandboxMode::Local
    }
}

/// Object store keyed by `<key>` in a single bucket
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upload(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String> {
        self.insert(key, data);
        Ok(self.uri_for(key))
    }

    async fn download(&self, _bucket: Option<&str>, key: &str) -> Result<Vec<u8>> {
        self.get(key).ok_or_else(|| anyhow!("object not found: {}", key))
    }

    fn uri_for(&self, key: &str) -> String {
        format!("mem://sandrun/{}", key)
    }
}

/// Watch event for a pod named `p` in `phase`
pub fn pod_event(event_type: &str, phase: &str, reason: &str, exit_code: Option<i32>) -> WatchEvent {
    let mut status = json!({ "phase": phase, "reason": reason });
    if let Some(code) = exit_code {
        status["containerStatuses"] = json!([{
            "name": "playwright",
            "state": { "terminated": { "exitCode": code } }
        }]);
    }
    serde_json::from_value(json!({
        "type": event_type,
        "object": { "metadata": { "name": "p" }, "status": status }
    }))
    .unwrap()
}

struct ScriptedWatch {
    events: VecDeque<WatchEvent>,
    hang: bool,
}

#[async_trait]
impl PodEvents for ScriptedWatch {
    async fn next_event(&mut self) -> Result<Option<WatchEvent>> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.hang => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Control plane with scripted watch streams
///
/// Each `watch_pod` call consumes the next script. With no script left the
/// stream stays open without events.
#[derive(Default)]
pub struct FakeCluster {
    watches: Mutex<VecDeque<ScriptedWatch>>,
    watch_count: AtomicUsize,
    fail_watch: AtomicBool,
    fail_create: AtomicBool,
    hang_logs: AtomicBool,
    created: Mutex<Vec<Pod>>,
    deleted: Mutex<Vec<String>>,
    logs: Mutex<String>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream that ends after `events`
    pub fn script_watch(&self, events: Vec<WatchEvent>) {
        self.push_watch(events, false);
    }

    /// Stream that stays open after `events`
    pub fn script_hanging_watch(&self, events: Vec<WatchEvent>) {
        self.push_watch(events, true);
    }

    fn push_watch(&self, events: Vec<WatchEvent>, hang: bool) {
        self.watches.lock().unwrap().push_back(ScriptedWatch {
            events: events.into(),
            hang,
        });
    }

    pub fn fail_watches(&self) {
        self.fail_watch.store(true, Ordering::SeqCst);
    }

    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Log requests never answer
    pub fn hang_logs(&self) {
        self.hang_logs.store(true, Ordering::SeqCst);
    }

    pub fn set_logs(&self, logs: &str) {
        *self.logs.lock().unwrap() = logs.to_string();
    }

    pub fn watch_count(&self) -> usize {
        self.watch_count.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<Pod> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("admission webhook denied the request"));
        }
        self.created.lock().unwrap().push(pod.clone());
        Ok(())
    }

    async fn watch_pod(&self, _name: &str) -> Result<Box<dyn PodEvents>> {
        self.watch_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_watch.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let watch = self
            .watches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedWatch {
                events: VecDeque::new(),
                hang: true,
            });
        Ok(Box::new(watch))
    }

    async fn pod_logs(&self, _name: &str, _container: &str) -> Result<String> {
        if self.hang_logs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.logs.lock().unwrap().clone())
    }

    async fn delete_pod(&self, name: &str) -> Result<bool> {
        let existed = self
            .created
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.metadata.name == name);
        let mut deleted = self.deleted.lock().unwrap();
        let first = !deleted.iter().any(|d| d == name);
        deleted.push(name.to_string());
        Ok(existed && first)
    }
}
