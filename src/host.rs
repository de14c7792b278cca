//! In-process submission path: registered hooks see each graph before the
//! [`Submitter`] sends it to the execution server.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::error::{GraphlateError, Result};
use crate::graph::Graph;
use crate::install::{HookHandle, SubmissionHook, SubmissionHost};

/// Final step of a submission.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Send `payload` for execution and return the server's reply.
    async fn submit(&self, request_id: &str, payload: Graph) -> Result<Value>;
}

pub struct SubmissionPipeline {
    submitter: Arc<dyn Submitter>,
    hooks: RwLock<Vec<(HookHandle, Arc<dyn SubmissionHook>)>>,
    next_handle: AtomicU64,
    ready: AtomicBool,
}

impl SubmissionPipeline {
    pub fn new(submitter: Arc<dyn Submitter>) -> Self {
        Self {
            submitter,
            hooks: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            ready: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Submit under a fresh request id.
    pub async fn submit(&self, payload: Graph) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        self.submit_with_id(&request_id, payload).await
    }

    /// Run every hook in registration order, then hand off to the submitter.
    pub async fn submit_with_id(&self, request_id: &str, payload: Graph) -> Result<Value> {
        let hooks: Vec<Arc<dyn SubmissionHook>> = self
            .hooks
            .read()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        let mut payload = payload;
        for hook in hooks {
            payload = hook.before_submit(request_id, payload).await;
        }

        debug!(request_id, nodes = payload.len(), "submitting workflow");
        self.submitter.submit(request_id, payload).await
    }
}

impl SubmissionHost for SubmissionPipeline {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn register_hook(&self, hook: Arc<dyn SubmissionHook>) -> Result<HookHandle> {
        if !self.is_ready() {
            return Err(GraphlateError::Install("submission pipeline is not ready".to_string()));
        }
        let handle = HookHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((handle, hook));
        Ok(handle)
    }

    fn unregister_hook(&self, handle: HookHandle) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(registered, _)| *registered != handle);
        hooks.len() != before
    }
}

/// Posts workflows to a node-graph server's `/prompt` endpoint.
pub struct ComfyUiSubmitter {
    client: Client,
    endpoint: String,
    client_id: String,
}

impl ComfyUiSubmitter {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4().to_string(),
        })
    }

    fn prompt_url(&self) -> String {
        format!("{}/prompt", self.endpoint)
    }

    fn request_body(&self, payload: Graph) -> Value {
        json!({
            "prompt": payload.into_value(),
            "client_id": self.client_id,
        })
    }
}

#[async_trait]
impl Submitter for ComfyUiSubmitter {
    async fn submit(&self, request_id: &str, payload: Graph) -> Result<Value> {
        let response = self
            .client
            .post(self.prompt_url())
            .json(&self.request_body(payload))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GraphlateError::Submit(format!(
                "server rejected workflow ({}): {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let reply: Value = response.json().await?;
        let prompt_id = queued_prompt_id(&reply);
        info!(request_id, prompt_id, "workflow queued");
        Ok(reply)
    }
}

/// Id the server assigned to a queued workflow, `"?"` if the reply has none.
fn queued_prompt_id(reply: &Value) -> &str {
    reply.get("prompt_id").and_then(Value::as_str).unwrap_or("?")
}
