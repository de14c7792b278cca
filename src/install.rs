//! Hooking the interceptor into a host's submission path.
//!
//! The host may not be ready when we start (its submission path is wired up
//! later), so installation polls readiness with a fixed delay and gives up
//! after a bounded number of retries. A host without the hook keeps working;
//! it just submits untranslated workflows.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::InstallConfig;
use crate::error::Result;
use crate::graph::Graph;
use crate::intercept::WorkflowAutoTranslateInterceptor;

/// Runtime on/off switch shared between the CLI/config and the hook.
#[derive(Debug, Clone, Default)]
pub struct FeatureFlag(Arc<AtomicBool>);

impl FeatureFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// Identifies one registered hook for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(pub u64);

/// Runs before a payload is submitted; whatever it returns is submitted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionHook: Send + Sync {
    async fn before_submit(&self, request_id: &str, payload: Graph) -> Graph;
}

/// Something that submits graphs and lets hooks see them first.
pub trait SubmissionHost: Send + Sync {
    /// Whether hooks can be registered yet.
    fn is_ready(&self) -> bool;
    fn register_hook(&self, hook: Arc<dyn SubmissionHook>) -> Result<HookHandle>;
    /// Returns `false` when `handle` was not registered.
    fn unregister_hook(&self, handle: HookHandle) -> bool;
}

/// The interceptor as a submission hook, gated by a [`FeatureFlag`].
pub struct AutoTranslateHook {
    interceptor: Arc<WorkflowAutoTranslateInterceptor>,
    flag: FeatureFlag,
}

impl AutoTranslateHook {
    pub fn new(interceptor: Arc<WorkflowAutoTranslateInterceptor>, flag: FeatureFlag) -> Self {
        Self { interceptor, flag }
    }
}

#[async_trait]
impl SubmissionHook for AutoTranslateHook {
    async fn before_submit(&self, request_id: &str, payload: Graph) -> Graph {
        if !self.flag.is_enabled() {
            return payload;
        }

        let original = payload.clone();
        let mut graph = payload;
        let intercepted = AssertUnwindSafe(self.interceptor.intercept_graph(&mut graph))
            .catch_unwind()
            .await;

        match intercepted {
            Ok(report) => {
                debug!(request_id, translated = report.translated, "submission intercepted");
                graph
            }
            Err(_) => {
                error!(request_id, "auto-translation panicked, submitting original workflow");
                original
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Installed,
    /// Retries exhausted; nothing happens until `reinstall`.
    Failed,
}

struct Installation {
    state: InstallState,
    handle: Option<HookHandle>,
}

/// Installs [`AutoTranslateHook`] into a host.
///
/// The state lock is only taken for short reads and writes. Concurrent
/// installs queue on `install_gate`, so a retrying install never blocks
/// [`state`](Self::state) or [`uninstall`](Self::uninstall).
pub struct InstallationManager {
    host: Arc<dyn SubmissionHost>,
    hook: Arc<dyn SubmissionHook>,
    max_retries: u32,
    retry_delay: Duration,
    installation: Mutex<Installation>,
    install_gate: tokio::sync::Mutex<()>,
}

impl InstallationManager {
    pub fn new(host: Arc<dyn SubmissionHost>, hook: Arc<dyn SubmissionHook>) -> Self {
        Self::from_config(&InstallConfig::default(), host, hook)
    }

    pub fn from_config(
        config: &InstallConfig,
        host: Arc<dyn SubmissionHost>,
        hook: Arc<dyn SubmissionHook>,
    ) -> Self {
        Self {
            host,
            hook,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            installation: Mutex::new(Installation {
                state: InstallState::NotInstalled,
                handle: None,
            }),
            install_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> InstallState {
        self.installation.lock().state
    }

    /// Register the hook once the host is ready.
    ///
    /// Installing twice is a no-op, and after a failure no attempt is made
    /// until [`reinstall`](Self::reinstall).
    pub async fn install(&self) -> InstallState {
        let _gate = self.install_gate.lock().await;
        let state = self.state();
        if state != InstallState::NotInstalled {
            return state;
        }

        let mut attempt: u32 = 0;
        loop {
            if self.host.is_ready() {
                match self.host.register_hook(Arc::clone(&self.hook)) {
                    Ok(handle) => {
                        info!(attempt, "auto-translate hook installed");
                        let mut installation = self.installation.lock();
                        installation.handle = Some(handle);
                        installation.state = InstallState::Installed;
                        return InstallState::Installed;
                    }
                    Err(e) => warn!(attempt, error = %e, "hook registration failed"),
                }
            }

            if attempt >= self.max_retries {
                error!(
                    attempts = attempt + 1,
                    "submission host never became ready, auto-translate stays inactive"
                );
                self.installation.lock().state = InstallState::Failed;
                return InstallState::Failed;
            }
            attempt += 1;
            debug!(
                attempt,
                delay_ms = self.retry_delay.as_millis() as u64,
                "submission host not ready, retrying"
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Remove the hook and forget any previous failure.
    pub fn uninstall(&self) -> bool {
        let mut installation = self.installation.lock();
        let removed = match installation.handle.take() {
            Some(handle) => self.host.unregister_hook(handle),
            None => false,
        };
        installation.state = InstallState::NotInstalled;
        if removed {
            info!("auto-translate hook removed");
        }
        removed
    }

    pub async fn reinstall(&self) -> InstallState {
        self.uninstall();
        self.install().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{LanguageClassifier, MockLanguageDetector};
    use crate::translate::{MockTranslationClient, TranslationCache, TranslationService};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Host that becomes ready after `ready_after` readiness checks.
    struct FakeHost {
        ready_after: usize,
        checks: AtomicUsize,
        hooks: Mutex<Vec<HookHandle>>,
        registrations: AtomicUsize,
    }

    impl FakeHost {
        fn ready_after(ready_after: usize) -> Arc<Self> {
            Arc::new(Self {
                ready_after,
                checks: AtomicUsize::new(0),
                hooks: Mutex::new(Vec::new()),
                registrations: AtomicUsize::new(0),
            })
        }
    }

    impl SubmissionHost for FakeHost {
        fn is_ready(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) >= self.ready_after
        }

        fn register_hook(&self, _hook: Arc<dyn SubmissionHook>) -> Result<HookHandle> {
            let id = self.registrations.fetch_add(1, Ordering::SeqCst) as u64;
            self.hooks.lock().push(HookHandle(id));
            Ok(HookHandle(id))
        }

        fn unregister_hook(&self, handle: HookHandle) -> bool {
            let mut hooks = self.hooks.lock();
            let before = hooks.len();
            hooks.retain(|registered| *registered != handle);
            hooks.len() != before
        }
    }

    fn passthrough_hook() -> Arc<dyn SubmissionHook> {
        let mut hook = MockSubmissionHook::new();
        hook.expect_before_submit().returning(|_, payload| payload);
        Arc::new(hook)
    }

    fn manager(host: Arc<FakeHost>, max_retries: u32) -> InstallationManager {
        let config = InstallConfig {
            max_retries,
            retry_delay_ms: 100,
        };
        InstallationManager::from_config(&config, host, passthrough_hook())
    }

    #[tokio::test(start_paused = true)]
    async fn test_installs_when_ready() {
        let host = FakeHost::ready_after(0);
        let manager = manager(host.clone(), 3);

        assert_eq!(manager.install().await, InstallState::Installed);
        assert_eq!(manager.install().await, InstallState::Installed);
        assert_eq!(host.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(host.hooks.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_host() {
        let host = FakeHost::ready_after(2);
        let manager = manager(host.clone(), 3);

        assert_eq!(manager.install().await, InstallState::Installed);
        assert_eq!(host.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retries() {
        let host = FakeHost::ready_after(usize::MAX);
        let manager = manager(host.clone(), 3);

        assert_eq!(manager.install().await, InstallState::Failed);
        assert_eq!(host.checks.load(Ordering::SeqCst), 4);

        assert_eq!(manager.install().await, InstallState::Failed);
        assert_eq!(host.checks.load(Ordering::SeqCst), 4);
        assert_eq!(host.registrations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_and_reinstall() {
        let host = FakeHost::ready_after(0);
        let manager = manager(host.clone(), 3);

        manager.install().await;
        assert!(manager.uninstall());
        assert_eq!(manager.state(), InstallState::NotInstalled);
        assert!(host.hooks.lock().is_empty());
        assert!(!manager.uninstall());

        assert_eq!(manager.reinstall().await, InstallState::Installed);
        assert_eq!(host.registrations.load(Ordering::SeqCst), 2);
        assert_eq!(host.hooks.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinstall_retries_after_failure() {
        let host = FakeHost::ready_after(5);
        let manager = manager(host.clone(), 2);

        assert_eq!(manager.install().await, InstallState::Failed);
        assert_eq!(manager.reinstall().await, InstallState::Installed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_and_uninstall_answer_during_retries() {
        let host = FakeHost::ready_after(usize::MAX);
        let manager = Arc::new(manager(host.clone(), 3));

        let pending = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.install().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(host.checks.load(Ordering::SeqCst), 1);

        assert_eq!(manager.state(), InstallState::NotInstalled);
        assert!(!manager.uninstall());
        assert_eq!(host.checks.load(Ordering::SeqCst), 1);

        assert_eq!(pending.await.unwrap(), InstallState::Failed);
        assert_eq!(manager.state(), InstallState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_installs_register_once() {
        let host = FakeHost::ready_after(1);
        let manager = Arc::new(manager(host.clone(), 3));

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.install().await }
        });
        let second = manager.install().await;

        assert_eq!(first.await.unwrap(), InstallState::Installed);
        assert_eq!(second, InstallState::Installed);
        assert_eq!(host.registrations.load(Ordering::SeqCst), 1);
    }

    fn hook_with(
        client: MockTranslationClient,
        detector: MockLanguageDetector,
        flag: FeatureFlag,
    ) -> AutoTranslateHook {
        let classifier = Arc::new(LanguageClassifier::new(Arc::new(detector), "en"));
        let service = Arc::new(TranslationService::new(
            Arc::new(client),
            classifier,
            Arc::new(TranslationCache::new()),
        ));
        AutoTranslateHook::new(Arc::new(WorkflowAutoTranslateInterceptor::new(service)), flag)
    }

    fn quiet_detector() -> MockLanguageDetector {
        let mut detector = MockLanguageDetector::new();
        detector.expect_detect().returning(|_| Ok(None));
        detector
    }

    fn prompt(text: &str) -> Graph {
        Graph::from_value(json!({
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": text}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_flag_off_passes_payload_through() {
        let mut client = MockTranslationClient::new();
        client.expect_translate().times(0);
        client.expect_name().return_const("mock");
        let flag = FeatureFlag::new(false);
        let hook = hook_with(client, quiet_detector(), flag.clone());

        let forwarded = hook.before_submit("req-1", prompt("你好世界")).await;
        assert_eq!(forwarded, prompt("你好世界"));
    }

    #[tokio::test]
    async fn test_flag_on_translates() {
        let mut client = MockTranslationClient::new();
        client
            .expect_translate()
            .times(1)
            .returning(|_, _, _, _| Ok("Hello World".to_string()));
        client.expect_name().return_const("mock");
        let flag = FeatureFlag::new(false);
        let hook = hook_with(client, quiet_detector(), flag.clone());

        flag.set(true);
        let forwarded = hook.before_submit("req-2", prompt("你好世界")).await;
        assert_eq!(forwarded, prompt("Hello World"));
    }

    #[tokio::test]
    async fn test_panic_forwards_original_payload() {
        let mut client = MockTranslationClient::new();
        client.expect_translate().times(0);
        client.expect_name().return_const("mock");
        let mut detector = MockLanguageDetector::new();
        detector.expect_detect().returning(|_| panic!("detector crashed"));
        let hook = hook_with(client, detector, FeatureFlag::new(true));

        let payload = prompt("un chat noir sur un toit");
        let forwarded = hook.before_submit("req-3", payload.clone()).await;
        assert_eq!(forwarded, payload);
    }
}
