//! Injection script retry loop.
//!
//! Every `Page.loadEventFired` starts a chain that waits for the execution
//! context and then evaluates the injection script exactly once. A newer
//! load event supersedes older chains, the session token cancels them, and
//! a chain gives up after a bounded number of attempts.

use std::sync::Arc;
use std::time::Duration;

use render_settings::InjectionSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::state::SessionState;

/// How long and how often a chain waits for the execution context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed delay between attempts.
    pub interval: Duration,
    /// Attempts before giving up (at least 1).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&InjectionSettings::default())
    }
}

impl From<&InjectionSettings> for RetryPolicy {
    fn from(settings: &InjectionSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.retry_interval_ms),
            max_attempts: settings.max_attempts.max(1),
        }
    }
}

/// How one retry chain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The script ran.
    Injected {
        /// Attempt on which the context was ready.
        attempts: u32,
    },
    /// Evaluation was attempted and failed. Not retried.
    EvaluationFailed {
        /// Attempt on which evaluation ran.
        attempts: u32,
    },
    /// A newer load event took over.
    Superseded,
    /// The session token was cancelled.
    Cancelled,
    /// The context never became ready.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Starts injection retry chains for one session.
#[derive(Clone)]
pub struct Injector {
    task_name: Arc<str>,
    state: Arc<SessionState>,
    script: Arc<str>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Injector {
    /// Injector evaluating `script` once per load event.
    pub fn new(
        task_name: &str,
        state: Arc<SessionState>,
        script: impl Into<Arc<str>>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_name: Arc::from(task_name),
            state,
            script: script.into(),
            policy,
            cancel,
        }
    }

    /// Handle a load event: supersede running chains and start a new one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_load_event_fired(&self) -> JoinHandle<InjectionOutcome> {
        let generation = self.state.next_injection_generation();
        debug!(task = %self.task_name, generation, "page load event fired");
        let this = self.clone();
        tokio::spawn(async move { this.run_chain(generation).await })
    }

    async fn run_chain(self, generation: u64) -> InjectionOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return InjectionOutcome::Cancelled;
            }
            if self.state.injection_generation() != generation {
                debug!(task = %self.task_name, generation, "injection superseded by newer load event");
                return InjectionOutcome::Superseded;
            }

            if let (Some(context), Some(page)) = (self.state.execution_context(), self.state.page()) {
                return match page.evaluate(&context, &self.script).await {
                    Ok(value) => {
                        info!(task = %self.task_name, attempt, result = %value, "inject js codes done");
                        InjectionOutcome::Injected { attempts: attempt }
                    }
                    Err(e) => {
                        error!(task = %self.task_name, attempt, error = %e, "inject js codes failed");
                        InjectionOutcome::EvaluationFailed { attempts: attempt }
                    }
                };
            }

            if attempt == max_attempts {
                break;
            }
            warn!(
                task = %self.task_name,
                attempt,
                retry_ms = u64::try_from(self.policy.interval.as_millis()).unwrap_or(u64::MAX),
                "execution context not ready, retrying injection"
            );
            tokio::select! {
                () = tokio::time::sleep(self.policy.interval) => {}
                () = self.cancel.cancelled() => return InjectionOutcome::Cancelled,
            }
        }

        error!(task = %self.task_name, attempts = max_attempts, "execution context never became ready, giving up injection");
        InjectionOutcome::Exhausted {
            attempts: max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use render_logging::capture_logs;
    use tracing::Level;

    use super::*;
    use crate::testing::ScriptedPage;
    use crate::types::ExecutionContext;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::from_millis(100),
            max_attempts,
        }
    }

    fn setup(max_attempts: u32) -> (Injector, Arc<SessionState>, Arc<ScriptedPage>, CancellationToken) {
        let state = Arc::new(SessionState::new());
        let page = ScriptedPage::new();
        assert!(state.attach_page(page.clone()));
        let cancel = CancellationToken::new();
        let injector = Injector::new("abc", Arc::clone(&state), "(()=>{return 0})()", policy(max_attempts), cancel.clone());
        (injector, state, page, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_context_then_injects_once() {
        let (logs, _guard) = capture_logs();
        let (injector, state, page, _cancel) = setup(600);

        let chain = injector.on_load_event_fired();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(page.evaluations(), 0);
        assert!(logs.has_event(Level::WARN, "execution context not ready"));

        assert!(state.set_execution_context(ExecutionContext::new("frame-1")));
        let outcome = chain.await.unwrap();

        assert_matches!(outcome, InjectionOutcome::Injected { attempts } if attempts >= 3);
        assert_eq!(page.evaluations(), 1);
        assert!(logs.has_event(Level::INFO, "inject js codes done"));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_context_injects_on_first_attempt() {
        let (injector, state, page, _cancel) = setup(600);
        assert!(state.set_execution_context(ExecutionContext::new("frame-1")));

        let outcome = injector.on_load_event_fired().await.unwrap();

        assert_eq!(outcome, InjectionOutcome::Injected { attempts: 1 });
        assert_eq!(page.evaluated_scripts(), vec!["(()=>{return 0})()".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_failure_is_not_retried() {
        let (logs, _guard) = capture_logs();
        let (injector, state, page, _cancel) = setup(600);
        page.fail_evaluations(true);
        assert!(state.set_execution_context(ExecutionContext::new("frame-1")));

        let outcome = injector.on_load_event_fired().await.unwrap();

        assert_eq!(outcome, InjectionOutcome::EvaluationFailed { attempts: 1 });
        assert_eq!(page.evaluations(), 1);
        assert!(logs.has_event(Level::ERROR, "inject js codes failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_load_event_supersedes_older_chain() {
        let (injector, state, page, _cancel) = setup(600);

        let first = injector.on_load_event_fired();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let second = injector.on_load_event_fired();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(state.set_execution_context(ExecutionContext::new("frame-1")));

        assert_eq!(first.await.unwrap(), InjectionOutcome::Superseded);
        assert_matches!(second.await.unwrap(), InjectionOutcome::Injected { .. });
        assert_eq!(page.evaluations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_chain() {
        let (injector, _state, page, cancel) = setup(600);

        let chain = injector.on_load_event_fired();
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();

        assert_eq!(chain.await.unwrap(), InjectionOutcome::Cancelled);
        assert_eq!(page.evaluations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (logs, _guard) = capture_logs();
        let (injector, _state, page, _cancel) = setup(3);

        let outcome = injector.on_load_event_fired().await.unwrap();

        assert_eq!(outcome, InjectionOutcome::Exhausted { attempts: 3 });
        assert_eq!(page.evaluations(), 0);
        assert_eq!(logs.count_at_level(Level::WARN), 2);
        assert!(logs.has_event(Level::ERROR, "giving up injection"));
    }

    #[test]
    fn policy_from_settings() {
        let settings = InjectionSettings {
            retry_interval_ms: 250,
            max_attempts: 0,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default().interval, Duration::from_millis(100));
    }
}
