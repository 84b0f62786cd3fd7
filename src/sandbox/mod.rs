//! Ephemeral execution environments for generated code.
//!
//! This module provides the [`SandboxProvider`] and [`SandboxSession`] traits
//! and the [`DockerSandbox`] implementation. [`execute`] runs one complete
//! `start`/`run`/`stop` triple; sessions are never reused.

mod archive;
mod docker;
mod provider;

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{Error, Result};

pub use archive::pack_script;
pub use docker::{DockerSandbox, DockerSession};
pub use provider::{ExecutionOutput, SandboxProvider, SandboxSession, SandboxSpec, SessionState};

/// Outcome of one scoped sandbox cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    /// No session could be started; verification is unavailable.
    Unavailable(String),
    /// The code ran (or failed inside a live session).
    Executed(ExecutionOutput),
}

/// Starts a fresh session, runs `code` in it, and stops it on every exit path.
///
/// A failure or panic inside `run` is reported as an execution with exit
/// code -1 after the session has been stopped. If the returned future is
/// dropped mid-run, the session is stopped on a background task.
pub async fn execute<P: SandboxProvider>(provider: &P, code: &str) -> Provisioning {
    let session = match provider.start().await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "sandbox provisioning failed");
            return Provisioning::Unavailable(e.to_string());
        }
    };

    let mut guard = SessionGuard::new(session);
    let result = guard.run(code).await;
    guard.release().await;

    match result {
        Ok(output) => Provisioning::Executed(output),
        Err(e) => Provisioning::Executed(ExecutionOutput {
            exit_code: -1,
            output: format!("System Error: {}", e),
        }),
    }
}

/// Owns a started session and stops it exactly once.
///
/// [`SessionGuard::release`] is the normal path. Dropping an unreleased guard
/// hands the stop to the current runtime.
struct SessionGuard<S: SandboxSession + 'static> {
    session: Option<S>,
}

impl<S: SandboxSession + 'static> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn run(&mut self, code: &str) -> Result<ExecutionOutput> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::SandboxExecution("session already released".to_string()))?;

        let outcome = AssertUnwindSafe(session.run(code)).catch_unwind().await;
        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(session = %session.id(), panic = %message, "sandbox run panicked");
                Err(Error::SandboxExecution(format!("session panicked: {}", message)))
            }
        }
    }

    async fn release(mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let outcome = AssertUnwindSafe(session.stop()).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(session = %session.id(), error = %e, "failed to stop sandbox session")
            }
            Err(panic) => tracing::error!(
                session = %session.id(),
                panic = %panic_message(panic.as_ref()),
                "sandbox stop panicked"
            ),
        }
    }
}

impl<S: SandboxSession + 'static> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        tracing::warn!(session = %session.id(), "sandbox cycle abandoned, stopping in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.stop().await {
                        tracing::error!(
                            session = %session.id(),
                            error = %e,
                            "failed to stop abandoned session"
                        );
                    }
                });
            }
            Err(_) => tracing::error!(
                session = %session.id(),
                "no runtime available to stop abandoned session"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum RunBehavior {
        Echo,
        Fail,
        Panic,
        Hang,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        behavior: RunBehavior,
        state: SessionState,
    }

    #[async_trait]
    impl SandboxSession for FakeSession {
        fn id(&self) -> &str {
            "fake"
        }

        fn state(&self) -> SessionState {
            self.state
        }

        async fn run(&mut self, code: &str) -> Result<ExecutionOutput> {
            match self.behavior {
                RunBehavior::Echo => Ok(ExecutionOutput {
                    exit_code: 0,
                    output: code.to_string(),
                }),
                RunBehavior::Fail => Err(Error::SandboxExecution("copy failed".to_string())),
                RunBehavior::Panic => panic!("exec stream corrupted"),
                RunBehavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn stop(&mut self) -> Result<()> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            self.state = SessionState::Stopped;
            Ok(())
        }
    }

    struct FakeProvider {
        counters: Arc<Counters>,
        available: bool,
        behavior: RunBehavior,
        spec: SandboxSpec,
    }

    impl FakeProvider {
        fn new(available: bool, behavior: RunBehavior) -> Self {
            Self {
                counters: Arc::new(Counters::default()),
                available,
                behavior,
                spec: SandboxSpec::default(),
            }
        }
    }

    #[async_trait]
    impl SandboxProvider for FakeProvider {
        type Session = FakeSession;

        async fn start(&self) -> Result<FakeSession> {
            if !self.available {
                return Err(Error::SandboxUnavailable("no runtime".to_string()));
            }
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                counters: self.counters.clone(),
                behavior: self.behavior,
                state: SessionState::Ready,
            })
        }

        fn spec(&self) -> &SandboxSpec {
            &self.spec
        }
    }

    #[tokio::test]
    async fn successful_run_stops_session_once() {
        let provider = FakeProvider::new(true, RunBehavior::Echo);
        let outcome = execute(&provider, "print(1)").await;

        assert_eq!(
            outcome,
            Provisioning::Executed(ExecutionOutput {
                exit_code: 0,
                output: "print(1)".to_string()
            })
        );
        assert_eq!(provider.counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(provider.counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_run_still_stops_session() {
        let provider = FakeProvider::new(true, RunBehavior::Fail);
        let outcome = execute(&provider, "print(1)").await;

        match outcome {
            Provisioning::Executed(output) => {
                assert_eq!(output.exit_code, -1);
                assert!(output.output.starts_with("System Error:"));
            }
            other => panic!("expected execution, got {:?}", other),
        }
        assert_eq!(provider.counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_run_is_contained_and_stopped() {
        let provider = FakeProvider::new(true, RunBehavior::Panic);
        let counters = provider.counters.clone();

        let outcome = tokio::spawn(async move { execute(&provider, "print(1)").await })
            .await
            .expect("panic must not escape execute");

        match outcome {
            Provisioning::Executed(output) => {
                assert_eq!(output.exit_code, -1);
                assert!(output.output.starts_with("System Error:"));
                assert!(output.output.contains("exec stream corrupted"));
            }
            other => panic!("expected execution, got {:?}", other),
        }
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_run_is_stopped_in_background() {
        let provider = FakeProvider::new(true, RunBehavior::Hang);

        let timed_out = tokio::time::timeout(Duration::from_secs(5), execute(&provider, "x"))
            .await
            .is_err();
        assert!(timed_out);

        for _ in 0..10 {
            if provider.counters.stops.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(provider.counters.starts.load(Ordering::SeqCst), 1);
        assert_eq!(provider.counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provisioning_failure_is_unavailable() {
        let provider = FakeProvider::new(false, RunBehavior::Echo);
        let outcome = execute(&provider, "print(1)").await;

        assert!(matches!(outcome, Provisioning::Unavailable(_)));
        assert_eq!(provider.counters.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
