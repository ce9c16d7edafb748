//! TaskRunner — external collaborator invoked by `Intention::run` (spec §6).
//!
//! The actual Git/GitHub/GitLab/Meetup clients are out of scope (spec §1);
//! this module only defines the contract and, for tests, a deterministic
//! fake — grounded on the teacher's `kernel/test_dependencies.rs` pattern of
//! one `Mock*` per `Base*` infrastructure trait.

use async_trait::async_trait;

use crate::model::{IntentionKindId, Repo};

#[derive(Debug, Clone)]
pub struct RunnerInput {
    pub kind: IntentionKindId,
    pub repo: Repo,
    pub token_secret: Option<String>,
}

/// Return-code mapping per spec §4.1 `run`:
/// - `Completed` — caller archives with `OK`.
/// - `Suspended(minutes)` — caller stamps the token's `reset_at` and releases
///   the job (worker cleared) for later retry.
/// - `Failed` — caller archives with `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Suspended { minutes_until_reset: i64 },
    Failed { message: String },
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, input: RunnerInput) -> Result<RunOutcome, crate::error::SchedulerError>;
}

/// A deterministic in-memory runner for tests and examples. Each call pops
/// the next scripted outcome for the kind; kinds with no scripted outcomes
/// left default to `Completed`.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockTaskRunner {
        scripts: Mutex<HashMap<IntentionKindId, Vec<RunOutcome>>>,
        pub calls: Mutex<Vec<RunnerInput>>,
    }

    impl MockTaskRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script the outcomes returned for `kind`, in call order.
        pub fn script(&self, kind: IntentionKindId, outcomes: Vec<RunOutcome>) {
            self.scripts.lock().unwrap().insert(kind, outcomes);
        }
    }

    #[async_trait]
    impl TaskRunner for MockTaskRunner {
        async fn run(&self, input: RunnerInput) -> Result<RunOutcome, crate::error::SchedulerError> {
            self.calls.lock().unwrap().push(input.clone());
            let mut scripts = self.scripts.lock().unwrap();
            if let Some(queue) = scripts.get_mut(&input.kind) {
                if !queue.is_empty() {
                    return Ok(queue.remove(0));
                }
            }
            Ok(RunOutcome::Completed)
        }
    }
}
