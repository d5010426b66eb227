/*!
 * Scriptable mock model for tests.
 *
 * The mock replays a queue of prepared outcomes and records every request,
 * so tests can assert on call counts, request shapes, and retry behaviour
 * without touching the network.
 */

use std::sync::Mutex;
use std::time::Instant;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, ErrorKind};

use super::{ModelClient, RequestData, ResponseData, TranslatedSegment, UsageMetadata};

/// One prepared outcome for a mock call.
pub enum MockOutcome {
    /// Return these translations with the given usage.
    Respond(Vec<TranslatedSegment>, UsageMetadata),
    /// Fail with a classified error.
    Fail(ErrorKind),
    /// Block until the run is canceled, then fail. Simulates an in-flight
    /// request interrupted by cancellation.
    Hang,
}

#[derive(Default)]
struct MockState {
    script: Vec<MockOutcome>,
    next: usize,
    requests: Vec<RequestData>,
    call_times: Vec<Instant>,
    system_instruction: String,
}

/// Mock [`ModelClient`] driven by a prepared script.
///
/// When the script is exhausted the last outcome repeats, so a single
/// `Respond` entry serves as an always-succeeding model. An echoing mock
/// translates every target segment to its own text behind a fixed prefix,
/// for tests where translation content does not matter.
pub struct MockModel {
    state: Mutex<MockState>,
    echo_prefix: Option<String>,
}

impl MockModel {
    pub fn new(script: Vec<MockOutcome>) -> Self {
        assert!(!script.is_empty(), "mock script must have at least one outcome");
        Self {
            state: Mutex::new(MockState { script, ..Default::default() }),
            echo_prefix: None,
        }
    }

    /// A mock that answers every request by echoing the target segments
    /// with `prefix` prepended to each.
    pub fn echoing(prefix: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            echo_prefix: Some(prefix.into()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn requests(&self) -> Vec<RequestData> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Instants at which calls were received, for backoff timing assertions.
    pub fn call_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().call_times.clone()
    }

    pub fn system_instruction(&self) -> String {
        self.state.lock().unwrap().system_instruction.clone()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn translate(
        &self,
        cancel: &CancellationToken,
        request: &RequestData,
    ) -> Result<ResponseData, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::transient(anyhow!("request canceled")));
        }

        enum Action {
            Done(Result<ResponseData, AppError>),
            Hang,
        }

        // Decide the outcome under the lock, act on it outside: a hanging
        // outcome must not block other workers' bookkeeping.
        let action = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            state.call_times.push(Instant::now());

            if let Some(prefix) = &self.echo_prefix {
                let translations = request
                    .target
                    .iter()
                    .map(|seg| TranslatedSegment {
                        id: seg.id,
                        line1: format!("{}{}", prefix, seg.lines.join(" ")),
                        line2: String::new(),
                    })
                    .collect();
                return Ok(ResponseData {
                    translations,
                    usage: UsageMetadata {
                        prompt_tokens: 1,
                        completion_tokens: 1,
                        total_tokens: 2,
                        call_count: 1,
                    },
                });
            }

            let idx = state.next.min(state.script.len() - 1);
            state.next += 1;
            match &state.script[idx] {
                MockOutcome::Respond(translations, usage) => Action::Done(Ok(ResponseData {
                    translations: translations.clone(),
                    usage: *usage,
                })),
                MockOutcome::Fail(kind) => Action::Done(Err(AppError::new(
                    *kind,
                    "",
                    anyhow!("scripted {} failure", kind),
                ))),
                MockOutcome::Hang => Action::Hang,
            }
        };

        match action {
            Action::Done(result) => result,
            Action::Hang => {
                cancel.cancelled().await;
                Err(AppError::transient(anyhow!("request canceled")))
            }
        }
    }

    fn set_system_instruction(&self, prompt: &str) {
        self.state.lock().unwrap().system_instruction = prompt.to_string();
    }
}
