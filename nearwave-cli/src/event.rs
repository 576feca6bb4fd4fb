use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use nearwave_core::auth::AuthValidator;
use nearwave_core::candidate::CandidateEvent;

use crate::ui::print_prompt;

/// Authentication prompt waiting for user input.
pub struct PendingAuth {
    pub endpoint: String,
    pub digits: String,
    pub respond: oneshot::Sender<bool>,
}

/// Validator that defers the accept/deny decision to the prompt loop.
pub struct PromptValidator {
    endpoint: String,
    pending_tx: mpsc::UnboundedSender<PendingAuth>,
}

impl PromptValidator {
    pub fn new(endpoint: String, pending_tx: mpsc::UnboundedSender<PendingAuth>) -> Self {
        Self {
            endpoint,
            pending_tx,
        }
    }
}

#[async_trait]
impl AuthValidator for PromptValidator {
    async fn validate(&self, digits: &str) -> bool {
        let (respond, answer) = oneshot::channel();
        if self
            .pending_tx
            .send(PendingAuth {
                endpoint: self.endpoint.clone(),
                digits: digits.to_string(),
                respond,
            })
            .is_err()
        {
            return false;
        }
        // A dropped prompt means the CLI is shutting down; deny.
        answer.await.unwrap_or(false)
    }
}

/// Spawns a task that listens for candidate events and prints them.
pub fn spawn_event_printer(mut events_rx: broadcast::Receiver<CandidateEvent>) {
    tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(CandidateEvent::Discovered(candidate)) => {
                    if candidate.is_incoming {
                        println!(
                            "\n  📥 Incoming connection offer from \"{}\" ({})",
                            candidate.name, candidate.id
                        );
                        println!("     Type 'connect {}' to pair.", candidate.id);
                    } else {
                        println!(
                            "\n  🔍 Discovered \"{}\" ({})",
                            candidate.name, candidate.id
                        );
                    }
                    print_prompt();
                }
                Ok(CandidateEvent::Lost(candidate)) => {
                    println!("\n  📴 Lost \"{}\" ({})", candidate.name, candidate.id);
                    print_prompt();
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("\n  ⚠ Missed {n} candidate events");
                    print_prompt();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
