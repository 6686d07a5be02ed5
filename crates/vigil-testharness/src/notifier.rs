//! ---
//! vigil_section: "11-simulation"
//! vigil_subsection: "02-fakes"
//! vigil_type: "source"
//! vigil_scope: "code"
//! vigil_description: "Recording alert endpoint with failure injection."
//! vigil_version: "v0.1.0"
//! vigil_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vigil_supervisor::{DeliveryError, Notifier};

/// One message handed to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAlert {
    pub bot_token: String,
    pub chat_id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
enum Behaviour {
    Accept,
    Reject(String),
    Hang(Duration),
}

/// Records every send attempt and answers as configured.
#[derive(Debug)]
pub struct RecordingNotifier {
    behaviour: Behaviour,
    attempts: Mutex<Vec<SentAlert>>,
}

impl RecordingNotifier {
    pub fn accepting() -> Self {
        Self::with(Behaviour::Accept)
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self::with(Behaviour::Reject(reason.into()))
    }

    /// Never answers within any sane timeout.
    pub fn hanging() -> Self {
        Self::with(Behaviour::Hang(Duration::from_secs(3600)))
    }

    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<SentAlert> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        self.attempts.lock().push(SentAlert {
            bot_token: bot_token.to_owned(),
            chat_id: chat_id.to_owned(),
            text: text.to_owned(),
        });
        match &self.behaviour {
            Behaviour::Accept => Ok(()),
            Behaviour::Reject(reason) => Err(DeliveryError::Rejected {
                status: 400,
                description: reason.clone(),
            }),
            Behaviour::Hang(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
        }
    }
}
