//! Scripted model double for tests and offline wiring.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::{ModelRequest, ProviderError, VisionModel};

/// One scripted outcome for a [`ScriptedModel`] call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with a status-500 provider error carrying this message.
    Fail(String),
}

impl ScriptedReply {
    pub fn text(reply: impl Into<String>) -> Self {
        Self::Text(reply.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// A [`VisionModel`] that plays back queued replies in order.
///
/// Calls past the end of the script fail with [`ProviderError::EmptyResponse`]
/// so a test that consumes too many replies fails loudly.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    /// Script a single text reply.
    pub fn single(reply: impl Into<String>) -> Self {
        Self::new(vec![ScriptedReply::text(reply)])
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn generate(&self, _request: ModelRequest) -> Result<String, ProviderError> {
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(ScriptedReply::Text(reply)) => Ok(reply),
            Some(ScriptedReply::Fail(message)) => Err(ProviderError::BadStatus {
                status: 500,
                body: message,
            }),
            None => Err(ProviderError::EmptyResponse),
        }
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}
