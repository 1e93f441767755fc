use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Executes a named method on behalf of a desktop process.
///
/// The control server forwards the method string untouched; it has no notion of which
/// methods exist.
pub trait Messenger: Send + Sync {
    fn send_message(&self, method: &str, params: Value) -> Result<(), MessageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message receiver closed")]
    Closed,

    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerMessage {
    pub method: String,
    pub params: Value,
    pub received_at: String,
}

/// Hands messages to the owning process over an unbounded channel.
#[derive(Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<RunnerMessage>,
}

impl ChannelMessenger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunnerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Messenger for ChannelMessenger {
    fn send_message(&self, method: &str, params: Value) -> Result<(), MessageError> {
        self.tx
            .send(RunnerMessage {
                method: method.to_string(),
                params,
                received_at: crate::now_iso(),
            })
            .map_err(|_| MessageError::Closed)
    }
}
