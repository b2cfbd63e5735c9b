//! Shared document: last writer wins, no history.

use tracing::debug;

use crate::link::Link;
use crate::protocol::Message;
use crate::session::SessionError;
use crate::transport::Transport;

/// The session's document text.
#[derive(Debug, Default, Clone)]
pub struct DocumentSync {
    text: String,
}

impl DocumentSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Set the text without telling the peer (e.g. content loaded from the store before connecting).
    pub fn seed(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Replace the text and, when the link is open, push it to the peer.
    /// Returns whether an update was sent.
    pub fn apply_local_edit<T: Transport>(
        &mut self,
        text: impl Into<String>,
        link: &mut Link<T>,
    ) -> Result<bool, SessionError> {
        self.text = text.into();
        if !link.is_open() {
            return Ok(false);
        }
        link.send(&self.update_message())?;
        Ok(true)
    }

    /// Replace the text with the peer's version, whatever we had locally.
    pub fn apply_remote_update(&mut self, code: String) {
        debug!(len = code.len(), "remote document update");
        self.text = code;
    }

    /// Push the current text if there is any. Used once when the connection opens.
    pub(crate) fn sync_on_connect<T: Transport>(
        &self,
        link: &mut Link<T>,
    ) -> Result<bool, SessionError> {
        if self.text.is_empty() {
            return Ok(false);
        }
        link.send(&self.update_message())?;
        Ok(true)
    }

    fn update_message(&self) -> Message {
        Message::CodeUpdate {
            code: self.text.clone(),
        }
    }
}
