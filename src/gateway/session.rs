use super::frame::Ready;

/// What a later handshake needs to resume instead of identifying again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeData {
    pub session_id: String,
    pub sequence: Option<u64>,
    /// Endpoint the server asked us to resume against.
    pub resume_url: Option<String>,
}

/// Session bookkeeping owned by the connection task.
#[derive(Debug, Default)]
pub(crate) struct Session {
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
}

impl Session {
    pub(crate) fn record_sequence(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
    }

    pub(crate) fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub(crate) fn on_ready(&mut self, ready: Ready) {
        self.session_id = Some(ready.session_id);
        self.resume_url = ready.resume_gateway_url;
    }

    pub(crate) fn resume_data(&self) -> Option<ResumeData> {
        Some(ResumeData {
            session_id: self.session_id.clone()?,
            sequence: self.sequence,
            resume_url: self.resume_url.clone(),
        })
    }

    /// Forget the session. The next handshake identifies from scratch and
    /// sequence numbering starts over.
    pub(crate) fn invalidate(&mut self) {
        *self = Self::default();
    }
}
