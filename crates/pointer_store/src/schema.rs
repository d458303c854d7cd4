use serde::{Deserialize, Serialize};

pub const POINTER_FILE_VERSION: u32 = 1;

/// One run this client started and has not yet seen finish.
///
/// Field names match the record the browser client kept, so a file written
/// by either side reads back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurablePointer {
    #[serde(rename = "id")]
    pub run_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Epoch milliseconds when the run was started.
    #[serde(rename = "startedAt", default)]
    pub started_at_ms: i64,
}

impl DurablePointer {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        started_at_ms: i64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            started_at_ms,
        }
    }

    /// A pointer missing either id cannot be resumed.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.run_id.trim().is_empty() && !self.session_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerFile {
    pub version: u32,
    #[serde(default)]
    pub streams: Vec<DurablePointer>,
}

impl PointerFile {
    #[must_use]
    pub fn v1(streams: Vec<DurablePointer>) -> Self {
        Self {
            version: POINTER_FILE_VERSION,
            streams,
        }
    }
}

impl Default for PointerFile {
    fn default() -> Self {
        Self::v1(Vec::new())
    }
}

/// Every shape the pointer record has been persisted in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum PersistedRecord {
    Current(PointerFile),
    List(Vec<DurablePointer>),
    Single(DurablePointer),
}

impl PersistedRecord {
    pub(crate) fn version(&self) -> u32 {
        match self {
            Self::Current(file) => file.version,
            Self::List(_) | Self::Single(_) => POINTER_FILE_VERSION,
        }
    }

    pub(crate) fn into_pointers(self) -> Vec<DurablePointer> {
        let pointers = match self {
            Self::Current(file) => file.streams,
            Self::List(pointers) => pointers,
            Self::Single(pointer) => vec![pointer],
        };
        pointers
            .into_iter()
            .filter(DurablePointer::is_usable)
            .collect()
    }
}
