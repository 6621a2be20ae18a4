pub mod config;
pub mod distance;
pub mod error;
pub mod events;
pub mod matcher;
pub mod photo;
pub mod provider;
pub mod service;
pub mod storage;

pub use error::{FaceError, Result};
pub use events::{EventLog, JsonlEventLog, MemoryEventLog, VerificationEvent};
pub use matcher::{MatchOutcome, MatchResult, Matcher, THRESHOLD};
pub use photo::Photo;
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderError};
pub use service::{Dashboard, FaceService, Outcome};
pub use storage::{AppendPolicy, FileBackend, MemoryBackend, StoreBackend, VectorStore};
