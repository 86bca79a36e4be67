pub mod capture;
pub mod clean;
pub mod debug_log;
pub mod epoch;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod paths;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod visual;

pub use capture::{CaptureBatch, CaptureQueue, CaptureRequest, CaptureSettings, SharedBrowser};
pub use epoch::{Epoch, EpochTicket};
pub use error::{classify_error, CaptureError, ErrorKind, ScriptError, StepError};
pub use execution::{StepExecutor, StepOutcome, WHOLE_SCRIPT};
pub use orchestrator::{ExecutionReport, ModelReport, Orchestrator, OrchestratorSettings};
pub use runtime::{ScriptLog, ScriptRuntime};
pub use session::{ArtifactType, ModelSession, SessionState, SessionStore};
pub use snapshot::{Snapshot, SnapshotCache};
