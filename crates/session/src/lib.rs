//! Authoritative session state for the shared skybox: the single-writer
//! store, the submission cooldown gate and the generation workflow.

pub mod clock;
pub mod error;
pub mod gate;
pub mod store;
pub mod workflow;

pub use clock::{Clock, WorldClock};
pub use error::{SessionError, WorkflowError};
pub use gate::{GateDecision, SubmissionGate, DEFAULT_COOLDOWN_SECONDS};
pub use store::SessionStore;
pub use workflow::{GenerationController, WorkflowConfig};
