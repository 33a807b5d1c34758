pub mod credential;
pub mod job;
pub mod sequence;

pub use credential::{Credential, OauthState};
pub use job::{JobStatus, ScheduledEmail};
pub use sequence::{EmailEvent, RunStatus, SequenceRun, SequenceStep};
