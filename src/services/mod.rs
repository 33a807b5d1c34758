pub mod credential_service;
pub mod job_service;
pub mod reply_service;
pub mod scheduler;
pub mod sequence_service;
pub mod worker_service;
