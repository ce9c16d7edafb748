pub mod archive;
pub mod intention;
pub mod job;
pub mod repo;
pub mod scheduled_intention;
pub mod token;
pub mod worker;

pub use archive::{ArchJob, ArchivedIntention, ArchivedStatus};
pub use intention::{Intention, IntentionKindId};
pub use job::Job;
pub use repo::{Repo, Source};
pub use scheduled_intention::ScheduledIntention;
pub use token::{Token, TokenKind};
pub use worker::{Worker, WorkerStatus};
