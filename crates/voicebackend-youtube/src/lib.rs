//! End-to-end "YouTube video to publishable drafts" pipeline: resolve
//! metadata, download and convert audio, transcribe through an injected
//! STT callback, extract value hooks, and generate LinkedIn/X/newsletter
//! drafts through a chat-completion endpoint. See each module for the
//! stage it owns.

pub mod error;
pub mod facts;
pub mod generation_client;
pub mod job;
pub mod manager;
pub mod process_runner;
pub mod store;
pub mod validator;

pub use error::{PipelineError, ProcessFailureDetails};
pub use facts::{derive_facts_sheet, FactsSheet};
pub use job::{
    generate_job_id, CancelHandle, DraftTone, GenerationConfig, Job, JobInputs, JobView, ResolvedArtifacts, Stage,
    Status,
};
pub use manager::{AsrCallback, JobManager, StartJobRequest};
pub use store::JobStore;
