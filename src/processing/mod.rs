//! Document processing pipeline: word chunking, hierarchical summarization, the per-document
//! stage machine, and the worker pool that runs it.

pub mod chunking;
mod orchestrator;
mod summarize;
mod supervisor;
pub mod types;

pub use chunking::{ChunkWindow, WordChunks, chunk_words};
pub use orchestrator::DocumentProcessor;
pub use summarize::{EMPTY_TEXT_SUMMARY, HierarchicalSummarizer, HierarchicalSummary};
pub use supervisor::{
    ProcessingReport, ProcessingSupervisor, Submission, SubmitError, SupervisorWorker,
};
pub use types::{
    ChunkingError, ProcessingError, ProcessingOutcome, Stage, StageError, SummarizeError,
};
