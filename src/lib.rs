//! Upshot: Asynchronous Interview-Processing Pipeline
//!
//! Ingests recorded conversations and derives structured research
//! artifacts through a chain of automated stages:
//!
//! 1. **Ingestion** - media reference to normalized transcript
//! 2. **Extraction** - transcript to evidence units and candidate people
//! 3. **Attribution** - evidence linked to planned research answers
//! 4. **Insight Synthesis** - committed evidence to cited insights
//!
//! The interview `status` is a forward-only state machine
//! (`uploaded → transcribing → analyzing → ready`, with `error` terminal).
//! Extraction success fans out to follow-on analyses as detached queue
//! tasks. A parallel [`realtime`] path extracts evidence from live session
//! batches without touching the state machine.

pub mod config;
pub mod constants;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod types;

pub use pipeline::{InterviewPipeline, PipelineOptions, PipelineRunSummary, RunRequest};
pub use types::{Result, UpshotError};
