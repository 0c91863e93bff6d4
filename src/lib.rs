//! Research Crew
//!
//! Takes a research topic (and optionally a set of documents) and drives it through a fixed
//! sequence of LLM-backed stages, streaming replayable progress events to any number of observers.
//!
//! # Overview
//!
//! - Stage catalog with templated instructions and a total placeholder resolver
//! - Assembler that picks the stage plan for a submission
//! - Sequential executor with abort-on-failure semantics and per-stage timeouts
//! - Progress broadcaster with full replay for late observers
//! - Ollama, OpenAI and Anthropic inference backends, Serper web search, plain-text extraction
//! - warp HTTP API with a WebSocket event stream
//!
//! # Quick Start
//!
//! ```rust
//! use research_crew::pipeline::{assemble, resolve, StageContext, StageId};
//!
//! // Without documents the extraction stage is skipped
//! let stages = assemble("renewable energy", &[]).unwrap();
//! assert_eq!(stages[0].descriptor_id, StageId::WebSearch);
//!
//! // Missing values become sentinels rather than errors
//! let context = StageContext::new("renewable energy").with_documents(&[]);
//! let text = resolve(
//!     "Topic: {topic}. Docs: {document_extraction_output} Web: {web_search_output}",
//!     &context,
//! );
//! assert_eq!(
//!     text,
//!     "Topic: renewable energy. Docs: No documents provided. Web: No data provided for web_search_output."
//! );
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod preflight;
pub mod progress;
pub mod registry;
pub mod storage;
pub mod testing;
pub mod tools;
pub mod transport;

pub use config::CrewConfig;
pub use error::{CrewError, CrewResult};
pub use orchestrator::ResearchOrchestrator;
pub use pipeline::{DocumentRef, PipelineRun, RunId, RunStatus, SequentialExecutor};
pub use progress::{EventRecord, EventType, Progress, ProgressBroadcaster};
pub use registry::RunRegistry;
