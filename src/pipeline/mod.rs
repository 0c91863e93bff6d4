//! The research pipeline: stage catalog, assembly, run state, and sequential execution

pub mod assembler;
pub mod executor;
pub mod resolver;
pub mod run;
pub mod stage;

pub use assembler::assemble;
pub use executor::SequentialExecutor;
pub use resolver::{resolve, Placeholder, StageContext, NO_DOCUMENTS_PROVIDED};
pub use run::{DocumentRef, PipelineRun, RunHandle, RunId, RunStatus, RunSummary};
pub use stage::{StageCatalog, StageDescriptor, StageId, StageInstance, StageStatus};
