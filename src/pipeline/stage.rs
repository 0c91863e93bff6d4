//! Stage catalog and per-run stage state
//!
//! A [`StageDescriptor`] is the immutable definition of one kind of pipeline work. A
//! [`StageInstance`] is that stage's mutable state inside one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{CrewError, CrewResult};

/// Identifier of a stage kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    DocumentExtraction,
    WebSearch,
    Research,
    Analysis,
    Writing,
    Finalize,
}

impl StageId {
    /// All stage kinds in pipeline order
    pub const ALL: [StageId; 6] = [
        StageId::DocumentExtraction,
        StageId::WebSearch,
        StageId::Research,
        StageId::Analysis,
        StageId::Writing,
        StageId::Finalize,
    ];

    /// Short role identifier, also the prefix of the stage's output placeholder
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::DocumentExtraction => "document_extraction",
            StageId::WebSearch => "web_search",
            StageId::Research => "research",
            StageId::Analysis => "analysis",
            StageId::Writing => "writing",
            StageId::Finalize => "finalize",
        }
    }

    pub fn from_role(role: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == role)
    }

    /// Name of the placeholder carrying this stage's output
    pub fn output_placeholder(&self) -> String {
        format!("{}_output", self.as_str())
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who the inference backend is asked to be while running a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persona {
    pub title: String,
    pub goal: String,
    pub backstory: String,
}

/// Static definition of one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDescriptor {
    pub id: StageId,
    pub role: String,
    pub instruction_template: String,
    pub expected_output: String,
    pub persona: Persona,
}

/// The fixed set of stage descriptors
#[derive(Debug, Clone)]
pub struct StageCatalog {
    descriptors: HashMap<StageId, StageDescriptor>,
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::new("professional", "comprehensive")
    }
}

impl StageCatalog {
    /// Build the catalog; the writing stage bakes in the requested style and length
    pub fn new(writing_style: &str, writing_length: &str) -> Self {
        let descriptors = StageId::ALL
            .into_iter()
            .map(|id| (id, build_descriptor(id, writing_style, writing_length)))
            .collect();
        Self { descriptors }
    }

    pub fn descriptor(&self, id: StageId) -> &StageDescriptor {
        // Every StageId is inserted by `new`
        &self.descriptors[&id]
    }

    pub fn descriptor_for_role(&self, role: &str) -> Option<&StageDescriptor> {
        StageId::from_role(role).map(|id| self.descriptor(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        StageId::ALL.iter().map(|id| self.descriptor(*id))
    }
}

fn persona(title: &str, goal: &str, backstory: &str) -> Persona {
    Persona {
        title: title.to_string(),
        goal: goal.to_string(),
        backstory: backstory.to_string(),
    }
}

fn build_descriptor(id: StageId, writing_style: &str, writing_length: &str) -> StageDescriptor {
    let (instruction_template, expected_output, persona) = match id {
        StageId::DocumentExtraction => (
            "Extract and analyze information from the following documents:\n\
             {document_refs}\n\n\
             Focus on material relevant to: {topic}"
                .to_string(),
            "A detailed summary of the documents' content, highlighting key insights, data \
             points, and findings."
                .to_string(),
            persona(
                "PDF Document Specialist",
                "Extract and analyze information from documents",
                "You are an expert at pulling structured facts out of long documents and \
                 summarizing them accurately without inventing details.",
            ),
        ),
        StageId::WebSearch => (
            "Search the web for information about: {topic}\n\n\
             Search results:\n{search_results}\n\n\
             Identify the most relevant and reliable sources and summarize what they report."
                .to_string(),
            "A comprehensive list of relevant sources with a summary of the key information \
             each one provides."
                .to_string(),
            persona(
                "Web Search Specialist",
                "Find accurate and current information on the web",
                "You are a seasoned online researcher who knows how to separate reliable \
                 sources from noise.",
            ),
        ),
        StageId::Research => (
            "Research the following topic thoroughly: {topic}\n\n\
             Web Search Results:\n{web_search_output}\n\n\
             Document Analysis Results:\n{document_extraction_output}\n\n\
             Provide a comprehensive analysis based on all available information."
                .to_string(),
            "A detailed research report with findings, analysis, and conclusions.".to_string(),
            persona(
                "Research Specialist",
                "Conduct thorough research and synthesize findings",
                "You are a meticulous researcher who cross-checks sources and connects \
                 evidence into a coherent picture.",
            ),
        ),
        StageId::Analysis => (
            "Analyze the following information and answer the question:\n\n\
             Information:\n{research_output}\n\n\
             Question: What are the key insights from the research on {topic}?"
                .to_string(),
            "A clear, concise answer with supporting evidence and explanation.".to_string(),
            persona(
                "Data Analyst",
                "Analyze research findings and surface the key insights",
                "You are an analyst who turns raw findings into clear, well-supported \
                 conclusions.",
            ),
        ),
        StageId::Writing => (
            format!(
                "Write content on the following topic: {{topic}}\n\n\
                 Style: {writing_style}\n\
                 Length: {writing_length}\n\n\
                 Research Results:\n{{analysis_output}}"
            ),
            "Well-written content that meets the requested style and length.".to_string(),
            persona(
                "Content Writer",
                "Write engaging, accurate content from the analysis",
                "You are a writer who explains complex subjects clearly for a general \
                 professional audience.",
            ),
        ),
        StageId::Finalize => (
            "Review all the information gathered about {topic} and create a final, cohesive \
             report.\n\n\
             Web Search Results:\n{web_search_output}\n\n\
             Document Analysis:\n{document_extraction_output}\n\n\
             Research Findings:\n{research_output}\n\n\
             Analysis:\n{analysis_output}\n\n\
             Written Content:\n{writing_output}\n\n\
             Create a comprehensive final report that integrates all of this information."
                .to_string(),
            "A comprehensive, well-structured final report integrating the research, analysis, \
             and written content."
                .to_string(),
            persona(
                "Project Manager",
                "Coordinate the crew's work into one coherent deliverable",
                "You are an experienced project manager who reviews every contribution and \
                 assembles the final report.",
            ),
        ),
    };

    StageDescriptor {
        id,
        role: id.as_str().to_string(),
        instruction_template,
        expected_output,
        persona,
    }
}

/// Lifecycle state of one stage within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }
}

/// One stage's state inside a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageInstance {
    pub descriptor_id: StageId,
    pub resolved_instruction: String,
    pub status: StageStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageInstance {
    pub fn new(descriptor_id: StageId) -> Self {
        Self {
            descriptor_id,
            resolved_instruction: String::new(),
            status: StageStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn role(&self) -> &'static str {
        self.descriptor_id.as_str()
    }

    /// Pending -> Running
    pub fn start(&mut self) -> CrewResult<()> {
        self.expect_status(StageStatus::Pending, StageStatus::Running)?;
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the instruction actually sent; only valid while running
    pub fn set_instruction(&mut self, instruction: String) -> CrewResult<()> {
        if self.status != StageStatus::Running {
            return Err(CrewError::internal(format!(
                "stage '{}' is {:?}, cannot set instruction",
                self.role(),
                self.status
            )));
        }
        self.resolved_instruction = instruction;
        Ok(())
    }

    /// Running -> Succeeded
    pub fn succeed(&mut self, output: String) -> CrewResult<()> {
        self.expect_status(StageStatus::Running, StageStatus::Succeeded)?;
        self.status = StageStatus::Succeeded;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed
    pub fn fail(&mut self, error: String) -> CrewResult<()> {
        self.expect_status(StageStatus::Running, StageStatus::Failed)?;
        self.status = StageStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn expect_status(&self, required: StageStatus, target: StageStatus) -> CrewResult<()> {
        if self.status == required {
            Ok(())
        } else {
            Err(CrewError::internal(format!(
                "stage '{}' cannot move from {:?} to {:?}",
                self.role(),
                self.status,
                target
            )))
        }
    }
}
