//! Placeholder resolution for stage instructions
//!
//! Templates name their inputs as `{name}`. Names are parsed into a typed [`Placeholder`] so a
//! stage's output is looked up by [`StageId`] rather than by a free-form string key. Resolution is
//! total: anything the context cannot supply becomes a fixed sentinel sentence.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

use super::run::DocumentRef;
use super::stage::StageId;

/// Output placeholder value used when a run was submitted without documents
pub const NO_DOCUMENTS_PROVIDED: &str = "No documents provided.";

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("placeholder pattern is valid"));

/// A named substitution point in an instruction template
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Topic,
    DocumentRefs,
    SearchResults,
    StageOutput(StageId),
    Unknown(String),
}

impl Placeholder {
    pub fn parse(name: &str) -> Self {
        match name {
            "topic" => Placeholder::Topic,
            "document_refs" => Placeholder::DocumentRefs,
            "search_results" => Placeholder::SearchResults,
            other => other
                .strip_suffix("_output")
                .and_then(StageId::from_role)
                .map(Placeholder::StageOutput)
                .unwrap_or_else(|| Placeholder::Unknown(other.to_string())),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Placeholder::Topic => "topic".to_string(),
            Placeholder::DocumentRefs => "document_refs".to_string(),
            Placeholder::SearchResults => "search_results".to_string(),
            Placeholder::StageOutput(id) => id.output_placeholder(),
            Placeholder::Unknown(name) => name.clone(),
        }
    }
}

/// Substitution text for a placeholder the context cannot supply
pub fn sentinel(name: &str) -> String {
    format!("No data provided for {name}.")
}

/// Values available to a stage's template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageContext {
    topic: Option<String>,
    document_refs: Option<String>,
    search_results: Option<String>,
    outputs: HashMap<StageId, String>,
}

impl StageContext {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Default::default()
        }
    }

    /// Record the submitted documents; an empty list marks extraction as not applicable
    pub fn with_documents(mut self, document_refs: &[DocumentRef]) -> Self {
        if document_refs.is_empty() {
            self.outputs.insert(
                StageId::DocumentExtraction,
                NO_DOCUMENTS_PROVIDED.to_string(),
            );
        } else {
            self.document_refs = Some(format_document_refs(document_refs));
        }
        self
    }

    pub fn with_search_results(mut self, results: impl Into<String>) -> Self {
        self.search_results = Some(results.into());
        self
    }

    pub fn set_output(&mut self, stage: StageId, output: impl Into<String>) {
        self.outputs.insert(stage, output.into());
    }

    pub fn lookup(&self, placeholder: &Placeholder) -> Option<&str> {
        match placeholder {
            Placeholder::Topic => self.topic.as_deref(),
            Placeholder::DocumentRefs => self.document_refs.as_deref(),
            Placeholder::SearchResults => self.search_results.as_deref(),
            Placeholder::StageOutput(id) => self.outputs.get(id).map(String::as_str),
            Placeholder::Unknown(_) => None,
        }
    }
}

fn format_document_refs(document_refs: &[DocumentRef]) -> String {
    document_refs
        .iter()
        .map(|doc| format!("- {} ({})", doc.name, doc.path.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Substitute every `{name}` in `template` from `context`
///
/// Never fails. Substituted values are not rescanned, so a value that itself contains braces is
/// inserted verbatim.
pub fn resolve(template: &str, context: &StageContext) -> String {
    PLACEHOLDER_PATTERN
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match context.lookup(&Placeholder::parse(name)) {
                Some(value) => value.to_string(),
                None => sentinel(name),
            }
        })
        .into_owned()
}

/// Placeholders referenced by a template, in order of appearance
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    PLACEHOLDER_PATTERN
        .captures_iter(template)
        .map(|caps| Placeholder::parse(&caps[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::StageCatalog;
    use proptest::prelude::*;

    #[test]
    fn test_resolves_known_placeholders() {
        let mut context = StageContext::new("renewable energy");
        context.set_output(StageId::Research, "solar is cheap");

        let resolved = resolve("Topic: {topic}\nFindings: {research_output}", &context);
        assert_eq!(resolved, "Topic: renewable energy\nFindings: solar is cheap");
    }

    #[test]
    fn test_missing_value_becomes_sentinel() {
        let context = StageContext::new("x");
        let resolved = resolve("Analysis: {analysis_output}", &context);
        assert_eq!(resolved, "Analysis: No data provided for analysis_output.");
    }

    #[test]
    fn test_unknown_placeholder_becomes_sentinel() {
        let context = StageContext::new("x");
        assert_eq!(
            resolve("{mystery}", &context),
            "No data provided for mystery."
        );
    }

    #[test]
    fn test_non_placeholder_braces_left_alone() {
        let context = StageContext::new("x");
        assert_eq!(
            resolve("json {\"a\": 1} and {Topic} and {}", &context),
            "json {\"a\": 1} and {Topic} and {}"
        );
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let mut context = StageContext::new("{research_output}");
        context.set_output(StageId::Research, "should not appear");

        assert_eq!(resolve("{topic}", &context), "{research_output}");
    }

    #[test]
    fn test_no_documents_sets_extraction_sentinel() {
        let context = StageContext::new("x").with_documents(&[]);
        assert_eq!(
            resolve("{document_extraction_output}", &context),
            NO_DOCUMENTS_PROVIDED
        );
        assert_eq!(
            resolve("{document_refs}", &context),
            "No data provided for document_refs."
        );
    }

    #[test]
    fn test_documents_are_listed() {
        let docs = vec![
            DocumentRef::new("/tmp/a.pdf", "a.pdf"),
            DocumentRef::new("/tmp/b.txt", "b.txt"),
        ];
        let context = StageContext::new("x").with_documents(&docs);

        assert_eq!(
            resolve("{document_refs}", &context),
            "- a.pdf (/tmp/a.pdf)\n- b.txt (/tmp/b.txt)"
        );
        assert_eq!(context.lookup(&Placeholder::StageOutput(StageId::DocumentExtraction)), None);
    }

    #[test]
    fn test_placeholder_parsing() {
        assert_eq!(Placeholder::parse("topic"), Placeholder::Topic);
        assert_eq!(
            Placeholder::parse("web_search_output"),
            Placeholder::StageOutput(StageId::WebSearch)
        );
        assert_eq!(
            Placeholder::parse("manager_output"),
            Placeholder::Unknown("manager_output".to_string())
        );
        assert_eq!(
            Placeholder::parse("web_search_output").name(),
            "web_search_output"
        );
    }

    #[test]
    fn test_catalog_templates_reference_only_known_placeholders() {
        let catalog = StageCatalog::default();
        for descriptor in catalog.iter() {
            for placeholder in placeholders(&descriptor.instruction_template) {
                assert!(
                    !matches!(placeholder, Placeholder::Unknown(_)),
                    "{} references unknown placeholder {:?}",
                    descriptor.role,
                    placeholder
                );
            }
        }
    }

    #[test]
    fn test_templates_only_consume_earlier_stages() {
        let catalog = StageCatalog::default();
        for (position, id) in StageId::ALL.iter().enumerate() {
            let template = &catalog.descriptor(*id).instruction_template;
            for placeholder in placeholders(template) {
                if let Placeholder::StageOutput(upstream) = placeholder {
                    let upstream_position =
                        StageId::ALL.iter().position(|s| *s == upstream).unwrap();
                    assert!(upstream_position < position, "{id} consumes {upstream}");
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_resolve_is_total_and_leaves_no_placeholders(template in "[a-z_{} .]{0,64}") {
            let resolved = resolve(&template, &StageContext::default());
            prop_assert!(!PLACEHOLDER_PATTERN.is_match(&resolved));
        }

        #[test]
        fn prop_resolve_is_idempotent(template in "[a-z_{} .\n]{0,64}", topic in "[ -~]{0,20}") {
            let mut context = StageContext::new(topic);
            context.set_output(StageId::Research, "findings");
            prop_assert_eq!(resolve(&template, &context), resolve(&template, &context));
        }
    }
}
