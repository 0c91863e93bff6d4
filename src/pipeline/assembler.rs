//! Pipeline assembly: topic and documents in, ordered stage instances out

use super::run::DocumentRef;
use super::stage::{StageId, StageInstance};
use crate::error::{CrewError, CrewResult};

/// Stage order for a submission; extraction only runs when documents were given
pub fn stage_plan(has_documents: bool) -> Vec<StageId> {
    let mut plan = Vec::with_capacity(StageId::ALL.len());
    if has_documents {
        plan.push(StageId::DocumentExtraction);
    }
    plan.extend([
        StageId::WebSearch,
        StageId::Research,
        StageId::Analysis,
        StageId::Writing,
        StageId::Finalize,
    ]);
    plan
}

/// Build the stage sequence for a new run
///
/// Instructions are left unresolved; the executor resolves each one right before the stage
/// runs, once its upstream outputs exist.
pub fn assemble(topic: &str, document_refs: &[DocumentRef]) -> CrewResult<Vec<StageInstance>> {
    if topic.trim().is_empty() {
        return Err(CrewError::invalid_input("topic must not be empty"));
    }

    Ok(stage_plan(!document_refs.is_empty())
        .into_iter()
        .map(StageInstance::new)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::StageStatus;

    #[test]
    fn test_topic_only_yields_five_stages() {
        let stages = assemble("renewable energy", &[]).unwrap();
        let ids: Vec<StageId> = stages.iter().map(|s| s.descriptor_id).collect();

        assert_eq!(
            ids,
            vec![
                StageId::WebSearch,
                StageId::Research,
                StageId::Analysis,
                StageId::Writing,
                StageId::Finalize,
            ]
        );
    }

    #[test]
    fn test_documents_prepend_extraction() {
        let stages = assemble("X", &[DocumentRef::from_path("/tmp/paper.pdf")]).unwrap();

        assert_eq!(stages.len(), 6);
        assert_eq!(stages[0].descriptor_id, StageId::DocumentExtraction);
        assert_eq!(stages[5].descriptor_id, StageId::Finalize);
    }

    #[test]
    fn test_empty_topic_rejected() {
        assert!(matches!(
            assemble("", &[]),
            Err(CrewError::InvalidInput { .. })
        ));
        assert!(matches!(
            assemble("   \n", &[DocumentRef::from_path("/tmp/a.pdf")]),
            Err(CrewError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_instructions_unresolved_at_assembly() {
        let stages = assemble("topic", &[]).unwrap();
        assert!(stages
            .iter()
            .all(|s| s.status == StageStatus::Pending && s.resolved_instruction.is_empty()));
    }
}
