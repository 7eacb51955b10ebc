//! JSON bodies exchanged with the durable progress store over HTTP.

use serde::{Deserialize, Serialize};

use crate::model::{ModuleId, ProgressDelta, ProgressError, ProgressRecord, QuizCompletion, QuizId};

/// Header carrying the learner id. Authentication happens upstream.
pub const USER_HEADER: &str = "x-user-id";

/// `GET /progress?moduleId=`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub module_id: ModuleId,
}

/// Response of every `/progress` endpoint.
///
/// Both progress fields are optional: a module the learner never touched has
/// neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub module_id: ModuleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_sections: Option<Vec<u32>>,
}

impl ProgressResponse {
    #[must_use]
    pub fn from_record(module_id: ModuleId, record: Option<&ProgressRecord>) -> Self {
        Self {
            module_id,
            section_max: record.map(ProgressRecord::section_max),
            completed_sections: record.map(|r| r.completed_sections().iter().copied().collect()),
        }
    }

    /// # Errors
    ///
    /// Returns `ProgressError` if the response carries invalid values.
    pub fn into_record(self) -> Result<Option<ProgressRecord>, ProgressError> {
        match (self.section_max, self.completed_sections) {
            (None, None) => Ok(None),
            (max, completed) => ProgressRecord::new(
                max.unwrap_or(ProgressRecord::FIRST_SECTION),
                completed.unwrap_or_default(),
            )
            .map(Some),
        }
    }
}

/// `POST /progress`: merge a delta into the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgressRequest {
    pub module_id: ModuleId,
    #[serde(flatten)]
    pub delta: ProgressDelta,
}

/// `POST /progress/reset`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetProgressRequest {
    pub module_id: ModuleId,
}

/// `GET /quiz-completions?quizId=`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionQuery {
    pub quiz_id: QuizId,
}

/// Response of `POST /quiz-completions`. `created` is false when the store
/// already held a completion and returned it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub created: bool,
    pub completion: QuizCompletion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_progress_response_means_untouched() {
        let resp: ProgressResponse = serde_json::from_str(r#"{"moduleId":4}"#).unwrap();
        assert_eq!(resp.into_record().unwrap(), None);
    }

    #[test]
    fn progress_response_round_trips_record() {
        let record = ProgressRecord::new(3, [1, 2]).unwrap();
        let resp = ProgressResponse::from_record(ModuleId::new(4), Some(&record));
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"moduleId":4,"sectionMax":3,"completedSections":[1,2]}"#);
        let back: ProgressResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_record().unwrap(), Some(record));
    }

    #[test]
    fn merge_request_flattens_delta() {
        let req = MergeProgressRequest {
            module_id: ModuleId::new(2),
            delta: ProgressDelta::complete_section(1, 3),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["moduleId"], 2);
        assert_eq!(json["sectionMax"], 2);
        assert_eq!(json["completedSections"][0], 1);
    }
}
