use crate::align::{ReviewMode, sentences};
use crate::review::{ReviewBoard, ReviewError, ReviewStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_recipe: Option<String>,
    pub improved_recipe: String,
    pub selected_indexes: BTreeMap<usize, ReviewStatus>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_level: Option<u8>,
    pub mode: ReviewMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<Vec<String>>,
}

/// Details the board does not know about itself.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub original_recipe: Option<String>,
    pub improvement_level: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl SubmissionContext {
    pub fn now() -> Self {
        Self {
            original_recipe: None,
            improvement_level: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_original(mut self, recipe: impl Into<String>, level: u8) -> Self {
        self.original_recipe = Some(recipe.into());
        self.improvement_level = Some(level);
        self
    }
}

impl Default for SubmissionContext {
    fn default() -> Self {
        Self::now()
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("result queue is closed")]
    QueueClosed,
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0}")]
    Rejected(String),
}

/// Hands a finished result to its transport.
pub trait ResultReporter {
    fn report(&self, result: ReviewResult) -> Result<(), ReportError>;
}

impl<F> ResultReporter for F
where
    F: Fn(ReviewResult) -> Result<(), ReportError>,
{
    fn report(&self, result: ReviewResult) -> Result<(), ReportError> {
        self(result)
    }
}

impl ReviewBoard {
    pub fn package(&self, context: SubmissionContext) -> ReviewResult {
        let sentence_list = match self.mode() {
            ReviewMode::Sentence => Some(sentences(self.text())),
            ReviewMode::Word => None,
        };
        ReviewResult {
            original_recipe: context.original_recipe,
            improved_recipe: self.text().to_string(),
            selected_indexes: self.statuses().clone(),
            timestamp: context.timestamp,
            improvement_level: context.improvement_level,
            mode: self.mode(),
            sentences: sentence_list,
        }
    }

    pub fn finish<R>(&self, reporter: &R, context: SubmissionContext) -> Result<(), ReviewError>
    where
        R: ResultReporter + ?Sized,
    {
        if !self.can_submit() {
            return Err(ReviewError::NotFinished {
                remaining: self.remaining(),
            });
        }
        let result = self.package(context);
        let selected = result.selected_indexes.len();
        reporter.report(result)?;
        info!(board = self.id(), selected, mode = %self.mode(), "review submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AnnotationMap;
    use crate::review::BoardOptions;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use std::cell::RefCell;

    fn finished_sentence_board() -> ReviewBoard {
        let mut annotations = AnnotationMap::new();
        annotations.insert("Fold gently.", "fold gentli", 1);
        let mut board = ReviewBoard::new(
            "Whisk eggs. Fold gently.\nBake!",
            ReviewMode::Sentence,
            annotations,
            BoardOptions::default(),
        );
        board.toggle(1);
        board.accept(1);
        board
    }

    #[test]
    fn unfinished_boards_cannot_be_submitted() {
        let mut annotations = AnnotationMap::new();
        annotations.insert("salt", "salt", 0);
        let board = ReviewBoard::new(
            "salt pepper",
            ReviewMode::Word,
            annotations,
            BoardOptions::default(),
        );
        let reporter = |_result: ReviewResult| -> Result<(), ReportError> {
            panic!("nothing should be reported")
        };
        let err = board.finish(&reporter, SubmissionContext::now()).unwrap_err();
        assert!(matches!(err, ReviewError::NotFinished { remaining: 1 }));
    }

    #[test]
    fn sentence_results_carry_the_sentence_list() {
        let board = finished_sentence_board();
        let captured = RefCell::new(None);
        let reporter = |result: ReviewResult| -> Result<(), ReportError> {
            *captured.borrow_mut() = Some(result);
            Ok(())
        };
        let context = SubmissionContext {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            ..SubmissionContext::now()
        }
        .with_original("whisk the eggs and bake", 2);
        board.finish(&reporter, context).unwrap();

        let result = captured.into_inner().expect("result reported");
        assert_eq!(
            result.sentences.as_deref(),
            Some(&["Whisk eggs.".to_string(), "Fold gently.".to_string(), "Bake!".to_string()][..])
        );
        let payload: Value = serde_json::to_value(&result).unwrap();
        assert_eq!(payload["selectedIndexes"], json!({ "1": "accepted" }));
        assert_eq!(payload["timestamp"], json!("2024-03-01T12:00:00Z"));
        assert_eq!(payload["mode"], json!("sentence"));
        assert_eq!(payload["improvementLevel"], json!(2));
        assert_eq!(payload["originalRecipe"], json!("whisk the eggs and bake"));
    }

    #[test]
    fn word_results_omit_optional_fields() {
        let mut annotations = AnnotationMap::new();
        annotations.insert("cumin", "cumin", 1);
        let mut board = ReviewBoard::new(
            "add cumin",
            ReviewMode::Word,
            annotations,
            BoardOptions::default(),
        );
        board.toggle(0);
        board.reveal_next();
        board.decline(1);
        let payload = serde_json::to_value(board.package(SubmissionContext::now())).unwrap();
        assert!(payload.get("sentences").is_none());
        assert!(payload.get("originalRecipe").is_none());
        assert_eq!(payload["selectedIndexes"]["0"], json!("incorrect"));
        assert_eq!(payload["selectedIndexes"]["1"], json!("declined"));
    }

    #[test]
    fn reporter_failures_surface_as_review_errors() {
        let board = finished_sentence_board();
        let reporter = |_result: ReviewResult| -> Result<(), ReportError> {
            Err(ReportError::QueueClosed)
        };
        let err = board.finish(&reporter, SubmissionContext::now()).unwrap_err();
        assert!(matches!(err, ReviewError::Report(ReportError::QueueClosed)));
    }
}
