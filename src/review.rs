use crate::align::{AnnotatedIndexSet, AnnotationMap, Alignment, ReviewMode, align};
use crate::submission::ReportError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// How long a missed click stays marked `incorrect`.
pub const CLEAR_DELAY: Duration = Duration::from_secs(1);

static NEXT_BOARD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Correct,
    Incorrect,
    Accepted,
    Declined,
}

impl ReviewStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, ReviewStatus::Accepted | ReviewStatus::Declined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Correct => "correct",
            ReviewStatus::Incorrect => "incorrect",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Declined => "declined",
        }
    }

    pub fn highlight(self) -> Highlight {
        match self {
            ReviewStatus::Correct => Highlight::Info,
            ReviewStatus::Incorrect => Highlight::Warning,
            ReviewStatus::Accepted => Highlight::Success,
            ReviewStatus::Declined => Highlight::Caution,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Highlight {
    #[default]
    None,
    Info,
    Warning,
    Success,
    Caution,
}

impl Highlight {
    pub fn for_status(status: Option<ReviewStatus>) -> Self {
        status.map(ReviewStatus::highlight).unwrap_or_default()
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Highlight::None => "mark-none",
            Highlight::Info => "mark-info",
            Highlight::Warning => "mark-warning",
            Highlight::Success => "mark-success",
            Highlight::Caution => "mark-caution",
        }
    }
}

/// What to do when the backend flags no changes at all.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyAnnotationPolicy {
    #[default]
    CompleteImmediately,
    SkipGame,
}

impl fmt::Display for EmptyAnnotationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmptyAnnotationPolicy::CompleteImmediately => write!(f, "complete"),
            EmptyAnnotationPolicy::SkipGame => write!(f, "skip"),
        }
    }
}

impl FromStr for EmptyAnnotationPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "complete" | "complete-immediately" => Ok(EmptyAnnotationPolicy::CompleteImmediately),
            "skip" | "skip-game" => Ok(EmptyAnnotationPolicy::SkipGame),
            other => Err(format!(
                "unknown empty-annotation policy {other:?}; expected `complete` or `skip`"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    pub board_id: u64,
    pub mode: ReviewMode,
    pub annotated: usize,
    pub accepted: usize,
    pub declined: usize,
}

/// One-shot side effect fired when a board completes.
pub trait Celebration: Send + Sync {
    fn celebrate(&self, summary: &CompletionSummary);
}

pub struct NoCelebration;

impl Celebration for NoCelebration {
    fn celebrate(&self, _summary: &CompletionSummary) {}
}

#[derive(Clone)]
pub struct BoardOptions {
    pub empty_annotations: EmptyAnnotationPolicy,
    pub celebration: Arc<dyn Celebration>,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            empty_annotations: EmptyAnnotationPolicy::default(),
            celebration: Arc::new(NoCelebration),
        }
    }
}

impl fmt::Debug for BoardOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardOptions")
            .field("empty_annotations", &self.empty_annotations)
            .finish_non_exhaustive()
    }
}

/// Pending removal of an `incorrect` mark; stale once the index changes again.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ClearTicket {
    pub index: usize,
    pub due: Instant,
    board_id: u64,
    generation: u64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Toggle {
    Found,
    Missed(ClearTicket),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{remaining} change(s) still need to be accepted or declined")]
    NotFinished { remaining: usize },
    #[error("failed to report review result: {0}")]
    Report(#[from] ReportError),
}

pub struct ReviewBoard {
    id: u64,
    text: String,
    annotations: AnnotationMap,
    annotated: AnnotatedIndexSet,
    alignment: Alignment,
    statuses: BTreeMap<usize, ReviewStatus>,
    generations: HashMap<usize, u64>,
    next_generation: u64,
    pending: Vec<ClearTicket>,
    explanation: Option<usize>,
    completed: bool,
    skipped: bool,
    options: BoardOptions,
}

impl ReviewBoard {
    pub fn new(
        text: impl Into<String>,
        mode: ReviewMode,
        annotations: AnnotationMap,
        options: BoardOptions,
    ) -> Self {
        let text = text.into();
        let annotated = annotations.annotated_indices();
        let alignment = align(&text, mode, &annotated);
        let skipped = annotated.is_empty()
            && options.empty_annotations == EmptyAnnotationPolicy::SkipGame;
        let mut board = Self {
            id: NEXT_BOARD_ID.fetch_add(1, Ordering::Relaxed),
            text,
            annotations,
            annotated,
            alignment,
            statuses: BTreeMap::new(),
            generations: HashMap::new(),
            next_generation: 0,
            pending: Vec::new(),
            explanation: None,
            completed: false,
            skipped,
            options,
        };
        debug!(
            board = board.id,
            %mode,
            tokens = board.alignment.token_count(),
            annotated = board.annotated.len(),
            skipped,
            "review board created"
        );
        board.check_completion();
        board
    }

    /// Same text and annotations, fresh state, different granularity.
    pub fn remodeled(&self, mode: ReviewMode) -> Self {
        Self::new(
            self.text.clone(),
            mode,
            self.annotations.clone(),
            self.options.clone(),
        )
    }

    pub fn toggle(&mut self, index: usize) -> Toggle {
        self.toggle_at(index, Instant::now())
    }

    pub fn toggle_at(&mut self, index: usize, now: Instant) -> Toggle {
        if self.annotated.contains(&index) {
            self.set(index, ReviewStatus::Correct);
            self.explanation = Some(index);
            debug!(board = self.id, index, "change found");
            Toggle::Found
        } else {
            let generation = self.set(index, ReviewStatus::Incorrect);
            let ticket = ClearTicket {
                index,
                due: now + CLEAR_DELAY,
                board_id: self.id,
                generation,
            };
            self.pending.push(ticket);
            debug!(board = self.id, index, "miss");
            Toggle::Missed(ticket)
        }
    }

    pub fn accept(&mut self, index: usize) {
        self.set(index, ReviewStatus::Accepted);
        self.explanation = None;
    }

    pub fn decline(&mut self, index: usize) {
        self.set(index, ReviewStatus::Declined);
        self.explanation = None;
    }

    pub fn dismiss_explanation(&mut self) {
        self.explanation = None;
    }

    /// Marks the lowest unresolved change as found and opens its explanation.
    pub fn reveal_next(&mut self) -> Option<usize> {
        let index = self.unresolved().next()?;
        self.set(index, ReviewStatus::Correct);
        self.explanation = Some(index);
        Some(index)
    }

    pub fn reveal_all(&mut self) -> usize {
        let targets: Vec<_> = self.unresolved().collect();
        for &index in &targets {
            self.set(index, ReviewStatus::Correct);
        }
        targets.len()
    }

    /// Applies a clear if it is still current; returns whether it removed anything.
    pub fn expire(&mut self, ticket: ClearTicket) -> bool {
        self.pending.retain(|pending| *pending != ticket);
        if ticket.board_id != self.id {
            return false;
        }
        let current = self.generations.get(&ticket.index).copied();
        if current != Some(ticket.generation)
            || self.statuses.get(&ticket.index) != Some(&ReviewStatus::Incorrect)
        {
            return false;
        }
        self.statuses.remove(&ticket.index);
        self.generations.remove(&ticket.index);
        true
    }

    /// Applies every clear that is due at `now`; returns the cleared indices.
    pub fn tick(&mut self, now: Instant) -> Vec<usize> {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|ticket| ticket.due <= now);
        self.pending = waiting;
        due.into_iter()
            .filter(|ticket| self.expire(*ticket))
            .map(|ticket| ticket.index)
            .collect()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> ReviewMode {
        self.alignment.mode()
    }

    pub fn alignment(&self) -> &Alignment {
        &self.alignment
    }

    pub fn annotations(&self) -> &AnnotationMap {
        &self.annotations
    }

    pub fn annotated(&self) -> &AnnotatedIndexSet {
        &self.annotated
    }

    pub fn status(&self, index: usize) -> Option<ReviewStatus> {
        self.statuses.get(&index).copied()
    }

    pub fn statuses(&self) -> &BTreeMap<usize, ReviewStatus> {
        &self.statuses
    }

    pub fn explanation(&self) -> Option<usize> {
        self.explanation
    }

    pub fn explanation_text(&self, index: usize) -> String {
        match self.mode() {
            ReviewMode::Sentence => "Explanation for this sentence".to_string(),
            ReviewMode::Word => match self.annotations.lookup(index) {
                Some((surface, stem)) if surface != stem => {
                    format!("Explanation for {surface} (from \u{201c}{stem}\u{201d})")
                }
                Some((surface, _)) => format!("Explanation for {surface}"),
                None => "Explanation for this word".to_string(),
            },
        }
    }

    pub fn resolved_count(&self) -> usize {
        self.annotated
            .iter()
            .filter(|index| self.status(**index).is_some_and(ReviewStatus::is_resolved))
            .count()
    }

    pub fn remaining(&self) -> usize {
        self.annotated.len() - self.resolved_count()
    }

    pub fn pending_clears(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn can_submit(&self) -> bool {
        self.completed || self.skipped
    }

    fn unresolved(&self) -> impl Iterator<Item = usize> + '_ {
        self.annotated
            .iter()
            .copied()
            .filter(|index| !self.status(*index).is_some_and(ReviewStatus::is_resolved))
    }

    fn set(&mut self, index: usize, status: ReviewStatus) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.statuses.insert(index, status);
        self.generations.insert(index, generation);
        self.check_completion();
        generation
    }

    fn check_completion(&mut self) {
        if self.completed || self.skipped {
            return;
        }
        if self.resolved_count() != self.annotated.len() {
            return;
        }
        self.completed = true;
        let summary = self.summary();
        info!(
            board = self.id,
            annotated = summary.annotated,
            accepted = summary.accepted,
            declined = summary.declined,
            "all changes resolved"
        );
        self.options.celebration.celebrate(&summary);
    }

    fn summary(&self) -> CompletionSummary {
        let count = |wanted: ReviewStatus| {
            self.annotated
                .iter()
                .filter(|index| self.status(**index) == Some(wanted))
                .count()
        };
        CompletionSummary {
            board_id: self.id,
            mode: self.mode(),
            annotated: self.annotated.len(),
            accepted: count(ReviewStatus::Accepted),
            declined: count(ReviewStatus::Declined),
        }
    }
}

impl fmt::Debug for ReviewBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewBoard")
            .field("id", &self.id)
            .field("mode", &self.mode())
            .field("statuses", &self.statuses)
            .field("explanation", &self.explanation)
            .field("completed", &self.completed)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingCelebration(AtomicUsize);

    impl Celebration for CountingCelebration {
        fn celebrate(&self, _summary: &CompletionSummary) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn word_board() -> (ReviewBoard, Arc<CountingCelebration>) {
        let mut annotations = AnnotationMap::new();
        annotations.insert("Word2", "word2", 1);
        annotations.insert("Word2", "word2", 4);
        let counter = Arc::new(CountingCelebration::default());
        let board = ReviewBoard::new(
            "Word1 Word2 Word3.\nWord4 Word2 .",
            ReviewMode::Word,
            annotations,
            BoardOptions {
                celebration: counter.clone(),
                ..BoardOptions::default()
            },
        );
        (board, counter)
    }

    fn celebrations(counter: &CountingCelebration) -> usize {
        counter.0.load(Ordering::SeqCst)
    }

    #[test]
    fn toggling_a_change_marks_it_correct_from_any_state() {
        let (mut board, _) = word_board();
        assert_eq!(board.toggle(1), Toggle::Found);
        assert_eq!(board.status(1), Some(ReviewStatus::Correct));
        assert_eq!(board.explanation(), Some(1));
        board.decline(1);
        assert_eq!(board.toggle(1), Toggle::Found);
        assert_eq!(board.status(1), Some(ReviewStatus::Correct));
    }

    #[test]
    fn misses_clear_after_the_delay() {
        let (mut board, _) = word_board();
        let start = Instant::now();
        let Toggle::Missed(ticket) = board.toggle_at(0, start) else {
            panic!("index 0 is not annotated");
        };
        assert_eq!(board.status(0), Some(ReviewStatus::Incorrect));
        assert!(board.tick(start + Duration::from_millis(999)).is_empty());
        assert_eq!(board.status(0), Some(ReviewStatus::Incorrect));
        assert_eq!(board.tick(start + CLEAR_DELAY), vec![0]);
        assert_eq!(board.status(0), None);
        assert!(!board.expire(ticket), "second expiry is a no-op");
    }

    #[test]
    fn later_state_change_preempts_a_pending_clear() {
        let (mut board, _) = word_board();
        let start = Instant::now();
        let Toggle::Missed(first) = board.toggle_at(3, start) else {
            panic!("index 3 is not annotated");
        };
        board.accept(3);
        assert!(!board.expire(first));
        assert_eq!(board.status(3), Some(ReviewStatus::Accepted));

        let Toggle::Missed(stale) = board.toggle_at(0, start) else {
            panic!("index 0 is not annotated");
        };
        let Toggle::Missed(fresh) = board.toggle_at(0, start + Duration::from_millis(600)) else {
            panic!("index 0 is not annotated");
        };
        assert!(!board.expire(stale), "older miss must not clear the newer one");
        assert_eq!(board.status(0), Some(ReviewStatus::Incorrect));
        assert!(board.expire(fresh));
        assert_eq!(board.status(0), None);
    }

    #[test]
    fn tickets_from_a_replaced_board_are_stale() {
        let (mut old, _) = word_board();
        let Toggle::Missed(ticket) = old.toggle(0) else {
            panic!("index 0 is not annotated");
        };
        let mut replacement = old.remodeled(ReviewMode::Word);
        let _ = replacement.toggle(0);
        assert!(!replacement.expire(ticket));
        assert_eq!(replacement.status(0), Some(ReviewStatus::Incorrect));
    }

    #[test]
    fn accept_and_decline_are_idempotent_and_close_the_explanation() {
        let (mut board, _) = word_board();
        board.toggle(4);
        assert_eq!(board.explanation(), Some(4));
        board.accept(4);
        board.accept(4);
        assert_eq!(board.status(4), Some(ReviewStatus::Accepted));
        assert_eq!(board.explanation(), None);
        board.toggle(1);
        board.decline(1);
        board.decline(1);
        assert_eq!(board.status(1), Some(ReviewStatus::Declined));
        assert_eq!(board.explanation(), None);
    }

    #[test]
    fn completion_fires_exactly_once() {
        let (mut board, counter) = word_board();
        board.toggle(1);
        board.accept(1);
        assert!(!board.is_complete());
        board.toggle(4);
        board.decline(4);
        assert!(board.is_complete());
        assert_eq!(celebrations(&counter), 1);

        board.toggle(0);
        board.toggle(2);
        board.toggle(1);
        board.accept(1);
        assert!(board.is_complete());
        assert_eq!(celebrations(&counter), 1);
    }

    #[test]
    fn reveal_all_then_resolving_completes() {
        let (mut board, counter) = word_board();
        board.accept(1);
        assert_eq!(board.reveal_all(), 1);
        assert_eq!(board.status(1), Some(ReviewStatus::Accepted));
        assert_eq!(board.status(4), Some(ReviewStatus::Correct));
        for index in board.annotated().clone() {
            board.decline(index);
        }
        assert!(board.is_complete());
        assert_eq!(celebrations(&counter), 1);
    }

    #[test]
    fn reveal_next_walks_unresolved_changes_in_order() {
        let (mut board, _) = word_board();
        assert_eq!(board.reveal_next(), Some(1));
        assert_eq!(board.explanation(), Some(1));
        assert_eq!(board.reveal_next(), Some(1), "found but unresolved stays first");
        board.accept(1);
        assert_eq!(board.reveal_next(), Some(4));
        board.decline(4);
        assert_eq!(board.reveal_next(), None);
        assert_eq!(board.remaining(), 0);
    }

    #[test]
    fn sentence_mode_review() {
        let mut annotations = AnnotationMap::new();
        annotations.insert("Sentence 2.", "sentenc 2", 1);
        let mut board = ReviewBoard::new(
            "Sentence 1. Sentence 2.",
            ReviewMode::Sentence,
            annotations,
            BoardOptions::default(),
        );
        let start = Instant::now();
        assert_eq!(board.toggle_at(1, start), Toggle::Found);
        assert_eq!(board.status(1), Some(ReviewStatus::Correct));
        assert!(matches!(board.toggle_at(0, start), Toggle::Missed(_)));
        assert_eq!(board.status(0), Some(ReviewStatus::Incorrect));
        board.tick(start + Duration::from_millis(1000));
        assert_eq!(board.status(0), None);
        assert_eq!(board.explanation_text(1), "Explanation for this sentence");
    }

    #[test]
    fn empty_annotations_follow_the_policy() {
        let counter = Arc::new(CountingCelebration::default());
        let complete = ReviewBoard::new(
            "Nothing changed here.",
            ReviewMode::Word,
            AnnotationMap::new(),
            BoardOptions {
                celebration: counter.clone(),
                ..BoardOptions::default()
            },
        );
        assert!(complete.is_complete());
        assert_eq!(celebrations(&counter), 1);

        let skipped = ReviewBoard::new(
            "Nothing changed here.",
            ReviewMode::Word,
            AnnotationMap::new(),
            BoardOptions {
                empty_annotations: EmptyAnnotationPolicy::SkipGame,
                celebration: counter.clone(),
            },
        );
        assert!(!skipped.is_complete());
        assert!(skipped.is_skipped());
        assert!(skipped.can_submit());
        assert_eq!(celebrations(&counter), 1);
    }

    #[test]
    fn resolving_unannotated_indices_does_not_count() {
        let (mut board, _) = word_board();
        board.accept(0);
        board.accept(2);
        assert_eq!(board.resolved_count(), 0);
        assert!(!board.is_complete());
    }

    #[test]
    fn highlight_classes_follow_status() {
        assert_eq!(Highlight::for_status(None).css_class(), "mark-none");
        assert_eq!(
            Highlight::for_status(Some(ReviewStatus::Declined)),
            Highlight::Caution
        );
        assert_eq!(ReviewStatus::Accepted.highlight().css_class(), "mark-success");
        assert_eq!(
            "skip".parse::<EmptyAnnotationPolicy>(),
            Ok(EmptyAnnotationPolicy::SkipGame)
        );
    }
}
