use crate::align::{AnnotationMap, ReviewMode};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeSet;

pub const DEMO_RECIPE: &str =
    "This is an example improved recipe. Click on the words you think are new!";

static DEMO_ANNOTATIONS: Lazy<AnnotationMap> = Lazy::new(|| {
    let mut map = AnnotationMap::new();
    map.insert("This", "th", 0);
    map.insert("an", "an", 2);
    map.insert("words", "word", 9);
    map
});

/// Recipe and annotations shown while the tour walks through a review.
pub fn demo_recipe() -> (&'static str, AnnotationMap) {
    (DEMO_RECIPE, DEMO_ANNOTATIONS.clone())
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetId {
    RecipeForm,
    ImprovementLevel,
    SubmitRecipe,
    ImprovedRecipeWrapper,
    RevealNextChange,
    RevealAllChanges,
    FirstWord,
    FirstWordPop,
    AllWordWrapper,
    ResultWrapper,
}

impl TargetId {
    pub fn dom_id(&self) -> &'static str {
        match self {
            TargetId::RecipeForm => "recipe-form",
            TargetId::ImprovementLevel => "improvement-level",
            TargetId::SubmitRecipe => "submit-recipe",
            TargetId::ImprovedRecipeWrapper => "improved-recipe-wrapper",
            TargetId::RevealNextChange => "reveal-next-change",
            TargetId::RevealAllChanges => "reveal-all-changes",
            TargetId::FirstWord => "first-word",
            TargetId::FirstWordPop => "first-word-pop",
            TargetId::AllWordWrapper => "all-word-wrapper",
            TargetId::ResultWrapper => "result-wrapper",
        }
    }
}

/// Targets present on the page being rendered.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    present: BTreeSet<TargetId>,
}

impl TargetRegistry {
    pub fn register(&mut self, target: TargetId) -> &'static str {
        self.present.insert(target);
        target.dom_id()
    }

    pub fn resolve(&self, target: TargetId) -> Option<&'static str> {
        self.present.contains(&target).then(|| target.dom_id())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TourStage {
    #[default]
    NotStarted,
    Form,
    MainPage,
    Review,
    Done,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TourScript {
    Form,
    MainPage,
    Review,
}

impl TourScript {
    pub fn steps(self, mode: ReviewMode) -> Vec<TourStep> {
        match self {
            TourScript::Form => form_tour(),
            TourScript::MainPage => main_page_tour(),
            TourScript::Review => review_tour(mode),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(tag = "action", content = "arg", rename_all = "snake_case")]
pub enum TourAction {
    Toggle(usize),
    Accept(usize),
    Decline(usize),
    LoadDemo,
    Begin(TourScript),
    SetStage(TourStage),
    FinishReview,
}

#[derive(Debug, Clone, Serialize)]
pub struct TourStep {
    pub title: String,
    pub content: String,
    pub target: TargetId,
    pub on_enter: Vec<TourAction>,
    /// Applied when the user presses "next" on this step.
    pub on_exit: Vec<TourAction>,
    /// Applied when the user closes the tour on this step.
    pub on_close: Vec<TourAction>,
    pub prevent_close: bool,
}

impl TourStep {
    fn new(title: &str, content: &str, target: TargetId) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
            target,
            on_enter: Vec::new(),
            on_exit: Vec::new(),
            on_close: Vec::new(),
            prevent_close: false,
        }
    }

    fn entering(mut self, actions: &[TourAction]) -> Self {
        self.on_enter = actions.to_vec();
        self
    }

    fn exiting(mut self, actions: &[TourAction]) -> Self {
        self.on_exit = actions.to_vec();
        self
    }

    fn closing(mut self, actions: &[TourAction]) -> Self {
        self.on_close = actions.to_vec();
        self
    }

    fn sticky(mut self) -> Self {
        self.prevent_close = true;
        self
    }
}

pub fn form_tour() -> Vec<TourStep> {
    let submit_demo = [TourAction::LoadDemo, TourAction::Begin(TourScript::MainPage)];
    vec![
        TourStep::new(
            "Your recipe!",
            "Write your recipe here! Any recipe is fine, but make sure it's at least 25 characters long!",
            TargetId::RecipeForm,
        )
        .entering(&[TourAction::SetStage(TourStage::Form)])
        .closing(&submit_demo),
        TourStep::new(
            "Choose your improvement level!",
            "After you have finished writing your recipe, choose the improvement level you want to see!",
            TargetId::ImprovementLevel,
        )
        .closing(&submit_demo),
        TourStep::new(
            "Submit!",
            "Send your recipe to the AI chef by clicking here!",
            TargetId::SubmitRecipe,
        )
        .exiting(&submit_demo)
        .closing(&submit_demo),
    ]
}

pub fn main_page_tour() -> Vec<TourStep> {
    let to_review = [TourAction::Begin(TourScript::Review)];
    vec![
        TourStep::new(
            "Your improved recipe will be here!",
            "You will be asked to find out the changes either in word-scale or sentence-scale (remember you can always switch the scale from the menu!)",
            TargetId::ImprovedRecipeWrapper,
        )
        .entering(&[TourAction::SetStage(TourStage::MainPage)])
        .closing(&to_review),
        TourStep::new(
            "Reveal the changes!",
            "Click here to reveal one of the changes!",
            TargetId::RevealNextChange,
        )
        .closing(&to_review),
        TourStep::new(
            "Reveal the changes!",
            "Click here to reveal all of the changes!",
            TargetId::RevealAllChanges,
        )
        .exiting(&to_review)
        .closing(&to_review),
    ]
}

pub fn review_tour(mode: ReviewMode) -> Vec<TourStep> {
    let unit = mode.unit_label(true);
    vec![
        TourStep::new(
            "Identifying changes",
            &format!("To identify the changes we click on {unit} that we think have been changed."),
            TargetId::FirstWord,
        )
        .entering(&[TourAction::SetStage(TourStage::Review)])
        .exiting(&[TourAction::Toggle(0)])
        .sticky(),
        TourStep::new(
            "Do you like it?",
            "We'll give you some explanation on why we implemented the change and ask you if you like it.",
            TargetId::FirstWordPop,
        )
        .exiting(&[TourAction::Accept(0)])
        .sticky(),
        TourStep::new(
            "Mark ALL the changes!",
            "You have to find all the changes and mark them all!",
            TargetId::AllWordWrapper,
        )
        .exiting(&[TourAction::Decline(2), TourAction::Accept(9)])
        .sticky(),
        TourStep::new(
            "Wrapping up!",
            "After you find all the changes you'll be able to submit your results!",
            TargetId::ResultWrapper,
        )
        .exiting(&[TourAction::FinishReview])
        .closing(&[TourAction::FinishReview]),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct Tour {
    script: Option<TourScript>,
    steps: Vec<TourStep>,
    current: usize,
    open: bool,
}

impl Tour {
    /// Opens `script` at its first step and returns that step's enter actions.
    pub fn start(&mut self, script: TourScript, mode: ReviewMode) -> Vec<TourAction> {
        self.script = Some(script);
        self.steps = script.steps(mode);
        self.current = 0;
        self.open = !self.steps.is_empty();
        self.current()
            .map(|step| step.on_enter.clone())
            .unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn script(&self) -> Option<TourScript> {
        self.open.then_some(self.script).flatten()
    }

    pub fn current(&self) -> Option<&TourStep> {
        if self.open {
            self.steps.get(self.current)
        } else {
            None
        }
    }

    pub fn position(&self) -> (usize, usize) {
        (self.current + 1, self.steps.len())
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.steps.len()
    }

    pub fn next(&mut self) -> Vec<TourAction> {
        let Some(step) = self.current().cloned() else {
            return Vec::new();
        };
        let mut actions = step.on_exit;
        if self.is_last() {
            if !step.prevent_close {
                self.open = false;
            }
        } else {
            self.current += 1;
            if let Some(next) = self.steps.get(self.current) {
                actions.extend(next.on_enter.iter().copied());
            }
        }
        actions
    }

    pub fn close(&mut self) -> Vec<TourAction> {
        let Some(step) = self.current().cloned() else {
            return Vec::new();
        };
        if !step.prevent_close {
            self.open = false;
            self.current = 0;
        }
        step.on_close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{BoardOptions, ReviewBoard, ReviewStatus};

    #[test]
    fn demo_annotations_line_up_with_demo_tokens() {
        let (text, annotations) = demo_recipe();
        let board = ReviewBoard::new(text, ReviewMode::Word, annotations, BoardOptions::default());
        let annotated: Vec<_> = board
            .alignment()
            .tokens()
            .filter(|token| token.annotated)
            .map(|token| token.text.as_str())
            .collect();
        assert_eq!(annotated, vec!["This", "an", "words"]);
    }

    #[test]
    fn review_script_drives_the_demo_board_to_completion() {
        let (text, annotations) = demo_recipe();
        let mut board = ReviewBoard::new(text, ReviewMode::Word, annotations, BoardOptions::default());
        let mut tour = Tour::default();
        let mut applied = tour.start(TourScript::Review, ReviewMode::Word);
        assert_eq!(applied, vec![TourAction::SetStage(TourStage::Review)]);
        let mut finished = false;
        while tour.is_open() {
            applied = tour.next();
            for action in &applied {
                match *action {
                    TourAction::Toggle(index) => {
                        board.toggle(index);
                    }
                    TourAction::Accept(index) => board.accept(index),
                    TourAction::Decline(index) => board.decline(index),
                    TourAction::FinishReview => finished = true,
                    _ => {}
                }
            }
        }
        assert!(finished);
        assert!(board.is_complete());
        assert_eq!(board.status(2), Some(ReviewStatus::Declined));
    }

    #[test]
    fn sticky_steps_survive_close() {
        let mut tour = Tour::default();
        tour.start(TourScript::Review, ReviewMode::Word);
        assert!(tour.close().is_empty());
        assert!(tour.is_open());
        assert_eq!(tour.position(), (1, 4));
    }

    #[test]
    fn closing_the_form_tour_loads_the_demo() {
        let mut tour = Tour::default();
        tour.start(TourScript::Form, ReviewMode::Word);
        tour.next();
        let actions = tour.close();
        assert!(!tour.is_open());
        assert_eq!(
            actions,
            vec![TourAction::LoadDemo, TourAction::Begin(TourScript::MainPage)]
        );
    }

    #[test]
    fn last_step_next_closes_and_runs_exit_actions() {
        let mut tour = Tour::default();
        tour.start(TourScript::MainPage, ReviewMode::Sentence);
        tour.next();
        tour.next();
        assert!(tour.is_last());
        let actions = tour.next();
        assert!(!tour.is_open());
        assert_eq!(actions, vec![TourAction::Begin(TourScript::Review)]);
        assert!(tour.next().is_empty());
    }

    #[test]
    fn registry_only_resolves_rendered_targets() {
        let mut registry = TargetRegistry::default();
        assert_eq!(registry.register(TargetId::FirstWord), "first-word");
        assert_eq!(registry.resolve(TargetId::FirstWord), Some("first-word"));
        assert_eq!(registry.resolve(TargetId::ResultWrapper), None);
    }
}
