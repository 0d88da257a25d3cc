use serde::de::{Deserialize, Deserializer};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Indices the backend flagged as changed.
pub type AnnotatedIndexSet = BTreeSet<usize>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewMode {
    #[default]
    Word,
    Sentence,
}

impl ReviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewMode::Word => "word",
            ReviewMode::Sentence => "sentence",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ReviewMode::Word => ReviewMode::Sentence,
            ReviewMode::Sentence => ReviewMode::Word,
        }
    }

    pub fn unit_label(&self, plural: bool) -> &'static str {
        match (self, plural) {
            (ReviewMode::Word, false) => "word",
            (ReviewMode::Word, true) => "words",
            (ReviewMode::Sentence, false) => "sentence",
            (ReviewMode::Sentence, true) => "sentences",
        }
    }
}

impl fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown review mode {0:?}; expected `word` or `sentence`")]
pub struct ParseModeError(String);

impl FromStr for ReviewMode {
    type Err = ParseModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "word" => Ok(ReviewMode::Word),
            "sentence" => Ok(ReviewMode::Sentence),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Surface word → `(stemmed_form, token_index)` pairs. Malformed pairs are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnnotationMap {
    entries: BTreeMap<String, Vec<(String, usize)>>,
}

impl AnnotationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, surface: impl Into<String>, stem: impl Into<String>, index: usize) {
        self.entries
            .entry(surface.into())
            .or_default()
            .push((stem.into(), index));
    }

    pub fn from_value(value: &Value) -> Self {
        let mut map = Self::new();
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                warn!(kind = json_kind(value), "annotations payload is not an object");
            }
            return map;
        };
        for (surface, pairs) in object {
            let Some(pairs) = pairs.as_array() else {
                warn!(%surface, "annotation entry is not a list; ignoring");
                continue;
            };
            for pair in pairs {
                match parse_pair(pair) {
                    Some((stem, index)) => map.insert(surface.as_str(), stem, index),
                    None => warn!(%surface, pair = %pair, "malformed annotation pair; ignoring"),
                }
            }
        }
        map
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_value(&value))
    }

    pub fn annotated_indices(&self) -> AnnotatedIndexSet {
        self.entries
            .values()
            .flat_map(|pairs| pairs.iter().map(|(_, index)| *index))
            .collect()
    }

    pub fn lookup(&self, index: usize) -> Option<(&str, &str)> {
        self.entries.iter().find_map(|(surface, pairs)| {
            pairs
                .iter()
                .find(|(_, candidate)| *candidate == index)
                .map(|(stem, _)| (surface.as_str(), stem.as_str()))
        })
    }

    pub fn pairs(&self, surface: &str) -> &[(String, usize)] {
        self.entries
            .get(surface)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[(String, usize)])> + '_ {
        self.entries
            .iter()
            .map(|(surface, pairs)| (surface.as_str(), pairs.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for AnnotationMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

fn parse_pair(pair: &Value) -> Option<(String, usize)> {
    let items = pair.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let stem = items[0].as_str()?;
    let index = items[1].as_u64()?;
    Some((stem.to_string(), usize::try_from(index).ok()?))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub text: String,
    pub index: usize,
    /// Only consulted by tour and reveal logic; never rendered as a hint.
    pub annotated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unit {
    Token(Token),
    LineBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alignment {
    mode: ReviewMode,
    units: Vec<Unit>,
    token_count: usize,
}

impl Alignment {
    pub fn mode(&self) -> ReviewMode {
        self.mode
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> + '_ {
        self.units.iter().filter_map(|unit| match unit {
            Unit::Token(token) => Some(token),
            Unit::LineBreak => None,
        })
    }

    pub fn token(&self, index: usize) -> Option<&Token> {
        self.tokens().find(|token| token.index == index)
    }

    /// Groups tokens by rendered line; blank lines come back as empty rows.
    pub fn lines(&self) -> Vec<Vec<&Token>> {
        let mut lines = Vec::new();
        let mut current = Vec::new();
        for unit in &self.units {
            match unit {
                Unit::Token(token) => current.push(token),
                Unit::LineBreak => lines.push(std::mem::take(&mut current)),
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn is_empty(&self) -> bool {
        self.token_count == 0
    }
}

/// Splits `text` into review units for `mode`, marking members of `annotated`.
pub fn align(text: &str, mode: ReviewMode, annotated: &AnnotatedIndexSet) -> Alignment {
    let mut units = Vec::new();
    let mut next_index = 0usize;
    if text.is_empty() {
        return Alignment {
            mode,
            units,
            token_count: 0,
        };
    }
    for line in text.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            units.push(Unit::LineBreak);
            continue;
        }
        let pieces = match mode {
            ReviewMode::Word => line.split_whitespace().collect::<Vec<_>>(),
            ReviewMode::Sentence => split_line_sentences(line),
        };
        for piece in pieces {
            units.push(Unit::Token(Token {
                text: piece.to_string(),
                index: next_index,
                annotated: annotated.contains(&next_index),
            }));
            next_index += 1;
        }
        units.push(Unit::LineBreak);
    }
    Alignment {
        mode,
        units,
        token_count: next_index,
    }
}

/// The ordered sentence list of `text`, as indexed in sentence mode.
pub fn sentences(text: &str) -> Vec<String> {
    text.split('\n')
        .flat_map(|line| split_line_sentences(line.trim_end_matches('\r')))
        .map(str::to_string)
        .collect()
}

fn is_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

// A run of terminators stays with its sentence; text after the last
// terminator on a line is a sentence of its own.
fn split_line_sentences(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut chars = line.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if !is_terminal(ch) {
            continue;
        }
        while let Some(&(_, next)) = chars.peek() {
            if !is_terminal(next) {
                break;
            }
            chars.next();
        }
        let end = chars.peek().map(|&(idx, _)| idx).unwrap_or(line.len());
        push_trimmed(&mut out, &line[start..end]);
        start = end;
    }
    push_trimmed(&mut out, &line[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn indices_of(alignment: &Alignment, text: &str) -> Vec<usize> {
        alignment
            .tokens()
            .filter(|token| token.text == text)
            .map(|token| token.index)
            .collect()
    }

    #[test]
    fn word_mode_assigns_sequential_indices_across_lines() {
        let mut annotations = AnnotationMap::new();
        annotations.insert("Word2", "word2", 1);
        annotations.insert("Word2", "word2", 4);
        let alignment = align(
            "Word1 Word2 Word3.\nWord4 Word2 .",
            ReviewMode::Word,
            &annotations.annotated_indices(),
        );
        assert_eq!(alignment.token_count(), 6);
        assert_eq!(indices_of(&alignment, "Word2"), vec![1, 4]);
        assert_eq!(indices_of(&alignment, "."), vec![5]);
        let units = alignment.units();
        assert_eq!(units[3], Unit::LineBreak);
        assert_eq!(units.last(), Some(&Unit::LineBreak));
        let annotated: Vec<_> = alignment
            .tokens()
            .filter(|token| token.annotated)
            .map(|token| token.index)
            .collect();
        assert_eq!(annotated, vec![1, 4]);
    }

    #[test]
    fn blank_lines_become_breaks_not_tokens() {
        let alignment = align("Mix flour\n\n   \nBake", ReviewMode::Word, &BTreeSet::new());
        assert_eq!(alignment.token_count(), 3);
        let breaks = alignment
            .units()
            .iter()
            .filter(|unit| matches!(unit, Unit::LineBreak))
            .count();
        assert_eq!(breaks, 4);
        let lines = alignment.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].is_empty());
        assert_eq!(lines[3][0].text, "Bake");
    }

    #[test]
    fn empty_text_has_no_units() {
        let alignment = align("", ReviewMode::Sentence, &BTreeSet::new());
        assert!(alignment.is_empty());
        assert!(alignment.units().is_empty());
    }

    #[test]
    fn indices_are_contiguous_in_both_modes() {
        let texts = [
            "Preheat the oven. Grease a pan!\n\nWhisk eggs? Fold gently\nServe.",
            "one\ntwo three\n\n\nfour... five!? six",
            "   leading spaces and trailing   \n\t tabbed line",
        ];
        for text in texts {
            for mode in [ReviewMode::Word, ReviewMode::Sentence] {
                let alignment = align(text, mode, &BTreeSet::new());
                let indices: Vec<_> = alignment.tokens().map(|token| token.index).collect();
                let expected: Vec<_> = (0..alignment.token_count()).collect();
                assert_eq!(indices, expected, "{mode} mode on {text:?}");
            }
        }
    }

    #[test]
    fn sentence_mode_keeps_terminal_punctuation() {
        let alignment = align("Sentence 1. Sentence 2.", ReviewMode::Sentence, &BTreeSet::new());
        let texts: Vec<_> = alignment.tokens().map(|token| token.text.as_str()).collect();
        assert_eq!(texts, vec!["Sentence 1.", "Sentence 2."]);
    }

    #[test]
    fn sentence_mode_handles_runs_and_trailing_fragments() {
        assert_eq!(
            split_line_sentences("Wait... Really?! Yes"),
            vec!["Wait...", "Really?!", "Yes"]
        );
        assert_eq!(
            split_line_sentences("no terminator here"),
            vec!["no terminator here"]
        );
    }

    #[test]
    fn sentence_list_matches_sentence_tokens() {
        let text = "Chop onions. Fry them!\n\nAdd salt? Done";
        let alignment = align(text, ReviewMode::Sentence, &BTreeSet::new());
        let from_tokens: Vec<_> = alignment.tokens().map(|token| token.text.clone()).collect();
        assert_eq!(sentences(text), from_tokens);
        assert_eq!(from_tokens.len(), 4);
    }

    #[test]
    fn malformed_annotation_pairs_are_dropped() {
        let value = json!({
            "Oil": [["oil", 10], ["oil", -1], ["oil"], "oil", [3, 4]],
            "flour": [["flour", 42]],
            "broken": "not-a-list"
        });
        let map = AnnotationMap::from_value(&value);
        let indices: Vec<_> = map.annotated_indices().into_iter().collect();
        assert_eq!(indices, vec![10, 42]);
        assert_eq!(map.lookup(42), Some(("flour", "flour")));
        assert!(map.pairs("broken").is_empty());
    }

    #[test]
    fn annotations_deserialize_leniently() {
        let map: AnnotationMap =
            serde_json::from_str(r#"{"Heat": [["heat", 45]], "pan": [["pan", "x"]]}"#).unwrap();
        assert_eq!(map.annotated_indices().len(), 1);
        let round: Value = serde_json::to_value(&map).unwrap();
        assert_eq!(round, json!({ "Heat": [["heat", 45]] }));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Sentence".parse::<ReviewMode>().unwrap(), ReviewMode::Sentence);
        assert!("paragraph".parse::<ReviewMode>().is_err());
        assert_eq!(ReviewMode::Word.toggled(), ReviewMode::Sentence);
    }
}
