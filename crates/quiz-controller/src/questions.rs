//! Question data and the in-memory question bank.
//!
//! The bank is loaded once from JSON shaped
//! `{category: {difficulty: [{question, options, correct_answer, explanation}]}}`
//! and shared read-only between rooms. Each room receives its own selection,
//! ordered according to a [`DifficultyMode`].

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Number of answer options carried by every question.
pub const OPTION_COUNT: usize = 4;

/// First id handed out by [`QuestionBank::select`].
pub const FIRST_QUESTION_ID: u64 = 1;

/// Difficulty tag of a question. Unknown tags are tolerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    #[default]
    #[serde(other)]
    Unrated,
}

impl Difficulty {
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "easy" => Difficulty::Easy,
            "medium" => Difficulty::Medium,
            "hard" => Difficulty::Hard,
            _ => Difficulty::Unrated,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Unrated => "unrated",
        }
    }
}

/// An immutable quiz question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: [String; OPTION_COUNT],
    /// Index into `options`, always below [`OPTION_COUNT`].
    pub correct_index: usize,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub category: String,
}

impl Question {
    #[must_use]
    pub fn is_correct(&self, answer: usize) -> bool {
        answer == self.correct_index
    }
}

/// How a room's questions are drawn from the bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DifficultyMode {
    /// Roughly a third each of easy, medium and hard, ordered easy to hard.
    #[default]
    Progressive,
    /// Only questions at one difficulty.
    Fixed(Difficulty),
    /// Any difficulty, shuffled.
    Mixed,
}

impl DifficultyMode {
    /// Parse a client-supplied mode. Anything unrecognised plays mixed.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return DifficultyMode::Progressive;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "progressive" => DifficultyMode::Progressive,
            "easy" => DifficultyMode::Fixed(Difficulty::Easy),
            "medium" => DifficultyMode::Fixed(Difficulty::Medium),
            "hard" => DifficultyMode::Fixed(Difficulty::Hard),
            _ => DifficultyMode::Mixed,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyMode::Progressive => "progressive",
            DifficultyMode::Fixed(difficulty) => difficulty.as_str(),
            DifficultyMode::Mixed => "mixed",
        }
    }
}

/// Split a comma-separated category list, dropping blanks.
///
/// Returns `None` when no category survives, meaning "all categories".
#[must_use]
pub fn parse_category_filter(raw: Option<&str>) -> Option<Vec<String>> {
    let categories: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string)
        .collect();

    if categories.is_empty() {
        None
    } else {
        Some(categories)
    }
}

/// Questions chosen for one room with their ids, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
    pub question_ids: Vec<u64>,
}

#[derive(Debug, Error)]
pub enum QuestionBankError {
    #[error("Failed to read question bank: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse question bank: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid question in {category}/{difficulty}: {reason}")]
    InvalidQuestion {
        category: String,
        difficulty: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    correct_answer: usize,
    #[serde(default)]
    explanation: String,
}

type RawBank = BTreeMap<String, BTreeMap<String, Vec<RawQuestion>>>;

/// Read-only pool of questions shared by every room.
#[derive(Debug, Default)]
pub struct QuestionBank {
    questions: Vec<Question>,
    next_id: AtomicU64,
}

impl QuestionBank {
    /// Build a bank from already-validated questions.
    #[must_use]
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            next_id: AtomicU64::new(FIRST_QUESTION_ID),
        }
    }

    /// Bank with no questions. Rooms created from it finish immediately.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load a bank from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, QuestionBankError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load a bank from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, QuestionBankError> {
        let raw: RawBank = serde_json::from_str(json)?;
        let mut questions = Vec::new();

        for (category, by_difficulty) in raw {
            for (difficulty_label, entries) in by_difficulty {
                let difficulty = Difficulty::from_label(&difficulty_label);
                for entry in entries {
                    let invalid = |reason: String| QuestionBankError::InvalidQuestion {
                        category: category.clone(),
                        difficulty: difficulty_label.clone(),
                        reason,
                    };

                    let option_count = entry.options.len();
                    let options: [String; OPTION_COUNT] =
                        entry.options.try_into().map_err(|_| {
                            invalid(format!("expected {OPTION_COUNT} options, got {option_count}"))
                        })?;

                    if entry.correct_answer >= OPTION_COUNT {
                        return Err(invalid(format!(
                            "correct_answer {} out of range",
                            entry.correct_answer
                        )));
                    }

                    questions.push(Question {
                        text: entry.question,
                        options,
                        correct_index: entry.correct_answer,
                        explanation: entry.explanation,
                        difficulty,
                        category: category.clone(),
                    });
                }
            }
        }

        debug!(
            target: "qc.questions",
            question_count = questions.len(),
            "Question bank loaded"
        );

        Ok(Self::new(questions))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Distinct category names, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> =
            self.questions.iter().map(|q| q.category.clone()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Select up to `count` questions using the thread-local RNG.
    pub fn select(
        &self,
        count: usize,
        categories: Option<&[String]>,
        mode: DifficultyMode,
    ) -> QuestionSet {
        self.select_with_rng(count, categories, mode, &mut rand::thread_rng())
    }

    /// Select up to `count` questions and assign them fresh sequential ids.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        count: usize,
        categories: Option<&[String]>,
        mode: DifficultyMode,
        rng: &mut R,
    ) -> QuestionSet {
        let pool: Vec<&Question> = self
            .questions
            .iter()
            .filter(|q| categories.map_or(true, |cats| cats.iter().any(|c| *c == q.category)))
            .collect();

        let chosen: Vec<&Question> = match mode {
            DifficultyMode::Progressive => progressive(pool, count, rng),
            DifficultyMode::Fixed(difficulty) => {
                let mut matching: Vec<&Question> =
                    pool.into_iter().filter(|q| q.difficulty == difficulty).collect();
                matching.shuffle(rng);
                matching.truncate(count);
                matching
            }
            DifficultyMode::Mixed => {
                let mut all = pool;
                all.shuffle(rng);
                all.truncate(count);
                all
            }
        };

        let questions: Vec<Question> = chosen.into_iter().cloned().collect();
        let first = self
            .next_id
            .fetch_add(questions.len() as u64, Ordering::Relaxed);
        let question_ids = (first..).take(questions.len()).collect();

        QuestionSet {
            questions,
            question_ids,
        }
    }
}

/// Thirds by difficulty, topped up from leftovers, ordered easy to hard.
fn progressive<'a, R: Rng + ?Sized>(
    pool: Vec<&'a Question>,
    count: usize,
    rng: &mut R,
) -> Vec<&'a Question> {
    let mut tiers: [Vec<&'a Question>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for question in pool {
        // Unrated questions are only reachable through the top-up.
        let tier = match question.difficulty {
            Difficulty::Easy => tiers.get_mut(0),
            Difficulty::Medium => tiers.get_mut(1),
            Difficulty::Hard | Difficulty::Unrated => tiers.get_mut(2),
        };
        if let Some(tier) = tier {
            tier.push(question);
        }
    }
    for tier in &mut tiers {
        tier.shuffle(rng);
    }

    let third = count / 3;
    let quotas = [third, third, count - third * 2];

    let mut selected: [Vec<&'a Question>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut leftovers: Vec<(usize, &'a Question)> = Vec::new();
    for (tier_index, (mut tier, quota)) in tiers.into_iter().zip(quotas).enumerate() {
        let rest = tier.split_off(quota.min(tier.len()));
        leftovers.extend(rest.into_iter().map(|q| (tier_index, q)));
        if let Some(slot) = selected.get_mut(tier_index) {
            *slot = tier;
        }
    }

    let taken: usize = selected.iter().map(Vec::len).sum();
    let remaining = count.saturating_sub(taken);
    if remaining > 0 {
        leftovers.shuffle(rng);
        for (tier_index, question) in leftovers.into_iter().take(remaining) {
            if let Some(slot) = selected.get_mut(tier_index) {
                slot.push(question);
            }
        }
    }

    selected.into_iter().flatten().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const SAMPLE: &str = r#"{
        "science": {
            "easy": [
                {"question": "H2O is?", "options": ["Water", "Salt", "Air", "Gold"], "correct_answer": 0, "explanation": "Two hydrogens, one oxygen."},
                {"question": "Closest star?", "options": ["Vega", "Sun", "Sirius", "Rigel"], "correct_answer": 1, "explanation": "The Sun."}
            ],
            "medium": [
                {"question": "Speed of light?", "options": ["3e8 m/s", "3e6 m/s", "1e8 m/s", "9e8 m/s"], "correct_answer": 0, "explanation": "About 300,000 km/s."}
            ],
            "hard": [
                {"question": "Planck constant unit?", "options": ["J", "J*s", "W", "N"], "correct_answer": 1, "explanation": "Joule seconds."}
            ]
        },
        "history": {
            "easy": [
                {"question": "First moon landing?", "options": ["1959", "1969", "1979", "1989"], "correct_answer": 1, "explanation": "Apollo 11."}
            ],
            "hard": [
                {"question": "Treaty of Westphalia?", "options": ["1648", "1748", "1548", "1848"], "correct_answer": 0, "explanation": "Ended the Thirty Years' War."}
            ],
            "legendary": [
                {"question": "Odd tier?", "options": ["a", "b", "c", "d"], "correct_answer": 3, "explanation": ""}
            ]
        }
    }"#;

    fn bank() -> QuestionBank {
        QuestionBank::from_json(SAMPLE).unwrap()
    }

    #[test]
    fn test_from_json_flattens_categories_and_difficulties() {
        let bank = bank();
        assert_eq!(bank.len(), 7);
        assert_eq!(bank.categories(), vec!["history", "science"]);

        let odd = bank
            .questions
            .iter()
            .find(|q| q.text == "Odd tier?")
            .unwrap();
        assert_eq!(odd.difficulty, Difficulty::Unrated);
        assert_eq!(odd.category, "history");
    }

    #[test]
    fn test_from_json_rejects_out_of_range_answer() {
        let json = r#"{"science": {"easy": [
            {"question": "q", "options": ["a","b","c","d"], "correct_answer": 4, "explanation": ""}
        ]}}"#;
        let result = QuestionBank::from_json(json);
        assert!(matches!(
            result,
            Err(QuestionBankError::InvalidQuestion { .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_wrong_option_count() {
        let json = r#"{"science": {"easy": [
            {"question": "q", "options": ["a","b","c"], "correct_answer": 0, "explanation": ""}
        ]}}"#;
        assert!(matches!(
            QuestionBank::from_json(json),
            Err(QuestionBankError::InvalidQuestion { .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_malformed_document() {
        assert!(matches!(
            QuestionBank::from_json("[1, 2, 3]"),
            Err(QuestionBankError::Parse(_))
        ));
    }

    #[test]
    fn test_progressive_orders_easy_to_hard() {
        let bank = bank();
        let mut rng = StdRng::seed_from_u64(7);
        let set = bank.select_with_rng(6, None, DifficultyMode::Progressive, &mut rng);

        assert_eq!(set.questions.len(), 6);
        let ranks: Vec<u8> = set
            .questions
            .iter()
            .map(|q| match q.difficulty {
                Difficulty::Easy => 0,
                Difficulty::Medium => 1,
                Difficulty::Hard | Difficulty::Unrated => 2,
            })
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_progressive_tops_up_short_tiers() {
        let bank = bank();
        let mut rng = StdRng::seed_from_u64(1);
        // Only one medium question exists, so the medium quota is short.
        let set = bank.select_with_rng(6, None, DifficultyMode::Progressive, &mut rng);
        assert_eq!(set.questions.len(), 6);
    }

    #[test]
    fn test_fixed_mode_only_returns_that_difficulty() {
        let bank = bank();
        let mut rng = StdRng::seed_from_u64(3);
        let set = bank.select_with_rng(
            10,
            None,
            DifficultyMode::Fixed(Difficulty::Hard),
            &mut rng,
        );
        assert_eq!(set.questions.len(), 2);
        assert!(set
            .questions
            .iter()
            .all(|q| q.difficulty == Difficulty::Hard));
    }

    #[test]
    fn test_category_filter_limits_pool() {
        let bank = bank();
        let mut rng = StdRng::seed_from_u64(11);
        let filter = parse_category_filter(Some(" history , ,")).unwrap();
        let set = bank.select_with_rng(10, Some(&filter), DifficultyMode::Mixed, &mut rng);
        assert_eq!(set.questions.len(), 3);
        assert!(set.questions.iter().all(|q| q.category == "history"));
    }

    #[test]
    fn test_question_ids_are_sequential_across_selections() {
        let bank = bank();
        let mut rng = StdRng::seed_from_u64(5);
        let first = bank.select_with_rng(2, None, DifficultyMode::Mixed, &mut rng);
        let second = bank.select_with_rng(3, None, DifficultyMode::Mixed, &mut rng);

        assert_eq!(first.question_ids, vec![1, 2]);
        assert_eq!(second.question_ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_empty_bank_selects_nothing() {
        let set = QuestionBank::empty().select(10, None, DifficultyMode::Progressive);
        assert!(set.questions.is_empty());
        assert!(set.question_ids.is_empty());
    }

    #[test]
    fn test_difficulty_mode_parse() {
        assert_eq!(DifficultyMode::parse(None), DifficultyMode::Progressive);
        assert_eq!(
            DifficultyMode::parse(Some("Progressive")),
            DifficultyMode::Progressive
        );
        assert_eq!(
            DifficultyMode::parse(Some("hard")),
            DifficultyMode::Fixed(Difficulty::Hard)
        );
        assert_eq!(DifficultyMode::parse(Some("mixed")), DifficultyMode::Mixed);
        assert_eq!(DifficultyMode::parse(Some("chaos")), DifficultyMode::Mixed);
    }

    #[test]
    fn test_parse_category_filter_blank_means_all() {
        assert_eq!(parse_category_filter(None), None);
        assert_eq!(parse_category_filter(Some(" , ")), None);
        assert_eq!(
            parse_category_filter(Some("science,history")),
            Some(vec!["science".to_string(), "history".to_string()])
        );
    }

    #[test]
    fn test_bundled_bank_loads() {
        let bank =
            QuestionBank::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/data/questions.json"))
                .unwrap();
        assert_eq!(bank.len(), 12);
        assert_eq!(bank.categories(), vec!["geography", "history", "science"]);

        let set = bank.select(9, None, DifficultyMode::Progressive);
        assert_eq!(set.questions.len(), 9);
    }
}
