//! Pre-configured test data.

use std::time::Duration;

use quiz_controller::actors::{ActorMetrics, SessionRegistryHandle};
use quiz_controller::config::SessionTimings;
use quiz_controller::questions::{Difficulty, Question};

/// Builder for a single question.
#[derive(Debug, Clone)]
pub struct TestQuestion {
    text: String,
    correct_index: usize,
    difficulty: Difficulty,
    category: String,
}

impl TestQuestion {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            correct_index: 0,
            difficulty: Difficulty::Easy,
            category: "general".to_string(),
        }
    }

    #[must_use]
    pub fn correct(mut self, index: usize) -> Self {
        self.correct_index = index;
        self
    }

    #[must_use]
    pub fn difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn build(self) -> Question {
        Question {
            options: [
                format!("{} / A", self.text),
                format!("{} / B", self.text),
                format!("{} / C", self.text),
                format!("{} / D", self.text),
            ],
            explanation: format!("Answer {} is right", self.correct_index),
            text: self.text,
            correct_index: self.correct_index,
            difficulty: self.difficulty,
            category: self.category,
        }
    }
}

/// `n` easy questions whose correct answer is always option 0.
#[must_use]
pub fn sample_questions(n: usize) -> Vec<Question> {
    (1..=n)
        .map(|i| TestQuestion::new(format!("Question {i}")).build())
        .collect()
}

/// Default timings: 1s tick, 3-2-1 countdown, 15 tick limit, 4 tick settle,
/// 60 tick grace. Meant for `start_paused` tests.
#[must_use]
pub fn test_timings() -> SessionTimings {
    SessionTimings {
        tick: Duration::from_secs(1),
        ..SessionTimings::default()
    }
}

/// Registry with default timings and fresh metrics.
#[must_use]
pub fn test_registry() -> SessionRegistryHandle {
    SessionRegistryHandle::new(
        format!("qc-test-{}", uuid::Uuid::new_v4().simple()),
        test_timings(),
        ActorMetrics::new(),
    )
}
