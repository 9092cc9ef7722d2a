//! Points and streak bookkeeping.
//!
//! A correct answer earns the difficulty base plus a streak bonus of two
//! points per consecutive prior correct answer, capped at five. A wrong or
//! missing answer earns nothing and resets the streak.

use crate::questions::Difficulty;

/// Maximum number of prior consecutive correct answers that earn a bonus.
pub const STREAK_BONUS_CAP: u32 = 5;

/// Bonus points per counted streak step.
pub const STREAK_BONUS_STEP: u32 = 2;

/// Base points for a correct answer at `difficulty`.
#[must_use]
pub fn base_points(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Easy | Difficulty::Unrated => 10,
        Difficulty::Medium => 20,
        Difficulty::Hard => 30,
    }
}

/// Points for a correct answer given the streak held before answering.
#[must_use]
pub fn score(difficulty: Difficulty, pre_answer_streak: u32) -> u32 {
    base_points(difficulty) + pre_answer_streak.min(STREAK_BONUS_CAP) * STREAK_BONUS_STEP
}

/// Running tally for one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreCard {
    pub score: u32,
    pub correct_count: u32,
    pub streak: u32,
    pub best_streak: u32,
}

impl ScoreCard {
    /// Record one round's outcome and return the points earned.
    pub fn apply(&mut self, correct: bool, difficulty: Difficulty) -> u32 {
        if !correct {
            self.streak = 0;
            return 0;
        }

        let points = score(difficulty, self.streak);
        self.score = self.score.saturating_add(points);
        self.correct_count = self.correct_count.saturating_add(1);
        self.streak = self.streak.saturating_add(1);
        self.best_streak = self.best_streak.max(self.streak);
        points
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_points_per_difficulty() {
        assert_eq!(score(Difficulty::Easy, 0), 10);
        assert_eq!(score(Difficulty::Medium, 0), 20);
        assert_eq!(score(Difficulty::Hard, 0), 30);
        assert_eq!(score(Difficulty::Unrated, 0), 10);
    }

    #[test]
    fn test_hard_with_five_streak_scores_forty() {
        assert_eq!(score(Difficulty::Hard, 5), 40);
    }

    #[test]
    fn test_bonus_caps_after_five_prior_correct() {
        let capped = score(Difficulty::Medium, 5);
        for streak in 6..20 {
            assert_eq!(score(Difficulty::Medium, streak), capped);
        }
    }

    #[test]
    fn test_score_is_monotonic_in_streak() {
        for difficulty in [
            Difficulty::Easy,
            Difficulty::Medium,
            Difficulty::Hard,
            Difficulty::Unrated,
        ] {
            let mut last = 0;
            for streak in 0..10 {
                let points = score(difficulty, streak);
                assert!(points >= last);
                last = points;
            }
        }
    }

    #[test]
    fn test_wrong_answer_earns_nothing_and_resets_streak() {
        let mut card = ScoreCard::default();
        card.apply(true, Difficulty::Easy);
        card.apply(true, Difficulty::Easy);
        assert_eq!(card.streak, 2);

        let points = card.apply(false, Difficulty::Hard);
        assert_eq!(points, 0);
        assert_eq!(card.streak, 0);
        assert_eq!(card.score, 22);
        assert_eq!(card.correct_count, 2);
    }

    #[test]
    fn test_best_streak_never_decreases() {
        let mut card = ScoreCard::default();
        let outcomes = [true, true, true, false, true, false, false, true, true];
        let mut best_seen = 0;
        for correct in outcomes {
            card.apply(correct, Difficulty::Medium);
            assert!(card.best_streak >= best_seen);
            best_seen = card.best_streak;
        }
        assert_eq!(card.best_streak, 3);
    }

    #[test]
    fn test_streak_sequence_accumulates_bonus() {
        let mut card = ScoreCard::default();
        let earned: Vec<u32> = (0..7)
            .map(|_| card.apply(true, Difficulty::Easy))
            .collect();
        assert_eq!(earned, vec![10, 12, 14, 16, 18, 20, 20]);
        assert_eq!(card.score, 110);
        assert_eq!(card.best_streak, 7);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut card = ScoreCard::default();
        card.apply(true, Difficulty::Hard);
        card.reset();
        assert_eq!(card, ScoreCard::default());
    }
}
