//! Rating Function
//!
//! Pairwise Elo update used at match settlement. Pure and synchronous.

/// Skill rating of an account.
pub type Rating = i32;

/// Elo K-factor.
pub const K_FACTOR: f64 = 60.0;

/// Rating assigned to freshly registered accounts.
pub const DEFAULT_RATING: Rating = 1000;

/// Outcome of a match from one player's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Player won.
    Win,
    /// Player lost.
    Loss,
}

impl Outcome {
    fn score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Loss => 0.0,
        }
    }
}

/// Probability that `rating` beats `opponent`.
pub fn expected_score(rating: Rating, opponent: Rating) -> f64 {
    let exponent = f64::from(opponent - rating) / 400.0;
    1.0 / (1.0 + 10f64.powf(exponent))
}

/// Rating change for a player with `rating` against `opponent`.
pub fn rating_delta(rating: Rating, opponent: Rating, outcome: Outcome) -> Rating {
    let delta = K_FACTOR * (outcome.score() - expected_score(rating, opponent));
    delta.round() as Rating
}

/// New ratings `(winner, loser)` after a decided match.
pub fn settle(winner: Rating, loser: Rating) -> (Rating, Rating) {
    (
        winner + rating_delta(winner, loser, Outcome::Win),
        loser + rating_delta(loser, winner, Outcome::Loss),
    )
}
