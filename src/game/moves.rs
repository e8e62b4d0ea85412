//! Move Resolution
//!
//! The fixed move set and the pure outcome function for a two-player round.
//! Nothing in here touches shared state.

use serde::{Serialize, Deserialize};

/// A move a player can submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Move {
    /// Beats scissors.
    Rock,
    /// Beats rock.
    Paper,
    /// Beats paper.
    Scissors,
}

impl Move {
    /// Every legal move.
    pub const ALL: [Move; 3] = [Move::Rock, Move::Paper, Move::Scissors];

    /// The move this one defeats.
    #[inline]
    pub fn beats(self) -> Move {
        match self {
            Move::Rock => Move::Scissors,
            Move::Scissors => Move::Paper,
            Move::Paper => Move::Rock,
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Move::Rock => "rock",
            Move::Paper => "paper",
            Move::Scissors => "scissors",
        }
    }
}

/// Outcome of a resolved round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Both players chose the same move.
    Tie,
    /// The slot at `winner` (0 or 1) won.
    Decisive {
        /// Winning slot index.
        winner: usize,
    },
}

impl Outcome {
    /// Winning slot index, if any.
    pub fn winner(self) -> Option<usize> {
        match self {
            Outcome::Tie => None,
            Outcome::Decisive { winner } => Some(winner),
        }
    }
}

/// Resolve a round between slot 0 playing `first` and slot 1 playing `second`.
pub fn resolve(first: Move, second: Move) -> Outcome {
    if first == second {
        Outcome::Tie
    } else if first.beats() == second {
        Outcome::Decisive { winner: 0 }
    } else {
        Outcome::Decisive { winner: 1 }
    }
}
