use serde::{Deserialize, Serialize};

/// Parameters of a sequential probability ratio test between the hypotheses
/// "the first engine is `elo0` stronger" and "`elo1` stronger", with the
/// requested error rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprtParams {
    pub elo0: f64,
    pub elo1: f64,
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum SprtOutcome {
    /// The LLR crossed the lower bound: H0 (elo ≤ elo0) is accepted.
    #[display("H0 accepted")]
    AcceptH0,
    /// The LLR crossed the upper bound: H1 (elo ≥ elo1) is accepted.
    #[display("H1 accepted")]
    AcceptH1,
}

fn elo_to_score(elo: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-elo / 400.0))
}

impl SprtParams {
    pub fn lower_bound(&self) -> f64 {
        (self.beta / (1.0 - self.alpha)).ln()
    }

    pub fn upper_bound(&self) -> f64 {
        ((1.0 - self.beta) / self.alpha).ln()
    }

    /// Generalized SPRT log-likelihood ratio over trinomial (win, loss,
    /// draw) counts, using the normal approximation
    /// `LLR ≈ (s1 - s0) * (2s - s0 - s1) * N / (2 * var)`.
    pub fn llr(&self, wins: usize, losses: usize, draws: usize) -> f64 {
        let n = (wins + losses + draws) as f64;
        if n < 2.0 {
            return 0.0;
        }
        let w = wins as f64 / n;
        let d = draws as f64 / n;
        let s = w + d / 2.0;
        let var = (w + d / 4.0) - s * s;
        if var <= 0.0 {
            // every game ended the same way so far; the approximation needs
            // at least two distinct outcomes
            return 0.0;
        }
        let s0 = elo_to_score(self.elo0);
        let s1 = elo_to_score(self.elo1);
        (s1 - s0) * (2.0 * s - s0 - s1) * n / (2.0 * var)
    }

    /// Evaluates the test over cumulative counts. `None` means keep playing.
    pub fn status(&self, wins: usize, losses: usize, draws: usize) -> Option<SprtOutcome> {
        let llr = self.llr(wins, losses, draws);
        if llr >= self.upper_bound() {
            Some(SprtOutcome::AcceptH1)
        } else if llr <= self.lower_bound() {
            Some(SprtOutcome::AcceptH0)
        } else {
            None
        }
    }
}
