use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::gomoku::Color;
use crate::tournament::Tournament;
use crate::util::Res;

pub mod cli;
pub mod config;
pub mod gomoku;
pub mod jobs;
pub mod openings;
pub mod output;
pub mod play;
pub mod sprt;
pub mod tournament;
pub mod util;

/// Result of a game from one player's perspective.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PlayerResult {
    Win,
    Lose,
    Draw,
}

/// Result of a game from the perspective of the first engine of its pair,
/// which is how the job queue counts it.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Wld {
    Loss,
    Draw,
    Win,
}

impl Wld {
    pub fn index(self) -> usize {
        match self {
            Wld::Win => 0,
            Wld::Loss => 1,
            Wld::Draw => 2,
        }
    }

    pub fn from_player_result(res: PlayerResult) -> Self {
        match res {
            PlayerResult::Win => Wld::Win,
            PlayerResult::Lose => Wld::Loss,
            PlayerResult::Draw => Wld::Draw,
        }
    }
}

/// Why a game ended. The `Display` text is what lands in the `{...}` part of
/// the per-game summary line and in the PGN `Termination` tag.
#[derive(Clone, Eq, PartialEq, Debug, derive_more::Display)]
pub enum GameEndReason {
    #[display("five in a row")]
    FiveInRow,
    #[display("board full")]
    BoardFull,
    #[display("timeout")]
    Timeout,
    #[display("illegal move")]
    IllegalMove,
    #[display("resign")]
    Resign,
    #[display("draw by adjudication")]
    AdjudicatedDraw,
    #[display("draw by move limit")]
    ForceDraw,
    #[display("crash")]
    Crash,
    #[display("error")]
    ProtocolError,
}

/// Final state of one game: who won (`None` for a draw) and why it's over.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct GameOutcome {
    pub winner: Option<Color>,
    pub reason: GameEndReason,
}

impl GameOutcome {
    /// `<black score>-<white score>` as used in the summary line.
    pub fn score_string(&self) -> &'static str {
        match self.winner {
            Some(Color::Black) => "1-0",
            Some(Color::White) => "0-1",
            None => "1/2-1/2",
        }
    }

    pub fn for_player(&self, color: Color) -> PlayerResult {
        match self.winner {
            None => PlayerResult::Draw,
            Some(c) if c == color => PlayerResult::Win,
            Some(_) => PlayerResult::Lose,
        }
    }
}

pub fn run_program() -> Res<()> {
    let (options, engines) = cli::parse_cli()?;
    let mut tournament = Tournament::new(options, engines)?;

    // First Ctrl-C asks the job queue to drain (workers finish the game in
    // progress), the second one closes the sample stream and leaves.
    let shared = tournament.shared();
    let interrupted = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            if let Some(sample) = &shared.sample {
                sample.close(true);
            }
            exit(1);
        }
        println!("Stopping tournament, waiting for running games to finish...");
        shared.jobs.stop();
    })
    .map_err(|err| anyhow::anyhow!("Couldn't install the Ctrl-C handler: {err}"))?;

    tournament.run()
}
