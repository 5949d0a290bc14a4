use anyhow::bail;

use crate::config::{EngineOptions, Options};
use crate::gomoku::{Color, Position, Rule, Square};
use crate::play::engine::{Engine, EngineError, ThinkRequest};
use crate::play::{EngineClock, GameObserver, Info};
use crate::util::Res;
use crate::{GameEndReason, GameOutcome, Wld};

/// Why the adjudicator ended a game early.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Adjudication {
    /// the mover's scores stayed below the resign threshold
    Resign,
    /// both sides kept reporting near-zero scores
    Draw,
    /// the ply limit was reached
    ForceDraw,
}

/// Score-based adjudication on top of the game rules: resignation, dead
/// draws, and a hard ply limit. All three are disabled by a zero setting.
#[derive(Debug, Clone, Copy)]
pub struct Adjudicator {
    resign_count: usize,
    resign_score: i32,
    draw_count: usize,
    draw_score: i32,
    force_draw_after: usize,
    resign_streak: [usize; 2],
    draw_streak: usize,
}

impl Adjudicator {
    pub fn new(options: &Options) -> Self {
        Self {
            resign_count: options.resign_count,
            resign_score: options.resign_score,
            draw_count: options.draw_count,
            draw_score: options.draw_score,
            force_draw_after: options.force_draw_after,
            resign_streak: [0; 2],
            draw_streak: 0,
        }
    }

    /// Called after every applied move with the mover's current search info
    /// and the total ply count (opening included).
    pub fn after_move(&mut self, mover: usize, info: &Info, total_plies: usize) -> Option<Adjudication> {
        if self.resign_count > 0 {
            if info.seen && info.score <= -self.resign_score {
                self.resign_streak[mover] += 1;
            } else {
                self.resign_streak[mover] = 0;
            }
            if self.resign_streak[mover] >= self.resign_count {
                return Some(Adjudication::Resign);
            }
        }
        if self.draw_count > 0 {
            if info.seen && info.score.abs() <= self.draw_score {
                self.draw_streak += 1;
            } else {
                self.draw_streak = 0;
            }
            if self.draw_streak >= self.draw_count {
                return Some(Adjudication::Draw);
            }
        }
        if self.force_draw_after > 0 && total_plies >= self.force_draw_after {
            return Some(Adjudication::ForceDraw);
        }
        None
    }
}

/// One move as it went into the transcript.
#[derive(Debug, Clone, Copy)]
pub struct MoveRecord {
    pub sq: Square,
    pub color: Color,
    /// the mover's search info at the time, if it ever reported any
    pub info: Option<Info>,
    pub elapsed_ms: i64,
}

/// Everything the transcript writers need about one finished game.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub board_size: usize,
    pub rule: Rule,
    pub round: usize,
    /// the position after opening placement, before the first think
    pub opening: Position,
    /// moves played by the engines (the opening is not repeated here)
    pub moves: Vec<MoveRecord>,
    pub outcome: GameOutcome,
    pub black: String,
    pub white: String,
}

/// Drives a single game: opening placement, alternating `think` calls,
/// legality and terminal checks, adjudication.
#[derive(Debug)]
pub struct Game {
    round: usize,
    rule: Rule,
    board: Position,
    opening: Position,
    records: Vec<MoveRecord>,
}

impl Game {
    pub fn new(round: usize, board_size: usize, rule: Rule) -> Self {
        Self {
            round,
            rule,
            board: Position::new(board_size),
            opening: Position::new(board_size),
            records: vec![],
        }
    }

    pub fn board(&self) -> &Position {
        &self.board
    }

    /// Applies the opening moves as alternating black/white stones starting
    /// with black. Off-board moves, occupied squares, and openings that
    /// already decide the game are all configuration errors.
    pub fn load_opening(&mut self, moves: &[Square]) -> Res<()> {
        for &sq in moves {
            if !self.board.place(sq, self.rule) {
                bail!("illegal opening move '{sq}'");
            }
        }
        if self.board.is_terminal() {
            bail!("the opening already decides the game");
        }
        self.opening = self.board.clone();
        Ok(())
    }

    /// Which color each engine plays this game: the engine picked by
    /// `reverse` moves first from the opening position.
    pub fn engine_colors(&self, reverse: bool) -> [Color; 2] {
        let stm = self.board.to_move();
        let first = reverse as usize;
        let mut colors = [Color::Black; 2];
        colors[first] = stm;
        colors[1 - first] = stm.other();
        colors
    }

    /// Plays the game to its end. Engine failures never escape: they are
    /// folded into the outcome as a loss for the failing side.
    pub fn play(
        mut self,
        engines: &mut [Engine; 2],
        specs: [&EngineOptions; 2],
        reverse: bool,
        options: &Options,
        obs: &mut dyn GameObserver,
    ) -> (Wld, GameRecord) {
        let colors = self.engine_colors(reverse);
        let engine_of = |color: Color| if colors[0] == color { 0usize } else { 1 };
        let mut clocks = [
            EngineClock::new(specs[0].timeout_turn, specs[0].timeout_match, specs[0].increment),
            EngineClock::new(specs[1].timeout_turn, specs[1].timeout_match, specs[1].increment),
        ];
        let mut infos = [Info::default(); 2];
        let mut synced = [false; 2];
        let mut adjudicator = Adjudicator::new(options);

        let outcome = loop {
            let mover_color = self.board.to_move();
            let mover = engine_of(mover_color);
            let request = if !synced[mover] {
                synced[mover] = true;
                if self.board.move_count() == 0 {
                    ThinkRequest::Begin
                } else {
                    let stones = self
                        .board
                        .moves()
                        .iter()
                        .map(|&(sq, c)| (sq, if c == mover_color { 1 } else { 2 }))
                        .collect();
                    ThinkRequest::Board(stones)
                }
            } else {
                let last = self.board.last_move().expect("a synced engine has seen moves");
                ThinkRequest::Turn(last)
            };

            let ply = self.board.move_count();
            let thought =
                engines[mover].think(&request, &mut clocks[mover], ply, mover, &mut infos[mover], obs);
            let mv = match thought {
                Ok(outcome) => outcome,
                Err(err) => break loss(mover_color, reason_for_engine_error(&err)),
            };
            if !self.board.place(mv.mv, self.rule) {
                break loss(mover_color, GameEndReason::IllegalMove);
            }
            self.records.push(MoveRecord {
                sq: mv.mv,
                color: mover_color,
                info: infos[mover].seen.then_some(infos[mover]),
                elapsed_ms: mv.elapsed,
            });
            obs.on_move(&self.board);

            if self.board.winner() == Some(mover_color) {
                break GameOutcome { winner: Some(mover_color), reason: GameEndReason::FiveInRow };
            }
            if self.board.is_full() {
                break GameOutcome { winner: None, reason: GameEndReason::BoardFull };
            }
            if let Some(adjudication) =
                adjudicator.after_move(mover, &infos[mover], self.board.move_count())
            {
                break match adjudication {
                    Adjudication::Resign => loss(mover_color, GameEndReason::Resign),
                    Adjudication::Draw => {
                        GameOutcome { winner: None, reason: GameEndReason::AdjudicatedDraw }
                    }
                    Adjudication::ForceDraw => {
                        GameOutcome { winner: None, reason: GameEndReason::ForceDraw }
                    }
                };
            }
            clocks[mover].add_increment();
        };

        let wld = wld_for_first_engine(&outcome, colors);
        (wld, self.into_record(outcome, colors, engines))
    }

    /// Ends the game before it started because engine `loser` failed its
    /// per-game handshake.
    pub fn forfeit(
        self,
        loser: usize,
        reverse: bool,
        reason: GameEndReason,
        engines: &[Engine; 2],
    ) -> (Wld, GameRecord) {
        let colors = self.engine_colors(reverse);
        let outcome = GameOutcome { winner: Some(colors[loser].other()), reason };
        let wld = wld_for_first_engine(&outcome, colors);
        (wld, self.into_record(outcome, colors, engines))
    }

    fn into_record(self, outcome: GameOutcome, colors: [Color; 2], engines: &[Engine; 2]) -> GameRecord {
        let black = engines[if colors[0] == Color::Black { 0 } else { 1 }].name.clone();
        let white = engines[if colors[0] == Color::White { 0 } else { 1 }].name.clone();
        GameRecord {
            board_size: self.board.size(),
            rule: self.rule,
            round: self.round,
            opening: self.opening,
            moves: self.records,
            outcome,
            black,
            white,
        }
    }
}

fn loss(mover: Color, reason: GameEndReason) -> GameOutcome {
    GameOutcome { winner: Some(mover.other()), reason }
}

/// How an adapter-level failure shows up in the game result.
pub fn reason_for_engine_error(err: &EngineError) -> GameEndReason {
    match err {
        EngineError::Timeout { .. } => GameEndReason::Timeout,
        EngineError::Protocol { .. } => GameEndReason::ProtocolError,
        EngineError::SpawnFailure { .. } | EngineError::PipeBroken(_) | EngineError::Crash(_) => {
            GameEndReason::Crash
        }
    }
}

/// Maps the outcome to the perspective of the first engine of the pair,
/// which is what the job queue and SPRT count.
fn wld_for_first_engine(outcome: &GameOutcome, colors: [Color; 2]) -> Wld {
    Wld::from_player_result(outcome.for_player(colors[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(resign: (usize, i32), draw: (usize, i32), force: usize) -> Options {
        Options {
            resign_count: resign.0,
            resign_score: resign.1,
            draw_count: draw.0,
            draw_score: draw.1,
            force_draw_after: force,
            ..Options::default()
        }
    }

    fn seen(score: i32) -> Info {
        Info { score, seen: true, ..Info::default() }
    }

    #[test]
    fn resign_needs_consecutive_scores() {
        let mut adj = Adjudicator::new(&options((3, 500), (0, 0), 0));
        assert_eq!(adj.after_move(0, &seen(-600), 1), None);
        assert_eq!(adj.after_move(0, &seen(-700), 3), None);
        // a recovery resets the streak
        assert_eq!(adj.after_move(0, &seen(-100), 5), None);
        assert_eq!(adj.after_move(0, &seen(-600), 7), None);
        assert_eq!(adj.after_move(0, &seen(-600), 9), None);
        assert_eq!(adj.after_move(0, &seen(-500), 11), Some(Adjudication::Resign));
    }

    #[test]
    fn resign_streaks_are_per_engine() {
        let mut adj = Adjudicator::new(&options((2, 500), (0, 0), 0));
        assert_eq!(adj.after_move(0, &seen(-600), 1), None);
        assert_eq!(adj.after_move(1, &seen(-600), 2), None);
        assert_eq!(adj.after_move(0, &seen(-600), 3), Some(Adjudication::Resign));
    }

    #[test]
    fn draw_needs_both_sides_quiet() {
        let mut adj = Adjudicator::new(&options((0, 0), (4, 50), 0));
        assert_eq!(adj.after_move(0, &seen(10), 1), None);
        assert_eq!(adj.after_move(1, &seen(-20), 2), None);
        assert_eq!(adj.after_move(0, &seen(0), 3), None);
        assert_eq!(adj.after_move(1, &seen(30), 4), Some(Adjudication::Draw));
    }

    #[test]
    fn loud_score_resets_draw_streak() {
        let mut adj = Adjudicator::new(&options((0, 0), (2, 50), 0));
        assert_eq!(adj.after_move(0, &seen(10), 1), None);
        assert_eq!(adj.after_move(1, &seen(300), 2), None);
        assert_eq!(adj.after_move(0, &seen(10), 3), None);
        assert_eq!(adj.after_move(1, &seen(-10), 4), Some(Adjudication::Draw));
    }

    #[test]
    fn force_draw_counts_all_plies() {
        let mut adj = Adjudicator::new(&options((0, 0), (0, 0), 6));
        assert_eq!(adj.after_move(0, &Info::default(), 5), None);
        assert_eq!(adj.after_move(1, &Info::default(), 6), Some(Adjudication::ForceDraw));
    }

    #[test]
    fn silent_engines_never_trigger_score_adjudication() {
        let mut adj = Adjudicator::new(&options((1, 0), (1, 1000), 0));
        // score 0 with seen=false must not count for either rule
        assert_eq!(adj.after_move(0, &Info::default(), 1), None);
        assert_eq!(adj.after_move(1, &Info::default(), 2), None);
    }

    #[test]
    fn color_assignment_follows_reverse_and_parity() {
        let game = Game::new(0, 15, Rule::Freestyle);
        // empty opening: black to move
        assert_eq!(game.engine_colors(false), [Color::Black, Color::White]);
        assert_eq!(game.engine_colors(true), [Color::White, Color::Black]);

        let mut game = Game::new(0, 15, Rule::Freestyle);
        game.load_opening(&[Square::new(7, 7)]).unwrap();
        // odd opening: white to move, so the first-moving engine is white
        assert_eq!(game.engine_colors(false), [Color::White, Color::Black]);
        assert_eq!(game.engine_colors(true), [Color::Black, Color::White]);
    }

    #[test]
    fn wld_perspective() {
        let colors = [Color::White, Color::Black];
        let win_black = GameOutcome { winner: Some(Color::Black), reason: GameEndReason::FiveInRow };
        let draw = GameOutcome { winner: None, reason: GameEndReason::BoardFull };
        assert_eq!(wld_for_first_engine(&win_black, colors), Wld::Loss);
        assert_eq!(wld_for_first_engine(&draw, colors), Wld::Draw);
        assert_eq!(wld_for_first_engine(&win_black, [Color::Black, Color::White]), Wld::Win);
    }

    #[test]
    fn opening_rejects_bad_moves() {
        let mut game = Game::new(0, 15, Rule::Freestyle);
        assert!(game.load_opening(&[Square::new(20, 0)]).is_err());
        let mut game = Game::new(0, 15, Rule::Freestyle);
        assert!(game.load_opening(&[Square::new(3, 3), Square::new(3, 3)]).is_err());
        let mut game = Game::new(0, 15, Rule::Freestyle);
        assert!(game.load_opening(&[Square::new(3, 3), Square::new(4, 3)]).is_ok());
        assert_eq!(game.board().move_count(), 2);
    }
}
