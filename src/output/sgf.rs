use std::fmt::Write;

use crate::gomoku::{Color, Square};
use crate::play::game::GameRecord;
use crate::{GameEndReason, GameOutcome};

fn sgf_coord(sq: Square) -> String {
    format!("{}{}", (b'a' + sq.x) as char, (b'a' + sq.y) as char)
}

fn sgf_result(outcome: &GameOutcome) -> String {
    let Some(winner) = outcome.winner else {
        return "Draw".to_string();
    };
    let side = if winner == Color::Black { "B" } else { "W" };
    let kind = match outcome.reason {
        GameEndReason::Timeout => "+T",
        GameEndReason::Resign => "+R",
        GameEndReason::IllegalMove | GameEndReason::Crash | GameEndReason::ProtocolError => "+F",
        _ => "+",
    };
    format!("{side}{kind}")
}

/// Renders one game as an SGF tree (FF[4], GM[4]). Opening stones and
/// engine moves form one alternating move sequence, which is exactly how
/// they were placed on the board.
pub fn export(rec: &GameRecord, game_no: usize) -> String {
    let mut res = String::new();
    let _ = write!(
        res,
        "(;FF[4]GM[4]SZ[{size}]GN[{game_no}]PB[{black}]PW[{white}]RE[{result}]",
        size = rec.board_size,
        black = rec.black,
        white = rec.white,
        result = sgf_result(&rec.outcome),
    );
    let opening = rec.opening.moves().iter().copied();
    let played = rec.moves.iter().map(|mv| (mv.sq, mv.color));
    for (sq, color) in opening.chain(played) {
        let tag = if color == Color::Black { 'B' } else { 'W' };
        let _ = write!(res, ";{tag}[{}]", sgf_coord(sq));
    }
    res.push_str(")\n");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gomoku::{Position, Rule};
    use crate::play::game::MoveRecord;

    #[test]
    fn export_tiny_game() {
        let mut opening = Position::new(15);
        opening.place(Square::new(7, 7), Rule::Freestyle);
        opening.place(Square::new(8, 8), Rule::Freestyle);
        let rec = GameRecord {
            board_size: 15,
            rule: Rule::Freestyle,
            round: 0,
            opening,
            moves: vec![MoveRecord {
                sq: Square::new(0, 1),
                color: Color::Black,
                info: None,
                elapsed_ms: 1,
            }],
            outcome: GameOutcome { winner: Some(Color::White), reason: GameEndReason::Timeout },
            black: "alpha".to_string(),
            white: "beta".to_string(),
        };
        let sgf = export(&rec, 1);
        assert_eq!(
            sgf,
            "(;FF[4]GM[4]SZ[15]GN[1]PB[alpha]PW[beta]RE[W+T];B[hh];W[ii];B[ab])\n"
        );
    }
}
