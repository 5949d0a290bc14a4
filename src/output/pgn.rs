use std::fmt::Write;

use crate::gomoku::Square;
use crate::play::game::GameRecord;

/// Go-style coordinate: column letter (skipping 'i'), row number counted
/// from the bottom.
pub fn go_coord(sq: Square, board_size: usize) -> String {
    let mut col = b'a' + sq.x;
    if col >= b'i' {
        col += 1;
    }
    format!("{}{}", col as char, board_size - sq.y as usize)
}

/// Renders one game as a PGN entry: the seven tag roster, a `FEN` tag
/// carrying the opening, and the engine moves with score/depth/time
/// comments.
pub fn export(rec: &GameRecord, game_no: usize) -> String {
    let result = rec.outcome.score_string();
    let mut res = String::new();
    let _ = write!(
        res,
        "[Event \"?\"]\n\
         [Site \"?\"]\n\
         [Date \"{date}\"]\n\
         [Round \"{game_no}\"]\n\
         [Black \"{black}\"]\n\
         [White \"{white}\"]\n\
         [Result \"{result}\"]\n\
         [FEN \"{fen}\"]\n\
         [Termination \"{reason}\"]\n\
         [PlyCount \"{plies}\"]\n",
        date = chrono::Utc::now().format("%Y.%m.%d"),
        black = rec.black,
        white = rec.white,
        fen = rec.opening.as_fen(),
        reason = rec.outcome.reason,
        plies = rec.moves.len(),
    );
    for (ply, mv) in rec.moves.iter().enumerate() {
        if ply % 2 == 0 {
            let _ = write!(res, "\n{}.", ply / 2 + 1);
        }
        let _ = write!(res, " {}", go_coord(mv.sq, rec.board_size));
        if let Some(info) = mv.info {
            let _ = write!(res, " {{{:+}/{} {}ms}}", info.score, info.depth, mv.elapsed_ms);
        }
    }
    res.push(' ');
    res += result;
    res.push_str("\n\n");
    res
}
