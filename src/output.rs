pub mod pgn;
pub mod sample;
pub mod seqwriter;
pub mod sgf;
