use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, EnumString};

use crate::util::Res;

pub const MIN_BOARD_SIZE: usize = 5;
/// Go-style coordinates run a..z without the letter 'i', which caps the
/// board at 25 columns.
pub const MAX_BOARD_SIZE: usize = 25;

#[derive(Copy, Clone, Eq, PartialEq, Debug, derive_more::Display)]
pub enum Color {
    #[display("black")]
    Black,
    #[display("white")]
    White,
}

impl Color {
    pub fn other(self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }
}

/// A board coordinate as it appears on the wire: `x,y`, 0-based, with y
/// counted from the top.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Square {
    pub x: u8,
    pub y: u8,
}

impl Square {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

impl Display for Square {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for Square {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Res<Self> {
        let Some((x, y)) = s.trim().split_once(',') else {
            bail!("Expected a coordinate of the form 'x,y', got '{s}'")
        };
        let x = x.trim().parse::<u8>();
        let y = y.trim().parse::<u8>();
        match (x, y) {
            (Ok(x), Ok(y)) => Ok(Square { x, y }),
            _ => bail!("Couldn't parse coordinate '{s}'"),
        }
    }
}

#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Debug,
    Default,
    derive_more::Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum Rule {
    /// Five or more stones in a row win.
    #[default]
    #[display("freestyle")]
    Freestyle,
    /// Exactly five stones win; an overline does not.
    #[display("standard")]
    Standard,
    /// Like standard for black; white also wins with an overline. Forbidden
    /// points are the engines' business, the referee only checks occupancy.
    #[display("renju")]
    Renju,
}

impl Rule {
    /// The value sent with `INFO rule` (Gomocup numbering).
    pub fn code(self) -> u32 {
        match self {
            Rule::Freestyle => 0,
            Rule::Standard => 1,
            Rule::Renju => 4,
        }
    }
}

/// One gomoku position: the stones, the move order, and the winner once a
/// five has been completed. Black always moves first on an empty board.
#[derive(Debug, Clone)]
pub struct Position {
    size: usize,
    cells: Vec<Option<Color>>,
    hist: Vec<(Square, Color)>,
    winner: Option<Color>,
}

impl Position {
    pub fn new(size: usize) -> Self {
        debug_assert!((MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&size));
        Self {
            size,
            cells: vec![None; size * size],
            hist: vec![],
            winner: None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, sq: Square) -> bool {
        (sq.x as usize) < self.size && (sq.y as usize) < self.size
    }

    pub fn stone_at(&self, sq: Square) -> Option<Color> {
        if !self.contains(sq) {
            return None;
        }
        self.cells[sq.y as usize * self.size + sq.x as usize]
    }

    pub fn to_move(&self) -> Color {
        if self.hist.len() % 2 == 0 {
            Color::Black
        } else {
            Color::White
        }
    }

    pub fn move_count(&self) -> usize {
        self.hist.len()
    }

    pub fn moves(&self) -> &[(Square, Color)] {
        &self.hist
    }

    pub fn last_move(&self) -> Option<Square> {
        self.hist.last().map(|(sq, _)| *sq)
    }

    pub fn is_full(&self) -> bool {
        self.hist.len() == self.size * self.size
    }

    pub fn winner(&self) -> Option<Color> {
        self.winner
    }

    pub fn is_terminal(&self) -> bool {
        self.winner.is_some() || self.is_full()
    }

    /// Plays the side to move onto `sq`. Returns false (and leaves the
    /// position untouched) if the square is off the board, occupied, or the
    /// game is already over.
    pub fn place(&mut self, sq: Square, rule: Rule) -> bool {
        if self.is_terminal() || !self.contains(sq) || self.stone_at(sq).is_some() {
            return false;
        }
        let color = self.to_move();
        self.cells[sq.y as usize * self.size + sq.x as usize] = Some(color);
        self.hist.push((sq, color));
        if self.wins(sq, color, rule) {
            self.winner = Some(color);
        }
        true
    }

    fn run_length(&self, sq: Square, color: Color, dx: i32, dy: i32) -> usize {
        let mut n = 0;
        let (mut x, mut y) = (sq.x as i32 + dx, sq.y as i32 + dy);
        while x >= 0
            && y >= 0
            && (x as usize) < self.size
            && (y as usize) < self.size
            && self.cells[y as usize * self.size + x as usize] == Some(color)
        {
            n += 1;
            x += dx;
            y += dy;
        }
        n
    }

    fn wins(&self, sq: Square, color: Color, rule: Rule) -> bool {
        for (dx, dy) in [(1, 0), (0, 1), (1, 1), (1, -1)] {
            let line = 1 + self.run_length(sq, color, dx, dy) + self.run_length(sq, color, -dx, -dy);
            let won = match rule {
                Rule::Freestyle => line >= 5,
                Rule::Standard => line == 5,
                // In renju an overline only wins for white
                Rule::Renju => line == 5 || (color == Color::White && line > 5),
            };
            if won {
                return true;
            }
        }
        false
    }

    /// FEN-like description of the stones, rows from the top, digits for
    /// runs of empty squares, then the side to move. Used for the PGN `FEN`
    /// tag that records the opening.
    pub fn as_fen(&self) -> String {
        let mut res = String::new();
        for y in 0..self.size {
            if y > 0 {
                res.push('/');
            }
            let mut empty = 0;
            for x in 0..self.size {
                match self.cells[y * self.size + x] {
                    None => empty += 1,
                    Some(c) => {
                        if empty > 0 {
                            res += &empty.to_string();
                            empty = 0;
                        }
                        res.push(if c == Color::Black { 'X' } else { 'O' });
                    }
                }
            }
            if empty > 0 {
                res += &empty.to_string();
            }
        }
        res.push(' ');
        res.push(if self.to_move() == Color::Black { 'b' } else { 'w' });
        res
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for y in 0..self.size {
            for x in 0..self.size {
                let c = match self.cells[y * self.size + x] {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None => '.',
                };
                write!(f, "{c}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
