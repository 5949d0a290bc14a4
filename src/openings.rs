use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::gomoku::Square;
use crate::util::Res;

/// The opening book: one opening per line, moves as whitespace-separated
/// `x,y` pairs (0-based, y from the top). `#` starts a comment.
#[derive(Debug)]
pub struct OpeningBook {
    openings: Vec<Vec<Square>>,
    order: Vec<usize>,
    repeat: bool,
}

impl OpeningBook {
    /// A book with a single empty opening, used when no file is given.
    pub fn empty(repeat: bool) -> Self {
        Self { openings: vec![vec![]], order: vec![0], repeat }
    }

    pub fn from_file(path: &Path, random: bool, srand: u64, repeat: bool) -> Res<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Couldn't read opening file '{}'", path.display()))?;
        let mut openings = vec![];
        for (lineno, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let opening = parse_opening(line)
                .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
            openings.push(opening);
        }
        if openings.is_empty() {
            bail!("The opening file '{}' doesn't contain any openings", path.display());
        }
        let mut order: Vec<usize> = (0..openings.len()).collect();
        if random {
            order.shuffle(&mut StdRng::seed_from_u64(srand));
        }
        Ok(Self { openings, order, repeat })
    }

    pub fn len(&self) -> usize {
        self.openings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.openings.is_empty()
    }

    /// The opening for the game with global index `seq`, and the index of
    /// that opening within the book. With `repeat`, games 2k and 2k+1 get
    /// the same opening so both engines play each side of it.
    pub fn next(&self, seq: usize) -> (&[Square], usize) {
        let seq = if self.repeat { seq / 2 } else { seq };
        let idx = self.order[seq % self.order.len()];
        (&self.openings[idx], idx)
    }
}

fn parse_opening(line: &str) -> Res<Vec<Square>> {
    line.split_whitespace().map(Square::from_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;
    use std::fs;

    fn write_book(name: &str, content: &str) -> std::path::PathBuf {
        let path = temp_dir().join(format!("clamps-test-{name}-{}", std::process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_moves_and_comments() {
        let path = write_book(
            "parse",
            "7,7 8,8 6,9\n# a comment line\n\n0,0   # trailing comment\n",
        );
        let book = OpeningBook::from_file(&path, false, 0, false).unwrap();
        assert_eq!(book.len(), 2);
        let (first, idx) = book.next(0);
        assert_eq!(idx, 0);
        assert_eq!(first, &[Square::new(7, 7), Square::new(8, 8), Square::new(6, 9)]);
        assert_eq!(book.next(1).0, &[Square::new(0, 0)]);
        // wraps around
        assert_eq!(book.next(2).1, 0);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn rejects_garbage() {
        let path = write_book("bad", "7,7 oops\n");
        assert!(OpeningBook::from_file(&path, false, 0, false).is_err());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn repeat_pairs_games() {
        let path = write_book("repeat", "0,0\n1,1\n2,2\n");
        let book = OpeningBook::from_file(&path, false, 0, true).unwrap();
        assert_eq!(book.next(0).1, book.next(1).1);
        assert_eq!(book.next(2).1, book.next(3).1);
        assert_ne!(book.next(1).1, book.next(2).1);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn shuffle_is_seed_deterministic() {
        let content: String = (0..20).map(|i| format!("{i},{i}\n")).collect();
        let path = write_book("shuffle", &content);
        let a = OpeningBook::from_file(&path, true, 123, false).unwrap();
        let b = OpeningBook::from_file(&path, true, 123, false).unwrap();
        let c = OpeningBook::from_file(&path, true, 321, false).unwrap();
        let order = |book: &OpeningBook| (0..20).map(|i| book.next(i).1).collect::<Vec<_>>();
        assert_eq!(order(&a), order(&b));
        assert_ne!(order(&a), order(&c));
        // a shuffle is a permutation
        let mut sorted = order(&a);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn empty_book_yields_empty_opening() {
        let book = OpeningBook::empty(false);
        assert_eq!(book.next(17).0, &[] as &[Square]);
    }
}
