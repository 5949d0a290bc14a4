use std::collections::VecDeque;
use std::sync::Mutex;

use itertools::Itertools;

use crate::Wld;

/// One scheduled game.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Job {
    pub pair: usize,
    pub round: usize,
    pub game: usize,
    /// indices into the engine configuration list
    pub ei: [usize; 2],
    /// odd games within an encounter flip who moves first
    pub reverse: bool,
}

/// Aggregated counts for one pair, from the perspective of `ei[0]`.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PairCounts {
    pub ei: [usize; 2],
    /// wins, losses, draws
    pub count: [usize; 3],
}

impl PairCounts {
    pub fn wins(&self) -> usize {
        self.count[Wld::Win.index()]
    }

    pub fn losses(&self) -> usize {
        self.count[Wld::Loss.index()]
    }

    pub fn draws(&self) -> usize {
        self.count[Wld::Draw.index()]
    }

    pub fn total(&self) -> usize {
        self.count.iter().sum()
    }

    pub fn score(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.5
        } else {
            (self.wins() as f64 + 0.5 * self.draws() as f64) / total as f64
        }
    }
}

/// Per-pair standing with display names resolved, for progress snapshots.
#[derive(Debug, Clone)]
pub struct PairResult {
    pub first: String,
    pub second: String,
    pub wins: usize,
    pub losses: usize,
    pub draws: usize,
    pub score: f64,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: VecDeque<Job>,
    total: usize,
    next_idx: usize,
    completed: usize,
    stopped: bool,
    results: Vec<PairCounts>,
    names: Vec<String>,
}

/// The queue of scheduled games plus the result table, all behind one mutex.
/// Jobs are enumerated eagerly at construction, so `pop` never waits.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<Inner>,
}

impl JobQueue {
    pub fn new(num_engines: usize, rounds: usize, games: usize, gauntlet: bool) -> Self {
        let pairs: Vec<[usize; 2]> = if gauntlet {
            (1..num_engines).map(|k| [0, k]).collect()
        } else {
            (0..num_engines).tuple_combinations().map(|(a, b)| [a, b]).collect()
        };
        let mut jobs = VecDeque::new();
        for round in 0..rounds {
            for (pair, &ei) in pairs.iter().enumerate() {
                for game in 0..games {
                    jobs.push_back(Job { pair, round, game, ei, reverse: game % 2 == 1 });
                }
            }
        }
        let inner = Inner {
            total: jobs.len(),
            jobs,
            results: pairs.iter().map(|&ei| PairCounts { ei, count: [0; 3] }).collect(),
            names: vec![String::new(); num_engines],
            ..Inner::default()
        };
        Self { inner: Mutex::new(inner) }
    }

    /// Takes the next job together with its global index and the total
    /// number of scheduled games. `None` means drained or stopped.
    pub fn pop(&self) -> Option<(Job, usize, usize)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return None;
        }
        let job = inner.jobs.pop_front()?;
        let idx = inner.next_idx;
        inner.next_idx += 1;
        Some((job, idx, inner.total))
    }

    /// Records one finished game and returns the pair's counts so the caller
    /// can print the running score and feed SPRT without re-locking.
    pub fn add_result(&self, pair: usize, wld: Wld) -> PairCounts {
        let mut inner = self.inner.lock().unwrap();
        inner.completed += 1;
        inner.results[pair].count[wld.index()] += 1;
        inner.results[pair].clone()
    }

    /// Records the name the engine reported in its `ABOUT` answer. First
    /// writer wins; later (re)starts of the same engine keep the name.
    pub fn set_name(&self, engine: usize, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.names[engine].is_empty() {
            inner.names[engine] = name.to_string();
        }
    }

    pub fn name(&self, engine: usize) -> String {
        let inner = self.inner.lock().unwrap();
        display_name(&inner.names, engine)
    }

    pub fn stop(&self) {
        self.inner.lock().unwrap().stopped = true;
    }

    pub fn done(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.stopped || inner.completed == inner.total
    }

    pub fn total(&self) -> usize {
        self.inner.lock().unwrap().total
    }

    pub fn completed(&self) -> usize {
        self.inner.lock().unwrap().completed
    }

    /// A consistent snapshot of all pairs that have played at least one game.
    pub fn pair_results(&self) -> Vec<PairResult> {
        let inner = self.inner.lock().unwrap();
        inner
            .results
            .iter()
            .filter(|r| r.total() > 0)
            .map(|r| PairResult {
                first: display_name(&inner.names, r.ei[0]),
                second: display_name(&inner.names, r.ei[1]),
                wins: r.wins(),
                losses: r.losses(),
                draws: r.draws(),
                score: r.score(),
            })
            .collect()
    }

    /// Prints the standings table. Kept quiet for a single pair, where the
    /// per-game score line already says everything.
    pub fn print_results(&self, games_per_encounter: usize) {
        let results = self.pair_results();
        if results.len() < 2 {
            return;
        }
        println!("Tournament update ({games_per_encounter} games per encounter):");
        for r in &results {
            println!(
                "  {} vs {}: {} - {} - {}  [{:.3}] {}",
                r.first,
                r.second,
                r.wins,
                r.losses,
                r.draws,
                r.score,
                r.wins + r.losses + r.draws
            );
        }
    }
}

fn display_name(names: &[String], engine: usize) -> String {
    if names[engine].is_empty() {
        format!("engine{}", engine + 1)
    } else {
        names[engine].clone()
    }
}
