use std::sync::{Arc, Mutex};
use std::thread::{sleep, Builder, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;

use crate::config::{EngineOptions, Options};
use crate::gomoku::Color;
use crate::jobs::{JobQueue, PairResult};
use crate::openings::OpeningBook;
use crate::output::sample::SampleSink;
use crate::output::seqwriter::SeqWriter;
use crate::output::{pgn, sgf};
use crate::play::engine::{Engine, EngineError};
use crate::play::game::{reason_for_engine_error, Game};
use crate::play::worker::{prepare_engine, DeadlineRegister, DeadlineVerdict, Worker, WorkerObserver};
use crate::util::{system_msec, LogRing, Res};
use crate::{GameEndReason, Wld};

const WATCHDOG_INTERVAL_MS: u64 = 100;

/// Everything the worker threads and the supervisor share. The job queue,
/// each deadline register and each writer sit behind their own locks;
/// workers never hold two of them at once.
pub struct TournamentShared {
    pub options: Options,
    pub engine_opts: Vec<EngineOptions>,
    pub jobs: JobQueue,
    pub openings: OpeningBook,
    pub pgn: Option<SeqWriter>,
    pub sgf: Option<SeqWriter>,
    pub msg: Option<SeqWriter>,
    pub sample: Option<SampleSink>,
    pub ring: LogRing,
    fatal: Mutex<Option<String>>,
}

impl TournamentShared {
    /// Records a fatal error and asks everything to wind down. The first
    /// message wins.
    pub fn fail(&self, message: String) {
        eprintln!("{}", message.red());
        let mut fatal = self.fatal.lock().unwrap();
        if fatal.is_none() {
            *fatal = Some(message);
        }
        self.jobs.stop();
    }

    pub fn fatal_message(&self) -> Option<String> {
        self.fatal.lock().unwrap().clone()
    }
}

/// One worker's row in a progress snapshot: which engine it is waiting on
/// and for how much longer.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub worker: usize,
    pub engine: String,
    pub description: String,
    pub time_left_ms: i64,
}

/// A consistent-enough view of the tournament for progress displays.
#[derive(Debug, Clone)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub running: bool,
    pub pairs: Vec<PairResult>,
    pub workers: Vec<WorkerStatus>,
    pub log_lines: Vec<String>,
}

/// Owns the worker threads, runs the deadline watchdog, and tears
/// everything down (idempotently) at the end.
pub struct Tournament {
    shared: Arc<TournamentShared>,
    registers: Vec<Arc<DeadlineRegister>>,
    threads: Vec<JoinHandle<()>>,
}

impl Tournament {
    pub fn new(options: Options, engine_opts: Vec<EngineOptions>) -> Res<Self> {
        options.validate(&engine_opts)?;
        let openings = match &options.openings {
            Some(path) => OpeningBook::from_file(path, options.random, options.srand, options.repeat)?,
            None => OpeningBook::empty(options.repeat),
        };
        let jobs = JobQueue::new(engine_opts.len(), options.rounds, options.games, options.gauntlet);
        let pgn = options.pgn.as_deref().map(SeqWriter::create).transpose()?;
        let sgf = options.sgf.as_deref().map(SeqWriter::create).transpose()?;
        let msg = options.msg.as_deref().map(SeqWriter::create).transpose()?;
        let sample = options.sample.as_ref().map(SampleSink::open).transpose()?;
        Ok(Self {
            shared: Arc::new(TournamentShared {
                options,
                engine_opts,
                jobs,
                openings,
                pgn,
                sgf,
                msg,
                sample,
                ring: LogRing::default(),
                fatal: Mutex::new(None),
            }),
            registers: vec![],
            threads: vec![],
        })
    }

    pub fn shared(&self) -> Arc<TournamentShared> {
        self.shared.clone()
    }

    /// Spawns the worker threads. Harmless when called twice.
    pub fn start(&mut self) -> Res<()> {
        if !self.threads.is_empty() {
            return Ok(());
        }
        for id in 0..self.shared.options.concurrency {
            let log_name = self.shared.options.log.then(|| format!("clamps.{}.log", id + 1));
            let worker = Worker::new(id, log_name.as_deref())?;
            self.registers.push(worker.deadline.clone());
            let shared = self.shared.clone();
            let handle = Builder::new()
                .name(format!("worker {id}"))
                .spawn(move || worker_main(&shared, worker))
                .context("spawning a worker thread")?;
            self.threads.push(handle);
        }
        Ok(())
    }

    /// One watchdog pass over all deadline registers. Returns false once the
    /// tournament is done.
    pub fn update(&mut self) -> Res<bool> {
        let now = system_msec();
        let mut unresponsive = None;
        for register in &self.registers {
            match register.poll(now) {
                DeadlineVerdict::Quiet => {}
                DeadlineVerdict::Fired { engine_name, description, thinking_ms } => {
                    self.shared.ring.push(format!(
                        "deadline: terminating '{engine_name}' [{description}] after {thinking_ms}ms"
                    ));
                }
                DeadlineVerdict::Unresponsive { engine_name, description, overdue } => {
                    unresponsive = Some((engine_name, description, overdue));
                    break;
                }
            }
        }
        if let Some((engine_name, description, overdue)) = unresponsive {
            // the engine survived a kill; the process state can't be
            // trusted, so give up without waiting for the workers
            self.shutdown(false);
            bail!("engine '{engine_name}' is unresponsive to [{description}] after {overdue}ms");
        }
        Ok(!self.shared.jobs.done())
    }

    /// Runs the tournament to completion (or until a stop) and reports the
    /// final standings. This is the main thread's loop.
    pub fn run(&mut self) -> Res<()> {
        self.start()?;
        while self.update()? {
            sleep(Duration::from_millis(WATCHDOG_INTERVAL_MS));
        }
        self.shutdown(true);
        if let Some(message) = self.shared.fatal_message() {
            bail!("{message}");
        }
        println!(
            "Finished {} of {} games",
            self.shared.jobs.completed(),
            self.shared.jobs.total()
        );
        for pair in self.shared.jobs.pair_results() {
            println!(
                "{} vs {}: {} - {} - {}  [{:.3}]",
                pair.first, pair.second, pair.wins, pair.losses, pair.draws, pair.score
            );
        }
        Ok(())
    }

    /// Stops the queue, optionally joins the workers, and closes the sample
    /// stream. Safe to call more than once.
    pub fn shutdown(&mut self, join: bool) {
        self.shared.jobs.stop();
        if join {
            for handle in self.threads.drain(..) {
                let _ = handle.join();
            }
        } else {
            // leave stuck workers behind; the process is about to exit
            self.threads.clear();
        }
        if let Some(sample) = &self.shared.sample {
            sample.close(false);
        }
    }

    pub fn progress(&self) -> Progress {
        let now = system_msec();
        let workers = self
            .registers
            .iter()
            .enumerate()
            .filter_map(|(id, register)| {
                register.status(now).map(|(engine, description, time_left_ms)| WorkerStatus {
                    worker: id,
                    engine,
                    description,
                    time_left_ms,
                })
            })
            .collect();
        Progress {
            completed: self.shared.jobs.completed(),
            total: self.shared.jobs.total(),
            running: !self.shared.jobs.done(),
            pairs: self.shared.jobs.pair_results(),
            workers,
            log_lines: self.shared.ring.drain(),
        }
    }
}

impl Drop for Tournament {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

fn default_engine_name(spec: &EngineOptions, index: usize) -> String {
    if spec.name.is_empty() {
        format!("engine{}", index + 1)
    } else {
        spec.name.clone()
    }
}

/// The body of one worker thread: pull jobs, keep the two engine processes
/// alive across games, play, and report.
fn worker_main(shared: &TournamentShared, worker: Worker) {
    let options = &shared.options;
    let mut engines = [
        Engine::new(worker.deadline.clone(), options.debug, worker.log.clone()),
        Engine::new(worker.deadline.clone(), options.debug, worker.log.clone()),
    ];
    let mut loaded: [Option<usize>; 2] = [None, None];

    while let Some((job, idx, total)) = shared.jobs.pop() {
        // engine stop/start as needed; a healthy process is reused across
        // games to amortize startup cost
        let mut fresh = [false; 2];
        let mut spawn_error = None;
        for i in 0..2 {
            if loaded[i] != Some(job.ei[i]) || !engines[i].is_ok() || engines[i].is_crashed() {
                engines[i].terminate(false);
                loaded[i] = None;
                let spec = &shared.engine_opts[job.ei[i]];
                match engines[i].start(&spec.cmd, &default_engine_name(spec, job.ei[i]), spec.tolerance) {
                    Ok(()) => {
                        loaded[i] = Some(job.ei[i]);
                        fresh[i] = true;
                        shared.jobs.set_name(job.ei[i], &engines[i].name);
                    }
                    Err(err) => {
                        spawn_error = Some(err);
                        break;
                    }
                }
            }
        }
        if let Some(err) = spawn_error {
            shared.fail(format!("[{}] couldn't start engine: {err}", worker.id));
            return;
        }

        let mut messages =
            shared.msg.as_ref().map(|_| format!("{}\nGame ID: {}\n", "-".repeat(40), idx + 1));

        let (opening, _opening_round) = shared.openings.next(idx);
        let mut game = Game::new(job.round, options.board_size, options.rule);
        if let Err(err) = game.load_opening(opening) {
            shared.fail(format!("[{}] illegal opening: {err:#}", worker.id));
            return;
        }

        let colors = game.engine_colors(job.reverse);
        let black = engines[if colors[0] == Color::Black { 0 } else { 1 }].name.clone();
        let white = engines[if colors[0] == Color::White { 0 } else { 1 }].name.clone();
        if let Some(messages) = messages.as_mut() {
            messages.push_str(&format!("Engines: {black} x {white}\n"));
        }
        let started =
            format!("[{}] Started game {} of {} ({} vs {})", worker.id, idx + 1, total, black, white);
        println!("{started}");
        shared.ring.push(started);

        // per-game protocol handshake; a failure forfeits the game
        let mut handshake_error: Option<(usize, EngineError)> = None;
        for i in 0..2 {
            let spec = &shared.engine_opts[job.ei[i]];
            if let Err(err) = prepare_engine(&mut engines[i], spec, fresh[i], options) {
                handshake_error = Some((i, err));
                break;
            }
        }

        let (wld, rec) = match handshake_error {
            Some((i, err)) => {
                shared.ring.push(format!("[{}] {err}", worker.id));
                let reason = reason_for_engine_error(&err);
                game.forfeit(i, job.reverse, reason, &engines)
            }
            None => {
                let mut observer =
                    WorkerObserver { messages: messages.as_mut(), ring: &shared.ring };
                let specs = [&shared.engine_opts[job.ei[0]], &shared.engine_opts[job.ei[1]]];
                game.play(&mut engines, specs, job.reverse, options, &mut observer)
            }
        };

        // transcripts, sequenced by global game index; skipped games still
        // push an empty payload so later games aren't held back
        let keep = !(options.gauntlet && options.save_lose_only && wld != Wld::Loss);
        let io = (|| -> Res<()> {
            if let Some(writer) = &shared.pgn {
                writer.push(idx, if keep { pgn::export(&rec, idx + 1) } else { String::new() })?;
            }
            if let Some(writer) = &shared.sgf {
                writer.push(idx, if keep { sgf::export(&rec, idx + 1) } else { String::new() })?;
            }
            if let (Some(writer), Some(messages)) = (&shared.msg, messages) {
                writer.push(idx, if keep { messages } else { String::new() })?;
            }
            if keep {
                if let Some(sample) = &shared.sample {
                    sample.record(&rec)?;
                }
            }
            Ok(())
        })();
        if let Err(err) = io {
            shared.fail(format!("[{}] output failure: {err:#}", worker.id));
            return;
        }

        let summary = format!(
            "Game {}: {} vs {}: {} {{{}}}",
            idx + 1,
            rec.black,
            rec.white,
            rec.outcome.score_string(),
            rec.outcome.reason
        );
        println!("[{}] {summary}", worker.id);
        shared.ring.push(summary);

        let counts = shared.jobs.add_result(job.pair, wld);
        let score_line = format!(
            "Score of {} vs {}: {} - {} - {}  [{:.3}] {}",
            shared.jobs.name(job.ei[0]),
            shared.jobs.name(job.ei[1]),
            counts.wins(),
            counts.losses(),
            counts.draws(),
            counts.score(),
            counts.total()
        );
        println!("{score_line}");
        shared.ring.push(score_line);

        if let Some(sprt) = &options.sprt {
            if let Some(conclusion) = sprt.status(counts.wins(), counts.losses(), counts.draws()) {
                let line = format!(
                    "SPRT: {conclusion} after {} games (llr {:.2}, bounds [{:.2}, {:.2}])",
                    counts.total(),
                    sprt.llr(counts.wins(), counts.losses(), counts.draws()),
                    sprt.lower_bound(),
                    sprt.upper_bound()
                );
                println!("{line}");
                shared.ring.push(line);
                shared.jobs.stop();
            }
        }

        shared.jobs.print_results(options.games);

        if options.fatal_error
            && matches!(rec.outcome.reason, GameEndReason::Crash | GameEndReason::ProtocolError)
        {
            shared.fail(format!(
                "[{}] engine failure in game {} ({})",
                worker.id,
                idx + 1,
                rec.outcome.reason
            ));
            return;
        }
    }

    for engine in &mut engines {
        engine.terminate(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineOptions, Options};

    fn engine(cmd: &str) -> EngineOptions {
        EngineOptions { cmd: cmd.to_string(), ..EngineOptions::default() }
    }

    #[test]
    fn new_validates_and_counts_jobs() {
        let options = Options { games: 2, rounds: 3, ..Options::default() };
        let tournament =
            Tournament::new(options, vec![engine("./a"), engine("./b"), engine("./c")]).unwrap();
        // 3 pairs * 3 rounds * 2 games
        let progress = tournament.progress();
        assert_eq!(progress.total, 18);
        assert_eq!(progress.completed, 0);
        assert!(progress.running);
        assert!(progress.workers.is_empty());
    }

    #[test]
    fn new_rejects_single_engine() {
        assert!(Tournament::new(Options::default(), vec![engine("./a")]).is_err());
    }
}
