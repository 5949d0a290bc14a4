use std::fs::File;
use std::process::Child;
use std::sync::{Arc, Mutex};

use crate::config::{EngineOptions, Options};
use crate::gomoku::Position;
use crate::play::engine::{Engine, EngineError};
use crate::play::{GameObserver, Info};
use crate::util::{LogRing, Res};

/// A fired deadline that stayed armed this long means the engine survived a
/// kill and the process state can no longer be trusted.
const UNRESPONSIVE_MS: i64 = 3000;

#[derive(Debug, Default)]
struct DeadlineState {
    set: bool,
    engine_name: String,
    description: String,
    started: i64,
    expires: i64,
    fired: bool,
    child: Option<Arc<Mutex<Child>>>,
}

/// The rendezvous between a worker's blocking engine reads and the
/// supervisor's watchdog: armed before each read with a budget, read
/// concurrently by the watchdog, which kills the awaited engine once the
/// deadline passes so the read unblocks with EOF.
#[derive(Debug, Default)]
pub struct DeadlineRegister {
    state: Mutex<DeadlineState>,
}

/// What the watchdog learned from one poll of a register.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DeadlineVerdict {
    /// not armed, or armed and not yet due
    Quiet,
    /// the deadline passed and the engine was just killed after thinking
    /// for `thinking_ms`
    Fired { engine_name: String, description: String, thinking_ms: i64 },
    /// the engine ignored the kill for more than [`UNRESPONSIVE_MS`]
    Unresponsive { engine_name: String, description: String, overdue: i64 },
}

impl DeadlineRegister {
    pub fn arm(&self, engine_name: &str, description: &str, expires: i64, child: Arc<Mutex<Child>>) {
        let mut state = self.state.lock().unwrap();
        state.set = true;
        state.engine_name = engine_name.to_string();
        state.description = description.to_string();
        state.started = crate::util::system_msec();
        state.expires = expires;
        state.fired = false;
        state.child = Some(child);
    }

    /// Clears the register after the read returned; reports whether the
    /// watchdog terminated the engine while it was armed.
    pub fn disarm(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.set = false;
        state.child = None;
        state.fired
    }

    /// One watchdog pass. The first poll past the deadline performs the
    /// one-shot kill; later polls report unresponsiveness once the overdue
    /// time exceeds the kill escalation window.
    pub fn poll(&self, now: i64) -> DeadlineVerdict {
        let mut state = self.state.lock().unwrap();
        if !state.set || now < state.expires {
            return DeadlineVerdict::Quiet;
        }
        if !state.fired {
            state.fired = true;
            if let Some(child) = &state.child {
                let _ = child.lock().unwrap().kill();
            }
            return DeadlineVerdict::Fired {
                engine_name: state.engine_name.clone(),
                description: state.description.clone(),
                thinking_ms: now - state.started,
            };
        }
        let overdue = now - state.expires;
        if overdue > UNRESPONSIVE_MS {
            DeadlineVerdict::Unresponsive {
                engine_name: state.engine_name.clone(),
                description: state.description.clone(),
                overdue,
            }
        } else {
            DeadlineVerdict::Quiet
        }
    }

    /// `(engine_name, description, remaining_ms)` while armed, for progress
    /// snapshots.
    pub fn status(&self, now: i64) -> Option<(String, String, i64)> {
        let state = self.state.lock().unwrap();
        if !state.set {
            return None;
        }
        Some((state.engine_name.clone(), state.description.clone(), (state.expires - now).max(0)))
    }
}

/// A worker owns its deadline register and, while running, two engines. The
/// game loop itself lives in `tournament::worker_main`.
#[derive(Debug)]
pub struct Worker {
    pub id: usize,
    pub deadline: Arc<DeadlineRegister>,
    /// per-worker protocol log, shared with both engines
    pub log: Option<Arc<Mutex<File>>>,
}

impl Worker {
    pub fn new(id: usize, log_name: Option<&str>) -> Res<Self> {
        let log = match log_name {
            Some(name) => Some(Arc::new(Mutex::new(File::create(name).map_err(|err| {
                anyhow::anyhow!("Couldn't create worker log file '{name}': {err}")
            })?))),
            None => None,
        };
        Ok(Self { id, deadline: Arc::new(DeadlineRegister::default()), log })
    }
}

/// Sends the per-game handshake: `START <size>` for a fresh process,
/// `RESTART` otherwise, waits for `OK`, then pushes the engine settings.
pub fn prepare_engine(
    engine: &mut Engine,
    spec: &EngineOptions,
    fresh: bool,
    options: &Options,
) -> Result<(), EngineError> {
    if fresh {
        engine.writeln(&format!("START {}", options.board_size))?;
    } else {
        engine.writeln("RESTART")?;
    }
    engine.wait_for_ok()?;
    engine.writeln(&format!("INFO timeout_turn {}", spec.timeout_turn))?;
    engine.writeln(&format!("INFO timeout_match {}", spec.timeout_match))?;
    engine.writeln(&format!("INFO max_memory {}", spec.max_memory))?;
    engine.writeln(&format!(
        "INFO time_left {}",
        if spec.timeout_match > 0 { spec.timeout_match } else { i32::MAX as i64 }
    ))?;
    engine.writeln("INFO game_type 1")?;
    engine.writeln(&format!("INFO rule {}", options.rule.code()))?;
    if spec.num_threads > 0 {
        engine.writeln(&format!("INFO thread_num {}", spec.num_threads))?;
    }
    for option in &spec.options {
        engine.writeln(&format!("INFO {option}"))?;
    }
    Ok(())
}

/// The observer a worker plugs into its games: engine chatter goes into the
/// per-game message buffer (when a message log is configured) and into the
/// supervisor's log ring.
pub struct WorkerObserver<'a> {
    pub messages: Option<&'a mut String>,
    pub ring: &'a LogRing,
}

impl GameObserver for WorkerObserver<'_> {
    fn on_message(&mut self, engine_name: &str, text: &str) {
        if let Some(messages) = self.messages.as_mut() {
            messages.push_str(text);
            messages.push('\n');
        }
        self.ring.push(format!("{engine_name}: {text}"));
    }

    fn on_info(&mut self, _engine_idx: usize, _info: &Info, _ply: usize) {}

    fn on_move(&mut self, _pos: &Position) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn sleeper() -> Arc<Mutex<Child>> {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        Arc::new(Mutex::new(child))
    }

    #[test]
    fn quiet_before_the_deadline() {
        let reg = DeadlineRegister::default();
        assert_eq!(reg.poll(1000), DeadlineVerdict::Quiet);
        let child = sleeper();
        reg.arm("slowpoke", "move", 5000, child.clone());
        assert_eq!(reg.poll(4999), DeadlineVerdict::Quiet);
        assert_eq!(reg.status(1000), Some(("slowpoke".to_string(), "move".to_string(), 4000)));
        assert!(!reg.disarm());
        child.lock().unwrap().kill().unwrap();
        child.lock().unwrap().wait().unwrap();
    }

    #[test]
    fn fires_once_then_escalates() {
        let reg = DeadlineRegister::default();
        let child = sleeper();
        reg.arm("slowpoke", "move", 5000, child.clone());
        assert!(matches!(reg.poll(5000), DeadlineVerdict::Fired { .. }));
        // the one-shot callback killed the child
        child.lock().unwrap().wait().unwrap();
        // within the escalation window nothing else happens
        assert_eq!(reg.poll(6000), DeadlineVerdict::Quiet);
        // a register that stays armed past the window is fatal
        match reg.poll(5000 + UNRESPONSIVE_MS + 1) {
            DeadlineVerdict::Unresponsive { engine_name, overdue, .. } => {
                assert_eq!(engine_name, "slowpoke");
                assert!(overdue > UNRESPONSIVE_MS);
            }
            v => panic!("expected Unresponsive, got {v:?}"),
        }
        // the worker noticing the EOF learns the deadline fired
        assert!(reg.disarm());
        assert_eq!(reg.poll(10_000_000), DeadlineVerdict::Quiet);
    }
}
