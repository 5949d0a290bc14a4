use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use crate::gomoku::Square;
use crate::play::worker::DeadlineRegister;
use crate::play::{EngineClock, GameObserver, Info};
use crate::util::system_msec;

/// Grace for handshakes (`ABOUT`, `OK` after `START`) when the configured
/// tolerance is smaller; engines are allowed some startup cost.
const HANDSHAKE_GRACE_MS: i64 = 3000;
/// How long `terminate` waits for a clean exit after `END`.
const TERMINATE_GRACE_MS: i64 = 1000;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine process '{cmd}': {source}")]
    SpawnFailure {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lost the pipe to engine '{0}'")]
    PipeBroken(String),
    #[error("engine '{name}' reported an error: {message}")]
    Protocol { name: String, message: String },
    #[error("engine '{name}' timed out ({context})")]
    Timeout { name: String, context: String },
    #[error("engine '{0}' exited unexpectedly")]
    Crash(String),
}

/// How to ask the engine for its next move.
#[derive(Debug, Clone)]
pub enum ThinkRequest {
    /// empty board, this engine opens the game
    Begin,
    /// the opponent just played this move
    Turn(Square),
    /// full position sync; the u8 is stone ownership relative to the
    /// receiving engine (1 = own, 2 = opponent)
    Board(Vec<(Square, u8)>),
}

#[derive(Debug, Clone, Copy)]
pub struct ThinkOutcome {
    pub mv: Square,
    pub elapsed: i64,
}

struct EngineProcess {
    /// shared with the deadline register so the watchdog can kill it while
    /// this thread is blocked on `stdout`
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One engine subprocess with line-oriented Gomocup I/O. The owning worker's
/// deadline register is armed for every read that has a time budget.
pub struct Engine {
    pub name: String,
    register: Arc<DeadlineRegister>,
    debug: bool,
    tolerance: i64,
    proc: Option<EngineProcess>,
    crashed: bool,
    /// whether the watchdog killed the engine during the last read
    deadline_fired: bool,
    log: Option<Arc<Mutex<File>>>,
}

impl Engine {
    pub fn new(register: Arc<DeadlineRegister>, debug: bool, log: Option<Arc<Mutex<File>>>) -> Self {
        Self {
            name: String::new(),
            register,
            debug,
            tolerance: 0,
            proc: None,
            crashed: false,
            deadline_fired: false,
            log,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.proc.is_some()
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed
    }

    pub fn tolerance(&self) -> i64 {
        self.tolerance
    }

    /// Spawns the engine with its working directory set to the binary's
    /// directory, then performs the `ABOUT` handshake. The name from the
    /// `ABOUT` answer wins over `fallback_name`.
    pub fn start(&mut self, cmd: &str, fallback_name: &str, tolerance: i64) -> Result<(), EngineError> {
        self.terminate(false);
        self.tolerance = tolerance;
        self.name = fallback_name.to_string();

        let mut words = cmd.split_whitespace();
        let exe = words.next().filter(|w| !w.is_empty()).ok_or_else(|| EngineError::SpawnFailure {
            cmd: cmd.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;
        let mut command = Command::new(exe);
        command.args(words).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::null());
        if let Some(dir) = Path::new(exe).parent().filter(|p| !p.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        let mut child = command
            .spawn()
            .map_err(|source| EngineError::SpawnFailure { cmd: cmd.to_string(), source })?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        self.proc = Some(EngineProcess { child: Arc::new(Mutex::new(child)), stdin, stdout });
        self.crashed = false;

        self.writeln("ABOUT")?;
        let deadline = system_msec() + HANDSHAKE_GRACE_MS.max(tolerance);
        match self.readln(Some(deadline), "ABOUT") {
            Some(line) => {
                if let Some(name) = about_name(&line) {
                    self.name = name;
                }
                Ok(())
            }
            None => Err(self.eof_error("ABOUT")),
        }
    }

    pub fn writeln(&mut self, line: &str) -> Result<(), EngineError> {
        let Some(proc) = self.proc.as_mut() else {
            return Err(EngineError::PipeBroken(self.name.clone()));
        };
        if writeln!(proc.stdin, "{line}").is_err() {
            self.crashed = true;
            return Err(EngineError::PipeBroken(self.name.clone()));
        }
        self.trace('>', line);
        Ok(())
    }

    /// Reads one line, arming the worker's deadline register for the wait
    /// when a deadline is given. `None` means pipe EOF, which also covers
    /// the watchdog having killed this engine (`deadline_fired` tells the
    /// two apart).
    pub fn readln(&mut self, deadline: Option<i64>, desc: &str) -> Option<String> {
        self.deadline_fired = false;
        let Some(proc) = self.proc.as_mut() else {
            return None;
        };
        if let Some(expires) = deadline {
            self.register.arm(&self.name, desc, expires, proc.child.clone());
        }
        let mut buf = String::new();
        let res = proc.stdout.read_line(&mut buf);
        if deadline.is_some() {
            self.deadline_fired = self.register.disarm();
        }
        match res {
            Ok(0) | Err(_) => {
                self.crashed = true;
                None
            }
            Ok(_) => {
                let line = buf.trim().to_string();
                self.trace('<', &line);
                Some(line)
            }
        }
    }

    /// Waits for the `OK` answer to `START`/`RESTART`, skipping chatter.
    pub fn wait_for_ok(&mut self) -> Result<(), EngineError> {
        let deadline = system_msec() + HANDSHAKE_GRACE_MS.max(self.tolerance);
        loop {
            let Some(line) = self.readln(Some(deadline), "OK") else {
                return Err(self.eof_error("OK"));
            };
            match classify(&line) {
                EngineLine::Other(text) if text.eq_ignore_ascii_case("OK") => return Ok(()),
                EngineLine::Error(message) => {
                    return Err(EngineError::Protocol { name: self.name.clone(), message })
                }
                _ => {}
            }
        }
    }

    /// Sends the think trigger and consumes engine output until a move
    /// arrives. Elapsed wall time is charged against `clock`; exceeding the
    /// turn budget by more than the tolerance is a timeout even if a move
    /// did arrive.
    pub fn think(
        &mut self,
        req: &ThinkRequest,
        clock: &mut EngineClock,
        ply: usize,
        engine_idx: usize,
        info: &mut Info,
        obs: &mut dyn GameObserver,
    ) -> Result<ThinkOutcome, EngineError> {
        let budget = clock.turn_budget();
        self.writeln(&format!("INFO time_left {}", clock.reported_time_left()))?;
        match req {
            ThinkRequest::Begin => self.writeln("BEGIN")?,
            ThinkRequest::Turn(sq) => self.writeln(&format!("TURN {sq}"))?,
            ThinkRequest::Board(stones) => {
                self.writeln("BOARD")?;
                for (sq, owner) in stones {
                    self.writeln(&format!("{sq},{owner}"))?;
                }
                self.writeln("DONE")?;
            }
        }

        let start = system_msec();
        let deadline = budget.map(|b| start + b + self.tolerance);
        let mv = loop {
            let Some(line) = self.readln(deadline, "move") else {
                return Err(if self.deadline_fired {
                    EngineError::Timeout {
                        name: self.name.clone(),
                        context: format!(
                            "killed {}ms past the {}ms budget",
                            system_msec() - start - budget.unwrap_or(0),
                            budget.unwrap_or(0)
                        ),
                    }
                } else {
                    self.eof_error("move")
                });
            };
            match classify(&line) {
                EngineLine::Move(sq) => break sq,
                EngineLine::Message(text) => {
                    if parse_info_tokens(&text, info) {
                        obs.on_info(engine_idx, info, ply);
                    }
                    obs.on_message(&self.name, &text);
                }
                EngineLine::Info(text) => {
                    if parse_info_tokens(&text, info) {
                        obs.on_info(engine_idx, info, ply);
                    }
                }
                EngineLine::Debug(text) => {
                    if self.debug {
                        obs.on_message(&self.name, &text);
                    }
                }
                EngineLine::Error(message) => {
                    return Err(EngineError::Protocol { name: self.name.clone(), message })
                }
                EngineLine::Unknown(text) => obs.on_message(&self.name, &text),
                EngineLine::Suggest(_) | EngineLine::Other(_) => {}
            }
        };
        let elapsed = system_msec() - start;
        if let Some(budget) = budget {
            if elapsed > budget + self.tolerance {
                return Err(EngineError::Timeout {
                    name: self.name.clone(),
                    context: format!("{elapsed}ms > {budget}ms + {}ms tolerance", self.tolerance),
                });
            }
        }
        clock.consume(elapsed);
        Ok(ThinkOutcome { mv, elapsed })
    }

    /// Asks the engine to quit, waits a short grace, then kills it. Always
    /// reaps the child. Safe to call when nothing is running.
    pub fn terminate(&mut self, force: bool) {
        let Some(mut proc) = self.proc.take() else {
            return;
        };
        if !force {
            let _ = writeln!(proc.stdin, "END");
        }
        // closing stdin gives engines that read until EOF a second hint
        drop(proc.stdin);
        let start = system_msec();
        while !force && system_msec() - start < TERMINATE_GRACE_MS {
            if let Ok(Some(_)) = proc.child.lock().unwrap().try_wait() {
                return;
            }
            sleep(Duration::from_millis(10));
        }
        let mut child = proc.child.lock().unwrap();
        let _ = child.kill();
        let _ = child.wait();
    }

    fn eof_error(&self, desc: &str) -> EngineError {
        if self.deadline_fired {
            EngineError::Timeout { name: self.name.clone(), context: format!("no answer to {desc}") }
        } else {
            EngineError::Crash(self.name.clone())
        }
    }

    fn trace(&self, direction: char, line: &str) {
        if let Some(log) = &self.log {
            let _ = writeln!(log.lock().unwrap(), "{} {direction} {line}", self.name);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.terminate(false);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("running", &self.proc.is_some())
            .field("crashed", &self.crashed)
            .finish()
    }
}

enum EngineLine {
    Move(Square),
    Message(String),
    Info(String),
    Debug(String),
    Error(String),
    Unknown(String),
    Suggest(String),
    Other(String),
}

/// Prefix-based classification of an engine output line, case-insensitive
/// and tolerant of surrounding whitespace.
fn classify(line: &str) -> EngineLine {
    let line = line.trim();
    let (word, tail) = match line.split_once(char::is_whitespace) {
        Some((word, tail)) => (word, tail.trim()),
        None => (line, ""),
    };
    match word.to_ascii_uppercase().as_str() {
        "MESSAGE" => EngineLine::Message(tail.to_string()),
        "INFO" => EngineLine::Info(tail.to_string()),
        "DEBUG" => EngineLine::Debug(tail.to_string()),
        "ERROR" => EngineLine::Error(tail.to_string()),
        "UNKNOWN" => EngineLine::Unknown(tail.to_string()),
        "SUGGEST" => EngineLine::Suggest(tail.to_string()),
        _ => match Square::from_str(line) {
            Ok(sq) => EngineLine::Move(sq),
            Err(_) => EngineLine::Other(line.to_string()),
        },
    }
}

/// Extracts the engine name from an `ABOUT` answer such as
/// `name="Rapfi", version="0.5", author="..."`.
fn about_name(line: &str) -> Option<String> {
    let start = line.find("name=\"")? + "name=\"".len();
    let end = line[start..].find('"')?;
    let name = line[start..start + end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Tolerant parser for thinking messages like `depth=7 ev=210 tm=340
/// n=12345` or `DEPTH 8 EV -50`. Tokens may come in any order, as `key=val`
/// or `key val`; unknown tokens are skipped and missing ones keep the
/// previous values. Returns whether anything was understood.
pub fn parse_info_tokens(text: &str, info: &mut Info) -> bool {
    let mut words = text.split_whitespace().peekable();
    let mut parsed = false;
    while let Some(word) = words.next() {
        let (key, inline_val) = match word.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (word, None),
        };
        let key = key.to_ascii_lowercase();
        let known = matches!(key.as_str(), "depth" | "ev" | "eval" | "score" | "n" | "nodes" | "tm" | "time");
        if !known {
            continue;
        }
        let val = match inline_val {
            Some(v) => v.to_string(),
            None => match words.next() {
                Some(v) => v.to_string(),
                None => break,
            },
        };
        match key.as_str() {
            // depth may come as a range like "8-12"; the first number is
            // the nominal depth
            "depth" => {
                if let Some(d) = leading_int(&val) {
                    info.depth = d;
                    parsed = true;
                }
            }
            "ev" | "eval" | "score" => {
                if let Ok(s) = val.trim_start_matches('+').parse::<i32>() {
                    info.score = s;
                    parsed = true;
                }
            }
            "tm" | "time" => {
                if let Ok(t) = val.parse::<i64>() {
                    info.time_ms = t;
                    parsed = true;
                }
            }
            "n" | "nodes" => {
                if let Some(n) = parse_node_count(&val) {
                    info.nodes = n;
                    parsed = true;
                }
            }
            _ => unreachable!(),
        }
    }
    if parsed {
        info.seen = true;
    }
    parsed
}

fn leading_int(s: &str) -> Option<i32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Node counts may carry a k/m/g suffix, e.g. `4.3m`.
fn parse_node_count(s: &str) -> Option<u64> {
    let lower = s.to_ascii_lowercase();
    let (digits, mult) = match lower.strip_suffix(['k', 'm', 'g']) {
        Some(rest) => {
            let mult = match lower.as_bytes()[lower.len() - 1] {
                b'k' => 1_000.0,
                b'm' => 1_000_000.0,
                _ => 1_000_000_000.0,
            };
            (rest, mult)
        }
        None => (lower.as_str(), 1.0),
    };
    let val: f64 = digits.parse().ok()?;
    if val < 0.0 {
        return None;
    }
    Some((val * mult) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefixes() {
        assert!(matches!(classify("message depth 3"), EngineLine::Message(t) if t == "depth 3"));
        assert!(matches!(classify("  MESSAGE hi"), EngineLine::Message(t) if t == "hi"));
        assert!(matches!(classify("ERROR unsupported rule"), EngineLine::Error(_)));
        assert!(matches!(classify("Unknown command"), EngineLine::Unknown(_)));
        assert!(matches!(classify("SUGGEST 9,9"), EngineLine::Suggest(_)));
        assert!(matches!(classify("DEBUG tt hits 42"), EngineLine::Debug(_)));
        assert!(matches!(classify("INFO score 12"), EngineLine::Info(_)));
        assert!(matches!(classify("10,12"), EngineLine::Move(sq) if sq == Square::new(10, 12)));
        assert!(matches!(classify(" 7,7 "), EngineLine::Move(_)));
        assert!(matches!(classify("OK"), EngineLine::Other(t) if t == "OK"));
    }

    #[test]
    fn info_tokens_any_order() {
        let mut info = Info::default();
        assert!(parse_info_tokens("depth=7 ev=210 tm=340 n=12345", &mut info));
        assert_eq!((info.depth, info.score, info.time_ms, info.nodes), (7, 210, 340, 12345));
        assert!(info.seen);

        // space-separated form, different order, negative score
        let mut info = Info::default();
        assert!(parse_info_tokens("ev -50 depth 3", &mut info));
        assert_eq!((info.depth, info.score), (3, -50));

        // missing tokens keep prior values
        assert!(parse_info_tokens("tm 99", &mut info));
        assert_eq!((info.depth, info.score, info.time_ms), (3, -50, 99));
    }

    #[test]
    fn info_tokens_oddballs() {
        let mut info = Info::default();
        assert!(parse_info_tokens("DEPTH 8-12 EV +120 N 4.3m", &mut info));
        assert_eq!(info.depth, 8);
        assert_eq!(info.score, 120);
        assert_eq!(info.nodes, 4_300_000);

        let mut info = Info::default();
        assert!(!parse_info_tokens("just some chatter", &mut info));
        assert!(!info.seen);
    }

    #[test]
    fn about_name_extraction() {
        assert_eq!(
            about_name(r#"name="Rapfi", version="0.5", author="x""#),
            Some("Rapfi".to_string())
        );
        assert_eq!(about_name(r#"author="x", name="pela 2""#), Some("pela 2".to_string()));
        assert_eq!(about_name(r#"name="""#), None);
        assert_eq!(about_name("no quotes here"), None);
    }

    #[test]
    fn node_suffixes() {
        assert_eq!(parse_node_count("12345"), Some(12345));
        assert_eq!(parse_node_count("1.5k"), Some(1500));
        assert_eq!(parse_node_count("2G"), Some(2_000_000_000));
        assert_eq!(parse_node_count("x"), None);
    }
}
