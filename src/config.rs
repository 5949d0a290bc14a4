use std::path::PathBuf;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::gomoku::{Rule, MAX_BOARD_SIZE, MIN_BOARD_SIZE};
use crate::sprt::SprtParams;
use crate::util::Res;

/// Per-engine configuration. Field names serialize to the camelCase keys the
/// original config files used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    pub name: String,
    pub cmd: String,
    /// ms per move, 0 = no per-move cap
    pub timeout_turn: i64,
    /// ms per match, 0 = untimed
    pub timeout_match: i64,
    /// ms added back after each move
    pub increment: i64,
    pub nodes: i64,
    pub depth: i64,
    pub num_threads: i64,
    /// bytes, sent as `INFO max_memory`
    pub max_memory: i64,
    /// grace the engine may exceed a deadline by before it loses on time
    pub tolerance: i64,
    /// freeform `key value` pairs forwarded as `INFO key value`
    pub options: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            cmd: String::new(),
            timeout_turn: 0,
            timeout_match: 0,
            increment: 0,
            nodes: 0,
            depth: 0,
            num_threads: 1,
            max_memory: 350_000_000,
            tolerance: 1000,
            options: vec![],
        }
    }
}

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum SampleFormat {
    #[default]
    #[display("csv")]
    Csv,
    #[display("bin")]
    Bin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleConfig {
    pub file: PathBuf,
    pub format: SampleFormat,
    pub compress: bool,
}

/// The whole tournament configuration apart from the per-engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// games per encounter (colors alternate within an encounter)
    pub games: usize,
    pub rounds: usize,
    pub concurrency: usize,
    /// engine 0 plays every other engine instead of a round robin
    pub gauntlet: bool,
    pub board_size: usize,
    pub rule: Rule,
    pub openings: Option<PathBuf>,
    /// games 2k and 2k+1 share an opening
    pub repeat: bool,
    /// shuffle the opening book
    pub random: bool,
    pub srand: u64,
    pub resign_count: usize,
    pub resign_score: i32,
    pub draw_count: usize,
    pub draw_score: i32,
    /// declare a draw once a game reaches this many plies, 0 = never
    pub force_draw_after: usize,
    pub pgn: Option<PathBuf>,
    pub sgf: Option<PathBuf>,
    pub msg: Option<PathBuf>,
    pub sample: Option<SampleConfig>,
    pub sprt: Option<SprtParams>,
    pub debug: bool,
    /// write per-worker protocol logs
    pub log: bool,
    /// promote engine failures to fatal errors
    pub fatal_error: bool,
    /// in gauntlet mode, only record games the challenger lost
    pub save_lose_only: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            games: 1,
            rounds: 1,
            concurrency: 1,
            gauntlet: false,
            board_size: 15,
            rule: Rule::default(),
            openings: None,
            repeat: false,
            random: false,
            srand: 0,
            resign_count: 0,
            resign_score: 0,
            draw_count: 0,
            draw_score: 0,
            force_draw_after: 0,
            pgn: None,
            sgf: None,
            msg: None,
            sample: None,
            sprt: None,
            debug: false,
            log: false,
            fatal_error: false,
            save_lose_only: false,
        }
    }
}

impl Options {
    pub fn validate(&self, engines: &[EngineOptions]) -> Res<()> {
        if engines.len() < 2 {
            bail!("At least two engines are required (got {})", engines.len());
        }
        for (i, engine) in engines.iter().enumerate() {
            if engine.cmd.is_empty() {
                bail!("Engine {} has no command; pass cmd=<executable>", i + 1);
            }
        }
        if !(MIN_BOARD_SIZE..=MAX_BOARD_SIZE).contains(&self.board_size) {
            bail!(
                "Board size {} is out of range [{MIN_BOARD_SIZE}, {MAX_BOARD_SIZE}]",
                self.board_size
            );
        }
        if self.games == 0 || self.rounds == 0 || self.concurrency == 0 {
            bail!("games, rounds and concurrency must all be at least 1");
        }
        if let Some(sprt) = &self.sprt {
            if sprt.elo0 >= sprt.elo1 {
                bail!("sprt requires elo0 < elo1 (got elo0={}, elo1={})", sprt.elo0, sprt.elo1);
            }
            if !(0.0..0.5).contains(&sprt.alpha) || !(0.0..0.5).contains(&sprt.beta) {
                bail!("sprt error rates must lie in (0, 0.5)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_options() -> Options {
        Options {
            games: 8,
            rounds: 2,
            concurrency: 4,
            gauntlet: true,
            board_size: 20,
            rule: Rule::Renju,
            openings: Some(PathBuf::from("book.txt")),
            repeat: true,
            random: true,
            srand: 42,
            resign_count: 4,
            resign_score: 1000,
            draw_count: 10,
            draw_score: 20,
            force_draw_after: 200,
            pgn: Some(PathBuf::from("out.pgn")),
            sample: Some(SampleConfig {
                file: PathBuf::from("samples.lz4"),
                format: SampleFormat::Bin,
                compress: true,
            }),
            sprt: Some(SprtParams { elo0: 0.0, elo1: 10.0, alpha: 0.05, beta: 0.05 }),
            fatal_error: true,
            ..Options::default()
        }
    }

    #[test]
    fn options_json_roundtrip() {
        let options = sample_options();
        let json = serde_json::to_string_pretty(&options).unwrap();
        let reloaded: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(options, reloaded);
    }

    #[test]
    fn engine_options_json_roundtrip() {
        let engine = EngineOptions {
            name: "rapfi".to_string(),
            cmd: "./engines/rapfi".to_string(),
            timeout_turn: 5000,
            timeout_match: 180_000,
            increment: 100,
            tolerance: 250,
            options: vec!["thread_num 4".to_string()],
            ..EngineOptions::default()
        };
        let json = serde_json::to_string(&engine).unwrap();
        // the keys must stay camelCase for compatibility with old configs
        assert!(json.contains("\"timeoutTurn\":5000"));
        assert!(json.contains("\"maxMemory\""));
        let reloaded: EngineOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(engine, reloaded);
    }

    #[test]
    fn validation_catches_bad_configs() {
        let engine = EngineOptions { cmd: "./a".to_string(), ..EngineOptions::default() };
        let options = Options::default();
        assert!(options.validate(&[engine.clone()]).is_err());
        assert!(options.validate(&[engine.clone(), engine.clone()]).is_ok());
        let bad_size = Options { board_size: 3, ..Options::default() };
        assert!(bad_size.validate(&[engine.clone(), engine.clone()]).is_err());
        let bad_sprt = Options {
            sprt: Some(SprtParams { elo0: 10.0, elo1: 0.0, alpha: 0.05, beta: 0.05 }),
            ..Options::default()
        };
        assert!(bad_sprt.validate(&[engine.clone(), engine]).is_err());
    }
}
