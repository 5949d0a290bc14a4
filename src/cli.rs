use std::env;
use std::iter::Peekable;
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;

use anyhow::bail;

use crate::config::{EngineOptions, Options, SampleConfig, SampleFormat};
use crate::gomoku::Rule;
use crate::sprt::SprtParams;
use crate::util::{parse_fp_from_str, parse_int_from_str, parse_millis, Res};

/// Engine settings as given on the command line, with unset fields still
/// unset so `-each` can fill them in afterwards.
#[derive(Debug, Default, Clone)]
pub struct EngineCliArgs {
    pub name: Option<String>,
    pub cmd: Option<String>,
    pub timeout_turn: Option<i64>,
    pub timeout_match: Option<i64>,
    pub increment: Option<i64>,
    pub nodes: Option<i64>,
    pub depth: Option<i64>,
    pub num_threads: Option<i64>,
    pub max_memory: Option<i64>,
    pub tolerance: Option<i64>,
    pub options: Vec<String>,
}

impl EngineCliArgs {
    fn merge_defaults(&mut self, each: &EngineCliArgs) {
        self.name = self.name.take().or_else(|| each.name.clone());
        self.cmd = self.cmd.take().or_else(|| each.cmd.clone());
        self.timeout_turn = self.timeout_turn.or(each.timeout_turn);
        self.timeout_match = self.timeout_match.or(each.timeout_match);
        self.increment = self.increment.or(each.increment);
        self.nodes = self.nodes.or(each.nodes);
        self.depth = self.depth.or(each.depth);
        self.num_threads = self.num_threads.or(each.num_threads);
        self.max_memory = self.max_memory.or(each.max_memory);
        self.tolerance = self.tolerance.or(each.tolerance);
        if self.options.is_empty() {
            self.options = each.options.clone();
        }
    }

    fn build(self) -> EngineOptions {
        let defaults = EngineOptions::default();
        EngineOptions {
            name: self.name.unwrap_or_default(),
            cmd: self.cmd.unwrap_or_default(),
            timeout_turn: self.timeout_turn.unwrap_or(defaults.timeout_turn),
            timeout_match: self.timeout_match.unwrap_or(defaults.timeout_match),
            increment: self.increment.unwrap_or(defaults.increment),
            nodes: self.nodes.unwrap_or(defaults.nodes),
            depth: self.depth.unwrap_or(defaults.depth),
            num_threads: self.num_threads.unwrap_or(defaults.num_threads),
            max_memory: self.max_memory.unwrap_or(defaults.max_memory),
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            options: self.options,
        }
    }
}

/// Splits a `key=value` token. Bare keys (no `=`) come back with `None`,
/// which flag-like settings such as `compress` use. Values may contain
/// further `=` characters (think `cmd=./engine --mode=strong`).
fn parse_key_equals_value(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (arg, None),
    }
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Res<&'a str> {
    value.ok_or_else(|| anyhow::anyhow!("Expected '=<value>' after '{key}'"))
}

fn next_arg<I: Iterator<Item = String>>(args: &mut Peekable<I>, name: &str) -> Res<String> {
    match args.next() {
        None => bail!("Missing value for {name} (args ended)"),
        Some(arg) if arg.starts_with('-') => {
            bail!("Missing value for {name} (next arg was '{arg}')")
        }
        Some(arg) => Ok(arg),
    }
}

fn next_int<T: num::PrimInt + FromStr>(
    args: &mut Peekable<impl Iterator<Item = String>>,
    name: &str,
) -> Res<T> {
    parse_int_from_str(&next_arg(args, name)?, name)
}

/// Consumes `key=value` tokens until the next `-flag`, in the style of
/// cutechess `-engine` blocks.
pub fn parse_engine<I: Iterator<Item = String>>(args: &mut Peekable<I>) -> Res<EngineCliArgs> {
    let mut res = EngineCliArgs::default();
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg);
        match key {
            "name" => res.name = Some(required(key, value)?.to_string()),
            "cmd" => res.cmd = Some(required(key, value)?.to_string()),
            "timeout_turn" => res.timeout_turn = Some(parse_millis(required(key, value)?, key)?),
            "timeout_match" => res.timeout_match = Some(parse_millis(required(key, value)?, key)?),
            "increment" => res.increment = Some(parse_millis(required(key, value)?, key)?),
            "nodes" => res.nodes = Some(parse_int_from_str(required(key, value)?, key)?),
            "depth" => res.depth = Some(parse_int_from_str(required(key, value)?, key)?),
            "threads" | "thread_num" => {
                res.num_threads = Some(parse_int_from_str(required(key, value)?, key)?)
            }
            "max_memory" => res.max_memory = Some(parse_int_from_str(required(key, value)?, key)?),
            "tolerance" => res.tolerance = Some(parse_millis(required(key, value)?, key)?),
            x => match x.strip_prefix("option.") {
                Some(option) => {
                    res.options.push(format!("{option} {}", required(key, value)?));
                }
                None => bail!("Unknown engine setting '{x}'"),
            },
        }
    }
    Ok(res)
}

fn parse_sprt<I: Iterator<Item = String>>(args: &mut Peekable<I>) -> Res<SprtParams> {
    let mut res = SprtParams { elo0: 0.0, elo1: 5.0, alpha: 0.05, beta: 0.05 };
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg);
        let value = required(key, value)?;
        match key {
            "elo0" => res.elo0 = parse_fp_from_str(value, key)?,
            "elo1" => res.elo1 = parse_fp_from_str(value, key)?,
            "alpha" => res.alpha = parse_fp_from_str(value, key)?,
            "beta" => res.beta = parse_fp_from_str(value, key)?,
            x => bail!("Unknown sprt setting '{x}'"),
        }
    }
    Ok(res)
}

fn parse_count_score<I: Iterator<Item = String>>(
    args: &mut Peekable<I>,
    what: &str,
) -> Res<(usize, i32)> {
    let (mut count, mut score) = (0usize, 0i32);
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg);
        let value = required(key, value)?;
        match key {
            "count" => count = parse_int_from_str(value, key)?,
            "score" => score = parse_int_from_str(value, key)?,
            x => bail!("Unknown {what} setting '{x}'"),
        }
    }
    if count == 0 {
        bail!("The {what} adjudication needs a nonzero count=<plies>");
    }
    Ok((count, score))
}

fn parse_sample<I: Iterator<Item = String>>(args: &mut Peekable<I>) -> Res<SampleConfig> {
    let mut file = None;
    let mut format = SampleFormat::default();
    let mut compress = false;
    while let Some(arg) = args.peek() {
        if arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let (key, value) = parse_key_equals_value(&arg);
        match key {
            "file" => file = Some(PathBuf::from(required(key, value)?)),
            "format" => {
                format = SampleFormat::from_str(required(key, value)?)
                    .map_err(|_| anyhow::anyhow!("Sample format must be 'csv' or 'bin'"))?
            }
            "compress" => compress = true,
            x => bail!("Unknown sample setting '{x}'"),
        }
    }
    let Some(file) = file else {
        bail!("The sample recorder needs file=<path>");
    };
    Ok(SampleConfig { file, format, compress })
}

/// cutechess-cli expects top-level arguments with a single `-`, but the much
/// more common `--long` syntax is accepted too.
pub fn parse_args<I: Iterator<Item = String>>(
    args: &mut Peekable<I>,
) -> Res<(Options, Vec<EngineOptions>)> {
    let mut options = Options::default();
    let mut engines: Vec<EngineCliArgs> = vec![];
    let mut each = EngineCliArgs::default();

    while let Some(mut arg) = args.next() {
        if arg.starts_with("--") {
            arg.remove(0);
        }
        match arg.as_str() {
            "-h" | "-help" => {
                print_help();
                exit(0);
            }
            "-v" | "-version" => {
                println!("clamps {}", env!("CARGO_PKG_VERSION"));
                exit(0);
            }
            "-engine" => engines.push(parse_engine(args)?),
            "-each" => each = parse_engine(args)?,
            "-games" => options.games = next_int(args, "games")?,
            "-rounds" => options.rounds = next_int(args, "rounds")?,
            "-concurrency" => options.concurrency = next_int(args, "concurrency")?,
            "-gauntlet" => options.gauntlet = true,
            "-openings" => options.openings = Some(PathBuf::from(next_arg(args, "openings")?)),
            "-repeat" => options.repeat = true,
            "-random" => options.random = true,
            "-srand" => options.srand = next_int(args, "srand")?,
            "-sprt" => options.sprt = Some(parse_sprt(args)?),
            "-resign" => {
                (options.resign_count, options.resign_score) = parse_count_score(args, "resign")?
            }
            "-draw" => (options.draw_count, options.draw_score) = parse_count_score(args, "draw")?,
            "-forceDraw" | "-forcedraw" => options.force_draw_after = next_int(args, "forceDraw")?,
            "-boardsize" => options.board_size = next_int(args, "boardsize")?,
            "-rule" => {
                let name = next_arg(args, "rule")?;
                options.rule = Rule::from_str(&name).map_err(|_| {
                    anyhow::anyhow!("Unknown rule '{name}' (expected freestyle, standard or renju)")
                })?;
            }
            "-pgn" => options.pgn = Some(PathBuf::from(next_arg(args, "pgn")?)),
            "-sgf" => options.sgf = Some(PathBuf::from(next_arg(args, "sgf")?)),
            "-msg" => options.msg = Some(PathBuf::from(next_arg(args, "msg")?)),
            "-sample" => options.sample = Some(parse_sample(args)?),
            "-debug" => options.debug = true,
            "-log" => options.log = true,
            "-fatalError" | "-fatalerror" => options.fatal_error = true,
            "-saveLoseOnly" | "-saveloseonly" => options.save_lose_only = true,
            x => bail!("Unrecognized option '{x}'. Use -help for a list of all valid options"),
        }
    }

    for engine in &mut engines {
        engine.merge_defaults(&each);
    }
    Ok((options, engines.into_iter().map(EngineCliArgs::build).collect()))
}

pub fn parse_cli() -> Res<(Options, Vec<EngineOptions>)> {
    let mut args = env::args().skip(1).peekable();
    parse_args(&mut args)
}

fn print_help() {
    println!(
        "clamps - a tournament manager for Gomocup engines

Usage: clamps -engine cmd=<exe> [k=v...] -engine cmd=<exe> [k=v...] [options]

Engine settings (also valid after -each, which sets defaults for all):
  cmd=<exe> name=<s> timeout_turn=<ms|s> timeout_match=<ms|s> increment=<ms|s>
  max_memory=<bytes> nodes=<n> depth=<n> threads=<n> tolerance=<ms|s>
  option.<key>=<value>   forwarded to the engine as 'INFO <key> <value>'

Tournament options:
  -games <n> -rounds <n> -concurrency <n> -gauntlet
  -boardsize <n> -rule freestyle|standard|renju
  -openings <file> -repeat -random -srand <seed>
  -resign count=<plies> score=<cp>  -draw count=<plies> score=<cp>
  -forceDraw <plies>
  -sprt elo0=<e> elo1=<e> alpha=<a> beta=<b>
  -pgn <file> -sgf <file> -msg <file>
  -sample file=<path> [format=csv|bin] [compress]
  -debug -log -fatalError -saveLoseOnly"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Res<(Options, Vec<EngineOptions>)> {
        let mut iter = args.iter().map(|s| s.to_string()).peekable();
        parse_args(&mut iter)
    }

    #[test]
    fn full_command_line() {
        let (options, engines) = parse(&[
            "-engine", "cmd=./rapfi", "name=rapfi", "option.caution_factor=2",
            "-engine", "cmd=./pela",
            "-each", "timeout_turn=5s", "timeout_match=180s", "tolerance=250",
            "-games", "8", "-rounds", "2", "-concurrency", "4",
            "-boardsize", "20", "-rule", "renju",
            "-openings", "book.txt", "-repeat", "-random", "-srand", "42",
            "-resign", "count=4", "score=1000",
            "-draw", "count=10", "score=25",
            "-forceDraw", "200",
            "-sprt", "elo0=0", "elo1=10", "alpha=0.05", "beta=0.05",
            "-pgn", "out.pgn", "-msg", "games.txt",
            "-sample", "file=samples.bin", "format=bin", "compress",
            "-debug", "-fatalError",
        ])
        .unwrap();

        assert_eq!(engines.len(), 2);
        assert_eq!(engines[0].name, "rapfi");
        assert_eq!(engines[0].cmd, "./rapfi");
        assert_eq!(engines[0].options, vec!["caution_factor 2".to_string()]);
        // -each filled the unset fields of both engines
        assert_eq!(engines[0].timeout_turn, 5000);
        assert_eq!(engines[1].timeout_match, 180_000);
        assert_eq!(engines[1].tolerance, 250);
        assert!(engines[1].options.is_empty());

        assert_eq!((options.games, options.rounds, options.concurrency), (8, 2, 4));
        assert_eq!(options.board_size, 20);
        assert_eq!(options.rule, Rule::Renju);
        assert_eq!(options.openings.as_deref(), Some(std::path::Path::new("book.txt")));
        assert!(options.repeat && options.random && options.debug && options.fatal_error);
        assert_eq!(options.srand, 42);
        assert_eq!((options.resign_count, options.resign_score), (4, 1000));
        assert_eq!((options.draw_count, options.draw_score), (10, 25));
        assert_eq!(options.force_draw_after, 200);
        let sprt = options.sprt.unwrap();
        assert_eq!((sprt.elo0, sprt.elo1), (0.0, 10.0));
        let sample = options.sample.unwrap();
        assert_eq!(sample.format, SampleFormat::Bin);
        assert!(sample.compress);
        assert!(options.sgf.is_none());
    }

    #[test]
    fn engine_settings_beat_each() {
        let (_, engines) = parse(&[
            "-engine", "cmd=./a", "timeout_turn=100",
            "-engine", "cmd=./b",
            "-each", "timeout_turn=900",
        ])
        .unwrap();
        assert_eq!(engines[0].timeout_turn, 100);
        assert_eq!(engines[1].timeout_turn, 900);
    }

    #[test]
    fn double_dash_is_accepted() {
        let (options, _) = parse(&["--games", "3"]).unwrap();
        assert_eq!(options.games, 3);
    }

    #[test]
    fn errors_on_junk() {
        assert!(parse(&["-nonsense"]).is_err());
        assert!(parse(&["-engine", "cmd=./a", "turbo=yes"]).is_err());
        assert!(parse(&["-games"]).is_err());
        assert!(parse(&["-games", "-rounds"]).is_err());
        assert!(parse(&["-rule", "swap2"]).is_err());
        assert!(parse(&["-resign", "score=100"]).is_err());
        assert!(parse(&["-sample", "format=csv"]).is_err());
    }

    #[test]
    fn values_may_contain_equals() {
        let (_, engines) = parse(&["-engine", "cmd=./engine --mode=strong"]).unwrap();
        assert_eq!(engines[0].cmd, "./engine --mode=strong");
    }
}
