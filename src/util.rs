use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;

use lazy_static::lazy_static;
use num::PrimInt;

pub type Res<T> = anyhow::Result<T>;

lazy_static! {
    static ref PROGRAM_EPOCH: Instant = Instant::now();
}

/// Shared monotonic clock with millisecond resolution. Deadlines are stored
/// as offsets from the program epoch so they can be compared across threads
/// without passing `Instant`s around.
pub fn system_msec() -> i64 {
    PROGRAM_EPOCH.elapsed().as_millis() as i64
}

pub fn parse_int_from_str<T: PrimInt + FromStr>(as_str: &str, name: &str) -> Res<T> {
    // parse::<T>() returns a completely unbounded Err on failure, so we just
    // write the error message ourselves
    as_str
        .parse::<T>()
        .map_err(|_err| anyhow::anyhow!("Couldn't parse {name} ('{as_str}')"))
}

pub fn parse_fp_from_str<T: num::Float + FromStr>(as_str: &str, name: &str) -> Res<T> {
    as_str
        .parse::<T>()
        .map_err(|_err| anyhow::anyhow!("Couldn't parse {name} ('{as_str}')"))
}

/// Accepts a plain number of milliseconds, or a number with an `ms` or `s`
/// suffix (`5000`, `5000ms` and `5s` are all five seconds).
pub fn parse_millis(as_str: &str, name: &str) -> Res<i64> {
    let s = as_str.trim();
    if let Some(secs) = s.strip_suffix("ms") {
        parse_int_from_str(secs.trim(), name)
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: f64 = parse_fp_from_str(secs.trim(), name)?;
        Ok((secs * 1000.0).round() as i64)
    } else {
        parse_int_from_str(s, name)
    }
}

const LOG_RING_CAP: usize = 500;

/// Bounded buffer of progress lines. Workers push, the supervisor drains;
/// lines pushed while the ring is full are dropped.
#[derive(Debug, Default)]
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
}

impl LogRing {
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() < LOG_RING_CAP {
            lines.push_back(line);
        }
    }

    pub fn drain(&self) -> Vec<String> {
        self.lines.lock().unwrap().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_millis_suffixes() {
        assert_eq!(parse_millis("5000", "t").unwrap(), 5000);
        assert_eq!(parse_millis("5000ms", "t").unwrap(), 5000);
        assert_eq!(parse_millis("5s", "t").unwrap(), 5000);
        assert_eq!(parse_millis("2.5s", "t").unwrap(), 2500);
        assert!(parse_millis("fast", "t").is_err());
    }

    #[test]
    fn log_ring_is_bounded() {
        let ring = LogRing::default();
        for i in 0..2 * LOG_RING_CAP {
            ring.push(format!("line {i}"));
        }
        let drained = ring.drain();
        assert_eq!(drained.len(), LOG_RING_CAP);
        assert_eq!(drained[0], "line 0");
        assert!(ring.drain().is_empty());
    }

    #[test]
    fn msec_clock_is_monotonic() {
        let a = system_msec();
        let b = system_msec();
        assert!(b >= a);
        assert!(a >= 0);
    }
}
