use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Mutex;

use anyhow::Context;
use fd_lock::RwLock;

use crate::config::{SampleConfig, SampleFormat};
use crate::gomoku::Color;
use crate::play::game::GameRecord;
use crate::util::Res;

enum Stream {
    Plain(BufWriter<File>),
    Lz4(Box<lz4::Encoder<BufWriter<File>>>),
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(w) => w.write(buf),
            Stream::Lz4(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(w) => w.flush(),
            Stream::Lz4(w) => w.flush(),
        }
    }
}

struct SinkState {
    stream: Option<Stream>,
    /// advisory lock on the sample file, taken around the end-of-stream
    /// frame when a signal handler races normal shutdown
    lock: RwLock<File>,
}

/// Records finished games for training data, as CSV lines or binary
/// records, optionally through a framed LZ4 stream whose header is written
/// on open and whose end frame is written on close.
pub struct SampleSink {
    format: SampleFormat,
    compress: bool,
    state: Mutex<SinkState>,
}

impl SampleSink {
    pub fn open(cfg: &SampleConfig) -> Res<Self> {
        // a compressed stream can't be appended to, so it truncates
        let file = if cfg.compress {
            OpenOptions::new().create(true).write(true).truncate(true).open(&cfg.file)
        } else {
            OpenOptions::new().create(true).append(true).open(&cfg.file)
        }
        .with_context(|| format!("Couldn't open sample file '{}'", cfg.file.display()))?;
        let lock = RwLock::new(file.try_clone().context("duplicating the sample file handle")?);
        let stream = if cfg.compress {
            Stream::Lz4(Box::new(
                lz4::EncoderBuilder::new()
                    .level(3)
                    .build(BufWriter::new(file))
                    .context("initializing the sample compressor")?,
            ))
        } else {
            Stream::Plain(BufWriter::new(file))
        };
        Ok(Self {
            format: cfg.format,
            compress: cfg.compress,
            state: Mutex::new(SinkState { stream: Some(stream), lock }),
        })
    }

    pub fn record(&self, rec: &GameRecord) -> Res<()> {
        let payload = match self.format {
            SampleFormat::Csv => csv_record(rec).into_bytes(),
            SampleFormat::Bin => bin_record(rec),
        };
        let mut state = self.state.lock().unwrap();
        let Some(stream) = state.stream.as_mut() else {
            // already closed by the signal path
            return Ok(());
        };
        stream.write_all(&payload).context("writing sample record")?;
        if !self.compress {
            stream.flush().context("flushing sample record")?;
        }
        Ok(())
    }

    /// Finishes the stream (for LZ4 this emits the end frame) and flushes.
    /// Idempotent; `from_signal` additionally takes the advisory file lock
    /// because the SIGINT handler may race the normal shutdown path.
    pub fn close(&self, from_signal: bool) {
        let mut state = self.state.lock().unwrap();
        let Some(stream) = state.stream.take() else {
            return;
        };
        if from_signal {
            let guard = state.lock.write();
            finish(stream);
            drop(guard);
        } else {
            finish(stream);
        }
    }
}

fn finish(stream: Stream) {
    match stream {
        Stream::Plain(mut w) => {
            let _ = w.flush();
        }
        Stream::Lz4(encoder) => {
            let (mut w, _res) = encoder.finish();
            let _ = w.flush();
        }
    }
}

fn result_char(rec: &GameRecord) -> char {
    match rec.outcome.winner {
        Some(Color::Black) => 'b',
        Some(Color::White) => 'w',
        None => 'd',
    }
}

/// One semicolon-separated line per game:
/// `size;result;reason;moves;evals`, moves as `x,y` pairs over the full
/// history (opening included), evals aligned with the moves (`-` where the
/// engine reported nothing).
fn csv_record(rec: &GameRecord) -> String {
    use std::fmt::Write;
    let mut moves = String::new();
    let mut evals = String::new();
    for (i, &(sq, _)) in rec.opening.moves().iter().enumerate() {
        if i > 0 {
            moves.push(' ');
            evals.push(' ');
        }
        let _ = write!(moves, "{sq}");
        evals.push('-');
    }
    for mv in &rec.moves {
        if !moves.is_empty() {
            moves.push(' ');
            evals.push(' ');
        }
        let _ = write!(moves, "{}", mv.sq);
        match mv.info {
            Some(info) => {
                let _ = write!(evals, "{}", info.score);
            }
            None => evals.push('-'),
        }
    }
    format!(
        "{};{};{};{};{}\n",
        rec.board_size,
        result_char(rec),
        rec.outcome.reason,
        moves,
        evals
    )
}

/// Binary layout, little endian: `u8 size`, `u8 result` (0 black wins,
/// 1 white, 2 draw), `u16 ply count`, then per ply `u8 x`, `u8 y`,
/// `i16 score`, `u8 depth`, `u16 elapsed ms` (zeros for opening plies).
fn bin_record(rec: &GameRecord) -> Vec<u8> {
    let plies = rec.opening.move_count() + rec.moves.len();
    let mut out = Vec::with_capacity(4 + plies * 7);
    out.push(rec.board_size as u8);
    out.push(match rec.outcome.winner {
        Some(Color::Black) => 0,
        Some(Color::White) => 1,
        None => 2,
    });
    out.extend_from_slice(&(plies as u16).to_le_bytes());
    for &(sq, _) in rec.opening.moves() {
        out.extend_from_slice(&[sq.x, sq.y]);
        out.extend_from_slice(&0i16.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    for mv in &rec.moves {
        out.extend_from_slice(&[mv.sq.x, mv.sq.y]);
        let info = mv.info.unwrap_or_default();
        out.extend_from_slice(&(info.score.clamp(i16::MIN as i32, i16::MAX as i32) as i16).to_le_bytes());
        out.push(info.depth.clamp(0, u8::MAX as i32) as u8);
        out.extend_from_slice(&(mv.elapsed_ms.clamp(0, u16::MAX as i64) as u16).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gomoku::{Position, Rule, Square};
    use crate::play::game::MoveRecord;
    use crate::play::Info;
    use crate::{GameEndReason, GameOutcome};
    use std::env::temp_dir;
    use std::fs;
    use std::io::Read;
    use std::path::PathBuf;

    fn record() -> GameRecord {
        let mut opening = Position::new(15);
        opening.place(Square::new(7, 7), Rule::Freestyle);
        GameRecord {
            board_size: 15,
            rule: Rule::Freestyle,
            round: 0,
            opening,
            moves: vec![
                MoveRecord {
                    sq: Square::new(8, 8),
                    color: Color::White,
                    info: Some(Info { score: -42, depth: 11, seen: true, ..Info::default() }),
                    elapsed_ms: 250,
                },
                MoveRecord { sq: Square::new(9, 9), color: Color::Black, info: None, elapsed_ms: 3 },
            ],
            outcome: GameOutcome { winner: None, reason: GameEndReason::AdjudicatedDraw },
            black: "a".to_string(),
            white: "b".to_string(),
        }
    }

    #[test]
    fn csv_layout() {
        let line = csv_record(&record());
        assert_eq!(line, "15;d;draw by adjudication;7,7 8,8 9,9;- -42 -\n");
    }

    #[test]
    fn bin_layout() {
        let bytes = bin_record(&record());
        assert_eq!(bytes.len(), 4 + 3 * 7);
        assert_eq!(bytes[0], 15);
        assert_eq!(bytes[1], 2);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 3);
        // first played move starts after the opening ply
        let mv = &bytes[4 + 7..4 + 14];
        assert_eq!((mv[0], mv[1]), (8, 8));
        assert_eq!(i16::from_le_bytes([mv[2], mv[3]]), -42);
        assert_eq!(mv[4], 11);
        assert_eq!(u16::from_le_bytes([mv[5], mv[6]]), 250);
    }

    fn temp_path(name: &str) -> PathBuf {
        temp_dir().join(format!("clamps-sample-{name}-{}", std::process::id()))
    }

    #[test]
    fn plain_sink_appends_lines() {
        let path = temp_path("plain");
        let _ = fs::remove_file(&path);
        let cfg =
            SampleConfig { file: path.clone(), format: SampleFormat::Csv, compress: false };
        let sink = SampleSink::open(&cfg).unwrap();
        sink.record(&record()).unwrap();
        sink.record(&record()).unwrap();
        sink.close(false);
        // close is idempotent and records after close are dropped
        sink.close(true);
        sink.record(&record()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn compressed_sink_writes_a_complete_frame() {
        let path = temp_path("lz4");
        let _ = fs::remove_file(&path);
        let cfg = SampleConfig { file: path.clone(), format: SampleFormat::Csv, compress: true };
        let sink = SampleSink::open(&cfg).unwrap();
        sink.record(&record()).unwrap();
        sink.close(false);
        let mut decoder = lz4::Decoder::new(fs::File::open(&path).unwrap()).unwrap();
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, csv_record(&record()));
        fs::remove_file(path).unwrap();
    }
}
