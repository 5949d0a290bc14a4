use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;

use crate::util::Res;

#[derive(Debug, Eq, PartialEq)]
struct Entry {
    idx: usize,
    payload: String,
}

// min-heap on idx
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.idx.cmp(&self.idx)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Inner {
    out: BufWriter<File>,
    next: usize,
    pending: BinaryHeap<Entry>,
}

/// A writer that accepts game transcripts in completion order but emits them
/// to the file in strictly ascending job index: out-of-order completions
/// wait in a heap until the gap before them is filled.
#[derive(Debug)]
pub struct SeqWriter {
    inner: Mutex<Inner>,
}

impl SeqWriter {
    pub fn create(path: &Path) -> Res<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Couldn't open output file '{}'", path.display()))?;
        Ok(Self {
            inner: Mutex::new(Inner { out: BufWriter::new(file), next: 0, pending: BinaryHeap::new() }),
        })
    }

    /// Queues the payload for job `idx` and writes out every payload that is
    /// now in sequence.
    pub fn push(&self, idx: usize, payload: String) -> Res<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.pending.push(Entry { idx, payload });
        while inner.pending.peek().is_some_and(|entry| entry.idx == inner.next) {
            let entry = inner.pending.pop().unwrap();
            inner.out.write_all(entry.payload.as_bytes()).context("writing transcript")?;
            inner.next += 1;
        }
        inner.out.flush().context("flushing transcript")?;
        Ok(())
    }

    /// How many payloads are still waiting for a predecessor. Zero after a
    /// tournament that completed normally.
    pub fn backlog(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;
    use std::fs;

    #[test]
    fn emits_in_ascending_idx_order() {
        let path = temp_dir().join(format!("clamps-seqwriter-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let writer = SeqWriter::create(&path).unwrap();
        writer.push(2, "two\n".to_string()).unwrap();
        writer.push(0, "zero\n".to_string()).unwrap();
        assert_eq!(writer.backlog(), 1);
        writer.push(3, "three\n".to_string()).unwrap();
        writer.push(1, "one\n".to_string()).unwrap();
        assert_eq!(writer.backlog(), 0);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "zero\none\ntwo\nthree\n");
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn in_order_pushes_pass_through() {
        let path = temp_dir().join(format!("clamps-seqwriter-inorder-{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let writer = SeqWriter::create(&path).unwrap();
        for i in 0..5 {
            writer.push(i, format!("{i}\n")).unwrap();
            assert_eq!(writer.backlog(), 0);
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "0\n1\n2\n3\n4\n");
        fs::remove_file(path).unwrap();
    }
}
