//! Record sources and shard-aware scanning.
//!
//! A [`RecordSource`] is anything that can be reopened and seeked: a file on
//! disk or a buffer in memory. Scanning is always done over a byte range
//! ([`Shard`]); a line belongs to the shard containing its first byte, so
//! any set of contiguous shards covering the source visits every line
//! exactly once.

use crate::compute::validation::parse_line;
use crate::error::Result;
use bytes::Bytes;
use popgrid_types::PopulationRecord;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::hash::Hasher;
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// A reopenable dataset of census centroid lines.
pub trait RecordSource: Send + Sync {
    type Reader: BufRead + Seek;

    /// Stable identity used as part of the build cache key.
    fn identity(&self) -> String;

    /// Total size of the dataset in bytes.
    fn byte_len(&self) -> Result<u64>;

    /// Open a fresh reader positioned at the start of the dataset.
    fn open(&self) -> Result<Self::Reader>;
}

/// A dataset stored on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for FileSource {
    type Reader = BufReader<File>;

    fn identity(&self) -> String {
        let path = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        format!("file:{}", path.display())
    }

    fn byte_len(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn open(&self) -> Result<Self::Reader> {
        let file = File::open(&self.path)?;
        Ok(BufReader::with_capacity(READ_BUFFER_BYTES, file))
    }
}

/// A dataset held in memory.
///
/// The identity combines the name with the length and a hash of the
/// contents, so two different buffers never share a cached index.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
    fingerprint: u64,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut hasher = FxHasher::default();
        hasher.write(&data);
        Self {
            name: name.into(),
            fingerprint: hasher.finish(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build a dataset from a header and data lines.
    pub fn from_lines<I, L>(name: impl Into<String>, header: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        let mut text = String::from(header);
        text.push('\n');
        for line in lines {
            text.push_str(line.as_ref());
            text.push('\n');
        }
        Self::new(name, text)
    }
}

impl RecordSource for MemorySource {
    type Reader = Cursor<Bytes>;

    fn identity(&self) -> String {
        format!("memory:{}:{}:{:016x}", self.name, self.data.len(), self.fingerprint)
    }

    fn byte_len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn open(&self) -> Result<Self::Reader> {
        Ok(Cursor::new(self.data.clone()))
    }
}

/// A contiguous byte range `[start, end)` of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl Shard {
    /// A single shard spanning the whole source.
    pub fn whole(len: u64) -> Self {
        Self {
            index: 0,
            start: 0,
            end: len,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `len` bytes into at most `count` contiguous, non-overlapping shards.
///
/// Never returns an empty list; a zero-length source yields one empty shard.
///
/// # Examples
///
/// ```
/// use popgrid::source::plan_shards;
///
/// let shards = plan_shards(10, 3);
/// assert_eq!(shards.len(), 3);
/// assert_eq!(shards[0].start, 0);
/// assert_eq!(shards[2].end, 10);
/// ```
pub fn plan_shards(len: u64, count: usize) -> Vec<Shard> {
    let count = (count.max(1) as u64).min(len.max(1));
    (0..count)
        .map(|i| Shard {
            index: i as usize,
            start: split_point(len, i, count),
            end: split_point(len, i + 1, count),
        })
        .collect()
}

fn split_point(len: u64, i: u64, count: u64) -> u64 {
    (len as u128 * i as u128 / count as u128) as u64
}

/// Line counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Data lines read, header excluded
    pub lines: u64,
    /// Lines that produced a valid record
    pub records: u64,
    /// Lines skipped because they could not be parsed or validated
    pub malformed: u64,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.lines += other.lines;
        self.records += other.records;
        self.malformed += other.malformed;
    }
}

/// Visit every valid record whose line starts inside `shard`.
///
/// Malformed lines are logged and counted, never fatal. Read errors are
/// returned to the caller.
pub fn scan_shard<S, F>(source: &S, shard: &Shard, mut visit: F) -> Result<ScanStats>
where
    S: RecordSource + ?Sized,
    F: FnMut(PopulationRecord),
{
    let mut stats = ScanStats::default();
    if shard.is_empty() {
        return Ok(stats);
    }

    let mut reader = source.open()?;
    let mut buf = Vec::with_capacity(256);

    // Align to the first line that begins at or after `shard.start`.
    let mut pos = 0u64;
    if shard.start > 0 {
        reader.seek(SeekFrom::Start(shard.start - 1))?;
        let skipped = reader.read_until(b'\n', &mut buf)?;
        pos = shard.start - 1 + skipped as u64;
    }

    while pos < shard.end {
        buf.clear();
        let line_start = pos;
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        pos += read as u64;

        if line_start == 0 {
            // header
            continue;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        stats.lines += 1;
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(record) => {
                stats.records += 1;
                visit(record);
            }
            Err(err) => {
                stats.malformed += 1;
                log::warn!(
                    "Skipping malformed line at byte {} of {}: {} ({:?})",
                    line_start,
                    source.identity(),
                    err,
                    line
                );
            }
        }
    }

    Ok(stats)
}

/// Visit every valid record of the source in file order.
pub fn for_each_record<S, F>(source: &S, visit: F) -> Result<ScanStats>
where
    S: RecordSource + ?Sized,
    F: FnMut(PopulationRecord),
{
    let len = source.byte_len()?;
    scan_shard(source, &Shard::whole(len), visit)
}
