//! Whole-file parsing with size-switched I/O strategies.
//!
//! Files below 500 MiB are streamed as slab batches (one contiguous buffer
//! per ~1024 lines) through a bounded rayon bridge; larger files are split
//! into 64 MiB chunks read positionally in parallel. Both paths hand the
//! same line sequence to the same per-line scanner, so they produce
//! identical output for identical bytes.

use crate::format::LogFormat;
use crate::{ParseOptions, Request};
use memchr::{memchr, memchr_iter};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LARGE_FILE_THRESHOLD: u64 = 500 * 1024 * 1024;
const CHUNK_BYTES: u64 = 64 * 1024 * 1024;
const BATCH_LINES: usize = 1024;
const MAX_WORKERS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("i/o error while reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to start parser workers: {0}")]
    WorkerPool(String),
}

/// Result of a whole-file parse. Lines that failed structurally are counted
/// in `dropped_lines` and absent from `requests`.
#[derive(Debug)]
pub struct ParseOutcome {
    pub requests: Vec<Request>,
    pub total_lines: u64,
    pub dropped_lines: u64,
    pub elapsed: Duration,
}

impl ParseOutcome {
    pub fn lines_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_lines as f64 / secs
        } else {
            0.0
        }
    }
}

pub fn parse_file(
    path: &Path,
    format: &LogFormat,
    opts: ParseOptions,
) -> Result<ParseOutcome, ParseError> {
    let started = Instant::now();
    let len = std::fs::metadata(path)
        .map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKERS);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|err| ParseError::WorkerPool(err.to_string()))?;

    let (requests, total_lines, dropped_lines) = if len >= LARGE_FILE_THRESHOLD {
        parse_chunked(path, len, format, opts, CHUNK_BYTES, &pool)?
    } else {
        parse_streamed(path, format, opts, &pool)?
    };

    let outcome = ParseOutcome {
        requests,
        total_lines,
        dropped_lines,
        elapsed: started.elapsed(),
    };
    log::info!(
        "parsed {} of {} lines from {} in {:.2?} ({:.0} lines/s)",
        outcome.requests.len(),
        outcome.total_lines,
        path.display(),
        outcome.elapsed,
        outcome.lines_per_sec(),
    );
    Ok(outcome)
}

/// One slab of raw lines: a contiguous buffer plus (start, end) spans.
struct Batch {
    index: usize,
    buf: Vec<u8>,
    spans: Vec<(u32, u32)>,
}

struct BatchReader<R> {
    reader: R,
    path: PathBuf,
    index: usize,
    done: bool,
}

impl<R: BufRead> Iterator for BatchReader<R> {
    type Item = Result<Batch, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = Vec::with_capacity(BATCH_LINES * 128);
        let mut spans = Vec::with_capacity(BATCH_LINES);
        while spans.len() < BATCH_LINES {
            let start = buf.len();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(_) => {
                    let end = trim_line_end(&buf, start);
                    spans.push((start as u32, end as u32));
                }
                Err(source) => {
                    self.done = true;
                    return Some(Err(ParseError::Read {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }
        if spans.is_empty() {
            return None;
        }
        let index = self.index;
        self.index += 1;
        Some(Ok(Batch { index, buf, spans }))
    }
}

fn trim_line_end(buf: &[u8], start: usize) -> usize {
    let mut end = buf.len();
    while end > start && (buf[end - 1] == b'\n' || buf[end - 1] == b'\r') {
        end -= 1;
    }
    end
}

/// Parse one slab with a single reused request buffer.
fn parse_batch(batch: &Batch, format: &LogFormat, opts: ParseOptions) -> (Vec<Request>, u64) {
    let mut out = Vec::with_capacity(batch.spans.len());
    let mut dropped = 0u64;
    let mut scratch = Request::default();
    for &(start, end) in &batch.spans {
        let line = &batch.buf[start as usize..end as usize];
        if format.parse_line(line, opts, &mut scratch) {
            out.push(scratch.clone());
        } else {
            dropped += 1;
        }
    }
    (out, dropped)
}

fn parse_streamed(
    path: &Path,
    format: &LogFormat,
    opts: ParseOptions,
    pool: &rayon::ThreadPool,
) -> Result<(Vec<Request>, u64, u64), ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let batches = BatchReader {
        reader: BufReader::with_capacity(1 << 20, file),
        path: path.to_path_buf(),
        index: 0,
        done: false,
    };

    // The bridge pulls batches only as workers free up, so the reader is
    // naturally back-pressured by slow parsing.
    let mut parsed: Vec<(usize, Vec<Request>, u64, u64)> = pool.install(|| {
        batches
            .par_bridge()
            .map(|batch| {
                let batch = batch?;
                let lines = batch.spans.len() as u64;
                let (requests, dropped) = parse_batch(&batch, format, opts);
                Ok((batch.index, requests, lines, dropped))
            })
            .collect::<Result<Vec<_>, ParseError>>()
    })?;
    parsed.sort_unstable_by_key(|(index, ..)| *index);

    let mut requests = Vec::with_capacity(parsed.iter().map(|(_, r, ..)| r.len()).sum());
    let mut total = 0u64;
    let mut dropped = 0u64;
    for (_, mut batch_requests, lines, batch_dropped) in parsed {
        requests.append(&mut batch_requests);
        total += lines;
        dropped += batch_dropped;
    }
    Ok((requests, total, dropped))
}

fn parse_chunked(
    path: &Path,
    len: u64,
    format: &LogFormat,
    opts: ParseOptions,
    chunk_bytes: u64,
    pool: &rayon::ThreadPool,
) -> Result<(Vec<Request>, u64, u64), ParseError> {
    let chunk_count = usize::try_from(len.div_ceil(chunk_bytes)).unwrap_or(usize::MAX);
    let parsed: Vec<(Vec<Request>, u64, u64)> = pool.install(|| {
        (0..chunk_count)
            .into_par_iter()
            .map(|chunk| {
                let offset = chunk as u64 * chunk_bytes;
                let size = chunk_bytes.min(len - offset);
                parse_chunk(path, offset, size, format, opts)
            })
            .collect::<Result<Vec<_>, ParseError>>()
    })?;

    let mut requests = Vec::with_capacity(parsed.iter().map(|(r, ..)| r.len()).sum());
    let mut total = 0u64;
    let mut dropped = 0u64;
    for (mut chunk_requests, lines, chunk_dropped) in parsed {
        requests.append(&mut chunk_requests);
        total += lines;
        dropped += chunk_dropped;
    }
    Ok((requests, total, dropped))
}

/// Parse the lines starting inside `[offset, offset + size)`.
///
/// A chunk owns exactly the lines whose first byte lies in its range. To
/// decide whether its first bytes open a new line, the read starts one byte
/// early; a line crossing the chunk end is completed by reading forward to
/// the next newline. Together the chunks cover every line exactly once.
fn parse_chunk(
    path: &Path,
    offset: u64,
    size: u64,
    format: &LogFormat,
    opts: ParseOptions,
) -> Result<(Vec<Request>, u64, u64), ParseError> {
    let open_err = |source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    };
    let read_err = |source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(open_err)?;
    let lead = u64::from(offset > 0);
    file.seek(SeekFrom::Start(offset - lead)).map_err(read_err)?;

    let mut buf = Vec::with_capacity((size + lead) as usize + 4096);
    (&mut file)
        .take(size + lead)
        .read_to_end(&mut buf)
        .map_err(read_err)?;

    // Skip through the first newline: everything before it belongs to a
    // line started in an earlier chunk. The one-byte lead makes a chunk
    // whose offset falls exactly on a line start keep that line.
    let start = if offset == 0 {
        0
    } else {
        match memchr(b'\n', &buf) {
            Some(newline) => newline + 1,
            // No line starts in this chunk at all.
            None => return Ok((Vec::new(), 0, 0)),
        }
    };

    // Complete the final line if it crosses the chunk end.
    if buf.last().is_some_and(|&byte| byte != b'\n') {
        let mut tail = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut tail).map_err(read_err)?;
            if n == 0 {
                break;
            }
            match memchr(b'\n', &tail[..n]) {
                Some(newline) => {
                    buf.extend_from_slice(&tail[..=newline]);
                    break;
                }
                None => buf.extend_from_slice(&tail[..n]),
            }
        }
    }

    let mut out = Vec::new();
    let mut total = 0u64;
    let mut dropped = 0u64;
    let mut scratch = Request::default();
    let mut line_start = start;
    let mut emit = |line: &[u8], out: &mut Vec<Request>, dropped: &mut u64| {
        if format.parse_line(line, opts, &mut scratch) {
            out.push(scratch.clone());
        } else {
            *dropped += 1;
        }
    };
    for newline in memchr_iter(b'\n', &buf[start..]) {
        let end = trim_line_end(&buf[..start + newline + 1], line_start);
        total += 1;
        emit(&buf[line_start..end], &mut out, &mut dropped);
        line_start = start + newline + 1;
    }
    if line_start < buf.len() {
        // Final line of the file without a trailing newline.
        let end = trim_line_end(&buf, line_start);
        total += 1;
        emit(&buf[line_start..end], &mut out, &mut dropped);
    }
    Ok((out, total, dropped))
}
