//! Adaptive `eth_getLogs` range scanner.
//!
//! Nodes cap the number of logs a single query may return. The scanner walks
//! the requested range in ascending sub-ranges, halving the sub-range size
//! whenever the node reports the cap was hit. A shrunk step is kept for the
//! rest of the scan: dense blocks tend to cluster, so growing back right away
//! mostly buys another rejected query.

use crate::models::{BlockRange, LogEntry};
use crate::rpc::{FetchError, FetchErrorKind, LogSource};
use log::{error, info, warn};
use thiserror::Error;

pub const DEFAULT_INITIAL_STEP: u64 = 5_000;
pub const DEFAULT_MIN_STEP: u64 = 128;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid step sizes: initial_step={initial_step}, min_step={min_step} (need 1 <= min_step <= initial_step)")]
    InvalidStep { initial_step: u64, min_step: u64 },
    #[error("scan aborted at {range}: {source}")]
    Aborted {
        range: BlockRange,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub initial_step: u64,
    pub min_step: u64,
    /// Abort on `Fatal` fetch errors instead of skipping the sub-range.
    pub strict: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            initial_step: DEFAULT_INITIAL_STEP,
            min_step: DEFAULT_MIN_STEP,
            strict: false,
        }
    }
}

/// Cursor/step state machine. Every transition either keeps the cursor and
/// shrinks the step, or moves the cursor past the current sub-range, so the
/// final sub-ranges tile the scan range exactly.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    cursor: Option<u64>,
    end: u64,
    step: u64,
    min_step: u64,
}

impl ScanCursor {
    pub fn new(range: BlockRange, initial_step: u64, min_step: u64) -> Result<Self, ScanError> {
        if min_step == 0 || initial_step < min_step {
            return Err(ScanError::InvalidStep {
                initial_step,
                min_step,
            });
        }
        Ok(Self {
            cursor: Some(range.start),
            end: range.end,
            step: initial_step,
            min_step,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Sub-range to fetch next, `None` once the whole range has been covered.
    pub fn current(&self) -> Option<BlockRange> {
        let start = self.cursor?;
        let to = start.saturating_add(self.step - 1).min(self.end);
        BlockRange::new(start, to)
    }

    /// Move past the current sub-range, whether it was fetched or abandoned.
    pub fn advance(&mut self) {
        self.cursor = self
            .current()
            .and_then(|r| r.end.checked_add(1))
            .filter(|next| *next <= self.end);
    }

    /// Halve the step for another attempt at the same cursor. Returns `false`
    /// when the step is already at the floor.
    pub fn shrink(&mut self) -> bool {
        if self.step <= self.min_step {
            return false;
        }
        self.step = (self.step / 2).max(self.min_step);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    Fetched { logs: usize },
    Abandoned { reason: String },
}

/// Final attempt for one sub-range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: BlockRange,
    pub outcome: SegmentOutcome,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub logs: Vec<LogEntry>,
    pub segments: Vec<Segment>,
}

impl ScanReport {
    /// Number of blocks whose logs are missing from `logs`.
    pub fn abandoned_blocks(&self) -> u64 {
        self.segments
            .iter()
            .filter(|s| matches!(s.outcome, SegmentOutcome::Abandoned { .. }))
            .map(|s| s.range.block_count())
            .sum()
    }

    fn abandon(&mut self, range: BlockRange, reason: &FetchError) {
        self.segments.push(Segment {
            range,
            outcome: SegmentOutcome::Abandoned {
                reason: reason.to_string(),
            },
        });
    }
}

/// Fetch every log in `range`, one sub-range at a time in ascending order.
pub async fn scan<S>(source: &S, range: BlockRange, opts: ScanOptions) -> Result<ScanReport, ScanError>
where
    S: LogSource + ?Sized,
{
    let mut cursor = ScanCursor::new(range, opts.initial_step, opts.min_step)?;
    let mut report = ScanReport::default();

    info!(
        "Scanning Transfer logs over {} ({} blocks), step={}",
        range,
        range.block_count(),
        opts.initial_step
    );

    while let Some(sub) = cursor.current() {
        match source.fetch_logs(sub).await {
            Ok(logs) => {
                info!("  {} ok, {} logs", sub, logs.len());
                report.segments.push(Segment {
                    range: sub,
                    outcome: SegmentOutcome::Fetched { logs: logs.len() },
                });
                report.logs.extend(logs);
                cursor.advance();
            }
            Err(err) if err.kind == FetchErrorKind::RateLimited => {
                if cursor.shrink() {
                    warn!(
                        "  {} hit the result cap, retrying with step={}",
                        sub,
                        cursor.step()
                    );
                } else {
                    error!(
                        "  {} still over the result cap at min step {}, skipping: {}",
                        sub,
                        cursor.step(),
                        err
                    );
                    report.abandon(sub, &err);
                    cursor.advance();
                }
            }
            Err(err) if err.kind == FetchErrorKind::Fatal && opts.strict => {
                return Err(ScanError::Aborted { range: sub, source: err });
            }
            Err(err) => {
                warn!("  {} failed (step={}), skipping: {}", sub, cursor.step(), err);
                report.abandon(sub, &err);
                cursor.advance();
            }
        }
    }

    let lost = report.abandoned_blocks();
    if lost > 0 {
        warn!(
            "Scan finished with {} logs; {} blocks in abandoned sub-ranges",
            report.logs.len(),
            lost
        );
    } else {
        info!("Scan finished with {} logs", report.logs.len());
    }
    Ok(report)
}
