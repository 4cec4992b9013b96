//! Progress tracking for the oracle log scan.
//!
//! [`SyncProgressTracker`] records the block windows the sync engine has scanned and what the
//! dispatcher did with their logs. It logs progress periodically and flags gaps between windows.

use crate::sync::engine::ScanWindow;
use crate::sync::events::{DispatchOutcome, ScanMode};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// First block of this session
    start_block: u64,
    /// Highest block covered by a scanned window
    highest_scanned_block: u64,
    has_scanned: bool,
    /// Last block of the previous window
    last_scanned_to: Option<u64>,
    gaps: usize,
    /// Most recent gap as (end of previous window, start of next)
    last_gap: Option<(u64, u64)>,
    backfill_windows: usize,
    live_windows: usize,
    events_dispatched: usize,
    foreign_events: usize,
    undecodable_logs: usize,
    /// Block at which progress was last logged
    last_logged_block: u64,
}

impl SyncProgressTracker {
    pub fn new(start_block: u64) -> Self {
        Self {
            start_block,
            highest_scanned_block: start_block,
            has_scanned: false,
            last_scanned_to: None,
            gaps: 0,
            last_gap: None,
            backfill_windows: 0,
            live_windows: 0,
            events_dispatched: 0,
            foreign_events: 0,
            undecodable_logs: 0,
            last_logged_block: start_block,
        }
    }

    pub fn record_window(&mut self, window: &ScanWindow) {
        self.highest_scanned_block = self.highest_scanned_block.max(window.to);
        self.has_scanned = true;
        if let Some(prev) = self.last_scanned_to {
            if window.from != prev + 1 {
                warn!(
                    "Gap detected: blocks between {} and {} were not scanned",
                    prev, window.from
                );
                self.gaps += 1;
                self.last_gap = Some((prev, window.from));
            }
        }
        self.last_scanned_to = Some(window.to);
        match window.mode {
            ScanMode::Backfill => self.backfill_windows += 1,
            ScanMode::Live => self.live_windows += 1,
        }
    }

    pub fn record_dispatch(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Dispatched => self.events_dispatched += 1,
            DispatchOutcome::Foreign => self.foreign_events += 1,
            DispatchOutcome::Undecodable => self.undecodable_logs += 1,
        }
    }

    /// Log every 1000 blocks or when forced
    pub fn log_progress(&mut self, force: bool) {
        let blocks_since_last_log = self
            .highest_scanned_block
            .saturating_sub(self.last_logged_block);
        let should_log = force || blocks_since_last_log >= 1000;

        if should_log && self.has_scanned {
            info!(
                "Sync progress: scanned up to block {}, {} events handled, {} foreign",
                self.highest_scanned_block, self.events_dispatched, self.foreign_events
            );
            self.last_logged_block = self.highest_scanned_block;
        }
    }

    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_block: self.start_block,
            highest_scanned_block: self.highest_scanned_block,
            backfill_windows: self.backfill_windows,
            live_windows: self.live_windows,
            events_dispatched: self.events_dispatched,
            foreign_events: self.foreign_events,
            undecodable_logs: self.undecodable_logs,
            gaps: self.gaps,
            last_gap: self.last_gap,
        }
    }
}

/// Statistics about the scan
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub start_block: u64,
    pub highest_scanned_block: u64,
    pub backfill_windows: usize,
    pub live_windows: usize,
    pub events_dispatched: usize,
    pub foreign_events: usize,
    pub undecodable_logs: usize,
    pub gaps: usize,
    pub last_gap: Option<(u64, u64)>,
}

impl SyncStats {
    pub fn summary(&self) -> String {
        format!(
            "Scanned blocks {} to {} in {} backfill and {} live windows: {} events handled, {} foreign, {} undecodable{}",
            self.start_block,
            self.highest_scanned_block,
            self.backfill_windows,
            self.live_windows,
            self.events_dispatched,
            self.foreign_events,
            self.undecodable_logs,
            match self.gaps {
                0 => String::new(),
                n => format!(" ({} gaps)", n),
            }
        )
    }
}
