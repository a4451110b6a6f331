//! Observation stages applied to every packet the channel sends or receives.
//!
//! The active stage list is an immutable `Arc<[Stage]>` behind a mutex. The
//! lock is only held to clone or replace that pointer, so a reconfiguration
//! from another thread never observes a half-built list and never waits on
//! socket I/O.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::protocol::packet::PacketHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone)]
pub enum Stage {
    /// Logs every packet header and a hex prefix of its body at `trace` level
    Trace,
    Timing(Arc<TimingStats>),
    DebugHistory(Arc<DebugHistory>),
}

impl Stage {
    pub fn observe(&self, direction: Direction, header: PacketHeader, body: &[u8]) {
        match self {
            Stage::Trace => {
                tracing::trace!(
                    ?direction,
                    sequence_id = header.sequence_id,
                    length = header.length(),
                    body = %hex_prefix(body, 32),
                    "packet"
                );
            }
            Stage::Timing(stats) => stats.record(direction, body.len()),
            Stage::DebugHistory(history) => history.record(direction, header, body),
        }
    }
}

fn hex_prefix(body: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max * 3);
    for b in body.iter().take(max) {
        let _ = write!(out, "{b:02x} ");
    }
    if body.len() > max {
        out.push_str("...");
    }
    out.trim_end().to_string()
}

#[derive(Debug, Default)]
pub struct TimingStats {
    last_send: Mutex<Option<Instant>>,
    last_receive: Mutex<Option<Instant>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
}

impl TimingStats {
    fn record(&self, direction: Direction, len: usize) {
        let now = Some(Instant::now());
        match direction {
            Direction::Send => {
                *self.last_send.lock().unwrap_or_else(PoisonError::into_inner) = now;
                self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                self.packets_sent.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Receive => {
                *self.last_receive.lock().unwrap_or_else(PoisonError::into_inner) = now;
                self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                self.packets_received.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn last_send(&self) -> Option<Instant> {
        *self.last_send.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_receive(&self) -> Option<Instant> {
        *self.last_receive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }
}

/// Ring buffer of recent packet summaries
#[derive(Debug)]
pub struct DebugHistory {
    capacity: usize,
    entries: Mutex<VecDeque<String>>,
}

impl DebugHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    fn record(&self, direction: Direction, header: PacketHeader, body: &[u8]) {
        let arrow = match direction {
            Direction::Send => "client -> server",
            Direction::Receive => "server -> client",
        };
        let entry = format!(
            "{arrow} seq={} len={} [{}]",
            header.sequence_id,
            header.length(),
            hex_prefix(body, 16)
        );
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn render(&self) -> String {
        let entries = self.entries();
        if entries.is_empty() {
            return String::new();
        }
        let mut out = format!("\n\nLast {} packets:", entries.len());
        for entry in entries {
            out.push_str("\n  ");
            out.push_str(&entry);
        }
        out
    }
}

/// Shared, swappable stage list of one connection
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    stages: Arc<Mutex<Arc<[Stage]>>>,
}

impl Default for PipelineHandle {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PipelineHandle {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages: Arc::new(Mutex::new(stages.into())),
        }
    }

    pub fn snapshot(&self) -> Arc<[Stage]> {
        Arc::clone(&self.stages.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, stages: Vec<Stage>) {
        let stages: Arc<[Stage]> = stages.into();
        *self.stages.lock().unwrap_or_else(PoisonError::into_inner) = stages;
    }

    pub fn push(&self, stage: Stage) {
        let mut stages = self.snapshot().to_vec();
        stages.push(stage);
        self.replace(stages);
    }

    /// Drop every stage, leaving plain framing
    pub fn unwrap_to_base(&self) {
        self.replace(Vec::new());
    }

    pub fn observe(&self, direction: Direction, header: PacketHeader, body: &[u8]) {
        for stage in self.snapshot().iter() {
            stage.observe(direction, header, body);
        }
    }

    pub fn history(&self) -> Option<Arc<DebugHistory>> {
        self.snapshot().iter().find_map(|stage| match stage {
            Stage::DebugHistory(history) => Some(Arc::clone(history)),
            _ => None,
        })
    }

    pub fn timing(&self) -> Option<Arc<TimingStats>> {
        self.snapshot().iter().find_map(|stage| match stage {
            Stage::Timing(stats) => Some(Arc::clone(stats)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_most_recent_entries() {
        let history = Arc::new(DebugHistory::new(2));
        let pipeline = PipelineHandle::new(vec![Stage::DebugHistory(Arc::clone(&history))]);
        for seq in 0..3u8 {
            pipeline.observe(Direction::Receive, PacketHeader::encode(1, seq), &[seq]);
        }
        let entries = history.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].contains("seq=1"));
        assert!(entries[1].contains("seq=2"));
        assert!(history.render().contains("Last 2 packets"));
    }

    #[test]
    fn timing_counts_both_directions() {
        let stats = Arc::new(TimingStats::default());
        let pipeline = PipelineHandle::new(vec![Stage::Trace, Stage::Timing(Arc::clone(&stats))]);
        pipeline.observe(Direction::Send, PacketHeader::encode(3, 0), &[1, 2, 3]);
        pipeline.observe(Direction::Receive, PacketHeader::encode(1, 1), &[0]);
        assert_eq!(stats.bytes_sent(), 3);
        assert_eq!(stats.packets_received(), 1);
        assert!(stats.last_send().is_some());
    }

    #[test]
    fn swap_is_visible_to_clones() {
        let pipeline = PipelineHandle::default();
        let other = pipeline.clone();
        other.push(Stage::Timing(Arc::default()));
        assert!(pipeline.timing().is_some());
        pipeline.unwrap_to_base();
        assert!(other.snapshot().is_empty());
    }
}
