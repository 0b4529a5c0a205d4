//! Session metrics: round-trip accounting between `Data` sends and their `Ack`s.
//!
//! The coordinator remembers when each sequence left the master and closes the entry when the
//! matching ack arrives. Acks may be observed before the corresponding send notification (the two
//! travel on different channels), so early acks are parked until the send shows up.
//! Latency history is bounded to the 1000 most recent points.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    time::{Duration, Instant},
};

use log::warn;

pub const MAX_POINTS: usize = 1_000;

/// Appends u64 value to metrics buffer; removes oldest if at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for u64 buffer (cast to f64).
pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

#[derive(Debug, Default, Clone)]
pub struct SessionMetrics {
    pending: HashMap<u64, Instant>,
    early: HashMap<u64, Instant>,
    matched: HashSet<u64>,
    /// Round-trip times in microseconds (last 1000).
    pub rtt_us: VecDeque<u64>,
    /// Acks whose sequence was already acknowledged or never sent.
    pub duplicate_acks: u64,
    acked: u64,
}

impl SessionMetrics {
    pub fn record_sent(&mut self, sequence: u64, sent_at: Instant) {
        match self.early.remove(&sequence) {
            Some(acked_at) => self.close(sequence, acked_at.saturating_duration_since(sent_at)),
            None => {
                self.pending.insert(sequence, sent_at);
            }
        }
    }

    pub fn record_ack(&mut self, sequence: u64, acked_at: Instant) {
        if let Some(sent_at) = self.pending.remove(&sequence) {
            self.close(sequence, acked_at.saturating_duration_since(sent_at));
            return;
        }
        if self.matched.contains(&sequence) || self.early.contains_key(&sequence) {
            self.duplicate_acks += 1;
            warn!("[Metrics] duplicate ack for DATA_{}", sequence);
            return;
        }
        self.early.insert(sequence, acked_at);
    }

    fn close(&mut self, sequence: u64, rtt: Duration) {
        self.matched.insert(sequence);
        self.acked += 1;
        push_capped_u64(&mut self.rtt_us, rtt.as_micros() as u64);
    }

    /// Sends still waiting for an ack.
    pub fn unacknowledged(&self) -> u64 {
        self.pending.len() as u64
    }

    /// Acks that never matched a send (meaningful once the session has finished).
    pub fn unmatched(&self) -> u64 {
        self.early.len() as u64 + self.duplicate_acks
    }

    pub fn matched(&self) -> u64 {
        self.acked
    }

    pub fn rtt_stats(&self) -> Option<Stats> {
        calculate_stats_u64(&self.rtt_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_capped_keeps_the_newest_points() {
        let mut buf = VecDeque::new();
        for v in 0..(MAX_POINTS as u64 + 10) {
            push_capped_u64(&mut buf, v);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front(), Some(&10));
    }

    #[test]
    fn stats_of_empty_buffer_is_none() {
        assert!(calculate_stats_u64(&VecDeque::new()).is_none());
        let stats = calculate_stats_u64(&VecDeque::from(vec![2, 4, 9])).unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn ack_after_send_closes_the_round_trip() {
        let mut m = SessionMetrics::default();
        let t0 = Instant::now();
        m.record_sent(0, t0);
        m.record_ack(0, t0 + Duration::from_micros(750));
        assert_eq!(m.matched(), 1);
        assert_eq!(m.unacknowledged(), 0);
        assert_eq!(m.rtt_us.back(), Some(&750));
    }

    #[test]
    fn early_ack_is_matched_when_the_send_arrives() {
        let mut m = SessionMetrics::default();
        let t0 = Instant::now();
        m.record_ack(4, t0 + Duration::from_micros(300));
        assert_eq!(m.matched(), 0);
        m.record_sent(4, t0);
        assert_eq!(m.matched(), 1);
        assert_eq!(m.unmatched(), 0);
        assert_eq!(m.rtt_us.back(), Some(&300));
    }

    #[test]
    fn stray_and_duplicate_acks_are_unmatched() {
        let mut m = SessionMetrics::default();
        let t0 = Instant::now();
        m.record_sent(1, t0);
        m.record_ack(1, t0);
        m.record_ack(9, t0);
        m.record_ack(9, t0);
        assert_eq!(m.matched(), 1);
        assert_eq!(m.duplicate_acks, 1);
        assert_eq!(m.unmatched(), 2);
        m.record_sent(2, t0);
        assert_eq!(m.unacknowledged(), 1);
    }

    #[test]
    fn second_ack_for_a_matched_sequence_is_a_duplicate() {
        let mut m = SessionMetrics::default();
        let t0 = Instant::now();
        m.record_sent(3, t0);
        m.record_ack(3, t0 + Duration::from_micros(100));
        m.record_ack(3, t0 + Duration::from_micros(900));

        assert_eq!(m.matched(), 1);
        assert_eq!(m.duplicate_acks, 1);
        assert_eq!(m.unmatched(), 1);
        assert_eq!(m.rtt_us.len(), 1);

        // Later traffic still matches normally.
        m.record_sent(4, t0);
        assert_eq!(m.unacknowledged(), 1);
        m.record_ack(4, t0);
        assert_eq!(m.matched(), 2);
        assert_eq!(m.unmatched(), 1);
    }
}
