use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Stats {
    start_ms: AtomicU64,
    last_log_ms: AtomicU64,

    heartbeats: AtomicU64,
    open_bets_loaded: AtomicU64,
    matches_in_snapshot: AtomicU64,

    bets_won: AtomicU64,
    bets_lost: AtomicU64,
    bets_voided: AtomicU64,
    already_settled_hits: AtomicU64,

    deposits_confirmed: AtomicU64,
    deposits_timed_out: AtomicU64,
    deposits_reconciled: AtomicU64,
}

impl Stats {
    pub fn new(now_ms: u64) -> Arc<Self> {
        let s = Arc::new(Self::default());
        s.start_ms.store(now_ms, Ordering::Relaxed);
        s.last_log_ms.store(now_ms, Ordering::Relaxed);
        s
    }

    pub fn inc_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_open_bets_loaded(&self, n: u64) {
        self.open_bets_loaded.store(n, Ordering::Relaxed);
    }

    pub fn set_matches_in_snapshot(&self, n: u64) {
        self.matches_in_snapshot.store(n, Ordering::Relaxed);
    }

    pub fn inc_won(&self) {
        self.bets_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lost(&self) {
        self.bets_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_voided(&self) {
        self.bets_voided.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_already_settled(&self) {
        self.already_settled_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deposit_confirmed(&self) {
        self.deposits_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deposit_timed_out(&self) {
        self.deposits_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deposit_reconciled(&self) {
        self.deposits_reconciled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn should_log(&self, now_ms: u64, every_sec: u64) -> bool {
        if every_sec == 0 { return false; }
        let last = self.last_log_ms.load(Ordering::Relaxed);
        now_ms.saturating_sub(last) >= every_sec.saturating_mul(1000)
    }

    pub fn mark_logged(&self, now_ms: u64) {
        self.last_log_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, now_ms: u64) -> StatsSnapshot {
        let start = self.start_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            now_ms,
            up_sec: (now_ms.saturating_sub(start)) / 1000,
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            open_bets_loaded: self.open_bets_loaded.load(Ordering::Relaxed),
            matches_in_snapshot: self.matches_in_snapshot.load(Ordering::Relaxed),
            bets_won: self.bets_won.load(Ordering::Relaxed),
            bets_lost: self.bets_lost.load(Ordering::Relaxed),
            bets_voided: self.bets_voided.load(Ordering::Relaxed),
            already_settled_hits: self.already_settled_hits.load(Ordering::Relaxed),
            deposits_confirmed: self.deposits_confirmed.load(Ordering::Relaxed),
            deposits_timed_out: self.deposits_timed_out.load(Ordering::Relaxed),
            deposits_reconciled: self.deposits_reconciled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub now_ms: u64,
    pub up_sec: u64,
    pub heartbeats: u64,
    pub open_bets_loaded: u64,
    pub matches_in_snapshot: u64,
    pub bets_won: u64,
    pub bets_lost: u64,
    pub bets_voided: u64,
    pub already_settled_hits: u64,
    pub deposits_confirmed: u64,
    pub deposits_timed_out: u64,
    pub deposits_reconciled: u64,
}
