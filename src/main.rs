mod config;
mod types;
mod stats;

mod engine;
mod feed;
mod payment;
mod sink;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::engine::evaluator::aggregate;
use crate::engine::settlement::{Ledger, MemoryLedger, SettleResult, SettlementCoordinator};
use crate::feed::backend::BackendFeed;
use crate::payment::{CallbackDisposition, DepositTracker};
use crate::sink::SettlementSink;
use crate::stats::Stats;
use crate::types::{BetStatus, DepositEventKind, Score, SettlementInstruction};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

async fn maybe_write_jsonl(path: &Option<String>, line: &str) {
    if let Some(p) = path.as_ref().map(|x| x.trim().to_string()).filter(|x| !x.is_empty()) {
        if let Ok(mut f) = tokio::fs::OpenOptions::new().create(true).append(true).open(&p).await {
            use tokio::io::AsyncWriteExt;
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let s = Settings::from_env()?;
    let feed = BackendFeed::new(s.backend_host.clone(), s.results_chunk_size, s.results_concurrency);

    let stats = Stats::new(now_ms());

    let ledger = Arc::new(MemoryLedger::new());
    let coord = SettlementCoordinator::new(ledger.clone(), s.void_grace_sec);
    let deposits = DepositTracker::new(ledger.clone(), s.stk_timeout_sec);
    let sink = SettlementSink::new();

    let mut last_refresh = std::time::Instant::now()
        .checked_sub(std::time::Duration::from_secs(3600))
        .unwrap_or_else(std::time::Instant::now);
    let mut deposit_cursor: Option<String> = None;

    loop {
        let refresh_due = s.bets_refresh_sec == 0
            || last_refresh.elapsed() >= std::time::Duration::from_secs(s.bets_refresh_sec);

        if refresh_due {
            tracing::info!(max_open_bets = s.max_open_bets, "refreshing open bets");
            let fetched = feed.fetch_open_bets(s.max_open_bets).await?;
            last_refresh = std::time::Instant::now();
            for bet in fetched {
                ledger.upsert_bet(bet).await?;
            }
        }

        let open = ledger.open_bets().await?;
        stats.set_open_bets_loaded(open.len() as u64);

        // Dedup referenced match ids before hitting the results endpoint.
        let mut match_ids: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for bet in &open {
            for sel in &bet.selections {
                if seen.insert(sel.match_id.clone()) {
                    match_ids.push(sel.match_id.clone());
                }
            }
        }

        let snap = feed.snapshot_for_matches(&match_ids).await?;
        stats.inc_heartbeat();
        stats.set_matches_in_snapshot(snap.matches.len() as u64);

        tracing::info!(open_bets = open.len(), matches = snap.matches.len(), ts = snap.ts_ms, "heartbeat: results snapshot fetched");

        let scores: std::collections::HashMap<String, Score> = snap
            .matches
            .iter()
            .filter_map(|m| m.final_score().map(|sc| (m.match_id.clone(), sc)))
            .collect();

        let now = chrono::Utc::now();
        let mut instructions: Vec<SettlementInstruction> = vec![];
        for bet in &open {
            let outcome = aggregate(&bet.selections, &scores);
            match coord.settle(bet, outcome, now).await? {
                SettleResult::Applied(instr) => {
                    match instr.status {
                        BetStatus::Won => stats.inc_won(),
                        BetStatus::Lost => stats.inc_lost(),
                        BetStatus::Void => stats.inc_voided(),
                        _ => {}
                    }
                    instructions.push(instr);
                }
                SettleResult::AlreadySettled { bet_id, status } => {
                    stats.inc_already_settled();
                    tracing::debug!(bet_id = %bet_id, status = ?status, "settlement no-op");
                }
                SettleResult::NotDue { .. } => {}
            }
        }
        sink.emit(instructions).await?;

        // Gateway callback events recorded by the backend since last poll.
        let (events, next_cursor) = feed.fetch_deposit_events(&deposit_cursor).await?;
        if next_cursor.is_some() {
            deposit_cursor = next_cursor;
        }
        for e in &events {
            match e.kind {
                DepositEventKind::Initiated => {
                    deposits.initiate(&e.deposit_id, &e.user_id, e.amount, e.received_at).await?;
                }
                DepositEventKind::Success => {
                    // Classify by when the callback arrived, not by when
                    // this loop got around to processing it.
                    match deposits.apply_callback(&e.deposit_id, true, e.received_at).await? {
                        CallbackDisposition::Confirmed(_) => stats.inc_deposit_confirmed(),
                        CallbackDisposition::Reconciled(_) => stats.inc_deposit_reconciled(),
                        _ => {}
                    }
                }
                DepositEventKind::Failed => {
                    deposits.apply_callback(&e.deposit_id, false, e.received_at).await?;
                }
            }
        }
        for _ in deposits.sweep_timeouts(chrono::Utc::now()).await {
            stats.inc_deposit_timed_out();
        }

        // stats summary
        let t = now_ms();
        if stats.should_log(t, s.stats_log_sec) {
            let ss = stats.snapshot(t);
            stats.mark_logged(t);

            let line = serde_json::to_string(&ss).unwrap_or_default();
            tracing::info!(
                up_sec = ss.up_sec,
                heartbeats = ss.heartbeats,
                open_bets_loaded = ss.open_bets_loaded,
                bets_won = ss.bets_won,
                bets_lost = ss.bets_lost,
                bets_voided = ss.bets_voided,
                already_settled_hits = ss.already_settled_hits,
                deposits_confirmed = ss.deposits_confirmed,
                deposits_timed_out = ss.deposits_timed_out,
                deposits_reconciled = ss.deposits_reconciled,
                "stats"
            );

            maybe_write_jsonl(&s.stats_jsonl_path, &line).await;
        }

        tokio::time::sleep(std::time::Duration::from_millis(s.poll_ms)).await;
    }
}
