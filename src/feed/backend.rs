use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    Bet, BetStatus, DepositEvent, DepositEventKind, Market, MatchResult, MatchStatus, Score,
    Selection,
};

#[derive(Debug, Clone, Serialize)]
pub struct ResultsSnapshot {
    pub ts_ms: i64,
    pub matches: Vec<MatchResult>,
}

/// HTTP client for the platform backend: open bets, match results and
/// recorded gateway callback events.
#[derive(Clone)]
pub struct BackendFeed {
    host: String,
    http: reqwest::Client,
    results_chunk_size: usize,
    results_concurrency: usize,
}

impl BackendFeed {
    pub fn new(host: String, results_chunk_size: usize, results_concurrency: usize) -> Self {
        Self {
            host,
            http: reqwest::Client::new(),
            results_chunk_size: results_chunk_size.max(1),
            results_concurrency: results_concurrency.max(1),
        }
    }

    pub async fn fetch_open_bets(&self, max_bets: usize) -> Result<Vec<Bet>> {
        let mut out: Vec<Bet> = vec![];
        let mut next: Option<String> = None;

        loop {
            let mut url = format!("{}/bets/open", self.host.trim_end_matches('/'));
            if let Some(ref c) = next {
                url = format!("{}?next_cursor={}", url, c);
            }

            let resp: OpenBetsResp = self.http
                .get(url)
                .send()
                .await
                .context("GET /bets/open failed")?
                .error_for_status()
                .context("GET /bets/open non-200")?
                .json()
                .await
                .context("decode /bets/open json failed")?;

            for item in resp.data.into_iter() {
                match convert_bet(item) {
                    Some(bet) => {
                        out.push(bet);
                        if out.len() >= max_bets {
                            return Ok(out);
                        }
                    }
                    None => {}
                }
            }

            next = resp.next_cursor;
            if next.is_none() { break; }
        }

        Ok(out)
    }

    pub async fn snapshot_for_matches(&self, match_ids: &[String]) -> Result<ResultsSnapshot> {
        let results = self.fetch_results_chunked(match_ids).await?;
        Ok(ResultsSnapshot {
            ts_ms: Utc::now().timestamp_millis(),
            matches: results,
        })
    }

    async fn fetch_results_chunked(&self, match_ids: &[String]) -> Result<Vec<MatchResult>> {
        if match_ids.is_empty() { return Ok(vec![]); }

        let chunks: Vec<Vec<String>> = match_ids
            .chunks(self.results_chunk_size)
            .map(|c| c.to_vec())
            .collect();

        tracing::debug!(
            total_matches = match_ids.len(),
            chunks = chunks.len(),
            chunk_size = self.results_chunk_size,
            conc = self.results_concurrency,
            "fetching match results in chunks"
        );

        let host = self.host.clone();
        let http = self.http.clone();

        let mut out: Vec<MatchResult> = Vec::with_capacity(match_ids.len());

        let mut stream = stream::iter(chunks.into_iter().map(|chunk| {
            let url = format!("{}/matches/results", host.trim_end_matches('/'));
            let http = http.clone();
            async move {
                let body: Vec<ResultsReqItem> =
                    chunk.into_iter().map(|m| ResultsReqItem { match_id: m }).collect();
                let resp: Vec<MatchItem> = http
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .context("POST /matches/results failed")?
                    .error_for_status()
                    .context("POST /matches/results non-200")?
                    .json()
                    .await
                    .context("decode /matches/results json failed")?;
                Ok::<Vec<MatchItem>, anyhow::Error>(resp)
            }
        })).buffer_unordered(self.results_concurrency);

        while let Some(res) = stream.next().await {
            let page = res?;
            for m in page {
                out.push(convert_match(m));
            }
        }

        Ok(out)
    }

    pub async fn fetch_deposit_events(&self, after: &Option<String>) -> Result<(Vec<DepositEvent>, Option<String>)> {
        let mut url = format!("{}/payments/events", self.host.trim_end_matches('/'));
        if let Some(c) = after {
            url = format!("{}?after={}", url, c);
        }

        let resp: DepositEventsResp = self.http
            .get(url)
            .send()
            .await
            .context("GET /payments/events failed")?
            .error_for_status()
            .context("GET /payments/events non-200")?
            .json()
            .await
            .context("decode /payments/events json failed")?;

        let events = resp.data.into_iter().filter_map(convert_deposit_event).collect();
        Ok((events, resp.next_cursor))
    }
}

fn convert_bet(item: BetItem) -> Option<Bet> {
    let stake = parse_dec(&item.stake)?;
    let total_odds = parse_dec(&item.total_odds)?;
    let potential_win = parse_dec(&item.potential_win)?;
    if stake <= Decimal::ZERO || item.selections.is_empty() {
        tracing::warn!(bet_id = %item.bet_id, "skipping malformed open bet");
        return None;
    }

    let mut selections = Vec::with_capacity(item.selections.len());
    for s in item.selections {
        let odds = parse_dec(&s.odds)?;
        selections.push(Selection {
            match_id: s.match_id,
            market: s.market,
            pick: s.pick,
            odds,
        });
    }

    Some(Bet {
        id: item.id,
        bet_id: item.bet_id,
        user_id: item.user_id,
        stake,
        total_odds,
        potential_win,
        status: BetStatus::Open,
        amount_won: None,
        placed_at: item.placed_at,
        selections,
    })
}

fn convert_match(m: MatchItem) -> MatchResult {
    let score = match (m.home_score, m.away_score) {
        (Some(home), Some(away)) => Some(Score { home, away }),
        _ => None,
    };
    MatchResult {
        match_id: m.match_id,
        status: m.status,
        score,
    }
}

fn convert_deposit_event(e: DepositEventItem) -> Option<DepositEvent> {
    let amount = parse_dec(&e.amount)?;
    let kind = match e.status.as_str() {
        "initiated" => DepositEventKind::Initiated,
        "success" => DepositEventKind::Success,
        "failed" => DepositEventKind::Failed,
        other => {
            tracing::warn!(deposit_id = %e.deposit_id, status = %other, "unknown deposit event status, skipping");
            return None;
        }
    };
    Some(DepositEvent {
        deposit_id: e.deposit_id,
        user_id: e.user_id,
        amount,
        kind,
        received_at: e.received_at,
    })
}

fn parse_dec(s: &str) -> Option<Decimal> {
    s.parse::<Decimal>().ok()
}

#[derive(Debug, Clone, Deserialize)]
struct OpenBetsResp {
    data: Vec<BetItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BetItem {
    id: String,
    bet_id: String,
    user_id: String,
    stake: String,
    total_odds: String,
    potential_win: String,
    placed_at: DateTime<Utc>,
    selections: Vec<SelectionItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct SelectionItem {
    match_id: String,
    market: Market,
    pick: String,
    odds: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResultsReqItem {
    match_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchItem {
    match_id: String,
    status: MatchStatus,
    #[serde(default)]
    home_score: Option<u32>,
    #[serde(default)]
    away_score: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct DepositEventsResp {
    data: Vec<DepositEventItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DepositEventItem {
    deposit_id: String,
    user_id: String,
    amount: String,
    status: String,
    received_at: DateTime<Utc>,
}
