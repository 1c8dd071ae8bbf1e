use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.home + self.away
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: String,
    pub status: MatchStatus,
    pub score: Option<Score>,
}

impl MatchResult {
    /// Score is only authoritative once the match has finished.
    pub fn final_score(&self) -> Option<Score> {
        match self.status {
            MatchStatus::Finished => self.score,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "1X2")]
    OneXTwo,
    #[serde(rename = "BTTS")]
    Btts,
    #[serde(rename = "O/U")]
    OverUnder,
    #[serde(rename = "DC")]
    DoubleChance,
    #[serde(rename = "HT/FT")]
    HalfTimeFullTime,
    #[serde(rename = "CS")]
    CorrectScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub match_id: String,
    pub market: Market,
    pub pick: String,
    pub odds: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    Open,
    Won,
    Lost,
    Void,
    Closed,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Open)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    /// Externally visible bet reference shown to the customer.
    pub bet_id: String,
    pub user_id: String,
    pub stake: Decimal,
    pub total_odds: Decimal,
    pub potential_win: Decimal,
    pub status: BetStatus,
    pub amount_won: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Payout,
    Refund,
    Deposit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub kind: TransactionKind,
    /// Bet id for payouts/refunds, deposit id for deposits.
    pub reference: String,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub ts: DateTime<Utc>,
}

/// What the worker tells the platform API layer to persist for one bet.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementInstruction {
    pub bet_id: String,
    pub user_id: String,
    pub status: BetStatus,
    pub balance_delta: Decimal,
    pub transaction: Option<TransactionRecord>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositEventKind {
    /// STK push sent, confirmation not yet received.
    Initiated,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub deposit_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub kind: DepositEventKind,
    pub received_at: DateTime<Utc>,
}
