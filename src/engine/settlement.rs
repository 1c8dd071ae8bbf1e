use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::evaluator::BetOutcome;
use crate::types::{Bet, BetStatus, SettlementInstruction, TransactionKind, TransactionRecord};

/// One settlement to apply: the CAS target status plus the balance
/// movement that must land in the same atomic unit.
#[derive(Debug, Clone)]
pub struct SettlementApply {
    pub bet_id: String,
    pub status: BetStatus,
    pub balance_delta: Decimal,
    pub kind: Option<TransactionKind>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied {
        bet: Bet,
        transaction: Option<TransactionRecord>,
    },
    /// The CAS on `status == Open` lost: some earlier attempt already
    /// settled this bet. No balance movement happened.
    AlreadySettled { status: BetStatus },
}

/// A deposit the platform recorded at STK-push initiation. The payment
/// tracker falls back to this when its in-memory cache misses.
#[derive(Debug, Clone)]
pub struct RecordedDeposit {
    pub deposit_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub initiated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn open_bets(&self) -> Result<Vec<Bet>>;
    async fn upsert_bet(&self, bet: Bet) -> Result<()>;

    /// Applies status transition, balance mutation and transaction record
    /// as one unit. The transition is a compare-and-swap on
    /// `status == Open`; a miss reports `AlreadySettled` with no mutation.
    async fn apply_settlement(&self, apply: SettlementApply) -> Result<ApplyOutcome>;

    async fn record_deposit(&self, deposit: RecordedDeposit) -> Result<()>;
    async fn find_deposit(&self, deposit_id: &str) -> Result<Option<RecordedDeposit>>;

    /// Credits at most once per deposit id. A repeat call returns the
    /// original transaction record without moving the balance again, so
    /// replayed gateway callbacks cannot double-credit.
    async fn credit_deposit(
        &self,
        user_id: &str,
        deposit_id: &str,
        amount: Decimal,
    ) -> Result<TransactionRecord>;

    async fn deposit_credited(&self, deposit_id: &str) -> Result<bool>;

    async fn balance(&self, user_id: &str) -> Result<Decimal>;
}

#[derive(Default)]
struct LedgerState {
    bets: HashMap<String, Bet>,
    balances: HashMap<String, Decimal>,
    transactions: Vec<TransactionRecord>,
    deposits: HashMap<String, RecordedDeposit>,
    deposit_credits: HashMap<String, TransactionRecord>,
}

/// In-process ledger mirror. A single lock serializes every balance
/// mutation, so a deposit credit and a settlement on the same user can
/// never interleave mid-write.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.lock().await.transactions.clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn open_bets(&self) -> Result<Vec<Bet>> {
        let st = self.state.lock().await;
        Ok(st
            .bets
            .values()
            .filter(|b| b.status == BetStatus::Open)
            .cloned()
            .collect())
    }

    async fn upsert_bet(&self, bet: Bet) -> Result<()> {
        let mut st = self.state.lock().await;
        // Never resurrect a bet the worker already settled.
        if let Some(existing) = st.bets.get(&bet.id) {
            if existing.status.is_terminal() {
                return Ok(());
            }
        }
        st.bets.insert(bet.id.clone(), bet);
        Ok(())
    }

    async fn apply_settlement(&self, apply: SettlementApply) -> Result<ApplyOutcome> {
        let mut st = self.state.lock().await;

        let bet = st
            .bets
            .get(&apply.bet_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown bet {}", apply.bet_id))?;
        if bet.status != BetStatus::Open {
            return Ok(ApplyOutcome::AlreadySettled { status: bet.status });
        }

        let before = st.balances.get(&bet.user_id).copied().unwrap_or(Decimal::ZERO);
        let after = before + apply.balance_delta;

        let transaction = apply.kind.map(|kind| TransactionRecord {
            id: Uuid::new_v4(),
            user_id: bet.user_id.clone(),
            kind,
            reference: bet.id.clone(),
            amount: apply.balance_delta,
            balance_before: before,
            balance_after: after,
            ts: Utc::now(),
        });

        tracing::debug!(bet_id = %apply.bet_id, status = ?apply.status, reason = %apply.reason, "applying settlement");

        let stored = st
            .bets
            .get_mut(&apply.bet_id)
            .ok_or_else(|| anyhow!("unknown bet {}", apply.bet_id))?;
        stored.status = apply.status;
        if apply.status == BetStatus::Won {
            stored.amount_won = Some(bet.potential_win);
        }
        let updated = stored.clone();

        st.balances.insert(bet.user_id.clone(), after);
        if let Some(ref tx) = transaction {
            st.transactions.push(tx.clone());
        }

        Ok(ApplyOutcome::Applied {
            bet: updated,
            transaction,
        })
    }

    async fn record_deposit(&self, deposit: RecordedDeposit) -> Result<()> {
        let mut st = self.state.lock().await;
        // First record wins: a replayed initiation must not reset the
        // deadline of a deposit already in flight.
        st.deposits.entry(deposit.deposit_id.clone()).or_insert(deposit);
        Ok(())
    }

    async fn find_deposit(&self, deposit_id: &str) -> Result<Option<RecordedDeposit>> {
        let st = self.state.lock().await;
        Ok(st.deposits.get(deposit_id).cloned())
    }

    async fn credit_deposit(
        &self,
        user_id: &str,
        deposit_id: &str,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        let mut st = self.state.lock().await;
        if let Some(tx) = st.deposit_credits.get(deposit_id) {
            return Ok(tx.clone());
        }
        let before = st.balances.get(user_id).copied().unwrap_or(Decimal::ZERO);
        let after = before + amount;
        let tx = TransactionRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind: TransactionKind::Deposit,
            reference: deposit_id.to_string(),
            amount,
            balance_before: before,
            balance_after: after,
            ts: Utc::now(),
        };
        st.balances.insert(user_id.to_string(), after);
        st.transactions.push(tx.clone());
        st.deposit_credits.insert(deposit_id.to_string(), tx.clone());
        Ok(tx)
    }

    async fn deposit_credited(&self, deposit_id: &str) -> Result<bool> {
        let st = self.state.lock().await;
        Ok(st.deposit_credits.contains_key(deposit_id))
    }

    async fn balance(&self, user_id: &str) -> Result<Decimal> {
        let st = self.state.lock().await;
        Ok(st.balances.get(user_id).copied().unwrap_or(Decimal::ZERO))
    }
}

#[derive(Debug, Clone)]
pub enum SettleResult {
    Applied(SettlementInstruction),
    AlreadySettled { bet_id: String, status: BetStatus },
    /// Unresolved bet still inside the void grace period; stays Open.
    NotDue { bet_id: String },
}

pub struct SettlementCoordinator<L> {
    ledger: std::sync::Arc<L>,
    void_grace: Duration,
}

impl<L: Ledger> SettlementCoordinator<L> {
    pub fn new(ledger: std::sync::Arc<L>, void_grace_sec: i64) -> Self {
        Self {
            ledger,
            void_grace: Duration::seconds(void_grace_sec),
        }
    }

    /// Settles one bet for a decided outcome. At-most-once: the ledger's
    /// CAS guarantees a second call on the same bet reports
    /// `AlreadySettled` with no balance movement.
    pub async fn settle(&self, bet: &Bet, outcome: BetOutcome, now: DateTime<Utc>) -> Result<SettleResult> {
        let (status, delta, kind, reason) = match outcome {
            BetOutcome::Won => (
                BetStatus::Won,
                bet.potential_win,
                Some(TransactionKind::Payout),
                format!("all {} legs won", bet.selections.len()),
            ),
            // Stake left the balance at placement; nothing moves on a loss.
            BetOutcome::Lost => (BetStatus::Lost, Decimal::ZERO, None, "leg lost".to_string()),
            BetOutcome::Void => {
                if now - bet.placed_at < self.void_grace {
                    return Ok(SettleResult::NotDue {
                        bet_id: bet.id.clone(),
                    });
                }
                (
                    BetStatus::Void,
                    bet.stake,
                    Some(TransactionKind::Refund),
                    "unresolved past grace period, stake refunded".to_string(),
                )
            }
        };

        let outcome = self
            .ledger
            .apply_settlement(SettlementApply {
                bet_id: bet.id.clone(),
                status,
                balance_delta: delta,
                kind,
                reason: reason.clone(),
            })
            .await?;

        Ok(match outcome {
            ApplyOutcome::Applied { bet, transaction } => {
                SettleResult::Applied(SettlementInstruction {
                    bet_id: bet.id.clone(),
                    user_id: bet.user_id.clone(),
                    status: bet.status,
                    balance_delta: delta,
                    transaction,
                    reason,
                })
            }
            ApplyOutcome::AlreadySettled { status } => SettleResult::AlreadySettled {
                bet_id: bet.id.clone(),
                status,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn bet(id: &str, stake: Decimal, total_odds: Decimal) -> Bet {
        Bet {
            id: id.to_string(),
            bet_id: format!("BET-{id}"),
            user_id: "u1".to_string(),
            stake,
            total_odds,
            potential_win: stake * total_odds,
            status: BetStatus::Open,
            amount_won: None,
            placed_at: Utc::now() - Duration::hours(3),
            selections: vec![],
        }
    }

    #[tokio::test]
    async fn test_won_credits_full_potential_win() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = SettlementCoordinator::new(ledger.clone(), 7200);
        let b = bet("b1", dec!(100), dec!(2.5));
        ledger.upsert_bet(b.clone()).await.unwrap();

        let res = coord.settle(&b, BetOutcome::Won, Utc::now()).await.unwrap();
        match res {
            SettleResult::Applied(instr) => {
                assert_eq!(instr.status, BetStatus::Won);
                assert_eq!(instr.balance_delta, dec!(250));
                let tx = instr.transaction.unwrap();
                assert_eq!(tx.kind, TransactionKind::Payout);
                assert_eq!(tx.balance_before, dec!(0));
                assert_eq!(tx.balance_after, dec!(250));
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(250));
    }

    #[tokio::test]
    async fn test_double_settlement_is_a_noop() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = SettlementCoordinator::new(ledger.clone(), 7200);
        let b = bet("b1", dec!(100), dec!(2));
        ledger.upsert_bet(b.clone()).await.unwrap();

        let first = coord.settle(&b, BetOutcome::Won, Utc::now()).await.unwrap();
        assert!(matches!(first, SettleResult::Applied(_)));

        let second = coord.settle(&b, BetOutcome::Won, Utc::now()).await.unwrap();
        match second {
            SettleResult::AlreadySettled { status, .. } => assert_eq!(status, BetStatus::Won),
            other => panic!("expected AlreadySettled, got {other:?}"),
        }

        // Exactly one credit of potential_win.
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(200));
        assert_eq!(ledger.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_moves_no_money() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = SettlementCoordinator::new(ledger.clone(), 7200);
        let b = bet("b1", dec!(50), dec!(3));
        ledger.upsert_bet(b.clone()).await.unwrap();

        let res = coord.settle(&b, BetOutcome::Lost, Utc::now()).await.unwrap();
        match res {
            SettleResult::Applied(instr) => {
                assert_eq!(instr.status, BetStatus::Lost);
                assert_eq!(instr.balance_delta, dec!(0));
                assert!(instr.transaction.is_none());
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(0));
        assert!(ledger.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_void_refunds_stake_after_grace() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = SettlementCoordinator::new(ledger.clone(), 7200);
        let b = bet("b1", dec!(80), dec!(4));
        ledger.upsert_bet(b.clone()).await.unwrap();

        let res = coord.settle(&b, BetOutcome::Void, Utc::now()).await.unwrap();
        match res {
            SettleResult::Applied(instr) => {
                assert_eq!(instr.status, BetStatus::Void);
                assert_eq!(instr.balance_delta, dec!(80));
                assert_eq!(instr.transaction.unwrap().kind, TransactionKind::Refund);
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(80));

        // Refund applies exactly once.
        let second = coord.settle(&b, BetOutcome::Void, Utc::now()).await.unwrap();
        assert!(matches!(second, SettleResult::AlreadySettled { .. }));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(80));
    }

    #[tokio::test]
    async fn test_void_waits_out_grace_period() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = SettlementCoordinator::new(ledger.clone(), 7200);
        let mut b = bet("b1", dec!(80), dec!(4));
        b.placed_at = Utc::now() - Duration::minutes(10);
        ledger.upsert_bet(b.clone()).await.unwrap();

        let res = coord.settle(&b, BetOutcome::Void, Utc::now()).await.unwrap();
        assert!(matches!(res, SettleResult::NotDue { .. }));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(0));
        assert_eq!(
            ledger.open_bets().await.unwrap().len(),
            1,
            "bet must stay Open inside the grace period"
        );
    }

    #[tokio::test]
    async fn test_upsert_never_reopens_settled_bet() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = SettlementCoordinator::new(ledger.clone(), 7200);
        let b = bet("b1", dec!(10), dec!(2));
        ledger.upsert_bet(b.clone()).await.unwrap();
        coord.settle(&b, BetOutcome::Won, Utc::now()).await.unwrap();

        // A stale refresh from the backend still shows the bet Open.
        ledger.upsert_bet(b.clone()).await.unwrap();
        assert!(ledger.open_bets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deposit_credit_deduped_by_id() {
        let ledger = MemoryLedger::new();
        let first = ledger.credit_deposit("u1", "d1", dec!(500)).await.unwrap();
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
        assert!(ledger.deposit_credited("d1").await.unwrap());

        // A retried credit returns the original record, no new movement.
        let second = ledger.credit_deposit("u1", "d1", dec!(500)).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
        assert_eq!(ledger.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_settlement_single_credit() {
        let ledger = Arc::new(MemoryLedger::new());
        let coord = Arc::new(SettlementCoordinator::new(ledger.clone(), 7200));
        let b = bet("b1", dec!(100), dec!(2));
        ledger.upsert_bet(b.clone()).await.unwrap();

        let mut handles = vec![];
        for _ in 0..8 {
            let coord = coord.clone();
            let b = b.clone();
            handles.push(tokio::spawn(async move {
                coord.settle(&b, BetOutcome::Won, Utc::now()).await.unwrap()
            }));
        }
        let mut applied = 0;
        for h in handles {
            if matches!(h.await.unwrap(), SettleResult::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(200));
    }
}
