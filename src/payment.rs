use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::engine::settlement::{Ledger, RecordedDeposit};
use crate::types::TransactionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositState {
    Pending,
    Confirmed,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone)]
struct TrackedDeposit {
    user_id: String,
    amount: Decimal,
    state: DepositState,
    deadline: DateTime<Utc>,
    credited: bool,
}

/// How a gateway callback was applied.
#[derive(Debug, Clone)]
pub enum CallbackDisposition {
    /// Confirmed inside the window, balance credited.
    Confirmed(TransactionRecord),
    /// Success arrived after the timeout had fired; credited as a
    /// reconciliation event instead of being dropped.
    Reconciled(TransactionRecord),
    Failed,
    /// Repeat callback for a deposit already in a terminal state.
    Duplicate,
    /// No trace of the deposit in cache or ledger.
    Unknown,
}

/// Tracks STK-push deposits through Pending -> Confirmed / TimedOut.
///
/// Lookups hit the in-memory cache first and fall back to the ledger's
/// recorded deposits, so a worker restart between initiation and callback
/// does not lose the deposit.
pub struct DepositTracker<L> {
    ledger: Arc<L>,
    stk_timeout: Duration,
    cache: Mutex<HashMap<String, TrackedDeposit>>,
}

impl<L: Ledger> DepositTracker<L> {
    pub fn new(ledger: Arc<L>, stk_timeout_sec: i64) -> Self {
        Self {
            ledger,
            stk_timeout: Duration::seconds(stk_timeout_sec),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn initiate(
        &self,
        deposit_id: &str,
        user_id: &str,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut cache = self.cache.lock().await;

        // Event cursors can redeliver; a replayed initiation must never
        // reset a deposit that already moved past Pending.
        if cache.contains_key(deposit_id) {
            return Ok(());
        }
        if self.ledger.deposit_credited(deposit_id).await? {
            return Ok(());
        }

        self.ledger
            .record_deposit(RecordedDeposit {
                deposit_id: deposit_id.to_string(),
                user_id: user_id.to_string(),
                amount,
                initiated_at: now,
            })
            .await?;

        cache.insert(
            deposit_id.to_string(),
            TrackedDeposit {
                user_id: user_id.to_string(),
                amount,
                state: DepositState::Pending,
                deadline: now + self.stk_timeout,
                credited: false,
            },
        );
        Ok(())
    }

    pub async fn apply_callback(
        &self,
        deposit_id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<CallbackDisposition> {
        let mut cache = self.cache.lock().await;

        if !cache.contains_key(deposit_id) {
            // Cache miss: the deposit may have been initiated before a
            // restart, or its credited entry was evicted. Rebuild state
            // from the ledger, including whether it was already credited.
            match self.ledger.find_deposit(deposit_id).await? {
                Some(rec) => {
                    let credited = self.ledger.deposit_credited(deposit_id).await?;
                    let deadline = rec.initiated_at + self.stk_timeout;
                    let state = if credited {
                        DepositState::Confirmed
                    } else if now >= deadline {
                        DepositState::TimedOut
                    } else {
                        DepositState::Pending
                    };
                    cache.insert(
                        deposit_id.to_string(),
                        TrackedDeposit {
                            user_id: rec.user_id,
                            amount: rec.amount,
                            state,
                            deadline,
                            credited,
                        },
                    );
                }
                None => {
                    tracing::warn!(deposit_id, "callback for unknown deposit");
                    return Ok(CallbackDisposition::Unknown);
                }
            }
        }

        let (state, credited, user_id, amount) = {
            let t = cache.get(deposit_id).expect("deposit inserted above");
            (t.state, t.credited, t.user_id.clone(), t.amount)
        };

        match (state, success) {
            (DepositState::Pending, true) => {
                let tx = self.ledger.credit_deposit(&user_id, deposit_id, amount).await?;
                // The ledger now owns the credited fact; keeping the entry
                // around would only grow the cache for the worker's life.
                cache.remove(deposit_id);
                tracing::info!(
                    deposit_id,
                    user_id = %user_id,
                    amount = %amount,
                    "deposit confirmed"
                );
                Ok(CallbackDisposition::Confirmed(tx))
            }
            (DepositState::Pending, false) => {
                if let Some(t) = cache.get_mut(deposit_id) {
                    t.state = DepositState::Failed;
                }
                Ok(CallbackDisposition::Failed)
            }
            (DepositState::TimedOut, true) if !credited => {
                let tx = self.ledger.credit_deposit(&user_id, deposit_id, amount).await?;
                cache.remove(deposit_id);
                tracing::warn!(
                    deposit_id,
                    user_id = %user_id,
                    "late gateway confirmation, credited as reconciliation"
                );
                Ok(CallbackDisposition::Reconciled(tx))
            }
            (DepositState::TimedOut, false) => {
                if let Some(t) = cache.get_mut(deposit_id) {
                    t.state = DepositState::Failed;
                }
                Ok(CallbackDisposition::Failed)
            }
            _ => Ok(CallbackDisposition::Duplicate),
        }
    }

    /// Marks overdue Pending deposits TimedOut. The explicit deadline is
    /// the cancellable timer: a confirmation before the sweep simply wins.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut cache = self.cache.lock().await;
        let mut timed_out = vec![];
        for (id, tracked) in cache.iter_mut() {
            if tracked.state == DepositState::Pending && now >= tracked.deadline {
                tracked.state = DepositState::TimedOut;
                timed_out.push(id.clone());
                tracing::warn!(deposit_id = %id, "no confirmation inside STK window, marked timed out");
            }
        }
        timed_out
    }

    pub async fn state_of(&self, deposit_id: &str) -> Option<DepositState> {
        self.cache.lock().await.get(deposit_id).map(|t| t.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::settlement::MemoryLedger;
    use rust_decimal_macros::dec;

    fn tracker(ledger: &Arc<MemoryLedger>) -> DepositTracker<MemoryLedger> {
        DepositTracker::new(ledger.clone(), 10)
    }

    #[tokio::test]
    async fn test_confirmation_inside_window_credits_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();

        let disp = t.apply_callback("d1", true, now + Duration::seconds(3)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Confirmed(_)));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));

        // Gateway retries the callback.
        let disp = t.apply_callback("d1", true, now + Duration::seconds(4)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Duplicate));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
    }

    #[tokio::test]
    async fn test_overdue_pending_is_marked_timed_out() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();

        let swept = t.sweep_timeouts(now + Duration::seconds(11)).await;
        assert_eq!(swept, vec!["d1".to_string()]);
        assert_eq!(t.state_of("d1").await, Some(DepositState::TimedOut));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_pending_alone() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();

        let swept = t.sweep_timeouts(now + Duration::seconds(5)).await;
        assert!(swept.is_empty());
        assert_eq!(t.state_of("d1").await, Some(DepositState::Pending));
    }

    #[tokio::test]
    async fn test_late_callback_reconciles_exactly_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();
        t.sweep_timeouts(now + Duration::seconds(11)).await;

        let disp = t.apply_callback("d1", true, now + Duration::seconds(20)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Reconciled(_)));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));

        let disp = t.apply_callback("d1", true, now + Duration::seconds(21)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Duplicate));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
    }

    #[tokio::test]
    async fn test_failure_callback_never_credits() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();

        let disp = t.apply_callback("d1", false, now + Duration::seconds(2)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Failed));
        assert_eq!(t.state_of("d1").await, Some(DepositState::Failed));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_to_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let now = Utc::now();
        ledger
            .record_deposit(RecordedDeposit {
                deposit_id: "d1".to_string(),
                user_id: "u1".to_string(),
                amount: dec!(500),
                initiated_at: now,
            })
            .await
            .unwrap();

        // Fresh tracker with a cold cache, as after a restart.
        let t = tracker(&ledger);
        let disp = t.apply_callback("d1", true, now + Duration::seconds(3)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Confirmed(_)));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
    }

    #[tokio::test]
    async fn test_replayed_initiation_cannot_reset_confirmed_deposit() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();
        t.apply_callback("d1", true, now + Duration::seconds(2)).await.unwrap();
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));

        // The event cursor redelivers the initiation, then the success.
        t.initiate("d1", "u1", dec!(500), now + Duration::seconds(5)).await.unwrap();
        let disp = t.apply_callback("d1", true, now + Duration::seconds(6)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Duplicate));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
        assert_eq!(ledger.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_then_callback_retry_credits_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let now = Utc::now();
        let first = tracker(&ledger);
        first.initiate("d1", "u1", dec!(500), now).await.unwrap();
        first.apply_callback("d1", true, now + Duration::seconds(2)).await.unwrap();

        // Worker restarts with a cold cache; the gateway retries.
        let second = tracker(&ledger);
        let disp = second.apply_callback("d1", true, now + Duration::seconds(30)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Duplicate));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(500));
        assert_eq!(ledger.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_credited_entry_leaves_the_cache() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let now = Utc::now();
        t.initiate("d1", "u1", dec!(500), now).await.unwrap();
        t.apply_callback("d1", true, now + Duration::seconds(2)).await.unwrap();

        assert_eq!(t.state_of("d1").await, None);
        assert!(ledger.deposit_credited("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_lagged_processing_classifies_by_arrival_time() {
        let ledger = Arc::new(MemoryLedger::new());
        let now = Utc::now();
        ledger
            .record_deposit(RecordedDeposit {
                deposit_id: "d1".to_string(),
                user_id: "u1".to_string(),
                amount: dec!(500),
                initiated_at: now,
            })
            .await
            .unwrap();

        // The success arrived at +3s, inside the STK window; a worker
        // draining a backlog later must still count it as a confirmation.
        let t = tracker(&ledger);
        let disp = t.apply_callback("d1", true, now + Duration::seconds(3)).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Confirmed(_)));
        assert!(!matches!(disp, CallbackDisposition::Reconciled(_)));
    }

    #[tokio::test]
    async fn test_callback_with_no_record_anywhere() {
        let ledger = Arc::new(MemoryLedger::new());
        let t = tracker(&ledger);
        let disp = t.apply_callback("ghost", true, Utc::now()).await.unwrap();
        assert!(matches!(disp, CallbackDisposition::Unknown));
        assert_eq!(ledger.balance("u1").await.unwrap(), dec!(0));
    }
}
