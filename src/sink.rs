use anyhow::Result;
use crate::types::SettlementInstruction;

/// Emits settlement instructions for the platform API layer to persist.
/// This worker never writes to platform storage directly.
#[derive(Clone)]
pub struct SettlementSink;

impl SettlementSink {
    pub fn new() -> Self { Self }

    pub async fn emit(&self, instructions: Vec<SettlementInstruction>) -> Result<()> {
        if instructions.is_empty() {
            return Ok(());
        }
        let mut by_user: std::collections::HashMap<String, Vec<SettlementInstruction>> = std::collections::HashMap::new();
        for i in instructions {
            by_user.entry(i.user_id.clone()).or_default().push(i);
        }

        for (user_id, batch) in by_user {
            tracing::info!(user_id=%user_id, bets=batch.len(), "settlement batch");
            for i in batch {
                tracing::info!(
                    bet_id=%i.bet_id,
                    user_id=%i.user_id,
                    status=?i.status,
                    balance_delta=%i.balance_delta,
                    transaction=?i.transaction.as_ref().map(|t| t.id),
                    reason=%i.reason,
                    "settlement"
                );
            }
        }

        Ok(())
    }
}
