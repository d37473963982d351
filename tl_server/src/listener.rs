//! Settlement listener that records resolved entities in the daemon log.

use async_trait::async_trait;
use tip_ledger::game::Match;
use tip_ledger::group_tip::GroupTipOutcome;
use tip_ledger::notify::{NotifyError, SettlementListener};

use crate::logging::log_settlement;

/// Writes one structured log line per settlement
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

#[async_trait]
impl SettlementListener for LogListener {
    async fn match_settled(&self, settled: &Match) -> Result<(), NotifyError> {
        let result = settled.result.map(|r| r.as_str()).unwrap_or("unknown");
        log_settlement("match", settled.id, settled.token_id, result);
        Ok(())
    }

    async fn match_closed(&self, closed: &Match) -> Result<(), NotifyError> {
        log_settlement("match", closed.id, closed.token_id, closed.status.as_str());
        Ok(())
    }

    async fn group_tip_resolved(&self, outcome: &GroupTipOutcome) -> Result<(), NotifyError> {
        let detail = format!("{} ({} payout(s))", outcome.status, outcome.payouts.len());
        log_settlement("group_tip", outcome.group_tip_id, outcome.token_id, &detail);
        Ok(())
    }
}
