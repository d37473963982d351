//! Settlement engine facade.
//!
//! [`SettlementEngine`] wires the ledger, the state machines, the refund
//! engine and the expiry timers together and is the single entry point for
//! the chat layer, an admin route or a test harness. Each operation returns a
//! success payload or a typed [`LedgerError`](crate::ledger::LedgerError); post-commit notifications are
//! fired in the background and never affect the result.

use crate::config::EngineConfig;
use crate::game::{Match, MatchId, MatchManager, MatchMove};
use crate::group_tip::{
    ClaimOutcome, GroupTip, GroupTipClaim, GroupTipId, GroupTipManager, GroupTipOutcome,
    GroupTipStatus,
};
use crate::ledger::{
    Amount, ConservationReport, DepositKey, DepositReceipt, LedgerContext, LedgerManager,
    LedgerResult, LedgerTransaction, TokenId, TransactionType, TransferReceipt,
    UserBalance, UserId,
};
use crate::notify::{
    Announcer, ListenerSet, NoopAnnouncer, NoopListener, SettlementListener, spawn_post_commit,
};
use crate::refund::{RefundEngine, RefundReceipt};
use crate::scheduler::{ExpiryKey, ExpiryScheduler};
use crate::stats::{PlayerStats, StatsManager, StreakRecorder};
use crate::tip::{Tip, TipId, TipManager};
use crate::token::{Token, TokenRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

/// What a recovery scan or sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Overdue group tips resolved (finalized or refunded)
    pub resolved_group_tips: usize,
    /// Overdue offers expired
    pub expired_matches: usize,
    /// Future deadlines put back on a timer
    pub rescheduled: usize,
    /// Entities whose resolution failed and will be retried by the sweep
    pub failures: usize,
}

/// Ledger and settlement engine
#[derive(Clone)]
pub struct SettlementEngine {
    config: EngineConfig,
    registry: Arc<TokenRegistry>,
    ledger: LedgerManager,
    tips: TipManager,
    matches: MatchManager,
    group_tips: GroupTipManager,
    refunds: RefundEngine,
    stats: StatsManager,
    scheduler: ExpiryScheduler,
    listener: Arc<dyn SettlementListener>,
}

impl SettlementEngine {
    /// Create an engine with the given chat-layer collaborators
    ///
    /// Streak bookkeeping is always registered ahead of `listener`.
    pub fn new(
        pool: Arc<PgPool>,
        registry: TokenRegistry,
        config: EngineConfig,
        announcer: Arc<dyn Announcer>,
        listener: Arc<dyn SettlementListener>,
    ) -> Self {
        let ledger = LedgerManager::new(
            Arc::clone(&pool),
            config.house_account,
            config.withdrawal_limits.clone(),
        );
        let stats = StatsManager::new(Arc::clone(&pool));
        let refunds = RefundEngine::new(ledger.clone());
        let tips = TipManager::new(ledger.clone(), config.tip_tax_bps);
        let matches = MatchManager::new(
            ledger.clone(),
            stats.clone(),
            config.house_fee_bps,
            config.match_offer_ttl(),
        );
        let group_tips = GroupTipManager::new(
            ledger.clone(),
            refunds.clone(),
            announcer,
            config.group_tip_tax_bps,
            config.group_tip_min_duration_secs,
            config.group_tip_max_duration_secs,
        );
        let listener: Arc<dyn SettlementListener> = Arc::new(
            ListenerSet::new()
                .with(Arc::new(StreakRecorder::new(stats.clone())))
                .with(listener),
        );

        Self {
            config,
            registry: Arc::new(registry),
            ledger,
            tips,
            matches,
            group_tips,
            refunds,
            stats,
            scheduler: ExpiryScheduler::new(),
            listener,
        }
    }

    /// Engine that announces nowhere and only records streaks
    pub fn headless(pool: Arc<PgPool>, registry: TokenRegistry, config: EngineConfig) -> Self {
        Self::new(
            pool,
            registry,
            config,
            Arc::new(NoopAnnouncer),
            Arc::new(NoopListener),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerManager {
        &self.ledger
    }

    pub fn scheduler(&self) -> &ExpiryScheduler {
        &self.scheduler
    }

    pub fn token(&self, token_id: TokenId) -> LedgerResult<&Token> {
        self.registry.get(token_id)
    }

    pub fn token_by_symbol(&self, symbol: &str) -> LedgerResult<&Token> {
        self.registry.by_symbol(symbol)
    }

    pub fn tokens(&self) -> Vec<&Token> {
        self.registry.tokens()
    }

    // === Balance operations ===

    /// Direct transfer between two users; `ctx.fee` goes to the house
    pub async fn transfer(
        &self,
        from_user: UserId,
        to_user: UserId,
        token_id: TokenId,
        amount: Amount,
        ctx: LedgerContext,
    ) -> LedgerResult<TransferReceipt> {
        self.registry.get_active(token_id)?;
        self.ledger
            .transfer(from_user, to_user, token_id, amount, TransactionType::Transfer, ctx)
            .await
    }

    pub async fn debit(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: LedgerContext,
    ) -> LedgerResult<Amount> {
        self.registry.get(token_id)?;
        self.ledger.debit(user_id, token_id, amount, reason, ctx).await
    }

    pub async fn credit(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: LedgerContext,
    ) -> LedgerResult<Amount> {
        self.registry.get(token_id)?;
        self.ledger.credit(user_id, token_id, amount, reason, ctx).await
    }

    /// Credit a watcher-reported deposit exactly once
    pub async fn credit_deposit(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        key: &DepositKey,
    ) -> LedgerResult<DepositReceipt> {
        self.registry.get(token_id)?;
        self.ledger
            .credit_deposit(user_id, token_id, amount, key)
            .await
    }

    /// Policy-checked withdrawal debit, exactly once per idempotency key
    pub async fn withdraw(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        idempotency_key: String,
        destination: &str,
    ) -> LedgerResult<Amount> {
        let token = self.registry.get_active(token_id)?;
        self.ledger.check_withdrawal(user_id, token, amount).await?;
        self.ledger
            .withdraw(user_id, token_id, amount, idempotency_key, destination)
            .await
    }

    // === Direct tips ===

    pub async fn send_tip(
        &self,
        from_user: UserId,
        to_user: UserId,
        token_id: TokenId,
        amount: Amount,
        note: Option<String>,
        context_id: Option<String>,
    ) -> LedgerResult<Tip> {
        let token = self.registry.get_active(token_id)?;
        self.tips
            .send_tip(from_user, to_user, token, amount, note, context_id)
            .await
    }

    pub async fn refund_tip(&self, tip_id: TipId) -> LedgerResult<RefundReceipt> {
        self.refunds.refund_tip(tip_id).await
    }

    // === Matches ===

    pub async fn create_match(
        &self,
        challenger: UserId,
        token_id: TokenId,
        wager: Amount,
        context_id: Option<String>,
    ) -> LedgerResult<Match> {
        let token = self.registry.get_active(token_id)?;
        self.matches
            .create_match(challenger, token, wager, context_id)
            .await
    }

    /// Lock the challenger's move and start the offer timer
    pub async fn offer_match(
        &self,
        match_id: MatchId,
        challenger: UserId,
        challenger_move: MatchMove,
    ) -> LedgerResult<Match> {
        let offered = self
            .matches
            .offer_match(match_id, challenger, challenger_move)
            .await?;
        if let Some(deadline) = offered.offer_deadline {
            self.schedule_match_expiry(match_id, deadline);
        }
        Ok(offered)
    }

    pub async fn join_match(
        &self,
        match_id: MatchId,
        joiner: UserId,
        joiner_move: MatchMove,
    ) -> LedgerResult<Match> {
        let settled = self
            .matches
            .join_match(match_id, joiner, joiner_move)
            .await?;
        self.scheduler.cancel(ExpiryKey::Match(match_id));

        let listener = Arc::clone(&self.listener);
        let notice = settled.clone();
        spawn_post_commit(format!("match {match_id} settlement notice"), async move {
            listener.match_settled(&notice).await
        });
        Ok(settled)
    }

    pub async fn cancel_match(&self, match_id: MatchId, challenger: UserId) -> LedgerResult<Match> {
        let canceled = self.matches.cancel_match(match_id, challenger).await?;
        self.scheduler.cancel(ExpiryKey::Match(match_id));
        self.notify_match_closed(&canceled);
        Ok(canceled)
    }

    /// Expire an overdue offer; terminal matches come back unchanged
    pub async fn expire_match(&self, match_id: MatchId) -> LedgerResult<Match> {
        let (current, expired) = self.matches.expire_match(match_id).await?;
        if expired {
            self.scheduler.cancel(ExpiryKey::Match(match_id));
            self.notify_match_closed(&current);
        }
        Ok(current)
    }

    fn notify_match_closed(&self, closed: &Match) {
        let listener = Arc::clone(&self.listener);
        let notice = closed.clone();
        spawn_post_commit(format!("match {} close notice", closed.id), async move {
            listener.match_closed(&notice).await
        });
    }

    fn schedule_match_expiry(&self, match_id: MatchId, at: chrono::DateTime<Utc>) {
        let engine = self.clone();
        self.scheduler.schedule(ExpiryKey::Match(match_id), at, move || async move {
            if let Err(e) = engine.expire_match(match_id).await {
                log::error!("Expiring match {match_id} failed: {e}");
            }
        });
    }

    // === Group tips ===

    /// Create and announce a group tip, then arm its expiry timer
    pub async fn create_group_tip(
        &self,
        creator: UserId,
        token_id: TokenId,
        total: Amount,
        duration_seconds: i64,
        context_id: Option<String>,
    ) -> LedgerResult<GroupTip> {
        let token = self.registry.get_active(token_id)?;
        let created = self
            .group_tips
            .create_group_tip(creator, token, total, duration_seconds, context_id)
            .await?;
        self.schedule_group_tip_expiry(created.id, created.expires_at);
        Ok(created)
    }

    pub async fn claim_group_tip(
        &self,
        group_tip_id: GroupTipId,
        user_id: UserId,
    ) -> LedgerResult<ClaimOutcome> {
        let outcome = self
            .group_tips
            .claim_group_tip(group_tip_id, user_id)
            .await?;
        if let ClaimOutcome::Expired(resolved) = &outcome {
            self.after_group_tip_resolved(resolved);
        }
        Ok(outcome)
    }

    /// Resolve a group tip; idempotent
    pub async fn finalize_group_tip(&self, group_tip_id: GroupTipId) -> LedgerResult<GroupTipOutcome> {
        let outcome = self.group_tips.finalize_group_tip(group_tip_id).await?;
        self.after_group_tip_resolved(&outcome);
        Ok(outcome)
    }

    /// Refund an active group tip to its creator; idempotent
    pub async fn refund_group_tip(&self, group_tip_id: GroupTipId) -> LedgerResult<RefundReceipt> {
        let receipt = self.refunds.refund_group_tip(group_tip_id).await?;
        if !receipt.already_refunded {
            self.after_group_tip_resolved(&GroupTipOutcome {
                group_tip_id,
                creator_id: receipt.user_id,
                token_id: receipt.token_id,
                status: GroupTipStatus::Refunded,
                payouts: Vec::new(),
                refunded: Some(receipt.amount()),
                already_terminal: false,
            });
        }
        Ok(receipt)
    }

    fn after_group_tip_resolved(&self, outcome: &GroupTipOutcome) {
        self.scheduler
            .cancel(ExpiryKey::GroupTip(outcome.group_tip_id));
        if outcome.already_terminal {
            return;
        }

        let listener = Arc::clone(&self.listener);
        let notice = outcome.clone();
        spawn_post_commit(
            format!("group tip {} resolution notice", outcome.group_tip_id),
            async move { listener.group_tip_resolved(&notice).await },
        );
    }

    fn schedule_group_tip_expiry(&self, group_tip_id: GroupTipId, at: chrono::DateTime<Utc>) {
        let engine = self.clone();
        self.scheduler
            .schedule(ExpiryKey::GroupTip(group_tip_id), at, move || async move {
                if let Err(e) = engine.finalize_group_tip(group_tip_id).await {
                    log::error!("Finalizing group tip {group_tip_id} failed: {e}");
                }
            });
    }

    // === Reads ===

    pub async fn get_balance(&self, user_id: UserId, token_id: TokenId) -> LedgerResult<Amount> {
        self.ledger.get_balance(user_id, token_id).await
    }

    pub async fn get_balances(&self, user_id: UserId) -> LedgerResult<Vec<UserBalance>> {
        self.ledger.get_balances(user_id).await
    }

    pub async fn get_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        self.ledger.get_transactions(user_id, limit).await
    }

    pub async fn get_tip(&self, tip_id: TipId) -> LedgerResult<Tip> {
        self.tips.get_tip(tip_id).await
    }

    pub async fn list_tips(&self, user_id: UserId, limit: i64) -> LedgerResult<Vec<Tip>> {
        self.tips.list_tips(user_id, limit).await
    }

    pub async fn get_match(&self, match_id: MatchId) -> LedgerResult<Match> {
        self.matches.get_match(match_id).await
    }

    pub async fn set_match_message_ref(&self, match_id: MatchId, message_ref: &str) -> LedgerResult<()> {
        self.matches.set_message_ref(match_id, message_ref).await
    }

    pub async fn get_group_tip(&self, group_tip_id: GroupTipId) -> LedgerResult<GroupTip> {
        self.group_tips.get_group_tip(group_tip_id).await
    }

    pub async fn get_group_tip_claims(
        &self,
        group_tip_id: GroupTipId,
    ) -> LedgerResult<Vec<GroupTipClaim>> {
        self.group_tips.get_claims(group_tip_id).await
    }

    pub async fn get_stats(&self, user_id: UserId) -> LedgerResult<PlayerStats> {
        self.stats.get_stats(user_id).await
    }

    /// Conservation check for one token
    pub async fn audit_token(&self, token_id: TokenId) -> LedgerResult<ConservationReport> {
        self.registry.get(token_id)?;
        self.ledger.audit_token(token_id).await
    }

    /// Conservation check for every registered token
    pub async fn audit_all(&self) -> LedgerResult<Vec<ConservationReport>> {
        let mut reports = Vec::with_capacity(self.registry.len());
        for token in self.registry.tokens() {
            reports.push(self.ledger.audit_token(token.id).await?);
        }
        Ok(reports)
    }

    // === Expiry recovery ===

    /// Startup scan: resolve everything overdue, re-arm timers for the rest
    pub async fn recover(&self) -> LedgerResult<RecoveryReport> {
        let mut report = self.sweep_overdue().await?;
        let now = Utc::now();

        for (group_tip_id, expires_at) in self.group_tips.active_group_tips().await? {
            if expires_at > now {
                self.schedule_group_tip_expiry(group_tip_id, expires_at);
                report.rescheduled += 1;
            }
        }
        for (match_id, deadline) in self.matches.open_offers().await? {
            if deadline > now {
                self.schedule_match_expiry(match_id, deadline);
                report.rescheduled += 1;
            }
        }

        log::info!(
            "Recovery: {} group tip(s) resolved, {} match(es) expired, {} timer(s) re-armed, {} failure(s)",
            report.resolved_group_tips,
            report.expired_matches,
            report.rescheduled,
            report.failures
        );
        Ok(report)
    }

    /// Resolve every group tip and offer whose deadline has passed
    pub async fn sweep_overdue(&self) -> LedgerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for group_tip_id in self.group_tips.overdue_group_tips(now).await? {
            match self.finalize_group_tip(group_tip_id).await {
                Ok(outcome) if !outcome.already_terminal => report.resolved_group_tips += 1,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Sweep could not finalize group tip {group_tip_id}: {e}");
                    report.failures += 1;
                }
            }
        }

        for match_id in self.matches.overdue_offers(now).await? {
            match self.matches.expire_match(match_id).await {
                Ok((expired, true)) => {
                    self.scheduler.cancel(ExpiryKey::Match(match_id));
                    self.notify_match_closed(&expired);
                    report.expired_matches += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("Sweep could not expire match {match_id}: {e}");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Periodic backstop for missed timers; runs until the task is dropped
    pub async fn run_sweeper(&self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; recovery already covered it
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.sweep_overdue().await {
                Ok(report) if report != RecoveryReport::default() => {
                    log::info!("Expiry sweep: {report:?}");
                }
                Ok(_) => {}
                Err(e) => log::error!("Expiry sweep failed: {e}"),
            }
        }
    }
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("config", &self.config)
            .field("tokens", &self.registry.len())
            .field("pending_timers", &self.scheduler.pending())
            .finish()
    }
}

