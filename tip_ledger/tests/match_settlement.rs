//! Integration tests for two-player match settlement.
//!
//! Tests decisive and tied settlement, rake, counters, the join race,
//! cancellation and offer expiry.

mod common;

use common::{setup, setup_with};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tip_ledger::LedgerError;
use tip_ledger::game::{MatchMove, MatchResult, MatchStatus};
use tip_ledger::ledger::{EscrowKey, TransactionType};
use tip_ledger::notify::NoopAnnouncer;

#[tokio::test]
async fn test_decisive_match_pays_winner_minus_rake() {
    let h = setup().await;
    let (challenger, joiner) = (h.user(1), h.user(2));
    let wager = h.tokens(10);
    h.fund(challenger, wager).await;
    h.fund(joiner, wager).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, wager, Some("guild-1".to_string()))
        .await
        .expect("create");
    assert_eq!(created.status, MatchStatus::Draft);
    assert_eq!(h.balance(challenger).await, Decimal::ZERO);
    assert_eq!(
        h.engine
            .ledger()
            .escrow_balance(EscrowKey::Match(created.id), h.token.id)
            .await
            .unwrap(),
        wager
    );

    let offered = h
        .engine
        .offer_match(created.id, challenger, MatchMove::Penguin)
        .await
        .expect("offer");
    assert_eq!(offered.status, MatchStatus::Offered);
    assert!(offered.offer_deadline.is_some());

    let settled = h
        .engine
        .join_match(created.id, joiner, MatchMove::Pebble)
        .await
        .expect("join");

    // 10 PENGU each, 6 decimals: pot 20_000_000, rake 2% = 400_000
    assert_eq!(settled.status, MatchStatus::Settled);
    assert_eq!(settled.result, Some(MatchResult::JoinerWins));
    assert_eq!(settled.winner_user_id, Some(joiner));
    assert_eq!(settled.loser_user_id(), Some(challenger));
    assert_eq!(settled.rake_atomic, Some(dec!(400000)));
    assert_eq!(settled.payout_atomic, Some(dec!(19600000)));

    assert_eq!(h.balance(joiner).await, dec!(19600000));
    assert_eq!(h.balance(challenger).await, Decimal::ZERO);
    assert_eq!(h.balance(h.house).await, dec!(400000));
    assert_eq!(
        h.engine
            .ledger()
            .escrow_balance(EscrowKey::Match(created.id), h.token.id)
            .await
            .unwrap(),
        Decimal::ZERO
    );

    let house_rows = h.engine.get_transactions(h.house, 10).await.unwrap();
    let rake = house_rows
        .iter()
        .find(|t| t.tx_type == TransactionType::Rake)
        .expect("rake row");
    assert_eq!(rake.amount, dec!(400000));
    assert_eq!(rake.counterparty_user_id, None);

    let joiner_stats = h.engine.get_stats(joiner).await.unwrap();
    let challenger_stats = h.engine.get_stats(challenger).await.unwrap();
    assert_eq!(joiner_stats.wins, 1);
    assert_eq!(challenger_stats.losses, 1);
    assert!(!h.engine.scheduler().is_scheduled(
        tip_ledger::scheduler::ExpiryKey::Match(created.id)
    ));

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_tie_refunds_both_wagers() {
    let h = setup().await;
    let (challenger, joiner) = (h.user(1), h.user(2));
    let wager = h.tokens(3);
    h.fund(challenger, wager).await;
    h.fund(joiner, wager).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, wager, None)
        .await
        .unwrap();
    h.engine
        .offer_match(created.id, challenger, MatchMove::Fish)
        .await
        .unwrap();
    let settled = h
        .engine
        .join_match(created.id, joiner, MatchMove::Fish)
        .await
        .unwrap();

    assert_eq!(settled.result, Some(MatchResult::Tie));
    assert_eq!(settled.winner_user_id, None);
    assert_eq!(h.balance(challenger).await, wager);
    assert_eq!(h.balance(joiner).await, wager);
    assert_eq!(h.balance(h.house).await, Decimal::ZERO);
    assert_eq!(h.engine.get_stats(challenger).await.unwrap().ties, 1);
    assert_eq!(h.engine.get_stats(joiner).await.unwrap().ties, 1);

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_concurrent_joins_settle_once() {
    let h = setup().await;
    let h = Arc::new(h);
    let challenger = h.user(1);
    let wager = h.tokens(5);
    h.fund(challenger, wager).await;
    for n in 2..=6 {
        h.fund(h.user(n), wager).await;
    }

    let created = h
        .engine
        .create_match(challenger, h.token.id, wager, None)
        .await
        .unwrap();
    h.engine
        .offer_match(created.id, challenger, MatchMove::Pebble)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 2..=6 {
        let h = Arc::clone(&h);
        let joiner = h.user(n);
        handles.push(tokio::spawn(async move {
            (
                joiner,
                h.engine
                    .join_match(created.id, joiner, MatchMove::Fish)
                    .await,
            )
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (joiner, result) = handle.await.unwrap();
        match result {
            Ok(settled) => winners.push((joiner, settled)),
            Err(LedgerError::NotAvailable(id)) => {
                assert_eq!(id, created.id);
                // Losers of the race keep their funds
                assert_eq!(h.balance(joiner).await, wager);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let (joiner, settled) = &winners[0];
    assert_eq!(settled.joiner_id, Some(*joiner));
    assert_eq!(settled.result, Some(MatchResult::JoinerWins));

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_join_requirements() {
    let h = setup().await;
    let (challenger, broke) = (h.user(1), h.user(2));
    let wager = h.tokens(5);
    h.fund(challenger, wager).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, wager, None)
        .await
        .unwrap();

    // Not offered yet
    let early = h
        .engine
        .join_match(created.id, broke, MatchMove::Fish)
        .await;
    assert!(matches!(early, Err(LedgerError::NotAvailable(_))));

    h.engine
        .offer_match(created.id, challenger, MatchMove::Penguin)
        .await
        .unwrap();

    let own = h
        .engine
        .join_match(created.id, challenger, MatchMove::Fish)
        .await;
    assert!(matches!(own, Err(LedgerError::SelfPlay)));

    let unfunded = h
        .engine
        .join_match(created.id, broke, MatchMove::Fish)
        .await;
    assert!(matches!(unfunded, Err(LedgerError::InsufficientFunds { .. })));

    // The failed join rolled back entirely
    let current = h.engine.get_match(created.id).await.unwrap();
    assert_eq!(current.status, MatchStatus::Offered);
    assert_eq!(current.joiner_id, None);
}

#[tokio::test]
async fn test_offer_and_cancel_only_by_challenger() {
    let h = setup().await;
    let (challenger, other) = (h.user(1), h.user(2));
    let wager = h.tokens(4);
    h.fund(challenger, wager).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, wager, None)
        .await
        .unwrap();

    let foreign_offer = h
        .engine
        .offer_match(created.id, other, MatchMove::Fish)
        .await;
    assert!(matches!(foreign_offer, Err(LedgerError::NotParticipant { .. })));

    h.engine
        .offer_match(created.id, challenger, MatchMove::Fish)
        .await
        .unwrap();

    let reoffer = h
        .engine
        .offer_match(created.id, challenger, MatchMove::Pebble)
        .await;
    assert!(matches!(reoffer, Err(LedgerError::InvalidState { .. })));

    let foreign_cancel = h.engine.cancel_match(created.id, other).await;
    assert!(matches!(foreign_cancel, Err(LedgerError::NotParticipant { .. })));

    let canceled = h
        .engine
        .cancel_match(created.id, challenger)
        .await
        .expect("cancel");
    assert_eq!(canceled.status, MatchStatus::Canceled);
    assert_eq!(h.balance(challenger).await, wager);

    let again = h.engine.cancel_match(created.id, challenger).await;
    assert!(matches!(again, Err(LedgerError::InvalidState { .. })));
    assert_eq!(h.balance(challenger).await, wager);

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_draft_can_be_canceled() {
    let h = setup().await;
    let challenger = h.user(1);
    h.fund(challenger, h.tokens(2)).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, h.tokens(2), None)
        .await
        .unwrap();
    let canceled = h.engine.cancel_match(created.id, challenger).await.unwrap();

    assert_eq!(canceled.status, MatchStatus::Canceled);
    assert_eq!(h.balance(challenger).await, h.tokens(2));
}

#[tokio::test]
async fn test_offer_expires_with_refund() {
    let h = setup_with(
        |config| config.match_offer_ttl_secs = 1,
        |_| {},
        Arc::new(NoopAnnouncer),
    )
    .await;
    let (challenger, joiner) = (h.user(1), h.user(2));
    let wager = h.tokens(7);
    h.fund(challenger, wager).await;
    h.fund(joiner, wager).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, wager, None)
        .await
        .unwrap();
    h.engine
        .offer_match(created.id, challenger, MatchMove::Penguin)
        .await
        .unwrap();

    // Not overdue yet: unchanged
    let early = h.engine.expire_match(created.id).await.unwrap();
    assert_eq!(early.status, MatchStatus::Offered);

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let late_join = h
        .engine
        .join_match(created.id, joiner, MatchMove::Pebble)
        .await;
    assert!(matches!(late_join, Err(LedgerError::NotAvailable(_))));

    // The timer may already have expired it; either way this is idempotent
    let expired = h.engine.expire_match(created.id).await.unwrap();
    assert_eq!(expired.status, MatchStatus::Expired);
    let again = h.engine.expire_match(created.id).await.unwrap();
    assert_eq!(again.status, MatchStatus::Expired);

    assert_eq!(h.balance(challenger).await, wager);
    assert_eq!(h.balance(joiner).await, wager);

    let refunds = h
        .engine
        .get_transactions(challenger, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::MatchRefund)
        .count();
    assert_eq!(refunds, 1);

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_recovery_expires_overdue_offers() {
    let h = setup_with(
        |config| config.match_offer_ttl_secs = 1,
        |_| {},
        Arc::new(NoopAnnouncer),
    )
    .await;
    let challenger = h.user(1);
    h.fund(challenger, h.tokens(1)).await;

    let created = h
        .engine
        .create_match(challenger, h.token.id, h.tokens(1), None)
        .await
        .unwrap();
    h.engine
        .offer_match(created.id, challenger, MatchMove::Fish)
        .await
        .unwrap();
    // Simulate a restart: the in-process timer is lost
    h.engine.scheduler().shutdown();

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let report = h.engine.recover().await.unwrap();

    assert!(report.expired_matches >= 1);
    let current = h.engine.get_match(created.id).await.unwrap();
    assert_eq!(current.status, MatchStatus::Expired);
    assert_eq!(h.balance(challenger).await, h.tokens(1));
}
