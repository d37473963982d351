//! Integration tests for the refund engine.
//!
//! Refunds are compensating ledger transactions: each one credits the payer
//! exactly once, and repeated calls only report the earlier result.

mod common;

use common::{setup, setup_with};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tip_ledger::LedgerError;
use tip_ledger::group_tip::GroupTipStatus;
use tip_ledger::ledger::{LedgerContext, TransactionType};
use tip_ledger::notify::NoopAnnouncer;
use tip_ledger::refund::RefundKind;
use tip_ledger::tip::TipStatus;

#[tokio::test]
async fn test_tip_refund_returns_principal_and_tax_but_not_fee() {
    let h = setup_with(
        |config| config.tip_tax_bps = 200,
        |token| token.tip_fee_bps = Some(100),
        Arc::new(NoopAnnouncer),
    )
    .await;
    let (sender, recipient) = (h.user(1), h.user(2));
    h.fund(sender, h.tokens(20)).await;

    let tip = h
        .engine
        .send_tip(
            sender,
            recipient,
            h.token.id,
            h.tokens(10),
            Some("thanks".to_string()),
            None,
        )
        .await
        .expect("send tip");
    assert_eq!(tip.status, TipStatus::Completed);
    assert_eq!(tip.fee_atomic, dec!(100000));
    assert_eq!(tip.tax_atomic, dec!(200000));
    assert_eq!(h.balance(sender).await, dec!(9700000));
    assert_eq!(h.balance(recipient).await, h.tokens(10));
    assert_eq!(h.balance(h.house).await, dec!(300000));

    let receipt = h.engine.refund_tip(tip.id).await.expect("refund");
    assert_eq!(receipt.kind, RefundKind::Tip);
    assert_eq!(receipt.user_id, sender);
    assert_eq!(receipt.amount(), dec!(10200000));
    assert!(!receipt.already_refunded);

    assert_eq!(h.balance(sender).await, dec!(19900000));
    assert_eq!(h.balance(recipient).await, Decimal::ZERO);
    assert_eq!(h.balance(h.house).await, dec!(100000));

    let stored = h.engine.get_tip(tip.id).await.unwrap();
    assert_eq!(stored.status, TipStatus::Refunded);
    assert_eq!(stored.refunded_at, Some(receipt.refunded_at));

    // Second call reports the first refund and moves nothing
    let again = h.engine.refund_tip(tip.id).await.unwrap();
    assert!(again.already_refunded);
    assert_eq!(again.amount(), receipt.amount());
    assert_eq!(again.refunded_at, receipt.refunded_at);
    assert_eq!(h.balance(sender).await, dec!(19900000));

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_concurrent_tip_refunds_credit_once() {
    let h = setup().await;
    let h = Arc::new(h);
    let (sender, recipient) = (h.user(1), h.user(2));
    h.fund(sender, h.tokens(5)).await;

    let tip = h
        .engine
        .send_tip(sender, recipient, h.token.id, h.tokens(5), None, None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move { h.engine.refund_tip(tip.id).await }));
    }

    let mut fresh = 0;
    for handle in handles {
        let receipt = handle.await.unwrap().expect("refund");
        if !receipt.already_refunded {
            fresh += 1;
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(h.balance(sender).await, h.tokens(5));
    assert_eq!(h.balance(recipient).await, Decimal::ZERO);

    let refunds = h
        .engine
        .get_transactions(sender, 50)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.tx_type == TransactionType::TipRefund)
        .count();
    assert_eq!(refunds, 1);

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_tip_refund_fails_when_recipient_spent_funds() {
    let h = setup().await;
    let (sender, recipient, third) = (h.user(1), h.user(2), h.user(3));
    h.fund(sender, h.tokens(4)).await;

    let tip = h
        .engine
        .send_tip(sender, recipient, h.token.id, h.tokens(4), None, None)
        .await
        .unwrap();
    h.engine
        .transfer(recipient, third, h.token.id, h.tokens(3), LedgerContext::new())
        .await
        .unwrap();

    let result = h.engine.refund_tip(tip.id).await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    let stored = h.engine.get_tip(tip.id).await.unwrap();
    assert_eq!(stored.status, TipStatus::Completed);
    assert!(stored.refunded_at.is_none());
    assert_eq!(h.balance(sender).await, Decimal::ZERO);
    assert_eq!(h.balance(recipient).await, h.tokens(1));

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_missing_tip() {
    let h = setup().await;
    let result = h.engine.refund_tip(-1).await;
    assert!(matches!(result, Err(LedgerError::NotFound { .. })));
}

#[tokio::test]
async fn test_concurrent_group_tip_refunds_credit_once() {
    let h = setup_with(
        |config| config.group_tip_tax_bps = 500,
        |_| {},
        Arc::new(NoopAnnouncer),
    )
    .await;
    let h = Arc::new(h);
    let (creator, claimer) = (h.user(1), h.user(2));
    h.fund(creator, h.tokens(21)).await;

    let created = h
        .engine
        .create_group_tip(creator, h.token.id, h.tokens(20), 600, None)
        .await
        .unwrap();
    assert_eq!(h.balance(creator).await, Decimal::ZERO);
    h.engine.claim_group_tip(created.id, claimer).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.engine.refund_group_tip(created.id).await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        let receipt = handle.await.unwrap().expect("refund");
        assert_eq!(receipt.kind, RefundKind::GroupTip);
        assert_eq!(receipt.amount(), h.tokens(21));
        if !receipt.already_refunded {
            fresh += 1;
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(h.balance(creator).await, h.tokens(21));
    assert_eq!(h.balance(claimer).await, Decimal::ZERO);

    let stored = h.engine.get_group_tip(created.id).await.unwrap();
    assert_eq!(stored.status, GroupTipStatus::Refunded);

    // Finalize after a refund must not pay anybody
    let outcome = h.engine.finalize_group_tip(created.id).await.unwrap();
    assert!(outcome.already_terminal);
    assert!(outcome.payouts.is_empty());

    h.assert_conserved().await;
}

#[tokio::test]
async fn test_finalized_group_tip_cannot_be_refunded() {
    let h = setup().await;
    let (creator, claimer) = (h.user(1), h.user(2));
    h.fund(creator, h.tokens(2)).await;

    let created = h
        .engine
        .create_group_tip(creator, h.token.id, h.tokens(2), 600, None)
        .await
        .unwrap();
    h.engine.claim_group_tip(created.id, claimer).await.unwrap();
    h.engine.finalize_group_tip(created.id).await.unwrap();

    let result = h.engine.refund_group_tip(created.id).await;
    assert!(matches!(result, Err(LedgerError::InvalidState { .. })));
    assert_eq!(h.balance(claimer).await, h.tokens(2));
}

#[tokio::test]
async fn test_audit_all_balanced_after_refunds() {
    let h = setup().await;
    let (sender, recipient) = (h.user(1), h.user(2));
    h.fund(sender, h.tokens(3)).await;

    let tip = h
        .engine
        .send_tip(sender, recipient, h.token.id, h.tokens(3), None, None)
        .await
        .unwrap();
    h.engine.refund_tip(tip.id).await.unwrap();

    // The registry only knows this test's token
    let reports = h.engine.audit_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports.iter().all(|r| r.is_balanced()));
}
