mod common;

use chrono::Utc;
use engine::{
    BeginPaymentCmd, ConfirmationStatus, CreateDonationCmd, Donation, DonationState, ManualClaim,
    PaymentMethod,
};

use common::{Harness, harness};

async fn pledge(h: &Harness, method: PaymentMethod, amount_minor: i64) -> Donation {
    h.engine
        .create_donation(CreateDonationCmd::new(
            "alice",
            "water",
            amount_minor,
            method,
            Utc::now(),
        ))
        .await
        .unwrap()
}

async fn claim(h: &Harness, donation: &Donation, reference: &str) {
    h.engine
        .begin_payment(BeginPaymentCmd::manual(
            donation.id,
            "alice",
            ManualClaim::new(reference).receipt_url("https://files.example.org/slip.pdf"),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn claim_moves_donation_to_processing_and_alerts_staff() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::BankTransfer, 5000).await;

    let handle = h
        .engine
        .submit_manual_payment(donation.id, "alice", ManualClaim::new("  FT24015ABC "))
        .await
        .unwrap();
    assert_eq!(handle.state, DonationState::Processing);
    assert_eq!(handle.provider, "bank_transfer");
    assert_eq!(handle.reference, "FT24015ABC");

    let (stored, attempt) = h.engine.payment_status(donation.id).await.unwrap();
    assert_eq!(stored.state, DonationState::Processing);
    assert_eq!(stored.transaction_reference.as_deref(), Some("FT24015ABC"));
    assert_eq!(
        attempt.unwrap().confirmation_status,
        ConfirmationStatus::Pending
    );

    let mut recipients: Vec<_> = h
        .notifier
        .sent()
        .into_iter()
        .map(|n| {
            assert_eq!(n.kind, "bank_transfer_pending");
            assert_eq!(
                n.action_ref.as_deref(),
                Some(format!("/admin/reconciliation?donation_id={}", donation.id).as_str())
            );
            n.user_id
        })
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["amina".to_string(), "otieno".to_string()]);
}

#[tokio::test]
async fn card_claims_use_their_own_notification_kind() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::Card, 10_000).await;
    claim(&h, &donation, "CARD-7781").await;

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.kind == "card_payment_pending"));
}

#[tokio::test]
async fn claim_requires_a_reference_and_a_manual_method() {
    let h = harness().await;
    let transfer = pledge(&h, PaymentMethod::BankTransfer, 5000).await;
    let err = h
        .engine
        .submit_manual_payment(transfer.id, "alice", ManualClaim::new("   "))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let mpesa = pledge(&h, PaymentMethod::MobileMoney, 5000).await;
    let err = h
        .engine
        .submit_manual_payment(mpesa.id, "alice", ManualClaim::new("FT1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");

    let err = h
        .engine
        .submit_manual_payment(transfer.id, "bob", ManualClaim::new("FT1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "donation_not_found");
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn resubmitted_claim_replaces_the_earlier_one() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::BankTransfer, 5000).await;
    claim(&h, &donation, "FT-OLD").await;
    claim(&h, &donation, "FT-NEW").await;

    let attempts = h.engine.payment_attempts(donation.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    let old = attempts
        .iter()
        .find(|a| a.provider_reference == "FT-OLD")
        .unwrap();
    let new = attempts
        .iter()
        .find(|a| a.provider_reference == "FT-NEW")
        .unwrap();
    assert_eq!(old.confirmation_status, ConfirmationStatus::Rejected);
    assert_eq!(new.confirmation_status, ConfirmationStatus::Pending);

    let stored = h.engine.donation(donation.id).await.unwrap();
    assert_eq!(stored.transaction_reference.as_deref(), Some("FT-NEW"));

    let err = h
        .engine
        .confirm_bank_transfer(donation.id, "amina", "FT-OLD")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state");
}

#[tokio::test]
async fn confirm_completes_and_credits_net_amount_once() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::Card, 10_000).await;
    claim(&h, &donation, "CARD-7781").await;

    let confirmed = h
        .engine
        .confirm_bank_transfer(donation.id, "otieno", "CARD-7781")
        .await
        .unwrap();
    assert_eq!(confirmed.state, DonationState::Completed);
    assert!(confirmed.completed_at.is_some());
    assert_eq!(h.engine.campaign("water").await.unwrap().current_minor, 9800);

    let again = h
        .engine
        .confirm_bank_transfer(donation.id, "amina", "CARD-7781")
        .await
        .unwrap();
    assert_eq!(again.state, DonationState::Completed);
    assert_eq!(h.engine.campaign("water").await.unwrap().current_minor, 9800);

    let attempts = h.engine.payment_attempts(donation.id).await.unwrap();
    assert_eq!(attempts[0].confirmation_status, ConfirmationStatus::Confirmed);

    // No more claims once paid.
    let err = h
        .engine
        .submit_manual_payment(donation.id, "alice", ManualClaim::new("CARD-9999"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state");
}

#[tokio::test]
async fn reject_fails_the_donation() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::BankTransfer, 5000).await;
    claim(&h, &donation, "FT24015ABC").await;

    let rejected = h
        .engine
        .reject_bank_transfer(donation.id, "amina", "FT24015ABC", "no such credit on statement")
        .await
        .unwrap();
    assert_eq!(rejected.state, DonationState::Failed);
    assert_eq!(h.engine.campaign("water").await.unwrap().current_minor, 0);

    let attempts = h.engine.payment_attempts(donation.id).await.unwrap();
    assert_eq!(attempts[0].confirmation_status, ConfirmationStatus::Rejected);

    let err = h
        .engine
        .confirm_bank_transfer(donation.id, "amina", "FT24015ABC")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state");
}

#[tokio::test]
async fn only_staff_decide_claims() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::BankTransfer, 5000).await;
    claim(&h, &donation, "FT24015ABC").await;

    let err = h
        .engine
        .confirm_bank_transfer(donation.id, "alice", "FT24015ABC")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");

    let err = h
        .engine
        .reject_bank_transfer(donation.id, "nobody", "FT24015ABC", "spam")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");

    let stored = h.engine.donation(donation.id).await.unwrap();
    assert_eq!(stored.state, DonationState::Processing);
}

#[tokio::test]
async fn mobile_money_is_not_reconciled_by_hand() {
    let h = harness().await;
    let donation = pledge(&h, PaymentMethod::MobileMoney, 1000).await;
    let handle = h
        .engine
        .begin_payment(BeginPaymentCmd::mobile_money(donation.id, "alice", "0712345678"))
        .await
        .unwrap();

    let err = h
        .engine
        .confirm_bank_transfer(donation.id, "amina", &handle.reference)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_state");
}

#[tokio::test]
async fn broken_notifier_does_not_fail_the_claim() {
    let h = harness().await;
    h.notifier.break_delivery();
    let donation = pledge(&h, PaymentMethod::BankTransfer, 5000).await;

    h.engine
        .submit_manual_payment(donation.id, "alice", ManualClaim::new("FT24015ABC"))
        .await
        .unwrap();

    let stored = h.engine.donation(donation.id).await.unwrap();
    assert_eq!(stored.state, DonationState::Processing);
    assert!(h.notifier.sent().is_empty());
}
