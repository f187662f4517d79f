//! End-to-end settlement scenarios against an in-process asset book

mod common;

use chrono::Duration;
use common::*;
use reservation_ledger::{Address, AssetBook, KeyPair, ReservationProof, TypedMessage};
use rust_decimal::Decimal;
use settlement::{
    BillingMode, Error, GasPricing, OneTimePayment, OrganizationFee, SettlementEvent,
};
use std::str::FromStr;

fn cancellations(events: &[SettlementEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SettlementEvent::SubscriptionCancelled { .. }))
        .count()
}

#[test]
fn test_regular_due_date_and_early_execution() {
    let h = harness();
    let owner = h.owner.address();
    let (id, receipt) = create(
        &h,
        BillingMode::Regular,
        Duration::days(7),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    assert_eq!(receipt.output.next_due, h.clock_now());

    let request = execute_request(&h, id, 10 * TOKEN_UNIT, Duration::days(7), 100);
    let first = h.executor.execute_subscription(&owner, &request, pricing()).unwrap();
    assert_eq!(first.output.next_due, Some(h.clock_now() + Duration::days(7)));

    let early = h.executor.execute_subscription(&owner, &request, pricing());
    assert!(matches!(early, Err(Error::PaymentNotDueYet(_))));

    h.clock.advance(Duration::days(7));
    assert!(h.executor.execute_subscription(&owner, &request, pricing()).is_ok());
}

#[test]
fn test_fee_floor_split() {
    let h = harness();
    let owner = h.owner.address();
    let (id, created) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        100 * TOKEN_UNIT,
        150 * TOKEN_UNIT,
        1_000 * TOKEN_UNIT,
    );

    let request = execute_request(&h, id, 100 * TOKEN_UNIT, Duration::days(30), 50);
    let executed = h.executor.execute_subscription(&owner, &request, pricing()).unwrap();

    let split = executed.output.split;
    assert_eq!(split.owner_fee, 75 * TOKEN_UNIT / 100);
    assert_eq!(split.org_fee, 0);
    assert_eq!(balance(&h, &MERCHANT), 9_925 * TOKEN_UNIT / 100);

    // The operator also collected both reimbursements
    let reimbursed = created.gas.unwrap().reimbursement.amount
        + executed.gas.unwrap().reimbursement.amount;
    assert_eq!(balance(&h, &owner), split.owner_fee + reimbursed);
}

#[test]
fn test_organization_must_match_signature() {
    let h = harness();
    let owner = h.owner.address();
    let (id, _) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );

    let mut request = execute_request(&h, id, 10 * TOKEN_UNIT, Duration::days(30), 100);
    request.org_fee = OrganizationFee::new(Address::from_bytes([0x0C; 20]), 500);
    assert_eq!(
        h.executor.execute_subscription(&owner, &request, pricing()).unwrap_err(),
        Error::InvalidSignature
    );
    assert_eq!(balance(&h, &MERCHANT), 0);
}

#[test]
fn test_units_isolate_same_pair_and_free_on_cancel() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    let amounts = (10 * TOKEN_UNIT, 15 * TOKEN_UNIT, 100 * TOKEN_UNIT);

    let (first, _) = create(&h, BillingMode::Regular, Duration::days(30), amounts.0, amounts.1, amounts.2);
    let (second, _) = create(&h, BillingMode::Regular, Duration::days(30), amounts.0, amounts.1, amounts.2);

    let first_unit = unit_of(&h, &first).unwrap();
    let second_unit = unit_of(&h, &second).unwrap();
    assert_ne!(first_unit, second_unit);
    assert_eq!(h.executor.available_unit(&payer, &TOKEN).unwrap(), None);

    let cancelled = h
        .executor
        .cancel_subscription(&owner, first, &cancel_signature(&h, first))
        .unwrap();
    assert!(cancelled.output);
    assert_eq!(h.executor.available_unit(&payer, &TOKEN).unwrap(), Some(first_unit));
    assert_eq!(unit_of(&h, &first), None);
}

#[test]
fn test_zero_gas_price_aborts_before_side_effects() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    let id = uuid::Uuid::new_v4();
    let request = create_request(&h, id, Duration::days(30), 10 * TOKEN_UNIT, 15 * TOKEN_UNIT, 100 * TOKEN_UNIT);
    h.executor.drain_events().unwrap();
    let payer_before = balance(&h, &payer);

    for pricing in [GasPricing::new(0, TOKEN_UNIT), GasPricing::new(1_000_000_000, 0)] {
        let result = h.executor.create_subscription(&owner, &request, pricing);
        assert_eq!(result.unwrap_err(), Error::InvalidGasPricing);
    }

    assert_eq!(balance(&h, &payer), payer_before);
    assert_eq!(balance(&h, &owner), 0);
    assert!(h.executor.get_subscription(&id).unwrap().is_none());
    assert!(h.executor.drain_events().unwrap().is_empty());
    assert_eq!(h.executor.with_assets(|book| book.nonce(&TOKEN, &payer)).unwrap(), 0);
}

#[test]
fn test_unrepresentable_frequency_rejected() {
    let h = harness();
    let owner = h.owner.address();
    let frequency = Duration::days(365 * 400_000);

    let id = uuid::Uuid::new_v4();
    let request = create_request(&h, id, frequency, 10 * TOKEN_UNIT, 15 * TOKEN_UNIT, 100 * TOKEN_UNIT);
    let usage = h.executor.create_usage_based(&owner, &request, pricing());
    assert_eq!(usage.unwrap_err(), Error::InvalidFrequency(frequency.num_seconds()));

    // A regular authorization would otherwise be stuck at its first execution
    let regular = h.executor.create_subscription(&owner, &request, pricing());
    assert_eq!(regular.unwrap_err(), Error::InvalidFrequency(frequency.num_seconds()));
    assert!(h.executor.get_subscription(&id).unwrap().is_none());

    // The executor stays usable
    let (id, _) = create(&h, BillingMode::Regular, Duration::days(7), 10 * TOKEN_UNIT, 15 * TOKEN_UNIT, 100 * TOKEN_UNIT);
    let request = execute_request(&h, id, 10 * TOKEN_UNIT, Duration::days(7), 100);
    assert!(h.executor.execute_subscription(&owner, &request, pricing()).is_ok());
}

#[test]
fn test_usage_based_stop_then_final_execution() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    let (id, created) = create(
        &h,
        BillingMode::UsageBased,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    assert_eq!(created.output.next_due, h.clock_now() + Duration::days(30));
    let unit = unit_of(&h, &id).unwrap();

    let request = execute_request(&h, id, 8 * TOKEN_UNIT, Duration::days(30), 100);
    assert!(matches!(
        h.executor.execute_usage_based(&owner, &request, pricing()),
        Err(Error::PaymentNotDueYet(_))
    ));

    h.executor
        .stop_usage_based(&owner, id, &cancel_signature(&h, id))
        .unwrap();
    assert!(h.executor.get_subscription(&id).unwrap().unwrap().stopped);
    h.executor.drain_events().unwrap();

    h.clock.advance(Duration::days(30));
    let executed = h.executor.execute_usage_based(&owner, &request, pricing()).unwrap();

    assert_eq!(executed.output.next_due, None);
    assert_eq!(balance(&h, &MERCHANT), 8 * TOKEN_UNIT - 8 * TOKEN_UNIT / 100);
    assert!(h.executor.get_subscription(&id).unwrap().is_none());
    assert_eq!(unit_of(&h, &id), None);
    assert_eq!(h.executor.available_unit(&payer, &TOKEN).unwrap(), Some(unit));
    assert_eq!(cancellations(&h.executor.drain_events().unwrap()), 1);
}

#[test]
fn test_usage_based_due_date_includes_grace() {
    let h = harness();
    let owner = h.owner.address();
    let (id, _) = create(
        &h,
        BillingMode::UsageBased,
        Duration::days(7),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );

    h.clock.advance(Duration::days(7));
    let request = execute_request(&h, id, 5 * TOKEN_UNIT, Duration::days(7), 100);
    let executed = h.executor.execute_usage_based(&owner, &request, pricing()).unwrap();

    let grace = h.executor.config().usage_based.grace_period().unwrap();
    assert_eq!(executed.output.next_due, Some(h.clock_now() + Duration::days(7) - grace));

    // Wrong entry point for the billing mode
    h.clock.advance(Duration::days(7));
    assert_eq!(
        h.executor.execute_subscription(&owner, &request, pricing()).unwrap_err(),
        Error::BillingModeMismatch(id)
    );
}

#[test]
fn test_cancel_is_idempotent() {
    let h = harness();
    let owner = h.owner.address();
    let (id, _) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    h.executor.drain_events().unwrap();

    let signature = cancel_signature(&h, id);
    assert!(h.executor.cancel_subscription(&owner, id, &signature).unwrap().output);
    assert!(!h.executor.cancel_subscription(&owner, id, &signature).unwrap().output);
    assert!(!h.executor.force_cancel(&owner, id).unwrap().output);

    assert_eq!(cancellations(&h.executor.drain_events().unwrap()), 1);
}

#[test]
fn test_force_cancel_skips_signature_and_due_date() {
    let h = harness();
    let owner = h.owner.address();
    let (id, _) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );

    // Payment outstanding: the payer cannot cancel, the owner can
    h.clock.advance(Duration::days(1));
    assert!(matches!(
        h.executor.cancel_subscription(&owner, id, &cancel_signature(&h, id)),
        Err(Error::PaymentOutstanding(_))
    ));
    assert!(h.executor.force_cancel(&owner, id).unwrap().output);
    assert!(h.executor.get_subscription(&id).unwrap().is_none());
}

#[test]
fn test_reimbursement_accuracy_band() {
    let h = harness();
    let owner = h.owner.address();
    let (id, created) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    let request = execute_request(&h, id, 10 * TOKEN_UNIT, Duration::days(30), 100);
    let executed = h.executor.execute_subscription(&owner, &request, pricing()).unwrap();

    let low = Decimal::from_str("0.995").unwrap();
    let high = Decimal::from_str("1.10").unwrap();
    for report in [created.gas.unwrap(), executed.gas.unwrap()] {
        assert!(report.reimbursement.success);
        let accuracy = report.accuracy().unwrap();
        assert!(accuracy >= low && accuracy <= high, "accuracy {}", accuracy);
    }
}

#[test]
fn test_strict_ceiling_aborts_execution() {
    let h = harness();
    let owner = h.owner.address();
    let (id, _) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    let before = h.executor.get_subscription(&id).unwrap().unwrap();

    // Reimbursement alone would exceed max_amount - last_payment_amount
    let expensive = GasPricing::new(1_000_000_000, 100_000 * TOKEN_UNIT);
    let request = execute_request(&h, id, 10 * TOKEN_UNIT, Duration::days(30), 100);
    let result = h.executor.execute_subscription(&owner, &request, expensive);

    assert!(matches!(result, Err(Error::MaxAmountExceeded { .. })));
    assert_eq!(balance(&h, &MERCHANT), 0);
    assert_eq!(h.executor.get_subscription(&id).unwrap().unwrap(), before);
}

#[test]
fn test_increase_allowance_survives_failed_reimbursement() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    let (id, _) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    h.executor.drain_events().unwrap();

    let spender = h.executor.unit_address(unit_of(&h, &id).unwrap()).unwrap();
    let deadline = h.clock_now() + Duration::days(1);
    let proof = h
        .executor
        .with_assets(|book| book.sign_permit(&h.payer, &TOKEN, &spender, 200 * TOKEN_UNIT, deadline))
        .unwrap()
        .unwrap();

    let expensive = GasPricing::new(1_000_000_000, 100_000 * TOKEN_UNIT);
    let receipt = h
        .executor
        .increase_allowance(&owner, id, &payer, &ReservationProof::Delegated(proof), expensive)
        .unwrap();

    assert_eq!(receipt.output, 200 * TOKEN_UNIT);
    assert!(!receipt.gas.unwrap().reimbursement.success);
    assert_eq!(h.executor.remaining_allowance(&payer, &id).unwrap(), 200 * TOKEN_UNIT);
    assert!(h
        .executor
        .drain_events()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SettlementEvent::ReimbursementFailed { .. })));
}

#[test]
fn test_update_max_amount() {
    let h = harness();
    let owner = h.owner.address();
    let (id, _) = create(
        &h,
        BillingMode::Regular,
        Duration::days(30),
        10 * TOKEN_UNIT,
        15 * TOKEN_UNIT,
        100 * TOKEN_UNIT,
    );
    let authority = h.executor.authority().unwrap();
    let sign = |new_max_amount| {
        h.payer
            .sign_typed(&authority, &TypedMessage::UpdateMaxAmount { id, new_max_amount })
            .unwrap()
    };

    assert!(matches!(
        h.executor.update_max_amount(&owner, id, 10 * TOKEN_UNIT, &sign(10 * TOKEN_UNIT)),
        Err(Error::InvalidMaxAmount { .. })
    ));
    h.executor
        .update_max_amount(&owner, id, 50 * TOKEN_UNIT, &sign(50 * TOKEN_UNIT))
        .unwrap();
    assert_eq!(
        h.executor.get_subscription(&id).unwrap().unwrap().max_amount,
        50 * TOKEN_UNIT
    );
}

#[test]
fn test_pay_token_with_direct_reimbursement() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    h.executor
        .with_assets_mut(|book| book.approve(&TOKEN, &payer, &ENGINE, 101 * TOKEN_UNIT))
        .unwrap();

    let payment = OneTimePayment {
        payer,
        merchant: MERCHANT,
        asset: TOKEN,
        amount: 100 * TOKEN_UNIT,
        fee_bps: 100,
        org_fee: OrganizationFee::none(),
    };
    let receipt = h.executor.pay_token(&owner, &payment, pricing()).unwrap();
    let report = receipt.gas.unwrap();

    assert!(report.reimbursement.success);
    assert_eq!(balance(&h, &MERCHANT), 99 * TOKEN_UNIT);
    assert_eq!(balance(&h, &owner), TOKEN_UNIT + report.reimbursement.amount);
}

#[test]
fn test_pay_token_commits_when_reimbursement_fails() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    h.executor
        .with_assets_mut(|book| book.approve(&TOKEN, &payer, &ENGINE, 100 * TOKEN_UNIT))
        .unwrap();

    let payment = OneTimePayment {
        payer,
        merchant: MERCHANT,
        asset: TOKEN,
        amount: 100 * TOKEN_UNIT,
        fee_bps: 100,
        org_fee: OrganizationFee::none(),
    };
    let receipt = h.executor.pay_token(&owner, &payment, pricing()).unwrap();

    assert!(!receipt.gas.unwrap().reimbursement.success);
    assert_eq!(balance(&h, &MERCHANT), 99 * TOKEN_UNIT);
    assert_eq!(balance(&h, &owner), TOKEN_UNIT);
}

#[test]
fn test_pay_native_sent_by_payer() {
    let h = harness();
    let owner = h.owner.address();
    let payer = h.payer.address();
    let payment = OneTimePayment {
        payer,
        merchant: MERCHANT,
        asset: Address::NATIVE,
        amount: 10 * TOKEN_UNIT,
        fee_bps: 0,
        org_fee: OrganizationFee::none(),
    };

    assert_eq!(
        h.executor.pay_native(&owner, &payment).unwrap_err(),
        Error::Unauthorized(owner)
    );

    let receipt = h.executor.pay_native(&payer, &payment).unwrap();
    assert!(receipt.gas.is_none());
    let native = |holder: Address| {
        h.executor
            .with_assets(|book| book.balance_of(&Address::NATIVE, &holder))
            .unwrap()
    };
    assert_eq!(native(owner), 75 * TOKEN_UNIT / 1_000);
    assert_eq!(native(MERCHANT), 10 * TOKEN_UNIT - 75 * TOKEN_UNIT / 1_000);
}

#[test]
fn test_privileged_calls_require_owner() {
    let h = harness();
    let stranger = Address::from_bytes([0x99; 20]);
    assert_eq!(
        h.executor.create_allocation_unit(&stranger).unwrap_err(),
        Error::Unauthorized(stranger)
    );
    assert_eq!(
        h.executor
            .metrics()
            .rejections_total
            .with_label_values(&["create_allocation_unit", "authorization"])
            .get(),
        1
    );
}

#[test]
fn test_ownership_transfer_requires_both_keys() {
    let h = harness();
    let owner = h.owner.address();
    let successor = KeyPair::from_seed(&[0x33; 32]);
    let authority = h.executor.authority().unwrap();
    let message = TypedMessage::UpdateOwner {
        new_owner: successor.address(),
    };
    let owner_sig = h.owner.sign_typed(&authority, &message).unwrap();
    let cosigner_sig = h.cosigner.sign_typed(&authority, &message).unwrap();

    assert_eq!(
        h.executor
            .transfer_ownership(&owner, successor.address(), &owner_sig, &owner_sig)
            .unwrap_err(),
        Error::InvalidSignature
    );

    let receipt = h
        .executor
        .transfer_ownership(&owner, successor.address(), &owner_sig, &cosigner_sig)
        .unwrap();
    assert_eq!(receipt.output, owner);
    assert_eq!(h.executor.owner().unwrap(), successor.address());
    assert_eq!(
        h.executor.create_allocation_unit(&owner).unwrap_err(),
        Error::Unauthorized(owner)
    );
    assert!(h.executor.create_allocation_unit(&successor.address()).is_ok());
}
