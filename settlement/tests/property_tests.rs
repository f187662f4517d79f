//! Property-based tests for settlement arithmetic
//!
//! - Fee floor: any requested fee below 75 bps pays exactly the floor
//! - Conservation: owner + organization + merchant == amount
//! - Reimbursement conversion is monotonic in gas

use proptest::prelude::*;
use reservation_ledger::Address;
use settlement::fees::{FeeCalculator, MAX_FEE_BPS, MIN_FEE_BPS};
use settlement::gas::amount_in_asset;
use settlement::{GasPricing, OrganizationFee};

/// Strategy for generating organization fees
fn org_fee_strategy() -> impl Strategy<Value = OrganizationFee> {
    prop_oneof![
        Just(OrganizationFee::none()),
        (1u16..=MAX_FEE_BPS).prop_map(|bps| OrganizationFee::new(Address::from_bytes([0x0C; 20]), bps)),
    ]
}

proptest! {
    /// Property: fee_bps < 75 => owner fee == floor(amount * 75 / 10_000)
    #[test]
    fn prop_fee_floor(amount in 1u128..u64::MAX as u128, fee_bps in 0u16..MIN_FEE_BPS) {
        let (owner_fee, org_fee) = FeeCalculator
            .calculate_fee(amount, fee_bps, &OrganizationFee::none())
            .unwrap();
        prop_assert_eq!(owner_fee, amount * 75 / 10_000);
        prop_assert_eq!(org_fee, 0);
    }

    /// Property: the split never creates or loses value
    #[test]
    fn prop_split_conserves_amount(
        amount in 1u128..u64::MAX as u128,
        fee_bps in 0u16..=MAX_FEE_BPS,
        org_fee in org_fee_strategy(),
    ) {
        let split = FeeCalculator.split(amount, fee_bps, &org_fee).unwrap();
        prop_assert_eq!(split.owner_fee + split.org_fee + split.merchant_amount, amount);
        prop_assert!(split.owner_fee >= amount * u128::from(MIN_FEE_BPS) / 10_000);
    }

    /// Property: fees above 10% are always rejected
    #[test]
    fn prop_excessive_fee_rejected(amount in 1u128..1_000_000, fee_bps in (MAX_FEE_BPS + 1)..u16::MAX) {
        prop_assert!(FeeCalculator.calculate_fee(amount, fee_bps, &OrganizationFee::none()).is_err());
    }

    /// Property: more gas never costs less
    #[test]
    fn prop_reimbursement_monotonic(
        gas in 0u64..10_000_000,
        extra in 0u64..1_000_000,
        gas_price in 1u128..1_000_000_000_000,
        token_price in 1u128..1_000_000_000_000_000_000,
    ) {
        let pricing = GasPricing::new(gas_price, token_price);
        let base = amount_in_asset(gas, &pricing).unwrap();
        let more = amount_in_asset(gas + extra, &pricing).unwrap();
        prop_assert!(more >= base);
    }
}
