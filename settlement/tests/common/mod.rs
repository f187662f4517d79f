//! Shared fixtures for settlement integration tests

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use reservation_ledger::{
    Address, Amount, AssetBook, KeyPair, MemoryAssetBook, ReservationProof, TypedMessage, UnitId,
};
use settlement::{
    BillingMode, Config, CreateSubscription, ExecuteSubscription, GasPricing, ManualClock,
    OrganizationFee, OwnerConfig, Receipt, SettlementExecutor, Subscription,
};
use std::sync::{Arc, Once};
use uuid::Uuid;

/// 1 token with 18 decimals
pub const TOKEN_UNIT: Amount = 1_000_000_000_000_000_000;

pub const ENGINE: Address = Address::from_bytes([0xFA; 20]);
pub const TOKEN: Address = Address::from_bytes([0xAA; 20]);
pub const MERCHANT: Address = Address::from_bytes([0x3E; 20]);

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Harness<A: AssetBook = MemoryAssetBook> {
    pub executor: Arc<SettlementExecutor<A>>,
    pub clock: Arc<ManualClock>,
    pub owner: KeyPair,
    pub cosigner: KeyPair,
    pub payer: KeyPair,
}

pub fn payer_key() -> KeyPair {
    KeyPair::from_seed(&[0x11; 32])
}

pub fn harness() -> Harness {
    let mut book = MemoryAssetBook::new(1);
    book.mint(&TOKEN, &payer_key().address(), 10_000 * TOKEN_UNIT).unwrap();
    book.mint(&Address::NATIVE, &payer_key().address(), 10_000 * TOKEN_UNIT).unwrap();
    harness_with(book)
}

pub fn harness_with<A: AssetBook>(assets: A) -> Harness<A> {
    harness_with_config(Config::default(), assets)
}

pub fn harness_with_config<A: AssetBook>(config: Config, assets: A) -> Harness<A> {
    init_tracing();
    let owner = KeyPair::from_seed(&[0x01; 32]);
    let cosigner = KeyPair::from_seed(&[0x02; 32]);
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
    let admin = OwnerConfig::new(owner.address(), cosigner.address()).unwrap();
    let executor =
        SettlementExecutor::new(config, ENGINE, admin, assets, clock.clone()).unwrap();

    Harness {
        executor: Arc::new(executor),
        clock,
        owner,
        cosigner,
        payer: payer_key(),
    }
}

/// 1 gwei, token priced at 1 native unit
pub fn pricing() -> GasPricing {
    GasPricing::new(1_000_000_000, TOKEN_UNIT)
}

pub fn create_request(
    h: &Harness,
    id: Uuid,
    frequency: Duration,
    amount: Amount,
    max_amount: Amount,
    reservation: Amount,
) -> CreateSubscription {
    let executor = &h.executor;
    let owner = h.owner.address();
    let payer = h.payer.address();

    let unit = match executor.available_unit(&payer, &TOKEN).unwrap() {
        Some(unit) => unit,
        None => executor.create_allocation_unit(&owner).unwrap().output,
    };
    let spender = executor.unit_address(unit).unwrap();
    let deadline = h.clock_now() + Duration::days(1);
    let proof = executor
        .with_assets(|book| book.sign_permit(&h.payer, &TOKEN, &spender, reservation, deadline))
        .unwrap()
        .unwrap();

    let authority = executor.authority().unwrap();
    let signature = h
        .payer
        .sign_typed(
            &authority,
            &TypedMessage::CreateAuthorization {
                merchant: MERCHANT,
                asset: TOKEN,
                frequency_secs: frequency.num_seconds() as u64,
                id,
                organization: Address::ZERO,
            },
        )
        .unwrap();

    CreateSubscription {
        id,
        payer,
        merchant: MERCHANT,
        asset: TOKEN,
        amount,
        max_amount,
        frequency,
        proof: ReservationProof::Delegated(proof),
        organization: Address::ZERO,
        signature,
    }
}

pub fn create(
    h: &Harness,
    billing: BillingMode,
    frequency: Duration,
    amount: Amount,
    max_amount: Amount,
    reservation: Amount,
) -> (Uuid, Receipt<Subscription>) {
    let id = Uuid::new_v4();
    let request = create_request(h, id, frequency, amount, max_amount, reservation);
    let owner = h.owner.address();
    let receipt = match billing {
        BillingMode::Regular => h.executor.create_subscription(&owner, &request, pricing()),
        BillingMode::UsageBased => h.executor.create_usage_based(&owner, &request, pricing()),
    }
    .unwrap();
    (id, receipt)
}

pub fn execute_request(h: &Harness, id: Uuid, amount: Amount, frequency: Duration, fee_bps: u16) -> ExecuteSubscription {
    ExecuteSubscription {
        id,
        payer: h.payer.address(),
        merchant: MERCHANT,
        asset: TOKEN,
        amount,
        frequency,
        fee_bps,
        org_fee: OrganizationFee::none(),
    }
}

pub fn cancel_signature(h: &Harness, id: Uuid) -> Vec<u8> {
    let authority = h.executor.authority().unwrap();
    h.payer
        .sign_typed(&authority, &TypedMessage::CancelAuthorization { id })
        .unwrap()
}

pub fn balance(h: &Harness, holder: &Address) -> Amount {
    h.executor
        .with_assets(|book| book.balance_of(&TOKEN, holder))
        .unwrap()
}

pub fn unit_of(h: &Harness, id: &Uuid) -> Option<UnitId> {
    h.executor.current_unit(&h.payer.address(), id).unwrap()
}

impl<A: AssetBook> Harness<A> {
    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        use settlement::Clock;
        self.clock.now()
    }
}
