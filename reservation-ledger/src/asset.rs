//! Asset collaborator interface
//!
//! The ledger consumes transfer, allowance and delegated-approval semantics; it
//! never implements them. `AssetBook` is the seam. `MemoryAssetBook` is an
//! in-process implementation for embedding applications and tests.

use crate::crypto::{Domain, KeyPair, SignatureAuthority, TypedMessage};
use crate::types::{Address, Amount, AssetId, DelegatedProof};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Asset-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    /// Holder balance too small
    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        /// Requested
        needed: Amount,
        /// Held
        available: Amount,
    },

    /// Spender allowance too small
    #[error("Insufficient allowance: need {needed}, have {available}")]
    InsufficientAllowance {
        /// Requested
        needed: Amount,
        /// Approved
        available: Amount,
    },

    /// Delegated proof did not verify
    #[error("Invalid delegated proof: {0}")]
    InvalidProof(String),

    /// Delegated proof deadline passed
    #[error("Delegated proof expired at {0}")]
    ProofExpired(DateTime<Utc>),

    /// Asset does not implement delegated approvals
    #[error("Delegated approval not supported by asset {0}")]
    Unsupported(Address),

    /// Credit would exceed the largest representable balance
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Asset refused the operation for its own reasons
    #[error("Asset rejected operation: {0}")]
    Rejected(String),
}

/// Fungible asset operations consumed by the ledger
///
/// `Clone` lets the settlement layer run each call against a working copy and
/// commit it only on success.
pub trait AssetBook: Clone + Send + 'static {
    /// Balance of `holder`
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> Amount;

    /// Amount `spender` may pull from `owner`
    fn allowance(&self, asset: &AssetId, owner: &Address, spender: &Address) -> Amount;

    /// Move funds held by `from` (the calling identity)
    fn transfer(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    /// Pull funds from `owner` using the allowance granted to `spender`
    fn transfer_from(
        &mut self,
        asset: &AssetId,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    /// Apply a delegated-transfer proof, setting `owner`'s allowance for `spender`
    fn permit(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        spender: &Address,
        proof: &DelegatedProof,
        now: DateTime<Utc>,
    ) -> Result<(), AssetError> {
        let _ = (owner, spender, proof, now);
        Err(AssetError::Unsupported(*asset))
    }
}

/// In-process asset book holding balances, allowances and permit nonces
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetBook {
    chain_id: u64,
    balances: HashMap<(AssetId, Address), Amount>,
    allowances: HashMap<(AssetId, Address, Address), Amount>,
    nonces: HashMap<(AssetId, Address), u64>,
}

impl MemoryAssetBook {
    /// Create an empty book whose permits are bound to `chain_id`
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            ..Default::default()
        }
    }

    /// Credit `amount` of `asset` to `to`
    pub fn mint(&mut self, asset: &AssetId, to: &Address, amount: Amount) -> Result<(), AssetError> {
        let balance = self.balances.entry((*asset, *to)).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(AssetError::BalanceOverflow)?;
        Ok(())
    }

    /// Set `spender`'s allowance over `owner`'s funds
    pub fn approve(&mut self, asset: &AssetId, owner: &Address, spender: &Address, amount: Amount) {
        self.allowances.insert((*asset, *owner, *spender), amount);
    }

    /// Next permit nonce for `owner`
    pub fn nonce(&self, asset: &AssetId, owner: &Address) -> u64 {
        self.nonces.get(&(*asset, *owner)).copied().unwrap_or(0)
    }

    /// Signing authority for permits on `asset`
    pub fn permit_authority(&self, asset: &AssetId) -> crate::Result<SignatureAuthority> {
        SignatureAuthority::new(Domain::new("Asset", "1", self.chain_id, *asset))
    }

    /// Sign a permit with the owner's key at the owner's current nonce
    pub fn sign_permit(
        &self,
        owner: &KeyPair,
        asset: &AssetId,
        spender: &Address,
        value: Amount,
        deadline: DateTime<Utc>,
    ) -> crate::Result<DelegatedProof> {
        let owner_address = owner.address();
        let nonce = self.nonce(asset, &owner_address);
        let message = TypedMessage::Permit {
            owner: owner_address,
            spender: *spender,
            value,
            nonce,
            deadline: deadline.timestamp(),
        };
        let signature = owner.sign_typed(&self.permit_authority(asset)?, &message)?;
        Ok(DelegatedProof {
            value,
            nonce,
            deadline,
            signature,
        })
    }

    fn debit_balance(&mut self, asset: &AssetId, holder: &Address, amount: Amount) -> Result<(), AssetError> {
        let balance = self.balances.entry((*asset, *holder)).or_insert(0);
        if *balance < amount {
            return Err(AssetError::InsufficientBalance {
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        Ok(())
    }

    /// Move funds, checking both sides before touching either
    fn move_balance(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        if from != to && self.balance_of(asset, to).checked_add(amount).is_none() {
            return Err(AssetError::BalanceOverflow);
        }
        self.debit_balance(asset, from, amount)?;
        self.mint(asset, to, amount)
    }
}

impl AssetBook for MemoryAssetBook {
    fn balance_of(&self, asset: &AssetId, holder: &Address) -> Amount {
        self.balances.get(&(*asset, *holder)).copied().unwrap_or(0)
    }

    fn allowance(&self, asset: &AssetId, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*asset, *owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(
        &mut self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.move_balance(asset, from, to, amount)
    }

    fn transfer_from(
        &mut self,
        asset: &AssetId,
        spender: &Address,
        owner: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let available = self.allowance(asset, owner, spender);
        if available < amount {
            return Err(AssetError::InsufficientAllowance {
                needed: amount,
                available,
            });
        }
        self.move_balance(asset, owner, to, amount)?;
        self.allowances
            .insert((*asset, *owner, *spender), available - amount);
        Ok(())
    }

    fn permit(
        &mut self,
        asset: &AssetId,
        owner: &Address,
        spender: &Address,
        proof: &DelegatedProof,
        now: DateTime<Utc>,
    ) -> Result<(), AssetError> {
        if now > proof.deadline {
            return Err(AssetError::ProofExpired(proof.deadline));
        }

        let expected_nonce = self.nonce(asset, owner);
        if proof.nonce != expected_nonce {
            return Err(AssetError::InvalidProof(format!(
                "nonce {} does not match expected {}",
                proof.nonce, expected_nonce
            )));
        }

        let message = TypedMessage::Permit {
            owner: *owner,
            spender: *spender,
            value: proof.value,
            nonce: proof.nonce,
            deadline: proof.deadline.timestamp(),
        };
        let valid = self
            .permit_authority(asset)
            .and_then(|authority| authority.verify(&message, owner, &proof.signature))
            .map_err(|e| AssetError::InvalidProof(e.to_string()))?;
        if !valid {
            return Err(AssetError::InvalidProof("signer is not the owner".to_string()));
        }

        self.nonces.insert((*asset, *owner), expected_nonce + 1);
        self.approve(asset, owner, spender, proof.value);
        Ok(())
    }
}
