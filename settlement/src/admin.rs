//! Owner / cosigner administration
//!
//! The owner gates every privileged entry point. Replacing it takes two
//! independent signatures over the same `UpdateOwner` message, so neither key
//! alone can seize control.

use crate::{Error, Result};
use reservation_ledger::{Address, SignatureAuthority, TypedMessage};
use serde::{Deserialize, Serialize};

/// Privileged identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerConfig {
    owner: Address,
    cosigner: Address,
}

impl OwnerConfig {
    /// Create a configuration; both identities must be non-null and distinct
    pub fn new(owner: Address, cosigner: Address) -> Result<Self> {
        if owner.is_zero() {
            return Err(Error::InvalidAddress("owner is null".to_string()));
        }
        if cosigner.is_zero() {
            return Err(Error::InvalidAddress("cosigner is null".to_string()));
        }
        if owner == cosigner {
            return Err(Error::InvalidAddress(
                "owner and cosigner must be distinct".to_string(),
            ));
        }
        Ok(Self { owner, cosigner })
    }

    /// Current owner (also the operator receiving fees and reimbursements)
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Cosigner
    pub fn cosigner(&self) -> Address {
        self.cosigner
    }

    /// Reject any caller but the owner
    pub fn require_owner(&self, caller: &Address) -> Result<()> {
        if *caller != self.owner {
            return Err(Error::Unauthorized(*caller));
        }
        Ok(())
    }

    /// Replace the owner; returns the previous owner
    pub fn transfer_ownership(
        &mut self,
        authority: &SignatureAuthority,
        new_owner: Address,
        owner_signature: &[u8],
        cosigner_signature: &[u8],
    ) -> Result<Address> {
        if new_owner.is_zero() {
            return Err(Error::InvalidAddress("new owner is null".to_string()));
        }
        if new_owner == self.cosigner {
            return Err(Error::InvalidAddress(
                "new owner must differ from the cosigner".to_string(),
            ));
        }

        let message = TypedMessage::UpdateOwner { new_owner };
        if !authority.verify(&message, &self.owner, owner_signature)? {
            return Err(Error::InvalidSignature);
        }
        if !authority.verify(&message, &self.cosigner, cosigner_signature)? {
            return Err(Error::InvalidSignature);
        }

        let previous = self.owner;
        self.owner = new_owner;
        tracing::info!(previous = %previous, owner = %new_owner, "Ownership transferred");
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reservation_ledger::{Domain, KeyPair};

    fn authority() -> SignatureAuthority {
        SignatureAuthority::new(Domain::new("RecurringSettlement", "1", 1, Address::from_bytes([9u8; 20])))
            .unwrap()
    }

    #[test]
    fn test_owner_and_cosigner_distinct() {
        let a = Address::from_bytes([1u8; 20]);
        assert!(OwnerConfig::new(a, a).is_err());
        assert!(OwnerConfig::new(Address::ZERO, a).is_err());
        assert!(OwnerConfig::new(a, Address::from_bytes([2u8; 20])).is_ok());
    }

    #[test]
    fn test_transfer_needs_both_signatures() {
        let authority = authority();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        let cosigner = KeyPair::from_seed(&[2u8; 32]);
        let mut config = OwnerConfig::new(owner.address(), cosigner.address()).unwrap();

        let new_owner = Address::from_bytes([5u8; 20]);
        let message = TypedMessage::UpdateOwner { new_owner };
        let owner_sig = owner.sign_typed(&authority, &message).unwrap();
        let cosigner_sig = cosigner.sign_typed(&authority, &message).unwrap();

        // Owner signing twice is not enough
        assert_eq!(
            config.transfer_ownership(&authority, new_owner, &owner_sig, &owner_sig),
            Err(Error::InvalidSignature)
        );
        assert_eq!(config.owner(), owner.address());

        let previous = config
            .transfer_ownership(&authority, new_owner, &owner_sig, &cosigner_sig)
            .unwrap();
        assert_eq!(previous, owner.address());
        assert!(config.require_owner(&new_owner).is_ok());
        assert_eq!(
            config.require_owner(&owner.address()),
            Err(Error::Unauthorized(owner.address()))
        );
    }

    #[test]
    fn test_new_owner_cannot_be_cosigner() {
        let authority = authority();
        let owner = KeyPair::from_seed(&[1u8; 32]);
        let cosigner = KeyPair::from_seed(&[2u8; 32]);
        let mut config = OwnerConfig::new(owner.address(), cosigner.address()).unwrap();

        let result = config.transfer_ownership(&authority, cosigner.address(), &[], &[]);
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    }
}
