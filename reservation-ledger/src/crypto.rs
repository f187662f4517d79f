//! Typed-data signing and verification
//!
//! This module provides:
//! - Domain-separated digests over typed authorization messages
//! - Signer recovery from 96-byte wire signatures (Ed25519 key ‖ Ed25519 signature)
//! - Ed25519 key pairs for operators, payers and tests
//!
//! # Digest layout
//!
//! ```text
//! domain_separator = sha256(DOMAIN_TYPE_HASH ‖ bincode(name, version, chain_id, verifying_identity))
//! struct_hash      = sha256(TYPE_HASH ‖ bincode(fields))
//! digest           = sha256(0x19 ‖ 0x01 ‖ domain_separator ‖ struct_hash)
//! ```

use crate::types::{Address, Amount};
use crate::{Error, Result};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Length of a wire signature: public key (32) followed by signature (64)
pub const SIGNATURE_LENGTH: usize = 96;

const DOMAIN_TYPE: &str =
    "Domain(string name,string version,uint64 chainId,address verifyingIdentity)";
const CREATE_AUTHORIZATION_TYPE: &str =
    "CreateAuthorization(address merchant,address asset,uint64 frequency,bytes16 id,address organization)";
const CANCEL_AUTHORIZATION_TYPE: &str = "CancelAuthorization(bytes16 id)";
const UPDATE_MAX_AMOUNT_TYPE: &str = "UpdateMaxAmount(bytes16 id,uint128 newMaxAmount)";
const UPDATE_OWNER_TYPE: &str = "UpdateOwner(address newOwner)";
const PERMIT_TYPE: &str =
    "Permit(address owner,address spender,uint128 value,uint64 nonce,int64 deadline)";

/// Signing domain binding signatures to one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Application name
    pub name: String,

    /// Application version
    pub version: String,

    /// Chain or context id
    pub chain_id: u64,

    /// Identity of the component verifying signatures
    pub verifying_identity: Address,
}

impl Domain {
    /// Create a new domain
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_identity: Address,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_identity,
        }
    }

    /// Domain separator hash
    pub fn separator(&self) -> Result<[u8; 32]> {
        let encoded = bincode::serialize(&(
            &self.name,
            &self.version,
            self.chain_id,
            self.verifying_identity,
        ))?;
        Ok(hash_parts(&[&hash_bytes(DOMAIN_TYPE.as_bytes()), &encoded]))
    }
}

/// Typed messages accepted by the signature authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedMessage {
    /// Payer authorizes recurring pulls for one merchant/asset/frequency/organization
    CreateAuthorization {
        /// Merchant receiving payments
        merchant: Address,
        /// Asset pulled
        asset: Address,
        /// Billing period in seconds
        frequency_secs: u64,
        /// Authorization id
        id: Uuid,
        /// Organization taking a fee share (may be null)
        organization: Address,
    },

    /// Payer cancels (or stops) an authorization
    CancelAuthorization {
        /// Authorization id
        id: Uuid,
    },

    /// Payer changes the per-payment ceiling
    UpdateMaxAmount {
        /// Authorization id
        id: Uuid,
        /// New ceiling
        new_max_amount: Amount,
    },

    /// Owner or cosigner approves an ownership transfer
    UpdateOwner {
        /// Proposed owner
        new_owner: Address,
    },

    /// Asset-level delegated transfer approval
    Permit {
        /// Token owner
        owner: Address,
        /// Approved spender
        spender: Address,
        /// Approved amount
        value: Amount,
        /// Owner's permit nonce
        nonce: u64,
        /// Deadline (unix seconds)
        deadline: i64,
    },
}

impl TypedMessage {
    /// Canonical type string
    pub fn type_string(&self) -> &'static str {
        match self {
            TypedMessage::CreateAuthorization { .. } => CREATE_AUTHORIZATION_TYPE,
            TypedMessage::CancelAuthorization { .. } => CANCEL_AUTHORIZATION_TYPE,
            TypedMessage::UpdateMaxAmount { .. } => UPDATE_MAX_AMOUNT_TYPE,
            TypedMessage::UpdateOwner { .. } => UPDATE_OWNER_TYPE,
            TypedMessage::Permit { .. } => PERMIT_TYPE,
        }
    }

    /// Struct hash: type hash followed by the canonical field encoding
    pub fn struct_hash(&self) -> Result<[u8; 32]> {
        let fields = match self {
            TypedMessage::CreateAuthorization {
                merchant,
                asset,
                frequency_secs,
                id,
                organization,
            } => bincode::serialize(&(merchant, asset, frequency_secs, id, organization))?,
            TypedMessage::CancelAuthorization { id } => bincode::serialize(id)?,
            TypedMessage::UpdateMaxAmount { id, new_max_amount } => {
                bincode::serialize(&(id, new_max_amount))?
            }
            TypedMessage::UpdateOwner { new_owner } => bincode::serialize(new_owner)?,
            TypedMessage::Permit {
                owner,
                spender,
                value,
                nonce,
                deadline,
            } => bincode::serialize(&(owner, spender, value, nonce, deadline))?,
        };
        let type_hash = hash_bytes(self.type_string().as_bytes());
        Ok(hash_parts(&[&type_hash, &fields]))
    }
}

/// Decoded wire signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedSignature {
    public_key: [u8; 32],
    signature: [u8; 64],
}

impl TypedSignature {
    /// Decode from wire bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(Error::MalformedSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_LENGTH,
                bytes.len()
            )));
        }
        let mut public_key = [0u8; 32];
        let mut signature = [0u8; 64];
        public_key.copy_from_slice(&bytes[..32]);
        signature.copy_from_slice(&bytes[32..]);
        Ok(Self {
            public_key,
            signature,
        })
    }

    /// Encode to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.signature);
        out
    }

    /// Embedded public key
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }
}

/// Recover the signing identity of a digest
///
/// Returns `Ok(None)` when the signature is well-formed but does not verify,
/// and `Err(MalformedSignature)` when it cannot be decoded at all.
pub fn recover_digest(digest: &[u8; 32], signature: &[u8]) -> Result<Option<Address>> {
    let decoded = TypedSignature::from_slice(signature)?;
    let verifying_key = VerifyingKey::from_bytes(&decoded.public_key)
        .map_err(|e| Error::MalformedSignature(format!("invalid public key: {}", e)))?;
    let dalek_sig = DalekSignature::from_bytes(&decoded.signature);

    if verifying_key.verify_strict(digest, &dalek_sig).is_err() {
        return Ok(None);
    }

    Ok(Some(Address::from_public_key(&decoded.public_key)))
}

/// Domain-bound signer of record for typed messages
#[derive(Debug, Clone)]
pub struct SignatureAuthority {
    domain: Domain,
    separator: [u8; 32],
}

impl SignatureAuthority {
    /// Create an authority for a domain
    pub fn new(domain: Domain) -> Result<Self> {
        let separator = domain.separator()?;
        Ok(Self { domain, separator })
    }

    /// Signing domain
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Digest a typed message under this domain
    pub fn digest(&self, message: &TypedMessage) -> Result<[u8; 32]> {
        let struct_hash = message.struct_hash()?;
        Ok(hash_parts(&[&[0x19, 0x01], &self.separator, &struct_hash]))
    }

    /// Recover the signer of a typed message
    pub fn recover(&self, message: &TypedMessage, signature: &[u8]) -> Result<Option<Address>> {
        let digest = self.digest(message)?;
        recover_digest(&digest, signature)
    }

    /// True only if the recovered signer is non-null and equals `expected_signer`
    pub fn verify(
        &self,
        message: &TypedMessage,
        expected_signer: &Address,
        signature: &[u8],
    ) -> Result<bool> {
        let recovered = self.recover(message, signature)?;
        Ok(matches!(recovered, Some(signer) if !signer.is_zero() && signer == *expected_signer))
    }
}

/// Ed25519 key pair for signing typed messages
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key bytes
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Identity controlled by this key
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    /// Sign a raw digest, producing a wire signature
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Vec<u8> {
        let signature = self.signing_key.sign(digest);
        TypedSignature {
            public_key: self.public_key(),
            signature: signature.to_bytes(),
        }
        .to_bytes()
    }

    /// Sign a typed message under an authority's domain
    pub fn sign_typed(&self, authority: &SignatureAuthority, message: &TypedMessage) -> Result<Vec<u8>> {
        let digest = authority.digest(message)?;
        Ok(self.sign_digest(&digest))
    }
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> SignatureAuthority {
        let domain = Domain::new("RecurringSettlement", "1", 1, Address::from_bytes([9u8; 20]));
        SignatureAuthority::new(domain).unwrap()
    }

    fn cancel(id: Uuid) -> TypedMessage {
        TypedMessage::CancelAuthorization { id }
    }

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let keypair1 = KeyPair::from_seed(&seed);
        let keypair2 = KeyPair::from_seed(&seed);

        // Same seed should produce same identity
        assert_eq!(keypair1.address(), keypair2.address());
    }

    #[test]
    fn test_sign_and_recover() {
        let authority = authority();
        let keypair = KeyPair::generate();
        let message = cancel(Uuid::new_v4());

        let signature = keypair.sign_typed(&authority, &message).unwrap();
        let recovered = authority.recover(&message, &signature).unwrap();
        assert_eq!(recovered, Some(keypair.address()));
        assert!(authority.verify(&message, &keypair.address(), &signature).unwrap());
    }

    #[test]
    fn test_wrong_signer_is_rejected() {
        let authority = authority();
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let message = cancel(Uuid::new_v4());

        let signature = keypair.sign_typed(&authority, &message).unwrap();
        assert!(!authority.verify(&message, &other.address(), &signature).unwrap());
        assert!(!authority.verify(&message, &Address::ZERO, &signature).unwrap());
    }

    #[test]
    fn test_signature_bound_to_message_and_domain() {
        let authority = authority();
        let keypair = KeyPair::generate();
        let id = Uuid::new_v4();
        let signature = keypair.sign_typed(&authority, &cancel(id)).unwrap();

        // Different message
        let update = TypedMessage::UpdateMaxAmount { id, new_max_amount: 10 };
        assert!(!authority.verify(&update, &keypair.address(), &signature).unwrap());

        // Different domain
        let foreign = SignatureAuthority::new(Domain::new(
            "RecurringSettlement",
            "1",
            2,
            Address::from_bytes([9u8; 20]),
        ))
        .unwrap();
        assert!(!foreign.verify(&cancel(id), &keypair.address(), &signature).unwrap());
    }

    #[test]
    fn test_malformed_signature_is_distinct() {
        let authority = authority();
        let message = cancel(Uuid::new_v4());

        let result = authority.verify(&message, &Address::ZERO, &[0u8; 65]);
        assert!(matches!(result, Err(Error::MalformedSignature(_))));
    }

    #[test]
    fn test_digest_deterministic() {
        let authority = authority();
        let message = TypedMessage::UpdateOwner {
            new_owner: Address::from_bytes([1u8; 20]),
        };
        assert_eq!(authority.digest(&message).unwrap(), authority.digest(&message).unwrap());
    }
}
