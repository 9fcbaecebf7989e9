use arrayref::array_ref;
use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Keccak256};
use solana_program::{
    program_error::ProgramError, pubkey::Pubkey, secp256k1_recover::secp256k1_recover,
};

use crate::error::LendingError;
use crate::state::terms::LoanTerms;

/// Versioned tag mixed into every offer digest.
pub const OFFER_DOMAIN_TAG: &[u8] = b"perpetual-lending:offer:v1";

/// Binds signatures to one deployment so an offer signed for one chain or
/// program instance cannot be replayed against another.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningDomain {
    pub chain_id: u64,
    pub program_id: Pubkey,
}

impl SigningDomain {
    pub fn new(chain_id: u64, program_id: Pubkey) -> Self {
        Self { chain_id, program_id }
    }

    /// Canonical signing digest over the offer tuple. The terms are folded
    /// in by fingerprint, so the digest commits to their full content.
    pub fn offer_digest(&self, terms: &LoanTerms, deadline: i64, nonce: u64) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(OFFER_DOMAIN_TAG);
        hasher.update(self.chain_id.to_le_bytes());
        hasher.update(self.program_id.as_ref());
        hasher.update(terms.fingerprint().0);
        hasher.update(deadline.to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        let output = hasher.finalize();
        let mut digest = [0u8; 32];
        digest.copy_from_slice(output.as_slice());
        digest
    }
}

/// Compact 64-byte signature plus recovery id.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferSignature {
    pub bytes: [u8; 64],
    pub recovery_id: u8,
}

impl OfferSignature {
    /// Split a 65-byte wire signature (r || s || v).
    pub fn from_compact(raw: &[u8; 65]) -> Self {
        Self {
            bytes: *array_ref![raw, 0, 64],
            recovery_id: raw[64],
        }
    }
}

/// A lender's signed commitment to lend under `terms` until `deadline`,
/// revocable in bulk by bumping the lender nonce past `nonce`.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedOffer {
    pub terms: LoanTerms,
    pub deadline: i64,
    pub nonce: u64,
    pub signature: OfferSignature,
}

impl SignedOffer {
    pub fn digest(&self, domain: &SigningDomain) -> [u8; 32] {
        domain.offer_digest(&self.terms, self.deadline, self.nonce)
    }
}

/// Signature recovery as an injected capability, so deployments choose the
/// scheme and tests substitute deterministic signers.
pub trait OfferVerifier {
    fn recover_signer(
        &self,
        digest: &[u8; 32],
        signature: &OfferSignature,
    ) -> Result<Pubkey, ProgramError>;
}

/// Recovery over secp256k1. The lender identity is the Keccak-256 of the
/// recovered 64-byte public key.
pub struct Secp256k1Verifier;

impl OfferVerifier for Secp256k1Verifier {
    fn recover_signer(
        &self,
        digest: &[u8; 32],
        signature: &OfferSignature,
    ) -> Result<Pubkey, ProgramError> {
        let recovered = secp256k1_recover(digest, signature.recovery_id, &signature.bytes)
            .map_err(|_| ProgramError::from(LendingError::InvalidSignature))?;
        let mut hasher = Keccak256::new();
        hasher.update(recovered.to_bytes());
        let output = hasher.finalize();
        let mut identity = [0u8; 32];
        identity.copy_from_slice(output.as_slice());
        Ok(Pubkey::new_from_array(identity))
    }
}

/// Authenticate an offer and check it is live: the signer must be the
/// stated lender, the deadline unexpired, and the nonce not revoked.
/// Pure check; every entry point that consumes a fresh offer runs it first.
pub fn validate_offer(
    offer: &SignedOffer,
    domain: &SigningDomain,
    verifier: &dyn OfferVerifier,
    current_nonce: u64,
    now: i64,
) -> Result<(), ProgramError> {
    let digest = offer.digest(domain);
    let signer = verifier.recover_signer(&digest, &offer.signature)?;
    if signer != offer.terms.lender {
        return Err(LendingError::InvalidSignature.into());
    }
    if offer.deadline < now || offer.nonce < current_nonce {
        return Err(LendingError::OfferExpired.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubVerifier {
        signer: Pubkey,
    }

    impl OfferVerifier for StubVerifier {
        fn recover_signer(
            &self,
            _digest: &[u8; 32],
            _signature: &OfferSignature,
        ) -> Result<Pubkey, ProgramError> {
            Ok(self.signer)
        }
    }

    fn sample_offer(lender: Pubkey) -> SignedOffer {
        SignedOffer {
            terms: LoanTerms {
                lender,
                collection: Pubkey::new_unique(),
                min_amount: 1,
                max_amount: 10,
                total_amount: 100,
                liquidation_duration_blocks: 50,
                interest_rate_bips: 1_000,
            },
            deadline: 1_000,
            nonce: 3,
            signature: OfferSignature::from_compact(&[7u8; 65]),
        }
    }

    #[test]
    fn test_digest_binds_domain_and_content() {
        let offer = sample_offer(Pubkey::new_unique());
        let domain_a = SigningDomain::new(1, Pubkey::new_unique());
        let domain_b = SigningDomain::new(2, domain_a.program_id);

        assert_eq!(offer.digest(&domain_a), offer.digest(&domain_a));
        assert_ne!(offer.digest(&domain_a), offer.digest(&domain_b));

        let mut altered = offer.clone();
        altered.deadline += 1;
        assert_ne!(offer.digest(&domain_a), altered.digest(&domain_a));
    }

    #[test]
    fn test_validate_checks_signer_deadline_nonce() {
        let lender = Pubkey::new_unique();
        let offer = sample_offer(lender);
        let domain = SigningDomain::new(1, Pubkey::new_unique());
        let good = StubVerifier { signer: lender };
        let bad = StubVerifier {
            signer: Pubkey::new_unique(),
        };

        validate_offer(&offer, &domain, &good, 3, 500).unwrap();
        assert_eq!(
            validate_offer(&offer, &domain, &bad, 3, 500),
            Err(LendingError::InvalidSignature.into())
        );
        assert_eq!(
            validate_offer(&offer, &domain, &good, 3, 1_001),
            Err(LendingError::OfferExpired.into())
        );
        assert_eq!(
            validate_offer(&offer, &domain, &good, 4, 500),
            Err(LendingError::OfferExpired.into())
        );
    }

    #[test]
    fn test_signature_from_compact() {
        let mut raw = [0u8; 65];
        raw[0] = 0xAA;
        raw[63] = 0xBB;
        raw[64] = 1;
        let signature = OfferSignature::from_compact(&raw);
        assert_eq!(signature.bytes[0], 0xAA);
        assert_eq!(signature.bytes[63], 0xBB);
        assert_eq!(signature.recovery_id, 1);
    }
}
