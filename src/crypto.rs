use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::EncodedPoint;
use rand::rngs::OsRng;
use tiny_keccak::{Hasher, Keccak};

use crate::error::{LedgerError, Result};

/// Account address: `ADDRESS_PREFIX` followed by lowercase hex.
pub type Address = String;

pub const ADDRESS_PREFIX: &str = "AVAF";
pub const ADDRESS_LEN: usize = 42;

/// r ‖ s, 32 bytes each, big-endian.
pub const SIGNATURE_LEN: usize = 64;

const COORD_LEN: usize = 32;

pub struct KeyPair {
    pub signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new P-256 keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        KeyPair { signing_key }
    }

    /// Rebuild a keypair from its raw 32-byte scalar.
    pub fn from_scalar_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| LedgerError::Structural(format!("invalid private scalar: {}", e)))?;
        Ok(KeyPair { signing_key })
    }

    pub fn scalar_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key().clone()
    }

    pub fn address(&self) -> Address {
        derive_address(&self.public_key())
    }

    /// Sign a 32-byte digest; returns r ‖ s.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| LedgerError::Crypto(format!("signing failed: {}", e)))?;
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&signature.to_bytes());
        Ok(out)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Verify an r ‖ s signature over a digest. A signature of the wrong length
/// is a structural error; a well-formed but wrong signature yields `false`.
pub fn verify_digest(public_key: &VerifyingKey, digest: &[u8], signature: &[u8]) -> Result<bool> {
    if signature.len() != SIGNATURE_LEN {
        return Err(LedgerError::Structural(format!(
            "invalid signature length: {} (expected {})",
            signature.len(),
            SIGNATURE_LEN
        )));
    }
    let signature = match Signature::from_slice(signature) {
        Ok(sig) => sig,
        // r or s out of range: well-sized but not a valid signature
        Err(_) => return Ok(false),
    };
    Ok(public_key.verify_prehash(digest, &signature).is_ok())
}

/// X ‖ Y affine coordinates, 32 bytes each.
pub fn public_key_coordinates(public_key: &VerifyingKey) -> Vec<u8> {
    let point = public_key.to_encoded_point(false);
    // uncompressed SEC1: 0x04 ‖ X ‖ Y
    point.as_bytes()[1..].to_vec()
}

pub fn public_key_to_hex(public_key: &VerifyingKey) -> String {
    hex::encode(public_key_coordinates(public_key))
}

pub fn public_key_from_hex(s: &str) -> Result<VerifyingKey> {
    let coords = hex::decode(s)
        .map_err(|e| LedgerError::Structural(format!("public key hex: {}", e)))?;
    if coords.len() != 2 * COORD_LEN {
        return Err(LedgerError::Structural(format!(
            "public key must be {} bytes, got {}",
            2 * COORD_LEN,
            coords.len()
        )));
    }
    let point = EncodedPoint::from_affine_coordinates(
        coords[..COORD_LEN].into(),
        coords[COORD_LEN..].into(),
        false,
    );
    VerifyingKey::from_encoded_point(&point)
        .map_err(|_| LedgerError::Structural("public key is not on the curve".to_string()))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut keccak = Keccak::v256();
    let mut output = [0u8; 32];
    keccak.update(data);
    keccak.finalize(&mut output);
    output
}

/// Keccak-256 over X ‖ Y; the trailing digest bytes form the address body.
pub fn derive_address(public_key: &VerifyingKey) -> Address {
    let digest = keccak256(&public_key_coordinates(public_key));
    let body_bytes = (ADDRESS_LEN - ADDRESS_PREFIX.len()) / 2;
    format!("{}{}", ADDRESS_PREFIX, hex::encode(&digest[32 - body_bytes..]))
}

/// Length and prefix check only; the body is not re-derived.
pub fn validate_address(candidate: &str) -> bool {
    candidate.len() == ADDRESS_LEN && candidate.starts_with(ADDRESS_PREFIX)
}
