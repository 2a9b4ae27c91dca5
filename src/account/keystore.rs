//! Password-based encryption of account secrets.
//!
//! scrypt derives a 32-byte key from the password. The low half keys
//! AES-128-CBC, the high half is hashed together with the ciphertext into the
//! MAC. The MAC is checked before any decryption is attempted.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::elliptic_curve::subtle::ConstantTimeEq;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const CIPHER_NAME: &str = "aes-128-cbc";
pub const KDF_NAME: &str = "scrypt";

const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const DERIVED_KEY_LEN: usize = 32;
const CIPHER_KEY_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeystoreError {
    #[error("MAC mismatch: wrong password or corrupted record")]
    Integrity,
    #[error("malformed keystore field `{field}`: {reason}")]
    Malformed { field: &'static str, reason: String },
    #[error("unsupported {kind}: {name}")]
    Unsupported { kind: &'static str, name: String },
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("cipher failure: {0}")]
    Cipher(String),
    #[error("random source failure: {0}")]
    Random(String),
}

fn malformed(field: &'static str, reason: impl ToString) -> KeystoreError {
    KeystoreError::Malformed {
        field,
        reason: reason.to_string(),
    }
}

/// scrypt cost factors used when creating new records.
///
/// `log_n` is the base-2 logarithm of the iteration cost N.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptCost {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptCost {
    pub const fn new(log_n: u8, r: u32, p: u32) -> Self {
        Self { log_n, r, p }
    }

    /// Build from a stored N, which must be a power of two greater than 1.
    pub fn from_n(n: u64, r: u32, p: u32) -> Result<Self, KeystoreError> {
        if n < 2 || !n.is_power_of_two() {
            return Err(malformed("kdfparams.n", format!("{} is not a power of two > 1", n)));
        }
        Ok(Self::new(n.trailing_zeros() as u8, r, p))
    }

    pub fn n(&self) -> u64 {
        1u64 << self.log_n
    }
}

impl Default for ScryptCost {
    /// N = 262144, r = 8, p = 1
    fn default() -> Self {
        Self::new(18, 8, 1)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CipherParams {
    pub iv: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KdfParams {
    pub dklen: usize,
    pub n: u64,
    pub p: u32,
    pub r: u32,
    pub salt: String,
}

/// Encrypted secret as persisted inside an account record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EncryptedSecret {
    pub cipher: String,
    pub ciphercode: String,
    pub cipherparams: CipherParams,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: String,
}

/// Run scrypt with the given cost, producing `dklen` bytes.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    cost: ScryptCost,
    dklen: usize,
) -> Result<Vec<u8>, KeystoreError> {
    let params = scrypt::Params::new(cost.log_n, cost.r, cost.p, dklen)
        .map_err(|e| KeystoreError::Kdf(e.to_string()))?;
    let mut key = vec![0u8; dklen];
    scrypt::scrypt(password, salt, &params, &mut key)
        .map_err(|e| KeystoreError::Kdf(e.to_string()))?;
    Ok(key)
}

fn compute_mac(derived_key: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(&derived_key[CIPHER_KEY_LEN..]);
    hasher.update(ciphertext);
    hasher.finalize().to_vec()
}

/// Constant-time tag comparison; a length mismatch never matches.
fn mac_matches(computed: &[u8], expected: &[u8]) -> bool {
    computed.ct_eq(expected).into()
}

fn random_bytes(len: usize) -> Result<Vec<u8>, KeystoreError> {
    let mut buf = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| KeystoreError::Random(e.to_string()))?;
    Ok(buf)
}

/// Encrypt `plaintext` under `password` with a fresh salt and IV.
pub fn encrypt(
    plaintext: &[u8],
    password: &str,
    cost: ScryptCost,
) -> Result<EncryptedSecret, KeystoreError> {
    let salt = random_bytes(SALT_LEN)?;
    let iv = random_bytes(IV_LEN)?;

    let derived_key = derive_key(password.as_bytes(), &salt, cost, DERIVED_KEY_LEN)?;

    let ciphertext = Aes128CbcEnc::new_from_slices(&derived_key[..CIPHER_KEY_LEN], &iv)
        .map_err(|e| KeystoreError::Cipher(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mac = compute_mac(&derived_key, &ciphertext);

    Ok(EncryptedSecret {
        cipher: CIPHER_NAME.to_string(),
        ciphercode: hex::encode(&ciphertext),
        cipherparams: CipherParams {
            iv: hex::encode(&iv),
        },
        kdf: KDF_NAME.to_string(),
        kdfparams: KdfParams {
            dklen: DERIVED_KEY_LEN,
            n: cost.n(),
            p: cost.p,
            r: cost.r,
            salt: hex::encode(&salt),
        },
        mac: hex::encode(mac),
    })
}

/// Decrypt a record. Returns [`KeystoreError::Integrity`] without touching the
/// ciphertext if the MAC does not match.
pub fn decrypt(record: &EncryptedSecret, password: &str) -> Result<Vec<u8>, KeystoreError> {
    if record.cipher != CIPHER_NAME {
        return Err(KeystoreError::Unsupported {
            kind: "cipher",
            name: record.cipher.clone(),
        });
    }
    if record.kdf != KDF_NAME {
        return Err(KeystoreError::Unsupported {
            kind: "kdf",
            name: record.kdf.clone(),
        });
    }

    let params = &record.kdfparams;
    if params.dklen != DERIVED_KEY_LEN {
        return Err(malformed("kdfparams.dklen", format!("expected {}, got {}", DERIVED_KEY_LEN, params.dklen)));
    }
    let cost = ScryptCost::from_n(params.n, params.r, params.p)?;
    let salt = hex::decode(&params.salt).map_err(|e| malformed("kdfparams.salt", e))?;
    let ciphertext = hex::decode(&record.ciphercode).map_err(|e| malformed("ciphercode", e))?;
    let expected_mac = hex::decode(&record.mac).map_err(|e| malformed("mac", e))?;
    let iv = hex::decode(&record.cipherparams.iv).map_err(|e| malformed("cipherparams.iv", e))?;
    if iv.len() != IV_LEN {
        return Err(malformed("cipherparams.iv", format!("expected {} bytes, got {}", IV_LEN, iv.len())));
    }

    let derived_key = derive_key(password.as_bytes(), &salt, cost, params.dklen)?;

    if !mac_matches(&compute_mac(&derived_key, &ciphertext), &expected_mac) {
        return Err(KeystoreError::Integrity);
    }

    Aes128CbcDec::new_from_slices(&derived_key[..CIPHER_KEY_LEN], &iv)
        .map_err(|e| KeystoreError::Cipher(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| malformed("ciphercode", e))
}
