use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Fractional digits used for every decimal in a hash preimage.
pub const DECIMAL_PRECISION: usize = 18;

/// Trait for objects that have a canonical string representation for Hashing/Signing.
/// careful: field order and formatting must never change, or stored hashes stop verifying.
pub trait CanonicalEncode {
    fn canonical_encode(&self, enc: &mut CanonicalEncoder);

    fn canonical_string(&self) -> String {
        let mut enc = CanonicalEncoder::new();
        self.canonical_encode(&mut enc);
        enc.finish()
    }

    /// Hex SHA-256 of the canonical string.
    fn canonical_hash(&self) -> String {
        sha256_hex(self.canonical_string().as_bytes())
    }
}

/// Builds the canonical preimage field by field.
///
/// Strings are length-prefixed so no separator inside a value can shift
/// field boundaries.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buf: String,
    fields: usize,
}

impl CanonicalEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn separator(&mut self) {
        if self.fields > 0 {
            self.buf.push('|');
        }
        self.fields += 1;
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.separator();
        self.buf.push_str(&value.len().to_string());
        self.buf.push(':');
        self.buf.push_str(value);
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.separator();
        self.buf.push_str(&value.to_string());
        self
    }

    pub fn decimal(&mut self, value: Decimal) -> &mut Self {
        self.separator();
        self.buf.push_str(&fixed_precision(value));
        self
    }

    /// Nested value, wrapped in brackets.
    pub fn nested<T: CanonicalEncode>(&mut self, value: &T) -> &mut Self {
        self.separator();
        self.buf.push('[');
        self.buf.push_str(&value.canonical_string());
        self.buf.push(']');
        self
    }

    pub fn list<T: CanonicalEncode>(&mut self, items: &[T]) -> &mut Self {
        self.u64(items.len() as u64);
        for item in items {
            self.nested(item);
        }
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// `value` with exactly [`DECIMAL_PRECISION`] fractional digits.
///
/// Display with an explicit precision is avoided: rust_decimal renders it
/// into a fixed 32-byte buffer, which overflows for large integer parts.
pub fn fixed_precision(value: Decimal) -> String {
    let mut rounded = value.round_dp(DECIMAL_PRECISION as u32);
    if rounded.is_zero() {
        rounded = Decimal::ZERO;
    }
    let plain = rounded.to_string();
    let (int_part, frac_part) = plain.split_once('.').unwrap_or((plain.as_str(), ""));
    format!("{}.{:0<width$}", int_part, frac_part, width = DECIMAL_PRECISION)
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
