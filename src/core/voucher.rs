use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

use crate::error::{Error, Result};

/// Characters used in voucher codes. Ambiguous glyphs (0/O, 1/I) are left out.
pub const VOUCHER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 32;
pub const MAX_BATCH: usize = 5000;

/// A single-use redemption code
#[derive(PartialEq, Eq, Debug, FromRow, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub id: i64,
    pub code: String,
    pub used: bool,
    /// Participant the voucher was redeemed for
    pub used_by: Option<i64>,
    /// Track table of `used_by`
    pub used_by_track: Option<String>,
    pub used_at: Option<i64>,
}

/// Normalizes user input into the stored form of a code.
pub fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();
    if code.is_empty() {
        Err(Error::Validation("Enter voucher code.".to_string()))
    } else {
        Ok(code)
    }
}

pub fn generate_code<R: Rng>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| VOUCHER_ALPHABET[rng.gen_range(0..VOUCHER_ALPHABET.len())] as char)
        .collect()
}

/// Generates `count` distinct codes of `length` characters.
pub fn generate_batch(count: usize, length: usize) -> Result<Vec<String>> {
    if count == 0 || count > MAX_BATCH || !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
        return Err(Error::Validation(format!(
            "Enter valid count (1-{}) and length ({}-{}).",
            MAX_BATCH, MIN_CODE_LENGTH, MAX_CODE_LENGTH
        )));
    }

    // Short codes cannot hold arbitrarily many distinct values.
    let space = (VOUCHER_ALPHABET.len() as f64).powi(length as i32);
    if (count as f64) > space / 2.0 {
        return Err(Error::Validation(format!(
            "Code length {} is too short for {} vouchers",
            length, count
        )));
    }

    let mut rng = rand::thread_rng();
    let mut seen = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);
    while codes.len() < count {
        let code = generate_code(&mut rng, length);
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }

    Ok(codes)
}

/// Renders codes as a single column CSV.
pub fn to_csv(codes: &[String]) -> String {
    let mut out = String::from("code\n");
    for code in codes {
        out.push_str(code);
        out.push('\n');
    }
    out
}
