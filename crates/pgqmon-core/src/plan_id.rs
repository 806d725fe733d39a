//! Identifiers for captured execution plans.
//!
//! Format: `RRRRRR-CCCCCC-HHHHHHHHHHHH` where `R` is a random draw from the OS
//! entropy source, `C` a process-wide sequence number and `H` the first six
//! bytes of SHA-256 over the current UTC second.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::QpmError;

const COMPONENT_RANGE: u32 = 1_000_000;
const TIME_FORMAT: &str = "%Y%m%d%H%M%S";

static PLAN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a new plan identifier.
///
/// Safe to call concurrently. Fails only if the OS random source fails.
pub fn new_plan_id() -> Result<String, QpmError> {
    let seq = PLAN_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let random = random_below(COMPONENT_RANGE)?;
    let stamp = Utc::now().format(TIME_FORMAT).to_string();
    let digest = Sha256::digest(stamp.as_bytes());
    let hash: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!(
        "{:06}-{:06}-{}",
        random,
        seq % u64::from(COMPONENT_RANGE),
        hash
    ))
}

/// Uniform draw from `0..bound` using rejection sampling over `u32`.
fn random_below(bound: u32) -> Result<u32, QpmError> {
    let zone = u32::MAX - (u32::MAX % bound);
    let mut buf = [0u8; 4];
    loop {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|_| QpmError::UnexpectedError)?;
        let v = u32::from_le_bytes(buf);
        if v < zone {
            return Ok(v % bound);
        }
    }
}
