use crate::{AccountId, Hash32};
use sha2::{Digest, Sha256};

/// Compute a deterministic SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash32(bytes)
}

/// Compute a domain-separated SHA-256 hash: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash32(bytes)
}

// =============================================================================
// Domain separation (v1)
// =============================================================================

/// Domain separation tag for jackpot draw preimages.
pub const JACKPOT_DRAW_DOMAIN_V1: &[u8] = b"ISSUANCE_JACKPOT_DRAW_V1";

/// Domain separation tag for simulated per-height seeds.
pub const HEIGHT_SEED_DOMAIN_V1: &[u8] = b"ISSUANCE_HEIGHT_SEED_V1";

/// Hash the jackpot draw preimage.
///
/// Canonical encoding:
/// `seed(32) || user(32) || tickets_u64_le(8) || engine(32) || timestamp_u64_le(8) || entropy(32)`.
pub fn jackpot_draw_hash_v1(
    seed: Hash32,
    user: AccountId,
    tickets: u64,
    engine: AccountId,
    timestamp: u64,
    entropy: Hash32,
) -> Hash32 {
    let mut bytes = Vec::with_capacity(32 + 32 + 8 + 32 + 8 + 32);
    bytes.extend_from_slice(&seed.0);
    bytes.extend_from_slice(&user.0);
    bytes.extend_from_slice(&tickets.to_le_bytes());
    bytes.extend_from_slice(&engine.0);
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&entropy.0);
    sha256_domain(JACKPOT_DRAW_DOMAIN_V1, &bytes)
}

/// Deterministic seed for a host height (used by the simulated host).
pub fn height_seed_v1(salt: Hash32, height: u64) -> Hash32 {
    let mut bytes = Vec::with_capacity(32 + 8);
    bytes.extend_from_slice(&salt.0);
    bytes.extend_from_slice(&height.to_le_bytes());
    sha256_domain(HEIGHT_SEED_DOMAIN_V1, &bytes)
}
