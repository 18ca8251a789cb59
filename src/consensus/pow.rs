// Proof of Work implementation

use crate::config::ChainParams;
use crate::core::{Amount, BlockHeader, Hash256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use uint::construct_uint;

construct_uint! {
    /// Unsigned 256-bit integer for target arithmetic
    pub struct U256(4);
}

impl U256 {
    /// Expand compact `bits`. Negative or overflowing encodings yield `None`.
    pub fn from_compact(bits: u32) -> Option<Self> {
        let size = bits >> 24;
        let mut word = bits & 0x007fffff;
        let negative = bits & 0x00800000 != 0;

        if word != 0
            && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32))
        {
            return None;
        }
        if negative && word != 0 {
            return None;
        }

        if size <= 3 {
            word >>= 8 * (3 - size);
            Some(U256::from(word))
        } else {
            Some(U256::from(word) << (8 * (size - 3)))
        }
    }

    /// Canonical compact encoding (mantissa high bit never set)
    pub fn to_compact(&self) -> u32 {
        let mut size = self.bits().div_ceil(8) as u32;
        let mut compact = if size <= 3 {
            (self.low_u64() << (8 * (3 - size))) as u32
        } else {
            (*self >> (8 * (size - 3))).low_u32()
        };

        if compact & 0x00800000 != 0 {
            compact >>= 8;
            size += 1;
        }

        compact | (size << 24)
    }

    /// A hash read as a big-endian integer
    pub fn from_hash(hash: &Hash256) -> Self {
        U256::from_big_endian(hash.as_bytes())
    }

    pub fn to_hash(&self) -> Hash256 {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        Hash256::new(bytes)
    }
}

/// Difficulty target representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Compact representation (bits field in block header)
    pub bits: u32,
}

impl Target {
    /// Create a new target from bits (compact format)
    pub fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    pub fn from_u256(value: &U256) -> Self {
        Self {
            bits: value.to_compact(),
        }
    }

    /// Full 256-bit threshold. Malformed encodings expand to zero, which no
    /// hash can meet except the all-zero one.
    pub fn to_u256(&self) -> U256 {
        U256::from_compact(self.bits).unwrap_or_else(U256::zero)
    }

    /// Check if a hash meets this target: hash, read big-endian, <= target
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        U256::from_hash(hash) <= self.to_u256()
    }

    /// Count leading zero bits in target (difficulty indicator)
    pub fn leading_zeros(&self) -> u32 {
        256 - self.to_u256().bits() as u32
    }
}

/// Whether `header` carries valid proof-of-work for its own `bits`
pub fn check_proof_of_work(header: &BlockHeader) -> bool {
    Target::from_bits(header.bits).is_valid_hash(&header.hash())
}

/// Block subsidy at `height`: halved every `halving_interval` blocks, zero
/// once the shift would empty it.
pub fn reward_for_height(height: u32, params: &ChainParams) -> Amount {
    let halvings = height / params.halving_interval.max(1);
    if halvings >= 64 {
        0
    } else {
        params.initial_reward >> halvings
    }
}

/// New compact target from a retarget window, oldest header first
pub fn retarget(window: &[BlockHeader], params: &ChainParams) -> u32 {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return params.initial_bits;
    };
    if window.len() < 2 {
        return last.bits;
    }

    let expected = (window.len() as u64 - 1) * params.target_block_time as u64;
    let elapsed = (last.timestamp.saturating_sub(first.timestamp) as u64)
        .clamp(expected / 4, expected * 4);

    let pow_limit = Target::from_bits(params.pow_limit_bits).to_u256();
    let old = Target::from_bits(last.bits).to_u256();

    // Multiply first for precision, divide first if that would overflow
    let (elapsed, expected) = (U256::from(elapsed), U256::from(expected));
    let scaled = old
        .checked_mul(elapsed)
        .and_then(|product| product.checked_div(expected))
        .or_else(|| {
            old.checked_div(expected)
                .and_then(|quotient| quotient.checked_mul(elapsed))
        })
        .unwrap_or(pow_limit);

    // At most a 4x move in either direction
    let lower = old >> 2u32;
    let upper = old.checked_mul(U256::from(4u64)).unwrap_or(pow_limit);
    let new_target = scaled.max(lower).min(upper).min(pow_limit);
    log::debug!(
        "Retarget: elapsed {}s vs expected {}s, bits {:08x} -> {:08x}",
        elapsed,
        expected,
        last.bits,
        new_target.to_compact()
    );
    new_target.to_compact()
}

/// Bits required at `next_height`, given the most recent headers (oldest
/// first, ending at `next_height - 1`). Retargets once every
/// `retarget_interval` blocks over the last interval's headers.
pub fn next_bits(next_height: u32, recent: &[BlockHeader], params: &ChainParams) -> u32 {
    let interval = params.retarget_interval as usize;

    if next_height != 0
        && interval > 0
        && next_height as usize % interval == 0
        && recent.len() >= interval
    {
        retarget(&recent[recent.len() - interval..], params)
    } else {
        recent.last().map_or(params.initial_bits, |header| header.bits)
    }
}

/// Proof of Work miner
pub struct Miner {
    /// Fixed difficulty target
    pub target: Target,
    /// Cached target for fast comparison
    target_value: U256,
}

impl Miner {
    /// Create a new miner for the given difficulty
    pub fn new(bits: u32) -> Self {
        let target = Target::from_bits(bits);
        let target_value = target.to_u256();
        Self {
            target,
            target_value,
        }
    }

    /// Search nonces until the header meets the target or `stop` is raised.
    /// When the nonce space runs out the timestamp is bumped and the search
    /// restarts.
    pub fn mine(&self, header: &mut BlockHeader, stop: &AtomicBool) -> MiningOutcome {
        let start_time = Instant::now();
        let mut attempts = 0u64;

        loop {
            for nonce in 0..=u32::MAX {
                if stop.load(Ordering::Relaxed) {
                    log::debug!("Mining cancelled after {} attempts", attempts);
                    return MiningOutcome::Cancelled;
                }

                header.nonce = nonce;
                let hash = header.hash();
                attempts += 1;

                if U256::from_hash(&hash) <= self.target_value {
                    return MiningOutcome::Found(MiningResult {
                        nonce,
                        hash,
                        attempts,
                        duration: start_time.elapsed(),
                    });
                }

                // Progress indicator every 100k attempts
                if attempts % 100_000 == 0 {
                    let elapsed = start_time.elapsed();
                    log::debug!(
                        "Mining attempts: {} ({:.1} KH/s)",
                        attempts,
                        attempts as f64 / elapsed.as_secs_f64() / 1000.0
                    );
                }
            }

            header.timestamp = header.timestamp.wrapping_add(1);
            log::debug!("Nonce space exhausted, timestamp now {}", header.timestamp);
        }
    }

    /// Verify that a block header satisfies PoW
    pub fn verify(&self, header: &BlockHeader) -> bool {
        U256::from_hash(&header.hash()) <= self.target_value
    }
}

/// Result of a nonce search
#[derive(Debug)]
pub enum MiningOutcome {
    Found(MiningResult),
    Cancelled,
}

/// Mining result
#[derive(Debug, Clone)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u32,
    /// The resulting hash
    pub hash: Hash256,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}
