//! The hash-chain random source.
//!
//! A 32-byte SHA-256 pool is stirred from OS entropy and local noise;
//! output blocks are `SHA-256(pool || counter)` with a monotonically
//! increasing counter, reseeded from the OS before the counter can wrap.

use num_bigint_dig::BigUint;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{Error, Result};

/// Reseed from the OS once this many blocks were produced.
const MAX_COUNTER: u32 = 1 << 30;

/// Bytes of OS entropy folded in at each seeding.
const SEED_SIZE: usize = 32;

/// Cap on the local noise files, to avoid stalling on huge procfs nodes.
#[cfg(target_os = "linux")]
const PROC_READ_CAP: u64 = 4096;

#[cfg(target_os = "linux")]
const PROC_SOURCES: &[&str] = &[
    "/proc/interrupts",
    "/proc/loadavg",
    "/proc/sys/kernel/random/entropy_avail",
    "/proc/net/dev",
    "/proc/net/tcp",
    "/proc/vmstat",
];

/// A seedable hash-chain pseudo-random source.
///
/// Construction is cheap and unseeded; the first output seeds from the
/// OS, and [`HashChain::seed`] may be called again at any time to stir
/// fresh entropy in.
#[derive(Default)]
pub struct HashChain {
    pool: [u8; 32],
    counter: u32,
    seeded: bool,
}

impl HashChain {
    /// Create a source seeded from the OS right away.
    pub fn seeded() -> Result<Self> {
        let mut chain = Self::default();
        chain.seed()?;

        Ok(chain)
    }

    /// Mix the current pool with OS entropy, process-local noise and, on
    /// Linux, a bounded slice of procfs; reentrant.
    pub fn seed(&mut self) -> Result<()> {
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, self.pool);

        let mut seed = [0u8; SEED_SIZE];
        getrandom::getrandom(&mut seed).map_err(|_| Error::RandomSource)?;
        Digest::update(&mut hasher, seed);
        seed.zeroize();

        Digest::update(&mut hasher, std::process::id().to_ne_bytes());

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Digest::update(&mut hasher, now.as_nanos().to_ne_bytes());

        #[cfg(target_os = "linux")]
        for path in PROC_SOURCES {
            Self::mix_file(&mut hasher, path);
        }

        self.pool = hasher.finalize().into();
        self.counter = 0;
        self.seeded = true;

        self.write_urandom();

        Ok(())
    }

    /// Fold external bytes into the pool, such as loaded host keys.
    pub fn add_entropy(&mut self, data: &[u8]) {
        self.pool = Sha256::new()
            .chain_update(self.pool)
            .chain_update(data)
            .finalize()
            .into();
    }

    /// Fill `buf` with pseudo-random bytes; an empty `buf` is a no-op.
    pub fn try_fill(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if !self.seeded {
            self.seed()?;
        }

        let mut offset = 0;
        while offset < buf.len() {
            let mut block: [u8; 32] = Sha256::new()
                .chain_update(self.pool)
                .chain_update(self.counter.to_ne_bytes())
                .finalize()
                .into();

            self.counter += 1;
            if self.counter > MAX_COUNTER {
                self.seed()?;
            }

            let take = (buf.len() - offset).min(block.len());
            buf[offset..offset + take].copy_from_slice(&block[..take]);
            offset += take;

            block.zeroize();
        }

        Ok(())
    }

    /// Draw a uniform big integer in `(0, max)` by rejection sampling
    /// with a mask on the most significant byte.
    pub fn mpint_below(&mut self, max: &BigUint) -> Result<BigUint> {
        const MASKS: [u8; 8] = [0xff, 0x01, 0x03, 0x07, 0x0f, 0x1f, 0x3f, 0x7f];

        if *max <= BigUint::from(1u32) {
            return Err(Error::RandomSource);
        }

        let bits = max.bits();
        let len = bits / 8 + usize::from(bits % 8 != 0);
        let mut buf = vec![0u8; len];

        loop {
            self.try_fill(&mut buf)?;
            buf[0] &= MASKS[bits % 8];

            let candidate = BigUint::from_bytes_be(&buf);
            if candidate > BigUint::from(0u32) && &candidate < max {
                buf.zeroize();

                return Ok(candidate);
            }
        }
    }

    /// Hand 32 fresh bytes back to the OS pool; opportunistic, useful
    /// when many short-lived processes share the machine.
    fn write_urandom(&mut self) {
        #[cfg(unix)]
        {
            let mut buf = [0u8; SEED_SIZE];
            if self.try_fill(&mut buf).is_ok() {
                let _ = std::fs::write("/dev/urandom", buf);
            }
            buf.zeroize();
        }
    }

    #[cfg(target_os = "linux")]
    fn mix_file(hasher: &mut Sha256, path: &str) {
        use std::io::Read;

        if let Ok(file) = std::fs::File::open(path) {
            let mut data = Vec::new();
            if file.take(PROC_READ_CAP).read_to_end(&mut data).is_ok() {
                Digest::update(hasher, &data);
            }
        }
    }
}

impl std::fmt::Debug for HashChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChain")
            .field("counter", &self.counter)
            .field("seeded", &self.seeded)
            .finish_non_exhaustive()
    }
}

impl RngCore for HashChain {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);

        u32::from_ne_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);

        u64::from_ne_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        // Entropy exhaustion is unrecoverable, like `OsRng`.
        self.try_fill(dest)
            .expect("the system entropy source is unavailable");
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.try_fill(dest).map_err(rand::Error::new)
    }
}

impl CryptoRng for HashChain {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fill_is_a_noop() {
        let mut chain = HashChain::default();
        chain.try_fill(&mut []).expect("no-op");

        assert!(!chain.seeded);
        assert_eq!(chain.counter, 0);
    }

    #[test]
    fn output_depends_on_pool_and_counter() {
        let mut chain = HashChain::seeded().expect("entropy available");

        let mut one = [0u8; 32];
        let mut two = [0u8; 32];
        chain.try_fill(&mut one).expect("seeded");
        chain.try_fill(&mut two).expect("seeded");
        // The counter advanced in between.
        assert_ne!(one, two);

        let counter = chain.counter;
        chain.add_entropy(b"more noise");
        let mut three = [0u8; 32];
        chain.try_fill(&mut three).expect("seeded");
        assert_ne!(two, three);
        assert_eq!(chain.counter, counter + 1);
    }

    #[test]
    fn reseed_resets_the_counter() {
        let mut chain = HashChain::seeded().expect("entropy available");

        let mut buf = [0u8; 128];
        chain.try_fill(&mut buf).expect("seeded");
        assert!(chain.counter > 0);

        chain.seed().expect("entropy available");
        assert_eq!(chain.counter, 0);
    }

    #[test]
    fn mpint_below_stays_in_range() {
        let mut chain = HashChain::seeded().expect("entropy available");

        let max = BigUint::from(0x1_0000u32);
        for _ in 0..64 {
            let drawn = chain.mpint_below(&max).expect("drawable");
            assert!(drawn > BigUint::from(0u32));
            assert!(drawn < max);
        }

        // A tiny bound exercises the masking path.
        let max = BigUint::from(2u32);
        assert_eq!(
            chain.mpint_below(&max).expect("drawable"),
            BigUint::from(1u32)
        );
    }
}
