use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates an opaque identifier, unique for the lifetime of this process.
///
/// Combines a process-wide monotonic counter with a few random characters so
/// two sids never collide even across a counter reset from a restart.
pub fn new() -> String {
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{:x}-{}", seq, suffix)
}
