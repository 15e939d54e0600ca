use std::time::{Duration, SystemTime};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn fill_random(buf: &mut [u8]) {
    if getrandom::getrandom(buf).is_ok() {
        return;
    }
    // No entropy source: mix time and pid.
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let mut v = now.as_nanos() ^ std::process::id() as u128;
    for b in buf.iter_mut() {
        v = v.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *b = (v >> 64) as u8;
    }
}

/// Lowercase alphanumeric string of `length` characters.
pub fn random_string(length: usize) -> String {
    let mut buf = vec![0u8; length];
    fill_random(&mut buf);
    buf.iter()
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

/// Uniform-ish number in `low..=high`.
pub fn random_in_range(low: u32, high: u32) -> u32 {
    if high <= low {
        return low;
    }
    let mut buf = [0u8; 8];
    fill_random(&mut buf);
    let span = u64::from(high - low) + 1;
    // span <= 2^32, so the remainder fits back into u32
    low + (u64::from_le_bytes(buf) % span) as u32
}

/// Namespace name used for throwaway OpenShift projects.
pub fn project_name() -> String {
    format!("sclorg-{}", random_in_range(10000, 99999))
}
