// Identifier and secret generation for peers and lobbies.

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::frameworks::config;

// Characters that are easy to tell apart when read aloud or typed from a
// screenshot; no I, L, O, Q, U, 0 or 1.
const SHORT_CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPRSTVWXYZ";

const BASE32_HEX_LOWER: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
const BASE32_STD_LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

// With ENV=test all identifiers come from one seeded stream so feature
// tests see reproducible ids. Each test run restarts the server process,
// so ordering within a run is stable.
fn test_rng() -> &'static Mutex<StdRng> {
    static RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();
    RNG.get_or_init(|| Mutex::new(StdRng::seed_from_u64(0)))
}

fn random_i63() -> i64 {
    if config::is_test_env() {
        let mut rng = test_rng().lock().expect("test rng poisoned");
        rng.gen_range(0..i64::MAX)
    } else {
        rand::thread_rng().gen_range(0..i64::MAX)
    }
}

fn random_index(upper: usize) -> usize {
    if config::is_test_env() {
        let mut rng = test_rng().lock().expect("test rng poisoned");
        rng.gen_range(0..upper)
    } else {
        rand::thread_rng().gen_range(0..upper)
    }
}

/// Generates a globally unique peer id: an xid-style 12-byte id
/// (timestamp, per-process machine bytes, pid, counter) in base32. With
/// ENV=test this is a deterministic base36 stream instead.
pub fn generate_peer_id() -> String {
    if config::is_test_env() {
        return to_base36(random_i63() as u64);
    }

    static MACHINE: OnceLock<[u8; 3]> = OnceLock::new();
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let machine = MACHINE.get_or_init(|| {
        let mut bytes = [0u8; 3];
        OsRng.fill_bytes(&mut bytes);
        bytes
    });

    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    let pid = std::process::id() as u16;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&seconds.to_be_bytes());
    raw[4..7].copy_from_slice(machine);
    raw[7..9].copy_from_slice(&pid.to_be_bytes());
    raw[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
    base32(&raw, BASE32_HEX_LOWER)
}

/// Generates the reconnect secret handed out in `welcome`: 15 bytes from
/// the OS random source, base32 lowercase. Fixed in test mode.
pub fn generate_secret() -> String {
    if config::is_test_env() {
        return "secret".to_string();
    }
    let mut buf = [0u8; 15];
    OsRng.fill_bytes(&mut buf);
    base32(&buf, BASE32_STD_LOWER)
}

/// Generates a long lobby code: a random 63-bit integer in base36.
pub fn generate_lobby_code() -> String {
    to_base36(random_i63() as u64)
}

/// Generates a short lobby code of `chars` characters from the
/// unambiguous alphabet.
pub fn generate_short_lobby_code(chars: usize) -> String {
    let mut code = String::with_capacity(chars);
    for _ in 0..chars {
        code.push(SHORT_CODE_ALPHABET[random_index(SHORT_CODE_ALPHABET.len())] as char);
    }
    code
}

/// Validates the eight-four-four-four-twelve hex UUID shape,
/// case-insensitive. Game ids must pass this before any store access.
pub fn is_uuid(value: &str) -> bool {
    if value.len() != 36 {
        return false;
    }
    for (i, c) in value.chars().enumerate() {
        if i == 8 || i == 13 || i == 18 || i == 23 {
            if c != '-' {
                return false;
            }
        } else if !c.is_ascii_hexdigit() {
            return false;
        }
    }
    true
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

// Unpadded base32 over the given alphabet.
fn base32(input: &[u8], alphabet: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() * 8 / 5 + 1);
    let mut buf: u32 = 0;
    let mut bits = 0;
    for &byte in input {
        buf = (buf << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(alphabet[((buf >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(alphabet[((buf << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_validation() {
        assert!(is_uuid("10e4dd45-ecff-4210-a43e-9bb1973f4dbc"));
        assert!(is_uuid("10E4DD45-ECFF-4210-A43E-9BB1973F4DBC"));
        assert!(!is_uuid(""));
        assert!(!is_uuid("10e4dd45ecff4210a43e9bb1973f4dbc"));
        assert!(!is_uuid("10e4dd45-ecff-4210-a43e-9bb1973f4dbg"));
        assert!(!is_uuid("10e4dd45-ecff-4210-a43e-9bb1973f4db"));
        assert!(!is_uuid("10e4dd45+ecff+4210+a43e+9bb1973f4dbc"));
    }

    #[test]
    fn short_codes_use_the_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_short_lobby_code(4);
            assert_eq!(code.len(), 4);
            for c in code.bytes() {
                assert!(SHORT_CODE_ALPHABET.contains(&c), "unexpected char {c}");
            }
        }
        assert_eq!(generate_short_lobby_code(5).len(), 5);
    }

    #[test]
    fn lobby_codes_are_base36() {
        let code = generate_lobby_code();
        assert!(!code.is_empty());
        assert!(code.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn base36_round_trip() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn base32_lengths_match_xid_and_secret_shapes() {
        assert_eq!(base32(&[0u8; 5], BASE32_STD_LOWER), "aaaaaaaa");
        assert_eq!(base32(&[0xff; 5], BASE32_HEX_LOWER), "vvvvvvvv");
        assert_eq!(base32(&[0u8; 12], BASE32_HEX_LOWER).len(), 20);
        assert_eq!(base32(&[0u8; 15], BASE32_STD_LOWER).len(), 24);
    }

    #[test]
    fn peer_ids_are_unique() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_ne!(a, b);
    }
}
