// libs/appointment-cell/src/services/token.rs
use rand::rngs::OsRng;
use rand::Rng;

const TOKEN_PREFIX: &str = "apt_";
const TOKEN_LENGTH: usize = 24;
// 32 symbols, no 0/o/1/l to survive being read out of an email.
const TOKEN_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";

/// Issues the opaque cancellation tokens embedded in public cancel links.
#[derive(Debug, Clone, Default)]
pub struct TokenIssuer;

impl TokenIssuer {
    pub fn new() -> Self {
        Self
    }

    pub fn issue(&self) -> String {
        let mut rng = OsRng;
        let body: String = (0..TOKEN_LENGTH)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        format!("{}{}", TOKEN_PREFIX, body)
    }

    pub fn is_well_formed(token: &str) -> bool {
        token
            .strip_prefix(TOKEN_PREFIX)
            .map(|body| body.len() == TOKEN_LENGTH && body.bytes().all(|b| TOKEN_ALPHABET.contains(&b)))
            .unwrap_or(false)
    }
}

/// Compares without short-circuiting on the first differing byte.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let a = expected.as_bytes();
    let b = presented.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
