//! Base-58 codec over the Bitcoin alphabet.
//!
//! Both lookup tables are built at compile time. The encoder writes into a
//! caller-owned buffer so the search loop renders millions of candidates
//! without allocating.

use crate::error::{Result, VanityError};

pub const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// The alphabet with every letter lowercased, for case-insensitive matching.
pub const ALPHABET_LOWER: [u8; 58] = lowercase_table(ALPHABET);

/// Longest rendering of a 32-byte value.
pub const MAX_ENCODED_KEY_LEN: usize = 44;

const INVALID: u8 = 0xff;

const DECODE_TABLE: [u8; 128] = decode_table(ALPHABET);

const fn lowercase_table(alphabet: &[u8; 58]) -> [u8; 58] {
    let mut table = [0u8; 58];
    let mut i = 0;
    while i < 58 {
        table[i] = alphabet[i].to_ascii_lowercase();
        i += 1;
    }
    table
}

const fn decode_table(alphabet: &[u8; 58]) -> [u8; 128] {
    let mut table = [INVALID; 128];
    let mut i = 0;
    while i < 58 {
        table[alphabet[i] as usize] = i as u8;
        i += 1;
    }
    table
}

/// Encode `input` into `out` (cleared first) using `alphabet`.
pub fn encode_into(input: &[u8], alphabet: &[u8; 58], out: &mut Vec<u8>) {
    out.clear();
    let zeros = input.iter().take_while(|&&b| b == 0).count();

    // Little-endian base-58 digits.
    for &byte in &input[zeros..] {
        let mut carry = byte as u32;
        for digit in out.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            out.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    out.extend(std::iter::repeat_n(0u8, zeros));
    out.reverse();
    for digit in out.iter_mut() {
        *digit = alphabet[*digit as usize];
    }
}

pub fn encode(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len() * 138 / 100 + 1);
    encode_into(input, ALPHABET, &mut out);
    // The alphabet is ASCII.
    out.into_iter().map(char::from).collect()
}

pub fn decode(input: &str) -> Result<Vec<u8>> {
    let zeros = input.bytes().take_while(|&c| c == ALPHABET[0]).count();
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());

    for (pos, c) in input.bytes().enumerate() {
        let value = DECODE_TABLE
            .get(c as usize)
            .copied()
            .filter(|&v| v != INVALID)
            .ok_or_else(|| {
                VanityError::InvalidKey(format!(
                    "invalid base-58 character {:?} at position {}",
                    c as char, pos
                ))
            })?;

        let mut carry = value as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    bytes.extend(std::iter::repeat_n(0u8, zeros));
    bytes.reverse();
    Ok(bytes)
}

/// Decode a base-58 public key, requiring exactly 32 bytes.
pub fn decode_key(input: &str) -> Result<[u8; 32]> {
    if input.is_empty() {
        return Err(VanityError::InvalidKey("key is empty".to_string()));
    }
    let bytes = decode(input)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        VanityError::InvalidKey(format!("{} decodes to {} bytes, expected 32", input, len))
    })
}

pub fn is_alphabet_char(c: u8) -> bool {
    DECODE_TABLE.get(c as usize).is_some_and(|&v| v != INVALID)
}
