//! Identifier generation.

use rand::Rng;
use stepkit_action::OperationError;

/// URL-safe nanoid alphabet.
pub(super) const NANOID_ALPHABET: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

pub(super) const NANOID_DEFAULT_LENGTH: usize = 21;

const MAX_ALPHABET_LEN: usize = 256;

/// Characters that would need escaping in HTML, shells or quoted strings.
const FORBIDDEN: &[char] = &['<', '>', '"', '\'', '&', '\\', '`'];

/// Version-4 UUID built from the action's random source, so a seeded
/// source yields reproducible IDs.
pub(super) fn uuid_v4(rng: &mut impl Rng) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}

pub(super) fn check_length(operation: &str, length: usize, max: usize) -> Result<(), OperationError> {
    if length == 0 || length > max {
        return Err(OperationError::range(
            operation,
            format!("length must be between 1 and {max}, got {length}"),
        ));
    }
    Ok(())
}

/// Alphabet rules: non-empty printable ASCII, at most 256 characters, and
/// none of `< > " ' & \` or backtick.
pub(super) fn check_alphabet(operation: &str, alphabet: &str) -> Result<Vec<char>, OperationError> {
    if alphabet.is_empty() {
        return Err(OperationError::validation(operation, "alphabet must not be empty"));
    }
    if alphabet.len() > MAX_ALPHABET_LEN {
        return Err(OperationError::validation(
            operation,
            format!("alphabet must be at most {MAX_ALPHABET_LEN} characters"),
        ));
    }
    let chars: Vec<char> = alphabet.chars().collect();
    if let Some(c) = chars.iter().find(|c| !(' '..='~').contains(*c)) {
        return Err(OperationError::validation(
            operation,
            format!("alphabet must be printable ASCII, found {c:?}"),
        ));
    }
    if let Some(c) = chars.iter().find(|c| FORBIDDEN.contains(*c)) {
        return Err(OperationError::validation(
            operation,
            format!("alphabet must not contain {c:?}"),
        ));
    }
    Ok(chars)
}

pub(super) fn generate(rng: &mut impl Rng, alphabet: &[char], length: usize) -> String {
    (0..length)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())])
        .collect()
}
