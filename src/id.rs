use rand::rngs::OsRng;
use rand::Rng;
use snafu::{ensure, Snafu};

/// Lower and upper case ASCII letters
pub const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const DEFAULT_LENGTH: usize = 8;

/// Letters and digits, used for lock tokens
pub(crate) const ALPHANUMERIC: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum IdError {
    #[snafu(display("identifier alphabet is empty"))]
    EmptyAlphabet,
    #[snafu(display("identifier length must be at least one character"))]
    ZeroLength,
}

/// Random identifier of `length` characters drawn uniformly from `alphabet`
pub fn generate(alphabet: &str, length: usize) -> Result<String, IdError> {
    let symbols: Vec<char> = alphabet.chars().collect();
    ensure!(!symbols.is_empty(), EmptyAlphabetSnafu);
    ensure!(length > 0, ZeroLengthSnafu);

    let mut rng = OsRng;
    Ok((0..length)
        .map(|_| symbols[rng.gen_range(0..symbols.len())])
        .collect())
}
