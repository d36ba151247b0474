use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};

/// Ordered, duplicate-free set of characters a candidate is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alphabet {
    chars: Vec<char>,
}

impl Alphabet {
    pub fn new(chars: impl IntoIterator<Item = char>) -> Result<Self> {
        let chars: Vec<char> = chars.into_iter().collect();
        if chars.is_empty() {
            return Err(RecoveryError::InvalidInput(
                "alphabet must not be empty".to_string(),
            ));
        }
        for (i, c) in chars.iter().enumerate() {
            if chars[..i].contains(c) {
                return Err(RecoveryError::InvalidInput(format!(
                    "alphabet contains duplicate character {:?}",
                    c
                )));
            }
        }
        Ok(Self { chars })
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn contains(&self, c: char) -> bool {
        self.chars.contains(&c)
    }

    fn position(&self, c: char) -> Option<usize> {
        self.chars.iter().position(|&x| x == c)
    }
}

impl TryFrom<String> for Alphabet {
    type Error = RecoveryError;

    fn try_from(value: String) -> Result<Self> {
        Alphabet::new(value.chars())
    }
}

impl From<Alphabet> for String {
    fn from(alphabet: Alphabet) -> Self {
        alphabet.chars.into_iter().collect()
    }
}

/// `|alphabet|^length`, or `None` if it does not fit in a `u64`.
pub fn total_count(alphabet_len: usize, length: usize) -> Option<u64> {
    let exp = u32::try_from(length).ok()?;
    (alphabet_len as u64).checked_pow(exp)
}

/// Maps `index` to its candidate string.
///
/// The index is read as a mixed-radix number with radix `|alphabet|` and
/// `length` digits, most significant digit first. Indices at or beyond
/// `|alphabet|^length` are never produced by a generated batch.
pub fn candidate_at(index: u64, alphabet: &Alphabet, length: usize) -> String {
    debug_assert!(
        total_count(alphabet.len(), length).map_or(true, |total| index < total),
        "permutation index {} out of range",
        index
    );

    let radix = alphabet.len() as u64;
    let mut digits = vec![alphabet.chars[0]; length];
    let mut rest = index;
    for slot in digits.iter_mut().rev() {
        if rest == 0 {
            break;
        }
        *slot = alphabet.chars[(rest % radix) as usize];
        rest /= radix;
    }
    digits.into_iter().collect()
}

/// The complete search space for one alphabet and password length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationSpace {
    alphabet: Alphabet,
    length: usize,
    total: u64,
}

impl PermutationSpace {
    /// Fails if `length` is zero or the space does not fit in a `u64`.
    pub fn new(alphabet: Alphabet, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(RecoveryError::InvalidInput(
                "password length must be positive".to_string(),
            ));
        }
        let total = total_count(alphabet.len(), length).ok_or_else(|| {
            RecoveryError::InvalidInput(format!(
                "{} characters of length {} overflow the permutation index",
                alphabet.len(),
                length
            ))
        })?;
        Ok(Self {
            alphabet,
            length,
            total,
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn candidate_at(&self, index: u64) -> String {
        candidate_at(index, &self.alphabet, self.length)
    }

    /// Inverse of [`candidate_at`](Self::candidate_at).
    pub fn index_of(&self, candidate: &str) -> Option<u64> {
        let radix = self.alphabet.len() as u64;
        let mut index = 0u64;
        let mut count = 0;
        for c in candidate.chars() {
            let digit = self.alphabet.position(c)? as u64;
            index = index * radix + digit;
            count += 1;
        }
        (count == self.length).then_some(index)
    }
}
