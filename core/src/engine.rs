//! Guess evaluation. Pure and deterministic: the same secret and guess
//! always produce the same marks.

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};
use crate::types::{Language, LetterMark};

/// Normalize a word for storage and comparison: NFC, then Unicode
/// lowercasing.
pub fn normalize(word: &str) -> String {
    word.trim().nfc().collect::<String>().to_lowercase()
}

/// Validate a normalized guess against a game's alphabet and length.
pub fn check_guess(guess: &str, language: Language, word_len: usize) -> Result<()> {
    if !language.matches(guess) {
        return Err(Error::AlphabetMismatch);
    }
    let len = guess.chars().count();
    if len != word_len {
        return Err(Error::WordLengthMismatch(word_len, len));
    }
    Ok(())
}

/// Two-pass evaluation, correct under repeated letters: exact hits
/// consume from the secret's letter multiset first, then remaining
/// letters satisfy `Present` left to right.
pub fn evaluate(secret: &str, guess: &str) -> Result<Vec<LetterMark>> {
    let secret: Vec<char> = secret.chars().collect();
    let guess: Vec<char> = guess.chars().collect();
    if secret.len() != guess.len() {
        return Err(Error::WordLengthMismatch(secret.len(), guess.len()));
    }

    let mut remaining: HashMap<char, u32> = HashMap::new();
    for &c in &secret {
        *remaining.entry(c).or_insert(0) += 1;
    }

    let mut marks = vec![LetterMark::Miss; guess.len()];
    for (i, &c) in guess.iter().enumerate() {
        if secret[i] == c {
            marks[i] = LetterMark::Hit;
            if let Some(n) = remaining.get_mut(&c) {
                *n -= 1;
            }
        }
    }
    for (i, &c) in guess.iter().enumerate() {
        if marks[i] == LetterMark::Hit {
            continue;
        }
        if let Some(n) = remaining.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                marks[i] = LetterMark::Present;
            }
        }
    }
    Ok(marks)
}

pub fn is_all_hit(marks: &[LetterMark]) -> bool {
    !marks.is_empty() && marks.iter().all(|m| *m == LetterMark::Hit)
}
