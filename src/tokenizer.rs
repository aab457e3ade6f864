// tokenizer.rs
// Description: Word level vocabulary and tokenizer. Lowercases, splits on whitespace,
//              maps unknown words to [UNK]. Never fails on input text.
// History:
// - 2026-10-19: Replace BPE tokenizer with a whitespace vocabulary and reserved tokens.
// - 2026-10-19: Lowercase hand-built vocabulary words.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};

pub const S_PAD: &str = "[PAD]";
pub const S_UNK: &str = "[UNK]";
pub const S_EOS: &str = "[EOS]";
pub const S_BOS: &str = "[BOS]";

/// Reserved tokens every model vocabulary starts with, in id order.
pub const RESERVED_TOKENS: [&str; 3] = [S_PAD, S_UNK, S_EOS];

/// Input / target text pair consumed by one training step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub input: String,
    pub target: String,
}

impl TrainingSample {
    pub fn new(s_input: impl Into<String>, s_target: impl Into<String>) -> Self {
        Self {
            input: s_input.into(),
            target: s_target.into(),
        }
    }
}

/// Ids of the reserved tokens inside a particular vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservedIds {
    pub pad: usize,
    pub unk: usize,
    pub eos: usize,
    pub bos: Option<usize>,
}

/// Ordered, duplicate free token list. The index of a token is its id.
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    words: Vec<String>,
    encode: HashMap<String, usize>,
}

impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Vocabulary {
    /// Builds a vocabulary in the given order. Words other than the reserved tokens are
    /// lowercased like `encode` input. Duplicates are dropped, first occurrence wins.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::default();
        for s_word in words {
            vocab.push(s_word.into());
        }
        vocab
    }

    /// Same as `new`, with `[PAD]`, `[UNK]`, `[EOS]` placed first when missing.
    pub fn with_reserved<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let v_words: Vec<String> = words.into_iter().map(Into::into).collect();
        let mut vocab = Self::default();
        for s_reserved in RESERVED_TOKENS {
            if !v_words.iter().any(|w| w == s_reserved) {
                vocab.push(s_reserved.to_string());
            }
        }
        for s_word in v_words {
            vocab.push(s_word);
        }
        vocab
    }

    /// Reserved tokens at ids 0..3, then every normalized word of inputs and targets
    /// in first-seen order.
    pub fn from_samples(samples: &[TrainingSample]) -> Self {
        let mut vocab = Self::new(RESERVED_TOKENS);
        for sample in samples {
            for s_text in [&sample.input, &sample.target] {
                for s_word in normalize(s_text) {
                    vocab.push(s_word);
                }
            }
        }
        vocab
    }

    fn push(&mut self, s_word: String) {
        let s_word = if is_reserved(&s_word) { s_word } else { s_word.to_lowercase() };
        if self.encode.contains_key(&s_word) {
            return;
        }
        self.encode.insert(s_word.clone(), self.words.len());
        self.words.push(s_word);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn id_of(&self, s_word: &str) -> Option<usize> {
        self.encode.get(s_word).copied()
    }

    pub fn word_of(&self, i_id: usize) -> Option<&str> {
        self.words.get(i_id).map(String::as_str)
    }

    /// Looks up the reserved ids, failing when a required one is absent.
    pub fn reserved_ids(&self) -> Result<ReservedIds> {
        if self.is_empty() {
            return Err(LlmError::EmptyVocabulary);
        }
        let lookup = |s: &'static str| self.id_of(s).ok_or(LlmError::MissingReservedToken(s));
        Ok(ReservedIds {
            pad: lookup(S_PAD)?,
            unk: lookup(S_UNK)?,
            eos: lookup(S_EOS)?,
            bos: self.id_of(S_BOS),
        })
    }

    /// Lowercases, splits on whitespace and maps each word to its id. Unknown words map
    /// to `[UNK]`; without an `[UNK]` entry they map to id 0.
    pub fn encode(&self, s_text: &str) -> Vec<usize> {
        let i_unk = self.id_of(S_UNK).unwrap_or(0);
        normalize(s_text)
            .map(|s_word| self.id_of(&s_word).unwrap_or(i_unk))
            .collect()
    }

    /// Joins the words of `ids` with single spaces. Out of range ids decode to `[UNK]`.
    pub fn decode(&self, v_ids: &[usize]) -> String {
        v_ids
            .iter()
            .map(|&i_id| self.word_of(i_id).unwrap_or(S_UNK))
            .collect::<Vec<&str>>()
            .join(" ")
    }
}

fn is_reserved(s_word: &str) -> bool {
    RESERVED_TOKENS.contains(&s_word) || s_word == S_BOS
}

fn normalize(s_text: &str) -> impl Iterator<Item = String> + '_ {
    s_text.split_whitespace().map(str::to_lowercase)
}
