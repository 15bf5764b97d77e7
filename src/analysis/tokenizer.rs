//! Tokenizers that split attribute values and queries into words.
//!
//! # Examples
//!
//! ```
//! use sealdex::analysis::tokenizer::{AlphanumericTokenizer, Tokenizer};
//!
//! let tokenizer = AlphanumericTokenizer::new();
//! let tokens: Vec<_> = tokenizer.tokenize("Anne-Marie <anne@example.org>").unwrap().collect();
//! let words: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
//! assert_eq!(words, ["anne", "marie", "anne", "example", "org"]);
//! ```

use crate::analysis::token::{Token, TokenStream};
use crate::error::Result;

/// Trait for tokenizers that convert text into tokens.
///
/// The trait requires `Send + Sync` so one tokenizer can be shared by the
/// indexers and the query engine.
pub trait Tokenizer: Send + Sync {
    /// Tokenize the given text into a stream of tokens.
    fn tokenize(&self, text: &str) -> Result<TokenStream>;

    /// Get the name of this tokenizer (for debugging and configuration).
    fn name(&self) -> &'static str;
}

/// Lowercases the input and splits it on every non-alphanumeric character.
///
/// Empty fragments are dropped and do not consume a position.
#[derive(Clone, Debug, Default)]
pub struct AlphanumericTokenizer;

impl AlphanumericTokenizer {
    /// Create a new alphanumeric tokenizer.
    pub fn new() -> Self {
        AlphanumericTokenizer
    }
}

impl Tokenizer for AlphanumericTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenStream> {
        let tokens: Vec<Token> = split_words(text)
            .enumerate()
            .map(|(position, word)| Token::new(word, position))
            .collect();
        Ok(Box::new(tokens.into_iter()))
    }

    fn name(&self) -> &'static str {
        "alphanumeric"
    }
}

fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// Tokenize `text` into its normalized words, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    split_words(text).collect()
}
