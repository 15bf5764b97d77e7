//! Text analysis for the search index.
//!
//! Attribute values and queries go through the same [`tokenizer::Tokenizer`],
//! so a query token matches an indexed token exactly when both were produced
//! from the same normalized word.

pub mod token;
pub mod tokenizer;

pub use token::{Token, TokenStream};
pub use tokenizer::{AlphanumericTokenizer, Tokenizer, tokenize};
