//! Single-elimination tournaments

pub mod bracket;

pub use bracket::{build_bracket, Bracket, BracketEngine, BracketError};
