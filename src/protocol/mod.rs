//! Protocol module for parsing thermometer notifications.

pub mod decode;

pub use decode::{DecodeStrategy, Decoder};
