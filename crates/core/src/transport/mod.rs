//! Transport port and response normalization

pub mod normalize;
pub mod ports;
