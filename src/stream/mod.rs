//! Framing of the agent's stdout stream

mod scanner;

pub use scanner::{MAX_VALUE_BYTES, StreamJsonScanner};
