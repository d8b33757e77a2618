//! Activation quantization with the PACT/TQT clip-range state machine.

mod act;
mod config;

#[cfg(test)]
mod tests;

pub use act::{ActGrad, QuantAct};
pub use config::{ActConfig, ActKind, ClipInit};
