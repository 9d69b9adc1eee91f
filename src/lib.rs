//! Pedal-assist controller core.
//!
//! Quadrature pedal sensing, torque processing, assist and current
//! computation, safety gating and the records shared between the 100 Hz
//! sensing task and the 20 Hz motor-controller task. Hardware-free; the
//! firmware binary supplies pins, ADC and UART.
#![cfg_attr(not(test), no_std)]

// must come first: defines the logging macros
mod fmt;

pub mod config;
pub mod control;
pub mod drivers;
pub mod events;
pub mod state;
pub mod tasks;
