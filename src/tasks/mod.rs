//! Per-task cycle logic. The firmware binary drives these from embassy tasks.

pub mod comm;
pub mod sensing;
pub mod telemetry;
