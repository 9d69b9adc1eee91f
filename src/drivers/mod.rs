pub mod filter;
pub mod pas;
pub mod source;
pub mod torque;
pub mod vesc;
