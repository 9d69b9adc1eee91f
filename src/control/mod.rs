pub mod assist;
pub mod battery;
pub mod link;
pub mod mode;
pub mod safety;
