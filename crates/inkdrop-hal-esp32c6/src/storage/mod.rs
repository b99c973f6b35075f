pub mod partition;
pub mod raw;
