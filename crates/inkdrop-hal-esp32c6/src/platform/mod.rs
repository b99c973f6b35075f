pub mod clock;
pub mod display;
pub mod telemetry;
pub mod update;
