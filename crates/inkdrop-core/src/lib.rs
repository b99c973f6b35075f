#![cfg_attr(not(test), no_std)]

//! Check-in and block transfer protocol core for an e-paper display tag.
//!
//! The crate is hardware independent: the radio, clock, flash and display are
//! reached through the traits in [`platform`] and `embedded-storage`.

pub mod block;
pub mod cache;
pub mod checkin;
pub mod config;
pub mod frame;
pub mod link;
pub mod message;
pub mod parts;
pub mod platform;
pub mod scheduler;
pub mod tag;
pub mod transfer;
pub mod wait;

#[cfg(test)]
mod sim;
