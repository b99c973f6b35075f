#![no_std]

pub mod platform;
pub mod radio;
pub mod storage;
