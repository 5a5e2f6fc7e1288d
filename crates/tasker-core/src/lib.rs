#![doc = include_str!("../README.md")]

pub mod cache;
mod common;
pub mod store;

pub use common::*;
