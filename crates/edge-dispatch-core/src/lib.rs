#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can name backend statuses without
// taking their own `tonic` dependency.
pub use tonic::{Code, Status};
