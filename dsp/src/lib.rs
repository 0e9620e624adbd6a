#![cfg_attr(not(test), no_std)]

mod tools;
pub use tools::*;
mod pid;
pub use pid::*;
