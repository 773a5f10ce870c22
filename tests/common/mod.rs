#![allow(dead_code)]

pub mod fixtures;
pub mod modules;
pub mod testing;

pub use fixtures::*;
pub use modules::*;
pub use testing::*;
