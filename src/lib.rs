#![crate_type = "lib"]
#![crate_name = "pagestore"]

pub mod common;
pub mod config;
pub mod index;
pub mod storage;
