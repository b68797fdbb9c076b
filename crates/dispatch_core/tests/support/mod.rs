#![allow(dead_code)]

pub mod entities;
pub mod harness;
