#![allow(dead_code)]

pub mod setup;
