#![allow(dead_code)]

pub mod updater;

pub use updater::*;
