#[macro_use]
extern crate log;

pub mod config;
pub mod dispatch;
pub mod runtime_adapter;
pub mod scheduler;
