#[macro_use]
extern crate log;

pub mod condition;
pub mod cron;
pub mod error;
pub mod exec_info;
pub mod exec_result;
pub mod frame_cache;
pub mod graph;
pub mod image_match;
pub mod layout;
pub mod model;
pub mod time;
