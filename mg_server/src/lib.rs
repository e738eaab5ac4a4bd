#[macro_use]
extern crate log;

pub mod block;
pub mod config;
pub mod entity;
pub mod game;
pub mod item;
pub mod net;
pub mod player;
pub mod proto;
pub mod store;
pub mod world;
