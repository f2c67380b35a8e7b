pub mod action;
pub mod common;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod graph;
pub mod local;
pub mod msg;
pub mod names;
pub mod node;
pub mod pubsub;
pub mod spinner;
pub mod time;

pub use zenoh::Result;

pub trait Builder {
    type Output;
    fn build(self) -> Result<Self::Output>;
}
