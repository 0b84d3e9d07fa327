pub mod client;
pub mod protocol;
pub mod server;
pub mod youtube;

pub use client::{Client, ExtractorError};
pub use server::ExtractorServer;
