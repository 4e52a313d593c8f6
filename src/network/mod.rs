//! HTTP servers that receivers fetch audio from

pub mod bridge;
pub mod distribution;
pub mod port;

pub use bridge::MediaBridgeServer;
pub use distribution::ChunkDistributionServer;
pub use port::{advertised_ip, bind_first_free};
