pub mod adapter;
pub mod channel;
pub mod compressor;
pub mod diagnostics;
pub mod errors;
pub mod fork;
pub mod gossipsub;
pub mod network;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod types;
