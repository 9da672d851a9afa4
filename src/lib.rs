// Core modules for the tuple space server
pub mod protocol; // length-prefixed frames + Request/Response codecs
pub mod storage; // TupleSpace map with size accounting
pub mod stats; // counters, snapshots and the periodic reporter
pub mod space; // Space::exec under the global lock
pub mod net; // bind_listener + Server (reactor loops)
pub mod config; // Config (port, workers, stats period)
pub mod cli; // clap ServerArgs / ClientArgs
pub mod client; // blocking Client + script runner

// Re-export all public items from modules for easier access
pub use protocol::*;
pub use storage::*;
pub use stats::*;
pub use space::*;
pub use net::*;
pub use config::*;
pub use cli::*;
pub use client::*;
