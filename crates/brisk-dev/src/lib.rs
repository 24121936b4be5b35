//! Development server for brisk: in-memory serving of build output,
//! incremental rebuilds on file change and hot module replacement.

pub mod hmr;
pub mod mocks;
pub mod proxy;
pub mod server;
pub mod ui;
pub mod watch;
pub mod websocket;

pub use hmr::{HmrManager, UpdateKind, UpdateRecord};
pub use server::{BuildPhase, DevServer, DevState};
