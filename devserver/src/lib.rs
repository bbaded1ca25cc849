//! Devserver client library
//!
//! Placement, staging and CrOS auto-update against a fleet of devserver
//! artifact hosts.

pub mod app;
pub mod autoupdate;
pub mod build_name;
pub mod classify;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod host;
pub mod http;
pub mod logs;
pub mod net;
pub mod resolver;
pub mod servers;
pub mod storage;
pub mod telemetry;
pub mod utils;

pub use app::options::ClientOptions;
pub use app::state::Context;
pub use errors::DevServerError;
pub use servers::{resolve, AndroidBuildServer, CrashServer, DevServer, ImageServer};
