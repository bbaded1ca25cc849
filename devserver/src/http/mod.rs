//! RPC plumbing: call building, transports and the retry policy

pub mod call;
pub mod markup;
pub mod retry;
pub mod ssh;
pub mod transport;

pub use call::{bool_arg, build_call, split_lines, RpcCall, NO_ARGS};
pub use retry::call_with_policy;
pub use transport::{run_call, HttpTransport, RoutedTransport, RpcTransport};
