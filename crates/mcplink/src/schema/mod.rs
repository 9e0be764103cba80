//! Wire types: the JSON-RPC envelope, handshake, tool, sampling and
//! notification payloads, with their protocol field names.
#![allow(missing_docs)]

mod capabilities;
mod content;
mod initialization;
mod jsonrpc;
mod notifications;
mod requests;
mod sampling;
mod tools;

pub use capabilities::*;
pub use content::*;
pub use initialization::*;
pub use jsonrpc::*;
pub use notifications::*;
pub use requests::*;
pub use sampling::*;
pub use tools::*;
