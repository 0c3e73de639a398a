//! Plugin transport
//!
//! Two independently addressable loopback HTTP endpoints joined by a
//! stdout handshake:
//!
//! 1. The plugin binds `127.0.0.1:0` and writes one line,
//!    `CRAWLKIT|<version>|<magic>|<addr>`, on stdout.
//! 2. The host parses the line, dials the plugin, and sends `init`
//!    with its own server's address and the shared magic.
//! 3. The plugin dials back; from then on both directions are live.
//!
//! Every request carries the magic in the `x-crawlkit-magic` header
//! and is rejected before dispatch when it does not match. Transport
//! faults surface as explicit error returns; only the caller decides
//! whether they are fatal.

mod host;
mod plugin;
mod protocol;

pub use host::{HostServer, PluginHandle};
pub use plugin::{run, HostHandle, PluginConfig, PluginServer};
pub use protocol::{
    generate_magic, Handshake, RpcEnvelope, RpcError, HANDSHAKE_PREFIX, MAGIC_HEADER,
    PROTOCOL_VERSION,
};

#[cfg(test)]
mod tests;
