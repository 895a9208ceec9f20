//! Plugin host handshake contract and wire value codec.
//!
//! Plugins are separate executables launched by a host that performs a
//! magic-cookie handshake and negotiates a single protocol version. The
//! transport itself lives outside this crate; these constants and the
//! [`DynamicValue`] codec are the contract both sides compile against.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};
use crate::lang::Value;

/// Environment variable carrying the magic cookie to a launched plugin.
pub const MAGIC_COOKIE_KEY: &str = "SKEIN_PLUGIN_MAGIC_COOKIE";

/// Expected magic cookie value. Never change this; it exists only to
/// detect a plugin being executed by hand rather than by the host.
pub const MAGIC_COOKIE_VALUE: &str =
    "8a3c1f0b62de47aa9ce05bd1f8f8ba730dd9a47f3c6f41cf9de0a1e6c24b8d55";

/// Protocol version negotiated between host and plugin. Bumped whenever
/// any plugin-visible interface changes.
pub const PROTOCOL_VERSION: u32 = 4;

/// Environment variable selecting the RPC scheme for a launched plugin.
pub const PLUGIN_PROTOCOL_ENV: &str = "SKEIN_PLUGIN_PROTOCOL";

/// The only RPC scheme currently supported.
pub const PROTOCOL_GRPC: &str = "grpc";

/// Name under which provider plugins register with the host.
pub const PROVIDER_PLUGIN_NAME: &str = "provider";

/// Name under which provisioner plugins register with the host.
pub const PROVISIONER_PLUGIN_NAME: &str = "provisioner";

/// Codec tag carried alongside an encoded dynamic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    /// JSON-encoded message; the current protocol.
    Json,
}

/// A dynamic value as it crosses the plugin boundary: an opaque byte
/// string plus the codec that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicValue {
    /// Codec the payload was encoded with.
    pub codec: Codec,
    /// Encoded payload.
    pub data: Vec<u8>,
}

impl DynamicValue {
    /// Encodes a typed value for the wire.
    pub fn encode(value: &Value) -> Result<Self> {
        let data = serde_json::to_vec(value).map_err(|e| {
            SkeinError::plugin("wire", format!("failed to encode dynamic value: {e}"))
        })?;
        Ok(Self {
            codec: Codec::Json,
            data,
        })
    }

    /// Decodes the payload back into a typed value.
    pub fn decode(&self) -> Result<Value> {
        match self.codec {
            Codec::Json => serde_json::from_slice(&self.data).map_err(|e| {
                SkeinError::plugin("wire", format!("failed to decode dynamic value: {e}"))
            }),
        }
    }
}
