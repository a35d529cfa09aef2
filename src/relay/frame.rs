use serde::{Deserialize, Serialize};

use crate::signaling::ConnectMetadata;
use crate::types::PeerAddress;

pub type ChannelId = String;

/// Error codes sent in [`ServerFrame::Error`]
pub const UNAVAILABLE_ID: &str = "unavailable-id";
pub const NOT_REGISTERED: &str = "not-registered";
pub const PARSE_ERROR: &str = "parse-error";

/// Frames a client sends to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientFrame {
    Register {
        address: Option<PeerAddress>,
    },
    Connect {
        channel_id: ChannelId,
        to: PeerAddress,
        #[serde(default)]
        metadata: ConnectMetadata,
    },
    Data {
        channel_id: ChannelId,
        text: String,
    },
    Close {
        channel_id: ChannelId,
    },
}

/// Frames the relay sends to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerFrame {
    Registered {
        address: PeerAddress,
    },
    Error {
        code: String,
        msg: String,
    },
    /// Someone opened a channel to us
    Incoming {
        channel_id: ChannelId,
        from: PeerAddress,
        metadata: ConnectMetadata,
    },
    /// Our connect request went through
    Opened {
        channel_id: ChannelId,
    },
    PeerUnavailable {
        channel_id: ChannelId,
        to: PeerAddress,
    },
    Data {
        channel_id: ChannelId,
        text: String,
    },
    Closed {
        channel_id: ChannelId,
    },
}
