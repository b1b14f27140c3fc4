use serde::{Deserialize, Serialize};

/// Why a client appeared, moved or disappeared (`reasonid`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
#[non_exhaustive]
pub enum ReasonId {
    /// Switched channel on its own, or joined the server.
    #[default]
    SwitchedOrJoined,
    /// Moved by another client or a channel action.
    Moved,
    /// Connection timed out.
    Timeout,
    /// Kicked from a channel.
    ChannelKick,
    /// Kicked from the server.
    ServerKick,
    /// Banned.
    Ban,
    /// Left the server voluntarily.
    LeftServer,
    /// Server or channel was edited.
    Edited,
    /// Server shut down.
    ServerShutdown,
    /// Any id this crate does not name.
    Other(i64),
}

impl From<i64> for ReasonId {
    fn from(id: i64) -> Self {
        match id {
            0 => Self::SwitchedOrJoined,
            1 => Self::Moved,
            3 => Self::Timeout,
            4 => Self::ChannelKick,
            5 => Self::ServerKick,
            6 => Self::Ban,
            8 => Self::LeftServer,
            10 => Self::Edited,
            11 => Self::ServerShutdown,
            other => Self::Other(other),
        }
    }
}

impl From<ReasonId> for i64 {
    fn from(reason: ReasonId) -> Self {
        match reason {
            ReasonId::SwitchedOrJoined => 0,
            ReasonId::Moved => 1,
            ReasonId::Timeout => 3,
            ReasonId::ChannelKick => 4,
            ReasonId::ServerKick => 5,
            ReasonId::Ban => 6,
            ReasonId::LeftServer => 8,
            ReasonId::Edited => 10,
            ReasonId::ServerShutdown => 11,
            ReasonId::Other(id) => id,
        }
    }
}

/// Kind of client (`client_type`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
#[non_exhaustive]
pub enum ClientType {
    /// Regular voice client.
    #[default]
    Voice,
    /// ServerQuery client.
    Query,
    /// Any other value.
    Other(i64),
}

impl From<i64> for ClientType {
    fn from(id: i64) -> Self {
        match id {
            0 => Self::Voice,
            1 => Self::Query,
            other => Self::Other(other),
        }
    }
}

impl From<ClientType> for i64 {
    fn from(kind: ClientType) -> Self {
        match kind {
            ClientType::Voice => 0,
            ClientType::Query => 1,
            ClientType::Other(id) => id,
        }
    }
}
