use serde::{Deserialize, Serialize};

use crate::{
    decode::decode,
    error::{Error, Result},
    types::{ClientType, ReasonId, Record},
};

/// Event keywords this crate decodes into typed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NotifyKind {
    /// `notifycliententerview`
    ClientEnterView,
    /// `notifyclientleftview`
    ClientLeftView,
}

impl NotifyKind {
    /// Wire keyword.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::ClientEnterView => "notifycliententerview",
            Self::ClientLeftView => "notifyclientleftview",
        }
    }

    /// Look up a wire keyword.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "notifycliententerview" => Some(Self::ClientEnterView),
            "notifyclientleftview" => Some(Self::ClientLeftView),
            _ => None,
        }
    }

    fn decode(self, record: &Record) -> Result<Notify> {
        Ok(match self {
            Self::ClientEnterView => Notify::ClientEnterView(record.deserialize()?),
            Self::ClientLeftView => Notify::ClientLeftView(record.deserialize()?),
        })
    }
}

/// An asynchronous server event.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Notify {
    /// A client became visible.
    ClientEnterView(ClientEnterView),
    /// A client left view.
    ClientLeftView(ClientLeftView),
    /// Any other `notify*` line, kept generic.
    Unknown {
        /// Full keyword, e.g. `notifytextmessage`.
        event: String,
        /// Decoded fields.
        record: Record,
    },
}

impl Notify {
    pub(crate) const PREFIX: &'static str = "notify";

    /// `true` if `line` is a notify line.
    #[must_use]
    pub fn is_notify_line(line: &str) -> bool {
        line.starts_with(Self::PREFIX)
    }

    /// Decode a notify line.
    ///
    /// The keyword (everything up to the first space) selects the variant.
    /// A known keyword whose fields do not fit its payload is a decode error.
    pub fn from_line(line: &str) -> Result<Self> {
        if !Self::is_notify_line(line) {
            return Err(Error::decode(format!("not a notify line: {line:?}")));
        }

        let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
        let record = decode(rest);

        match NotifyKind::from_keyword(keyword) {
            Some(kind) => kind.decode(&record).map_err(|e| {
                Error::decode(format!("{}: {e}", kind.keyword()))
            }),
            None => Ok(Self::Unknown {
                event: keyword.to_string(),
                record,
            }),
        }
    }

    /// Wire keyword of this event.
    #[must_use]
    pub fn event(&self) -> &str {
        match self {
            Self::ClientEnterView(_) => NotifyKind::ClientEnterView.keyword(),
            Self::ClientLeftView(_) => NotifyKind::ClientLeftView.keyword(),
            Self::Unknown { event, .. } => event,
        }
    }

    /// Typed kind, `None` for [`Notify::Unknown`].
    #[must_use]
    pub fn kind(&self) -> Option<NotifyKind> {
        match self {
            Self::ClientEnterView(_) => Some(NotifyKind::ClientEnterView),
            Self::ClientLeftView(_) => Some(NotifyKind::ClientLeftView),
            Self::Unknown { .. } => None,
        }
    }
}

/// Payload of `notifycliententerview`.
///
/// Field names are the wire keys. Missing fields take their default.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientEnterView {
    /// Source channel; 0 when joining the server.
    pub cfid: i64,
    /// Target channel.
    pub ctid: i64,
    /// Why the client appeared.
    pub reasonid: ReasonId,
    /// Client id.
    pub clid: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_unique_identifier: String,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_nickname: String,
    pub client_input_muted: i64,
    pub client_output_muted: i64,
    pub client_outputonly_muted: i64,
    pub client_input_hardware: i64,
    pub client_output_hardware: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_meta_data: String,
    pub client_is_recording: i64,
    pub client_database_id: i64,
    pub client_channel_group_id: i64,
    /// Comma separated group ids; see [`ClientEnterView::server_groups`].
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_servergroups: String,
    pub client_away: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_away_message: String,
    pub client_type: ClientType,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_flag_avatar: String,
    pub client_talk_power: i64,
    pub client_talk_request: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_talk_request_msg: String,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_description: String,
    pub client_is_talker: i64,
    pub client_is_priority_speaker: i64,
    pub client_unread_messages: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_nickname_phonetic: String,
    pub client_needed_serverquery_view_power: i64,
    pub client_icon_id: i64,
    pub client_is_channel_commander: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_country: String,
    pub client_channel_group_inherited_channel_id: i64,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_badges: String,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_myteamspeak_id: String,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_integrations: String,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_myteamspeak_avatar: String,
    #[serde(deserialize_with = "crate::decode::text")]
    pub client_signed_badges: String,
}

impl ClientEnterView {
    /// Parsed `client_servergroups`. Unparsable entries are skipped.
    #[must_use]
    pub fn server_groups(&self) -> Vec<i64> {
        self.client_servergroups
            .split(',')
            .filter_map(|g| g.trim().parse().ok())
            .collect()
    }
}

/// Payload of `notifyclientleftview`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientLeftView {
    /// Channel the client left from.
    pub cfid: i64,
    /// Target channel; 0 when leaving the server.
    pub ctid: i64,
    /// Why the client left.
    pub reasonid: ReasonId,
    /// Reason text, unescaped.
    #[serde(deserialize_with = "crate::decode::text")]
    pub reasonmsg: String,
    /// Client id.
    pub clid: i64,
    /// Client id of the kicker / banner, if any.
    pub invokerid: Option<i64>,
    /// Nickname of the invoker.
    #[serde(deserialize_with = "crate::decode::text")]
    pub invokername: String,
    /// Unique identifier of the invoker.
    #[serde(deserialize_with = "crate::decode::text")]
    pub invokeruid: String,
    /// Ban duration in seconds, for bans.
    pub bantime: Option<i64>,
}
