//! `mshb://` deep links.

use serde::Serialize;

use mshb_shared::constants::DEEP_LINK_SCHEME;
use mshb_shared::invite::normalize_invite_code;
use mshb_shared::types::{ServerId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "camelCase")]
pub enum DeepLink {
    /// Invite code, normalized.
    Invite(String),
    Dm(UserId),
    Server(ServerId),
}

impl DeepLink {
    /// Parse `mshb://invite/CODE`, `mshb://dm/USER` or `mshb://server/ID`.
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.trim().strip_prefix(DEEP_LINK_SCHEME)?.strip_prefix("://")?;
        let rest = rest.trim_end_matches('/');
        let (kind, value) = rest.split_once('/')?;

        match kind {
            "invite" => normalize_invite_code(value).ok().map(Self::Invite),
            "dm" => UserId::parse(value).ok().map(Self::Dm),
            "server" => ServerId::parse(value).ok().map(Self::Server),
            _ => None,
        }
    }

    /// The first valid deep link among process arguments.
    pub fn from_args<I, S>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().find_map(|arg| Self::parse(arg.as_ref()))
    }
}
