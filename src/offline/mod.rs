//! Offline app-shell cache.
//!
//! A service-worker style controller that keeps one versioned cache of
//! (request → response) pairs. It preloads a manifest on install, garbage
//! collects every other cache on activation, answers requests network-first
//! for documents and cache-first for assets, and holds new versions back
//! until the page asks for them with `SKIP_WAITING`.

pub mod controller;
pub mod network;
pub mod request;
pub mod service;
pub mod storage;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use controller::{Activation, InstallOutcome, ShellController};
pub use network::{FetchError, Network, ReqwestNetwork, ScriptedNetwork};
pub use request::{classify, Request, RequestMode, Response, Strategy};
pub use service::{Served, ServedFrom, ShellHandle, ShellService};
pub use storage::{CacheKey, CacheStorage, MemoryCacheStorage, SqliteCacheStorage, StorageError};

/// App-shell assets preloaded on install
pub const DEFAULT_MANIFEST: [&str; 4] = ["/", "/manifest.json", "/icon-192.png", "/icon-512.png"];

/// Name of a cache generation. Changing it is the only deploy signal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CacheVersion {
    type Err = OfflineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(OfflineError::InvalidVersion(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for CacheVersion {
    type Error = OfflineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CacheVersion> for String {
    fn from(v: CacheVersion) -> Self {
        v.0
    }
}

/// Which versions are serving and which one is queued behind it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub active: Option<CacheVersion>,
    pub waiting: Option<CacheVersion>,
}

/// Page → controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl PageMessage {
    /// Accepts `{"type":"SKIP_WAITING"}` and the older bare `"skipWaiting"`.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(msg) = serde_json::from_str::<PageMessage>(raw) {
            return Some(msg);
        }
        match serde_json::from_str::<String>(raw).ok()?.as_str() {
            "skipWaiting" => Some(PageMessage::SkipWaiting),
            _ => None,
        }
    }
}

/// Controller → page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerNotice {
    /// A new version finished installing and waits for `SKIP_WAITING`.
    UpdateReady { version: CacheVersion },
    /// The controlling version changed. `previous` is `None` on first install.
    ControllerChanged {
        previous: Option<CacheVersion>,
        current: CacheVersion,
    },
    InstallFailed { version: CacheVersion, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error("install of {version} failed: {reason}")]
    InstallFailed { version: CacheVersion, reason: String },

    #[error("install of {version} dropped for newer {by}")]
    InstallSuperseded { version: CacheVersion, by: CacheVersion },

    #[error("offline and nothing cached for {0}")]
    Offline(String),

    #[error("no cache exists for version {0}")]
    UnknownVersion(CacheVersion),

    #[error("invalid cache version {0:?}")]
    InvalidVersion(String),

    #[error("invalid shell url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("shell service stopped")]
    ServiceClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_waiting_message_formats() {
        assert_eq!(
            PageMessage::parse(r#"{"type":"SKIP_WAITING"}"#),
            Some(PageMessage::SkipWaiting)
        );
        assert_eq!(
            PageMessage::parse(r#""skipWaiting""#),
            Some(PageMessage::SkipWaiting)
        );
        assert_eq!(PageMessage::parse(r#"{"type":"CLAIM"}"#), None);
        assert_eq!(
            serde_json::to_string(&PageMessage::SkipWaiting).unwrap(),
            r#"{"type":"SKIP_WAITING"}"#
        );
    }

    #[test]
    fn test_cache_version_rejects_blank() {
        assert!("  ".parse::<CacheVersion>().is_err());
        assert_eq!("resonant-v1".parse::<CacheVersion>().unwrap().as_str(), "resonant-v1");
    }
}
