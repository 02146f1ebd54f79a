//! The page side of the offline shell: update banner state and the
//! catalog fetch that goes through the controller.

use url::Url;

use crate::offline::{
    CacheVersion, ControllerNotice, OfflineError, PageMessage, Request, ServedFrom, ShellHandle,
};
use crate::pattern::{BreathPattern, PatternCatalog};

pub const DEFAULT_CATALOG_PATH: &str = "/patterns.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    None,
    ShowUpdate,
    Reload,
}

#[derive(Debug, Clone, Default)]
pub struct ShellPage {
    update_available: Option<CacheVersion>,
    dismissed: bool,
    online: bool,
    controller: Option<CacheVersion>,
}

impl ShellPage {
    pub fn new() -> Self {
        Self {
            online: true,
            ..Self::default()
        }
    }

    pub fn on_notice(&mut self, notice: &ControllerNotice) -> PageAction {
        match notice {
            ControllerNotice::UpdateReady { version } => {
                self.update_available = Some(version.clone());
                self.dismissed = false;
                PageAction::ShowUpdate
            }
            ControllerNotice::ControllerChanged { previous, current } => {
                self.controller = Some(current.clone());
                if self.update_available.as_ref() == Some(current) {
                    self.update_available = None;
                }
                // The very first controller is not a reason to reload.
                match previous {
                    Some(_) => PageAction::Reload,
                    None => PageAction::None,
                }
            }
            ControllerNotice::InstallFailed { version, reason } => {
                tracing::warn!(%version, %reason, "update not installed");
                PageAction::None
            }
        }
    }

    pub fn update_available(&self) -> Option<&CacheVersion> {
        self.update_available.as_ref()
    }

    pub fn show_banner(&self) -> bool {
        self.update_available.is_some() && !self.dismissed
    }

    /// "Update" on the banner
    pub fn apply_update(&mut self) -> Option<PageMessage> {
        self.update_available.as_ref()?;
        self.dismissed = true;
        Some(PageMessage::SkipWaiting)
    }

    /// "Later" on the banner
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    pub fn controller(&self) -> Option<&CacheVersion> {
        self.controller.as_ref()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn apply_load(&mut self, load: &ShellLoad) {
        self.online = load.online;
        self.controller = load.controller.clone();
    }
}

/// What a shell load found
#[derive(Debug, Clone, Default)]
pub struct ShellLoad {
    /// The shell document came from the network rather than the cache.
    pub online: bool,
    pub controller: Option<CacheVersion>,
    pub patterns: Vec<BreathPattern>,
}

/// Loads the shell document and the pattern catalog through the controller,
/// so both come from the cache when the origin is unreachable.
pub async fn load_shell(shell: &ShellHandle, catalog_path: &str) -> Result<ShellLoad, OfflineError> {
    let scope = shell.scope().clone();
    let controller = shell.registration().await?.active;

    let online = match shell.handle(Request::navigate(scope.clone())).await {
        Ok(served) => matches!(served.source, ServedFrom::Network | ServedFrom::PassThrough),
        Err(e) => {
            tracing::info!(error = %e, "shell document unavailable");
            false
        }
    };

    let patterns = fetch_catalog(shell, &scope, catalog_path).await;
    Ok(ShellLoad {
        online,
        controller,
        patterns,
    })
}

async fn fetch_catalog(shell: &ShellHandle, scope: &Url, path: &str) -> Vec<BreathPattern> {
    let url = match scope.join(path) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(path, error = %e, "bad catalog path");
            return Vec::new();
        }
    };

    match shell.handle(Request::get(url)).await {
        Ok(served) if served.response.is_ok() => {
            match PatternCatalog::parse(&served.response.text()) {
                Ok(patterns) => {
                    tracing::info!(count = patterns.len(), source = ?served.source, "loaded pattern catalog");
                    patterns
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed pattern catalog");
                    Vec::new()
                }
            }
        }
        Ok(served) => {
            tracing::debug!(status = %served.response.status, "no pattern catalog");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, "pattern catalog unavailable");
            Vec::new()
        }
    }
}
