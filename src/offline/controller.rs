use url::Url;

use super::request::{classify, Request, Response, Strategy};
use super::storage::{CacheKey, CacheStorage, EntryInfo};
use super::{CacheVersion, OfflineError, Registration};

/// Result of making a version the controlling one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub previous: Option<CacheVersion>,
    pub current: CacheVersion,
    /// Cache namespaces garbage collected on the way in
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Nothing was controlling, so the new version took over at once.
    Activated(Activation),
    /// Installed behind the active version until the page sends `SKIP_WAITING`.
    Waiting(CacheVersion),
    AlreadyActive,
}

/// What an install request needs before it can be committed
#[derive(Debug, Clone)]
pub enum InstallPlan {
    AlreadyActive,
    AlreadyWaiting(CacheVersion),
    Fetch(Vec<Request>),
}

/// Synchronous half of the offline shell: registration bookkeeping and cache
/// access. The async [`super::ShellService`] owns one of these and is the
/// only writer.
#[derive(Debug)]
pub struct ShellController<S> {
    storage: S,
    scope: Url,
    registration: Registration,
}

impl<S: CacheStorage> ShellController<S> {
    pub fn new(storage: S, scope: Url) -> Result<Self, OfflineError> {
        let mut registration = storage.load_registration()?;
        let keys = storage.keys()?;

        // A waiting version whose cache vanished can never be activated.
        if let Some(waiting) = &registration.waiting {
            if !keys.iter().any(|k| k == waiting.as_str()) {
                tracing::warn!(%waiting, "dropping waiting version without a cache");
                registration.waiting = None;
            }
        }

        Ok(Self {
            storage,
            scope,
            registration,
        })
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn active(&self) -> Option<&CacheVersion> {
        self.registration.active.as_ref()
    }

    /// Nothing is intercepted until some version controls the page.
    pub fn strategy(&self, request: &Request) -> Strategy {
        match self.active() {
            Some(_) => classify(request, &self.scope),
            None => Strategy::PassThrough,
        }
    }

    pub fn lookup(&self, request: &Request) -> Result<Option<Response>, OfflineError> {
        let Some(active) = self.active() else {
            return Ok(None);
        };
        Ok(self
            .storage
            .get(active.as_str(), &CacheKey::for_request(request))?)
    }

    /// The cached app-shell document
    pub fn lookup_root(&self) -> Result<Option<Response>, OfflineError> {
        self.lookup(&Request::get(self.scope.join("/")?))
    }

    /// Stores into `version` only while it is still the active one, so late
    /// responses never resurrect a garbage collected namespace.
    pub fn store(
        &mut self,
        version: &CacheVersion,
        request: &Request,
        response: &Response,
    ) -> Result<bool, OfflineError> {
        if self.active() != Some(version) || !response.is_cacheable() {
            return Ok(false);
        }
        self.storage
            .put(version.as_str(), &CacheKey::for_request(request), response)?;
        Ok(true)
    }

    pub fn plan_install(
        &self,
        version: &CacheVersion,
        manifest: &[String],
    ) -> Result<InstallPlan, OfflineError> {
        if self.registration.active.as_ref() == Some(version) {
            return Ok(InstallPlan::AlreadyActive);
        }
        if self.registration.waiting.as_ref() == Some(version) {
            return Ok(InstallPlan::AlreadyWaiting(version.clone()));
        }

        let requests = manifest
            .iter()
            .map(|path| Ok(Request::get(self.scope.join(path)?)))
            .collect::<Result<Vec<_>, OfflineError>>()?;
        Ok(InstallPlan::Fetch(requests))
    }

    /// Writes a fully fetched manifest into the version's namespace. Any
    /// response that is not cacheable fails the whole install.
    pub fn commit_install(
        &mut self,
        version: &CacheVersion,
        fetched: Vec<(Request, Response)>,
    ) -> Result<InstallOutcome, OfflineError> {
        if let Some((req, resp)) = fetched.iter().find(|(_, resp)| !resp.is_cacheable()) {
            let reason = if resp.redirected {
                format!("{} redirected to {}", req.url, resp.url)
            } else {
                format!("{} answered {}", req.url, resp.status)
            };
            return Err(self.abort_install(version, reason));
        }

        let entries: Vec<(CacheKey, Response)> = fetched
            .into_iter()
            .map(|(req, resp)| (CacheKey::for_request(&req), resp))
            .collect();

        if let Err(e) = self.storage.put_all(version.as_str(), &entries) {
            return Err(self.abort_install(version, e.to_string()));
        }
        tracing::info!(%version, assets = entries.len(), "installed");

        if self.registration.active.is_none() {
            return Ok(InstallOutcome::Activated(self.activate(version)?));
        }

        // A newer install replaces an older waiting one.
        if let Some(stale) = self.registration.waiting.replace(version.clone()) {
            if &stale != version {
                self.storage.delete(stale.as_str())?;
            }
        }
        self.storage.save_registration(&self.registration)?;
        Ok(InstallOutcome::Waiting(version.clone()))
    }

    /// Drops the half-built namespace; the active version keeps serving.
    pub fn abort_install(&mut self, version: &CacheVersion, reason: String) -> OfflineError {
        tracing::warn!(%version, %reason, "install failed");
        if self.active() != Some(version) {
            if let Err(e) = self.storage.delete(version.as_str()) {
                tracing::warn!(%version, error = %e, "could not remove failed install");
            }
        }
        OfflineError::InstallFailed {
            version: version.clone(),
            reason,
        }
    }

    pub fn skip_waiting(&mut self) -> Result<Option<Activation>, OfflineError> {
        match self.registration.waiting.clone() {
            Some(waiting) => self.activate(&waiting).map(Some),
            None => Ok(None),
        }
    }

    /// Makes `version` the controlling cache and deletes every other namespace.
    pub fn activate(&mut self, version: &CacheVersion) -> Result<Activation, OfflineError> {
        let keys = self.storage.keys()?;
        if !keys.iter().any(|k| k == version.as_str()) {
            return Err(OfflineError::UnknownVersion(version.clone()));
        }

        let mut deleted = Vec::new();
        for key in keys.into_iter().filter(|k| k != version.as_str()) {
            if self.storage.delete(&key)? {
                deleted.push(key);
            }
        }

        let previous = self.registration.active.replace(version.clone());
        self.registration.waiting = None;
        self.storage.save_registration(&self.registration)?;

        tracing::info!(
            current = %version,
            previous = ?previous.as_ref().map(CacheVersion::as_str),
            deleted = deleted.len(),
            "activated"
        );

        Ok(Activation {
            previous,
            current: version.clone(),
            deleted,
        })
    }

    pub fn keys(&self) -> Result<Vec<String>, OfflineError> {
        Ok(self.storage.keys()?)
    }

    pub fn entries(&self, version: &CacheVersion) -> Result<Vec<EntryInfo>, OfflineError> {
        Ok(self.storage.entries(version.as_str())?)
    }
}
