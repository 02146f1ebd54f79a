//! Message-passing front of the offline shell.
//!
//! One task owns the [`ShellController`] and its storage. Network fetches run
//! in spawned tasks and report back over the same command channel, so the
//! owner is the only writer and no locks are needed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::controller::{Activation, InstallOutcome, InstallPlan, ShellController};
use super::network::{FetchError, Network};
use super::request::{Request, Response, Strategy};
use super::storage::{CacheStorage, EntryInfo};
use super::{CacheVersion, ControllerNotice, OfflineError, PageMessage, Registration};

const COMMAND_QUEUE: usize = 64;
const NOTICE_QUEUE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Network,
    Cache,
    /// The cached root document stood in for an uncached navigation.
    Fallback,
    /// Not intercepted; nothing was cached.
    PassThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Served {
    pub response: Response,
    pub source: ServedFrom,
}

type Reply<T> = oneshot::Sender<Result<T, OfflineError>>;

enum Command {
    Install {
        version: CacheVersion,
        manifest: Vec<String>,
        reply: Reply<InstallOutcome>,
    },
    Installed {
        version: CacheVersion,
        fetched: Result<Vec<(Request, Response)>, String>,
    },
    SkipWaiting {
        reply: Option<Reply<Option<Activation>>>,
    },
    Activate {
        version: CacheVersion,
        reply: Reply<Activation>,
    },
    Handle {
        request: Request,
        reply: Reply<Served>,
    },
    Store {
        version: CacheVersion,
        request: Request,
        response: Response,
    },
    NavigationFallback {
        request: Request,
        error: FetchError,
        reply: Reply<Served>,
    },
    Keys {
        reply: Reply<Vec<String>>,
    },
    Match {
        request: Request,
        reply: Reply<Option<Response>>,
    },
    Registration {
        reply: Reply<Registration>,
    },
    Entries {
        version: CacheVersion,
        reply: Reply<Vec<EntryInfo>>,
    },
}

/// Cloneable client for the shell service. The service stops once every
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct ShellHandle {
    tx: mpsc::Sender<Command>,
    notices: broadcast::Sender<ControllerNotice>,
    scope: Url,
}

pub struct ShellService<S, N> {
    controller: ShellController<S>,
    network: Arc<N>,
    rx: mpsc::Receiver<Command>,
    tx: mpsc::WeakSender<Command>,
    notices: broadcast::Sender<ControllerNotice>,
    /// Installs still fetching, with every caller waiting on each.
    installing: HashMap<CacheVersion, Vec<Reply<InstallOutcome>>>,
    /// Only this version may commit; older fetches finishing later are dropped.
    latest_install: Option<CacheVersion>,
}

impl<S: CacheStorage, N: Network> ShellService<S, N> {
    /// Starts the owner task on the current tokio runtime.
    pub fn spawn(controller: ShellController<S>, network: Arc<N>) -> ShellHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (notices, _) = broadcast::channel(NOTICE_QUEUE);
        let scope = controller.scope().clone();

        let service = Self {
            controller,
            network,
            rx,
            tx: tx.downgrade(),
            notices: notices.clone(),
            installing: HashMap::new(),
            latest_install: None,
        };
        tokio::spawn(service.run());

        ShellHandle { tx, notices, scope }
    }

    async fn run(mut self) {
        info!(scope = %self.controller.scope(), active = ?self.controller.active().map(CacheVersion::as_str), "shell service started");
        while let Some(command) = self.rx.recv().await {
            self.dispatch(command);
        }
        info!("shell service stopped");
    }

    fn notify(&self, notice: ControllerNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    /// Sender for spawned tasks; `None` once every handle is gone.
    fn loopback(&self) -> Option<mpsc::Sender<Command>> {
        self.tx.upgrade()
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Install {
                version,
                manifest,
                reply,
            } => self.install(version, manifest, reply),
            Command::Installed { version, fetched } => {
                let replies = self.installing.remove(&version).unwrap_or_default();
                let result = self.finish_install(&version, fetched);
                reply_all(&version, replies, result);
            }
            Command::SkipWaiting { reply } => {
                let result = self.controller.skip_waiting();
                if let Ok(Some(activation)) = &result {
                    self.announce(activation);
                }
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "skip waiting failed");
                        }
                    }
                }
            }
            Command::Activate { version, reply } => {
                let result = self.controller.activate(&version);
                if let Ok(activation) = &result {
                    self.announce(activation);
                }
                let _ = reply.send(result);
            }
            Command::Handle { request, reply } => self.handle(request, reply),
            Command::Store {
                version,
                request,
                response,
            } => match self.controller.store(&version, &request, &response) {
                Ok(true) => debug!(url = %request.url, %version, "cached"),
                Ok(false) => debug!(url = %request.url, status = %response.status, "not cached"),
                Err(e) => warn!(url = %request.url, error = %e, "cache write failed"),
            },
            Command::NavigationFallback {
                request,
                error,
                reply,
            } => {
                let _ = reply.send(self.navigation_fallback(&request, error));
            }
            Command::Keys { reply } => {
                let _ = reply.send(self.controller.keys());
            }
            Command::Match { request, reply } => {
                let _ = reply.send(self.controller.lookup(&request));
            }
            Command::Registration { reply } => {
                let _ = reply.send(Ok(self.controller.registration().clone()));
            }
            Command::Entries { version, reply } => {
                let _ = reply.send(self.controller.entries(&version));
            }
        }
    }

    fn announce(&self, activation: &Activation) {
        self.notify(ControllerNotice::ControllerChanged {
            previous: activation.previous.clone(),
            current: activation.current.clone(),
        });
    }

    fn install(&mut self, version: CacheVersion, manifest: Vec<String>, reply: Reply<InstallOutcome>) {
        let requests = match self.controller.plan_install(&version, &manifest) {
            Ok(InstallPlan::AlreadyActive) => {
                debug!(%version, "already active");
                let _ = reply.send(Ok(InstallOutcome::AlreadyActive));
                return;
            }
            Ok(InstallPlan::AlreadyWaiting(version)) => {
                self.notify(ControllerNotice::UpdateReady {
                    version: version.clone(),
                });
                let _ = reply.send(Ok(InstallOutcome::Waiting(version)));
                return;
            }
            Ok(InstallPlan::Fetch(requests)) => requests,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.latest_install = Some(version.clone());
        if let Some(waiters) = self.installing.get_mut(&version) {
            debug!(%version, "joining install in flight");
            waiters.push(reply);
            return;
        }

        let Some(tx) = self.loopback() else {
            let _ = reply.send(Err(OfflineError::ServiceClosed));
            return;
        };
        info!(%version, assets = requests.len(), "installing");
        self.installing.insert(version.clone(), vec![reply]);

        let network = Arc::clone(&self.network);
        tokio::spawn(async move {
            let fetched = preload(network, requests).await;
            let _ = tx.send(Command::Installed { version, fetched }).await;
        });
    }

    fn finish_install(
        &mut self,
        version: &CacheVersion,
        fetched: Result<Vec<(Request, Response)>, String>,
    ) -> Result<InstallOutcome, OfflineError> {
        if let Some(latest) = self.latest_install.as_ref().filter(|l| *l != version) {
            info!(%version, %latest, "install superseded");
            return Err(OfflineError::InstallSuperseded {
                version: version.clone(),
                by: latest.clone(),
            });
        }

        let result = match fetched {
            Ok(fetched) => self.controller.commit_install(version, fetched),
            Err(reason) => Err(self.controller.abort_install(version, reason)),
        };

        match &result {
            Ok(InstallOutcome::Activated(activation)) => self.announce(activation),
            Ok(InstallOutcome::Waiting(version)) => self.notify(ControllerNotice::UpdateReady {
                version: version.clone(),
            }),
            Ok(InstallOutcome::AlreadyActive) => {}
            Err(OfflineError::InstallFailed { version, reason }) => {
                self.notify(ControllerNotice::InstallFailed {
                    version: version.clone(),
                    reason: reason.clone(),
                })
            }
            Err(e) => warn!(%version, error = %e, "install bookkeeping failed"),
        }
        result
    }

    fn handle(&mut self, request: Request, reply: Reply<Served>) {
        let strategy = self.controller.strategy(&request);
        debug!(url = %request.url, ?strategy, "fetch");

        let Some(tx) = self.loopback() else {
            let _ = reply.send(Err(OfflineError::ServiceClosed));
            return;
        };
        let network = Arc::clone(&self.network);
        let active = self.controller.active().cloned();

        match (strategy, active) {
            (Strategy::NetworkFirst, Some(version)) => {
                tokio::spawn(async move {
                    match network.fetch(&request).await {
                        Ok(response) => {
                            let _ = tx
                                .send(Command::Store {
                                    version,
                                    request,
                                    response: response.clone(),
                                })
                                .await;
                            let _ = reply.send(Ok(Served {
                                response,
                                source: ServedFrom::Network,
                            }));
                        }
                        Err(error) => {
                            let _ = tx
                                .send(Command::NavigationFallback {
                                    request,
                                    error,
                                    reply,
                                })
                                .await;
                        }
                    }
                });
            }
            (Strategy::CacheFirst, Some(version)) => {
                let cached = match self.controller.lookup(&request) {
                    Ok(cached) => cached,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };

                match cached {
                    Some(response) => {
                        let _ = reply.send(Ok(Served {
                            response,
                            source: ServedFrom::Cache,
                        }));
                        tokio::spawn(revalidate(network, tx, version, request));
                    }
                    None => {
                        tokio::spawn(async move {
                            let result = match network.fetch(&request).await {
                                Ok(response) => {
                                    if response.is_cacheable() {
                                        let _ = tx
                                            .send(Command::Store {
                                                version,
                                                request,
                                                response: response.clone(),
                                            })
                                            .await;
                                    }
                                    Ok(Served {
                                        response,
                                        source: ServedFrom::Network,
                                    })
                                }
                                Err(e) => Err(OfflineError::from(e)),
                            };
                            let _ = reply.send(result);
                        });
                    }
                }
            }
            _ => {
                tokio::spawn(async move {
                    let result = network
                        .fetch(&request)
                        .await
                        .map(|response| Served {
                            response,
                            source: ServedFrom::PassThrough,
                        })
                        .map_err(OfflineError::from);
                    let _ = reply.send(result);
                });
            }
        }
    }

    fn navigation_fallback(&self, request: &Request, error: FetchError) -> Result<Served, OfflineError> {
        debug!(url = %request.url, %error, "navigation offline, trying cache");
        if let Some(response) = self.controller.lookup(request)? {
            return Ok(Served {
                response,
                source: ServedFrom::Cache,
            });
        }
        if let Some(response) = self.controller.lookup_root()? {
            return Ok(Served {
                response,
                source: ServedFrom::Fallback,
            });
        }
        Err(OfflineError::Offline(request.url.to_string()))
    }
}

/// Answers every caller of one install. Errors are rebuilt per caller since
/// they do not clone.
fn reply_all(
    version: &CacheVersion,
    replies: Vec<Reply<InstallOutcome>>,
    result: Result<InstallOutcome, OfflineError>,
) {
    let mut replies = replies.into_iter();
    let Some(first) = replies.next() else {
        return;
    };
    for reply in replies {
        let echo = match &result {
            Ok(outcome) => Ok(outcome.clone()),
            Err(OfflineError::InstallSuperseded { version, by }) => Err(OfflineError::InstallSuperseded {
                version: version.clone(),
                by: by.clone(),
            }),
            Err(e) => Err(OfflineError::InstallFailed {
                version: version.clone(),
                reason: match e {
                    OfflineError::InstallFailed { reason, .. } => reason.clone(),
                    other => other.to_string(),
                },
            }),
        };
        let _ = reply.send(echo);
    }
    let _ = first.send(result);
}

/// Fetches every manifest entry concurrently. Any transport error fails the
/// whole batch; status checks happen at commit.
async fn preload<N: Network>(
    network: Arc<N>,
    requests: Vec<Request>,
) -> Result<Vec<(Request, Response)>, String> {
    let mut set = JoinSet::new();
    for (idx, request) in requests.into_iter().enumerate() {
        let network = Arc::clone(&network);
        set.spawn(async move {
            let result = network.fetch(&request).await;
            (idx, request, result)
        });
    }

    let mut fetched = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (idx, request, result) = joined.map_err(|e| e.to_string())?;
        match result {
            Ok(response) => fetched.push((idx, request, response)),
            Err(e) => {
                set.abort_all();
                return Err(format!("{}: {e}", request.url));
            }
        }
    }

    fetched.sort_by_key(|(idx, _, _)| *idx);
    Ok(fetched
        .into_iter()
        .map(|(_, request, response)| (request, response))
        .collect())
}

async fn revalidate<N: Network>(
    network: Arc<N>,
    tx: mpsc::Sender<Command>,
    version: CacheVersion,
    request: Request,
) {
    match network.fetch(&request).await {
        Ok(response) if response.is_cacheable() => {
            let _ = tx
                .send(Command::Store {
                    version,
                    request,
                    response,
                })
                .await;
        }
        Ok(response) => debug!(url = %request.url, status = %response.status, "revalidation skipped"),
        Err(e) => debug!(url = %request.url, error = %e, "revalidation failed"),
    }
}

impl ShellHandle {
    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerNotice> {
        self.notices.subscribe()
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, OfflineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| OfflineError::ServiceClosed)?;
        rx.await.map_err(|_| OfflineError::ServiceClosed)?
    }

    /// Resolves once the manifest is cached (or the install failed).
    pub async fn install(
        &self,
        version: CacheVersion,
        manifest: &[String],
    ) -> Result<InstallOutcome, OfflineError> {
        let manifest = manifest.to_vec();
        self.call(|reply| Command::Install {
            version,
            manifest,
            reply,
        })
        .await
    }

    /// Delivers a raw page message. Returns false for messages the
    /// controller does not understand.
    pub async fn post_message(&self, raw: &str) -> Result<bool, OfflineError> {
        match PageMessage::parse(raw) {
            Some(PageMessage::SkipWaiting) => {
                self.tx
                    .send(Command::SkipWaiting { reply: None })
                    .await
                    .map_err(|_| OfflineError::ServiceClosed)?;
                Ok(true)
            }
            None => {
                debug!(raw, "ignored page message");
                Ok(false)
            }
        }
    }

    pub async fn skip_waiting(&self) -> Result<Option<Activation>, OfflineError> {
        self.call(|reply| Command::SkipWaiting { reply: Some(reply) })
            .await
    }

    pub async fn activate(&self, version: CacheVersion) -> Result<Activation, OfflineError> {
        self.call(|reply| Command::Activate { version, reply }).await
    }

    pub async fn handle(&self, request: Request) -> Result<Served, OfflineError> {
        self.call(|reply| Command::Handle { request, reply }).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, OfflineError> {
        self.call(|reply| Command::Keys { reply }).await
    }

    /// Cache match in the active version, no network.
    pub async fn cached(&self, request: Request) -> Result<Option<Response>, OfflineError> {
        self.call(|reply| Command::Match { request, reply }).await
    }

    pub async fn registration(&self) -> Result<Registration, OfflineError> {
        self.call(|reply| Command::Registration { reply }).await
    }

    pub async fn entries(&self, version: CacheVersion) -> Result<Vec<EntryInfo>, OfflineError> {
        self.call(|reply| Command::Entries { version, reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::network::ScriptedNetwork;
    use crate::offline::storage::MemoryCacheStorage;
    use crate::offline::DEFAULT_MANIFEST;
    use assert_matches::assert_matches;

    fn origin() -> Url {
        Url::parse("https://resonant.example/").unwrap()
    }

    fn manifest() -> Vec<String> {
        DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect()
    }

    fn site() -> Arc<ScriptedNetwork> {
        let net = ScriptedNetwork::new(origin());
        net.serve_typed("/", "text/html", "<html>shell</html>");
        net.serve_typed("/manifest.json", "application/json", "{}");
        net.serve_typed("/icon-192.png", "image/png", "png192");
        net.serve_typed("/icon-512.png", "image/png", "png512");
        Arc::new(net)
    }

    fn spawn(net: &Arc<ScriptedNetwork>) -> ShellHandle {
        let controller = ShellController::new(MemoryCacheStorage::new(), origin()).unwrap();
        ShellService::spawn(controller, Arc::clone(net))
    }

    #[tokio::test]
    async fn test_passes_through_before_install() {
        let net = site();
        let shell = spawn(&net);

        let served = shell
            .handle(Request::get(origin().join("/icon-192.png").unwrap()))
            .await
            .unwrap();

        assert_eq!(served.source, ServedFrom::PassThrough);
        assert!(shell.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_install_announces_controller() {
        let net = site();
        let shell = spawn(&net);
        let mut notices = shell.subscribe();

        let outcome = shell.install("v1".parse().unwrap(), &manifest()).await.unwrap();

        assert_matches!(outcome, InstallOutcome::Activated(_));
        assert_eq!(
            notices.recv().await.unwrap(),
            ControllerNotice::ControllerChanged {
                previous: None,
                current: "v1".parse().unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_install_transport_failure_notifies() {
        let net = site();
        let shell = spawn(&net);
        let mut notices = shell.subscribe();
        net.set_online(false);

        let err = shell.install("v1".parse().unwrap(), &manifest()).await.unwrap_err();

        assert_matches!(err, OfflineError::InstallFailed { .. });
        assert_matches!(notices.recv().await.unwrap(), ControllerNotice::InstallFailed { .. });
        assert!(shell.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_installs_of_one_version_share_a_fetch() {
        let net = site();
        let shell = spawn(&net);
        shell.install("v1".parse().unwrap(), &manifest()).await.unwrap();
        let mut notices = shell.subscribe();

        let v2: CacheVersion = "v2".parse().unwrap();
        let (m1, m2) = (manifest(), manifest());
        let (a, b) = tokio::join!(
            shell.install(v2.clone(), &m1),
            shell.install(v2.clone(), &m2)
        );

        assert_eq!(a.unwrap(), InstallOutcome::Waiting(v2.clone()));
        assert_eq!(b.unwrap(), InstallOutcome::Waiting(v2.clone()));
        assert_eq!(net.hits("/icon-192.png"), 2);
        assert_eq!(shell.keys().await.unwrap(), vec!["v1", "v2"]);
        assert_eq!(
            notices.recv().await.unwrap(),
            ControllerNotice::UpdateReady { version: v2.clone() }
        );

        let activation = shell.skip_waiting().await.unwrap().unwrap();
        assert_eq!(activation.current, v2);
        assert_eq!(shell.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_older_install_finishing_late_is_dropped() {
        let net = site();
        let shell = spawn(&net);
        shell.install("v1".parse().unwrap(), &manifest()).await.unwrap();

        let (v2, v3): (CacheVersion, CacheVersion) = ("v2".parse().unwrap(), "v3".parse().unwrap());
        let (m1, m2) = (manifest(), manifest());
        let (older, newer) = tokio::join!(
            shell.install(v2.clone(), &m1),
            shell.install(v3.clone(), &m2)
        );

        assert_matches!(older, Err(OfflineError::InstallSuperseded { ref by, .. }) if by == &v3);
        assert_eq!(newer.unwrap(), InstallOutcome::Waiting(v3.clone()));
        assert_eq!(shell.keys().await.unwrap(), vec!["v1", "v3"]);
        assert_eq!(shell.registration().await.unwrap().waiting, Some(v3));
    }

    #[tokio::test]
    async fn test_unknown_page_message_is_ignored() {
        let shell = spawn(&site());
        assert!(!shell.post_message(r#"{"type":"CLAIM"}"#).await.unwrap());
        assert!(shell.post_message(r#""skipWaiting""#).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_miss_is_fetched_and_stored() {
        let net = site();
        net.serve_typed("/app.js", "text/javascript", "js");
        let shell = spawn(&net);
        shell.install("v1".parse().unwrap(), &manifest()).await.unwrap();

        let req = Request::get(origin().join("/app.js").unwrap());
        let served = shell.handle(req.clone()).await.unwrap();
        assert_eq!(served.source, ServedFrom::Network);

        let cached = shell.cached(req).await.unwrap().unwrap();
        assert_eq!(cached.text(), "js");
    }
}
