use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use http::{Request, Uri};
use http_body_util::Full;
use log::{debug, error, info, warn};
use tokio::time::Instant;

use ghostline_lb::{
    HealthPolicy, HealthState, HealthTable, HealthTransition, Verdict, WeightedSelector,
};
use ghostline_transport::Transport;

use crate::error::AgentError;

/// Retry and health policy. The agent applies no defaults of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Failure-counted attempts per dispatch; `0` behaves like `1`.
    pub max_try: u32,
    /// Consecutive failures before a backend is taken out of rotation.
    pub max_fails: u32,
    /// How long a backend stays out before it may be probed.
    pub fail_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    host: String,
    port: u16,
    index: usize,
    authority: String,
}

impl Backend {
    fn new(host: String, port: u16, index: usize) -> Self {
        let bare = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(&host);
        let authority = if bare.contains(':') {
            format!("[{bare}]:{port}")
        } else {
            format!("{bare}:{port}")
        };

        Self {
            host,
            port,
            index,
            authority,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Position of this backend's entry in the health table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// `host:port`, with IPv6 hosts bracketed exactly once.
    pub fn authority(&self) -> &str {
        &self.authority
    }
}

pub struct FailoverAgent<T> {
    config: AgentConfig,
    transport: T,
    selector: WeightedSelector<Arc<Backend>>,
    health: Mutex<HealthTable>,
}

impl<T: Transport> FailoverAgent<T> {
    pub fn new(transport: T, config: AgentConfig) -> Self {
        let policy = HealthPolicy {
            max_fails: config.max_fails,
            cooldown: config.fail_timeout,
        };

        Self {
            config,
            transport,
            selector: WeightedSelector::new(),
            health: Mutex::new(HealthTable::new(policy)),
        }
    }

    /// Adds a backend to the rotation. Only a negative weight is refused.
    ///
    /// Meant for setup; registering while traffic flows restarts the
    /// weighted sequence for every caller.
    pub fn register(&self, host: impl Into<String>, port: u16, weight: i64) -> bool {
        // held across both steps so the selector never hands out an index
        // the health table does not have yet
        let mut health = self.lock_health();
        let backend = Arc::new(Backend::new(host.into(), port, health.len()));

        if !self.selector.register(backend.clone(), weight) {
            warn!(
                "Rejected backend {} with negative weight {}",
                backend.authority(),
                weight
            );
            return false;
        }

        let index = health.push();
        info!(
            "Registered backend {} (weight {}, index {})",
            backend.authority(),
            weight,
            index
        );
        true
    }

    pub fn len(&self) -> usize {
        self.selector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selector.is_empty()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Copy of the health entry for the backend registered at `index`.
    pub fn health(&self, index: usize) -> Option<HealthState> {
        self.lock_health().get(index)
    }

    /// Sends `request` to the next suitable backend, failing over until the
    /// request succeeds or the retry budget is spent.
    ///
    /// Only the path and query of the request URI are kept; scheme and
    /// authority are replaced for every attempt. The body is cloned per
    /// attempt, which is why it must be a buffered `Full<Bytes>`.
    pub async fn dispatch(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<T::Response, AgentError<T::Error>> {
        let mut attempt: u32 = 0;
        // backends passed over since the last failure-counted attempt
        let mut stalled: HashSet<usize> = HashSet::new();
        let mut last_error: Option<AgentError<T::Error>> = None;

        loop {
            let Some(backend) = self.selector.next() else {
                error!("No backend registered or all weights are zero");
                return Err(AgentError::NoBackend);
            };

            let now = Instant::now().into_std();
            let verdict = self
                .lock_health()
                .verdict(backend.index, now)
                .unwrap_or(Verdict::Send);

            match verdict {
                Verdict::Send => {
                    stalled.clear();

                    match self.send_to(&request, &backend).await {
                        Ok(response) => return Ok(response),
                        Err(err) => {
                            self.mark_failure(&backend);
                            attempt += 1;
                            if attempt >= self.config.max_try {
                                error!(
                                    "Giving up after {} attempt(s), last backend {}: {}",
                                    attempt,
                                    backend.authority(),
                                    err
                                );
                                return Err(err);
                            }

                            warn!(
                                "Attempt {}/{} to {} failed: {}",
                                attempt,
                                self.config.max_try,
                                backend.authority(),
                                err
                            );
                            last_error = Some(err);
                            continue;
                        }
                    }
                }
                Verdict::Skip => {
                    debug!("Skipping backend {}: cooling down", backend.authority());
                }
                Verdict::Probe => {
                    info!("Probing backend {}", backend.authority());

                    match self.send_to(&request, &backend).await {
                        Ok(response) => {
                            self.mark_success(&backend);
                            return Ok(response);
                        }
                        Err(err) => {
                            warn!("Probe to {} failed: {}", backend.authority(), err);
                            self.mark_failure(&backend);
                            last_error = Some(err);
                        }
                    }
                }
            }

            stalled.insert(backend.index);
            if stalled.len() >= self.selector.selectable() {
                return Err(match last_error {
                    Some(err) => {
                        error!("Every backend is down, last failure: {}", err);
                        err
                    }
                    None => {
                        error!("Every backend is down and cooling off");
                        AgentError::Unavailable
                    }
                });
            }
        }
    }

    /// One attempt against `backend`. A target that cannot be addressed is
    /// that backend's failure, the same as a refused connection.
    async fn send_to(
        &self,
        request: &Request<Full<Bytes>>,
        backend: &Backend,
    ) -> Result<T::Response, AgentError<T::Error>> {
        let req = retarget(request, backend).map_err(AgentError::InvalidTarget)?;
        self.transport.send(req).await.map_err(AgentError::Transport)
    }

    fn mark_success(&self, backend: &Backend) {
        let transition = self.lock_health().mark_success(backend.index);
        log_transition(backend, transition);
    }

    fn mark_failure(&self, backend: &Backend) {
        let now = Instant::now().into_std();
        let transition = self.lock_health().mark_failure(backend.index, now);
        log_transition(backend, transition);
    }

    fn lock_health(&self) -> MutexGuard<'_, HealthTable> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_transition(backend: &Backend, transition: Option<HealthTransition>) {
    match transition {
        Some(HealthTransition::BecameHealthy) => {
            info!("Backend {} became healthy", backend.authority());
        }
        Some(HealthTransition::BecameUnhealthy) => {
            error!("Backend {} became unhealthy", backend.authority());
        }
        None => {}
    }
}

/// Copies `request` onto `backend`, keeping method, version, path, query,
/// headers and body.
fn retarget(
    request: &Request<Full<Bytes>>,
    backend: &Backend,
) -> Result<Request<Full<Bytes>>, http::Error> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri = Uri::builder()
        .scheme("http")
        .authority(backend.authority())
        .path_and_query(path)
        .build()?;

    let mut req = Request::builder()
        .method(request.method().clone())
        .version(request.version())
        .uri(uri)
        .body(request.body().clone())?;
    *req.headers_mut() = request.headers().clone();

    Ok(req)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use http_body_util::BodyExt;

    use super::*;

    #[derive(Debug)]
    struct Refused(u16);

    impl std::fmt::Display for Refused {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "connection refused on port {}", self.0)
        }
    }

    impl std::error::Error for Refused {}

    /// Answers with the port it was sent to, unless that port is down.
    #[derive(Default)]
    struct ScriptedTransport {
        down: Mutex<HashSet<u16>>,
        sent: Mutex<Vec<u16>>,
    }

    impl ScriptedTransport {
        fn set_down(&self, port: u16, down: bool) {
            let mut ports = self.down.lock().unwrap();
            if down {
                ports.insert(port);
            } else {
                ports.remove(&port);
            }
        }

        fn sent(&self) -> Vec<u16> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        type Response = u16;
        type Error = Refused;

        async fn send(&self, req: Request<Full<Bytes>>) -> Result<u16, Refused> {
            let port = req.uri().port_u16().unwrap_or(80);
            self.sent.lock().unwrap().push(port);
            if self.down.lock().unwrap().contains(&port) {
                Err(Refused(port))
            } else {
                Ok(port)
            }
        }
    }

    const COOLDOWN: Duration = Duration::from_secs(10);

    fn agent(max_try: u32, max_fails: u32) -> FailoverAgent<ScriptedTransport> {
        FailoverAgent::new(
            ScriptedTransport::default(),
            AgentConfig {
                max_try,
                max_fails,
                fail_timeout: COOLDOWN,
            },
        )
    }

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn empty_pool_fails_fast() {
        let agent = agent(3, 3);
        assert!(agent.is_empty());
        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::NoBackend)
        ));
    }

    #[tokio::test]
    async fn zero_weights_fail_fast() {
        let agent = agent(3, 3);
        assert!(agent.register("127.0.0.1", 8001, 0));
        assert!(agent.register("127.0.0.1", 8002, 0));

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::NoBackend)
        ));
        assert!(agent.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn negative_weight_creates_no_entry() {
        let agent = agent(3, 3);
        assert!(!agent.register("127.0.0.1", 8001, -1));
        assert!(agent.health(0).is_none());

        assert!(agent.register("127.0.0.1", 8002, 1));
        assert_eq!(agent.len(), 1);
        assert!(agent.health(0).is_some());
        assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8002);
    }

    #[tokio::test]
    async fn dispatch_follows_weighted_sequence() {
        let agent = agent(3, 3);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.register("127.0.0.1", 8003, 2);

        for _ in 0..8 {
            agent.dispatch(get("/")).await.unwrap();
        }
        assert_eq!(
            agent.transport.sent(),
            vec![8003, 8001, 8002, 8003, 8003, 8001, 8002, 8003]
        );
    }

    #[tokio::test]
    async fn backend_goes_down_at_threshold() {
        let agent = agent(3, 3);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8002, true);

        // 8001 first, then every dispatch tries 8002 before falling back
        for failures in [0, 1, 2] {
            assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);
            let state = agent.health(1).unwrap();
            assert_eq!(state.consecutive_failures(), failures);
            assert!(!state.is_down());
        }

        assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);
        let state = agent.health(1).unwrap();
        assert!(state.is_down());
        assert_eq!(state.consecutive_failures(), 3);
        assert!(!agent.health(0).unwrap().is_down());
    }

    #[tokio::test(start_paused = true)]
    async fn down_backend_is_left_alone_until_cooldown() {
        let agent = agent(3, 1);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8002, true);

        agent.dispatch(get("/")).await.unwrap();
        agent.dispatch(get("/")).await.unwrap();
        assert!(agent.health(1).unwrap().is_down());
        let before = agent.transport.sent().len();

        tokio::time::advance(COOLDOWN - Duration::from_millis(1)).await;
        for _ in 0..10 {
            assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);
        }

        let sent = agent.transport.sent();
        assert!(sent[before..].iter().all(|port| *port == 8001));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_cooldown_recovers_backend() {
        let agent = agent(3, 1);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8002, true);

        agent.dispatch(get("/")).await.unwrap();
        agent.dispatch(get("/")).await.unwrap();
        assert!(agent.health(1).unwrap().is_down());

        tokio::time::advance(COOLDOWN).await;
        agent.transport.set_down(8002, false);

        // the sequence alternates, so 8002 comes up within two dispatches
        let mut ports = Vec::new();
        for _ in 0..2 {
            ports.push(agent.dispatch(get("/")).await.unwrap());
        }
        assert!(ports.contains(&8002));

        let state = agent.health(1).unwrap();
        assert!(!state.is_down());
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_does_not_extend_cooldown() {
        let agent = agent(3, 1);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8002, true);

        agent.dispatch(get("/")).await.unwrap();
        agent.dispatch(get("/")).await.unwrap();
        let retry_at = agent.health(1).unwrap().retry_at();

        tokio::time::advance(COOLDOWN).await;
        for _ in 0..4 {
            // probes are free: 8001 still answers every dispatch
            assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);
        }

        let state = agent.health(1).unwrap();
        assert!(state.is_down());
        assert_eq!(state.retry_at(), retry_at);
        assert_eq!(state.consecutive_failures(), 5);
        let probes = agent.transport.sent().iter().filter(|p| **p == 8002).count();
        assert_eq!(probes, 5);
    }

    #[tokio::test]
    async fn retry_budget_bounds_attempts() {
        let agent = agent(3, 10);
        agent.register("127.0.0.1", 8001, 1);
        agent.transport.set_down(8001, true);

        let err = agent.dispatch(get("/")).await.unwrap_err();
        let Some(Refused(port)) = err.into_transport() else {
            panic!("expected a transport error");
        };
        assert_eq!(port, 8001);
        assert_eq!(agent.transport.sent(), vec![8001, 8001, 8001]);
        assert_eq!(agent.health(0).unwrap().consecutive_failures(), 3);
    }

    #[tokio::test]
    async fn zero_max_try_still_sends_once() {
        let agent = agent(0, 10);
        agent.register("127.0.0.1", 8001, 1);
        agent.transport.set_down(8001, true);

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Transport(Refused(8001)))
        ));
        assert_eq!(agent.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn fails_over_to_next_backend() {
        let agent = agent(3, 10);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8001, true);

        assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8002);
        assert_eq!(agent.transport.sent(), vec![8001, 8002]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_down_pool_is_unavailable() {
        let agent = agent(2, 1);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8001, true);
        agent.transport.set_down(8002, true);

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Transport(Refused(8002)))
        ));
        assert!(agent.health(0).unwrap().is_down());
        assert!(agent.health(1).unwrap().is_down());

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Unavailable)
        ));
        assert_eq!(agent.transport.sent().len(), 2);

        // once cooled off, every backend is probed once before giving up
        tokio::time::advance(COOLDOWN).await;
        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Transport(Refused(_)))
        ));
        assert_eq!(agent.transport.sent().len(), 4);
    }

    #[tokio::test]
    async fn healthy_success_keeps_partial_failures() {
        let agent = agent(3, 3);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);

        agent.transport.set_down(8001, true);
        assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8002);
        agent.transport.set_down(8001, false);
        assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);

        assert_eq!(agent.health(0).unwrap().consecutive_failures(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_keeps_weights() {
        let agent = Arc::new(agent(3, 3));
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.register("127.0.0.1", 8003, 2);

        let mut handles = Vec::new();
        for _ in 0..40 {
            let agent = agent.clone();
            handles.push(tokio::spawn(async move { agent.dispatch(get("/")).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let mut counts: HashMap<u16, usize> = HashMap::new();
        for port in agent.transport.sent() {
            *counts.entry(port).or_insert(0) += 1;
        }
        assert_eq!(counts[&8001], 10);
        assert_eq!(counts[&8002], 10);
        assert_eq!(counts[&8003], 20);
    }

    #[tokio::test]
    async fn retarget_keeps_request_intact() {
        let backend = Backend::new("10.0.0.7".to_string(), 9000, 0);
        let request = Request::builder()
            .method("POST")
            .uri("/api/items?limit=5")
            .header("x-trace", "abc")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();

        let req = retarget(&request, &backend).unwrap();
        assert_eq!(req.method(), "POST");
        assert_eq!(req.uri(), "http://10.0.0.7:9000/api/items?limit=5");
        assert_eq!(req.headers()["x-trace"], "abc");

        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"payload");
        // the original stays usable for the next attempt
        assert_eq!(request.uri(), "/api/items?limit=5");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let backend = Backend::new("::1".to_string(), 8080, 0);
        assert_eq!(backend.authority(), "[::1]:8080");

        let req = retarget(&get("/"), &backend).unwrap();
        assert_eq!(req.uri(), "http://[::1]:8080/");
    }

    #[test]
    fn bracketed_ipv6_host_is_not_bracketed_twice() {
        let backend = Backend::new("[::1]".to_string(), 8080, 0);
        assert_eq!(backend.host(), "[::1]");
        assert_eq!(backend.authority(), "[::1]:8080");

        let req = retarget(&get("/"), &backend).unwrap();
        assert_eq!(req.uri(), "http://[::1]:8080/");
    }

    #[test]
    fn invalid_host_is_rejected() {
        let backend = Backend::new("bad host".to_string(), 8080, 0);
        assert!(retarget(&get("/"), &backend).is_err());
    }

    #[tokio::test]
    async fn unaddressable_backend_is_taken_out_of_rotation() {
        let agent = agent(3, 1);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("bad host", 8002, 1);

        for _ in 0..6 {
            assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);
        }

        let state = agent.health(1).unwrap();
        assert!(state.is_down());
        assert_eq!(state.consecutive_failures(), 1);
        assert!(!agent.health(0).unwrap().is_down());
        assert!(agent.transport.sent().iter().all(|port| *port == 8001));
    }

    #[tokio::test]
    async fn unaddressable_pool_reports_invalid_target() {
        let agent = agent(2, 5);
        agent.register("bad host", 8001, 1);

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::InvalidTarget(_))
        ));
        assert_eq!(agent.health(0).unwrap().consecutive_failures(), 2);
        assert!(agent.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_attempts_do_not_spend_budget() {
        let agent = agent(3, 4);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);

        // 8001 keeps answering while 8002 fails its way out of rotation
        agent.transport.set_down(8002, true);
        for _ in 0..5 {
            assert_eq!(agent.dispatch(get("/")).await.unwrap(), 8001);
        }
        assert!(agent.health(1).unwrap().is_down());
        assert!(!agent.health(0).unwrap().is_down());
        assert_eq!(agent.health(0).unwrap().consecutive_failures(), 0);

        tokio::time::advance(COOLDOWN).await;
        agent.transport.set_down(8001, true);
        let before = agent.transport.sent().len();

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Transport(Refused(8001)))
        ));
        assert_eq!(
            agent.transport.sent()[before..].to_vec(),
            vec![8002, 8001, 8002, 8001, 8002, 8001]
        );
        assert_eq!(agent.health(0).unwrap().consecutive_failures(), 3);
        assert!(!agent.health(0).unwrap().is_down());
    }

    #[tokio::test]
    async fn pool_going_down_mid_dispatch_reports_last_failure() {
        let agent = agent(5, 1);
        agent.register("127.0.0.1", 8001, 1);
        agent.register("127.0.0.1", 8002, 1);
        agent.transport.set_down(8001, true);
        agent.transport.set_down(8002, true);

        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Transport(Refused(8002)))
        ));
        assert_eq!(agent.transport.sent(), vec![8001, 8002]);

        // nothing was sent this time, so there is no failure to report
        assert!(matches!(
            agent.dispatch(get("/")).await,
            Err(AgentError::Unavailable)
        ));
        assert_eq!(agent.transport.sent().len(), 2);
    }
}
