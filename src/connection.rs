// MIT License - Copyright (c) 2026 Peter Wright
// Connection lifecycle and reconnect supervisor

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::codec::Classifier;
use crate::config::ClientConfig;
use crate::dispatcher::{drain, DispatchExit, Dispatcher, PendingCommand};
use crate::error::{Result, WattBoxError};
use crate::event::{event_channel, ClientEvent, EventReceiver, EventSender};
use crate::models::UnsolicitedMessage;
use crate::protocol::{Command, Reply};
use crate::retry::RetryState;
use crate::transport::{connector_for, Connector, Session};

/// Extra time a caller waits past its deadline for the worker's verdict.
const REPLY_GRACE: Duration = Duration::from_millis(50);

/// How long `!Exit` may take when closing.
const EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    /// Logged in and serving commands
    Ready,
    /// A command timed out; the session is being replaced
    Degraded,
    /// Waiting out the backoff before the next attempt
    Reconnecting,
    /// Gave up: credentials rejected or attempts exhausted
    Failed,
    /// Closed by the user
    Closed,
}

impl ConnectionState {
    /// No further transitions happen from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus change notifications on the event channel.
#[derive(Debug, Clone)]
pub(crate) struct StateTracker {
    tx: Arc<watch::Sender<ConnectionState>>,
    events: EventSender,
}

impl StateTracker {
    pub(crate) fn new(events: EventSender) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx: Arc::new(tx),
            events,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, to: ConnectionState) {
        let from = self.tx.send_replace(to);
        if from != to {
            debug!("Connection state {} -> {}", from, to);
            let _ = self.events.send(ClientEvent::StateChanged { from, to });
        }
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// Why a connection stopped for good. Kept so later callers get the
/// original reason rather than a bare state.
#[derive(Debug, Clone)]
enum Failure {
    Auth { attempts: u32 },
    Tls(String),
    Exhausted { addr: String, reason: String },
}

impl Failure {
    fn to_error(&self) -> WattBoxError {
        match self {
            Failure::Auth { attempts } => WattBoxError::Auth {
                attempts: *attempts,
            },
            Failure::Tls(msg) => WattBoxError::Tls(msg.clone()),
            Failure::Exhausted { addr, reason } => WattBoxError::Connect {
                addr: addr.clone(),
                source: std::io::Error::other(reason.clone()),
            },
        }
    }
}

struct Shared {
    state: StateTracker,
    events: EventSender,
    failure: RwLock<Option<Failure>>,
}

impl Shared {
    async fn error_for(&self, state: ConnectionState) -> WattBoxError {
        if state == ConnectionState::Failed
            && let Some(failure) = self.failure.read().await.as_ref()
        {
            return failure.to_error();
        }
        WattBoxError::NotReady { state }
    }
}

struct Inner {
    config: ClientConfig,
    shared: Arc<Shared>,
    requests: mpsc::Sender<PendingCommand>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to one logical device session.
///
/// Cheap to clone; every clone shares the same socket, request queue and
/// supervisor. Commands issued concurrently are sent one at a time in the
/// order they were submitted. The connection re-establishes itself after
/// transport faults; commands queued meanwhile are sent once it is back.
///
/// # Example
///
/// ```no_run
/// use wattbox_client::{ClientConfig, Connection};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ClientConfig::builder()
///         .host("192.168.1.50")
///         .credentials("wattbox", "wattbox")
///         .build();
///
///     let conn = Connection::connect(config).await?;
///     let states = conn.query("OutletStatus", &[]).await?;
///     println!("outlets: {:?}", states);
///
///     conn.control("OutletSet", &["3", "RESET"]).await?;
///     conn.close().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect and wait (up to `connect_timeout`) until logged in.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let connector = connector_for(&config)?;
        Self::connect_with_connector(config, connector).await
    }

    /// Like [`Connection::connect`], with a custom stream source.
    pub async fn connect_with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let wait = config.connect_timeout;
        let conn = Self::spawn_with_connector(config, connector);
        if let Err(e) = conn.ensure_ready(wait).await {
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }

    /// Start the connection in the background without waiting for it.
    pub fn spawn(config: ClientConfig) -> Result<Self> {
        let connector = connector_for(&config)?;
        Ok(Self::spawn_with_connector(config, connector))
    }

    pub fn spawn_with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = event_channel(config.event_capacity);
        let shared = Arc::new(Shared {
            state: StateTracker::new(events.clone()),
            events,
            failure: RwLock::new(None),
        });
        let (requests, rx) = mpsc::channel(config.queue_capacity.max(1));
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            config: config.clone(),
            connector,
            shared: shared.clone(),
            requests: rx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(supervisor.run());

        Self {
            inner: Arc::new(Inner {
                config,
                shared,
                requests,
                cancel,
                supervisor: Mutex::new(Some(handle)),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state.get()
    }

    /// Watch the lifecycle state.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.watch()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.shared.events.subscribe()
    }

    /// Call `callback` for every unsolicited message until the returned
    /// guard is dropped.
    pub fn on_unsolicited<F>(&self, callback: F) -> CallbackGuard
    where
        F: Fn(UnsolicitedMessage) + Send + 'static,
    {
        let mut events = self.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Unsolicited(msg)) => callback(msg),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Unsolicited callback lagged, {} event(s) dropped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        CallbackGuard { handle }
    }

    /// Wait until the connection is `Ready`.
    ///
    /// Fails with the terminal error if the connection has failed, or with
    /// `NotReady` if it is not ready within `wait`.
    pub async fn ensure_ready(&self, wait: Duration) -> Result<()> {
        let mut rx = self.state_changes();
        let outcome = timeout(wait, async {
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    ConnectionState::Ready => return Ok(()),
                    s if s.is_terminal() => return Err(self.inner.shared.error_for(s).await),
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(WattBoxError::Closed);
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(WattBoxError::NotReady {
                state: self.state(),
            }),
        }
    }

    /// Send a command with its default timeout.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        let wait = command
            .default_timeout()
            .unwrap_or(self.inner.config.command_timeout);
        self.execute_with_timeout(command, wait).await
    }

    /// Send a command and wait for its reply, at most `wait` from now.
    ///
    /// Dropping the returned future before the command is sent removes it
    /// from the queue; once sent, its reply is read and discarded.
    pub async fn execute_with_timeout(&self, command: Command, wait: Duration) -> Result<Reply> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.inner.shared.error_for(state).await);
        }

        let (pending, reply) = PendingCommand::new(&command, wait)?;
        let deadline = pending.deadline;
        let label = pending.label.clone();

        match timeout_at(deadline, self.inner.requests.send(pending)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(self.inner.shared.error_for(self.state()).await),
            Err(_) => return Err(self.not_answered(label)),
        }

        match timeout_at(deadline + REPLY_GRACE, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.inner.shared.error_for(self.state()).await),
            Err(_) => Err(self.not_answered(label)),
        }
    }

    fn not_answered(&self, command: String) -> WattBoxError {
        match self.state() {
            ConnectionState::Ready | ConnectionState::Degraded => {
                WattBoxError::Timeout { command }
            }
            state => WattBoxError::NotReady { state },
        }
    }

    /// `?Name[=args]` and return the response fields.
    pub async fn query(&self, name: &str, args: &[&str]) -> Result<Vec<String>> {
        let command = Command::query(name, args.iter().map(|a| a.to_string()).collect());
        Ok(self.execute(command).await?.into_values())
    }

    /// `!Name[=args]` and wait for `OK`.
    pub async fn control(&self, name: &str, args: &[&str]) -> Result<()> {
        let command = Command::control(name, args.iter().map(|a| a.to_string()).collect());
        self.execute(command).await?;
        Ok(())
    }

    /// End the session (sending `!Exit` if logged in) and stop reconnecting.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.supervisor.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Connection supervisor panicked: {}", e);
        }
    }
}

/// Stops an [`Connection::on_unsolicited`] callback when dropped.
pub struct CallbackGuard {
    handle: JoinHandle<()>,
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Owns the request queue and drives connect → login → dispatch → reconnect.
struct Supervisor {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    requests: mpsc::Receiver<PendingCommand>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let state = self.shared.state.clone();
        let mut retry = RetryState::new(
            self.config.reconnect_base_delay,
            self.config.max_reconnect_backoff,
            self.config.max_connect_attempts,
        );
        let mut auth = Authenticator::new(
            self.config.auth.clone(),
            self.config.username.clone(),
            self.config.password.clone(),
        );
        let classifier = Classifier::new(
            self.config
                .auth
                .login_prompts
                .iter()
                .chain(&self.config.auth.password_prompts),
        );
        let target = self.connector.describe();

        let failure = loop {
            state.set(ConnectionState::Connecting);
            info!("Connecting to {}", target);

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                opened = self.open_session(&mut auth) => opened,
            };

            match opened {
                Ok(mut session) => {
                    retry.reset();
                    state.set(ConnectionState::Ready);
                    info!("Connection to {} established", target);

                    let exit = Dispatcher::new(&mut session, &classifier, &state, &self.shared.events)
                        .run(&mut self.requests, &self.cancel)
                        .await;
                    match exit {
                        DispatchExit::Shutdown => {
                            graceful_exit(&mut session).await;
                            break None;
                        }
                        DispatchExit::Degraded(reason) => {
                            warn!("Replacing session to {}: {}", target, reason);
                            let _ = self.shared.events.send(ClientEvent::Fault(reason));
                        }
                        DispatchExit::Fault(reason) => {
                            warn!("Session to {} ended: {}", target, reason);
                            state.set(ConnectionState::Disconnected);
                            let _ = self.shared.events.send(ClientEvent::Fault(reason));
                        }
                    }
                    session.shutdown().await;
                }
                Err(e) => {
                    let _ = self.shared.events.send(ClientEvent::Fault(e.to_string()));
                    match e {
                        WattBoxError::Auth { attempts } => {
                            error!("Login to {} rejected, giving up", target);
                            break Some(Failure::Auth { attempts });
                        }
                        WattBoxError::Tls(msg) => {
                            error!("TLS failure connecting to {}: {}", target, msg);
                            break Some(Failure::Tls(msg));
                        }
                        e => warn!("Connection attempt to {} failed: {}", target, e),
                    }
                }
            }

            let Some(delay) = retry.record_failure() else {
                error!(
                    "Giving up on {} after {} attempt(s)",
                    target,
                    retry.failures()
                );
                break Some(Failure::Exhausted {
                    addr: target.clone(),
                    reason: format!("{} consecutive attempts failed", retry.failures()),
                });
            };

            state.set(ConnectionState::Reconnecting);
            info!("Reconnecting to {} in {:.1}s", target, delay.as_secs_f64());
            let _ = self.shared.events.send(ClientEvent::Reconnecting {
                attempt: retry.failures(),
                delay,
            });
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                _ = sleep(delay) => {}
            }
        };

        match failure {
            Some(failure) => {
                *self.shared.failure.write().await = Some(failure.clone());
                state.set(ConnectionState::Failed);
                drain(&mut self.requests, || failure.to_error());
            }
            None => {
                state.set(ConnectionState::Closed);
                info!("Connection to {} closed", target);
                drain(&mut self.requests, || WattBoxError::NotReady {
                    state: ConnectionState::Closed,
                });
            }
        }
    }

    /// Open a stream and log in.
    async fn open_session(&self, auth: &mut Authenticator) -> Result<Session> {
        let stream = self.connector.connect().await?;
        let mut session = Session::new(stream, self.connector.describe());
        self.shared.state.set(ConnectionState::Authenticating);
        match auth.authenticate(&mut session).await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }
}

/// Send `!Exit` and give the device a moment to acknowledge or hang up.
async fn graceful_exit(session: &mut Session) {
    debug!("Sending !Exit to {}", session.peer());
    let deadline = Instant::now() + EXIT_TIMEOUT;
    if let Ok(line) = Command::Exit.encode() {
        match timeout_at(deadline, session.write_line(&line)).await {
            Ok(Ok(())) => {
                // Whatever comes back (OK, a goodbye, EOF) ends the exchange.
                let _ = session.read_line(deadline).await;
            }
            Ok(Err(e)) => debug!("!Exit not sent: {}", e),
            Err(_) => debug!("!Exit write timed out"),
        }
    }
    session.shutdown().await;
}
