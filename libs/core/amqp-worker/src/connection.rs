//! Connection management: one broker connection per process, revived with
//! bounded retry when the broker drops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lapin::options::BasicCancelOptions;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::AmqpConfig;
use crate::error::{is_already_closing, AmqpError};

/// Redial attempts after an unexpected connection loss.
const REDIAL_ATTEMPTS: usize = 5;
/// Fixed delay between redial attempts.
const REDIAL_DELAY: Duration = Duration::from_secs(5);
/// AMQP reply code for a clean close.
const REPLY_SUCCESS: u16 = 200;

/// Owns the process-wide broker connection.
///
/// On an unexpected close the manager redials up to [`REDIAL_ATTEMPTS`]
/// times, [`REDIAL_DELAY`] apart, then terminates the process: a worker
/// that cannot reach its broker is worth less than a restart.
pub struct ConnectionManager {
    uri: String,
    conn: RwLock<Option<Connection>>,
    lost_tx: mpsc::UnboundedSender<lapin::Error>,
    rebind_tx: broadcast::Sender<()>,
    // Serializes channel opens across consumers and producers.
    channel_gate: Mutex<()>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Dials the broker once and installs the close watcher.
    ///
    /// The initial dial is not retried; a broker that is down at startup
    /// surfaces as an error to the caller.
    pub async fn dial(config: &AmqpConfig) -> Result<Arc<Self>, AmqpError> {
        if config.host.is_empty() {
            return Err(AmqpError::MissingConfig);
        }

        let uri = config.uri();
        let conn = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(AmqpError::Dial)?;
        info!(host = %config.host, port = config.port, vhost = %config.vhost, "broker connected");

        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let (rebind_tx, _) = broadcast::channel(16);

        Self::watch_close(&conn, &lost_tx);

        let manager = Arc::new(Self {
            uri,
            conn: RwLock::new(Some(conn)),
            lost_tx,
            rebind_tx,
            channel_gate: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&manager).run_recovery(lost_rx));

        Ok(manager)
    }

    fn watch_close(conn: &Connection, lost_tx: &mpsc::UnboundedSender<lapin::Error>) {
        let tx = lost_tx.clone();
        conn.on_error(move |err| {
            let _ = tx.send(err);
        });
    }

    async fn run_recovery(self: Arc<Self>, mut lost_rx: mpsc::UnboundedReceiver<lapin::Error>) {
        while let Some(err) = lost_rx.recv().await {
            if self.closed.load(Ordering::SeqCst) {
                debug!(error = %err, "connection closed during shutdown");
                return;
            }
            error!(error = %err, "broker connection lost");
            self.redial().await;
        }
    }

    /// Bounded redial loop. Returns once reconnected; exits the process
    /// when every attempt fails.
    async fn redial(&self) {
        for attempt in 1..=REDIAL_ATTEMPTS {
            info!(attempt, delay = ?REDIAL_DELAY, "redialing broker");
            tokio::time::sleep(REDIAL_DELAY).await;

            match Connection::connect(&self.uri, ConnectionProperties::default()).await {
                Ok(conn) => {
                    Self::watch_close(&conn, &self.lost_tx);
                    *self.conn.write().await = Some(conn);
                    // Wake everything holding a channel off the old connection.
                    let _ = self.rebind_tx.send(());
                    info!(attempt, "broker connection re-established");
                    return;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "redial failed");
                }
            }
        }

        error!(
            attempts = REDIAL_ATTEMPTS,
            "broker unreachable after every redial attempt, terminating"
        );
        std::process::exit(1);
    }

    /// Opens a channel on the live connection.
    pub async fn create_channel(&self) -> Result<Channel, AmqpError> {
        let _gate = self.channel_gate.lock().await;
        let guard = self.conn.read().await;
        let conn = guard.as_ref().ok_or(AmqpError::NotConnected)?;
        conn.create_channel().await.map_err(AmqpError::Channel)
    }

    /// A receiver signalled every time the connection is replaced.
    pub fn subscribe_rebind(&self) -> broadcast::Receiver<()> {
        self.rebind_tx.subscribe()
    }

    /// Closes the connection. The broker's 504 "already closing" reply is
    /// treated as success.
    pub async fn shutdown(&self) -> Result<(), AmqpError> {
        self.closed.store(true, Ordering::SeqCst);
        let conn = self.conn.write().await.take();
        let Some(conn) = conn else {
            return Ok(());
        };

        match conn.close(REPLY_SUCCESS, "shutdown").await {
            Ok(()) => {}
            Err(err) if is_already_closing(&err) => {
                debug!("broker was already closing the connection");
            }
            Err(err) => return Err(AmqpError::CloseConnection(err)),
        }
        info!("broker connection closed");
        Ok(())
    }
}

/// Cancels a consumer tag and closes its channel, tolerating the broker's
/// 504 reply on cancel and a channel that is already gone on close.
pub(crate) async fn shutdown_channel(channel: &Channel, tag: &str) -> Result<(), AmqpError> {
    match channel.basic_cancel(tag, BasicCancelOptions::default()).await {
        Ok(()) => {}
        Err(err) if is_already_closing(&err) => {
            debug!(tag, "broker was already cancelling the consumer");
        }
        Err(err) => return Err(AmqpError::cancel(tag, err)),
    }

    match channel.close(REPLY_SUCCESS, "shutdown").await {
        Ok(()) => Ok(()),
        Err(err) if is_already_closing(&err) => Ok(()),
        Err(lapin::Error::InvalidChannelState(_)) => {
            debug!(tag, "channel already closed");
            Ok(())
        }
        Err(err) => Err(AmqpError::CloseChannel(err)),
    }
}
