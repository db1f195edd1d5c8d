//! Game server lifecycle and the global tick loop
//!
//! `GameServer` is the handle the transport talks to. Events travel over an
//! unbounded channel into a single task that owns the `Dispatcher`, so every
//! message and every tick runs on the same execution context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::game::ConnId;
use crate::ws::protocol::ClientMsg;

use super::service::{DispatchEvent, Dispatcher, Outbox, RegistryStats};

/// Errors surfaced to the transport
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Game server is not running")]
    NotRunning,
    #[error("Dispatcher task failed; the game server cannot be restarted")]
    Failed,
}

/// Where the dispatcher lives while the server is started or stopped
enum Lifecycle {
    Stopped {
        dispatcher: Dispatcher,
        events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    },
    Running {
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<(Dispatcher, mpsc::UnboundedReceiver<DispatchEvent>)>,
    },
    /// The loop task panicked and took the dispatcher with it. Terminal.
    Poisoned,
}

/// Handle to the dispatcher task
pub struct GameServer {
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
    running: Arc<AtomicBool>,
    tick_period: Duration,
    stats: Arc<RegistryStats>,
    lifecycle: Mutex<Lifecycle>,
}

impl GameServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tick_period = Duration::from_secs_f64(dispatcher.config().tick_interval_ms() / 1000.0);
        let stats = dispatcher.stats();

        Self {
            events_tx,
            running: Arc::new(AtomicBool::new(false)),
            tick_period,
            stats,
            lifecycle: Mutex::new(Lifecycle::Stopped {
                dispatcher,
                events_rx,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Start accepting connections and ticking. No-op if already started.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match &*lifecycle {
            Lifecycle::Stopped { .. } => {}
            Lifecycle::Running { .. } => return Ok(()),
            Lifecycle::Poisoned => {
                error!("GameServer cannot start, dispatcher task previously failed");
                return Err(ServerError::Failed);
            }
        }
        let Lifecycle::Stopped {
            mut dispatcher,
            events_rx,
        } = std::mem::replace(&mut *lifecycle, Lifecycle::Poisoned)
        else {
            return Err(ServerError::Failed);
        };

        dispatcher.reset_clock();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            dispatcher,
            events_rx,
            shutdown_rx,
            self.tick_period,
        ));

        *lifecycle = Lifecycle::Running { shutdown_tx, task };
        self.running.store(true, Ordering::SeqCst);
        info!(tick_period_ms = self.tick_period.as_millis() as u64, "GameServer started");
        Ok(())
    }

    /// Halt ticking and stop accepting connections. No-op if not running.
    ///
    /// Rooms and sessions are kept, so a later `start` resumes where this left off.
    /// If the loop task panicked, the server stays stopped for good.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running { .. } = &*lifecycle else {
            return;
        };
        let Lifecycle::Running { shutdown_tx, task } =
            std::mem::replace(&mut *lifecycle, Lifecycle::Poisoned)
        else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(());

        match task.await {
            Ok((dispatcher, events_rx)) => {
                *lifecycle = Lifecycle::Stopped {
                    dispatcher,
                    events_rx,
                };
                info!("GameServer stopped");
            }
            Err(e) => {
                error!(error = %e, "Dispatcher task failed, game server is stopped permanently");
            }
        }
    }

    /// Register a new connection with its outbound channel
    pub fn connect(&self, conn_id: ConnId, outbox: Outbox) -> Result<(), ServerError> {
        if !self.is_running() {
            return Err(ServerError::NotRunning);
        }
        self.send_event(DispatchEvent::Connect { conn_id, outbox });
        Ok(())
    }

    /// Forward a client message to the dispatcher
    pub fn dispatch(&self, conn_id: ConnId, msg: ClientMsg) {
        self.send_event(DispatchEvent::Message { conn_id, msg });
    }

    pub fn disconnect(&self, conn_id: ConnId) {
        self.send_event(DispatchEvent::Disconnect { conn_id });
    }

    fn send_event(&self, event: DispatchEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("Dispatcher channel closed");
        }
    }
}

/// Run the dispatcher until shutdown, then hand it back
async fn run_loop(
    mut dispatcher: Dispatcher,
    mut events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    tick_period: Duration,
) -> (Dispatcher, mpsc::UnboundedReceiver<DispatchEvent>) {
    let mut ticker = interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of an interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => break,

            // Ticks first; the interval is ready at most once per period.
            _ = ticker.tick() => dispatcher.tick(),

            event = events_rx.recv() => match event {
                Some(event) => dispatcher.handle(event),
                None => break,
            },
        }
    }

    (dispatcher, events_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::util::time::{Clock, ManualClock};
    use crate::ws::protocol::ServerMsg;
    use uuid::Uuid;

    /// Clock that panics once told to, taking the loop task down
    struct FailingClock {
        inner: ManualClock,
        fail: Arc<AtomicBool>,
    }

    impl Clock for FailingClock {
        fn now_millis(&self) -> u64 {
            if self.fail.load(Ordering::SeqCst) {
                panic!("clock failure");
            }
            self.inner.now_millis()
        }
    }

    fn server() -> (GameServer, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let dispatcher = Dispatcher::with_seed(GameConfig::default(), Arc::new(clock.clone()), 1);
        (GameServer::new(dispatcher), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_requires_running_server() {
        let (server, _clock) = server();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            server.connect(Uuid::new_v4(), tx.clone()),
            Err(ServerError::NotRunning)
        ));

        server.start().await.unwrap();
        assert!(server.connect(Uuid::new_v4(), tx.clone()).is_ok());

        server.stop().await;
        assert!(!server.is_running());
        assert!(matches!(
            server.connect(Uuid::new_v4(), tx),
            Err(ServerError::NotRunning)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let (server, _clock) = server();

        server.stop().await;
        server.start().await.unwrap();
        server.start().await.unwrap();
        assert!(server.is_running());

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());

        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_produce_snapshots() {
        let (server, clock) = server();
        server.start().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        server.connect(id, tx).unwrap();
        server.dispatch(id, ClientMsg::Join);

        clock.advance(40);
        tokio::time::sleep(Duration::from_millis(40)).await;

        let mut saw_state = false;
        while let Ok(msg) = rx.try_recv() {
            if let ServerMsg::State { players, .. } = msg {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, id);
                saw_state = true;
            }
        }
        assert!(saw_state);
        assert_eq!(server.stats().rooms(), 1);
        assert_eq!(server.stats().players(), 1);

        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn state_survives_restart() {
        let (server, _clock) = server();
        server.start().await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        server.connect(id, tx).unwrap();
        server.dispatch(id, ClientMsg::Join);
        tokio::task::yield_now().await;

        server.stop().await;
        server.start().await.unwrap();
        server.disconnect(id);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(server.stats().rooms(), 0);
        assert_eq!(server.stats().connections(), 0);
        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_keep_firing_under_message_flood() {
        let (server, clock) = server();
        server.start().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let player = Uuid::new_v4();
        server.connect(player, tx).unwrap();
        server.dispatch(player, ClientMsg::Join);
        let (noisy_tx, _noisy_rx) = mpsc::unbounded_channel();
        let noisy = Uuid::new_v4();
        server.connect(noisy, noisy_tx).unwrap();
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        while rx.try_recv().is_ok() {}

        // far more events than the loop can handle in the yields below
        for _ in 0..100_000 {
            server.dispatch(noisy, ClientMsg::Leave);
        }
        clock.advance(100);
        tokio::time::advance(Duration::from_millis(40)).await;

        let mut saw_state = false;
        for _ in 0..200 {
            tokio::task::yield_now().await;
            if let Ok(ServerMsg::State { players, .. }) = rx.try_recv() {
                assert_eq!(players[0].id, player);
                saw_state = true;
                break;
            }
        }
        assert!(saw_state);

        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_loop_leaves_server_stopped_for_good() {
        let fail = Arc::new(AtomicBool::new(false));
        let clock = FailingClock {
            inner: ManualClock::new(1_000_000),
            fail: fail.clone(),
        };
        let dispatcher = Dispatcher::with_seed(GameConfig::default(), Arc::new(clock), 1);
        let server = GameServer::new(dispatcher);
        server.start().await.unwrap();

        fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.stop().await;

        assert!(!server.is_running());
        assert!(matches!(server.start().await, Err(ServerError::Failed)));
        assert!(!server.is_running());
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            server.connect(Uuid::new_v4(), tx),
            Err(ServerError::NotRunning)
        ));
    }
}
