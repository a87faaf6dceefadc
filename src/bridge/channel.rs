use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::error::{EngineError, Result};

use super::protocol::{parse_inbound, BridgeEvent, InboundMessage, PlayerCommand, UnavailableCause};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Whatever actually carries a command to the embedded surface.
pub trait SurfaceTransport: Send + Sync {
    fn post(&self, command: PlayerCommand) -> Result<()>;
}

/// Transport backed by an unbounded channel; the receiving half is drained by
/// the host (webview glue, or a test).
#[derive(Clone)]
pub struct ChannelTransport {
    tx: UnboundedSender<PlayerCommand>,
}

impl ChannelTransport {
    pub fn new() -> (Self, UnboundedReceiver<PlayerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SurfaceTransport for ChannelTransport {
    fn post(&self, command: PlayerCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| EngineError::Protocol("player surface channel closed".into()))
    }
}

/// Normalized event tagged with the load it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSignal {
    pub generation: u64,
    pub event: BridgeEvent,
}

struct BridgeInner {
    generation: u64,
    ready: bool,
    loaded: bool,
    pending: VecDeque<PlayerCommand>,
    load_timer: Option<JoinHandle<()>>,
}

/// Handshake-gated message channel to the playback surface. Holds no
/// business state: only whether the current load has said `ready`, and the
/// commands waiting for it.
#[derive(Clone)]
pub struct PlayerBridge {
    inner: Arc<Mutex<BridgeInner>>,
    transport: Arc<dyn SurfaceTransport>,
    events: UnboundedSender<BridgeSignal>,
    load_timeout: Duration,
}

fn lock(inner: &Mutex<BridgeInner>) -> MutexGuard<'_, BridgeInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PlayerBridge {
    pub fn new(
        transport: Arc<dyn SurfaceTransport>,
        load_timeout: Duration,
    ) -> (Self, UnboundedReceiver<BridgeSignal>) {
        let (events, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            inner: Arc::new(Mutex::new(BridgeInner {
                generation: 0,
                ready: false,
                loaded: false,
                pending: VecDeque::new(),
                load_timer: None,
            })),
            transport,
            events,
            load_timeout,
        };
        (bridge, rx)
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.inner).ready
    }

    /// Start a fresh load: forget the previous handshake, drop its queued
    /// commands, and arm the load timeout. Returns the new generation.
    pub fn begin_load(&self) -> u64 {
        let mut inner = lock(&self.inner);
        Self::reset_locked(&mut inner);
        let generation = inner.generation;

        let shared = Arc::clone(&self.inner);
        let events = self.events.clone();
        let timeout = self.load_timeout;
        inner.load_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let inner = lock(&shared);
            if inner.generation == generation && !inner.loaded {
                log_warn!(
                    "player load {} timed out after {}ms; reporting unavailable",
                    generation,
                    timeout.as_millis()
                );
                let _ = events.send(BridgeSignal {
                    generation,
                    event: BridgeEvent::Unavailable(UnavailableCause::LoadTimeout),
                });
            }
        }));

        generation
    }

    /// Sever the current load without starting another (screen left, teardown).
    pub fn detach(&self) {
        let mut inner = lock(&self.inner);
        Self::reset_locked(&mut inner);
    }

    fn reset_locked(inner: &mut BridgeInner) {
        if let Some(timer) = inner.load_timer.take() {
            timer.abort();
        }
        if !inner.pending.is_empty() {
            log_info!(
                "dropping {} queued player command(s) from load {}",
                inner.pending.len(),
                inner.generation
            );
        }
        inner.generation = inner.generation.wrapping_add(1);
        inner.ready = false;
        inner.loaded = false;
        inner.pending.clear();
    }

    /// Deliver a command, or hold it until the surface says `ready`.
    pub fn send(&self, command: PlayerCommand) {
        let mut inner = lock(&self.inner);
        if inner.ready {
            self.post(command);
        } else if inner.pending.back() != Some(&command) {
            inner.pending.push_back(command);
        }
    }

    /// Entry point for raw text posted by the surface. Malformed messages
    /// are reported to the caller and otherwise ignored.
    pub fn handle_inbound(&self, raw: &str) -> Result<()> {
        match parse_inbound(raw) {
            Ok(message) => {
                self.receive(message);
                Ok(())
            }
            Err(err) => {
                log_warn!("ignoring player message: {err}");
                Err(err)
            }
        }
    }

    pub fn receive(&self, message: InboundMessage) {
        let mut inner = lock(&self.inner);
        let generation = inner.generation;

        let event = match message {
            InboundMessage::Ready | InboundMessage::Loaded => {
                if !self.mark_loaded(&mut inner) {
                    return;
                }
                BridgeEvent::Loaded
            }
            InboundMessage::Playing => {
                // A surface that starts playing without the handshake has loaded.
                self.mark_loaded(&mut inner);
                BridgeEvent::Playing
            }
            other => BridgeEvent::from(other),
        };

        if self.events.send(BridgeSignal { generation, event }).is_err() {
            log_warn!("bridge event receiver dropped; {:?} lost", event);
        }
    }

    /// Open the gate and disarm the load timeout. False if already loaded.
    fn mark_loaded(&self, inner: &mut BridgeInner) -> bool {
        if !inner.ready {
            inner.ready = true;
            while let Some(command) = inner.pending.pop_front() {
                self.post(command);
            }
        }
        if inner.loaded {
            return false;
        }
        inner.loaded = true;
        if let Some(timer) = inner.load_timer.take() {
            timer.abort();
        }
        log_info!("player load {} ready", inner.generation);
        true
    }

    fn post(&self, command: PlayerCommand) {
        if let Err(err) = self.transport.post(command) {
            log_error!("failed to post {:?} to player: {err}", command);
        }
    }
}
