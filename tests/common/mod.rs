#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use watchloop_lib::{
    ChannelTransport, ClipRecord, EngineError, EngineEvent, EngineSettings, PlaybackController,
    PlayerCommand, RemoteService, Result, SettlementReceipt, SettlementRequest,
};

/// Upper bound on any single wait. Virtual time, so it costs nothing unless a
/// test is about to hang.
const WAIT: Duration = Duration::from_secs(600);

pub const VIEWER: &str = "viewer-1";

/// In-memory stand-in for the queue and ledger service.
#[derive(Default)]
pub struct FakeService {
    queues: Mutex<VecDeque<Vec<ClipRecord>>>,
    settle_script: Mutex<VecDeque<Result<SettlementReceipt>>>,
    settle_delay: Mutex<Duration>,
    fetches: Mutex<Vec<tokio::time::Instant>>,
    settlements: Mutex<Vec<SettlementRequest>>,
    unplayable: Mutex<Vec<String>>,
}

impl FakeService {
    pub fn with_queue(records: Vec<ClipRecord>) -> Arc<Self> {
        let service = Arc::new(Self::default());
        service.push_queue(records);
        service
    }

    pub fn push_queue(&self, records: Vec<ClipRecord>) {
        self.queues.lock().unwrap().push_back(records);
    }

    pub fn push_settlement(&self, answer: Result<SettlementReceipt>) {
        self.settle_script.lock().unwrap().push_back(answer);
    }

    pub fn set_settle_delay(&self, delay: Duration) {
        *self.settle_delay.lock().unwrap() = delay;
    }

    pub fn fetches(&self) -> Vec<tokio::time::Instant> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn settlements(&self) -> Vec<SettlementRequest> {
        self.settlements.lock().unwrap().clone()
    }

    pub fn unplayable(&self) -> Vec<String> {
        self.unplayable.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteService for FakeService {
    async fn fetch_queue(&self, _viewer_id: &str) -> Result<Vec<ClipRecord>> {
        self.fetches.lock().unwrap().push(tokio::time::Instant::now());
        Ok(self.queues.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn settle_reward(&self, request: &SettlementRequest) -> Result<SettlementReceipt> {
        let delay = *self.settle_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let count = {
            let mut settlements = self.settlements.lock().unwrap();
            settlements.push(request.clone());
            settlements.len() as i64
        };
        self.settle_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SettlementReceipt {
                accepted: true,
                clip_now_complete: false,
                new_balance: 5 * count,
            }))
    }

    async fn mark_unplayable(&self, clip_id: &str) -> Result<()> {
        self.unplayable.lock().unwrap().push(clip_id.to_string());
        Ok(())
    }
}

pub fn network_down() -> Result<SettlementReceipt> {
    Err(EngineError::Network("connection reset".into()))
}

pub fn clip(id: &str, target_secs: i64) -> ClipRecord {
    ClipRecord {
        clip_id: id.into(),
        media_ref: format!("media-{id}"),
        title: format!("Clip {id}"),
        target_duration_seconds: target_secs,
        reward_amount: 5,
        view_count: 0,
        target_view_count: 100,
        status: "active".into(),
        hold_expiry: None,
        owner_id: None,
        created_at: None,
    }
}

/// A controller wired to channels the test can drive and observe.
pub struct Harness {
    pub controller: PlaybackController,
    pub service: Arc<FakeService>,
    pub commands: UnboundedReceiver<PlayerCommand>,
    pub events: UnboundedReceiver<EngineEvent>,
}

impl Harness {
    pub fn new(service: Arc<FakeService>) -> Self {
        Self::with_settings(service, EngineSettings::default())
    }

    pub fn with_settings(service: Arc<FakeService>, settings: EngineSettings) -> Self {
        let (transport, commands) = ChannelTransport::new();
        let (sink, events) = mpsc::unbounded_channel();
        let backend: Arc<dyn RemoteService> = service.clone();
        let controller =
            PlaybackController::new(VIEWER, backend, Arc::new(transport), Arc::new(sink), &settings);
        Self {
            controller,
            service,
            commands,
            events,
        }
    }

    /// Play the surface's part of the handshake for the current load.
    pub fn player_says(&self, message: &str) {
        self.controller
            .handle_player_message(message)
            .expect("well-formed player message");
    }

    /// Next event matching `wanted`, discarding everything before it.
    pub async fn wait_for(&mut self, wanted: impl Fn(&EngineEvent) -> bool) -> EngineEvent {
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(event) if wanted(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for engine event")
    }

    pub async fn wait_for_clip(&mut self, clip_id: &str) -> String {
        match self
            .wait_for(|event| {
                matches!(event, EngineEvent::ClipChanged { clip, .. } if clip.id == clip_id)
            })
            .await
        {
            EngineEvent::ClipChanged { session_id, .. } => session_id,
            other => unreachable!("{other:?}"),
        }
    }

    pub async fn wait_for_elapsed(&mut self, secs: u32) {
        self.wait_for(|event| {
            matches!(event, EngineEvent::Progress { elapsed_secs, .. } if *elapsed_secs == secs)
        })
        .await;
    }

    pub async fn next_command(&mut self) -> PlayerCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for player command")
            .expect("command channel closed")
    }

    /// Let spawned tasks run without moving far in virtual time.
    pub async fn settle_tasks(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
