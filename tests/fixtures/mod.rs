//! Test fixtures and test doubles for integration testing

#![allow(dead_code)]

use duet_room::error::{MatchmakingError, Result};
use duet_room::gateway::{ConnectionRegistry, Gateway, GatewayConfig, Session, SessionHandler};
use duet_room::matching::{
    AdmissionCheck, ClaimOutcome, EnqueueOutcome, InMemoryQueueStore, QueueStore,
};
use duet_room::matching::store::PairBuilder;
use duet_room::metrics::MetricsCollector;
use duet_room::rooms::RoomRegistry;
use duet_room::types::{
    ClientEvent, Gender, GenderPreference, RoomId, ServerEvent, SignalKind, Tier, WaitingUser,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

/// A gateway wired to an in-memory store the test can reach into
pub struct TestSystem {
    pub gateway: Arc<Gateway>,
    pub store: Arc<FlakyStore>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let store = Arc::new(FlakyStore::new());
        let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        let connections = Arc::new(ConnectionRegistry::new());
        let registry = Arc::new(RoomRegistry::new(connections.clone(), metrics.clone()));
        let gateway = Arc::new(Gateway::new(
            store.clone(),
            registry,
            connections,
            config,
            metrics.clone(),
        ));

        Self {
            gateway,
            store,
            metrics,
        }
    }

    pub async fn connect(&self, user_id: &str) -> TestClient {
        let (session, receiver) = self
            .gateway
            .on_connect(user_id)
            .await
            .expect("Failed to connect test client");

        TestClient {
            gateway: self.gateway.clone(),
            session,
            receiver,
        }
    }
}

/// One connected user driving the gateway the way a socket task would
pub struct TestClient {
    gateway: Arc<Gateway>,
    pub session: Session,
    receiver: UnboundedReceiver<ServerEvent>,
}

impl TestClient {
    pub fn id(&self) -> &str {
        &self.session.user_id
    }

    pub async fn send(&self, event: ClientEvent) {
        self.gateway.on_event(&self.session, event).await;
    }

    pub async fn enqueue(&self, gender: Gender, looking_for: GenderPreference) {
        self.send(enqueue_event(gender, looking_for, Tier::Free)).await;
    }

    pub async fn enqueue_as(&self, gender: Gender, looking_for: GenderPreference, tier: Tier) {
        self.send(enqueue_event(gender, looking_for, tier)).await;
    }

    pub async fn signal(&self, room_id: RoomId, kind: SignalKind, payload: serde_json::Value) {
        self.send(ClientEvent::Signal {
            room_id,
            kind,
            payload,
        })
        .await;
    }

    pub async fn disconnect(&self) {
        self.gateway.on_disconnect(&self.session).await;
    }

    /// Everything delivered to this client so far
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Drain and return the room id of the single `matched` event
    pub fn expect_matched(&mut self, partner: &str) -> RoomId {
        match self.drain().as_slice() {
            [ServerEvent::Matched {
                room_id,
                partner_id,
            }] if partner_id == partner => *room_id,
            other => panic!(
                "{} expected a match with {}, got {:?}",
                self.session.user_id, partner, other
            ),
        }
    }
}

pub fn enqueue_event(gender: Gender, looking_for: GenderPreference, tier: Tier) -> ClientEvent {
    ClientEvent::Enqueue {
        user_id: None,
        gender: Some(gender),
        looking_for,
        tier,
        boosted: false,
        boosted_until: None,
    }
}

pub fn boosted_enqueue_event(gender: Gender, looking_for: GenderPreference) -> ClientEvent {
    ClientEvent::Enqueue {
        user_id: None,
        gender: Some(gender),
        looking_for,
        tier: Tier::Free,
        boosted: true,
        boosted_until: None,
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// In-memory queue store that can be switched into a failing state, or made
/// to run something just before an enqueue reaches the real store
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryQueueStore,
    failing: AtomicBool,
    before_enqueue: Mutex<Option<Hook>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Run `hook` once, right before the next enqueue takes the store lock
    pub fn before_next_enqueue(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_enqueue.lock().unwrap() = Some(Box::new(hook));
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::StoreUnavailable {
                message: "queue backend unreachable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl QueueStore for FlakyStore {
    fn enqueue_if(
        &self,
        user: WaitingUser,
        admit: &mut AdmissionCheck<'_>,
    ) -> Result<EnqueueOutcome> {
        let hook = self.before_enqueue.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.check()?;
        self.inner.enqueue_if(user, admit)
    }

    fn remove(&self, user_id: &str) -> Result<Option<WaitingUser>> {
        self.check()?;
        self.inner.remove(user_id)
    }

    fn get(&self, user_id: &str) -> Result<Option<WaitingUser>> {
        self.check()?;
        self.inner.get(user_id)
    }

    fn len(&self) -> Result<usize> {
        self.check()?;
        self.inner.len()
    }

    fn scan_candidates(&self, for_user: &str, limit: usize) -> Result<Vec<WaitingUser>> {
        self.check()?;
        self.inner.scan_candidates(for_user, limit)
    }

    fn claim_pair(
        &self,
        user_id: &str,
        candidate_id: &str,
        build: &mut PairBuilder<'_>,
    ) -> Result<ClaimOutcome> {
        self.check()?;
        self.inner.claim_pair(user_id, candidate_id, build)
    }
}
