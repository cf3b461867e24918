//! # Trigger Publisher
//!
//! Capability-DON side of the trigger protocol. Fronts the real trigger.
//!
//! ## Registration
//!
//! `RegisterTrigger` messages are cached per (caller DON, workflow ID). Once
//! `2F+1` members of the calling DON have a fresh entry, the payloads are
//! mode-aggregated (`F+1` identical) and the result is registered with the
//! underlying trigger. A different aggregate replaces the old registration.
//!
//! Every `registration_expiry` the quorum is re-checked; registrations the
//! callers stopped refreshing are unregistered.
//!
//! ## Events
//!
//! Each registration gets a forwarder task reading the trigger's stream.
//! Events are batched by (caller DON, event ID, payload) for
//! `batch_collection_period`, then sent to every member of the calling DON
//! with the workflow IDs in the message metadata.

use crate::errors::TriggerError;
use crate::metrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use rc_01_dispatcher::{DispatchError, DispatcherApi, Receiver};
use rc_02_quorum::{Aggregator, MessageCache, ModeAggregator};
use shared_crypto::sha256;
use shared_types::{
    from_payload, sanitize_log_string, to_payload, Clock, DonId, DonInfo, MessageBody, Method,
    PeerId, RemoteTriggerConfig, TriggerCapability, TriggerEventMetadata,
    TriggerRegistrationRequest, TriggerStream,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Identifies one workflow's registration from one calling DON.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationKey {
    pub caller_don_id: DonId,
    pub workflow_id: String,
}

struct Registration {
    request: TriggerRegistrationRequest,
    forwarder: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    caller_don_id: DonId,
    trigger_event_id: String,
    payload_hash: [u8; 32],
}

struct PendingBatch {
    payload: Vec<u8>,
    workflow_ids: Vec<String>,
}

type PendingEvents = Arc<Mutex<HashMap<BatchKey, PendingBatch>>>;

struct PublisherState {
    cache: MessageCache<RegistrationKey, PeerId>,
    registrations: HashMap<RegistrationKey, Registration>,
}

pub struct TriggerPublisher {
    capability_id: String,
    local_don: DonInfo,
    workflow_dons: HashMap<DonId, DonInfo>,
    underlying: Arc<dyn TriggerCapability>,
    dispatcher: Arc<dyn DispatcherApi>,
    config: RemoteTriggerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<PublisherState>,
    pending: PendingEvents,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerPublisher {
    pub fn new(
        capability_id: impl Into<String>,
        local_don: DonInfo,
        workflow_dons: Vec<DonInfo>,
        underlying: Arc<dyn TriggerCapability>,
        dispatcher: Arc<dyn DispatcherApi>,
        mut config: RemoteTriggerConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        config.apply_defaults();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            capability_id: capability_id.into(),
            local_don,
            workflow_dons: workflow_dons.into_iter().map(|d| (d.id, d)).collect(),
            underlying,
            dispatcher,
            config,
            clock,
            state: Mutex::new(PublisherState {
                cache: MessageCache::new(),
                registrations: HashMap::new(),
            }),
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register with the dispatcher and start the cleanup and batching loops.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        self.dispatcher.set_receiver(
            &self.capability_id,
            self.local_don.id,
            Arc::clone(self) as Arc<dyn Receiver>,
        )?;

        let cleanup = {
            let publisher = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.registration_expiry;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => publisher.cleanup_registrations().await,
                    }
                }
            })
        };

        let batching = {
            let publisher = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.batch_collection_period;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => publisher.flush_events().await,
                    }
                }
            })
        };

        self.tasks.lock().extend([cleanup, batching]);
        info!(
            capability_id = %self.capability_id,
            don_id = self.local_don.id,
            "Trigger publisher started"
        );
        Ok(())
    }

    /// Stop the loops and unregister everything from the underlying trigger.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.dispatcher
            .remove_receiver(&self.capability_id, self.local_don.id);

        let registrations: Vec<_> = self.state.lock().registrations.drain().collect();
        for (key, registration) in registrations {
            self.unregister(&key, registration).await;
        }
        metrics::set_registrations_active(0);
    }

    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// The aggregated request currently registered for `key`.
    pub fn registration(&self, key: &RegistrationKey) -> Option<TriggerRegistrationRequest> {
        self.state
            .lock()
            .registrations
            .get(key)
            .map(|r| r.request.clone())
    }

    fn min_timestamp(&self) -> i64 {
        self.clock.now_millis() - self.config.registration_expiry.as_millis() as i64
    }

    async fn handle_register(&self, body: MessageBody) -> Result<(), TriggerError> {
        if body.method != Method::RegisterTrigger {
            return Err(TriggerError::UnexpectedMethod(body.method.to_string()));
        }
        let sender = body.sender_peer_id()?;
        let caller_don = self
            .workflow_dons
            .get(&body.caller_don_id)
            .ok_or(TriggerError::UnknownCallerDon(body.caller_don_id))?;
        if !caller_don.contains(&sender) {
            return Err(TriggerError::NotDonMember {
                peer: sender,
                don_id: caller_don.id,
            });
        }

        let request: TriggerRegistrationRequest = from_payload(&body.payload)?;
        let key = RegistrationKey {
            caller_don_id: caller_don.id,
            workflow_id: request.metadata.workflow_id,
        };
        let now = self.clock.now_millis();
        let min_timestamp = self.min_timestamp();

        let (aggregated, previous) = {
            let mut state = self.state.lock();
            state
                .cache
                .insert(key.clone(), sender, now, body.payload);
            let (ready, payloads) =
                state
                    .cache
                    .ready(&key, caller_don.two_f_plus_one(), min_timestamp, false);
            if !ready {
                debug!(workflow_id = %key.workflow_id, peer_id = %sender, "Registration recorded");
                return Ok(());
            }

            let aggregated = ModeAggregator::<TriggerRegistrationRequest>::new(
                caller_don.f_plus_one(),
            )
            .aggregate(&key.workflow_id, &payloads)?;
            if state
                .registrations
                .get(&key)
                .is_some_and(|existing| existing.request == aggregated)
            {
                return Ok(());
            }

            let previous = state.registrations.insert(
                key.clone(),
                Registration {
                    request: aggregated.clone(),
                    forwarder: None,
                },
            );
            metrics::set_registrations_active(state.registrations.len());
            (aggregated, previous)
        };

        if let Some(previous) = previous {
            info!(workflow_id = %key.workflow_id, "Replacing trigger registration");
            self.unregister(&key, previous).await;
        }

        let stream = match self.underlying.register_trigger(aggregated.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut state = self.state.lock();
                if state
                    .registrations
                    .get(&key)
                    .is_some_and(|r| r.request == aggregated)
                {
                    state.registrations.remove(&key);
                }
                return Err(e.into());
            }
        };

        let forwarder = tokio::spawn(forward_events(
            stream,
            key.clone(),
            Arc::clone(&self.pending),
        ));
        let superseded = {
            let mut state = self.state.lock();
            match state.registrations.get_mut(&key) {
                Some(registration) if registration.request == aggregated => {
                    registration.forwarder = Some(forwarder);
                    None
                }
                _ => Some(forwarder),
            }
        };

        match superseded {
            None => info!(
                workflow_id = %key.workflow_id,
                caller_don_id = key.caller_don_id,
                "Trigger registered"
            ),
            // Replaced or expired while registering.
            Some(forwarder) => {
                if let Err(e) = self.underlying.unregister_trigger(aggregated).await {
                    error!(workflow_id = %key.workflow_id, error = %e, "Failed to unregister trigger");
                }
                forwarder.abort();
            }
        }
        Ok(())
    }

    async fn unregister(&self, key: &RegistrationKey, registration: Registration) {
        if let Err(e) = self
            .underlying
            .unregister_trigger(registration.request)
            .await
        {
            error!(workflow_id = %key.workflow_id, error = %e, "Failed to unregister trigger");
        }
        if let Some(forwarder) = registration.forwarder {
            forwarder.abort();
        }
    }

    async fn cleanup_registrations(&self) {
        let min_timestamp = self.min_timestamp();
        let stale = {
            let mut state = self.state.lock();
            let PublisherState {
                cache,
                registrations,
            } = &mut *state;

            let mut expired = Vec::new();
            for key in registrations.keys() {
                let fresh = match self.workflow_dons.get(&key.caller_don_id) {
                    Some(don) => {
                        cache
                            .ready(key, don.two_f_plus_one(), min_timestamp, false)
                            .0
                    }
                    None => false,
                };
                if !fresh {
                    expired.push(key.clone());
                }
            }

            let stale: Vec<_> = expired
                .into_iter()
                .filter_map(|key| {
                    cache.delete(&key);
                    registrations.remove(&key).map(|r| (key, r))
                })
                .collect();

            let abandoned =
                cache.delete_stale(min_timestamp, |key| registrations.contains_key(key));
            if abandoned > 0 {
                debug!(count = abandoned, "Dropped registration groups without quorum");
            }
            metrics::set_registrations_active(registrations.len());
            stale
        };

        for (key, registration) in stale {
            info!(
                workflow_id = %key.workflow_id,
                caller_don_id = key.caller_don_id,
                "Registration expired"
            );
            metrics::record_registration_expired();
            self.unregister(&key, registration).await;
        }
    }

    async fn flush_events(&self) {
        let batches = std::mem::take(&mut *self.pending.lock());
        let mut messages = Vec::new();
        for (key, batch) in batches {
            let Some(don) = self.workflow_dons.get(&key.caller_don_id) else {
                continue;
            };
            for chunk in batch.workflow_ids.chunks(self.config.max_batch_size) {
                let body = MessageBody::new(
                    self.capability_id.clone(),
                    self.local_don.id,
                    key.caller_don_id,
                    Method::TriggerEvent,
                )
                .with_message_id(key.trigger_event_id.as_bytes().to_vec())
                .with_payload(batch.payload.clone())
                .with_metadata(TriggerEventMetadata {
                    trigger_event_id: key.trigger_event_id.clone(),
                    workflow_ids: chunk.to_vec(),
                });
                messages.extend(don.members.iter().map(|peer| (*peer, body.clone())));
            }
        }

        if messages.is_empty() {
            return;
        }
        metrics::record_event_messages_sent(messages.len());
        for (peer, body) in messages {
            if let Err(e) = self.dispatcher.send(peer, body).await {
                error!(peer_id = %peer, error = %e, "Failed to send trigger event");
            }
        }
    }
}

/// Move events from a registration's stream into the pending batches.
async fn forward_events(mut events: TriggerStream, key: RegistrationKey, pending: PendingEvents) {
    while let Some(response) = events.recv().await {
        if let Some(err) = &response.error {
            warn!(
                workflow_id = %key.workflow_id,
                error = %sanitize_log_string(err),
                "Underlying trigger reported an error"
            );
            continue;
        }
        let payload = match to_payload(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(workflow_id = %key.workflow_id, error = %e, "Failed to encode trigger event");
                continue;
            }
        };

        let batch_key = BatchKey {
            caller_don_id: key.caller_don_id,
            trigger_event_id: response.event.id,
            payload_hash: sha256(&payload),
        };
        pending
            .lock()
            .entry(batch_key)
            .or_insert_with(|| PendingBatch {
                payload,
                workflow_ids: Vec::new(),
            })
            .workflow_ids
            .push(key.workflow_id.clone());
    }
    debug!(workflow_id = %key.workflow_id, "Trigger stream closed");
}

#[async_trait]
impl Receiver for TriggerPublisher {
    async fn receive(&self, body: MessageBody) {
        let message_id = body.message_id_str();
        if let Err(e) = self.handle_register(body).await {
            warn!(
                message_id = %sanitize_log_string(&message_id),
                error = %sanitize_log_string(&e.to_string()),
                "Rejected trigger registration"
            );
        }
    }
}
