//! # Trigger Subscriber
//!
//! Workflow-DON side of the trigger protocol. Implements `TriggerCapability`
//! so the workflow engine registers with it like with a local trigger.
//!
//! ## Registration
//!
//! `register_trigger` only stores the request and returns the callback
//! channel. A background loop re-sends every stored registration to all
//! capability DON members each `registration_refresh`. Publishers drop
//! registrations that stop being refreshed, so `unregister_trigger` never
//! notifies them.
//!
//! ## Events
//!
//! `TriggerEvent` messages are cached per (event ID, workflow ID). Once
//! `min_responses_to_aggregate` capability DON members sent the event, the
//! payloads are aggregated and the result is pushed onto the workflow's
//! callback. Each event is delivered at most once.

use crate::errors::TriggerError;
use crate::metrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use rc_01_dispatcher::{DispatchError, DispatcherApi, Receiver};
use rc_02_quorum::{Aggregator, MessageCache, ModeAggregator};
use shared_types::{
    sanitize_log_string, to_payload, CapabilityError, Clock, DonInfo, MessageBody, Method,
    PeerId, RemoteCapabilityInfo, RemoteTriggerConfig, TriggerCapability,
    TriggerRegistrationRequest, TriggerResponse, TriggerStream,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Aggregation policy for trigger events.
pub type EventAggregator = Arc<dyn Aggregator<Output = TriggerResponse>>;

/// (trigger event ID, workflow ID)
type EventKey = (String, String);

struct SubscribedTrigger {
    payload: Vec<u8>,
    callback: mpsc::Sender<TriggerResponse>,
}

struct SubscriberState {
    registrations: HashMap<String, SubscribedTrigger>,
    cache: MessageCache<EventKey, PeerId>,
}

pub struct TriggerSubscriber {
    capability: RemoteCapabilityInfo,
    local_don: DonInfo,
    dispatcher: Arc<dyn DispatcherApi>,
    config: RemoteTriggerConfig,
    clock: Arc<dyn Clock>,
    aggregator: EventAggregator,
    min_responses: usize,
    state: Mutex<SubscriberState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerSubscriber {
    /// Subscriber aggregating events by mode with `F+1` identical payloads.
    pub fn new(
        capability: RemoteCapabilityInfo,
        local_don: DonInfo,
        dispatcher: Arc<dyn DispatcherApi>,
        config: RemoteTriggerConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let aggregator = Arc::new(ModeAggregator::<TriggerResponse>::new(
            capability.don.f_plus_one(),
        ));
        Self::with_aggregator(capability, local_don, dispatcher, config, clock, aggregator)
    }

    pub fn with_aggregator(
        capability: RemoteCapabilityInfo,
        local_don: DonInfo,
        dispatcher: Arc<dyn DispatcherApi>,
        mut config: RemoteTriggerConfig,
        clock: Arc<dyn Clock>,
        aggregator: EventAggregator,
    ) -> Arc<Self> {
        config.apply_defaults();
        let min_responses = match config.min_responses_to_aggregate {
            0 => capability.don.f_plus_one(),
            n => n as usize,
        };
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            capability,
            local_don,
            dispatcher,
            config,
            clock,
            aggregator,
            min_responses,
            state: Mutex::new(SubscriberState {
                registrations: HashMap::new(),
                cache: MessageCache::new(),
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register with the dispatcher and start the refresh and cleanup loops.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatchError> {
        self.dispatcher.set_receiver(
            &self.capability.id,
            self.capability.don.id,
            Arc::clone(self) as Arc<dyn Receiver>,
        )?;

        let refresh = {
            let subscriber = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.registration_refresh;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => subscriber.send_registrations().await,
                    }
                }
            })
        };

        let cleanup = {
            let subscriber = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            let period = self.config.message_expiry;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => subscriber.delete_expired_events(),
                    }
                }
            })
        };

        self.tasks.lock().extend([refresh, cleanup]);
        info!(
            capability_id = %self.capability.id,
            don_id = self.capability.don.id,
            "Trigger subscriber started"
        );
        Ok(())
    }

    /// Stop the loops and close every callback channel.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.dispatcher
            .remove_receiver(&self.capability.id, self.capability.don.id);
        self.state.lock().registrations.clear();
    }

    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Number of event groups in the message cache.
    pub fn cached_events(&self) -> usize {
        self.state.lock().cache.len()
    }

    async fn send_registrations(&self) {
        let registrations: Vec<(String, Vec<u8>)> = self
            .state
            .lock()
            .registrations
            .iter()
            .map(|(workflow_id, r)| (workflow_id.clone(), r.payload.clone()))
            .collect();

        for (workflow_id, payload) in registrations {
            let body = MessageBody::new(
                self.capability.id.clone(),
                self.capability.don.id,
                self.local_don.id,
                Method::RegisterTrigger,
            )
            .with_message_id(workflow_id.as_bytes().to_vec())
            .with_payload(payload);

            for member in &self.capability.don.members {
                if let Err(e) = self.dispatcher.send(*member, body.clone()).await {
                    error!(peer_id = %member, workflow_id = %workflow_id, error = %e, "Failed to send registration");
                }
            }
        }
    }

    fn delete_expired_events(&self) {
        let cutoff = self.clock.now_millis() - self.config.message_expiry.as_millis() as i64;
        let deleted = self.state.lock().cache.delete_older_than(cutoff);
        if deleted > 0 {
            debug!(deleted, "Deleted expired trigger events");
        }
    }

    fn handle_event(&self, body: MessageBody) -> Result<(), TriggerError> {
        if body.method != Method::TriggerEvent {
            return Err(TriggerError::UnexpectedMethod(body.method.to_string()));
        }
        let sender = body.sender_peer_id()?;
        if !self.capability.don.contains(&sender) {
            return Err(TriggerError::NotDonMember {
                peer: sender,
                don_id: self.capability.don.id,
            });
        }
        let metadata = body.metadata.ok_or(TriggerError::MissingMetadata)?;

        let now = self.clock.now_millis();
        let min_timestamp = now - self.config.message_expiry.as_millis() as i64;
        let max_age = self.config.registration_expiry.as_millis() as i64;

        let mut deliveries = Vec::new();
        {
            let mut state = self.state.lock();
            let SubscriberState {
                registrations,
                cache,
            } = &mut *state;

            for workflow_id in &metadata.workflow_ids {
                let Some(registration) = registrations.get(workflow_id) else {
                    debug!(workflow_id = %sanitize_log_string(workflow_id), "Event for unknown workflow");
                    continue;
                };
                let key = (metadata.trigger_event_id.clone(), workflow_id.clone());
                let created = cache.insert(key.clone(), sender, now, body.payload.clone());
                if now - created > max_age {
                    warn!(
                        trigger_event_id = %sanitize_log_string(&metadata.trigger_event_id),
                        workflow_id = %workflow_id,
                        "Dropping stale trigger event"
                    );
                    continue;
                }

                let (ready, payloads) = cache.ready(&key, self.min_responses, min_timestamp, true);
                if !ready {
                    continue;
                }
                match self
                    .aggregator
                    .aggregate(&metadata.trigger_event_id, &payloads)
                {
                    Ok(response) => deliveries.push((
                        workflow_id.clone(),
                        registration.callback.clone(),
                        response,
                    )),
                    Err(e) => error!(
                        trigger_event_id = %sanitize_log_string(&metadata.trigger_event_id),
                        error = %e,
                        "Failed to aggregate trigger event"
                    ),
                }
            }
        }

        for (workflow_id, callback, response) in deliveries {
            match callback.try_send(response) {
                Ok(()) => {
                    metrics::record_event_aggregated();
                    info!(
                        trigger_event_id = %sanitize_log_string(&metadata.trigger_event_id),
                        workflow_id = %workflow_id,
                        "Trigger event delivered"
                    );
                }
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "Callback rejected trigger event"),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TriggerCapability for TriggerSubscriber {
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<TriggerStream, CapabilityError> {
        if *self.shutdown.borrow() {
            return Err(CapabilityError::Closed);
        }
        let workflow_id = request.metadata.workflow_id.clone();
        if workflow_id.is_empty() {
            return Err(CapabilityError::InvalidRequest(
                "missing workflow ID".to_string(),
            ));
        }
        let payload =
            to_payload(&request).map_err(|e| CapabilityError::InvalidRequest(e.to_string()))?;

        let (callback, events) = mpsc::channel(self.config.callback_buffer_size);
        let replaced = self
            .state
            .lock()
            .registrations
            .insert(workflow_id.clone(), SubscribedTrigger { payload, callback })
            .is_some();
        if replaced {
            warn!(workflow_id = %workflow_id, "Replacing existing trigger registration");
        } else {
            info!(workflow_id = %workflow_id, "Trigger registered");
        }
        Ok(events)
    }

    async fn unregister_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        let removed = self
            .state
            .lock()
            .registrations
            .remove(&request.metadata.workflow_id);
        if removed.is_some() {
            info!(workflow_id = %request.metadata.workflow_id, "Trigger unregistered");
        }
        Ok(())
    }
}

#[async_trait]
impl Receiver for TriggerSubscriber {
    async fn receive(&self, body: MessageBody) {
        let message_id = body.message_id_str();
        if let Err(e) = self.handle_event(body) {
            warn!(
                message_id = %sanitize_log_string(&message_id),
                error = %sanitize_log_string(&e.to_string()),
                "Rejected trigger event"
            );
        }
    }
}
