//! Transactional outbound message queue.
//!
//! Single serialization point for CP→CS calls. Strictly FIFO with at most
//! one call in flight; transaction-class envelopes (StartTransaction,
//! StopTransaction, MeterValues, SecurityEventNotification) are persisted
//! through the durable store, survive reconnects and restarts, and are
//! retried with `attempt * TransactionMessageRetryInterval` back-off.
//! Everything else gets one attempt.
//!
//! A queued StopTransaction whose `transactionId` is still -1 is held back
//! until the StartTransactionResponse for its session has been handled and
//! the id patched in via [`MessageQueue::add_stopped_transaction_id`].

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::FrameError;
use crate::message::{EnhancedMessage, MessageType, MessageTypeId};
use crate::store::DataStore;
use crate::support::OcppFrame;

/// How long a sent call may wait for its CALLRESULT.
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport send hook; returns whether the frame was handed to the socket.
pub type TransmitFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

struct QueuedCall {
    message_id: String,
    message_type: MessageType,
    payload: Value,
    /// Sends performed so far.
    attempts: u32,
    not_before: Option<Instant>,
    promise: Option<oneshot::Sender<EnhancedMessage>>,
    persisted: bool,
}

struct InFlight {
    call: QueuedCall,
    /// Signals the drain loop that the response arrived. Dropping it wakes
    /// the loop as well, which is how pause/stop interrupt the wait.
    done: oneshot::Sender<()>,
}

struct QueueState {
    queue: VecDeque<QueuedCall>,
    in_flight: Option<InFlight>,
    paused: bool,
    running: bool,
    transaction_message_attempts: u32,
    transaction_message_retry_interval: Duration,
    /// StartTransaction message ids queued or awaiting a response; while
    /// non-empty, a StopTransaction with transactionId -1 is held back.
    pending_start_ids: HashSet<String>,
}

enum NextAction {
    Send {
        text: String,
        done: oneshot::Receiver<()>,
    },
    Wait(Option<Duration>),
    Stop,
}

/// Persistent FIFO of outbound calls with response correlation.
pub struct MessageQueue {
    transmit: TransmitFn,
    store: Arc<dyn DataStore>,
    state: Mutex<QueueState>,
    notify: Notify,
    message_counter: AtomicU64,
    boot_token: String,
}

impl MessageQueue {
    pub fn new(
        transmit: TransmitFn,
        store: Arc<dyn DataStore>,
        transaction_message_attempts: u32,
        transaction_message_retry_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transmit,
            store,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                in_flight: None,
                paused: true,
                running: false,
                transaction_message_attempts,
                transaction_message_retry_interval,
                pending_start_ids: HashSet::new(),
            }),
            notify: Notify::new(),
            message_counter: AtomicU64::new(1),
            // Message ids must not collide across reboots; a boot-unique
            // prefix keeps the counter safe to restart at 1.
            boot_token: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
        })
    }

    /// Monotonically unique message id, collision-free across reboots.
    pub fn create_message_id(&self) -> String {
        let n = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.boot_token, n)
    }

    /// Spawn the drain loop. The queue starts paused; call
    /// [`MessageQueue::resume`] once the transport is connected.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                return;
            }
            state.running = true;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run().await });
    }

    /// Re-hydrate persisted transaction-class envelopes after a restart.
    pub async fn restore(&self) {
        let persisted = match self.store.queued_messages().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted queue envelopes");
                return;
            }
        };

        let mut state = self.state.lock().unwrap();
        for (message_id, text) in persisted {
            let frame = match OcppFrame::parse(&text) {
                Ok(OcppFrame::Call {
                    action, payload, ..
                }) => (action, payload),
                _ => {
                    warn!(message_id = message_id.as_str(), "Dropping unreadable persisted envelope");
                    continue;
                }
            };
            let Some(message_type) = MessageType::from_action(&frame.0) else {
                continue;
            };
            if message_type == MessageType::StartTransaction {
                state.pending_start_ids.insert(message_id.clone());
            }
            state.queue.push_back(QueuedCall {
                message_id,
                message_type,
                payload: frame.1,
                attempts: 0,
                not_before: None,
                promise: None,
                persisted: true,
            });
        }
        self.notify.notify_one();
    }

    // ── Enqueueing ─────────────────────────────────────────

    /// Enqueue a call. Transaction-class messages are persisted first.
    pub async fn push(&self, message_type: MessageType, message_id: String, payload: Value) {
        let persisted = message_type.is_transaction_related();
        if persisted {
            let text =
                OcppFrame::call(message_id.clone(), message_type.action(), payload.clone())
                    .serialize();
            if let Err(e) = self.store.persist_queued_message(&message_id, &text).await {
                warn!(error = %e, message_id = message_id.as_str(), "Failed to persist envelope");
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            if message_type == MessageType::StartTransaction {
                state.pending_start_ids.insert(message_id.clone());
            }
            state.queue.push_back(QueuedCall {
                message_id,
                message_type,
                payload,
                attempts: 0,
                not_before: None,
                promise: None,
                persisted,
            });
        }
        self.notify.notify_one();
    }

    /// Enqueue a call and await its response. Resolves with
    /// `offline = true` when the queue is paused or stopped before a
    /// response arrives.
    pub async fn push_async(
        &self,
        message_type: MessageType,
        message_id: String,
        payload: Value,
    ) -> EnhancedMessage {
        let (promise, response) = oneshot::channel();
        let offline = {
            let mut state = self.state.lock().unwrap();
            if state.paused || !state.running {
                true
            } else {
                state.queue.push_back(QueuedCall {
                    message_id: message_id.clone(),
                    message_type,
                    payload,
                    attempts: 0,
                    not_before: None,
                    promise: Some(promise),
                    persisted: false,
                });
                false
            }
        };
        if offline {
            return EnhancedMessage::offline(message_id, message_type);
        }
        self.notify.notify_one();

        match response.await {
            Ok(message) => message,
            Err(_) => EnhancedMessage::offline(message_id, message_type),
        }
    }

    // ── Flow control ───────────────────────────────────────

    /// Stop draining. Pending request/response futures resolve with
    /// `offline = true`; transaction-class envelopes stay queued for the
    /// next [`MessageQueue::resume`].
    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = true;

        if let Some(in_flight) = state.in_flight.take() {
            let call = in_flight.call;
            if call.message_type.is_transaction_related() {
                // response may have been lost; resend when back online
                state.queue.push_front(call);
            } else {
                resolve_offline(call);
            }
        }

        let mut kept = VecDeque::with_capacity(state.queue.len());
        for call in state.queue.drain(..) {
            if call.promise.is_some() && !call.message_type.is_transaction_related() {
                resolve_offline(call);
            } else {
                kept.push_back(call);
            }
        }
        state.queue = kept;
        drop(state);
        self.notify.notify_one();
        debug!("Message queue paused");
    }

    pub fn resume(&self) {
        self.state.lock().unwrap().paused = false;
        self.notify.notify_one();
        debug!("Message queue resumed");
    }

    /// Final shutdown: everything still queued resolves offline. Persisted
    /// envelopes are left in the store for the next start.
    pub async fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.running = false;
        state.paused = true;
        if let Some(in_flight) = state.in_flight.take() {
            resolve_offline(in_flight.call);
        }
        for call in state.queue.drain(..) {
            resolve_offline(call);
        }
        state.pending_start_ids.clear();
        drop(state);
        self.notify.notify_one();
    }

    pub fn update_transaction_message_attempts(&self, attempts: u32) {
        self.state.lock().unwrap().transaction_message_attempts = attempts;
    }

    pub fn update_transaction_message_retry_interval(&self, interval: Duration) {
        self.state.lock().unwrap().transaction_message_retry_interval = interval;
    }

    // ── StopTransaction patching ───────────────────────────

    /// Patch the transactionId of a queued StopTransaction once the
    /// StartTransactionResponse for its session arrived.
    pub async fn add_stopped_transaction_id(&self, stop_message_id: &str, transaction_id: i32) {
        let updated = {
            let mut state = self.state.lock().unwrap();
            let mut updated = None;
            for call in state.queue.iter_mut() {
                if call.message_id == stop_message_id {
                    call.payload["transactionId"] = Value::from(transaction_id);
                    if call.persisted {
                        updated = Some((
                            call.message_id.clone(),
                            OcppFrame::call(
                                call.message_id.clone(),
                                call.message_type.action(),
                                call.payload.clone(),
                            )
                            .serialize(),
                        ));
                    }
                    break;
                }
            }
            updated
        };
        if let Some((message_id, text)) = updated {
            if let Err(e) = self.store.persist_queued_message(&message_id, &text).await {
                warn!(error = %e, "Failed to update persisted StopTransaction");
            }
        }
        self.notify.notify_one();
    }

    /// Mark a StartTransaction as fully handled (response processed, any
    /// queued StopTransaction patched), releasing held-back stops.
    pub fn notify_start_transaction_handled(&self, start_message_id: &str) {
        self.state
            .lock()
            .unwrap()
            .pending_start_ids
            .remove(start_message_id);
        self.notify.notify_one();
    }

    // ── Receive path ───────────────────────────────────────

    /// Parse an inbound frame and correlate CALLRESULT / CALLERROR with the
    /// in-flight call. CALL frames are classified and returned untouched.
    pub async fn receive(&self, raw: &str) -> Result<EnhancedMessage, FrameError> {
        match OcppFrame::parse(raw)? {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                let message_type = MessageType::from_action(&action)
                    .ok_or(FrameError::UnknownAction { action, unique_id: unique_id.clone() })?;
                Ok(EnhancedMessage {
                    unique_id,
                    message_type,
                    message_type_id: MessageTypeId::Call,
                    payload,
                    error_code: None,
                    error_description: None,
                    offline: false,
                })
            }

            OcppFrame::CallResult { unique_id, payload } => {
                let (message, persisted) = {
                    let mut state = self.state.lock().unwrap();
                    let correlates = state
                        .in_flight
                        .as_ref()
                        .is_some_and(|f| f.call.message_id == unique_id);
                    if !correlates {
                        return Err(FrameError::UnknownMessageId(unique_id));
                    }
                    let in_flight = state.in_flight.take().unwrap();
                    // pending_start_ids is NOT cleared here: a held-back
                    // StopTransaction may only go out once the response
                    // handler patched its transactionId and called
                    // notify_start_transaction_handled.

                    let call = in_flight.call;
                    let message_type =
                        call.message_type.response_type().unwrap_or(call.message_type);
                    let message = EnhancedMessage {
                        unique_id,
                        message_type,
                        message_type_id: MessageTypeId::CallResult,
                        payload,
                        error_code: None,
                        error_description: None,
                        offline: false,
                    };
                    if let Some(promise) = call.promise {
                        let _ = promise.send(message.clone());
                    }
                    let _ = in_flight.done.send(());
                    (message, call.persisted)
                };
                if persisted {
                    if let Err(e) = self.store.delete_queued_message(&message.unique_id).await {
                        warn!(error = %e, "Failed to delete acknowledged envelope");
                    }
                }
                self.notify.notify_one();
                Ok(message)
            }

            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                let (message, delete_persisted) = {
                    let mut state = self.state.lock().unwrap();
                    let correlates = state
                        .in_flight
                        .as_ref()
                        .is_some_and(|f| f.call.message_id == unique_id);
                    if !correlates {
                        return Err(FrameError::UnknownMessageId(unique_id));
                    }
                    let in_flight = state.in_flight.take().unwrap();

                    let mut call = in_flight.call;
                    let message = EnhancedMessage {
                        unique_id: unique_id.clone(),
                        message_type: call.message_type,
                        message_type_id: MessageTypeId::CallError,
                        payload: error_details,
                        error_code: Some(error_code.clone()),
                        error_description: Some(error_description),
                        offline: false,
                    };

                    let mut delete_persisted = false;
                    if call.message_type.is_transaction_related()
                        && call.attempts < state.transaction_message_attempts
                    {
                        warn!(
                            message_id = unique_id.as_str(),
                            error_code = error_code.as_str(),
                            attempt = call.attempts,
                            "CALLERROR for transaction message, scheduling retry"
                        );
                        call.not_before = Some(
                            Instant::now()
                                + state.transaction_message_retry_interval * call.attempts,
                        );
                        state.queue.push_front(call);
                    } else {
                        delete_persisted = call.persisted;
                        state.pending_start_ids.remove(&unique_id);
                        if let Some(promise) = call.promise {
                            let _ = promise.send(message.clone());
                        }
                    }
                    let _ = in_flight.done.send(());
                    (message, delete_persisted)
                };
                if delete_persisted {
                    if let Err(e) = self.store.delete_queued_message(&message.unique_id).await {
                        warn!(error = %e, "Failed to delete failed envelope");
                    }
                }
                self.notify.notify_one();
                Ok(message)
            }
        }
    }

    // ── Drain loop ─────────────────────────────────────────

    fn take_next(&self) -> NextAction {
        let mut state = self.state.lock().unwrap();
        if !state.running {
            return NextAction::Stop;
        }
        if state.paused || state.in_flight.is_some() {
            return NextAction::Wait(None);
        }

        let Some(front) = state.queue.front() else {
            return NextAction::Wait(None);
        };

        // hold back a StopTransaction still waiting on its transaction id
        if front.message_type == MessageType::StopTransaction
            && front.payload.get("transactionId").and_then(Value::as_i64) == Some(-1)
            && !state.pending_start_ids.is_empty()
        {
            return NextAction::Wait(None);
        }

        if let Some(at) = front.not_before {
            let now = Instant::now();
            if at > now {
                return NextAction::Wait(Some(at - now));
            }
        }

        let mut call = state.queue.pop_front().unwrap();
        call.attempts += 1;
        let text = OcppFrame::call(
            call.message_id.clone(),
            call.message_type.action(),
            call.payload.clone(),
        )
        .serialize();
        let (done_tx, done_rx) = oneshot::channel();
        state.in_flight = Some(InFlight {
            call,
            done: done_tx,
        });
        NextAction::Send {
            text,
            done: done_rx,
        }
    }

    /// Take the in-flight call back out after a timeout or send failure and
    /// either schedule a retry or fail it. Returns a persisted message id
    /// to delete, if any.
    fn fail_in_flight(&self, reason: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let in_flight = state.in_flight.take()?;
        let mut call = in_flight.call;

        if call.message_type.is_transaction_related()
            && call.attempts < state.transaction_message_attempts
        {
            warn!(
                message_id = call.message_id.as_str(),
                attempt = call.attempts,
                reason,
                "Transaction message unacknowledged, scheduling retry"
            );
            call.not_before =
                Some(Instant::now() + state.transaction_message_retry_interval * call.attempts);
            state.queue.push_front(call);
            None
        } else {
            warn!(
                message_id = call.message_id.as_str(),
                message_type = ?call.message_type,
                reason,
                "Dropping unacknowledged message"
            );
            state.pending_start_ids.remove(&call.message_id);
            let persisted = call.persisted.then(|| call.message_id.clone());
            resolve_offline(call);
            persisted
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            let (text, done) = match self.take_next() {
                NextAction::Stop => return,
                NextAction::Wait(None) => {
                    self.notify.notified().await;
                    continue;
                }
                NextAction::Wait(Some(delay)) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.notify.notified() => {}
                    }
                    continue;
                }
                NextAction::Send { text, done } => (text, done),
            };

            if !(self.transmit)(text).await {
                if let Some(message_id) = self.fail_in_flight("send failed") {
                    let _ = self.store.delete_queued_message(&message_id).await;
                }
                continue;
            }

            match tokio::time::timeout(MESSAGE_TIMEOUT, done).await {
                // response processed in receive(), or wait interrupted by
                // pause()/stop() dropping the sender
                Ok(_) => {}
                Err(_) => {
                    if let Some(message_id) = self.fail_in_flight("response timeout") {
                        let _ = self.store.delete_queued_message(&message_id).await;
                    }
                }
            }
        }
    }
}

fn resolve_offline(call: QueuedCall) {
    if let Some(promise) = call.promise {
        let _ = promise.send(EnhancedMessage::offline(call.message_id, call.message_type));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn recording_transmit() -> (TransmitFn, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let transmit: TransmitFn = Arc::new(move |text: String| {
            let sent = sent_clone.clone();
            Box::pin(async move {
                sent.lock().unwrap().push(text);
                true
            })
        });
        (transmit, sent)
    }

    fn queue_with(
        attempts: u32,
        retry_s: u64,
    ) -> (Arc<MessageQueue>, Arc<Mutex<Vec<String>>>, Arc<MemoryStore>) {
        let (transmit, sent) = recording_transmit();
        let store = Arc::new(MemoryStore::new());
        let queue = MessageQueue::new(
            transmit,
            store.clone(),
            attempts,
            Duration::from_secs(retry_s),
        );
        queue.start();
        queue.resume();
        (queue, sent, store)
    }

    fn sent_actions(sent: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|raw| {
                let arr: Vec<Value> = serde_json::from_str(raw).unwrap();
                arr[2].as_str().unwrap().to_string()
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn one_call_in_flight_until_acknowledged() {
        let (queue, sent, _) = queue_with(3, 60);

        let id1 = queue.create_message_id();
        let id2 = queue.create_message_id();
        queue
            .push(MessageType::Heartbeat, id1.clone(), json!({}))
            .await;
        queue
            .push(MessageType::StatusNotification, id2.clone(), json!({"connectorId": 1}))
            .await;
        settle().await;

        // second call waits for the first response
        assert_eq!(sent_actions(&sent), vec!["Heartbeat"]);

        queue
            .receive(&format!(r#"[3,"{id1}",{{"currentTime":"2024-01-01T00:00:00Z"}}]"#))
            .await
            .unwrap();
        settle().await;
        assert_eq!(sent_actions(&sent), vec!["Heartbeat", "StatusNotification"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transaction_message_retries_then_drops() {
        let (queue, sent, store) = queue_with(3, 60);

        let id = queue.create_message_id();
        queue
            .push(
                MessageType::MeterValues,
                id.clone(),
                json!({"connectorId": 1, "meterValue": []}),
            )
            .await;

        // three attempts, each waiting the 30 s response timeout plus
        // attempt * 60 s back-off, then the envelope is dropped
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert!(store.queued_messages().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_transaction_message_is_not_retried() {
        let (queue, sent, _) = queue_with(3, 60);

        queue
            .push(MessageType::Heartbeat, queue.create_message_id(), json!({}))
            .await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_transaction_waits_for_start_response() {
        let (queue, sent, _) = queue_with(3, 1);

        let start_id = queue.create_message_id();
        queue
            .push(
                MessageType::StartTransaction,
                start_id.clone(),
                json!({"connectorId": 1, "idTag": "TAG01", "meterStart": 100,
                        "timestamp": "2024-01-01T00:00:00Z"}),
            )
            .await;
        settle().await;
        assert_eq!(sent_actions(&sent), vec!["StartTransaction"]);

        let stop_id = queue.create_message_id();
        queue
            .push(
                MessageType::StopTransaction,
                stop_id.clone(),
                json!({"transactionId": -1, "meterStop": 250,
                        "timestamp": "2024-01-01T00:10:00Z"}),
            )
            .await;

        // StartTransactionResponse arrives: patch and release the stop
        queue
            .receive(&format!(
                r#"[3,"{start_id}",{{"transactionId":7,"idTagInfo":{{"status":"Accepted"}}}}]"#
            ))
            .await
            .unwrap();
        queue.add_stopped_transaction_id(&stop_id, 7).await;
        queue.notify_start_transaction_handled(&start_id);
        settle().await;

        let frames = sent.lock().unwrap().clone();
        let stop_frame: Vec<Value> = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(stop_frame[2], "StopTransaction");
        assert_eq!(stop_frame[3]["transactionId"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn push_async_resolves_offline_when_paused() {
        let (queue, _, _) = queue_with(3, 60);
        queue.pause();

        let reply = queue
            .push_async(
                MessageType::Authorize,
                queue.create_message_id(),
                json!({"idTag": "TAG01"}),
            )
            .await;
        assert!(reply.offline);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_keeps_transaction_envelopes_for_resume() {
        let (queue, sent, _) = queue_with(3, 60);
        queue.pause();

        queue
            .push(
                MessageType::StartTransaction,
                queue.create_message_id(),
                json!({"connectorId": 1, "idTag": "T", "meterStart": 0,
                        "timestamp": "2024-01-01T00:00:00Z"}),
            )
            .await;
        settle().await;
        assert!(sent.lock().unwrap().is_empty());

        queue.resume();
        settle().await;
        assert_eq!(sent_actions(&sent), vec!["StartTransaction"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_rehydrates_persisted_envelopes() {
        let store = Arc::new(MemoryStore::new());
        store
            .persist_queued_message(
                "boot-1",
                r#"[2,"boot-1","MeterValues",{"connectorId":1,"meterValue":[]}]"#,
            )
            .await
            .unwrap();

        let (transmit, sent) = recording_transmit();
        let queue = MessageQueue::new(transmit, store, 3, Duration::from_secs(60));
        queue.restore().await;
        queue.start();
        queue.resume();
        settle().await;

        assert_eq!(sent_actions(&sent), vec!["MeterValues"]);
    }

    #[tokio::test(start_paused = true)]
    async fn message_ids_are_unique() {
        let (queue, _, _) = queue_with(3, 60);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(queue.create_message_id()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn call_error_resolves_non_transaction_future() {
        let (queue, sent, _) = queue_with(3, 60);

        let id = queue.create_message_id();
        let wait = tokio::spawn({
            let queue = queue.clone();
            let id = id.clone();
            async move {
                queue
                    .push_async(MessageType::DataTransfer, id, json!({"vendorId": "V"}))
                    .await
            }
        });
        settle().await;
        assert_eq!(sent_actions(&sent), vec!["DataTransfer"]);

        queue
            .receive(&format!(r#"[4,"{id}","NotSupported","",{{}}]"#))
            .await
            .unwrap();
        let reply = wait.await.unwrap();
        assert!(!reply.offline);
        assert_eq!(reply.message_type_id, MessageTypeId::CallError);
        assert_eq!(reply.error_code.as_deref(), Some("NotSupported"));
    }
}
