//! Routing of decoded frames to the correlators waiting for them.
//!
//! Four registries are kept:
//! - a single slot for the one outstanding synchronous request,
//! - a map from notification code to a long-lived correlator,
//! - an ephemeral list of per-request correlators, matched on all criteria
//!   and removed once they fire,
//! - a permanent list of subscriptions, matched on the criteria they declare
//!   and kept after firing.
//!
//! Application messages and data confirms try the ephemeral list first.
//! Only application messages fall through to the permanent list when
//! nothing there matches; an unclaimed data confirm is dropped.

pub mod correlator;
pub mod criteria;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::protocol::command::{CommandCode, CommandType, codes};
use crate::protocol::frame::Frame;
use crate::protocol::parser::{parse_data_confirm, parse_incoming_message};
use crate::protocol::wire::ByteOrder;
use crate::types::{DataConfirm, IncomingMessage};

pub use correlator::{Completion, Correlator, Handler, Payload};
pub use criteria::MatchCriteria;

/// A frame after classification.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Synchronous reply (SRSP).
    SyncReply(Frame),
    /// Asynchronous notification with a fixed code (AREQ).
    Notification(Frame),
    /// Incoming application message.
    Application {
        /// Decoded message.
        message: IncomingMessage,
        /// Raw frame payload.
        raw: Bytes,
    },
    /// Delivery confirmation for an earlier data request.
    DataConfirm {
        /// Decoded confirm.
        confirm: DataConfirm,
        /// Raw frame payload.
        raw: Bytes,
    },
}

/// Where a frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Completed the pending synchronous request.
    SyncReply,
    /// Delivered to a code-keyed correlator.
    CodeKeyed,
    /// Matched and removed an ephemeral correlator.
    Ephemeral,
    /// Matched a permanent subscription.
    Permanent,
    /// Nothing wanted the frame.
    Unroutable,
}

/// Number of entries in each registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    /// True while a synchronous request is outstanding.
    pub pending: bool,
    /// Code-keyed correlators.
    pub code_keyed: usize,
    /// Ephemeral correlators.
    pub ephemeral: usize,
    /// Permanent subscriptions.
    pub permanent: usize,
}

#[derive(Debug)]
struct PendingReply {
    expected: CommandCode,
    correlator: Arc<Correlator>,
}

/// The driver's correlator registries.
#[derive(Debug)]
pub struct DispatchTables {
    pending: Mutex<Option<PendingReply>>,
    code_keyed: RwLock<HashMap<CommandCode, Arc<Correlator>>>,
    ephemeral: Mutex<Vec<Arc<Correlator>>>,
    permanent: RwLock<Vec<Arc<Correlator>>>,
    endpoint_profiles: RwLock<HashMap<u8, u16>>,
    order: ByteOrder,
}

impl DispatchTables {
    /// Creates empty tables.
    #[must_use]
    pub fn new(order: ByteOrder) -> Self {
        Self {
            pending: Mutex::new(None),
            code_keyed: RwLock::new(HashMap::new()),
            ephemeral: Mutex::new(Vec::new()),
            permanent: RwLock::new(Vec::new()),
            endpoint_profiles: RwLock::new(HashMap::new()),
            order,
        }
    }

    /// Returns the byte order used to decode payloads.
    #[must_use]
    pub const fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Arms the single slot for a reply with code `expected`.
    ///
    /// Any previous occupant is dropped; callers serialize synchronous
    /// requests so it has already been collected or timed out.
    pub fn register_single_slot(&self, expected: CommandCode) -> Arc<Correlator> {
        let correlator = Arc::new(Correlator::new());
        let previous = lock(&self.pending).replace(PendingReply {
            expected,
            correlator: Arc::clone(&correlator),
        });
        if let Some(previous) =
            previous.filter(|p| p.correlator.state() == Completion::Pending)
        {
            tracing::warn!("replacing pending request for {}", previous.expected);
            previous.correlator.cancel();
        }
        correlator
    }

    /// Clears the single slot if it still holds `correlator`.
    pub fn clear_single_slot(&self, correlator: &Arc<Correlator>) {
        let mut pending = lock(&self.pending);
        if pending
            .as_ref()
            .is_some_and(|p| Arc::ptr_eq(&p.correlator, correlator))
        {
            *pending = None;
        }
    }

    /// Registers a correlator for a notification code, returning the one it replaces.
    pub fn register_code_keyed(
        &self,
        code: CommandCode,
        correlator: Arc<Correlator>,
    ) -> Option<Arc<Correlator>> {
        write(&self.code_keyed).insert(code, correlator)
    }

    /// Removes the correlator registered for `code`.
    pub fn remove_code_keyed(&self, code: CommandCode) -> Option<Arc<Correlator>> {
        write(&self.code_keyed).remove(&code)
    }

    /// Returns the correlator registered for `code`.
    #[must_use]
    pub fn code_keyed(&self, code: CommandCode) -> Option<Arc<Correlator>> {
        read(&self.code_keyed).get(&code).cloned()
    }

    /// Adds a per-request correlator.
    ///
    /// A fire-and-forget entry with the same criteria is evicted first: no
    /// one waits on it, so nothing else would ever remove it.
    pub fn register_ephemeral(&self, correlator: Arc<Correlator>) {
        let mut list = lock(&self.ephemeral);
        list.retain(|c| c.wants_wait() || c.criteria() != correlator.criteria());
        list.push(correlator);
    }

    /// Removes a per-request correlator. Returns false if it already fired.
    pub fn remove_ephemeral(&self, correlator: &Arc<Correlator>) -> bool {
        let mut list = lock(&self.ephemeral);
        if let Some(index) = list.iter().position(|c| Arc::ptr_eq(c, correlator)) {
            list.remove(index);
            true
        } else {
            false
        }
    }

    /// Adds a long-lived subscription.
    pub fn register_permanent(&self, correlator: Arc<Correlator>) {
        write(&self.permanent).push(correlator);
    }

    /// Removes a subscription.
    pub fn remove_permanent(&self, correlator: &Arc<Correlator>) -> bool {
        let mut list = write(&self.permanent);
        let before = list.len();
        list.retain(|c| !Arc::ptr_eq(c, correlator));
        list.len() != before
    }

    /// Records the profile served by a local endpoint.
    ///
    /// Incoming messages do not carry a profile id; it is looked up from
    /// their destination endpoint.
    pub fn set_endpoint_profile(&self, endpoint: u8, profile_id: u16) {
        write(&self.endpoint_profiles).insert(endpoint, profile_id);
    }

    /// Returns the registry sizes.
    #[must_use]
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            pending: lock(&self.pending).is_some(),
            code_keyed: read(&self.code_keyed).len(),
            ephemeral: lock(&self.ephemeral).len(),
            permanent: read(&self.permanent).len(),
        }
    }

    /// Classifies a frame by its code.
    #[must_use]
    pub fn classify(&self, frame: Frame) -> Inbound {
        if frame.code == codes::AF_INCOMING_MSG {
            match parse_incoming_message(&frame.payload, self.order) {
                Ok(mut message) => {
                    message.profile_id = read(&self.endpoint_profiles)
                        .get(&message.dst_endpoint)
                        .copied();
                    return Inbound::Application {
                        message,
                        raw: frame.payload,
                    };
                }
                Err(e) => tracing::warn!("malformed incoming message: {}", e),
            }
        } else if frame.code == codes::AF_DATA_CONFIRM {
            match parse_data_confirm(&frame.payload) {
                Ok(confirm) => {
                    return Inbound::DataConfirm {
                        confirm,
                        raw: frame.payload,
                    };
                }
                Err(e) => tracing::warn!("malformed data confirm: {}", e),
            }
        }

        if frame.code.command_type() == Some(CommandType::SyncResponse) {
            Inbound::SyncReply(frame)
        } else {
            Inbound::Notification(frame)
        }
    }

    /// Delivers an inbound frame to the correlator that wants it.
    ///
    /// Handlers run after every table lock has been released.
    pub fn route(&self, inbound: Inbound) -> RouteOutcome {
        match inbound {
            Inbound::SyncReply(frame) => self.route_sync_reply(frame),
            Inbound::Notification(frame) => self.route_notification(frame),
            Inbound::Application { message, raw } => {
                let key = MatchCriteria::from_message(&message);
                let status = message
                    .zcl()
                    .ok()
                    .and_then(|zcl| zcl.default_response_status());
                match self.claim_ephemeral(&key, status, Payload::value(message), &raw) {
                    Some(unclaimed) => self.route_permanent(&key, unclaimed, &raw),
                    None => RouteOutcome::Ephemeral,
                }
            }
            Inbound::DataConfirm { confirm, raw } => {
                let key = MatchCriteria::from_confirm(&confirm);
                let status = Some(confirm.status);
                if self
                    .claim_ephemeral(&key, status, Payload::value(confirm), &raw)
                    .is_some()
                {
                    tracing::debug!("no request waiting for confirm {:?}", key);
                    return RouteOutcome::Unroutable;
                }
                RouteOutcome::Ephemeral
            }
        }
    }

    /// Cancels every correlator a caller may be waiting on.
    ///
    /// Code-keyed entries stay registered so that a later
    /// [`Correlator::reset`] can re-arm them.
    pub fn cancel_all(&self) {
        if let Some(pending) = lock(&self.pending).take() {
            pending.correlator.cancel();
        }
        let ephemeral: Vec<_> = lock(&self.ephemeral).drain(..).collect();
        for correlator in ephemeral {
            correlator.cancel();
        }
        let keyed: Vec<_> = read(&self.code_keyed).values().cloned().collect();
        for correlator in keyed {
            correlator.cancel();
        }
    }

    /// Cancels everything and empties every registry.
    pub fn clear(&self) {
        self.cancel_all();
        write(&self.code_keyed).clear();
        write(&self.permanent).clear();
        write(&self.endpoint_profiles).clear();
    }

    fn route_sync_reply(&self, frame: Frame) -> RouteOutcome {
        let taken = {
            let mut pending = lock(&self.pending);
            let wanted = pending
                .as_ref()
                .is_some_and(|p| p.expected == frame.code || frame.code == codes::RPC_ERROR);
            if wanted {
                pending.take()
            } else {
                None
            }
        };

        let Some(pending) = taken else {
            tracing::debug!("unexpected SRSP {}", frame.code);
            return RouteOutcome::Unroutable;
        };

        if frame.code == codes::RPC_ERROR {
            let code = frame.payload.first().copied().unwrap_or(1);
            tracing::warn!(
                "radio rejected {} with RPC error 0x{:02x}",
                pending.expected,
                code
            );
            pending
                .correlator
                .fail(code, Some(Payload::Bytes(frame.payload)));
        } else {
            pending.correlator.complete(frame.payload);
        }
        RouteOutcome::SyncReply
    }

    fn route_notification(&self, frame: Frame) -> RouteOutcome {
        let Some(correlator) = self.code_keyed(frame.code) else {
            tracing::debug!("no handler for notification {}", frame.code);
            return RouteOutcome::Unroutable;
        };
        if !correlator.run_handler(&frame.payload) {
            correlator.complete(frame.payload);
        }
        RouteOutcome::CodeKeyed
    }

    /// Hands `payload` to the ephemeral entry matching `key` exactly.
    ///
    /// Returns the payload back when no entry claims it.
    fn claim_ephemeral(
        &self,
        key: &MatchCriteria,
        status: Option<u8>,
        payload: Payload,
        raw: &Bytes,
    ) -> Option<Payload> {
        let matched = {
            let mut list = lock(&self.ephemeral);
            list.iter()
                .position(|c| c.criteria().is_some_and(|want| want.matches_exactly(key)))
                .map(|index| list.remove(index))
        };

        if let Some(correlator) = matched {
            if correlator.has_handler() {
                correlator.set_payload(payload);
                correlator.run_handler(raw);
            } else if correlator.wants_wait() {
                match status {
                    Some(code) if code != 0 => {
                        correlator.fail(code, Some(payload));
                    }
                    _ => {
                        correlator.complete(payload);
                    }
                }
            }
            return None;
        }
        Some(payload)
    }

    fn route_permanent(&self, key: &MatchCriteria, payload: Payload, raw: &Bytes) -> RouteOutcome {
        let subscription = read(&self.permanent)
            .iter()
            .find(|c| c.criteria().is_some_and(|want| want.matches_partially(key)))
            .cloned();

        if let Some(correlator) = subscription {
            correlator.set_payload(payload);
            if !correlator.run_handler(raw) {
                tracing::debug!("subscription without handler matched {:?}", key);
            }
            return RouteOutcome::Permanent;
        }

        tracing::debug!("no correlator for {:?}", key);
        RouteOutcome::Unroutable
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
