//! Connection-wide session state: the channel map, channel-zero
//! orchestration, and the shared state reader/writer tasks operate on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::channel::Channel;
use crate::config::PeerConfig;
use crate::dispatch::DispatchPool;
use crate::error::{BeepError, ProtocolError, ReplyCode};
use crate::events::{Event, EventMask, EventSender};
use crate::greeting::{self, ManagementMessage, ProfileOffer};
use crate::registry::{ProfileRegistry, StartDecision};
use crate::reply::ReplyScheduler;
use crate::sequencer::Sequencer;
use crate::transport::Transport;

/// Which side of the connection this peer played when it was established.
/// Channel numbers are allocated with even/odd parity by role, per RFC 3080
/// section 2.3.1.2: the connection initiator uses even numbers, the
/// listener uses odd, so both sides can allocate without colliding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Listener,
}

impl Role {
    fn parity(self) -> u32 {
        match self {
            Role::Initiator => 0,
            Role::Listener => 1,
        }
    }
}

/// Shared connection state. Held behind `Arc` so reader task, writer task,
/// and application-facing handles can all reach it; internal mutability is
/// via `parking_lot` locks, never `std::sync`.
///
/// Lock ordering: `channels` before any individual channel's own state is
/// touched; never acquire `channels` while holding `reply_schedulers` or
/// `sequencer`, to avoid an inversion between the reader and writer tasks.
pub struct ConnectionInner {
    pub role: Role,
    transport: RwLock<Transport>,
    pub config: PeerConfig,
    pub registry: ProfileRegistry,
    pub channels: Mutex<HashMap<u32, Channel>>,
    pub reply_schedulers: Mutex<HashMap<u32, ReplyScheduler>>,
    pub sequencer: Mutex<Sequencer>,
    pub events: EventSender,
    pub greeted_local: AtomicBool,
    pub greeted_remote: AtomicBool,
    /// Bound once the first channel successfully starts; RFC 3080 permits a
    /// server to offer a different `serverName` per connection but requires
    /// it stay fixed thereafter.
    pub server_name: RwLock<Option<String>>,
    next_channel_hint: Mutex<u32>,
    /// Outbound channel-zero requests awaiting their `<ok>`/`<error>`,
    /// keyed by the MSG number they were sent with, so the reply handler
    /// can materialize (or tear down) local channel state once the peer
    /// answers. RFC 3080 gives the client no other signal for this: the
    /// `<ok/>` to a `<start>` carries no body, so the first offered profile
    /// is assumed accepted.
    pending_zero_requests: Mutex<HashMap<u32, ZeroRequest>>,
    /// Gate for channels beyond zero, set by a SASL profile handler once it
    /// considers the peer authenticated. A security-profile collaborator is
    /// out of scope here, but the hook it needs is not: see
    /// [`ConnectionInner::mark_auth_complete`].
    auth_complete: AtomicBool,
    /// Escape hatch for security/higher-profile collaborators that need to
    /// stash connection-scoped state this crate has no typed field for.
    pub extensions: Extensions,
    /// Runs profile frame handlers off the reader task so one slow handler
    /// can't stall frame delivery for other channels.
    pub dispatch: DispatchPool,
}

#[derive(Clone)]
enum ZeroRequest {
    Start { channel: u32, profile: String },
    Close { channel: u32 },
}

impl ConnectionInner {
    pub fn new(
        role: Role,
        transport: Transport,
        config: PeerConfig,
        registry: ProfileRegistry,
        events: EventSender,
    ) -> Arc<Self> {
        let mut channels = HashMap::new();
        channels.insert(0, Channel::new(0, config.window_size, config.outstanding_msg_limit));
        let next_hint = match role {
            Role::Initiator => 2,
            Role::Listener => 1,
        };
        let dispatch = DispatchPool::new(config.dispatch_pool_size, config.outbound_queue_depth);
        Arc::new(ConnectionInner {
            role,
            transport: RwLock::new(transport),
            config,
            registry,
            channels: Mutex::new(channels),
            reply_schedulers: Mutex::new(HashMap::from([(0, ReplyScheduler::new())])),
            sequencer: Mutex::new(Sequencer::new(64)),
            events,
            greeted_local: AtomicBool::new(false),
            greeted_remote: AtomicBool::new(false),
            server_name: RwLock::new(None),
            next_channel_hint: Mutex::new(next_hint),
            pending_zero_requests: Mutex::new(HashMap::new()),
            auth_complete: AtomicBool::new(false),
            extensions: Extensions::new(),
            dispatch,
        })
    }

    /// A cheap clone of the current transport handle, for the reader/writer
    /// loops to call `send_frame`/`recv_frame`/`close` on without holding the
    /// lock across an `.await`.
    pub fn transport(&self) -> Transport {
        self.transport.read().clone()
    }

    /// Replace the underlying transport in place, e.g. once a SASL/TLS
    /// profile has finished negotiating and the connection should continue
    /// over a wrapped stream. Existing reader/writer tasks pick up the new
    /// transport on their next loop iteration.
    pub fn swap_transport(&self, new: Transport) {
        *self.transport.write() = new;
    }

    /// Whether a security profile has marked this connection authenticated.
    /// Always `true` for connections that never gate on it.
    pub fn is_auth_complete(&self) -> bool {
        self.auth_complete.load(Ordering::Acquire)
    }

    /// Called by a SASL profile handler once it accepts the peer's
    /// credentials. Channel starts beyond channel zero are refused with
    /// [`ReplyCode::AuthRequired`] until this is called, when
    /// [`PeerConfig::require_auth`] is set.
    pub fn mark_auth_complete(&self) {
        self.auth_complete.store(true, Ordering::Release);
    }

    /// Record that `msg_no` is a `<start>` request for `channel` offering
    /// `profile` first, so the reply path can create the channel locally
    /// once `<ok/>` arrives.
    pub fn note_pending_start(&self, msg_no: u32, channel: u32, profile: String) {
        self.pending_zero_requests
            .lock()
            .insert(msg_no, ZeroRequest::Start { channel, profile });
    }

    /// Record that `msg_no` is a `<close>` request for `channel`.
    pub fn note_pending_close(&self, msg_no: u32, channel: u32) {
        self.pending_zero_requests.lock().insert(msg_no, ZeroRequest::Close { channel });
    }

    /// Apply the local side-effect of a channel-zero `<ok/>` reply: create
    /// the channel for an accepted `<start>`, or finish tearing one down for
    /// a `<close>`. No-op if `msg_no` wasn't a request we're tracking.
    pub fn apply_pending_zero_ok(&self, msg_no: u32) {
        let Some(req) = self.pending_zero_requests.lock().remove(&msg_no) else { return };
        match req {
            ZeroRequest::Start { channel, profile } => {
                let mut channels = self.channels.lock();
                let mut ch = Channel::new(channel, self.config.window_size, self.config.outstanding_msg_limit);
                ch.mark_ready(profile);
                channels.insert(channel, ch);
                self.reply_schedulers.lock().insert(channel, ReplyScheduler::new());
            }
            ZeroRequest::Close { channel } => {
                let mut channels = self.channels.lock();
                if let Some(ch) = channels.get_mut(&channel) {
                    ch.begin_close(true);
                    ch.finish_close();
                }
            }
        }
    }

    /// Allocate the next channel number this side may use, respecting the
    /// initiator-even / listener-odd parity convention.
    pub fn allocate_channel_number(&self) -> u32 {
        let mut hint = self.next_channel_hint.lock();
        let channels = self.channels.lock();
        let mut candidate = *hint;
        while channels.contains_key(&candidate) {
            candidate = candidate.wrapping_add(2);
        }
        *hint = candidate.wrapping_add(2);
        candidate
    }

    pub fn greeting_message(&self) -> ManagementMessage {
        ManagementMessage::Greeting {
            profiles: self.registry.uris().map(str::to_string).collect(),
        }
    }

    pub fn on_greeting_received(&self, msg: &ManagementMessage) -> Result<(), ProtocolError> {
        if self.greeted_remote.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::DuplicateGreeting);
        }
        if !matches!(msg, ManagementMessage::Greeting { .. }) {
            return Err(ProtocolError::BadGreeting("expected <greeting> as first message".into()));
        }
        Ok(())
    }

    /// Handle an incoming `<start>` request: pick a supported profile and
    /// build the `<ok>`/`<error>` response, creating the channel on accept.
    pub fn handle_start_request(&self, channel: u32, profiles: &[ProfileOffer]) -> ManagementMessage {
        if self.channels.lock().contains_key(&channel) {
            return error_response(ReplyCode::ParameterInvalid, "channel already in use");
        }
        let expected_parity = 1 - self.role.parity();
        if channel % 2 != expected_parity {
            return error_response(ReplyCode::ParameterInvalid, "channel number has the wrong parity");
        }
        if self.config.require_auth && !self.is_auth_complete() {
            return error_response(ReplyCode::AuthRequired, "authentication required before this channel");
        }

        for offer in profiles {
            let Some(entry) = self.registry.get(&offer.uri) else { continue };
            let decision = (entry.start_handler)(channel, offer.piggyback.as_deref().map(str::as_bytes));
            match decision {
                StartDecision::Accept { piggyback } => {
                    let mut channels = self.channels.lock();
                    let mut ch = Channel::new(channel, self.config.window_size, self.config.outstanding_msg_limit);
                    ch.mark_ready(entry.uri.clone());
                    channels.insert(channel, ch);
                    self.reply_schedulers.lock().insert(channel, ReplyScheduler::new());
                    let _ = piggyback;
                    return ManagementMessage::Ok;
                }
                StartDecision::Refuse { code, diagnostic } => {
                    return ManagementMessage::Error { code: code.as_u16(), diagnostic };
                }
            }
        }
        error_response(ReplyCode::TransactionFailed, "no offered profile is supported")
    }

    /// Handle an incoming `<close>` request for `channel`, resolving the
    /// close-in-transit race if our own close is already pending.
    pub fn handle_close_request(&self, channel: u32) -> ManagementMessage {
        let mut channels = self.channels.lock();
        let Some(ch) = channels.get_mut(&channel) else {
            return error_response(ReplyCode::ParameterInvalid, "unknown channel");
        };
        if !ch.drained() {
            return error_response(ReplyCode::StillWorking, "channel has outstanding messages");
        }
        ch.begin_close(false);
        ch.finish_close();
        ManagementMessage::Ok
    }

    pub fn emit(&self, kind: EventMask, channel: u32, detail: impl Into<String>) {
        let sender = self.events.clone();
        let event = Event::new(kind, channel, detail);
        tokio::spawn(async move { sender.send(event).await });
    }

    pub fn into_error(&self, e: ProtocolError) -> BeepError {
        self.transport().close();
        BeepError::Protocol(e)
    }
}

fn error_response(code: ReplyCode, diagnostic: &str) -> ManagementMessage {
    ManagementMessage::Error { code: code.as_u16(), diagnostic: diagnostic.to_string() }
}

/// Typed escape hatch for connection-scoped state this crate has no field
/// for: one value per type, set by whichever collaborator owns that type.
#[derive(Default)]
pub struct Extensions {
    values: Mutex<HashMap<std::any::TypeId, Box<dyn std::any::Any + Send + Sync>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Extensions::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.values.lock().insert(std::any::TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.values.lock().get(&std::any::TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn remove<T: Send + Sync + 'static>(&self) {
        self.values.lock().remove(&std::any::TypeId::of::<T>());
    }
}

/// Render a management message to the bytes sent as a channel-zero MSG/RPY
/// payload.
pub fn render(msg: &ManagementMessage) -> bytes::Bytes {
    bytes::Bytes::from(greeting::emit(msg))
}
