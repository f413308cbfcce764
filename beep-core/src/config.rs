//! Peer-wide tunables.

use std::time::Duration;

use crate::wire::DEFAULT_WINDOW_SIZE;

/// Configuration shared by every connection a peer accepts or dials.
///
/// Construct with [`PeerConfig::builder`]; unset fields take the documented
/// defaults.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub window_size: u32,
    pub max_partial_frame: usize,
    pub outstanding_msg_limit: usize,
    pub max_frame_size: usize,
    pub start_timeout: Duration,
    pub close_timeout: Duration,
    pub outbound_queue_depth: usize,
    pub dispatch_pool_size: usize,
    /// When set, channels beyond zero are refused with `AuthRequired` until
    /// a SASL profile handler calls `ConnectionInner::mark_auth_complete`.
    /// The security profile itself is a collaborator outside this crate;
    /// this only gates the hook it needs.
    pub require_auth: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            max_partial_frame: 64 * 1024,
            outstanding_msg_limit: 256,
            max_frame_size: 4096,
            start_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(30),
            outbound_queue_depth: 64,
            dispatch_pool_size: 4,
            require_auth: false,
        }
    }
}

impl PeerConfig {
    pub fn builder() -> PeerConfigBuilder {
        PeerConfigBuilder::default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PeerConfigBuilder {
    config: PeerConfigOverrides,
}

#[derive(Clone, Debug, Default)]
struct PeerConfigOverrides {
    window_size: Option<u32>,
    max_partial_frame: Option<usize>,
    outstanding_msg_limit: Option<usize>,
    max_frame_size: Option<usize>,
    start_timeout: Option<Duration>,
    close_timeout: Option<Duration>,
    outbound_queue_depth: Option<usize>,
    dispatch_pool_size: Option<usize>,
    require_auth: Option<bool>,
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$name = Some(value);
            self
        }
    };
}

impl PeerConfigBuilder {
    builder_field!(window_size, u32);
    builder_field!(max_partial_frame, usize);
    builder_field!(outstanding_msg_limit, usize);
    builder_field!(max_frame_size, usize);
    builder_field!(start_timeout, Duration);
    builder_field!(close_timeout, Duration);
    builder_field!(outbound_queue_depth, usize);
    builder_field!(dispatch_pool_size, usize);
    builder_field!(require_auth, bool);

    pub fn build(self) -> PeerConfig {
        let defaults = PeerConfig::default();
        PeerConfig {
            window_size: self.config.window_size.unwrap_or(defaults.window_size),
            max_partial_frame: self.config.max_partial_frame.unwrap_or(defaults.max_partial_frame),
            outstanding_msg_limit: self
                .config
                .outstanding_msg_limit
                .unwrap_or(defaults.outstanding_msg_limit),
            max_frame_size: self.config.max_frame_size.unwrap_or(defaults.max_frame_size),
            start_timeout: self.config.start_timeout.unwrap_or(defaults.start_timeout),
            close_timeout: self.config.close_timeout.unwrap_or(defaults.close_timeout),
            outbound_queue_depth: self
                .config
                .outbound_queue_depth
                .unwrap_or(defaults.outbound_queue_depth),
            dispatch_pool_size: self.config.dispatch_pool_size.unwrap_or(defaults.dispatch_pool_size),
            require_auth: self.config.require_auth.unwrap_or(defaults.require_auth),
        }
    }
}
