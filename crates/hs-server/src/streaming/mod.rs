//! Live transcoding: session runner, output monitor and active-stream tracking.

pub mod active;
pub mod monitor;
pub mod session;

pub use active::{ActiveGuard, ActiveStreamInfo, ActiveStreams, StreamLabel};
pub use monitor::{RateWindow, Rates, SpeedMonitor};
pub use session::{
    launch, transition, PumpError, SessionConfig, SessionEvent, SessionState, StartedSession,
};
