//! Live multi-stream face tracking and recognition.
//!
//! Each stream session captures frames, runs detection on an adaptive
//! schedule, associates detections into stable tracked identities and
//! throttles recognition calls per identity. The session manager owns
//! the sessions and aggregates statistics and a bounded event log.

pub mod capture;
pub mod detection;
pub mod quality;
pub mod recognition;
pub mod session;
pub mod shared;
pub mod tracking;
