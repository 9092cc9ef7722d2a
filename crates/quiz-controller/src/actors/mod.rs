//! Actor model for the quiz controller.
//!
//! # Hierarchy
//!
//! ```text
//! SessionRegistryActor (singleton)
//!   ├── SessionActor (one per room code)
//!   │     ├── Scheduler / RoundTimer (spawned continuation tasks)
//!   │     └── ConnectionHandle (one outbound queue per participant)
//!   └── SessionActor ...
//! ```
//!
//! # Cancellation
//!
//! The registry owns the root `CancellationToken`. Each session gets a child
//! token and each scheduled continuation gets a child of its session's token,
//! so cancelling the registry closes every room and silences every timer.
//!
//! # Message passing
//!
//! Handles wrap an `mpsc::Sender`; request/reply goes through `oneshot`.
//! Sessions report closures and transport faults to the registry over an
//! unbounded event channel so they never block on it.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod timer;

pub use connection::ConnectionHandle;
pub use messages::{
    CloseReason, Continuation, CreateSessionRequest, LeaveOutcome, ParticipantState, Phase,
    RegistryStatus, RevealTrigger, SessionEvent, SessionSnapshot,
};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{
    generate_room_code, normalize_code, unique_room_code, SessionRegistryHandle, ROOM_CODE_LENGTH,
};
pub use session::{SessionActor, SessionHandle, SessionSpawn};
pub use timer::{RoundTimer, Scheduler};
