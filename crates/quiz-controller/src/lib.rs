//! Quiz Controller Service Library
//!
//! This library provides the core of the real-time multiplayer quiz
//! coordinator - a stateful WebSocket server responsible for:
//!
//! - Room creation, lookup and join by short room code
//! - Synchronized rounds (question, countdown timer, reveal, next question)
//! - Early round completion when every participant has answered
//! - Streak-aware scoring and final standings
//! - Owner-disconnect and transport-fault handling
//!
//! # Architecture
//!
//! The controller uses an actor model hierarchy:
//!
//! ```text
//! SessionRegistryActor (one per process, explicitly constructed)
//! ├── owns code -> session and identity -> code maps
//! └── supervises N SessionActors
//!     └── SessionActor (one per live room)
//!         ├── owns participants, round index and phase
//!         ├── broadcasts through per-participant ConnectionHandles
//!         └── drives RoundTimer and scheduled continuations
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry and session actors, round timer, broadcast
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`observability`] - Prometheus metrics and health endpoints
//! - [`protocol`] - JSON wire messages exchanged with clients
//! - [`questions`] - Question data and the in-memory question bank
//! - [`scoring`] - Points and streak bookkeeping
//! - [`transport`] - WebSocket adapter that feeds the registry

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod questions;
pub mod scoring;
pub mod transport;
