//! # QC Test Utilities
//!
//! Shared test utilities for the Quiz Controller.
//!
//! - `fixtures` - Question builders, session timings and a test registry
//! - `client` - A fake participant wrapping a connection's outbound queue
//!
//! ## Usage
//!
//! ```rust,ignore
//! use qc_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_owner_gets_room_code() {
//!     let registry = test_registry();
//!     let (mut ann, request) = TestClient::owner("Ann", sample_questions(3));
//!     let snapshot = registry.create_session(request).await.unwrap();
//!
//!     ann.wait_for("room_created").await;
//!     assert_eq!(snapshot.owner, "Ann");
//! }
//! ```

pub mod client;
pub mod fixtures;

pub use client::*;
pub use fixtures::*;
