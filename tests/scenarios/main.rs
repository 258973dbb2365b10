//! Scenario test suite for txstore
//!
//! End-to-end scenarios through the public facade:
//!
//! - `isolation`: copy isolation, original values, read-only snapshots,
//!   last-writer-wins
//! - `listeners`: modification listeners and dirty checking
//! - `views`: tracked views, including replay equivalence
//! - `stress`: several threads against one container
//! - `logging`: tracing output of the commit protocol
//!
//! ```bash
//! cargo test --test scenarios
//! cargo test --test scenarios views::
//! ```

#[path = "../common/mod.rs"]
mod common;

mod isolation;
mod listeners;
mod logging;
mod stress;
mod views;
