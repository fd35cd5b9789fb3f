//! Stage board: pipelines, stage transitions, automation and dwell analytics.
//!
//! ## Overview
//!
//! Work items ("pipeline items") move through the ordered stages of a
//! pipeline. Every move is recorded in an append-only stage history, an
//! optional per-stage rule turns an arrival into a follow-up task, and the
//! analytics reports derive dwell times from the history.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │  / CLI   │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │ DbHandle::call (spawn_blocking)        │
//!                       │         v                                        │
//!                       │  db.rs  (BoardDb: connection, schema, tx)        │
//!                       │    ├─ stages.rs     Stage Store                  │
//!                       │    ├─ items.rs      Item Tracker ──┐             │
//!                       │    ├─ history.rs    Ledger  <──────┤ in tx       │
//!                       │    ├─ rules.rs      Rule Engine <──┘ after commit│
//!                       │    └─ analytics.rs  reports (read-only)          │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! | Module      | Responsibility                                           |
//! |-------------|----------------------------------------------------------|
//! | `models`    | Entities and report types: `Stage`, `PipelineItem`, ...  |
//! | `db`        | `BoardDb` connection and schema, `DbHandle` for async    |
//! | `stages`    | Pipelines and contiguous stage ordering                  |
//! | `items`     | Item lifecycle and the `move_item` transition            |
//! | `history`   | Open/closed stage intervals per item                     |
//! | `rules`     | One rule per stage, task generation                      |
//! | `analytics` | Per-stage report and cross-pipeline velocity             |
//!
//! ## Typical Move
//!
//! 1. `POST /api/items/{id}/move` → `api::move_item()` reads the item.
//! 2. `BoardDb::move_item_from()` begins an immediate transaction, reads the
//!    clock, closes the open history entry for the item's stage (`WHERE left_at IS NULL`),
//!    opens the new entry and repoints the item. Zero closed rows means a
//!    concurrent move won: the transaction rolls back with
//!    `TransitionConflict` (HTTP 409, retryable).
//! 3. After commit, the destination stage's rule (if any) creates a task.
//!    A failure there is logged with `warn!` and the move still succeeds.

pub mod analytics;
pub mod api;
pub mod db;
pub mod history;
pub mod items;
pub mod models;
pub mod rules;
pub mod server;
pub mod stages;
