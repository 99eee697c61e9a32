//! CloakWork Core Library
//!
//! This crate provides the cosmetic-filtering selector poller: the piece of a
//! content blocker that discovers new `id`/`class` attribute values on a page,
//! asks the native filtering engine which CSS selectors should hide them,
//! applies the hide rules through a single owned stylesheet, and then
//! progressively re-evaluates hidden elements to unhide the ones that turn
//! out to be first-party content.
//!
//! # Architecture
//!
//! The poller is DOM-agnostic and clock-agnostic: every DOM read goes through
//! the [`dom::Dom`] trait and every timestamp is supplied by the host. The
//! same session therefore runs against a real page (the `cw-wasm` crate) and
//! against an in-memory tree on a virtual clock (the `cw-dom` crate and the
//! `cw-cli` simulator).
//!
//! # Modules
//!
//! - `collect`: attribute collector and the observe/poll mode machine
//! - `config`: injection-time configuration surface and tuning constants
//! - `dom`: the DOM abstraction the poller runs against
//! - `engine`: message types for the native-engine boundary
//! - `gate`: throttled fetch gate in front of the native engine
//! - `party`: first/third-party subtree classification heuristic
//! - `session`: the per-page session owning all poller state
//! - `style`: hide/style rule registry backing the injected stylesheet
//! - `timing`: idle-debounce and rolling-score primitives
//! - `unhide`: the multi-stage unhiding scheduler

pub mod collect;
pub mod config;
pub mod dom;
pub mod engine;
pub mod gate;
pub mod party;
pub mod session;
pub mod style;
pub mod timing;
pub mod unhide;

// Re-export commonly used types
pub use collect::{AttrKind, AttributeCollector, ModeChange, Mutation, ObserveModeMachine};
pub use config::PollerConfig;
pub use dom::Dom;
pub use engine::{SelectorQuery, SelectorRequest, SelectorResponse, SelectorSource};
pub use gate::{FetchDecision, FetchGate};
pub use session::{PollerSession, PumpSchedule, SessionUpdate};
pub use style::StyleRegistry;
pub use unhide::UnhideScheduler;
