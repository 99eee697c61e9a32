//! WebAssembly bindings for the CloakWork selector poller.
//!
//! Wires the DOM-agnostic core to a real page: `MutationObserver` batches,
//! interval/timeout timers, the injected style element and its position
//! guard, and the asynchronous round trip to the native filtering engine
//! (a host-supplied JS function returning a Promise).
//!
//! Everything here only exists on wasm targets; on other targets the crate
//! compiles to nothing so the workspace builds and tests stay native.

#[cfg(target_family = "wasm")]
mod dom;
#[cfg(target_family = "wasm")]
mod poller;

#[cfg(target_family = "wasm")]
pub use dom::WebDom;
#[cfg(target_family = "wasm")]
pub use poller::SelectorPoller;
