//! # MiniRed Reactor
//!
//! Purpose: Provide a small single-threaded event loop that multiplexes
//! descriptor readiness and timers for the asynchronous client.
//!
//! ## Design Principles
//! 1. **Pluggable Backends**: `epoll` on Linux, `poll(2)` everywhere else,
//!    behind one trait.
//! 2. **Closure Handlers**: Callbacks own their context; no opaque pointers.
//! 3. **Bounded Tables**: Descriptor slots are fixed at construction and
//!    out-of-range registrations fail instead of growing.
//! 4. **Single Threaded**: The loop and everything it drives stay on one
//!    thread; handlers are `!Send` by construction.

pub mod backend;
mod event_loop;
mod ready;
mod timer;

pub use backend::{Backend, BackendKind, FiredEvent};
pub use event_loop::{
    file_handler, BeforeSleepHook, EventLoop, FileHandler, ProcessFlags, StopHandle,
};
pub use ready::Ready;
pub use timer::{TimerAction, TimerHandler, TimerId};
