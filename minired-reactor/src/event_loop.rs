//! # Event Loop
//!
//! Purpose: Single-threaded scheduler over descriptor readiness and
//! relative-time timers. It knows nothing about Redis.
//!
//! ## Design Principles
//! 1. **Dense Slot Table**: File events live in a `Vec` indexed by descriptor,
//!    sized once at construction (`setsize`).
//! 2. **Closures Carry Context**: Handlers capture whatever state they need;
//!    the loop passes itself back so handlers can (un)register and stop.
//! 3. **Run to Completion**: Every handler finishes before the next one runs;
//!    the only suspension point is the backend wait.
//!
//! ## Iteration
//!
//! ```text
//! wait = min(nearest timer, caller cap)      (None = block indefinitely)
//! backend.wait(wait) -> ready descriptors
//!   for each: read handler if READABLE requested & ready
//!             write handler if WRITABLE requested & ready,
//!               unless it is the read handler that just ran
//! run due timers: Requeue(d) -> due = now + d, NoMore -> removed
//! ```

use std::cell::Cell;
use std::mem;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use minired_common::{Error, Result};
use tracing::{debug, trace};

use crate::backend::{Backend, BackendKind, FiredEvent};
use crate::ready::Ready;
use crate::timer::{deadline_after, TimerAction, TimerId, TimerList};

/// Handler invoked when a registered descriptor becomes ready.
///
/// Shared so one closure can serve both directions; the loop compares handler
/// identity to avoid running a combined handler twice per iteration.
pub type FileHandler = Rc<dyn Fn(&mut EventLoop, RawFd, Ready)>;

/// Hook invoked at the top of every `run` iteration.
pub type BeforeSleepHook = Rc<dyn Fn(&mut EventLoop)>;

/// Wraps a closure as a `FileHandler`, inferring its signature.
pub fn file_handler<F>(f: F) -> FileHandler
where
    F: Fn(&mut EventLoop, RawFd, Ready) + 'static,
{
    Rc::new(f)
}

/// Selects which event classes `process_events` handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessFlags(u8);

impl ProcessFlags {
    pub const FILE_EVENTS: ProcessFlags = ProcessFlags(0b001);
    pub const TIMER_EVENTS: ProcessFlags = ProcessFlags(0b010);
    pub const ALL_EVENTS: ProcessFlags = ProcessFlags(0b011);
    /// Do not block; only handle what is ready right now.
    pub const DONT_WAIT: ProcessFlags = ProcessFlags(0b100);

    fn has(self, other: ProcessFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ProcessFlags {
    type Output = ProcessFlags;

    fn bitor(self, rhs: ProcessFlags) -> ProcessFlags {
        ProcessFlags(self.0 | rhs.0)
    }
}

/// Clonable handle that ends `EventLoop::run`.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

#[derive(Default)]
struct FileEvent {
    mask: Ready,
    on_read: Option<FileHandler>,
    on_write: Option<FileHandler>,
}

/// Readiness + timer reactor.
pub struct EventLoop {
    events: Vec<FileEvent>,
    max_fd: Option<RawFd>,
    timers: TimerList,
    backend: Box<dyn Backend>,
    fired: Vec<FiredEvent>,
    due: Vec<TimerId>,
    stop: StopHandle,
    before_sleep: Option<BeforeSleepHook>,
}

impl EventLoop {
    /// Creates a loop accepting descriptors `0..setsize` with the default backend.
    pub fn new(setsize: usize) -> Result<Self> {
        Self::with_backend(setsize, BackendKind::default())
    }

    /// Creates a loop with an explicit backend.
    pub fn with_backend(setsize: usize, kind: BackendKind) -> Result<Self> {
        let backend = kind.create(setsize).map_err(Error::Backend)?;
        let mut events = Vec::new();
        events
            .try_reserve_exact(setsize)
            .map_err(|_| Error::OutOfMemory)?;
        events.resize_with(setsize, FileEvent::default);
        debug!(setsize, backend = backend.name(), "event loop created");
        Ok(EventLoop {
            events,
            max_fd: None,
            timers: TimerList::new(),
            backend,
            fired: Vec::with_capacity(setsize.min(64)),
            due: Vec::new(),
            stop: StopHandle::default(),
            before_sleep: None,
        })
    }

    pub fn setsize(&self) -> usize {
        self.events.len()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Highest descriptor with a live registration.
    pub fn max_fd(&self) -> Option<RawFd> {
        self.max_fd
    }

    fn slot_index(&self, fd: RawFd) -> Result<usize> {
        match usize::try_from(fd) {
            Ok(idx) if idx < self.events.len() => Ok(idx),
            _ => Err(Error::OutOfRange {
                fd,
                setsize: self.events.len(),
            }),
        }
    }

    /// Registers `handler` for the directions in `mask`.
    ///
    /// Masks merge: adding READABLE to a WRITABLE registration watches both.
    /// Re-adding a direction replaces its handler. On backend failure nothing
    /// is recorded.
    pub fn add_file_event(&mut self, fd: RawFd, mask: Ready, handler: FileHandler) -> Result<()> {
        let idx = self.slot_index(fd)?;
        let old = self.events[idx].mask;
        let new = old | mask;
        self.backend
            .register(fd, old, new)
            .map_err(Error::Backend)?;

        let slot = &mut self.events[idx];
        slot.mask = new;
        if mask.is_readable() {
            slot.on_read = Some(handler.clone());
        }
        if mask.is_writable() {
            slot.on_write = Some(handler);
        }
        if self.max_fd.map_or(true, |max| fd > max) {
            self.max_fd = Some(fd);
        }
        debug!(fd, mask = ?new, "file event registered");
        Ok(())
    }

    /// Clears the directions in `mask`. Removing from an unwatched
    /// descriptor is a no-op.
    pub fn remove_file_event(&mut self, fd: RawFd, mask: Ready) -> Result<()> {
        let idx = self.slot_index(fd)?;
        let old = self.events[idx].mask;
        if old.is_none() {
            return Ok(());
        }
        let new = old.without(mask);
        self.backend
            .deregister(fd, old, new)
            .map_err(Error::Backend)?;

        let slot = &mut self.events[idx];
        slot.mask = new;
        if !new.is_readable() {
            slot.on_read = None;
        }
        if !new.is_writable() {
            slot.on_write = None;
        }
        if new.is_none() && self.max_fd == Some(fd) {
            self.max_fd = self.events[..idx]
                .iter()
                .rposition(|e| !e.mask.is_none())
                .map(|i| i as RawFd);
        }
        debug!(fd, mask = ?new, "file event removed");
        Ok(())
    }

    /// Directions currently watched for `fd`.
    pub fn file_event_mask(&self, fd: RawFd) -> Ready {
        self.slot_index(fd)
            .map(|idx| self.events[idx].mask)
            .unwrap_or(Ready::NONE)
    }

    /// Schedules `handler` to run once `delay` has elapsed.
    pub fn add_timer<F>(&mut self, delay: Duration, handler: F) -> TimerId
    where
        F: FnMut(&mut EventLoop, TimerId) -> TimerAction + 'static,
    {
        let id = self.timers.insert(delay, Box::new(handler));
        debug!(timer_id = %id, ?delay, "timer scheduled");
        id
    }

    /// Cancels a timer. Returns false if it does not exist.
    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.timers.remove(id)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn set_before_sleep(&mut self, hook: Option<BeforeSleepHook>) {
        self.before_sleep = hook;
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Runs one iteration for file and timer events, waiting at most
    /// `max_wait` (`None` = until the nearest timer, or indefinitely).
    pub fn poll_once(&mut self, max_wait: Option<Duration>) -> Result<usize> {
        self.process(ProcessFlags::ALL_EVENTS, max_wait)
    }

    /// Runs one iteration restricted to `flags`.
    pub fn process_events(&mut self, flags: ProcessFlags) -> Result<usize> {
        self.process(flags, None)
    }

    /// Loops until stopped, calling the before-sleep hook each iteration.
    pub fn run(&mut self) -> Result<()> {
        while !self.stop.is_stopped() {
            if let Some(hook) = self.before_sleep.clone() {
                hook(self);
            }
            self.process(ProcessFlags::ALL_EVENTS, None)?;
        }
        Ok(())
    }

    fn process(&mut self, flags: ProcessFlags, max_wait: Option<Duration>) -> Result<usize> {
        let want_files = flags.has(ProcessFlags::FILE_EVENTS);
        let want_timers = flags.has(ProcessFlags::TIMER_EVENTS);
        if !want_files && !want_timers {
            return Ok(0);
        }

        let mut wait = if want_timers {
            self.timers
                .nearest()
                .map(|when| when.saturating_duration_since(Instant::now()))
        } else {
            None
        };
        if let Some(cap) = max_wait {
            wait = Some(wait.map_or(cap, |w| w.min(cap)));
        }
        if flags.has(ProcessFlags::DONT_WAIT) {
            wait = Some(Duration::ZERO);
        }

        let mut processed = 0;
        if want_files {
            processed += self.dispatch_files(wait)?;
        } else if let Some(wait) = wait {
            thread::sleep(wait);
        }
        if want_timers {
            processed += self.dispatch_timers();
        }
        Ok(processed)
    }

    fn dispatch_files(&mut self, wait: Option<Duration>) -> Result<usize> {
        let mut fired = mem::take(&mut self.fired);
        fired.clear();
        let result = self.backend.wait(self.max_fd, wait, &mut fired);
        if let Err(err) = result {
            self.fired = fired;
            return Err(Error::Backend(err));
        }

        let mut processed = 0;
        for event in &fired {
            let Ok(idx) = self.slot_index(event.fd) else {
                continue;
            };
            let fd = event.fd;
            let ready = event.ready;

            let on_read = {
                let slot = &self.events[idx];
                if slot.mask.is_readable() && ready.is_readable() {
                    slot.on_read.clone()
                } else {
                    None
                }
            };
            if let Some(handler) = &on_read {
                trace!(fd, "readable");
                handler(self, fd, ready);
            }

            // The read handler may have changed the registration.
            let on_write = {
                let slot = &self.events[idx];
                if slot.mask.is_writable() && ready.is_writable() {
                    slot.on_write.clone()
                } else {
                    None
                }
            };
            if let Some(handler) = on_write {
                let already_ran = on_read
                    .as_ref()
                    .map_or(false, |read| same_handler(read, &handler));
                if !already_ran {
                    trace!(fd, "writable");
                    handler(self, fd, ready);
                }
            }
            processed += 1;
        }

        self.fired = fired;
        Ok(processed)
    }

    fn dispatch_timers(&mut self) -> usize {
        let mut due = mem::take(&mut self.due);
        due.clear();
        self.timers.collect_due(Instant::now(), &mut due);

        let mut processed = 0;
        for &id in &due {
            let Some(mut handler) = self.timers.take_handler(id) else {
                continue;
            };
            trace!(timer_id = %id, "timer fired");
            let action = handler(self, id);
            processed += 1;
            match action {
                TimerAction::Requeue(delay) => {
                    self.timers.rearm(id, handler, deadline_after(delay));
                }
                TimerAction::NoMore => {
                    self.timers.remove(id);
                    debug!(timer_id = %id, "timer finished");
                }
            }
        }

        self.due = due;
        processed
    }
}

fn same_handler(a: &FileHandler, b: &FileHandler) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn counter_handler(counter: Rc<Cell<u32>>) -> FileHandler {
        file_handler(move |_, _, _| counter.set(counter.get() + 1))
    }

    #[test]
    fn rejects_descriptor_beyond_setsize() {
        let mut el = EventLoop::new(4).unwrap();
        let err = el
            .add_file_event(4, Ready::READABLE, file_handler(|_, _, _| {}))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfRange { fd: 4, setsize: 4 }));
        assert!(el
            .add_file_event(-1, Ready::READABLE, file_handler(|_, _, _| {}))
            .is_err());
    }

    #[test]
    fn masks_merge_and_clear() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let mut el = EventLoop::new(fd as usize + 8).unwrap();

        el.add_file_event(fd, Ready::READABLE, file_handler(|_, _, _| {}))
            .unwrap();
        el.add_file_event(fd, Ready::WRITABLE, file_handler(|_, _, _| {}))
            .unwrap();
        el.add_file_event(fd, Ready::READABLE, file_handler(|_, _, _| {}))
            .unwrap();
        assert_eq!(el.file_event_mask(fd), Ready::ALL);
        assert_eq!(el.max_fd(), Some(fd));

        el.remove_file_event(fd, Ready::WRITABLE).unwrap();
        assert_eq!(el.file_event_mask(fd), Ready::READABLE);
        el.remove_file_event(fd, Ready::READABLE).unwrap();
        assert_eq!(el.file_event_mask(fd), Ready::NONE);
        assert_eq!(el.max_fd(), None);

        // Removing again is harmless.
        el.remove_file_event(fd, Ready::READABLE).unwrap();
    }

    #[test]
    fn watermark_falls_back_to_next_live_descriptor() {
        let (a, b) = UnixStream::pair().unwrap();
        let (low, high) = if a.as_raw_fd() < b.as_raw_fd() {
            (a.as_raw_fd(), b.as_raw_fd())
        } else {
            (b.as_raw_fd(), a.as_raw_fd())
        };
        let mut el = EventLoop::new(high as usize + 1).unwrap();
        el.add_file_event(low, Ready::READABLE, file_handler(|_, _, _| {}))
            .unwrap();
        el.add_file_event(high, Ready::READABLE, file_handler(|_, _, _| {}))
            .unwrap();
        assert_eq!(el.max_fd(), Some(high));
        el.remove_file_event(high, Ready::READABLE).unwrap();
        assert_eq!(el.max_fd(), Some(low));
    }

    #[test]
    fn unbounded_delays_park_the_timer() {
        let mut el = EventLoop::new(8).unwrap();
        el.add_timer(Duration::MAX, |_, _| TimerAction::NoMore);
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        el.add_timer(Duration::ZERO, move |_, _| {
            counter.set(counter.get() + 1);
            TimerAction::Requeue(Duration::MAX)
        });

        el.poll_once(Some(Duration::ZERO)).unwrap();
        el.poll_once(Some(Duration::from_millis(5))).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(el.timer_count(), 2);
    }

    #[test]
    fn timer_requeue_and_nomore() {
        let mut el = EventLoop::new(8).unwrap();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        el.add_timer(Duration::ZERO, move |_, _| {
            counter.set(counter.get() + 1);
            if counter.get() < 3 {
                TimerAction::Requeue(Duration::ZERO)
            } else {
                TimerAction::NoMore
            }
        });

        for _ in 0..5 {
            el.process_events(ProcessFlags::TIMER_EVENTS | ProcessFlags::DONT_WAIT)
                .unwrap();
        }
        assert_eq!(fired.get(), 3);
        assert_eq!(el.timer_count(), 0);
    }

    #[test]
    fn requeue_is_relative_to_now() {
        let mut el = EventLoop::new(8).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        el.add_timer(Duration::ZERO, move |_, _| {
            log.borrow_mut().push(Instant::now());
            TimerAction::Requeue(Duration::from_millis(30))
        });

        el.poll_once(Some(Duration::ZERO)).unwrap();
        // Stall well past the requeue delay; only one catch-up firing follows.
        thread::sleep(Duration::from_millis(100));
        el.poll_once(Some(Duration::ZERO)).unwrap();
        el.poll_once(Some(Duration::ZERO)).unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn removed_timer_does_not_fire() {
        let mut el = EventLoop::new(8).unwrap();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let id = el.add_timer(Duration::ZERO, move |_, _| {
            flag.set(true);
            TimerAction::NoMore
        });
        assert!(el.remove_timer(id));
        assert!(!el.remove_timer(id));
        el.poll_once(Some(Duration::ZERO)).unwrap();
        assert!(!fired.get());
    }

    #[test]
    fn combined_handler_runs_once_per_event() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let mut el = EventLoop::new(fd as usize + 1).unwrap();
        let calls = Rc::new(Cell::new(0));
        el.add_file_event(fd, Ready::ALL, counter_handler(calls.clone()))
            .unwrap();

        b.write_all(b"ping").unwrap();
        el.poll_once(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn handler_can_unregister_itself() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let mut el = EventLoop::new(fd as usize + 1).unwrap();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        el.add_file_event(
            fd,
            Ready::READABLE,
            file_handler(move |el, fd, _| {
                counter.set(counter.get() + 1);
                el.remove_file_event(fd, Ready::READABLE).unwrap();
            }),
        )
        .unwrap();

        b.write_all(b"x").unwrap();
        el.poll_once(Some(Duration::from_secs(1))).unwrap();
        el.poll_once(Some(Duration::ZERO)).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(el.file_event_mask(fd), Ready::NONE);
    }

    #[test]
    fn run_stops_from_timer_and_calls_hook() {
        let mut el = EventLoop::new(8).unwrap();
        let hook_calls = Rc::new(Cell::new(0));
        let hooks = hook_calls.clone();
        el.set_before_sleep(Some(Rc::new(move |_: &mut EventLoop| {
            hooks.set(hooks.get() + 1);
        })));
        el.add_timer(Duration::from_millis(5), |el, _| {
            el.stop();
            TimerAction::NoMore
        });
        el.run().unwrap();
        assert!(el.is_stopped());
        assert!(hook_calls.get() >= 1);
    }
}
