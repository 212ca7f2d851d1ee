//! Global keyboard listener using macOS CGEventTap
//!
//! Intercepts system-wide key-down, key-up and flags-changed events and
//! hands each one to the sequence matcher synchronously, so the matcher's
//! verdict decides whether the event reaches the focused application.
//! Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
#[cfg(target_os = "macos")]
use std::time::{Duration, Instant};

#[cfg(target_os = "macos")]
use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
#[cfg(target_os = "macos")]
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
    CGEventTapProxy, CGEventType, EventField,
};
use tracing::{error, info};
#[cfg(target_os = "macos")]
use tracing::warn;

use crate::state::SharedMatcher;
#[cfg(target_os = "macos")]
use crate::state::{lock_matcher, Disposition};

#[cfg(target_os = "macos")]
use super::keys::{KeyEventKind, RawKeyEvent};
#[cfg(target_os = "macos")]
use super::synth::SYNTHETIC_EVENT_TAG;

/// Callback work beyond this is logged; the system disables slow taps
#[cfg(target_os = "macos")]
const SLOW_CALLBACK: Duration = Duration::from_micros(500);

/// Global keyboard listener feeding the sequence matcher
pub struct HotkeyListener {
    matcher: SharedMatcher,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new(matcher: SharedMatcher) -> Self {
        Self {
            matcher,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the listener
    ///
    /// Spawns a dedicated thread that installs the event tap and runs a
    /// CFRunLoop for its callbacks. Blocks until the tap is installed or
    /// has failed, so a missing Accessibility permission is reported here
    /// and the caller can retry.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let matcher = Arc::clone(&self.matcher);
        let running = Arc::clone(&self.running);

        let spawned = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                run_event_loop(matcher, &running, ready_tx);
                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            });

        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(HotkeyError::ThreadSpawn(e.to_string()));
        }

        ready_rx.recv().unwrap_or_else(|_| {
            error!("hotkey listener thread exited before reporting");
            Err(HotkeyError::EventTapCreation)
        })
    }

    /// Stop the listener; the run loop exits within one poll interval
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to attach event tap to the run loop")]
    RunLoopSource,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("keyboard interception is only available on macOS")]
    Unsupported,

    #[error("failed to post synthetic key event: {0}")]
    Synthesis(String),
}

/// Install the tap, report the outcome on `ready_tx`, then pump the run
/// loop until `running` is cleared
#[cfg(target_os = "macos")]
fn run_event_loop(
    matcher: SharedMatcher,
    running: &AtomicBool,
    ready_tx: SyncSender<Result<(), HotkeyError>>,
) {
    let disabled = Arc::new(AtomicBool::new(false));
    let tap_disabled = Arc::clone(&disabled);

    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        let kind = match event_type {
            CGEventType::KeyDown => KeyEventKind::KeyDown,
            CGEventType::KeyUp => KeyEventKind::KeyUp,
            CGEventType::FlagsChanged => KeyEventKind::FlagsChanged,
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled, will re-enable");
                tap_disabled.store(true, Ordering::SeqCst);
                return None;
            }
            _ => return None,
        };

        let started = Instant::now();
        let key_code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
        let mut raw = RawKeyEvent::new(key_code, kind, event.get_flags().bits(), started);
        raw.is_repeat = event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0;
        raw.synthetic = event.get_integer_value_field(EventField::EVENT_SOURCE_USER_DATA)
            == SYNTHETIC_EVENT_TAG;

        let disposition = lock_matcher(&matcher).handle_event(&raw);

        let elapsed = started.elapsed();
        if elapsed > SLOW_CALLBACK {
            warn!(?elapsed, key_code, "slow event tap callback");
        }

        // Returning None hands the original event back; a null-typed
        // event is dropped by the window server.
        if disposition == Disposition::Consume {
            event.set_type(CGEventType::Null);
        }
        None
    };

    let tap = match CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::Default,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    ) {
        Ok(tap) => tap,
        Err(()) => {
            error!("failed to create event tap - is Accessibility permission granted?");
            running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(HotkeyError::EventTapCreation));
            return;
        }
    };

    let run_loop_source = match tap.mach_port.create_runloop_source(0) {
        Ok(source) => source,
        Err(()) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(HotkeyError::RunLoopSource));
            return;
        }
    };

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();

    info!("event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        // Run the loop for a short interval, then check the flags
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        if disabled.swap(false, Ordering::SeqCst) {
            tap.enable();
            info!("event tap re-enabled");
        }
    }

    // Tap will be automatically cleaned up when it goes out of scope
}

#[cfg(not(target_os = "macos"))]
fn run_event_loop(
    _matcher: SharedMatcher,
    running: &AtomicBool,
    ready_tx: SyncSender<Result<(), HotkeyError>>,
) {
    error!("no event tap on this platform");
    running.store(false, Ordering::SeqCst);
    let _ = ready_tx.send(Err(HotkeyError::Unsupported));
}
