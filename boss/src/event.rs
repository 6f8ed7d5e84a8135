//! Waking the supervisor.
//!
//! Signal handlers record into a [`PendingIntents`] and do nothing else. The
//! main loop sleeps in an [`EventSource`] until at least one signal has been
//! recorded, then runs one iteration.
//!
//! Two sources exist. [`SignalMaskSource`] keeps every signal blocked except
//! while atomically waiting in `sigsuspend`, so a signal can only be taken at
//! that point and never between the loop's checks. On the BSDs,
//! `KqueueSource` ignores the signals instead and collects them as
//! `EVFILT_SIGNAL` events.

use crate::error::{Error, Result};
use crate::intent::{Intent, PendingIntents, Wake};
use crate::signals::{signal_name, signal_table, MAX_SIGNAL};
use keeper_rpc::Scope;
use libc::c_int;
use nix::errno::Errno;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use tracing::{debug, info};

/// Something the supervisor can sleep on.
pub trait EventSource {
    /// Block until a signal has been recorded in the pending set.
    ///
    /// Returning with nothing new recorded is allowed; the caller simply
    /// iterates again.
    fn wait_for_event(&mut self) -> Result<()>;
}

/// Signals that must keep their default action so a fault still kills us.
const FAULT_SIGNALS: [c_int; 6] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGABRT,
    libc::SIGTRAP,
];

#[allow(clippy::declare_interior_mutable_const)]
const UNMAPPED: AtomicU8 = AtomicU8::new(0);

// Read by the handler. Both are filled in before any handler is installed.
static HANDLER_TARGET: AtomicPtr<PendingIntents> = AtomicPtr::new(ptr::null_mut());
static WAKE_CODES: [AtomicU8; MAX_SIGNAL] = [UNMAPPED; MAX_SIGNAL];

fn publish(pending: &'static PendingIntents, table: &[(c_int, Wake)]) {
    for &(signo, wake) in table {
        if let Some(slot) = WAKE_CODES.get(signo as usize) {
            slot.store(wake.to_code(), Ordering::SeqCst);
        }
    }
    HANDLER_TARGET.store(pending as *const PendingIntents as *mut PendingIntents, Ordering::SeqCst);
}

extern "C" fn record_signal(signo: c_int) {
    let Some(slot) = usize::try_from(signo).ok().and_then(|i| WAKE_CODES.get(i)) else {
        return;
    };
    let target = HANDLER_TARGET.load(Ordering::SeqCst);
    if target.is_null() {
        return;
    }
    // SAFETY: only ever set from a &'static PendingIntents
    let pending = unsafe { &*target };
    match Wake::from_code(slot.load(Ordering::SeqCst)) {
        Some(wake) => pending.wake(wake),
        None => pending.raise(Intent::Unknown),
    }
}

fn empty_set() -> libc::sigset_t {
    let mut set = MaybeUninit::uninit();
    // SAFETY: sigemptyset initialises the whole set
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

fn full_set() -> libc::sigset_t {
    let mut set = MaybeUninit::uninit();
    // SAFETY: sigfillset initialises the whole set
    unsafe {
        libc::sigfillset(set.as_mut_ptr());
        set.assume_init()
    }
}

fn set_thread_mask(mask: &libc::sigset_t) -> Result<()> {
    // SAFETY: mask is initialised and the old mask is not requested
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, mask, ptr::null_mut()) };
    if rc != 0 {
        return Err(Error::SignalError(format!(
            "pthread_sigmask: {}",
            Errno::from_i32(rc)
        )));
    }
    Ok(())
}

/// Signal-mask event source.
pub struct SignalMaskSource {
    /// Everything blocked except the signals we handle
    wait_mask: libc::sigset_t,
}

impl SignalMaskSource {
    /// Block signals and install the handlers for an instance.
    ///
    /// The pending set must outlive every handler, hence `'static`. Only one
    /// source may be installed per process.
    pub fn install(pending: &'static PendingIntents, scope: Scope) -> Result<Self> {
        let table = signal_table(scope);
        publish(pending, &table);

        let mut blocked = full_set();
        for signo in FAULT_SIGNALS {
            // SAFETY: blocked is initialised
            unsafe { libc::sigdelset(&mut blocked, signo) };
        }
        set_thread_mask(&blocked)?;

        let mut wait_mask = blocked;
        for &(signo, wake) in &table {
            // SAFETY: an all-zero sigaction is a valid starting point
            let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
            action.sa_sigaction = record_signal as extern "C" fn(c_int) as libc::sighandler_t;
            action.sa_mask = full_set();
            action.sa_flags = if wake == Wake::Child {
                libc::SA_NOCLDSTOP
            } else {
                0
            };

            // SAFETY: the handler only performs atomic loads and stores
            if unsafe { libc::sigaction(signo, &action, ptr::null_mut()) } < 0 {
                return Err(Error::SignalError(format!(
                    "sigaction {}: {}",
                    signal_name(signo),
                    Errno::last()
                )));
            }
            // SAFETY: wait_mask is initialised
            unsafe { libc::sigdelset(&mut wait_mask, signo) };
            debug!(signal = %signal_name(signo), wake = ?wake, "Installed signal handler");
        }

        info!(scope = %scope, signals = table.len(), "Signal handlers installed");
        Ok(Self { wait_mask })
    }
}

impl EventSource for SignalMaskSource {
    fn wait_for_event(&mut self) -> Result<()> {
        // SAFETY: wait_mask is an initialised signal set
        unsafe { libc::sigsuspend(&self.wait_mask) };
        match Errno::last() {
            Errno::EINTR => Ok(()),
            errno => Err(Error::EventWait(errno)),
        }
    }
}

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios"
))]
mod kqueue {
    use super::*;
    use nix::sys::event::{kevent_ts, kqueue, EventFilter, EventFlag, FilterFlag, KEvent};
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    const BATCH: usize = 16;

    fn signal_event(signo: c_int, flags: EventFlag) -> KEvent {
        KEvent::new(
            signo as libc::uintptr_t,
            EventFilter::EVFILT_SIGNAL,
            flags,
            FilterFlag::empty(),
            0,
            0,
        )
    }

    /// Kernel-queue event source.
    pub struct KqueueSource {
        queue: OwnedFd,
        pending: &'static PendingIntents,
        table: Vec<(c_int, Wake)>,
    }

    impl KqueueSource {
        /// Register signal events for an instance.
        ///
        /// Intent signals are ignored so that only the queue sees them. The
        /// child signal is put back to its default action: an inherited
        /// `SIG_IGN` would have the kernel reap children before `waitpid`.
        pub fn install(pending: &'static PendingIntents, scope: Scope) -> Result<Self> {
            let table = signal_table(scope);
            // SAFETY: kqueue just returned this descriptor and nothing else owns it
            let queue = unsafe { OwnedFd::from_raw_fd(kqueue()?) };

            set_thread_mask(&empty_set())?;

            let mut changes = Vec::with_capacity(table.len());
            for &(signo, wake) in &table {
                let action = match wake {
                    Wake::Child => libc::SIG_DFL,
                    Wake::Intent(_) => libc::SIG_IGN,
                };
                // SAFETY: SIG_DFL and SIG_IGN install no code
                if unsafe { libc::signal(signo, action) } == libc::SIG_ERR {
                    return Err(Error::SignalError(format!(
                        "{}: {}",
                        signal_name(signo),
                        std::io::Error::last_os_error()
                    )));
                }
                changes.push(signal_event(signo, EventFlag::EV_ADD));
            }
            kevent_ts(queue.as_raw_fd(), &changes, &mut [], None)?;

            info!(scope = %scope, signals = table.len(), "Signal events registered");
            Ok(Self {
                queue,
                pending,
                table,
            })
        }
    }

    impl EventSource for KqueueSource {
        fn wait_for_event(&mut self) -> Result<()> {
            let mut events = [signal_event(0, EventFlag::empty()); BATCH];
            let count = match kevent_ts(self.queue.as_raw_fd(), &[], &mut events, None) {
                Ok(count) => count,
                Err(Errno::EINTR) => return Ok(()),
                Err(e) => return Err(Error::EventWait(e)),
            };

            for event in &events[..count] {
                if event.filter() != Ok(EventFilter::EVFILT_SIGNAL) {
                    continue;
                }
                let signo = event.ident() as c_int;
                match self.table.iter().find(|&&(s, _)| s == signo) {
                    Some(&(_, wake)) => self.pending.wake(wake),
                    None => self.pending.raise(Intent::Unknown),
                }
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        static PENDING: PendingIntents = PendingIntents::new();

        fn disposition(signo: c_int) -> libc::sighandler_t {
            let mut current = MaybeUninit::<libc::sigaction>::zeroed();
            // SAFETY: a null new action only queries
            unsafe {
                assert_eq!(libc::sigaction(signo, ptr::null(), current.as_mut_ptr()), 0);
                current.assume_init().sa_sigaction
            }
        }

        #[test]
        fn test_inherited_child_ignore_is_undone() {
            // SAFETY: SIG_IGN installs no code
            unsafe { libc::signal(libc::SIGCHLD, libc::SIG_IGN) };

            let _source = KqueueSource::install(&PENDING, Scope::User).unwrap();
            assert_eq!(disposition(libc::SIGCHLD), libc::SIG_DFL);
            assert_eq!(disposition(libc::SIGHUP), libc::SIG_IGN);
        }
    }
}

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios"
))]
pub use kqueue::KqueueSource;

/// The event source preferred on this platform.
#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios"
))]
pub type PlatformEventSource = KqueueSource;

/// The event source preferred on this platform.
#[cfg(not(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios"
)))]
pub type PlatformEventSource = SignalMaskSource;

/// Install the platform's preferred event source.
pub fn install(pending: &'static PendingIntents, scope: Scope) -> Result<PlatformEventSource> {
    PlatformEventSource::install(pending, scope)
}
