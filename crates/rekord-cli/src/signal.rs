use std::sync::atomic::{AtomicBool, Ordering};

/// Global cancel flag. Set to `true` on the first SIGINT/SIGTERM; the
/// pipelines check it at every channel and I/O boundary.
pub static CANCEL: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for cooperative cancellation.
///
/// The first signal sets [`CANCEL`] and restores the default handler so a
/// second signal terminates immediately.
pub fn install_signal_handlers() {
    #[cfg(unix)]
    {
        // Safety: the handler only stores an atomic bool and restores the
        // default disposition.
        unsafe {
            libc::signal(
                libc::SIGINT,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
            libc::signal(
                libc::SIGTERM,
                unix_signal_handler as *const () as libc::sighandler_t,
            );
        }
    }
}

#[cfg(unix)]
extern "C" fn unix_signal_handler(sig: libc::c_int) {
    CANCEL.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}
