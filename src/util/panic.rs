use crate::util::log;

/// Report an unrecoverable collector error and terminate the process.
///
/// Used once the remembered sets and the card table may disagree with the heap. Does not
/// unwind.
pub(crate) fn fatal(what: std::fmt::Arguments) -> ! {
    log::error!("===== Internal Error in the G1 remembered-set subsystem =====");
    log::error!("{}", what);
    eprintln!("===== Internal Error in the G1 remembered-set subsystem =====");
    eprintln!("{}", what);
    std::process::abort()
}
