use the_log_crate::SetLoggerError;

/// Attempt to init a env_logger for the collector.
/// Does nothing if the "builtin_env_logger" feature is disabled.
///
/// The VM may install its own `log` implementation instead, in which case it should
/// disable the default features of this crate.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}
