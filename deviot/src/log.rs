use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Installs a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Records emitted through the `log` crate are forwarded as well.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Like [`init`], but with a fixed filter directive such as `"debug"` or
/// `"info,deviot=trace"`. Returns false if a subscriber was already set.
pub fn try_init_with(directive: &str) -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}

#[cfg(test)]
pub(crate) mod capture {
    use std::{io, sync::Arc};

    use parking_lot::Mutex;
    use tracing::subscriber::DefaultGuard;

    /// Formatted events recorded on the current thread.
    #[derive(Clone, Default)]
    pub(crate) struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub(crate) fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .map(str::to_owned)
                .collect()
        }

        /// Lines at `level` (`"INFO"`, `"WARN"`, ...) containing `text`.
        pub(crate) fn count(&self, level: &str, text: &str) -> usize {
            self.lines()
                .iter()
                .filter(|line| line.contains(level) && line.contains(text))
                .count()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Records debug and above until the guard drops. Spawned tasks are only
    /// seen on a current-thread runtime.
    pub(crate) fn start() -> (DefaultGuard, Captured) {
        let captured = Captured::default();
        let writer = captured.clone();

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_writer(move || writer.clone())
            .finish();

        (tracing::subscriber::set_default(subscriber), captured)
    }
}
