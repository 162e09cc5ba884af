use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Line prefix `** [2024-03-01 10:00:00] 4242: ` with local time and our pid.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTime {
    pid: u32,
}

impl WatchdogTime {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

impl FormatTime for WatchdogTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "** [{}] {}:",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.pid
        )
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "worker_reaper=debug"
    } else {
        "worker_reaper=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Plain `** [time] pid: message` lines, with no level column or colour.
fn timed_subscriber<W>(
    filter: EnvFilter,
    pid: u32,
    make_writer: W,
) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .with_thread_ids(false)
        .with_timer(WatchdogTime::new(pid))
        .finish()
}

/// Install the global subscriber. Timestamps appear only with `show_times`.
pub fn init(show_times: bool, verbose: bool) {
    if show_times {
        timed_subscriber(env_filter(verbose), std::process::id(), std::io::stdout).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(verbose))
            .with_target(false)
            .with_thread_ids(false)
            .without_time()
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_watchdog_time_prefix() {
        let mut out = String::new();
        WatchdogTime::new(4242)
            .format_time(&mut Writer::new(&mut out))
            .unwrap();
        let expected = Regex::new(r"^\*\* \[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\] 4242:$").unwrap();
        assert!(expected.is_match(&out), "unexpected prefix: {out}");
    }

    #[test]
    fn test_timed_lines_have_no_level_column() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = timed_subscriber(EnvFilter::new("info"), 4242, move || sink.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Killing passenger process 7");
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = out.trim_end();
        assert!(!line.contains("INFO"), "level leaked into line: {line}");
        let expected =
            Regex::new(r"^\*\* \[[^\]]+\] 4242: +Killing passenger process 7$").unwrap();
        assert!(expected.is_match(line), "unexpected line: {line}");
    }
}
