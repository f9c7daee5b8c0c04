use std::io::Write;

use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Hands every formatted event to stdout and to the `/api/logs` subscribers.
#[derive(Clone)]
pub(crate) struct LogFanout {
    sender: broadcast::Sender<String>,
    echo_stdout: bool,
}

impl LogFanout {
    pub(crate) fn new(sender: broadcast::Sender<String>, echo_stdout: bool) -> Self {
        Self {
            sender,
            echo_stdout,
        }
    }
}

impl<'a> MakeWriter<'a> for LogFanout {
    type Writer = EventBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        EventBuffer {
            sender: self.sender.clone(),
            echo_stdout: self.echo_stdout,
            line: Vec::new(),
        }
    }
}

/// Collects one event; the line is broadcast when the buffer is dropped.
pub(crate) struct EventBuffer {
    sender: broadcast::Sender<String>,
    echo_stdout: bool,
    line: Vec<u8>,
}

impl Write for EventBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.echo_stdout {
            std::io::stdout().write_all(buf)?;
        }
        if self.sender.receiver_count() > 0 {
            self.line.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.echo_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.line);
        let line = line.trim_end();
        if !line.is_empty() {
            let _ = self.sender.send(line.to_string());
        }
    }
}

/// Install the global subscriber. A second call is a no-op.
pub(crate) fn init_tracing(level: Level, sender: broadcast::Sender<String>, suppress_stdout: bool) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(!suppress_stdout)
        .with_writer(LogFanout::new(sender, !suppress_stdout))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_event_becomes_one_line() {
        let (tx, mut rx) = broadcast::channel(4);
        let fanout = LogFanout::new(tx, false);

        let mut writer = fanout.make_writer();
        writer.write_all(b"INFO agent ").unwrap();
        writer.write_all(b"started\n").unwrap();
        assert!(rx.try_recv().is_err());
        drop(writer);

        assert_eq!(rx.recv().await.unwrap(), "INFO agent started");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn blank_events_are_not_broadcast() {
        let (tx, mut rx) = broadcast::channel::<String>(4);
        drop(LogFanout::new(tx.clone(), false).make_writer());
        let mut writer = LogFanout::new(tx, false).make_writer();
        writer.write_all(b"\n").unwrap();
        drop(writer);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn writes_without_subscribers_succeed() {
        let (tx, _) = broadcast::channel::<String>(4);
        let mut writer = LogFanout::new(tx, false).make_writer();
        assert_eq!(writer.write(b"dropped").unwrap(), 7);
        assert!(writer.line.is_empty());
    }
}
