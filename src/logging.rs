use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

/// Broadcast fan-out of formatted log output, feeding `/api/logs`.
///
/// The fmt layer hands its writer arbitrary byte chunks; dashboard clients
/// want whole lines. Each writer buffers until a newline and sends one
/// channel message per line. Slow subscribers miss lines under broadcast
/// semantics, which is acceptable for a log tail.
#[derive(Clone)]
pub struct LogFanout {
    tx: tokio::sync::broadcast::Sender<String>,
}

impl LogFanout {
    pub fn new(tx: tokio::sync::broadcast::Sender<String>) -> Self {
        Self { tx }
    }
}

impl<'a> MakeWriter<'a> for LogFanout {
    type Writer = LineWriter;

    fn make_writer(&'a self) -> LineWriter {
        LineWriter {
            tx: self.tx.clone(),
            buf: Vec::new(),
        }
    }
}

/// Per-event sink that assembles complete lines before forwarding them.
pub struct LineWriter {
    tx: tokio::sync::broadcast::Sender<String>,
    buf: Vec<u8>,
}

impl LineWriter {
    fn forward(&self, raw: &[u8]) {
        let raw = match raw.last() {
            Some(b'\r') => &raw[..raw.len() - 1],
            _ => raw,
        };
        if raw.is_empty() {
            return;
        }
        // Send only fails when no dashboard is attached.
        let _ = self.tx.send(String::from_utf8_lossy(raw).into_owned());
    }
}

impl std::io::Write for LineWriter {
    fn write(&mut self, chunk: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.forward(&line[..pos]);
        }
        Ok(chunk.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.forward(&rest);
        }
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let _ = std::io::Write::flush(self);
    }
}

/// Install the global subscriber and return the sender feeding `/api/logs`.
/// Terminal output is composed in as a second writer unless suppressed.
pub fn init(suppress_stdout: bool) -> tokio::sync::broadcast::Sender<String> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);

    let fanout = LogFanout::new(log_tx.clone());
    let writer = if suppress_stdout {
        BoxMakeWriter::new(fanout)
    } else {
        BoxMakeWriter::new(std::io::stdout.and(fanout))
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    // A subscriber may already be installed when serve() restarts in-process.
    tracing::subscriber::set_global_default(subscriber).ok();

    log_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn writer_forwards_whole_lines_only() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        let fanout = LogFanout::new(tx);
        let mut writer = fanout.make_writer();

        writer.write_all(b"first line\nsecond").unwrap();
        writer.write_all(b" half\n").unwrap();

        assert_eq!(rx.try_recv().unwrap(), "first line");
        assert_eq!(rx.try_recv().unwrap(), "second half");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn partial_line_is_flushed_when_the_writer_drops() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        let fanout = LogFanout::new(tx);
        let mut writer = fanout.make_writer();

        writer.write_all(b"no newline yet").unwrap();
        assert!(rx.try_recv().is_err());

        drop(writer);
        assert_eq!(rx.try_recv().unwrap(), "no newline yet");
    }

    #[tokio::test]
    async fn crlf_and_blank_lines_are_normalised() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(8);
        let fanout = LogFanout::new(tx);
        let mut writer = fanout.make_writer();

        writer.write_all(b"windows line\r\n\nplain\n").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "windows line");
        assert_eq!(rx.try_recv().unwrap(), "plain");
        assert!(rx.try_recv().is_err());
    }
}
