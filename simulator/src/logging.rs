use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Tees log output to stdout and, optionally, a file.
#[derive(Clone)]
pub(crate) struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    pub(crate) fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
            None => None,
        };
        Ok(Self { file })
    }
}

pub(crate) struct LogWriterGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            file: self.file.clone(),
        }
    }
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = &self.file {
            file.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = &self.file {
            file.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }
}

/// Keeps the first few steps and a rolling tail so a failure can be replayed
/// by eye without logging every step of a long run.
pub(crate) struct EventLog {
    first: Vec<String>,
    tail: VecDeque<String>,
    first_limit: usize,
    tail_limit: usize,
    skipped: u64,
}

impl EventLog {
    pub(crate) fn new(first_limit: usize, tail_limit: usize) -> Self {
        Self {
            first: Vec::with_capacity(first_limit),
            tail: VecDeque::with_capacity(tail_limit),
            first_limit,
            tail_limit,
            skipped: 0,
        }
    }

    pub(crate) fn record(&mut self, event: String) {
        if self.first.len() < self.first_limit {
            self.first.push(event);
            return;
        }
        if self.tail_limit == 0 {
            self.skipped += 1;
            return;
        }
        if self.tail.len() == self.tail_limit {
            self.tail.pop_front();
            self.skipped += 1;
        }
        self.tail.push_back(event);
    }

    pub(crate) fn dump_failure(&self, reason: &str) {
        tracing::error!("simulation failed: {}", reason);
        for event in &self.first {
            tracing::error!("  {}", event);
        }
        if self.skipped > 0 {
            tracing::error!("  ... {} steps elided ...", self.skipped);
        }
        for event in &self.tail {
            tracing::error!("  {}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_keeps_head_and_tail() {
        let mut log = EventLog::new(2, 2);
        for i in 0..6 {
            log.record(format!("step={i}"));
        }
        assert_eq!(log.first, vec!["step=0", "step=1"]);
        assert_eq!(log.tail, VecDeque::from(vec!["step=4".to_string(), "step=5".to_string()]));
        assert_eq!(log.skipped, 2);
    }
}
