// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The shared output sink.
//!
//! All inference output is comma-separated lines on standard output:
//! `name,value[,weight,id]`. Particles buffer their `predict` lines locally
//! and the buffer is flushed through the sink in one locked write, so lines
//! from concurrent particles never interleave. Tests substitute an in-memory
//! writer via [`OutputSink::capture`].

use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

/// A line-oriented, internally locked writer shared by every particle.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    /// A sink writing to standard output.
    pub fn stdout() -> OutputSink {
        OutputSink::from_writer(Box::new(io::stdout()))
    }

    /// A sink writing to the given writer.
    pub fn from_writer(writer: Box<dyn Write + Send>) -> OutputSink {
        OutputSink {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// A sink writing to an in-memory buffer, plus a handle for reading the
    /// buffer back. Intended for tests.
    pub fn capture() -> (OutputSink, OutputCapture) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let capture = OutputCapture {
            buf: Arc::clone(&buf),
        };
        (OutputSink::from_writer(Box::new(CaptureWriter(buf))), capture)
    }

    /// Writes `text` (one or more complete lines) atomically.
    ///
    /// Write failures are logged and otherwise ignored; output is
    /// best-effort, like the engine's other non-fatal I/O.
    pub fn write_all(&self, text: &str) {
        let mut writer = self.inner.lock().expect("output sink poisoned");
        if let Err(err) = writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
            warn!("failed to write inference output: {}", err);
        }
    }

    /// Flushes a predict buffer with each line suffixed by the particle's
    /// terminal weight and a synthetic particle id.
    pub fn write_weighted(&self, buffer: &str, log_weight: f64, id: u64) {
        let mut out = String::with_capacity(buffer.len());
        for line in buffer.lines() {
            out.push_str(line);
            out.push_str(&format!(",{:.6},{}\n", log_weight, id));
        }
        self.write_all(&out);
    }

    /// Emits a `time_elapsed,SECONDS.MICROSECONDS,,ID` line.
    pub fn write_walltime(&self, elapsed: Duration, id: u64) {
        self.write_all(&format!(
            "time_elapsed,{}.{:06},,{}\n",
            elapsed.as_secs(),
            elapsed.subsec_micros(),
            id
        ));
    }
}

/// A handle onto the buffer behind a capturing [`OutputSink`].
#[derive(Clone)]
pub struct OutputCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl OutputCapture {
    /// Everything written to the sink so far.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().expect("capture buffer poisoned");
        String::from_utf8_lossy(&buf).into_owned()
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("capture buffer poisoned")
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_flush_preserves_line_order_and_text() {
        let (sink, capture) = OutputSink::capture();
        sink.write_weighted("mu,7.25\nsigma,1.5\n", -2.5, 42);
        assert_eq!(
            capture.contents(),
            "mu,7.25,-2.500000,42\nsigma,1.5,-2.500000,42\n"
        );
    }

    #[test]
    fn plain_flush_is_verbatim() {
        let (sink, capture) = OutputSink::capture();
        sink.write_all("a,1\n");
        sink.write_all("b,2\n");
        assert_eq!(capture.contents(), "a,1\nb,2\n");
    }

    #[test]
    fn walltime_format() {
        let (sink, capture) = OutputSink::capture();
        sink.write_walltime(Duration::new(3, 1_234_000), 9);
        assert_eq!(capture.contents(), "time_elapsed,3.001234,,9\n");
    }
}
