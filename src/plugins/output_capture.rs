//! Output capture
//!
//! Every node runs inside a task-local capture buffer. Output written with
//! [`write_stdout`]/[`write_stderr`] (or the `test_println!` family) lands in
//! the buffer of the node currently running on this task and is attached to
//! its result when that result ran tangible work.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::core::{
    order, Builder, Context, InterceptorOptions, Next, Node, Plugin, RunInterceptor,
};
use crate::models::TestResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Interleaved chunks written while one node ran
#[derive(Debug, Default)]
pub struct Capture {
    chunks: Vec<(Stream, Vec<u8>)>,
}

impl Capture {
    fn write(&mut self, stream: Stream, bytes: &[u8]) {
        match self.chunks.last_mut() {
            Some((last, chunk)) if *last == stream => chunk.extend_from_slice(bytes),
            _ => self.chunks.push((stream, bytes.to_vec())),
        }
    }

    fn bytes(&self, stream: Option<Stream>) -> Vec<u8> {
        self.chunks
            .iter()
            .filter(|(s, _)| stream.map(|wanted| wanted == *s).unwrap_or(true))
            .flat_map(|(_, chunk)| chunk.iter().copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

tokio::task_local! {
    static CAPTURE: Arc<Mutex<Capture>>;
}

fn write(stream: Stream, text: &str) {
    let captured = CAPTURE
        .try_with(|capture| capture.lock().write(stream, text.as_bytes()))
        .is_ok();
    if captured {
        return;
    }
    // Outside of a run the text goes to the real stream
    match stream {
        Stream::Stdout => passthrough(stream, &mut std::io::stdout(), text),
        Stream::Stderr => passthrough(stream, &mut std::io::stderr(), text),
    };
}

fn passthrough(stream: Stream, out: &mut dyn Write, text: &str) -> bool {
    match out.write_all(text.as_bytes()) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to write {} bytes to {:?}: {}", text.len(), stream, err);
            false
        }
    }
}

pub fn write_stdout(text: &str) {
    write(Stream::Stdout, text);
}

pub fn write_stderr(text: &str) {
    write(Stream::Stderr, text);
}

fn read(stream: Option<Stream>) -> Vec<u8> {
    CAPTURE
        .try_with(|capture| capture.lock().bytes(stream))
        .unwrap_or_default()
}

/// Standard output captured so far for the running node
pub fn get_stdout() -> String {
    String::from_utf8_lossy(&read(Some(Stream::Stdout))).into_owned()
}

pub fn get_stderr() -> String {
    String::from_utf8_lossy(&read(Some(Stream::Stderr))).into_owned()
}

/// Both streams, interleaved in write order
pub fn get_output() -> String {
    String::from_utf8_lossy(&read(None)).into_owned()
}

pub fn get_output_bytes() -> Vec<u8> {
    read(None)
}

/// `println!` into the running test's captured output
#[macro_export]
macro_rules! test_println {
    () => {
        $crate::plugins::output_capture::write_stdout("\n")
    };
    ($($arg:tt)*) => {
        $crate::plugins::output_capture::write_stdout(&format!("{}\n", format_args!($($arg)*)))
    };
}

/// `eprintln!` into the running test's captured output
#[macro_export]
macro_rules! test_eprintln {
    () => {
        $crate::plugins::output_capture::write_stderr("\n")
    };
    ($($arg:tt)*) => {
        $crate::plugins::output_capture::write_stderr(&format!("{}\n", format_args!($($arg)*)))
    };
}

struct OutputCapture;

impl RunInterceptor for OutputCapture {
    fn intercept(
        self: Arc<Self>,
        next: Next,
        _context: Context,
        result: Arc<TestResult>,
        _node: Arc<Node>,
    ) -> BoxFuture<'static, ()> {
        async move {
            let capture = Arc::new(Mutex::new(Capture::default()));
            CAPTURE.scope(capture.clone(), next.proceed()).await;

            let output = {
                let capture = capture.lock();
                String::from_utf8_lossy(&capture.bytes(None)).into_owned()
            };
            if output.is_empty() {
                return;
            }
            if result.has_tangible_stages() {
                result.append_output(&output);
            } else {
                trace!("dropping {} bytes of output from result {}", output.len(), result.id());
            }
        }
        .boxed()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OutputCapturePlugin;

impl Plugin for OutputCapturePlugin {
    fn register(&self, builder: &mut Builder) {
        builder.add_run_interceptor(
            Arc::new(OutputCapture),
            InterceptorOptions::order(order::OUTPUT_CAPTURE).with_id("output capture"),
        );
    }
}
