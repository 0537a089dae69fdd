//! Logging in tests is important for troubleshooting, and sometimes the log output is itself what
//! a test needs to check.  Either way each test gets its own log configuration.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// An implementation of `MakeWriter` that captures all log events for a single test
#[derive(Clone)]
struct TestWriter {
    log_events: Arc<Mutex<Vec<u8>>>,
}

impl TestWriter {
    fn new() -> Self {
        Self {
            log_events: Arc::new(Mutex::new(Vec::<u8>::new())),
        }
    }

    /// Clear the writer's buffer, returning the current contents as a string
    fn take_string(&self) -> String {
        let mut guard = self.log_events.lock().unwrap();

        let buffer: Vec<u8> = std::mem::take(&mut guard);

        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl<'a> Write for &'a TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.log_events.lock().unwrap();

        guard.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for TestWriter {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Run a test with logging enabled.
///
/// This takes the place of `tokio::test` because it needs to initialize the tokio runtime in some
/// more customized way to ensure logging is done correctly.
///
/// It initializes a single `tracing` Dispatch object for this test only, as well as a dedicated
/// tokio runtime.  Log events go to a buffer, which is dumped to the console at the end of the
/// test or in the event of a panic.  Every thread in the test's tokio runtime, including the
/// blocking pool, uses that same dispatch, so log events from spawned tasks are captured too, but
/// only those for this specific test.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    test_with_captured_logs(test).map(|_| ())
}

/// Same as [`test_with_logging`], but on success also returns the log output so the test can make
/// assertions about what was logged.
pub fn test_with_captured_logs(test: impl Future<Output = Result<()>>) -> Result<String> {
    // All log events for this test will be stored in this vec.
    let test_writer = TestWriter::new();

    let dispatch = {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let format = fmt::layer()
            .with_level(true)
            .with_target(true) // filters operate on targets so they're important to know
            .with_thread_ids(true) // helpful when multiple parallel tests are running at the same time
            .with_thread_names(false)
            .with_ansi(false) // escape codes get in the way of matching on the output
            .with_writer(test_writer.clone());

        // Get the log filter from the RUST_LOG env var, or if not set use a reasonable default
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("h2=warn,hyper=info,rustls=info,aws=info,debug"))?;

        let subscriber = tracing_subscriber::registry().with(filter).with(format);

        Arc::new(tracing::Dispatch::new(subscriber))
    };

    let result = tracing::dispatcher::with_default(&dispatch, || {
        std::thread_local! {
            static THREAD_DISPATCHER_GUARD: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        {
            let dispatch = dispatch.clone();
            builder.on_thread_start(move || {
                let dispatch = dispatch.clone();

                THREAD_DISPATCHER_GUARD.with(|cell| {
                    cell.replace(Some(tracing::dispatcher::set_default(&dispatch)));
                })
            });
        }

        builder.on_thread_stop(|| {
            // Drop the dispatcher guard so it's no longer the thread-local default
            THREAD_DISPATCHER_GUARD.with(|cell| cell.replace(None));
        });

        let runtime = builder.build()?;

        // It's not realistic to require all test futures to be explicitly unwind safe
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        Result::<_>::Ok(result)
    })?;

    // Test has run, maybe succeed maybe failed maybe panicked
    let log_events = test_writer.take_string();

    println!("Log events from this test: \n{}", log_events);

    match result {
        Ok(result) => result.map(|_| log_events),
        Err(err) => {
            // Re-throw the panic now that the log output is written
            std::panic::resume_unwind(err)
        }
    }
}
