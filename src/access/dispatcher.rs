//! Serialized script evaluation
//!
//! Shell engines can't run two scripts at once, so a single worker thread owns the
//! evaluator and every request against one connection is queued to it. Callers wait
//! on their own reply channel with a timeout. A script whose caller gave up before it
//! started is skipped, and a late reply is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{ejson, AccessError, ConnectionString, MongoDbDriver, QueryResult};
use crate::mql::Value;

/// The engine that runs mongosh scripts, e.g. an embedded shell runtime.
pub trait ShellEvaluator: Send {
    /// Runs `script` and returns its result serialized as extended JSON.
    fn evaluate(&mut self, script: &str) -> Result<String>;
}

/// How long `stop` waits for the running script before leaving the worker behind.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

enum DispatcherMessage {
    Evaluate {
        script: String,
        reply: Sender<Result<String>>,
        abandoned: Arc<AtomicBool>,
    },
    Stop,
}

/// A [`MongoDbDriver`] that runs scripts one at a time on a dedicated thread.
pub struct SerializedDriver {
    connection_string: ConnectionString,
    running: Arc<AtomicBool>,
    jobs: Mutex<Option<Sender<DispatcherMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    finished: Mutex<Option<Receiver<()>>>,
}

impl SerializedDriver {
    /// Spawns the worker thread, which takes ownership of `evaluator`.
    pub fn start<E: ShellEvaluator + 'static>(
        evaluator: E,
        connection_string: ConnectionString,
    ) -> Result<Self> {
        let (jobs_tx, jobs_rx) = channel::<DispatcherMessage>();
        let (finished_tx, finished_rx) = channel();
        let running = Arc::new(AtomicBool::new(true));

        info!(
            "Starting query dispatcher for {}",
            connection_string.hosts.join(",")
        );

        let handle = thread::Builder::new()
            .name("mql-query-dispatcher".to_string())
            .spawn({
                let running = Arc::clone(&running);
                move || {
                    run_dispatcher(evaluator, jobs_rx, &running);
                    let _ = finished_tx.send(());
                }
            })
            .context("Failed to spawn query dispatcher thread")?;

        Ok(Self {
            connection_string,
            running,
            jobs: Mutex::new(Some(jobs_tx)),
            worker: Mutex::new(Some(handle)),
            finished: Mutex::new(Some(finished_rx)),
        })
    }

    /// Stops the worker after the script it is running. Queued scripts are dropped and
    /// their callers see a disconnected driver. Safe to call twice.
    ///
    /// Waits at most [`SHUTDOWN_TIMEOUT`] for the running script; a worker stuck past
    /// that is detached.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping query dispatcher");
        if let Some(jobs) = self.jobs.lock().take() {
            let _ = jobs.send(DispatcherMessage::Stop);
        }

        let handle = self.worker.lock().take();
        let finished = self.finished.lock().take();
        let Some(handle) = handle else {
            return;
        };
        match finished.map(|finished| finished.recv_timeout(SHUTDOWN_TIMEOUT)) {
            Some(Err(RecvTimeoutError::Timeout)) => {
                warn!("Query dispatcher did not stop within {:?}, detaching it", SHUTDOWN_TIMEOUT);
            }
            _ => {
                let _ = handle.join();
                info!("Query dispatcher stopped");
            }
        }
    }

    /// Queues `script` and waits up to `timeout` for its decoded result.
    pub fn try_evaluate(&self, script: &str, timeout: Duration) -> Result<Option<Value>, AccessError> {
        let (reply_tx, reply_rx) = channel();
        let abandoned = Arc::new(AtomicBool::new(false));
        {
            let jobs = self.jobs.lock();
            let jobs = jobs.as_ref().ok_or(AccessError::Disconnected)?;
            let message = DispatcherMessage::Evaluate {
                script: script.to_string(),
                reply: reply_tx,
                abandoned: Arc::clone(&abandoned),
            };
            jobs.send(message).map_err(|_| AccessError::Disconnected)?;
        }
        debug!("Queued script for evaluation ({} bytes)", script.len());

        match reply_rx.recv_timeout(timeout) {
            Ok(Ok(output)) => ejson::decode(&output),
            Ok(Err(e)) => Err(AccessError::Driver(format!("{:#}", e))),
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(AccessError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(AccessError::Disconnected),
        }
    }
}

impl MongoDbDriver for SerializedDriver {
    fn connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn connection_string(&self) -> ConnectionString {
        self.connection_string.clone()
    }

    fn evaluate(&self, script: &str, timeout: Duration) -> QueryResult {
        match self.try_evaluate(script, timeout) {
            Ok(Some(value)) => QueryResult::Run(value),
            Ok(None) => QueryResult::NoResult,
            Err(e) => {
                warn!("Script was not run: {}", e);
                QueryResult::NotRun
            }
        }
    }
}

impl Drop for SerializedDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_dispatcher<E: ShellEvaluator>(
    mut evaluator: E,
    jobs: Receiver<DispatcherMessage>,
    running: &AtomicBool,
) {
    while let Ok(message) = jobs.recv() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match message {
            DispatcherMessage::Evaluate {
                script,
                reply,
                abandoned,
            } => {
                if abandoned.load(Ordering::SeqCst) {
                    debug!("Skipping a script whose caller timed out");
                    continue;
                }
                let result = evaluator.evaluate(&script);
                // the caller may have timed out already
                let _ = reply.send(result);
            }
            DispatcherMessage::Stop => break,
        }
    }
    debug!("Query dispatcher loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Fails the test when two scripts overlap.
    struct ExclusiveEvaluator {
        in_flight: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
        evaluated: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ShellEvaluator for ExclusiveEvaluator {
        fn evaluate(&mut self, script: &str) -> Result<String> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.evaluated.fetch_add(1, Ordering::SeqCst);

            match script {
                "fail" => anyhow::bail!("SyntaxError: Unexpected token"),
                "nothing" => Ok(String::new()),
                _ => Ok(format!(r#"{{"script": "{}"}}"#, script)),
            }
        }
    }

    #[derive(Default)]
    struct Counters {
        overlaps: Arc<AtomicUsize>,
        evaluated: Arc<AtomicUsize>,
    }

    fn driver(delay: Duration) -> (Arc<SerializedDriver>, Counters) {
        let counters = Counters::default();
        let evaluator = ExclusiveEvaluator {
            in_flight: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::clone(&counters.overlaps),
            evaluated: Arc::clone(&counters.evaluated),
            delay,
        };
        let driver = SerializedDriver::start(evaluator, ConnectionString::parse("mongodb://localhost"))
            .unwrap();
        (Arc::new(driver), counters)
    }

    #[test]
    fn test_results_are_decoded() {
        let (driver, _) = driver(Duration::ZERO);
        assert_eq!(
            driver.evaluate("a", Duration::from_secs(5)),
            QueryResult::Run(Value::document([("script", Value::string("a"))]))
        );
        assert_eq!(driver.evaluate("nothing", Duration::from_secs(5)), QueryResult::NoResult);
    }

    #[test]
    fn test_failures_are_not_run() {
        let (driver, _) = driver(Duration::ZERO);
        assert!(matches!(
            driver.try_evaluate("fail", Duration::from_secs(5)),
            Err(AccessError::Driver(message)) if message.contains("SyntaxError")
        ));
        assert_eq!(driver.evaluate("fail", Duration::from_secs(5)), QueryResult::NotRun);
        // the worker survives a failed script
        assert!(matches!(
            driver.evaluate("b", Duration::from_secs(5)),
            QueryResult::Run(_)
        ));
    }

    #[test]
    fn test_scripts_never_overlap() {
        let (driver, counters) = driver(Duration::from_millis(5));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let driver = Arc::clone(&driver);
                thread::spawn(move || driver.evaluate(&format!("s{}", i), Duration::from_secs(10)))
            })
            .collect();

        for handle in handles {
            assert!(matches!(handle.join().unwrap(), QueryResult::Run(_)));
        }
        assert_eq!(counters.overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timeouts_do_not_block() {
        let (driver, _) = driver(Duration::from_millis(300));
        assert_eq!(
            driver.try_evaluate("slow", Duration::from_millis(10)),
            Err(AccessError::Timeout(Duration::from_millis(10)))
        );
        assert_eq!(
            driver.evaluate("slow", Duration::from_millis(10)),
            QueryResult::NotRun
        );
    }

    #[test]
    fn test_stopped_driver_is_disconnected() {
        let (driver, _) = driver(Duration::ZERO);
        assert!(driver.connected());
        driver.stop();
        driver.stop();
        assert!(!driver.connected());
        assert_eq!(
            driver.try_evaluate("a", Duration::from_secs(1)),
            Err(AccessError::Disconnected)
        );
    }

    #[test]
    fn test_scripts_of_callers_that_gave_up_are_skipped() {
        let (driver, counters) = driver(Duration::from_millis(100));
        for _ in 0..3 {
            assert_eq!(
                driver.try_evaluate("slow", Duration::from_millis(10)),
                Err(AccessError::Timeout(Duration::from_millis(10)))
            );
        }

        assert!(matches!(driver.evaluate("a", Duration::from_secs(5)), QueryResult::Run(_)));
        // the first slow script was already running, the other two never start
        assert_eq!(counters.evaluated.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_does_not_wait_for_queued_scripts() {
        let (driver, counters) = driver(Duration::from_millis(200));
        let callers: Vec<_> = (0..5)
            .map(|i| {
                let driver = Arc::clone(&driver);
                thread::spawn(move || driver.evaluate(&format!("s{}", i), Duration::from_secs(10)))
            })
            .collect();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        driver.stop();
        assert!(started.elapsed() < Duration::from_millis(1000));

        let results: Vec<QueryResult> = callers.into_iter().map(|caller| caller.join().unwrap()).collect();
        assert!(results.iter().filter(|result| matches!(result, QueryResult::Run(_))).count() <= 1);
        assert!(counters.evaluated.load(Ordering::SeqCst) <= 1);
    }
}
