//! Subscriber counters.
//!
//! Counters go through the `metrics` facade, labelled by subscription; the
//! installed recorder (Prometheus in `jobgate serve`) owns the values.

use metrics::{counter, describe_counter};

pub const MESSAGES_TOTAL: &str = "jobgate_messages_total";
pub const MESSAGE_ERRORS_TOTAL: &str = "jobgate_message_errors_total";
const SUBSCRIPTION_LABEL: &str = "subscription";

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    describe_counter!(MESSAGES_TOTAL, "Messages received per subscription");
    describe_counter!(
        MESSAGE_ERRORS_TOTAL,
        "Messages that failed to trigger a job, per subscription"
    );
}

pub fn record_message(subscription: &str) {
    counter!(MESSAGES_TOTAL, SUBSCRIPTION_LABEL => subscription.to_string()).increment(1);
}

pub fn record_error(subscription: &str) {
    counter!(MESSAGE_ERRORS_TOTAL, SUBSCRIPTION_LABEL => subscription.to_string()).increment(1);
}

/// In-process recorder for asserting on counters in tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::SUBSCRIPTION_LABEL;
    use metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Cell(AtomicU64);

    impl CounterFn for Cell {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }

        fn absolute(&self, value: u64) {
            self.0.fetch_max(value, Ordering::SeqCst);
        }
    }

    /// Keeps counter values by metric name and subscription label.
    #[derive(Default)]
    pub struct CountingRecorder {
        counters: Mutex<HashMap<(String, String), Arc<Cell>>>,
    }

    impl CountingRecorder {
        pub fn get(&self, name: &str, subscription: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(&(name.to_string(), subscription.to_string()))
                .map(|cell| cell.0.load(Ordering::SeqCst))
                .unwrap_or(0)
        }

        /// Run `future` to completion on this thread with the recorder installed.
        pub fn run<F: Future>(&self, future: F) -> F::Output {
            metrics::with_local_recorder(self, || {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap()
                    .block_on(future)
            })
        }
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(
            &self,
            _key: KeyName,
            _unit: Option<Unit>,
            _description: SharedString,
        ) {
        }

        fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

        fn describe_histogram(
            &self,
            _key: KeyName,
            _unit: Option<Unit>,
            _description: SharedString,
        ) {
        }

        fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
            let subscription = key
                .labels()
                .find(|label| label.key() == SUBSCRIPTION_LABEL)
                .map(|label| label.value().to_string())
                .unwrap_or_default();
            let cell = self
                .counters
                .lock()
                .unwrap()
                .entry((key.name().to_string(), subscription))
                .or_default()
                .clone();
            Counter::from_arc(cell)
        }

        fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }
}
