use std::sync::{Arc, LazyLock};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    Key, KeyValue, StringValue, Value,
};

/// Central metrics singleton for pool metrics.
pub(crate) static POOL_METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

const KEY_POOL_NAME: Key = Key::from_static_str("db.client.connection.pool.name");
const KEY_STATE: Key = Key::from_static_str("db.client.connection.state");

/// Storage for pool metrics.
pub(crate) struct Metrics {
    /// The number of connections that are currently in state described by the state attribute.
    pub(crate) conn_count: Gauge<u64>,
    /// The maximum number of open connections allowed.
    pub(crate) conn_max: Gauge<u64>,
    /// The number of current pending requests for an open connection.
    pub(crate) pending: Gauge<u64>,
    /// The number of connection timeouts that have occurred trying to obtain a connection from the pool.
    pub(crate) timeouts: Counter<u64>,
    /// The time it took to create a new connection.
    pub(crate) create_time: Histogram<f64>,
    /// The time it took to obtain an open connection from the pool.
    pub(crate) wait_time: Histogram<f64>,
    /// The time between borrowing a connection and returning it to the pool.
    pub(crate) use_time: Histogram<f64>,
}

impl Metrics {
    /// Create new storage for pool metrics.
    ///
    /// You probably don't need this, as all pools use a central metrics singleton for storage.
    pub(crate) fn new() -> Self {
        let meter = global::meter("agepool");
        // db.client.connection.pool.name (string)
        // db.client.connection.state (idle / used)
        let conn_count = meter
            .u64_gauge("db.client.connection.count")
            .with_description("The number of connections that are currently in state described by the state attribute.")
            .build();
        // db.client.connection.pool.name (string)
        let conn_max = meter
            .u64_gauge("db.client.connection.max")
            .with_description("The maximum number of open connections allowed.")
            .build();
        // db.client.connection.pool.name (string)
        let pending = meter
            .u64_gauge("db.client.connection.pending_requests")
            .with_description("The number of current pending requests for an open connection.")
            .build();
        // db.client.connection.pool.name (string)
        let timeouts = meter
            .u64_counter("db.client.connection.timeouts")
            .with_description("The number of connection timeouts that have occurred trying to obtain a connection from the pool.")
            .build();
        // db.client.connection.pool.name (string)
        let create_time = meter
            .f64_histogram("db.client.connection.create_time")
            .with_unit("s")
            .with_description("The time it took to create a new connection.")
            .build();
        // db.client.connection.pool.name (string)
        let wait_time = meter
            .f64_histogram("db.client.connection.wait_time")
            .with_unit("s")
            .with_description("The time it took to obtain an open connection from the pool.")
            .build();
        // db.client.connection.pool.name (string)
        let use_time = meter
            .f64_histogram("db.client.connection.use_time")
            .with_unit("s")
            .with_description(
                "The time between borrowing a connection and returning it to the pool.",
            )
            .build();
        Metrics {
            conn_count,
            conn_max,
            pending,
            timeouts,
            create_time,
            wait_time,
            use_time,
        }
    }

    pub(crate) fn record_state(&self, label: &[KeyValue; 1], state: &PoolState) {
        self.conn_max.record(state.max_size as u64, label);
        self.pending.record(state.waiting as u64, label);
        let idle_label = status_kv(label[0].clone(), "idle");
        self.conn_count.record(state.idle as u64, &idle_label);
        let used_label = status_kv(label[0].clone(), "used");
        self.conn_count.record(state.in_use as u64, &used_label);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub(crate) fn pool_kv(name: Option<&str>) -> [KeyValue; 1] {
    [KeyValue::new(
        KEY_POOL_NAME,
        name.unwrap_or("default").to_owned(),
    )]
}

pub(crate) fn status_kv(name: KeyValue, status: &'static str) -> [KeyValue; 2] {
    [
        name,
        KeyValue::new(KEY_STATE, Value::String(StringValue::from(status))),
    ]
}

/// Snapshot of pool counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolState {
    /// Maximum total (`idle` + `in_use`) number of resources in the pool.
    pub max_size: usize,
    /// Current total (`idle` + `in_use`) number of resources in the pool.
    pub size: usize,
    /// Current number of idle (not acquired) resources.
    pub idle: usize,
    /// Current number of in-use resources, including ones being created.
    pub in_use: usize,
    /// Current number of acquire requests waiting for a resource.
    pub waiting: usize,
}
