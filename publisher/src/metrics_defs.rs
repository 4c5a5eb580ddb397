//! Metrics definitions for the publisher.

use shared::metrics_defs::{MetricDef, MetricType};

pub const PUBLISH_SUCCESS: MetricDef = MetricDef {
    name: "publish.success",
    metric_type: MetricType::Counter,
    description: "Number of messages acknowledged by the backend",
};

pub const PUBLISH_FAILURE: MetricDef = MetricDef {
    name: "publish.failure",
    metric_type: MetricType::Counter,
    description: "Number of publishes rejected by the backend or timed out",
};

pub const PUBLISH_CANCELLED: MetricDef = MetricDef {
    name: "publish.cancelled",
    metric_type: MetricType::Counter,
    description: "Number of publishes abandoned because the caller went away",
};

pub const PUBLISH_DURATION: MetricDef = MetricDef {
    name: "publish.duration",
    metric_type: MetricType::Histogram,
    description: "Time from submission to backend acknowledgement in seconds",
};

pub const ORDERING_KEY_RESUMED: MetricDef = MetricDef {
    name: "ordering_key.resumed",
    metric_type: MetricType::Counter,
    description: "Number of ordering keys resumed after a failed publish",
};

pub const TOPICS_CACHED: MetricDef = MetricDef {
    name: "topics.cached",
    metric_type: MetricType::Gauge,
    description: "Number of topic handles held by the registry",
};

pub const HANDLE_STOP_FAILURE: MetricDef = MetricDef {
    name: "handle.stop.failure",
    metric_type: MetricType::Counter,
    description: "Number of topic handles that failed to flush on shutdown",
};

pub const ALL_METRICS: &[MetricDef] = &[
    PUBLISH_SUCCESS,
    PUBLISH_FAILURE,
    PUBLISH_CANCELLED,
    PUBLISH_DURATION,
    ORDERING_KEY_RESUMED,
    TOPICS_CACHED,
    HANDLE_STOP_FAILURE,
];
