//! In-process observability: Prometheus text metrics backed by atomics.

pub mod metrics;
