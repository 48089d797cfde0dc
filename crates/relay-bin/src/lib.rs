//! Outbox relay process wiring.
//!
//! The binary (`outbox-relay`, built with the `kafka` feature) is a thin
//! shell over this library: it parses the command line, creates the Kafka
//! producer and hands it to [`run_relay`].

mod app;

pub use app::{
    breaker_settings, build_relay, relay_settings, run_relay, shutdown_on_signal, status_report,
    StatusReport, SERVICE_NAME,
};
