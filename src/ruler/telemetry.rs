//! Ruler telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct RulerInstruments {
    sync_total: Counter<u64>,
    ring_check_errors: Counter<u64>,
    list_rules_seconds: Histogram<f64>,
    load_rule_groups_seconds: Histogram<f64>,
}

fn instruments() -> &'static RulerInstruments {
    static INSTRUMENTS: OnceLock<RulerInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("strata.ruler");
        RulerInstruments {
            sync_total: meter
                .u64_counter("strata.ruler.sync_rules")
                .with_description("Times the ruler sync operation triggered, by reason")
                .init(),
            ring_check_errors: meter
                .u64_counter("strata.ruler.ring_check_errors")
                .with_description("Errors while checking the ring for rule group ownership")
                .init(),
            list_rules_seconds: meter
                .f64_histogram("strata.ruler.list_rules_duration")
                .with_description("Time spent listing rules")
                .with_unit("s")
                .init(),
            load_rule_groups_seconds: meter
                .f64_histogram("strata.ruler.load_rule_groups_duration")
                .with_description("Time spent loading the rule groups owned by this ruler")
                .with_unit("s")
                .init(),
        }
    })
}

pub fn record_sync(reason: &'static str) {
    instruments()
        .sync_total
        .add(1, &[KeyValue::new("reason", reason)]);
}

pub fn record_ring_check_error() {
    instruments().ring_check_errors.add(1, &[]);
}

pub fn record_list_rules_duration(seconds: f64) {
    instruments().list_rules_seconds.record(seconds, &[]);
}

pub fn record_load_rule_groups_duration(seconds: f64) {
    instruments().load_rule_groups_seconds.record(seconds, &[]);
}
