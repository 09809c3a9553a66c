use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub notifications_in_outbox: IntGauge,
    pub notification_send_seconds: HistogramVec,
    pub hub_occupancy: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "order_transitions_total",
                "Order state transitions by event and outcome",
            ),
            &["event", "outcome"],
        )
        .expect("valid order_transitions_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new(
                "notifications_total",
                "Notification sends by outcome",
            ),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let notifications_in_outbox = IntGauge::new(
            "notifications_in_outbox",
            "Current number of fan-out requests waiting in the outbox",
        )
        .expect("valid notifications_in_outbox metric");

        let notification_send_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "notification_send_seconds",
                "Latency of external notification sends in seconds",
            ),
            &["outcome"],
        )
        .expect("valid notification_send_seconds metric");

        let hub_occupancy = GaugeVec::new(
            Opts::new(
                "hub_occupancy",
                "Orders currently staged at a hub (both roles combined)",
            ),
            &["hub_id"],
        )
        .expect("valid hub_occupancy metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(notifications_in_outbox.clone()))
            .expect("register notifications_in_outbox");
        registry
            .register(Box::new(notification_send_seconds.clone()))
            .expect("register notification_send_seconds");
        registry
            .register(Box::new(hub_occupancy.clone()))
            .expect("register hub_occupancy");

        Self {
            registry,
            transitions_total,
            notifications_total,
            notifications_in_outbox,
            notification_send_seconds,
            hub_occupancy,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
