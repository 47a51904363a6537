use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub matches_total: IntCounterVec,
    pub match_latency_seconds: HistogramVec,
    pub location_updates_total: IntCounter,
    pub ws_connections: GaugeVec,
    pub http_in_flight: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let matches_total = IntCounterVec::new(
            Opts::new("matches_total", "Match supervisor outcomes"),
            &["outcome"],
        )
        .expect("valid matches_total metric");

        let match_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "match_latency_seconds",
                "Time from supervisor start to a match outcome in seconds",
            ),
            &["outcome"],
        )
        .expect("valid match_latency_seconds metric");

        let location_updates_total = IntCounter::new(
            "location_updates_total",
            "Driver location updates accepted",
        )
        .expect("valid location_updates_total metric");

        let ws_connections = GaugeVec::new(
            Opts::new("ws_connections", "Open socket connections by peer kind"),
            &["kind"],
        )
        .expect("valid ws_connections metric");

        let http_in_flight =
            IntGauge::new("http_in_flight", "HTTP requests currently being served")
                .expect("valid http_in_flight metric");

        registry
            .register(Box::new(matches_total.clone()))
            .expect("register matches_total");
        registry
            .register(Box::new(match_latency_seconds.clone()))
            .expect("register match_latency_seconds");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(ws_connections.clone()))
            .expect("register ws_connections");
        registry
            .register(Box::new(http_in_flight.clone()))
            .expect("register http_in_flight");

        Self {
            registry,
            matches_total,
            match_latency_seconds,
            location_updates_total,
            ws_connections,
            http_in_flight,
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

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
