use prometheus::{Encoder, Histogram, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub wave_notifications_total: IntCounterVec,
    pub timeouts_processed_total: IntCounterVec,
    pub workers_available: IntGauge,
    pub sweep_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Lifecycle operations by outcome"),
            &["operation", "outcome"],
        )
        .expect("valid transitions_total metric");

        let wave_notifications_total = IntCounterVec::new(
            Opts::new(
                "wave_notifications_total",
                "Workers notified per matching wave",
            ),
            &["wave"],
        )
        .expect("valid wave_notifications_total metric");

        let timeouts_processed_total = IntCounterVec::new(
            Opts::new(
                "timeouts_processed_total",
                "Expired timeouts handled by kind",
            ),
            &["kind"],
        )
        .expect("valid timeouts_processed_total metric");

        let workers_available = IntGauge::new(
            "workers_available",
            "Workers currently online and available",
        )
        .expect("valid workers_available metric");

        let sweep_duration_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "sweep_duration_seconds",
            "Duration of one timeout sweep in seconds",
        ))
        .expect("valid sweep_duration_seconds metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(wave_notifications_total.clone()))
            .expect("register wave_notifications_total");
        registry
            .register(Box::new(timeouts_processed_total.clone()))
            .expect("register timeouts_processed_total");
        registry
            .register(Box::new(workers_available.clone()))
            .expect("register workers_available");
        registry
            .register(Box::new(sweep_duration_seconds.clone()))
            .expect("register sweep_duration_seconds");

        Self {
            registry,
            transitions_total,
            wave_notifications_total,
            timeouts_processed_total,
            workers_available,
            sweep_duration_seconds,
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

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn encode_renders_registered_collectors() {
        let metrics = Metrics::new();
        metrics
            .transitions_total
            .with_label_values(&["accept", "ok"])
            .inc();
        metrics.workers_available.set(3);

        let rendered = metrics.encode().unwrap();
        assert!(rendered.contains("transitions_total"));
        assert!(rendered.contains("workers_available 3"));
    }
}
