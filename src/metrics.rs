//! Prometheus metrics for the gateway.
//!
//! Each [`Metrics`] owns its own registry so tests can build independent
//! instances without colliding on metric names.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    /// Generations admitted through the gate.
    pub generations_started: IntCounter,

    /// Generations that ended with an engine failure.
    pub generations_failed: IntCounter,

    /// Acquisition attempts that found the gate occupied.
    pub busy_polls: IntCounter,

    /// Time spent waiting for the gate, in seconds.
    pub gate_wait_seconds: Histogram,

    /// 1 while a token is outstanding.
    pub gate_held: IntGauge,

    /// Swap operations by kind (`model`, `loras`) and outcome.
    pub swaps: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("llm_gate".to_string()), None)?;

        let generations_started =
            IntCounter::new("generations_started_total", "Generations admitted")?;
        let generations_failed =
            IntCounter::new("generations_failed_total", "Generations ended by engine failure")?;
        let busy_polls = IntCounter::new("gate_busy_polls_total", "Gate polls that found it busy")?;
        let gate_wait_seconds = Histogram::with_opts(
            HistogramOpts::new("gate_wait_seconds", "Time spent waiting for the gate").buckets(
                vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0],
            ),
        )?;
        let gate_held = IntGauge::new("gate_held", "Whether a generation or swap holds the gate")?;
        let swaps = IntCounterVec::new(
            Opts::new("swaps_total", "Model and lora swap operations"),
            &["kind", "outcome"],
        )?;

        registry.register(Box::new(generations_started.clone()))?;
        registry.register(Box::new(generations_failed.clone()))?;
        registry.register(Box::new(busy_polls.clone()))?;
        registry.register(Box::new(gate_wait_seconds.clone()))?;
        registry.register(Box::new(gate_held.clone()))?;
        registry.register(Box::new(swaps.clone()))?;

        Ok(Self {
            registry,
            generations_started,
            generations_failed,
            busy_polls,
            gate_wait_seconds,
            gate_held,
            swaps,
        })
    }

    pub fn record_swap(&self, kind: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.swaps.with_label_values(&[kind, outcome]).inc();
    }

    /// Render all metrics in the text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
