use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Analysis Session Metrics ====
    pub static ref ANALYSIS_ACTIVE_SESSIONS: IntGauge = {
        let metric = IntGauge::new("analysis_active_sessions", "Number of running analysis sessions")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYSIS_FRAMES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("analysis_frames_total", "Frames handled by sampling loops"),
            &["mode", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYSIS_INFERENCE_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "analysis_inference_latency_seconds",
                "Latency of remote inference calls",
            )
            .buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
            &["operation"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYSIS_EVENTS_DERIVED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("analysis_events_derived_total", "Report events derived from inference output"),
            &["severity"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ANALYSIS_VIDEO_REQUESTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("analysis_video_requests_total", "Video file analysis requests"),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
