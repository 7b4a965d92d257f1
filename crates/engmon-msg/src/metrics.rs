//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus counters for broker sessions, publishes, and commands."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus metric handles for messaging activity. Cloning shares the underlying counters.
#[derive(Clone)]
pub struct MessagingMetrics {
    publishes: IntCounter,
    publish_failures: IntCounter,
    debug_failures: IntCounter,
    session_attempts: IntCounter,
    sessions: IntCounter,
    commands: IntCounterVec,
}

impl MessagingMetrics {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let publishes = IntCounter::with_opts(Opts::new(
            "engmon_publish_total",
            "Telemetry messages accepted on the data topic",
        ))?;
        let publish_failures = IntCounter::with_opts(Opts::new(
            "engmon_publish_failures_total",
            "Telemetry publishes rejected or timed out on the data topic",
        ))?;
        let debug_failures = IntCounter::with_opts(Opts::new(
            "engmon_debug_publish_failures_total",
            "Best-effort debug mirror publishes that failed",
        ))?;
        let session_attempts = IntCounter::with_opts(Opts::new(
            "engmon_session_attempts_total",
            "Broker session handshakes attempted",
        ))?;
        let sessions = IntCounter::with_opts(Opts::new(
            "engmon_sessions_established_total",
            "Broker sessions successfully established",
        ))?;
        let commands = IntCounterVec::new(
            Opts::new("engmon_commands_total", "Inbound commands by outcome"),
            &["command"],
        )?;

        registry.register(Box::new(publishes.clone()))?;
        registry.register(Box::new(publish_failures.clone()))?;
        registry.register(Box::new(debug_failures.clone()))?;
        registry.register(Box::new(session_attempts.clone()))?;
        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(commands.clone()))?;

        Ok(Self {
            publishes,
            publish_failures,
            debug_failures,
            session_attempts,
            sessions,
            commands,
        })
    }

    /// Record a data-topic publish.
    pub fn observe_publish(&self) {
        self.publishes.inc();
    }

    /// Record a failed data-topic publish.
    pub fn observe_publish_failure(&self) {
        self.publish_failures.inc();
    }

    /// Record a failed debug mirror publish.
    pub fn observe_debug_failure(&self) {
        self.debug_failures.inc();
    }

    /// Record a session handshake attempt.
    pub fn observe_session_attempt(&self) {
        self.session_attempts.inc();
    }

    /// Record an established session.
    pub fn observe_session_established(&self) {
        self.sessions.inc();
    }

    /// Record an inbound command; `label` is the command text or `invalid`.
    pub fn observe_command(&self, label: &str) {
        self.commands.with_label_values(&[label]).inc();
    }

    /// Data-topic publishes recorded so far.
    pub fn publish_total(&self) -> u64 {
        self.publishes.get()
    }

    /// Sessions established so far.
    pub fn sessions_established(&self) -> u64 {
        self.sessions.get()
    }

    /// Commands recorded under `label`.
    pub fn commands_total(&self, label: &str) -> u64 {
        self.commands.with_label_values(&[label]).get()
    }
}

impl std::fmt::Debug for MessagingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingMetrics")
            .field("publishes", &self.publishes.get())
            .field("sessions", &self.sessions.get())
            .finish()
    }
}
