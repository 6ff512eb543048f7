use clap::ValueEnum;
use prompt_protocol::Severity;

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum EmbedMode {
    Fast,
    Stub,
}

impl EmbedMode {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            EmbedMode::Fast => "fast",
            EmbedMode::Stub => "stub",
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum SeverityFlag {
    Low,
    Moderate,
    High,
    Critical,
}

impl SeverityFlag {
    pub(crate) const fn as_domain(self) -> Severity {
        match self {
            SeverityFlag::Low => Severity::Low,
            SeverityFlag::Moderate => Severity::Moderate,
            SeverityFlag::High => Severity::High,
            SeverityFlag::Critical => Severity::Critical,
        }
    }
}
