use std::time::Duration;

use netgauge_summary_model::ToolKind;

use crate::locator::ArtifactPattern;

/// Default HMAC key accepted by public NLMT servers.
pub const DEFAULT_NLMT_HMAC: &str = "irttuser";
/// Public NLMT server used when no host is given.
pub const DEFAULT_NLMT_SERVER: &str = "irtt.heistp.net";
/// Host-prefixed, timestamp-suffixed result file name.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "{host}_{timestamp}.json";

/// What `{host}` renders to for runs without a target host.
const SERVER_HOST_LABEL: &str = "server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

/// Parameters passed through to NLMT.
#[derive(Debug, Clone, PartialEq)]
pub struct NlmtParams {
    pub hmac_key: Option<String>,
    /// Time between probes.
    pub interval: Duration,
    /// Probe payload length in bytes.
    pub packet_size: Option<u32>,
}

impl Default for NlmtParams {
    fn default() -> Self {
        Self {
            hmac_key: Some(DEFAULT_NLMT_HMAC.to_string()),
            interval: Duration::from_secs(1),
            packet_size: None,
        }
    }
}

/// Parameters passed through to iPerf.
#[derive(Debug, Clone, PartialEq)]
pub struct IperfParams {
    /// Time between interval reports.
    pub interval: Duration,
    pub transport: Transport,
    /// Have the server send and the client receive.
    pub reverse: bool,
    /// Target bandwidth in iPerf's own notation, for example `100M`.
    pub bandwidth: Option<String>,
    /// Read/write buffer length in bytes.
    pub packet_size: Option<u32>,
}

impl Default for IperfParams {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            transport: Transport::Tcp,
            reverse: false,
            bandwidth: None,
            packet_size: None,
        }
    }
}

/// The tool to run together with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolParams {
    NlmtClient(NlmtParams),
    NlmtServer(NlmtParams),
    IperfClient(IperfParams),
    IperfServer(IperfParams),
}

impl ToolParams {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolParams::NlmtClient(_) => ToolKind::NlmtClient,
            ToolParams::NlmtServer(_) => ToolKind::NlmtServer,
            ToolParams::IperfClient(_) => ToolKind::IperfClient,
            ToolParams::IperfServer(_) => ToolKind::IperfServer,
        }
    }

    fn interval(&self) -> Duration {
        match self {
            ToolParams::NlmtClient(p) | ToolParams::NlmtServer(p) => p.interval,
            ToolParams::IperfClient(p) | ToolParams::IperfServer(p) => p.interval,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("Run duration must be greater than zero")]
    ZeroDuration,
    #[error("Interval must be greater than zero")]
    ZeroInterval,
    #[error("{0} runs need at least one target host")]
    MissingHosts(ToolKind),
    #[error("Target hosts must not be blank")]
    BlankHost,
    #[error("Output template '{0}' must be a non-empty file name without wildcards")]
    InvalidTemplate(String),
}

/// The file name a tool is told to write its result to.
///
/// Supports `{host}`, `{timestamp}` and `{run_id}` placeholders. Wildcard characters are not
/// allowed, the search pattern derived from the template treats `*` as one.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTemplate(String);

impl Default for OutputTemplate {
    fn default() -> Self {
        Self(DEFAULT_OUTPUT_TEMPLATE.to_string())
    }
}

impl OutputTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, RequestError> {
        let template = template.into();
        if template.trim().is_empty() || template.contains(['/', '\\', '*', '?']) {
            return Err(RequestError::InvalidTemplate(template));
        }
        Ok(Self(template))
    }

    pub fn render(&self, host: Option<&str>, run_id: &str, timestamp: &str) -> String {
        self.0
            .replace("{host}", &host_label(host))
            .replace("{run_id}", run_id)
            .replace("{timestamp}", timestamp)
    }

    /// The pattern a result written from this template will match. The timestamp becomes a
    /// wildcard and a trailing wildcard tolerates tools that append their own extension.
    pub fn search_pattern(&self, host: Option<&str>, run_id: &str) -> ArtifactPattern {
        let pattern = self
            .0
            .replace("{host}", &host_label(host))
            .replace("{run_id}", run_id)
            .replace("{timestamp}", "*");
        ArtifactPattern::new(format!("{pattern}*"))
    }
}

fn host_label(host: Option<&str>) -> String {
    host.unwrap_or(SERVER_HOST_LABEL)
        .replace(['/', '\\', ':', '*', '?'], "_")
}

/// A request to measure against one or more hosts. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    params: ToolParams,
    hosts: Vec<String>,
    duration: Duration,
    output_template: OutputTemplate,
}

impl RunRequest {
    /// Validate and build a request.
    ///
    /// Client runs need at least one host. Server runs may have none, in which case a single
    /// server is started on the default address; otherwise one server is bound to each host.
    pub fn new(
        params: ToolParams,
        hosts: Vec<String>,
        duration: Duration,
    ) -> Result<Self, RequestError> {
        if duration.is_zero() {
            return Err(RequestError::ZeroDuration);
        }
        if params.interval().is_zero() {
            return Err(RequestError::ZeroInterval);
        }
        let hosts = hosts
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        if hosts.iter().any(|h| h.is_empty()) {
            return Err(RequestError::BlankHost);
        }
        let kind = params.kind();
        if !kind.is_server() && hosts.is_empty() {
            return Err(RequestError::MissingHosts(kind));
        }

        Ok(Self {
            params,
            hosts,
            duration,
            output_template: OutputTemplate::default(),
        })
    }

    pub fn with_output_template(mut self, output_template: OutputTemplate) -> Self {
        self.output_template = output_template;
        self
    }

    pub fn kind(&self) -> ToolKind {
        self.params.kind()
    }

    pub fn params(&self) -> &ToolParams {
        &self.params
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn output_template(&self) -> &OutputTemplate {
        &self.output_template
    }

    /// One entry per run that this request fans out to.
    pub(crate) fn targets(&self) -> Vec<Option<String>> {
        if self.hosts.is_empty() {
            vec![None]
        } else {
            self.hosts.iter().cloned().map(Some).collect()
        }
    }
}
