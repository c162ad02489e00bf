use serde::{Deserialize, Serialize};
use std::fmt;

/// The interchangeable ways of moving file bytes to a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plugin-hosted: every operation is a remote call into a plugin agent
    Plugin,
    /// Form post into a hidden frame: no progress, completion on response load
    Frame,
    /// Streaming multipart HTTP request with progress
    Request,
}

impl TransportKind {
    /// Default priority order used when the configuration names none
    pub const DEFAULT_PRIORITY: [TransportKind; 3] =
        [TransportKind::Request, TransportKind::Plugin, TransportKind::Frame];

    /// Get the kind name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Frame => "frame",
            Self::Request => "request",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a host environment can do, as observed at construction time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProbe {
    /// A streaming, progress-reporting HTTP request is available
    pub streaming_request: bool,

    /// The HTTP stack can build multipart payloads itself
    pub native_multipart: bool,

    /// Plain form posts can be submitted
    pub form_post: bool,

    /// Version of the installed upload plugin, if any
    pub plugin_version: Option<u32>,
}

impl HostProbe {
    /// Probe for a native runtime with a full HTTP client and no plugin
    pub fn native() -> Self {
        Self {
            streaming_request: true,
            native_multipart: true,
            form_post: true,
            plugin_version: None,
        }
    }

    /// A host that can do nothing at all
    pub fn none() -> Self {
        Self {
            streaming_request: false,
            native_multipart: false,
            form_post: false,
            plugin_version: None,
        }
    }

    /// Record an installed plugin version
    pub fn with_plugin_version(mut self, version: u32) -> Self {
        self.plugin_version = Some(version);
        self
    }

    /// Whether `kind` can run on this host. Pure; no state is consulted.
    pub fn supports(&self, kind: TransportKind, plugin_min_version: u32) -> bool {
        match kind {
            TransportKind::Request => self.streaming_request,
            TransportKind::Plugin => self
                .plugin_version
                .map(|version| version >= plugin_min_version)
                .unwrap_or(false),
            TransportKind::Frame => self.form_post,
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::native()
    }
}

/// What a transport can do; the controller reads these at selection and
/// on every progress callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    /// Emits byte-level progress events
    pub progress: bool,

    /// Accepts several files from one selection
    pub multiple: bool,

    /// Files are selected and held on the remote side (plugin ids)
    pub remote_selection: bool,
}
