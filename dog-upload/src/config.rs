//! Uploader configuration.
//!
//! `UploaderConfig` carries the queue-level request defaults (the lowest
//! option layer) and the queue policy. It can be built in code, parsed from
//! JSON using the camelCase option names, or layered from environment
//! variables:
//!
//! ```bash
//! export DOG_UPLOAD__URL=https://example.com/upload
//! export DOG_UPLOAD__FILE_LIST_MAX=10
//! export DOG_UPLOAD__QUEUED=3
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{UploadError, UploadResult};
use crate::types::{Concurrency, RequestData, RequestOptions, TransportKind};

/// Configuration for one uploader instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploaderConfig {
    /// Queue-level request defaults
    #[serde(flatten)]
    pub request: RequestOptions,

    /// Base against which relative upload URLs are resolved
    pub base_url: Option<String>,

    /// Admission bound (`queued` is accepted as an alias)
    #[serde(alias = "queued")]
    pub concurrency: Concurrency,

    pub allow_duplicates: bool,

    /// Maximum number of files in the list, 0 for no limit
    pub file_list_max: usize,

    /// Maximum aggregate size in bytes, 0 for no limit
    pub file_list_size_max: u64,

    /// Smallest accepted file in bytes, 0 for no limit
    pub file_size_min: u64,

    /// Largest accepted file in bytes, 0 for no limit
    pub file_size_max: u64,

    /// Accepted lower-case extensions; empty accepts everything
    pub type_filter: Vec<String>,

    /// Start uploading as soon as a selection is accepted
    pub instant_start: bool,

    /// Allow selecting several files at once
    pub multiple: bool,

    /// Per-transfer deadline in seconds, enforced by the transport
    pub time_limit: Option<u64>,

    /// Explicit transport; bypasses capability probing and its cache
    pub transport: Option<TransportKind>,

    /// Probe order used when no transport is forced
    pub transport_priority: Vec<TransportKind>,

    /// Lowest plugin version the plugin transport accepts
    pub plugin_min_version: u32,

    /// Log every lifecycle notification at info level
    pub verbose: bool,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            request: RequestOptions {
                merge_data: Some(true),
                ..RequestOptions::default()
            },
            base_url: None,
            concurrency: Concurrency::default(),
            allow_duplicates: false,
            file_list_max: 0,
            file_list_size_max: 0,
            file_size_min: 0,
            file_size_max: 0,
            type_filter: Vec::new(),
            instant_start: false,
            multiple: true,
            time_limit: None,
            transport: None,
            transport_priority: TransportKind::DEFAULT_PRIORITY.to_vec(),
            plugin_min_version: 9,
            verbose: false,
        }
    }
}

impl UploaderConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a JSON document using the camelCase option names
    pub fn from_json_str(json: &str) -> UploadResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from process environment variables starting with `prefix`
    pub fn from_env(prefix: &str) -> UploadResult<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from `PREFIX__SOME_KEY=value` pairs.
    ///
    /// Keys map to camelCase option names (`FILE_LIST_MAX` → `fileListMax`).
    /// Values are parsed as JSON when possible and taken as strings otherwise.
    pub fn from_vars<I>(prefix: &str, vars: I) -> UploadResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = Map::new();
        let marker = format!("{}__", prefix.trim_end_matches('_'));
        for (key, raw) in vars {
            let Some(stripped) = key.strip_prefix(&marker) else {
                continue;
            };
            let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            map.insert(camel_case(stripped), value);
        }
        serde_json::from_value(Value::Object(map))
            .map_err(|e| UploadError::config(format!("invalid {} environment: {}", prefix, e)))
    }

    /// Transfer deadline as a duration
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit.filter(|secs| *secs > 0).map(Duration::from_secs)
    }

    /// Queue-level defaults used by the option merger
    pub fn request_defaults(&self) -> &RequestOptions {
        &self.request
    }

    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.request.url = Some(url.into());
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base: S) -> Self {
        self.base_url = Some(base.into());
        self
    }

    pub fn with_method<S: Into<String>>(mut self, method: S) -> Self {
        self.request.method = Some(method.into());
        self
    }

    pub fn with_data<D: Into<RequestData>>(mut self, data: D) -> Self {
        self.request.data = Some(data.into());
        self
    }

    pub fn with_merge_data(mut self, merge: bool) -> Self {
        self.request.merge_data = Some(merge);
        self
    }

    pub fn with_field_name<S: Into<String>>(mut self, name: S) -> Self {
        self.request.field_name = Some(name.into());
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.request.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn allow_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    pub fn with_file_list_max(mut self, max: usize) -> Self {
        self.file_list_max = max;
        self
    }

    pub fn with_file_list_size_max(mut self, bytes: u64) -> Self {
        self.file_list_size_max = bytes;
        self
    }

    pub fn with_file_size_limits(mut self, min: u64, max: u64) -> Self {
        self.file_size_min = min;
        self.file_size_max = max;
        self
    }

    pub fn with_type_filter<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.type_filter = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn instant_start(mut self) -> Self {
        self.instant_start = true;
        self
    }

    pub fn with_time_limit(mut self, secs: u64) -> Self {
        self.time_limit = Some(secs);
        self
    }

    /// Force a transport, skipping capability probing
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    pub fn with_transport_priority(mut self, priority: Vec<TransportKind>) -> Self {
        self.transport_priority = priority;
        self
    }

    pub fn with_plugin_min_version(mut self, version: u32) -> Self {
        self.plugin_min_version = version;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, word) in key.split('_').filter(|w| !w.is_empty()).enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_follow_the_original_widget() {
        let config = UploaderConfig::default();
        assert_eq!(config.concurrency, Concurrency::Limit(1));
        assert_eq!(config.request.merge_data, Some(true));
        assert!(!config.allow_duplicates);
        assert_eq!(config.file_list_max, 0);
        assert_eq!(config.plugin_min_version, 9);
        assert_eq!(config.transport_priority, TransportKind::DEFAULT_PRIORITY.to_vec());
    }

    #[test]
    fn parses_camel_case_json() {
        let config = UploaderConfig::from_json_str(
            r#"{
                "url": "/upload",
                "method": "GET",
                "data": {"album": 7},
                "mergeData": false,
                "fieldName": "photo",
                "allowDuplicates": true,
                "fileListMax": 2,
                "fileListSizeMax": 1000,
                "queued": 3,
                "instantStart": true,
                "transport": "frame"
            }"#,
        )
        .unwrap();

        assert_eq!(config.request.url.as_deref(), Some("/upload"));
        assert_eq!(config.request.method.as_deref(), Some("GET"));
        assert_eq!(config.request.merge_data, Some(false));
        assert_eq!(config.request.field_name.as_deref(), Some("photo"));
        assert!(config.allow_duplicates);
        assert_eq!(config.file_list_max, 2);
        assert_eq!(config.file_list_size_max, 1000);
        assert_eq!(config.concurrency, Concurrency::Limit(3));
        assert!(config.instant_start);
        assert_eq!(config.transport, Some(TransportKind::Frame));
        assert_eq!(
            config.request.data,
            Some(RequestData::Fields(json!({"album": 7}).as_object().cloned().unwrap()))
        );
    }

    #[test]
    fn queued_false_means_unbounded() {
        let config = UploaderConfig::from_json_str(r#"{"queued": false}"#).unwrap();
        assert_eq!(config.concurrency, Concurrency::Unbounded);
    }

    #[test]
    fn env_vars_map_to_options() {
        let vars = vec![
            ("DOG_UPLOAD__URL".to_string(), "https://example.com/up".to_string()),
            ("DOG_UPLOAD__FILE_LIST_MAX".to_string(), "10".to_string()),
            ("DOG_UPLOAD__QUEUED".to_string(), "true".to_string()),
            ("OTHER__URL".to_string(), "ignored".to_string()),
        ];
        let config = UploaderConfig::from_vars("DOG_UPLOAD", vars).unwrap();
        assert_eq!(config.request.url.as_deref(), Some("https://example.com/up"));
        assert_eq!(config.file_list_max, 10);
        assert_eq!(config.concurrency, Concurrency::Limit(1));
    }

    #[test]
    fn invalid_env_values_are_config_errors() {
        let vars = vec![("DOG_UPLOAD__FILE_LIST_MAX".to_string(), "many".to_string())];
        let err = UploaderConfig::from_vars("DOG_UPLOAD", vars).unwrap_err();
        assert!(matches!(err, UploadError::Config(_)));
    }

    #[test]
    fn builder_normalizes_type_filter() {
        let config = UploaderConfig::new().with_type_filter([".JPG", "png"]);
        assert_eq!(config.type_filter, vec!["jpg", "png"]);
        assert_eq!(camel_case("FILE_LIST_SIZE_MAX"), "fileListSizeMax");
    }
}
