use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::codec::query;
use crate::error::UploadError;

/// Auxiliary request payload: a raw query string or a key/value map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestData {
    Text(String),
    Fields(Map<String, Value>),
}

impl RequestData {
    /// Build a field map from string pairs
    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Fields(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Render as an `application/x-www-form-urlencoded` query string
    pub fn to_query_string(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Fields(map) => query::encode_fields(map),
        }
    }

    /// Flatten into decoded key/value pairs, as a form would submit them
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        query::decode_pairs(&self.to_query_string())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Fields(map) => map.is_empty(),
        }
    }
}

impl From<&str> for RequestData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for RequestData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Map<String, Value>> for RequestData {
    fn from(map: Map<String, Value>) -> Self {
        Self::Fields(map)
    }
}

/// Request method; anything but GET is sent as POST on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            other => Err(UploadError::invalid_option(format!("unsupported method `{}`", other))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

/// How many files may be `Running` at once.
///
/// Configured as a bool or an integer: `false`/`0` is unbounded, `true`
/// is one at a time, `N` is at most `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concurrency {
    Unbounded,
    Limit(usize),
}

impl Concurrency {
    /// Normalize a raw count; zero means unbounded
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            Self::Unbounded
        } else {
            Self::Limit(count)
        }
    }

    /// Effective bound, `None` when unbounded
    pub fn bound(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Limit(n) => Some((*n).max(1)),
        }
    }

    /// Whether `uploading` files already saturate the bound
    pub fn is_saturated(&self, uploading: usize) -> bool {
        self.bound().map(|bound| uploading >= bound).unwrap_or(false)
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::Limit(1)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConcurrency {
    Flag(bool),
    Count(u64),
}

impl<'de> Deserialize<'de> for Concurrency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawConcurrency::deserialize(deserializer)? {
            RawConcurrency::Flag(false) => Self::Unbounded,
            RawConcurrency::Flag(true) => Self::Limit(1),
            RawConcurrency::Count(n) => Self::from_count(n as usize),
        })
    }
}

impl Serialize for Concurrency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bound().unwrap_or(0) as u64)
    }
}

/// One layer of request options. Used both for queue defaults and per-file
/// overrides; `None` means "not set at this layer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    pub url: Option<String>,
    pub method: Option<String>,
    pub data: Option<RequestData>,
    pub merge_data: Option<bool>,
    pub field_name: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// Per-file overrides share the layer shape of the queue defaults
pub type FileOptions = RequestOptions;

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method<S: Into<String>>(mut self, method: S) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_data<D: Into<RequestData>>(mut self, data: D) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_merge_data(mut self, merge: bool) -> Self {
        self.merge_data = Some(merge);
        self
    }

    pub fn with_field_name<S: Into<String>>(mut self, name: S) -> Self {
        self.field_name = Some(name.into());
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
