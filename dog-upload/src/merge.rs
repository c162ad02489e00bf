//! Option merging.
//!
//! Every transfer attempt resolves its request configuration fresh from
//! three layers, lowest precedence first: queue defaults, per-file
//! overrides, and computed values (qualified URL, resolved method and
//! field name). Nothing is cached, so edits to the queue defaults reach
//! files that are still queued.

use reqwest::Url;
use serde_json::Map;
use std::collections::BTreeMap;

use crate::error::{UploadError, UploadResult};
use crate::types::{FileOptions, HttpMethod, RequestData, RequestOptions};

/// Field name used when neither layer sets one
pub const DEFAULT_FIELD_NAME: &str = "Filedata";

/// Context for the computed layer
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    /// Base for qualifying relative URLs; also the fallback target
    pub base_url: Option<Url>,
}

impl MergeContext {
    pub fn new(base_url: Option<&str>) -> UploadResult<Self> {
        let base_url = base_url
            .map(|base| {
                Url::parse(base)
                    .map_err(|e| UploadError::invalid_option(format!("invalid base url `{}`: {}", base, e)))
            })
            .transpose()?;
        Ok(Self { base_url })
    }
}

/// Fully resolved configuration for one transfer attempt
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub data: Option<RequestData>,
    pub field_name: String,
    pub headers: BTreeMap<String, String>,
}

impl EffectiveRequest {
    /// Auxiliary data as a query string; empty when there is none
    pub fn query_string(&self) -> String {
        self.data.as_ref().map(RequestData::to_query_string).unwrap_or_default()
    }

    /// Auxiliary data as decoded form fields
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.data.as_ref().map(RequestData::to_pairs).unwrap_or_default()
    }
}

/// Resolve the effective request for one file
pub fn merge_options(
    defaults: &RequestOptions,
    file: &FileOptions,
    ctx: &MergeContext,
) -> UploadResult<EffectiveRequest> {
    let url = qualify_url(file.url.as_deref().or(defaults.url.as_deref()), ctx)?;

    let method = match file.method.as_deref().or(defaults.method.as_deref()) {
        Some(raw) => raw.parse::<HttpMethod>()?,
        None => HttpMethod::Post,
    };

    let field_name = file
        .field_name
        .as_deref()
        .or(defaults.field_name.as_deref())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_FIELD_NAME)
        .to_string();

    let merge = file.merge_data.or(defaults.merge_data).unwrap_or(true);
    let data = merge_data(defaults.data.as_ref(), file.data.as_ref(), merge);

    let mut headers = defaults.headers.clone();
    headers.extend(file.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(EffectiveRequest {
        url,
        method,
        data,
        field_name,
        headers,
    })
}

/// Combine the payload layers.
///
/// With merging on and both layers present: text joins with `&`, maps merge
/// shallowly with per-file keys winning, and mixed kinds join as query
/// strings. Otherwise the per-file payload replaces the default.
pub fn merge_data(
    defaults: Option<&RequestData>,
    file: Option<&RequestData>,
    merge: bool,
) -> Option<RequestData> {
    match (defaults, file) {
        (Some(base), Some(own)) if merge => Some(match (base, own) {
            (RequestData::Fields(base), RequestData::Fields(own)) => {
                let mut merged: Map<_, _> = base.clone();
                for (key, value) in own {
                    merged.insert(key.clone(), value.clone());
                }
                RequestData::Fields(merged)
            }
            _ => RequestData::Text(join_query(&base.to_query_string(), &own.to_query_string())),
        }),
        (base, own) => own.or(base).cloned(),
    }
}

fn join_query(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{}&{}", a, b),
    }
}

fn qualify_url(url: Option<&str>, ctx: &MergeContext) -> UploadResult<Url> {
    match (url.filter(|u| !u.is_empty()), ctx.base_url.as_ref()) {
        (Some(raw), Some(base)) => base
            .join(raw)
            .map_err(|e| UploadError::invalid_option(format!("invalid url `{}`: {}", raw, e))),
        (Some(raw), None) => Url::parse(raw).map_err(|e| {
            UploadError::invalid_option(format!("url `{}` is not absolute and no base url is set: {}", raw, e))
        }),
        (None, Some(base)) => Ok(base.clone()),
        (None, None) => Err(UploadError::invalid_option("no upload url configured")),
    }
}
