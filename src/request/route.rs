use reqwest::Method;
use std::fmt;

use crate::rate_limit::BucketKey;

/// Failure to turn a template into a concrete route.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route {template} needs a value for {{{param}}}")]
    MissingParam { template: &'static str, param: String },
    #[error("route template {0} has an unclosed placeholder")]
    Malformed(&'static str),
}

/// A route shape such as `POST /channels/{channel_id}/messages`.
///
/// The template string doubles as the rate-limit bucket key, so every concrete
/// route compiled from it shares one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    method: Method,
    template: &'static str,
}

impl RouteTemplate {
    pub const fn new(method: Method, template: &'static str) -> Self {
        Self { method, template }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Substitute every `{name}` placeholder from `params`.
    pub fn compile(&self, params: &[(&str, &str)]) -> Result<Route, RouteError> {
        let mut path = String::with_capacity(self.template.len() + 16);
        let mut rest = self.template;
        while let Some(open) = rest.find('{') {
            path.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or(RouteError::Malformed(self.template))?;
            let name = &after[..close];
            let value = params
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| RouteError::MissingParam {
                    template: self.template,
                    param: name.to_string(),
                })?;
            path.push_str(value);
            rest = &after[close + 1..];
        }
        path.push_str(rest);

        Ok(Route {
            method: self.method.clone(),
            path,
            bucket: BucketKey::new(format!("{} {}", self.method, self.template)),
        })
    }
}

/// A concrete endpoint: method, path with IDs filled in, and its bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    path: String,
    bucket: BucketKey,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn bucket(&self) -> &BucketKey {
        &self.bucket
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

pub const GET_GATEWAY_BOT: RouteTemplate = RouteTemplate::new(Method::GET, "/gateway/bot");
pub const GET_CHANNEL: RouteTemplate = RouteTemplate::new(Method::GET, "/channels/{channel_id}");
pub const GET_MESSAGES: RouteTemplate =
    RouteTemplate::new(Method::GET, "/channels/{channel_id}/messages");
pub const CREATE_MESSAGE: RouteTemplate =
    RouteTemplate::new(Method::POST, "/channels/{channel_id}/messages");
pub const EDIT_MESSAGE: RouteTemplate =
    RouteTemplate::new(Method::PATCH, "/channels/{channel_id}/messages/{message_id}");
pub const DELETE_MESSAGE: RouteTemplate =
    RouteTemplate::new(Method::DELETE, "/channels/{channel_id}/messages/{message_id}");
pub const TRIGGER_TYPING: RouteTemplate =
    RouteTemplate::new(Method::POST, "/channels/{channel_id}/typing");
