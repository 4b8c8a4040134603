//! Event composition
//!
//! An [`EventRecord`] is built once per ingest call from the caller's
//! [`EventOptions`], the user traits in the context, and the host facts.
//!
//! ## Merge rules
//!
//! - `tags`: system fact tags in their fixed order, then caller tags in call
//!   order. Nothing is de-duplicated.
//! - `meta`: user traits, then caller metadata. Caller keys win.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::{value_kind, Channel, ChannelKind, USER_ID_TRAIT};
use crate::error::{Error, Result};
use crate::system::SystemFacts;

/// Event body as sent to `POST /v1/events`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub name: String,
    pub description: String,
    pub tags: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<BTreeMap<ChannelKind, String>>,
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone)]
enum Metadata {
    Value(Value),
    // serde_json::Error is not Clone; keep the message
    Unencodable(String),
}

/// Per-call inputs to an ingest
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    metadata: Option<Metadata>,
    tags: Vec<Value>,
    channel: Option<Channel>,
}

impl EventOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach metadata. It must serialize to a JSON object; anything else
    /// makes the event fail composition and it is not sent.
    pub fn metadata<T: Serialize + ?Sized>(mut self, metadata: &T) -> Self {
        self.metadata = Some(match serde_json::to_value(metadata) {
            Ok(value) => Metadata::Value(value),
            Err(e) => Metadata::Unencodable(e.to_string()),
        });
        self
    }

    pub fn tag(mut self, tag: impl Into<Value>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// Context pulled from the client at compose time
#[derive(Debug, Clone, Copy)]
pub struct ComposeContext<'a> {
    pub project: Option<&'a str>,
    pub user_traits: &'a Map<String, Value>,
    pub facts: &'a SystemFacts,
}

/// Build the canonical event record.
///
/// Fails with [`Error::Schema`] when metadata is present but not object-shaped.
pub fn compose(
    name: &str,
    description: &str,
    options: EventOptions,
    ctx: ComposeContext<'_>,
) -> Result<EventRecord> {
    let extra = match options.metadata {
        None => Map::new(),
        Some(Metadata::Value(Value::Object(fields))) => fields,
        Some(Metadata::Value(other)) => {
            return Err(Error::Schema(format!(
                "metadata must serialize to an object, got {}",
                value_kind(&other)
            )))
        }
        Some(Metadata::Unencodable(message)) => {
            return Err(Error::Schema(format!("metadata encoding error '{}'", message)))
        }
    };

    let mut tags = ctx.facts.tags();
    tags.extend(options.tags);

    Ok(EventRecord {
        name: name.to_string(),
        description: description.to_string(),
        tags,
        project: ctx.project.map(str::to_string),
        user_id: ctx.user_traits.get(USER_ID_TRAIT).cloned(),
        channels: options.channel.as_ref().map(Channel::to_map),
        meta: merge_meta(ctx.user_traits, extra),
    })
}

/// User traits overlaid with call-site metadata; call-site keys win.
fn merge_meta(traits: &Map<String, Value>, metadata: Map<String, Value>) -> Map<String, Value> {
    let mut combined = traits.clone();
    combined.extend(metadata);
    combined
}
