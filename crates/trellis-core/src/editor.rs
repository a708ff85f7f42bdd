//! Messages from the visual editor during a live-edit session.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{ContentError, EditorError};
use crate::model::Content;
use crate::scope::StateMap;

/// Hosts the editor is served from.
pub const DEFAULT_TRUSTED_HOSTS: &[&str] = &[
    "*.beta.builder.io",
    "beta.builder.io",
    "builder.io",
    "localhost",
    "qa.builder.io",
];

#[derive(Debug, Clone, PartialEq)]
pub enum EditorMessage {
    ConfigureSdk(ConfigureSdk),
    TriggerAnimation(JsonValue),
    ResetState(ResetState),
    ContentUpdate(ContentUpdate),
    /// Any other message type; ignored
    Unknown(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureSdk {
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub breakpoints: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResetState {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub state: Option<StateMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    /// Partial content document
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default)]
    pub edit_type: Option<String>,
}

impl ContentUpdate {
    /// The first non-empty of `key`, `alias`, `entry` and `modelName`.
    pub fn target(&self) -> Option<&str> {
        [&self.key, &self.alias, &self.entry, &self.model_name]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.is_empty())
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: JsonValue,
}

impl EditorMessage {
    /// Parse a message envelope `{"type": ..., "data": ...}`.
    pub fn parse(raw: &str) -> Result<Self, EditorError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let data = envelope.data;
        Ok(match envelope.kind.as_str() {
            "builder.configureSdk" => Self::ConfigureSdk(from_data(data)?),
            "builder.triggerAnimation" => Self::TriggerAnimation(data),
            "builder.resetState" => Self::ResetState(from_data(data)?),
            "builder.contentUpdate" => Self::ContentUpdate(from_data(data)?),
            _ => Self::Unknown(envelope.kind),
        })
    }
}

fn from_data<T: serde::de::DeserializeOwned + Default>(data: JsonValue) -> Result<T, EditorError> {
    if data.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(data)?)
}

/// The connection between one mounted document and the editor.
#[derive(Debug, Clone)]
pub struct EditorSession {
    model: String,
    trusted_hosts: Vec<String>,
}

impl EditorSession {
    /// A session for `model` trusting the default editor hosts.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            trusted_hosts: DEFAULT_TRUSTED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Trust additional hosts. `*.example.com` matches any subdomain.
    pub fn with_trusted_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn trusted_hosts(&self) -> &[String] {
        &self.trusted_hosts
    }

    /// Whether `origin` (`scheme://host[:port]`) is a trusted editor host.
    pub fn is_trusted(&self, origin: &str) -> bool {
        let Some(host) = hostname(origin) else {
            return false;
        };
        self.trusted_hosts.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_prefix("*.") {
                Some(suffix) => host.ends_with(&format!(".{suffix}")),
                None => host == pattern,
            }
        })
    }

    /// Parse a message, rejecting untrusted origins.
    pub fn receive(&self, origin: &str, raw: &str) -> Result<EditorMessage, EditorError> {
        if !self.is_trusted(origin) {
            return Err(EditorError::UntrustedOrigin(origin.to_string()));
        }
        EditorMessage::parse(raw)
    }

    /// A content update addressed to this session's model.
    pub fn accepts_update(&self, update: &ContentUpdate) -> bool {
        update.target() == Some(self.model.as_str())
    }

    /// New root state values when the reset targets this model.
    pub fn accepts_reset<'a>(&self, reset: &'a ResetState) -> Option<&'a StateMap> {
        (reset.model.as_deref() == Some(self.model.as_str()))
            .then_some(reset.state.as_ref())
            .flatten()
    }
}

fn hostname(origin: &str) -> Option<String> {
    let rest = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = match authority.strip_prefix('[') {
        Some(v6) => v6.split(']').next()?,
        None => authority.split(':').next()?,
    };
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Merge an editor update into `current`. Top-level fields are replaced;
/// `data` and `meta` are merged one level deep. Breakpoints fall back to
/// the current ones when the update carries none.
pub fn merge_content(current: &Content, update: &JsonValue) -> Result<Content, ContentError> {
    let JsonValue::Object(update) = update else {
        return Err(ContentError::NotAnObject);
    };
    let JsonValue::Object(mut merged) = serde_json::to_value(current)? else {
        return Err(ContentError::NotAnObject);
    };

    let previous_breakpoints = current.meta.breakpoints.clone();

    for (key, value) in update {
        match (key.as_str(), merged.get_mut(key), value) {
            ("data" | "meta", Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                existing.extend(incoming.clone());
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    let meta = merged
        .entry("meta")
        .or_insert_with(|| JsonValue::Object(Map::new()));
    if let JsonValue::Object(meta) = meta {
        let missing = meta
            .get("breakpoints")
            .map_or(true, |b| b.is_null() || b == &JsonValue::Bool(false));
        if missing {
            match previous_breakpoints {
                Some(breakpoints) => meta.insert("breakpoints".into(), breakpoints),
                None => meta.remove("breakpoints"),
            };
        }
    }

    Ok(serde_json::from_value(JsonValue::Object(merged))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn session() -> EditorSession {
        EditorSession::new("page").with_trusted_hosts(["*.example.com"])
    }

    #[test]
    fn parses_every_message_type() {
        let msg = EditorMessage::parse(r#"{"type": "builder.configureSdk", "data": {"contentId": "c1", "breakpoints": {"small": 500}}}"#).unwrap();
        assert_eq!(
            msg,
            EditorMessage::ConfigureSdk(ConfigureSdk {
                content_id: Some("c1".into()),
                breakpoints: Some(json!({"small": 500}))
            })
        );

        let msg = EditorMessage::parse(r#"{"type": "builder.resetState", "data": {"model": "page", "state": {"a": 1}}}"#).unwrap();
        assert!(matches!(msg, EditorMessage::ResetState(ResetState { state: Some(_), .. })));

        let msg = EditorMessage::parse(r#"{"type": "builder.triggerAnimation", "data": {"id": "x"}}"#).unwrap();
        assert_eq!(msg, EditorMessage::TriggerAnimation(json!({"id": "x"})));

        let msg = EditorMessage::parse(r#"{"type": "builder.somethingNew"}"#).unwrap();
        assert_eq!(msg, EditorMessage::Unknown("builder.somethingNew".into()));

        assert!(matches!(EditorMessage::parse("nope"), Err(EditorError::Malformed(_))));
    }

    #[test]
    fn content_update_target_precedence() {
        let update: ContentUpdate = serde_json::from_value(json!({
            "key": "", "alias": "page", "modelName": "other", "data": {}
        }))
        .unwrap();
        assert_eq!(update.target(), Some("page"));
        assert!(session().accepts_update(&update));

        let update: ContentUpdate = serde_json::from_value(json!({"modelName": "blog"})).unwrap();
        assert!(!session().accepts_update(&update));
    }

    #[test]
    fn trusts_configured_and_default_hosts() {
        let session = session();
        for origin in [
            "https://builder.io",
            "https://preview.beta.builder.io",
            "http://localhost:3000",
            "https://cms.example.com/path",
        ] {
            assert!(session.is_trusted(origin), "{origin}");
        }
        for origin in ["https://evil.io", "https://builder.io.evil.io", "https://example.com", ""] {
            assert!(!session.is_trusted(origin), "{origin}");
        }
    }

    #[test]
    fn untrusted_messages_are_rejected() {
        let raw = r#"{"type": "builder.resetState", "data": {"model": "page", "state": {}}}"#;
        assert!(matches!(
            session().receive("https://evil.io", raw),
            Err(EditorError::UntrustedOrigin(_))
        ));
        assert!(session().receive("http://localhost:1234", raw).is_ok());
    }

    #[test]
    fn reset_only_for_own_model() {
        let reset = ResetState {
            model: Some("other".into()),
            state: Some(StateMap::new()),
        };
        assert!(session().accepts_reset(&reset).is_none());
        let reset = ResetState {
            model: Some("page".into()),
            state: None,
        };
        assert!(session().accepts_reset(&reset).is_none());
    }

    #[test]
    fn merges_content_one_level_deep() {
        let current: Content = serde_json::from_value(json!({
            "id": "c1",
            "name": "Home",
            "data": {"title": "Old", "state": {"a": 1}, "blocks": [{"id": "x"}]},
            "meta": {"breakpoints": {"small": 600}, "kind": "page"}
        }))
        .unwrap();

        let merged = merge_content(
            &current,
            &json!({"name": "Landing", "data": {"title": "New"}, "meta": {"kind": "section"}}),
        )
        .unwrap();

        assert_eq!(merged.name.as_deref(), Some("Landing"));
        assert_eq!(merged.data.title.as_deref(), Some("New"));
        assert_eq!(merged.data.state["a"], json!(1));
        assert_eq!(merged.data.blocks[0].id, "x");
        assert_eq!(merged.meta.breakpoints, Some(json!({"small": 600})));
        assert_eq!(merged.meta.extra["kind"], json!("section"));

        let merged = merge_content(&current, &json!({"meta": {"breakpoints": {"small": 400}}})).unwrap();
        assert_eq!(merged.meta.breakpoints, Some(json!({"small": 400})));

        assert!(matches!(merge_content(&current, &json!([1])), Err(ContentError::NotAnObject)));
    }
}
