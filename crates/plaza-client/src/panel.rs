//! Declarative panel bindings. A panel declares its request as a one-line
//! attribute string, `"<verb> <path> [#region]"`, and the runner turns
//! that into a dispatched request whose outcome names the region to
//! render into.

use plaza_client_core::lifecycle::{StatusClass, classify_status};
use reqwest::Method;

use crate::dispatch::{HttpDispatcher, RequestSpec};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl ActionVerb {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    fn method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Patch => Method::PATCH,
            Self::Delete => Method::DELETE,
        }
    }

    /// Verbs without a request body send their params as query pairs.
    fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

/// A parsed panel binding, optionally carrying JSON params supplied by
/// the panel at run time.
#[derive(Debug, Clone)]
pub struct PanelAction {
    pub verb: ActionVerb,
    pub path: String,
    /// Shell region the outcome renders into, from a `#region` suffix.
    pub target: Option<String>,
    pub params: Option<serde_json::Value>,
}

impl PanelAction {
    /// Parses an attribute string like `"post /api/mail/send #compose"`.
    pub fn parse(binding: &str) -> Result<Self, ApiError> {
        let mut tokens = binding.split_whitespace();

        let verb_token = tokens.next().ok_or_else(|| ApiError::InvalidRequest {
            message: "empty action binding".into(),
        })?;
        let verb = ActionVerb::parse(verb_token).ok_or_else(|| ApiError::InvalidRequest {
            message: format!("unknown action verb \"{verb_token}\""),
        })?;

        let path = tokens.next().ok_or_else(|| ApiError::InvalidRequest {
            message: "action binding needs a path".into(),
        })?;
        if !path.starts_with('/') {
            return Err(ApiError::InvalidRequest {
                message: format!("action path must start with '/': \"{path}\""),
            });
        }

        let target = match tokens.next() {
            Some(token) => {
                let region = token.strip_prefix('#').ok_or_else(|| ApiError::InvalidRequest {
                    message: format!("unexpected token \"{token}\" in action binding"),
                })?;
                if region.is_empty() {
                    return Err(ApiError::InvalidRequest {
                        message: "empty target region".into(),
                    });
                }
                Some(region.to_string())
            }
            None => None,
        };
        if let Some(extra) = tokens.next() {
            return Err(ApiError::InvalidRequest {
                message: format!("unexpected token \"{extra}\" in action binding"),
            });
        }

        Ok(Self {
            verb,
            path: path.to_string(),
            target,
            params: None,
        })
    }

    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// What came back, classified for the shell. Non-2xx answers are still
/// outcomes; only transport failures are errors.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub target: Option<String>,
    pub status: u16,
    pub class: StatusClass,
    pub body: String,
}

impl ActionOutcome {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.class == StatusClass::Success
    }
}

#[derive(Clone)]
pub struct PanelActionRunner {
    dispatcher: HttpDispatcher,
}

impl PanelActionRunner {
    #[must_use]
    pub fn new(dispatcher: HttpDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn run(&self, action: &PanelAction) -> Result<ActionOutcome, ApiError> {
        let mut spec = RequestSpec::new(action.verb.method(), &action.path);
        if let Some(params) = &action.params {
            if action.verb.carries_body() {
                spec = spec.json(params.clone());
            } else {
                for (name, value) in query_pairs(params)? {
                    spec = spec.query(name, value);
                }
            }
        }

        let response = self.dispatcher.dispatch(&spec).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|error| ApiError::Network {
            message: error.to_string(),
        })?;

        Ok(ActionOutcome {
            target: action.target.clone(),
            status,
            class: classify_status(status),
            body,
        })
    }
}

fn query_pairs(params: &serde_json::Value) -> Result<Vec<(String, String)>, ApiError> {
    let Some(object) = params.as_object() else {
        return Err(ApiError::InvalidRequest {
            message: "query params must be a JSON object".into(),
        });
    };
    let mut pairs = Vec::with_capacity(object.len());
    for (name, value) in object {
        let rendered = match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        pairs.push((name.clone(), rendered));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ActionVerb, PanelAction, query_pairs};
    use crate::error::ApiError;

    #[test]
    fn parses_a_full_binding() -> anyhow::Result<()> {
        let action = PanelAction::parse("post /api/mail/send #compose")?;
        assert_eq!(action.verb, ActionVerb::Post);
        assert_eq!(action.path, "/api/mail/send");
        assert_eq!(action.target.as_deref(), Some("compose"));
        Ok(())
    }

    #[test]
    fn target_region_is_optional() -> anyhow::Result<()> {
        let action = PanelAction::parse("GET /api/mail/inbox")?;
        assert_eq!(action.verb, ActionVerb::Get);
        assert!(action.target.is_none());
        Ok(())
    }

    #[test]
    fn rejects_malformed_bindings() {
        for binding in [
            "",
            "fetch /api/mail",
            "get",
            "get api/mail",
            "get /api/mail compose",
            "get /api/mail #",
            "get /api/mail #a extra",
        ] {
            let parsed = PanelAction::parse(binding);
            assert!(
                matches!(parsed, Err(ApiError::InvalidRequest { .. })),
                "binding {binding:?} should not parse"
            );
        }
    }

    #[test]
    fn params_render_as_query_pairs() -> anyhow::Result<()> {
        let pairs = query_pairs(&json!({"folder": "inbox", "page": 2, "unread": true}))?;
        assert!(pairs.contains(&("folder".to_string(), "inbox".to_string())));
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(pairs.contains(&("unread".to_string(), "true".to_string())));

        assert!(query_pairs(&json!(["not", "an", "object"])).is_err());
        Ok(())
    }
}
