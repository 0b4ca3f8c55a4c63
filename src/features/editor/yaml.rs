use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize as _;
use serde_yaml::Value;

use crate::{
    api::{
        endpoint::{self, ResourceTarget},
        fetch_text, Fetch, FetchRequest, FetchResponse,
    },
    error::Error,
    features::mutation::{target_prefix, MutationKind, MutationRequest},
    logger,
};

use super::template::template;

/// DNS-1123 subdomain
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("valid name pattern")
});

const NAME_MAX_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl DocumentSummary {
    pub fn target(&self) -> ResourceTarget {
        ResourceTarget::namespaced(
            &self.kind,
            &self.name,
            self.namespace.as_deref().unwrap_or_default(),
        )
    }
}

fn required<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, Error> {
    let field = path
        .iter()
        .try_fold(value, |value, key| value.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());

    field.ok_or_else(|| Error::validation(format!("{} is required", path.join("."))))
}

fn summarize(value: &Value) -> Result<DocumentSummary, Error> {
    if !value.is_mapping() {
        return Err(Error::validation("document must be a mapping"));
    }

    let api_version = required(value, &["apiVersion"])?;
    let kind = required(value, &["kind"])?;
    let name = required(value, &["metadata", "name"])?;

    if NAME_MAX_LEN < name.len() || !NAME_PATTERN.is_match(name) {
        return Err(Error::validation(format!(
            "metadata.name {:?} must be a lowercase RFC 1123 subdomain",
            name
        )));
    }

    let namespace = value
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
        .map(ToString::to_string);

    Ok(DocumentSummary {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace,
    })
}

/// Checks a (possibly multi-document) YAML before anything is sent.
pub fn validate_document(document: &str) -> Result<Vec<DocumentSummary>, Error> {
    let mut summaries = Vec::new();

    for doc in serde_yaml::Deserializer::from_str(document) {
        let value = Value::deserialize(doc)
            .map_err(|e| Error::validation(format!("invalid YAML: {}", e)))?;

        if value.is_null() {
            continue;
        }

        summaries.push(summarize(&value)?);
    }

    if summaries.is_empty() {
        return Err(Error::validation("document is empty"));
    }

    Ok(summaries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorTarget {
    /// Submitted with server-side apply
    New { kind: String },
    /// Submitted as an update of this object
    Existing(ResourceTarget),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EditorState {
    #[default]
    Closed,
    Loading,
    Ready {
        document: String,
    },
    Saving {
        document: String,
    },
    /// Inline banner. `document` is kept when there is something to return to.
    Error {
        message: String,
        document: Option<String>,
    },
}

impl EditorState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn document(&self) -> Option<&str> {
        match self {
            Self::Ready { document } | Self::Saving { document } => Some(document),
            Self::Error { document, .. } => document.as_deref(),
            Self::Closed | Self::Loading => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Saved {
    pub mutation: MutationRequest,
    pub response: FetchResponse,
}

pub type OnSaved = Box<dyn FnMut(&Saved) + Send>;

/// Single-resource YAML editor.
///
/// `Closed → Loading → {Ready, Error}`, `Ready → Saving → {Ready, Error}`,
/// any state `→ Closed`. Errors never close the editor.
pub struct YamlEditor {
    fetch: Arc<dyn Fetch>,
    state: EditorState,
    target: Option<EditorTarget>,
    on_saved: Option<OnSaved>,
}

impl YamlEditor {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self {
            fetch,
            state: EditorState::Closed,
            target: None,
            on_saved: None,
        }
    }

    pub fn on_saved(mut self, callback: impl FnMut(&Saved) + Send + 'static) -> Self {
        self.on_saved = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn target(&self) -> Option<&EditorTarget> {
        self.target.as_ref()
    }

    pub fn document(&self) -> Option<&str> {
        self.state.document()
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.state.is_closed() {
            Ok(())
        } else {
            Err(Error::validation("editor is already open").into())
        }
    }

    /// Loads the canonical YAML of an existing object.
    pub async fn open_existing(&mut self, target: ResourceTarget) -> Result<()> {
        self.ensure_closed()?;

        logger!(debug, "open editor for {}", target);

        self.state = EditorState::Loading;
        self.target = Some(EditorTarget::Existing(target.clone()));

        let request = FetchRequest::get(endpoint::RESOURCE_YAML).query_pairs(target.query());

        match fetch_text(&*self.fetch, request).await {
            Ok(document) => {
                self.state = EditorState::Ready { document };
                Ok(())
            }
            Err(e) => {
                self.state = EditorState::Error {
                    message: format!("{:#}", e),
                    document: None,
                };
                Err(e)
            }
        }
    }

    /// Starts from the built-in template of `kind`.
    pub fn open_new(&mut self, kind: &str, namespace: Option<&str>) -> Result<()> {
        self.ensure_closed()?;

        self.state = EditorState::Loading;
        self.target = Some(EditorTarget::New {
            kind: kind.to_string(),
        });

        match template(kind, namespace) {
            Ok(document) => {
                self.state = EditorState::Ready { document };
                Ok(())
            }
            Err(e) => {
                self.state = EditorState::Error {
                    message: format!("{:#}", e),
                    document: None,
                };
                Err(e)
            }
        }
    }

    /// Opens a document from elsewhere (a file, a structured form).
    pub fn open_document(
        &mut self,
        target: EditorTarget,
        document: impl Into<String>,
    ) -> Result<()> {
        self.ensure_closed()?;

        self.target = Some(target);
        self.state = EditorState::Ready {
            document: document.into(),
        };

        Ok(())
    }

    pub fn edit(&mut self, document: impl Into<String>) -> Result<()> {
        match &mut self.state {
            EditorState::Ready { document: current } => {
                *current = document.into();
                Ok(())
            }
            state => Err(Error::validation(format!("cannot edit in state {:?}", state)).into()),
        }
    }

    /// Replaces the held document, clearing an error banner. For editors that
    /// render their document from a form.
    pub fn set_document(&mut self, document: impl Into<String>) -> Result<()> {
        match &self.state {
            EditorState::Ready { .. } | EditorState::Error { document: Some(_), .. } => {
                self.state = EditorState::Ready {
                    document: document.into(),
                };
                Ok(())
            }
            state => Err(Error::validation(format!("cannot edit in state {:?}", state)).into()),
        }
    }

    /// Shows `message` as the banner and keeps the held document.
    pub fn fail(&mut self, message: impl Into<String>) {
        let document = self.state.document().map(ToString::to_string);

        self.state = EditorState::Error {
            message: message.into(),
            document,
        };
    }

    fn save_request(&self, document: &str) -> Result<MutationRequest, Error> {
        let summaries = validate_document(document)?;

        let Some(target) = &self.target else {
            return Err(Error::validation("editor has no target"));
        };

        let mutation = match target {
            EditorTarget::New { .. } => {
                let request =
                    FetchRequest::post(endpoint::RESOURCE_IMPORT).yaml_body(document.to_string());

                let subject = summaries
                    .iter()
                    .map(|s| s.target().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");

                summaries.iter().fold(
                    MutationRequest::new(MutationKind::Apply, subject, request),
                    |mutation, summary| mutation.invalidate(target_prefix(&summary.target())),
                )
            }
            EditorTarget::Existing(target) => {
                let [summary] = summaries.as_slice() else {
                    return Err(Error::validation(
                        "an update takes exactly one document",
                    ));
                };

                if summary.name != target.name || !summary.kind.eq_ignore_ascii_case(&target.kind) {
                    return Err(Error::validation(format!(
                        "document describes {}/{}, expected {}/{}",
                        summary.kind, summary.name, target.kind, target.name
                    )));
                }

                let request = FetchRequest::put(endpoint::RESOURCE_YAML)
                    .query_pairs(target.query())
                    .yaml_body(document.to_string());

                MutationRequest::new(MutationKind::Update, target.to_string(), request)
                    .invalidate(target_prefix(target))
            }
        };

        Ok(mutation)
    }

    /// Validates, then submits. Success fires the callback and returns to `Ready`.
    pub async fn save(&mut self) -> Result<FetchResponse> {
        let document = match &self.state {
            EditorState::Ready { document } => document.to_string(),
            state => {
                return Err(Error::validation(format!("cannot save in state {:?}", state)).into())
            }
        };

        let mutation = match self.save_request(&document) {
            Ok(mutation) => mutation,
            Err(e) => {
                logger!(info, "rejected document: {}", e);

                self.state = EditorState::Error {
                    message: e.to_string(),
                    document: Some(document),
                };
                return Err(e.into());
            }
        };

        self.state = EditorState::Saving {
            document: document.to_string(),
        };

        let result = match self.fetch.send(mutation.request.clone()).await {
            Ok(response) => response.error_for_status().map_err(Into::into),
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                logger!(info, "{} {}", mutation.kind, mutation.subject);

                // a created object is updated from now on
                if matches!(self.target, Some(EditorTarget::New { .. })) {
                    if let Ok([summary]) = validate_document(&document).as_deref() {
                        self.target = Some(EditorTarget::Existing(summary.target()));
                    }
                }

                self.state = EditorState::Ready { document };

                if let Some(callback) = &mut self.on_saved {
                    callback(&Saved {
                        mutation,
                        response: response.clone(),
                    });
                }

                Ok(response)
            }
            Err(e) => {
                logger!(error, "{} {} failed: {:#}", mutation.kind, mutation.subject, e);

                self.state = EditorState::Error {
                    message: format!("{:#}", e),
                    document: Some(document),
                };
                Err(e)
            }
        }
    }

    /// Back to `Ready` when a document is held, otherwise `Closed`.
    pub fn dismiss_error(&mut self) {
        if let EditorState::Error { document, .. } = &mut self.state {
            self.state = match document.take() {
                Some(document) => EditorState::Ready { document },
                None => EditorState::Closed,
            };
        }
    }

    pub fn close(&mut self) {
        self.state = EditorState::Closed;
        self.target = None;
    }
}
