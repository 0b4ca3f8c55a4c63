use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use k8s_openapi::{
    api::core::v1::{ResourceQuota, ResourceQuotaSpec},
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};

use crate::{
    api::{endpoint::ResourceTarget, Fetch, FetchResponse},
    error::Error,
    features::list::quantity::parse_quantity,
    logger,
};

use super::{validate_document, EditorState, EditorTarget, Saved, YamlEditor};

const QUOTA_KIND: &str = "ResourceQuota";

/// Structured form of a ResourceQuota
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaForm {
    pub name: String,
    pub namespace: String,
    /// e.g. `requests.cpu: 2`, `pods: 10`
    pub hard: BTreeMap<String, String>,
}

impl QuotaForm {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            hard: BTreeMap::new(),
        }
    }

    pub fn from_quota(quota: &ResourceQuota) -> Self {
        let hard = quota
            .spec
            .as_ref()
            .and_then(|spec| spec.hard.as_ref())
            .map(|hard| {
                hard.iter()
                    .map(|(k, Quantity(v))| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: quota.metadata.name.clone().unwrap_or_default(),
            namespace: quota.metadata.namespace.clone().unwrap_or_default(),
            hard,
        }
    }

    pub fn limit(mut self, resource: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.set_limit(resource, quantity);
        self
    }

    pub fn set_limit(&mut self, resource: impl Into<String>, quantity: impl Into<String>) {
        self.hard.insert(resource.into(), quantity.into());
    }

    pub fn remove_limit(&mut self, resource: &str) -> Option<String> {
        self.hard.remove(resource)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("name is required"));
        }

        if self.namespace.trim().is_empty() {
            return Err(Error::validation("namespace is required"));
        }

        if self.hard.is_empty() {
            return Err(Error::validation("at least one limit is required"));
        }

        for (resource, quantity) in &self.hard {
            if resource.trim().is_empty() {
                return Err(Error::validation("limit name is required"));
            }

            if parse_quantity(quantity).is_none() {
                return Err(Error::validation(format!(
                    "{}: {:?} is not a valid quantity",
                    resource, quantity
                )));
            }
        }

        Ok(())
    }

    pub fn build(&self) -> Result<ResourceQuota, Error> {
        self.validate()?;

        Ok(ResourceQuota {
            metadata: ObjectMeta {
                name: Some(self.name.trim().to_string()),
                namespace: Some(self.namespace.trim().to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(
                    self.hard
                        .iter()
                        .map(|(k, v)| (k.trim().to_string(), Quantity(v.trim().to_string())))
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Validated YAML of the quota
    pub fn build_document(&self) -> Result<String, Error> {
        let document = serde_yaml::to_string(&self.build()?)?;

        validate_document(&document)?;

        Ok(document)
    }
}

/// Form editor on top of [`YamlEditor`]. A new quota is applied, a loaded one
/// is updated in place. Load and validation failures show as the editor's
/// error banner.
pub struct QuotaEditor {
    editor: YamlEditor,
    form: QuotaForm,
}

impl QuotaEditor {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self {
            editor: YamlEditor::new(fetch),
            form: QuotaForm::default(),
        }
    }

    pub fn on_saved(mut self, callback: impl FnMut(&Saved) + Send + 'static) -> Self {
        self.editor = self.editor.on_saved(callback);
        self
    }

    pub fn form(&self) -> &QuotaForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut QuotaForm {
        &mut self.form
    }

    pub fn state(&self) -> &EditorState {
        self.editor.state()
    }

    pub fn target(&self) -> Option<&EditorTarget> {
        self.editor.target()
    }

    pub fn open_new(&mut self, namespace: impl Into<String>) -> Result<()> {
        let namespace: String = namespace.into();

        self.close();
        self.editor.open_new(QUOTA_KIND, Some(&namespace))?;
        self.form = QuotaForm::new("", namespace);

        Ok(())
    }

    /// Loads an existing quota into the form.
    pub async fn open_existing(&mut self, name: &str, namespace: &str) -> Result<()> {
        self.close();

        let target = ResourceTarget::namespaced(QUOTA_KIND, name, namespace);

        self.editor.open_existing(target).await?;

        let document = self.editor.document().unwrap_or_default();

        match serde_yaml::from_str::<ResourceQuota>(document) {
            Ok(quota) => {
                self.form = QuotaForm::from_quota(&quota);
                Ok(())
            }
            Err(e) => {
                let e = Error::from(e);
                self.editor.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    pub async fn save(&mut self) -> Result<FetchResponse> {
        if self.editor.state().is_closed() {
            return Err(Error::validation("quota editor is not open").into());
        }

        let document = match self.form.build_document() {
            Ok(document) => document,
            Err(e) => {
                logger!(info, "rejected quota form: {}", e);

                self.editor.fail(e.to_string());
                return Err(e.into());
            }
        };

        self.editor.set_document(document)?;
        self.editor.save().await
    }

    pub fn dismiss_error(&mut self) {
        self.editor.dismiss_error();
    }

    pub fn close(&mut self) {
        self.editor.close();
        self.form = QuotaForm::default();
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};
    use indoc::indoc;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::api::{mock::MockTestFetch, FetchRequest, RequestBody};

    use super::*;

    fn form() -> QuotaForm {
        QuotaForm::new("team-quota", "team-a")
            .limit("requests.cpu", "2")
            .limit("requests.memory", "4Gi")
            .limit("pods", "20")
    }

    fn yaml_request() -> FetchRequest {
        FetchRequest::get("/api/resource/yaml")
            .query("kind", "ResourceQuota")
            .query("name", "team-quota")
            .query("namespace", "team-a")
    }

    fn yaml_body_contains(request: &FetchRequest, needle: &str) -> bool {
        matches!(&request.body, Some(RequestBody::Yaml(doc)) if doc.contains(needle))
    }

    #[test]
    fn document_from_form() {
        assert_eq!(
            form().build_document().unwrap(),
            indoc! {"
                apiVersion: v1
                kind: ResourceQuota
                metadata:
                  name: team-quota
                  namespace: team-a
                spec:
                  hard:
                    pods: '20'
                    requests.cpu: '2'
                    requests.memory: 4Gi
            "}
        );
    }

    #[rstest]
    #[case(QuotaForm::new("", "team-a").limit("pods", "1"), "Validation: name is required")]
    #[case(QuotaForm::new("q", "").limit("pods", "1"), "Validation: namespace is required")]
    #[case(QuotaForm::new("q", "team-a"), "Validation: at least one limit is required")]
    #[case(
        QuotaForm::new("q", "team-a").limit("requests.cpu", "two"),
        "Validation: requests.cpu: \"two\" is not a valid quantity"
    )]
    fn invalid_form(#[case] form: QuotaForm, #[case] expected: &str) {
        assert_eq!(form.validate().unwrap_err().to_string(), expected);
    }

    #[tokio::test]
    async fn invalid_form_shows_banner_and_sends_nothing() {
        let mut fetch = MockTestFetch::new();
        fetch.expect_send().never();

        let mut editor = QuotaEditor::new(Arc::new(fetch));
        editor.open_new("team-a").unwrap();

        assert!(editor.save().await.is_err());

        let EditorState::Error { message, document } = editor.state() else {
            panic!("expected error state, got {:?}", editor.state());
        };

        assert_eq!(message, "Validation: name is required");
        assert!(document.is_some());

        editor.dismiss_error();
        assert!(matches!(editor.state(), EditorState::Ready { .. }));
    }

    #[tokio::test]
    async fn new_quota_is_applied_through_import() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_send()
            .withf(|request| {
                request.method == Method::POST
                    && request.path == "/api/resource/import"
                    && yaml_body_contains(request, "name: team-quota")
            })
            .times(1)
            .returning(|_| Ok(FetchResponse::new(StatusCode::OK, "")));

        let mut editor = QuotaEditor::new(Arc::new(fetch));
        editor.open_new("team-a").unwrap();

        *editor.form_mut() = form();
        editor.save().await.unwrap();

        assert!(matches!(editor.state(), EditorState::Ready { .. }));
    }

    #[tokio::test]
    async fn edit_existing_quota_is_updated_in_place() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_send()
            .with(eq(yaml_request()))
            .times(1)
            .returning(|_| {
                Ok(FetchResponse::new(
                    StatusCode::OK,
                    form().build_document().unwrap(),
                ))
            });

        fetch
            .expect_send()
            .withf(|request| {
                request.method == Method::PUT
                    && request.path == "/api/resource/yaml"
                    && request.query_value("name") == Some("team-quota")
                    && request.query_value("namespace") == Some("team-a")
                    && yaml_body_contains(request, "pods: '50'")
            })
            .times(1)
            .returning(|_| Ok(FetchResponse::new(StatusCode::OK, "")));

        let mut editor = QuotaEditor::new(Arc::new(fetch));

        editor.open_existing("team-quota", "team-a").await.unwrap();
        assert_eq!(editor.form(), &form());
        assert_eq!(
            editor.target(),
            Some(&EditorTarget::Existing(ResourceTarget::namespaced(
                "ResourceQuota",
                "team-quota",
                "team-a"
            )))
        );

        editor.form_mut().set_limit("pods", "50");
        editor.save().await.unwrap();

        assert!(matches!(editor.state(), EditorState::Ready { .. }));
    }

    #[tokio::test]
    async fn load_failure_shows_banner() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_send()
            .with(eq(yaml_request()))
            .times(1)
            .returning(|_| Ok(FetchResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")));

        let mut editor = QuotaEditor::new(Arc::new(fetch));

        assert!(editor.open_existing("team-quota", "team-a").await.is_err());
        assert!(matches!(
            editor.state(),
            EditorState::Error { document: None, .. }
        ));

        assert!(editor.save().await.is_err());

        editor.dismiss_error();
        assert!(editor.state().is_closed());
    }

    #[tokio::test]
    async fn unparsable_quota_keeps_document() {
        let mut fetch = MockTestFetch::new();

        fetch
            .expect_send()
            .with(eq(yaml_request()))
            .times(1)
            .returning(|_| Ok(FetchResponse::new(StatusCode::OK, "kind: [")));

        let mut editor = QuotaEditor::new(Arc::new(fetch));

        assert!(editor.open_existing("team-quota", "team-a").await.is_err());
        assert_eq!(editor.state().document(), Some("kind: ["));
    }
}
