//! Chart renderer: template expansion plus manifest parsing
//!
//! `Renderer` turns a chart and a resolved value set into an ordered
//! `ManifestSet` (template order, then document order) and optional notes.

use rudder_core::{
    Chart, CoreError, ManifestSet, ReleaseInfo, TemplateContext, Values, manifest,
};

use crate::engine::{Engine, TemplateEngine};
use crate::error::{EngineError, Result, TemplateError, TemplateErrorKind};

/// Output of rendering a chart
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub manifests: ManifestSet,

    /// Post-install notes (if NOTES.txt exists)
    pub notes: Option<String>,
}

/// Renders charts through a [`TemplateEngine`]
pub struct Renderer<E: TemplateEngine = Engine> {
    engine: E,
    namespace: String,
}

impl Default for Renderer<Engine> {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer<Engine> {
    /// Renderer backed by a strict MiniJinja engine
    pub fn new() -> Self {
        Self::with_engine(Engine::default())
    }
}

impl<E: TemplateEngine> Renderer<E> {
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            namespace: "default".to_string(),
        }
    }

    /// Namespace exposed to templates as `release.namespace`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Render with the chart name as release name
    pub fn render(&self, chart: &Chart, values: &Values) -> Result<Rendered> {
        self.render_release(chart, values, chart.name())
    }

    /// Render the chart for a named release
    pub fn render_release(&self, chart: &Chart, values: &Values, release: &str) -> Result<Rendered> {
        let context =
            TemplateContext::new(values, ReleaseInfo::new(release, &self.namespace), &chart.metadata);

        let mut manifests = ManifestSet::new();
        let mut notes = None;

        for (template_id, output) in self.engine.expand_chart(chart, &context)? {
            let is_notes = chart
                .template(&template_id)
                .is_some_and(|t| t.is_notes());

            if is_notes {
                let text = output.trim();
                if !text.is_empty() {
                    notes = Some(text.to_string());
                }
                continue;
            }

            let documents = manifest::parse_documents(&output)
                .map_err(|e| EngineError::render(&template_id, core_to_template(e, &template_id, &output)))?;

            for doc in documents {
                manifests
                    .insert(doc)
                    .map_err(|e| EngineError::render(&template_id, core_to_template(e, &template_id, &output)))?;
            }
        }

        Ok(Rendered { manifests, notes })
    }
}

fn core_to_template(err: CoreError, template_id: &str, output: &str) -> TemplateError {
    match err {
        CoreError::YamlParse(e) => TemplateError::yaml(&e, template_id, output),
        CoreError::InvalidManifest { message } => {
            TemplateError::manifest(TemplateErrorKind::InvalidManifest, message, template_id, output)
        }
        CoreError::DuplicateResource { key } => TemplateError::manifest(
            TemplateErrorKind::DuplicateResource,
            format!("resource {} is rendered more than once", key),
            template_id,
            output,
        ),
        other => TemplateError::simple(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{ChartMetadata, ResourceKey, TemplateSource};
    use semver::Version;

    const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ release.name }}
spec:
  replicas: {{ values.replicaCount }}
  template:
    spec:
      containers:
        - name: app
          image: "{{ values.image.repository }}:{{ values.image.tag }}"
"#;

    const SERVICE: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: {{ release.name }}
spec:
  ports:
    - port: {{ values.service.port }}
"#;

    fn chart(templates: Vec<TemplateSource>) -> Chart {
        Chart::new(
            ChartMetadata {
                name: "web".to_string(),
                version: Version::new(0, 1, 0),
                description: None,
                app_version: None,
            },
            templates,
            Values::from_yaml(
                "replicaCount: 1\nimage:\n  repository: nginx\n  tag: \"1.25\"\nservice:\n  port: 80\n",
            )
            .unwrap(),
        )
    }

    fn demo_chart() -> Chart {
        chart(vec![
            TemplateSource::new("deployment.yaml", DEPLOYMENT),
            TemplateSource::new("service.yaml", SERVICE),
            TemplateSource::new("NOTES.txt", "Installed {{ release.name }}\n"),
        ])
    }

    #[test]
    fn test_render_demo_chart() {
        let chart = demo_chart();
        let rendered = Renderer::new()
            .render_release(&chart, &chart.defaults, "demo")
            .unwrap();

        assert_eq!(rendered.manifests.len(), 2);
        assert_eq!(rendered.notes.as_deref(), Some("Installed demo"));

        let keys: Vec<String> = rendered.manifests.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["Deployment/demo", "Service/demo"]);

        let deployment = rendered
            .manifests
            .get(&ResourceKey::new("Deployment", "demo"))
            .unwrap();
        assert_eq!(deployment.body["spec"]["replicas"], 1);
        insta::assert_snapshot!(
            deployment.body["spec"]["template"]["spec"]["containers"][0]["image"].as_str().unwrap(),
            @"nginx:1.25"
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let chart = demo_chart();
        let renderer = Renderer::new();

        let a = renderer.render(&chart, &chart.defaults).unwrap();
        let b = renderer.render(&chart, &chart.defaults).unwrap();

        assert_eq!(a.manifests.to_yaml().unwrap(), b.manifests.to_yaml().unwrap());
        assert_eq!(a.manifests.digest().unwrap(), b.manifests.digest().unwrap());
    }

    #[test]
    fn test_render_stream_keeps_document_order() {
        let chart = chart(vec![TemplateSource::new(
            "config.yaml",
            "kind: ConfigMap\nmetadata:\n  name: b\n---\nkind: ConfigMap\nmetadata:\n  name: a\n",
        )]);

        let rendered = Renderer::new().render(&chart, &chart.defaults).unwrap();
        let names: Vec<&str> = rendered.manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_empty_output_renders_nothing() {
        let chart = chart(vec![TemplateSource::new(
            "optional.yaml",
            "{% if values.ingress is defined %}kind: Ingress\nmetadata:\n  name: x\n{% endif %}",
        )]);

        let rendered = Renderer::new().render(&chart, &chart.defaults).unwrap();
        assert!(rendered.manifests.is_empty());
        assert!(rendered.notes.is_none());
    }

    #[test]
    fn test_render_error_names_template() {
        let chart = chart(vec![
            TemplateSource::new("service.yaml", SERVICE),
            TemplateSource::new("broken.yaml", "{% if values.replicaCount %}\nkind: Job\n"),
        ]);

        let err = Renderer::new().render(&chart, &chart.defaults).unwrap_err();
        assert_eq!(err.template_id(), "broken.yaml");
        assert_eq!(err.cause().kind(), TemplateErrorKind::SyntaxError);
    }

    #[test]
    fn test_missing_value_is_render_error() {
        let chart = chart(vec![TemplateSource::new(
            "job.yaml",
            "kind: Job\nmetadata:\n  name: {{ values.job.name }}\n",
        )]);

        let err = Renderer::new().render(&chart, &chart.defaults).unwrap_err();
        assert_eq!(err.cause().kind(), TemplateErrorKind::UndefinedVariable);
    }

    #[test]
    fn test_duplicate_resource_is_render_error() {
        let chart = chart(vec![
            TemplateSource::new("a.yaml", "kind: ConfigMap\nmetadata:\n  name: cfg\n"),
            TemplateSource::new("b.yaml", "kind: ConfigMap\nmetadata:\n  name: cfg\n"),
        ]);

        let err = Renderer::new().render(&chart, &chart.defaults).unwrap_err();
        assert_eq!(err.template_id(), "b.yaml");
        assert_eq!(err.cause().kind(), TemplateErrorKind::DuplicateResource);
    }

    #[test]
    fn test_invalid_yaml_and_missing_name() {
        let chart_bad_yaml = chart(vec![TemplateSource::new("bad.yaml", "kind: [ConfigMap\n")]);
        let err = Renderer::new()
            .render(&chart_bad_yaml, &chart_bad_yaml.defaults)
            .unwrap_err();
        assert_eq!(err.cause().kind(), TemplateErrorKind::YamlParseError);

        let chart_no_name = chart(vec![TemplateSource::new("cm.yaml", "kind: ConfigMap\n")]);
        let err = Renderer::new()
            .render(&chart_no_name, &chart_no_name.defaults)
            .unwrap_err();
        assert_eq!(err.cause().kind(), TemplateErrorKind::InvalidManifest);
    }

    #[test]
    fn test_values_change_output() {
        let chart = demo_chart();
        let mut values = chart.defaults.clone();
        values.set("replicaCount", serde_json::json!(3));

        let rendered = Renderer::new().render_release(&chart, &values, "demo").unwrap();
        let deployment = rendered
            .manifests
            .get(&ResourceKey::new("Deployment", "demo"))
            .unwrap();
        assert_eq!(deployment.body["spec"]["replicas"], 3);
    }
}
