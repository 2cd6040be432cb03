//! Engine error types with source-annotated diagnostics

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error("failed to render template '{template_id}'")]
    #[diagnostic(code(rudder::render))]
    Render {
        template_id: String,
        #[source]
        #[diagnostic_source]
        cause: TemplateError,
    },
}

impl EngineError {
    pub fn render(template_id: impl Into<String>, cause: TemplateError) -> Self {
        Self::Render {
            template_id: template_id.into(),
            cause,
        }
    }

    /// Id of the template that failed
    pub fn template_id(&self) -> &str {
        match self {
            Self::Render { template_id, .. } => template_id,
        }
    }

    pub fn cause(&self) -> &TemplateError {
        match self {
            Self::Render { cause, .. } => cause,
        }
    }
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    RequiredValue,
    InvalidOperation,
    YamlParseError,
    InvalidManifest,
    DuplicateResource,
    Other,
}

impl TemplateErrorKind {
    /// Convert to a code string for diagnostics
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::UndefinedVariable => "undefined_variable",
            Self::UnknownFilter => "unknown_filter",
            Self::UnknownFunction => "unknown_function",
            Self::SyntaxError => "syntax",
            Self::TypeError => "type",
            Self::RequiredValue => "required",
            Self::InvalidOperation => "invalid_operation",
            Self::YamlParseError => "yaml_parse",
            Self::InvalidManifest => "invalid_manifest",
            Self::DuplicateResource => "duplicate_resource",
            Self::Other => "render",
        }
    }
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(rudder::template))]
pub struct TemplateError {
    /// Error message
    pub message: String,

    /// Error kind for categorization
    pub kind: TemplateErrorKind,

    /// Template source code (or rendered output for YAML errors)
    #[source_code]
    pub src: NamedSource<String>,

    /// Error location in source
    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    /// Suggestion for fixing the error
    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Create a template error from a MiniJinja error
    pub fn from_minijinja(
        err: minijinja::Error,
        template_name: &str,
        template_source: &str,
        values: Option<&serde_json::Value>,
    ) -> Self {
        let (kind, message) = categorize_minijinja_error(&err);
        let span = err
            .line()
            .and_then(|line_num| calculate_span(template_source, line_num));
        let suggestion = generate_suggestion(&err, kind, values);

        Self {
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion,
        }
    }

    /// Rendered output that is not valid YAML
    pub fn yaml(err: &serde_yaml::Error, template_name: &str, rendered: &str) -> Self {
        let span = err
            .location()
            .and_then(|loc| calculate_span(rendered, loc.line()));
        Self {
            message: format!("rendered output is not valid YAML: {}", err),
            kind: TemplateErrorKind::YamlParseError,
            src: NamedSource::new(template_name, rendered.to_string()),
            span,
            suggestion: Some(
                "Check indentation around `toyaml`/`nindent` and quote values containing `:`"
                    .to_string(),
            ),
        }
    }

    /// Rendered output that is YAML but not a usable resource
    pub fn manifest(
        kind: TemplateErrorKind,
        message: impl Into<String>,
        template_name: &str,
        rendered: &str,
    ) -> Self {
        Self {
            message: message.into(),
            kind,
            src: NamedSource::new(template_name, rendered.to_string()),
            span: None,
            suggestion: None,
        }
    }

    /// Create a simple error without source mapping
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::Other,
            src: NamedSource::new("<unknown>", String::new()),
            span: None,
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

/// Categorize a MiniJinja error into our error kinds
fn categorize_minijinja_error(err: &minijinja::Error) -> (TemplateErrorKind, String) {
    let msg = err.detail().map(str::to_string).unwrap_or_else(|| err.to_string());
    let msg_lower = msg.to_lowercase();

    let kind = match err.kind() {
        minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        minijinja::ErrorKind::InvalidOperation if msg_lower.contains("required") => {
            TemplateErrorKind::RequiredValue
        }
        minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
            TemplateErrorKind::TypeError
        }
        _ => {
            if msg_lower.contains("undefined") {
                TemplateErrorKind::UndefinedVariable
            } else if msg_lower.contains("syntax") || msg_lower.contains("expected") {
                TemplateErrorKind::SyntaxError
            } else {
                TemplateErrorKind::Other
            }
        }
    };

    let message = match kind {
        TemplateErrorKind::UndefinedVariable => {
            match extract_expression_from_display(&format!("{:#}", err)) {
                Some(expr) => format!("undefined variable `{}`", expr),
                None => "undefined variable".to_string(),
            }
        }
        TemplateErrorKind::UnknownFilter | TemplateErrorKind::UnknownFunction => {
            err.to_string()
        }
        _ => msg,
    };

    (kind, message)
}

/// Extract the failing `{{ expr }}` from MiniJinja's detailed display
///
/// The error line is marked with `>`:
/// `   8 >   typo: {{ value.app.name }}`
fn extract_expression_from_display(display: &str) -> Option<String> {
    display
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.contains(" > ") || trimmed.starts_with("> ")
        })
        .find_map(|line| {
            let start = line.find("{{")?;
            let end = line[start..].find("}}")?;
            let expr = line[start + 2..start + end].trim();
            let expr = expr.split('|').next().unwrap_or(expr).trim();
            (!expr.is_empty()).then(|| expr.to_string())
        })
}

/// Calculate the source span for a given line number
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (index, line) in source.lines().enumerate() {
        if index + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

/// Generate suggestions based on error kind
fn generate_suggestion(
    err: &minijinja::Error,
    kind: TemplateErrorKind,
    values: Option<&serde_json::Value>,
) -> Option<String> {
    match kind {
        TemplateErrorKind::UndefinedVariable => {
            let expr = extract_expression_from_display(&format!("{:#}", err))?;

            if expr == "value" || expr.starts_with("value.") {
                return Some(format!(
                    "Did you mean `{}`? Use `values` (plural) to access the values object.",
                    expr.replacen("value", "values", 1)
                ));
            }

            let path = expr.strip_prefix("values.")?;
            let mut current = values?;
            let mut prefix = String::from("values");
            for part in path.split('.') {
                match current.get(part) {
                    Some(next) => {
                        current = next;
                        prefix.push('.');
                        prefix.push_str(part);
                    }
                    None => {
                        let available: Vec<&str> = current
                            .as_object()?
                            .keys()
                            .map(String::as_str)
                            .collect();
                        return Some(format!(
                            "Key `{}` not found in `{}`. Available keys: {}. Use `| default(...)` for optional values.",
                            part,
                            prefix,
                            available.join(", ")
                        ));
                    }
                }
            }
            None
        }
        TemplateErrorKind::UnknownFilter => Some(format!(
            "Available filters: {}",
            crate::filters::AVAILABLE_FILTERS.join(", ")
        )),
        TemplateErrorKind::SyntaxError => Some(
            "Check bracket matching: `{{ }}` for expressions, `{% %}` for statements, and that every `{% if %}`/`{% for %}` has its `{% end... %}`".to_string(),
        ),
        TemplateErrorKind::RequiredValue => {
            Some("Provide the value with `--set` or a values file.".to_string())
        }
        _ => None,
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
