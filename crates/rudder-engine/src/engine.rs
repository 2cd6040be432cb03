//! Template engine based on MiniJinja

use minijinja::Environment;
use rudder_core::{Chart, TemplateContext, TemplateSource};

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;

/// Expands chart templates against a template context
///
/// `expand_chart` returns `(template id, output)` for every renderable
/// template, in chart order. Engines that can share helpers between
/// templates override it.
pub trait TemplateEngine: Send + Sync {
    fn expand(
        &self,
        template: &TemplateSource,
        context: &TemplateContext,
    ) -> std::result::Result<String, TemplateError>;

    fn expand_chart(
        &self,
        chart: &Chart,
        context: &TemplateContext,
    ) -> Result<Vec<(String, String)>> {
        chart
            .renderable()
            .map(|template| {
                self.expand(template, context)
                    .map(|output| (template.id.clone(), output))
                    .map_err(|cause| EngineError::render(&template.id, cause))
            })
            .collect()
    }
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The MiniJinja template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a configured MiniJinja environment
    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }
        env.set_keep_trailing_newline(true);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("tojson_pretty", filters::tojson_pretty);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("haskey", filters::haskey);
        env.add_filter("merge", filters::merge);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);

        env
    }

    fn render_context(context: &TemplateContext) -> minijinja::Value {
        minijinja::context! {
            values => &context.values,
            release => &context.release,
            chart => &context.chart,
        }
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> std::result::Result<String, TemplateError> {
        self.expand(&TemplateSource::new(template_name, template), context)
    }
}

impl TemplateEngine for Engine {
    fn expand(
        &self,
        template: &TemplateSource,
        context: &TemplateContext,
    ) -> std::result::Result<String, TemplateError> {
        let to_error = |e| {
            TemplateError::from_minijinja(e, &template.id, &template.source, Some(&context.values))
        };

        let mut env = self.create_environment();
        env.add_template_owned(template.id.clone(), template.source.clone())
            .map_err(to_error)?;
        let tmpl = env.get_template(&template.id).map_err(to_error)?;
        tmpl.render(Self::render_context(context)).map_err(to_error)
    }

    /// Load every template (helpers included) into one environment, then
    /// render the non-helper ones in chart order
    fn expand_chart(
        &self,
        chart: &Chart,
        context: &TemplateContext,
    ) -> Result<Vec<(String, String)>> {
        let mut env = self.create_environment();
        let to_error = |template: &TemplateSource, e| {
            EngineError::render(
                &template.id,
                TemplateError::from_minijinja(
                    e,
                    &template.id,
                    &template.source,
                    Some(&context.values),
                ),
            )
        };

        for template in &chart.templates {
            env.add_template_owned(template.id.clone(), template.source.clone())
                .map_err(|e| to_error(template, e))?;
        }

        let ctx = Self::render_context(context);
        let mut outputs = Vec::new();

        for template in chart.renderable() {
            let tmpl = env
                .get_template(&template.id)
                .map_err(|e| to_error(template, e))?;
            let rendered = tmpl.render(&ctx).map_err(|e| to_error(template, e))?;
            outputs.push((template.id.clone(), rendered));
        }

        Ok(outputs)
    }
}
