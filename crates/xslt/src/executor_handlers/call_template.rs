use crate::ast::WithParam;
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use folio_xpath1::datasource::DataSourceNode;

/// Parameters the template does not declare are evaluated and ignored.
pub(crate) fn handle_call_template<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &str,
    params: &[WithParam],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let stylesheet = executor.stylesheet;
    let Some(template) = stylesheet.named_templates.get(name) else {
        return Err(ExecutionError::UnknownNamedTemplate(name.to_string()));
    };
    let passed = executor.evaluate_params(params, focus)?;
    for passed_name in passed.keys() {
        if !template.params.iter().any(|p| &p.name == passed_name) {
            log::debug!(
                "Template '{}' does not declare parameter '{}'",
                name,
                passed_name
            );
        }
    }

    // The current template rule stays current across call-template.
    executor.invoke(|this| {
        this.bind_params(&template.params, &passed, focus)?;
        this.execute_template(&template.body, focus, builder)
    })
}
