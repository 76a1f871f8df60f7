use crate::ast::{SortKey, WithParam};
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use folio_xpath1::Expression;
use folio_xpath1::datasource::DataSourceNode;

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_apply_templates<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: Option<&Expression>,
    mode: Option<&str>,
    sort_keys: &[SortKey],
    params: &[WithParam],
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut nodes_to_process = match select {
        Some(sel) => executor
            .evaluate(sel, focus)?
            .into_nodes("xsl:apply-templates select")?,
        None => focus.node.children().collect(),
    };
    let passed = executor.evaluate_params(params, focus)?;

    executor.sort_node_set(&mut nodes_to_process, sort_keys)?;
    executor.apply_templates_to_nodes(&nodes_to_process, mode, &passed, builder)
}

/// Runs the best rule of lower import precedence than the current one, in
/// the current rule's mode, falling back to the built-in rules.
pub(crate) fn handle_apply_imports<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let Some(Some(current)) = executor.current_rules.last().cloned() else {
        return Err(ExecutionError::TypeError(
            "xsl:apply-imports used without a current template rule".to_string(),
        ));
    };
    let mode = current.mode.as_deref();
    match executor.find_template_rule(focus.node, mode, Some(current.precedence))? {
        Some(rule) => executor.execute_rule(rule, focus, &Default::default(), builder),
        None => executor.apply_builtin_rule(focus, mode, builder),
    }
}
