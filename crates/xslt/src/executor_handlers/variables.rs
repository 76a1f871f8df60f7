use crate::ast::VariableValue;
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use folio_xpath1::datasource::DataSourceNode;

/// Binds a local `xsl:variable`; it is visible to its following siblings
/// and their descendants.
pub(crate) fn handle_variable<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &str,
    value: &VariableValue,
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    let value = executor.evaluate_variable_value(value, focus)?;
    executor.set_variable_in_current_scope(name.to_string(), value);
    Ok(())
}
