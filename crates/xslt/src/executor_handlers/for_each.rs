use crate::ast::{PreparsedTemplate, SortKey};
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use folio_xpath1::Expression;
use folio_xpath1::datasource::DataSourceNode;

pub(crate) fn handle_for_each<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    sort_keys: &[SortKey],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut nodes = executor
        .evaluate(select, focus)?
        .into_nodes("xsl:for-each select")?;
    executor.sort_node_set(&mut nodes, sort_keys)?;

    // No template rule is current inside xsl:for-each.
    executor.current_rules.push(None);
    let size = nodes.len();
    let mut result = Ok(());
    for (i, node) in nodes.into_iter().enumerate() {
        let inner = Focus {
            node,
            position: i + 1,
            size,
        };
        result = executor.execute_template(body, inner, builder);
        if result.is_err() {
            break;
        }
    }
    executor.current_rules.pop();
    result
}
