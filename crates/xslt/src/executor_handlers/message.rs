use crate::ast::PreparsedTemplate;
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::TextCollector;
use folio_xpath1::datasource::DataSourceNode;

/// `xsl:message` goes to the diagnostics as a warning, or ends the
/// transformation when `terminate="yes"`.
pub(crate) fn handle_message<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    terminate: bool,
    body: &PreparsedTemplate,
    focus: Focus<N>,
) -> Result<(), ExecutionError> {
    let mut collector = TextCollector::new();
    executor.execute_template(body, focus, &mut collector)?;
    let text = collector.text.trim().to_string();
    if terminate {
        return Err(ExecutionError::Terminated(text));
    }
    log::info!("xsl:message: {}", text);
    executor.record_message(&text);
    Ok(())
}
