use crate::ast::{PreparsedTemplate, When};
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use folio_xpath1::Expression;
use folio_xpath1::datasource::DataSourceNode;

pub(crate) fn handle_if<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    test: &Expression,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    if executor.evaluate(test, focus)?.to_bool() {
        executor.execute_template(body, focus, builder)?;
    }
    Ok(())
}

pub(crate) fn handle_choose<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    whens: &[When],
    otherwise: Option<&PreparsedTemplate>,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    for when in whens {
        if executor.evaluate(&when.test, focus)?.to_bool() {
            return executor.execute_template(&when.body, focus, builder);
        }
    }
    if let Some(body) = otherwise {
        executor.execute_template(body, focus, builder)?;
    }
    Ok(())
}
