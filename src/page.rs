//! A page rendered by transforming its XML with an XSLT page template.

use crate::config::{Config, Implementation};
use crate::error::{FolioError, read_file};
use crate::processor::{Parameters, Processor, UnavailableProcessor, XsltProcess};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Constructed,
    /// Inputs were set since construction or the last generation.
    Configured,
    Generated,
}

pub struct XsltPage {
    processor: Box<dyn Processor>,
    xml: String,
    xsl: String,
    xsl_file: Option<PathBuf>,
    parameters: Parameters,
    functions: Vec<String>,
    state: PageState,
    status: u16,
    headers: Vec<(String, String)>,
}

impl XsltPage {
    pub fn new(processor: Box<dyn Processor>) -> Self {
        XsltPage {
            processor,
            xml: String::new(),
            xsl: String::new(),
            xsl_file: None,
            parameters: Parameters::new(),
            functions: Vec::new(),
            state: PageState::Constructed,
            status: 200,
            headers: Vec::new(),
        }
    }

    /// A page with the processor implementation `config` selects.
    pub fn from_config(config: &Config) -> Self {
        let processor: Box<dyn Processor> = match config.processor.implementation {
            Implementation::Native => Box::new(XsltProcess::from_config(config)),
            Implementation::Unavailable => Box::new(UnavailableProcessor::new()),
        };
        log::debug!("Page uses the {:?} processor", config.processor.implementation);
        Self::new(processor)
    }

    pub fn set_xml(&mut self, xml: impl Into<String>) {
        self.xml = xml.into();
        self.state = PageState::Configured;
    }

    pub fn set_xsl(&mut self, xsl: impl Into<String>) {
        self.xsl = xsl.into();
        self.xsl_file = None;
        self.state = PageState::Configured;
    }

    /// Loads the page template from `path`, which also names it in
    /// records and anchors its imports.
    pub fn set_xsl_file(&mut self, path: impl AsRef<Path>) -> Result<(), FolioError> {
        let path = path.as_ref();
        self.xsl = read_file(path)?;
        self.xsl_file = Some(path.to_path_buf());
        self.state = PageState::Configured;
        Ok(())
    }

    pub fn set_runtime_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(name, value);
        self.state = PageState::Configured;
    }

    pub fn set_runtime_params<I, K, V>(&mut self, parameters: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in parameters {
            self.parameters.insert(name, value);
        }
        self.state = PageState::Configured;
    }

    /// Allows the stylesheet to call these host functions.
    pub fn register_functions<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.functions.contains(&name) {
                self.functions.push(name);
            }
        }
        self.state = PageState::Configured;
    }

    /// Runs the transformation. On any record, or without output, the
    /// status becomes 500 and `None` is returned; the records stay on the
    /// processor for the error handlers.
    pub fn generate(&mut self) -> Option<String> {
        let output = self.processor.process_source(
            &self.xml,
            &self.xsl,
            self.xsl_file.as_deref(),
            &self.parameters,
            &self.functions,
        );
        self.state = PageState::Generated;
        self.headers.clear();

        match output {
            Some(markup) if !self.processor.is_errors() => {
                self.status = 200;
                let media_type = self.processor.media_type().unwrap_or("text/html");
                self.headers.push((
                    "Content-Type".to_string(),
                    format!("{}; charset=utf-8", media_type),
                ));
                Some(markup)
            }
            _ => {
                log::warn!(
                    "Page generation failed with {} records",
                    self.processor.errors().len()
                );
                self.status = 500;
                None
            }
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn xsl(&self) -> &str {
        &self.xsl
    }

    pub fn xsl_file(&self) -> Option<&Path> {
        self.xsl_file.as_deref()
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    pub fn processor_mut(&mut self) -> &mut dyn Processor {
        self.processor.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAM_XSL: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="html"/>
  <xsl:param name="title" select="'untitled'"/>
  <xsl:template match="/"><h1><xsl:value-of select="$title"/></h1></xsl:template>
</xsl:stylesheet>"#;

    #[test]
    fn state_follows_configuration_and_generation() {
        let mut page = XsltPage::new(Box::new(XsltProcess::new()));
        assert_eq!(page.state(), PageState::Constructed);
        page.set_xml("<page/>");
        page.set_xsl(PARAM_XSL);
        page.set_runtime_param("title", "Home");
        assert_eq!(page.state(), PageState::Configured);

        let markup = page.generate();
        assert_eq!(page.state(), PageState::Generated);
        assert_eq!(markup.as_deref(), Some("<h1>Home</h1>"));
        assert_eq!(page.status(), 200);
        assert_eq!(page.header("content-type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn unavailable_processor_yields_500() {
        let mut page = XsltPage::new(Box::new(UnavailableProcessor::new()));
        page.set_xml("<page/>");
        page.set_xsl(PARAM_XSL);
        assert!(page.generate().is_none());
        assert_eq!(page.status(), 500);
        assert!(page.headers().is_empty());
    }

    #[test]
    fn functions_are_registered_once() {
        let mut page = XsltPage::new(Box::new(XsltProcess::new()));
        page.register_functions(["upper", "upper", "trim"]);
        assert_eq!(page.functions, vec!["upper".to_string(), "trim".to_string()]);
    }
}
