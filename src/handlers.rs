//! Turning failures into error pages.
//!
//! Each [`PageException`] is described as a small XML document, and that
//! document is transformed with a built-in XSLT error template. When the
//! template itself fails, the page falls back to plain text.

use crate::config::Config;
use crate::page::XsltPage;
use crate::processor::{ErrorType, Parameters, Processor, TransformError, XsltProcess};
use folio_xslt::util::source_line;
use quick_xml::escape::escape;
use std::fmt::Write;
use thiserror::Error;

/// Built-in error page template.
pub const ERROR_TEMPLATE: &str = r##"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="html" media-type="text/html"/>

  <xsl:template match="/exception">
    <html>
      <head><title><xsl:value-of select="heading"/></title></head>
      <body class="{@kind}">
        <h1><xsl:value-of select="heading"/></h1>
        <p class="message"><xsl:value-of select="message"/></p>
        <xsl:apply-templates select="location | path | query | groups/group"/>
        <xsl:apply-templates select="debug"/>
      </body>
    </html>
  </xsl:template>

  <xsl:template match="location">
    <p class="location">
      <xsl:value-of select="@file"/>
      <xsl:if test="@line"> line <xsl:value-of select="@line"/></xsl:if>
    </p>
  </xsl:template>

  <xsl:template match="path">
    <p class="path"><code><xsl:value-of select="."/></code></p>
  </xsl:template>

  <xsl:template match="query">
    <pre class="query"><xsl:value-of select="."/></pre>
    <xsl:if test="@code"><p class="code">Code <xsl:value-of select="@code"/></p></xsl:if>
  </xsl:template>

  <xsl:template match="group">
    <section class="group {@type}">
      <h2>
        <xsl:value-of select="@type"/>
        <xsl:if test="@file"><xsl:text>: </xsl:text><xsl:value-of select="@file"/></xsl:if>
      </h2>
      <ul class="errors"><xsl:apply-templates select="line/error"/></ul>
      <xsl:if test="line/context">
        <ol class="source"><xsl:apply-templates select="line[context]" mode="source"/></ol>
      </xsl:if>
    </section>
  </xsl:template>

  <xsl:template match="error">
    <li>
      <xsl:if test="../@anchor">
        <a href="#{../@anchor}">line <xsl:value-of select="../@number"/></a>
        <xsl:text>: </xsl:text>
      </xsl:if>
      <xsl:value-of select="."/>
    </li>
  </xsl:template>

  <xsl:template match="line" mode="source">
    <li id="{@anchor}" value="{@number}"><code><xsl:value-of select="context"/></code></li>
  </xsl:template>

  <xsl:template match="debug">
    <pre class="debug"><xsl:value-of select="."/></pre>
  </xsl:template>
</xsl:stylesheet>"##;

/// The failures a page can end in.
#[derive(Error, Debug, Clone)]
pub enum PageException {
    #[error("{message}")]
    Generic {
        message: String,
        file: Option<String>,
        line: Option<u32>,
    },

    /// A user-facing error page. `template` replaces the built-in error
    /// template.
    #[error("{heading}: {message}")]
    ErrorPage {
        heading: String,
        message: String,
        status: u16,
        template: Option<String>,
    },

    #[error("Page not found: {path}")]
    PageNotFound { path: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        query: Option<String>,
        code: Option<i64>,
    },

    #[error("The page template failed with {} errors", .errors.len())]
    Transform {
        errors: Vec<TransformError>,
        xml: String,
        xsl: String,
        /// Where `xsl` was loaded from, as records name it.
        xsl_file: Option<String>,
    },
}

impl PageException {
    /// The records a failed page left on its processor.
    pub fn from_page(page: &XsltPage) -> Self {
        PageException::Transform {
            errors: page.processor().records().to_vec(),
            xml: page.xml().to_string(),
            xsl: page.xsl().to_string(),
            xsl_file: page.xsl_file().map(|path| path.display().to_string()),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            PageException::ErrorPage { status, .. } => *status,
            PageException::PageNotFound { .. } => 404,
            PageException::Generic { .. }
            | PageException::Database { .. }
            | PageException::Transform { .. } => 500,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PageException::Generic { .. } => "generic",
            PageException::ErrorPage { .. } => "error-page",
            PageException::PageNotFound { .. } => "not-found",
            PageException::Database { .. } => "database",
            PageException::Transform { .. } => "transform",
        }
    }

    fn heading(&self) -> &str {
        match self {
            PageException::Generic { .. } => "Error",
            PageException::ErrorPage { heading, .. } => heading,
            PageException::PageNotFound { .. } => "Page not found",
            PageException::Database { .. } => "Database error",
            PageException::Transform { .. } => "XSLT processing error",
        }
    }
}

/// Records sharing a type and file, in the order first seen.
#[derive(Debug)]
pub struct ErrorGroup<'a> {
    pub error_type: ErrorType,
    pub file: Option<&'a str>,
    pub lines: Vec<LineGroup<'a>>,
}

#[derive(Debug)]
pub struct LineGroup<'a> {
    pub line: Option<u32>,
    pub context: Option<&'a str>,
    pub errors: Vec<&'a TransformError>,
}

/// Groups records by `(type, file)`, then by line.
pub fn group_errors(errors: &[TransformError]) -> Vec<ErrorGroup<'_>> {
    let mut groups: Vec<ErrorGroup<'_>> = Vec::new();
    for error in errors {
        let file = error.file.as_deref();
        let index = match groups
            .iter()
            .position(|g| g.error_type == error.error_type && g.file == file)
        {
            Some(index) => index,
            None => {
                groups.push(ErrorGroup {
                    error_type: error.error_type,
                    file,
                    lines: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let lines = &mut groups[index].lines;
        match lines.iter_mut().find(|l| l.line == error.line) {
            Some(line) => {
                line.context = line.context.or(error.context.as_deref());
                line.errors.push(error);
            }
            None => lines.push(LineGroup {
                line: error.line,
                context: error.context.as_deref(),
                errors: vec![error],
            }),
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// Renders any [`PageException`] into a page.
#[derive(Debug, Clone, Default)]
pub struct ExceptionHandler {
    debug: bool,
}

impl ExceptionHandler {
    pub fn new(debug: bool) -> Self {
        ExceptionHandler { debug }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.handlers.debug)
    }

    pub fn handle(&self, exception: &PageException) -> RenderedPage {
        let status = exception.status();
        let template = match exception {
            PageException::ErrorPage {
                template: Some(template),
                ..
            } => template.as_str(),
            _ => ERROR_TEMPLATE,
        };
        let description = self.describe(exception);

        let mut processor = XsltProcess::new();
        match processor.process(&description, template, &Parameters::new(), &[]) {
            Some(body) if !processor.is_errors() => RenderedPage {
                status,
                content_type: format!(
                    "{}; charset=utf-8",
                    processor.media_type().unwrap_or("text/html")
                ),
                body,
            },
            _ => {
                for record in processor.records() {
                    log::error!("Error template failed: {}", record);
                }
                RenderedPage {
                    status,
                    content_type: "text/plain; charset=utf-8".to_string(),
                    body: plain_text(exception),
                }
            }
        }
    }

    /// The XML document the error template is applied to.
    pub fn describe(&self, exception: &PageException) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            r#"<exception kind="{}" status="{}">"#,
            exception.kind(),
            exception.status()
        );
        text_element(&mut out, "heading", exception.heading());
        match exception {
            PageException::Generic {
                message,
                file,
                line,
            } => {
                text_element(&mut out, "message", message);
                if file.is_some() || line.is_some() {
                    out.push_str("<location");
                    if let Some(file) = file {
                        let _ = write!(out, r#" file="{}""#, escape(file.as_str()));
                    }
                    if let Some(line) = line {
                        let _ = write!(out, r#" line="{}""#, line);
                    }
                    out.push_str("/>\n");
                }
            }
            PageException::ErrorPage { message, .. } => text_element(&mut out, "message", message),
            PageException::PageNotFound { path } => {
                text_element(&mut out, "message", "The requested page does not exist.");
                text_element(&mut out, "path", path);
            }
            PageException::Database {
                message,
                query,
                code,
            } => {
                text_element(&mut out, "message", message);
                if let Some(query) = query {
                    match code {
                        Some(code) => {
                            let _ = write!(out, r#"<query code="{}">"#, code);
                        }
                        None => out.push_str("<query>"),
                    }
                    let _ = writeln!(out, "{}</query>", escape(query.as_str()));
                }
            }
            PageException::Transform {
                errors,
                xml,
                xsl,
                xsl_file,
            } => {
                text_element(
                    &mut out,
                    "message",
                    &format!(
                        "The page template could not be applied: {} errors were reported.",
                        errors.len()
                    ),
                );
                describe_groups(&mut out, errors, xml, xsl, xsl_file.as_deref());
                if self.debug {
                    match serde_json::to_string_pretty(errors) {
                        Ok(json) => text_element(&mut out, "debug", &json),
                        Err(e) => log::warn!("Cannot dump records: {}", e),
                    }
                }
            }
        }
        out.push_str("</exception>\n");
        out
    }
}

fn text_element(out: &mut String, name: &str, text: &str) {
    let _ = writeln!(out, "<{0}>{1}</{0}>", name, escape(text));
}

/// Anchor of a source line. Lines of the page template itself get
/// `line-N`; other sources are prefixed to stay unique.
fn anchor(group: &ErrorGroup, index: usize, line: u32, page_template: bool) -> String {
    if page_template {
        format!("line-{}", line)
    } else {
        format!("{}-{}-line-{}", group.error_type, index + 1, line)
    }
}

fn describe_groups(
    out: &mut String,
    errors: &[TransformError],
    xml: &str,
    xsl: &str,
    xsl_file: Option<&str>,
) {
    out.push_str("<groups>\n");
    for (index, group) in group_errors(errors).iter().enumerate() {
        // Imported modules name their own file.
        let page_template =
            group.error_type == ErrorType::Xsl && (group.file.is_none() || group.file == xsl_file);
        let _ = write!(out, r#"<group type="{}""#, group.error_type);
        if let Some(file) = group.file {
            let _ = write!(out, r#" file="{}""#, escape(file));
        }
        out.push_str(">\n");
        for line in &group.lines {
            match line.line {
                Some(number) => {
                    let _ = write!(
                        out,
                        r#"<line number="{}" anchor="{}">"#,
                        number,
                        anchor(group, index, number, page_template)
                    );
                }
                None => out.push_str("<line>"),
            }
            // Inline sources can be quoted even when the record carries
            // no excerpt.
            let source = match (group.error_type, group.file) {
                (ErrorType::Xml, None) => Some(xml),
                _ if page_template => Some(xsl),
                _ => None,
            };
            let context = line.context.map(str::to_string).or_else(|| {
                source
                    .zip(line.line)
                    .and_then(|(source, number)| source_line(source, number as usize))
            });
            if let Some(context) = context {
                text_element(out, "context", &context);
            }
            for error in &line.errors {
                let _ = writeln!(
                    out,
                    r#"<error number="{}">{}</error>"#,
                    error.number,
                    escape(error.message.as_str())
                );
            }
            out.push_str("</line>\n");
        }
        out.push_str("</group>\n");
    }
    out.push_str("</groups>\n");
}

fn plain_text(exception: &PageException) -> String {
    let mut out = format!("{}\n\n{}\n", exception.heading(), exception);
    if let PageException::Transform { errors, .. } = exception {
        for error in errors {
            let _ = writeln!(out, "{}", error);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(error_type: ErrorType, file: Option<&str>, line: Option<u32>, message: &str) -> TransformError {
        let mut record = TransformError::new(error_type, 1, message).in_file(file.map(str::to_string));
        record.line = line;
        record
    }

    #[test]
    fn groups_by_type_and_file_then_line() {
        let errors = vec![
            record(ErrorType::Xsl, None, Some(3), "a"),
            record(ErrorType::Xml, None, Some(1), "b"),
            record(ErrorType::Xsl, None, Some(3), "c"),
            record(ErrorType::Xsl, Some("inc.xsl"), Some(3), "d"),
            record(ErrorType::Xsl, None, Some(7), "e"),
        ];
        let groups = group_errors(&errors);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].error_type, ErrorType::Xsl);
        assert_eq!(groups[0].lines.len(), 2);
        assert_eq!(groups[0].lines[0].errors.len(), 2);
        assert_eq!(groups[0].lines[1].line, Some(7));
        assert_eq!(groups[1].error_type, ErrorType::Xml);
        assert_eq!(groups[2].file, Some("inc.xsl"));
    }

    #[test]
    fn not_found_renders_through_the_error_template() {
        let handler = ExceptionHandler::default();
        let page = handler.handle(&PageException::PageNotFound {
            path: "/missing/<page>".to_string(),
        });
        assert_eq!(page.status, 404);
        assert_eq!(page.content_type, "text/html; charset=utf-8");
        assert!(page.body.contains("<h1>Page not found</h1>"), "{}", page.body);
        assert!(page.body.contains("/missing/&lt;page&gt;"), "{}", page.body);
    }

    #[test]
    fn transform_errors_link_to_template_lines() {
        let xsl = "<xsl:stylesheet>\n<bad/>\n<worse/>";
        let exception = PageException::Transform {
            errors: vec![record(ErrorType::Xsl, None, Some(3), "Unknown template 'x'")],
            xml: "<a/>".to_string(),
            xsl: xsl.to_string(),
            xsl_file: None,
        };
        let page = ExceptionHandler::default().handle(&exception);
        assert_eq!(page.status, 500);
        assert!(page.body.contains(r##"href="#line-3""##), "{}", page.body);
        assert!(page.body.contains(r#"id="line-3""#), "{}", page.body);
        assert!(page.body.contains("&lt;worse/&gt;"), "{}", page.body);
        assert!(!page.body.contains("class=\"debug\""));
    }

    #[test]
    fn template_file_lines_share_the_page_anchors() {
        let exception = PageException::Transform {
            errors: vec![
                record(ErrorType::Xsl, Some("/site/page.xsl"), Some(2), "Unknown template 'x'"),
                record(ErrorType::Xsl, Some("/site/layout.xsl"), Some(4), "Unknown mode 'y'"),
            ],
            xml: "<a/>".to_string(),
            xsl: "<xsl:stylesheet>\n<bad/>".to_string(),
            xsl_file: Some("/site/page.xsl".to_string()),
        };
        let description = ExceptionHandler::default().describe(&exception);
        assert!(description.contains(r#"anchor="line-2""#), "{}", description);
        assert!(description.contains("&lt;bad/&gt;"), "{}", description);
        assert!(description.contains(r#"anchor="xsl-2-line-4""#), "{}", description);
    }

    #[test]
    fn debug_mode_dumps_records_as_json() {
        let exception = PageException::Transform {
            errors: vec![record(ErrorType::Xml, None, Some(1), "broken")],
            xml: "<a".to_string(),
            xsl: String::new(),
            xsl_file: None,
        };
        let description = ExceptionHandler::new(true).describe(&exception);
        assert!(description.contains("<debug>"));
        assert!(description.contains("&quot;type&quot;: &quot;xml&quot;"), "{}", description);
    }

    #[test]
    fn broken_custom_template_falls_back_to_plain_text() {
        let exception = PageException::ErrorPage {
            heading: "Maintenance".to_string(),
            message: "Back soon".to_string(),
            status: 503,
            template: Some("<xsl:stylesheet".to_string()),
        };
        let page = ExceptionHandler::default().handle(&exception);
        assert_eq!(page.status, 503);
        assert_eq!(page.content_type, "text/plain; charset=utf-8");
        assert!(page.body.starts_with("Maintenance\n\nMaintenance: Back soon"));
    }
}
