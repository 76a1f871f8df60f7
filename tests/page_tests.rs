mod common;

use common::{TestResult, init_logger, stylesheet};
use folio::{
    Config, ErrorType, ExceptionHandler, PageException, PageState, Processor, XsltPage,
};
use std::fs;

fn page_template() -> String {
    stylesheet(
        r#"<xsl:output method="html"/>
<xsl:param name="title" select="'Untitled'"/>
<xsl:template match="/entries">
  <html><body><h1><xsl:value-of select="$title"/></h1><xsl:apply-templates select="entry"/></body></html>
</xsl:template>
<xsl:template match="entry"><p><xsl:value-of select="."/></p></xsl:template>"#,
    )
}

#[test]
fn generates_markup_with_parameters() -> TestResult {
    init_logger();
    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries><entry>First</entry><entry>Second</entry></entries>");
    page.set_xsl(page_template());
    page.set_runtime_params([("title", "News")]);

    let markup = page.generate().ok_or("no markup")?;
    assert_eq!(
        markup,
        "<html><body><h1>News</h1><p>First</p><p>Second</p></body></html>"
    );
    assert_eq!(page.status(), 200);
    assert_eq!(page.header("Content-Type"), Some("text/html; charset=utf-8"));
    assert_eq!(page.state(), PageState::Generated);
    Ok(())
}

#[test]
fn errors_turn_into_a_500() {
    init_logger();
    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries><entry>unclosed</entries>");
    page.set_xsl(page_template());

    assert!(page.generate().is_none());
    assert_eq!(page.status(), 500);
    assert!(page.processor().is_errors());
    assert_eq!(page.processor().records()[0].error_type, ErrorType::Xml);
}

#[test]
fn regenerating_leaves_no_stale_errors() {
    init_logger();
    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries>");
    page.set_xsl(page_template());
    assert!(page.generate().is_none());

    page.set_xml("<entries><entry>ok</entry></entries>");
    assert_eq!(page.state(), PageState::Configured);
    assert!(page.generate().is_some());
    assert_eq!(page.status(), 200);
    assert!(!page.processor().is_errors());
}

#[test]
fn recoverable_runtime_errors_still_fail_the_page() {
    init_logger();
    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries/>");
    page.set_xsl(stylesheet(
        r#"<xsl:template match="/"><html><xsl:call-template name="header"/></html></xsl:template>"#,
    ));
    assert!(page.generate().is_none());
    assert_eq!(page.status(), 500);
    assert_eq!(
        page.processor().records()[0].number,
        folio_xslt::codes::UNKNOWN_TEMPLATE
    );
}

#[test]
fn configured_unavailable_processor() -> TestResult {
    init_logger();
    let config = Config::from_toml("[processor]\nimplementation = \"unavailable\"")?;
    let mut page = XsltPage::from_config(&config);
    page.set_xml("<entries/>");
    page.set_xsl(page_template());
    assert!(page.generate().is_none());
    assert_eq!(page.status(), 500);
    Ok(())
}

#[test]
fn template_files_and_their_imports() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("layout.xsl"),
        stylesheet(r#"<xsl:template name="footer"><footer>folio</footer></xsl:template>"#),
    )?;
    let path = dir.path().join("page.xsl");
    fs::write(
        &path,
        stylesheet(
            r#"<xsl:include href="layout.xsl"/>
<xsl:template match="/"><div><xsl:call-template name="footer"/></div></xsl:template>"#,
        ),
    )?;

    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries/>");
    page.set_xsl_file(&path)?;
    let markup = page.generate().ok_or("no markup")?;
    assert!(markup.ends_with("<div><footer>folio</footer></div>"), "{}", markup);
    assert_eq!(page.header("content-type"), Some("text/xml; charset=utf-8"));
    Ok(())
}

#[test]
fn missing_template_file_is_an_error() {
    let mut page = XsltPage::from_config(&Config::default());
    assert!(page.set_xsl_file("/nonexistent/page.xsl").is_err());
    assert_eq!(page.state(), PageState::Constructed);
}

#[test]
fn failed_page_renders_a_diagnostic_page() {
    init_logger();
    let xsl = stylesheet(
        "<xsl:template match=\"/\">\n<xsl:call-template name=\"missing\"/>\n<xsl:value-of select=\"1 +\"/>\n</xsl:template>",
    );
    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries/>");
    page.set_xsl(xsl);
    assert!(page.generate().is_none());

    let exception = PageException::from_page(&page);
    let rendered = ExceptionHandler::new(true).handle(&exception);
    assert_eq!(rendered.status, 500);
    assert!(rendered.body.contains("<h1>XSLT processing error</h1>"), "{}", rendered.body);
    assert!(rendered.body.contains(r##"href="#line-3""##), "{}", rendered.body);
    assert!(rendered.body.contains(r#"class="debug""#), "{}", rendered.body);
}

#[test]
fn template_file_errors_link_to_its_lines() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("page.xsl");
    fs::write(
        &path,
        stylesheet(
            "<xsl:template match=\"/\">\n<xsl:call-template name=\"missing\"/>\n<xsl:value-of select=\"1 +\"/>\n</xsl:template>",
        ),
    )?;
    let mut page = XsltPage::from_config(&Config::default());
    page.set_xml("<entries/>");
    page.set_xsl_file(&path)?;
    assert!(page.generate().is_none());

    let exception = PageException::from_page(&page);
    let rendered = ExceptionHandler::default().handle(&exception);
    assert_eq!(rendered.status, 500);
    assert!(rendered.body.contains(r##"href="#line-3""##), "{}", rendered.body);
    assert!(rendered.body.contains(r#"id="line-3""#), "{}", rendered.body);
    assert!(!rendered.body.contains("xsl-1-line-"), "{}", rendered.body);
    Ok(())
}
