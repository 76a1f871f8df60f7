mod common;

use common::{TestResult, init_logger, process, stylesheet};
use folio::processor::codes;
use folio::{
    ErrorType, HostFunctions, Parameters, ProcessSettings, Processor, TransformError, XsltProcess,
};
use std::fs;

const COPY_B: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/a/b"><xsl:value-of select="."/></xsl:template>
</xsl:stylesheet>"#;

const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="a">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="b" type="xs:integer" maxOccurs="unbounded"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

fn types(processor: &XsltProcess) -> Vec<ErrorType> {
    processor.records().iter().map(|r| r.error_type).collect()
}

#[test]
fn copies_text_of_matched_element() {
    let (output, processor) = process("<a><b>1</b></a>", COPY_B);
    assert_eq!(output.as_deref(), Some("1"));
    assert!(!processor.is_errors());
    assert!(processor.records().is_empty());
}

#[test]
fn malformed_xml_is_an_xml_record() {
    let (output, processor) = process("<a><b>1</a>", COPY_B);
    assert!(output.is_none());
    assert!(processor.is_errors());
    let record = &processor.records()[0];
    assert_eq!(record.error_type, ErrorType::Xml);
    assert_eq!(record.line, Some(1));
    assert_eq!(record.context.as_deref(), Some("<a><b>1</a>"));
}

#[test]
fn unclosed_stylesheet_tag_is_an_xsl_record() {
    let broken = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/">"#;
    let (output, processor) = process("<a><b>1</b></a>", broken);
    assert!(output.is_none());
    assert!(processor.is_errors());
    assert!(types(&processor).contains(&ErrorType::Xsl));
}

#[test]
fn malformed_stylesheets_are_xsl_records() {
    let template = r#"<xsl:template match="/"><xsl:value-of select="a/b"/></xsl:template>"#;
    let cases = [
        ("trailing text", format!("{}junk", stylesheet(template))),
        ("second root", format!("{}\n<extra/>", stylesheet(template))),
        (
            "illegal character reference",
            stylesheet(r#"<xsl:template match="/">&#0;</xsl:template>"#),
        ),
        (
            "lt in attribute",
            stylesheet(r#"<xsl:template match="/"><out name='a<b'/></xsl:template>"#),
        ),
        ("empty input", String::new()),
    ];
    for (name, xsl) in cases {
        let (output, processor) = process("<a><b>1</b></a>", &xsl);
        assert!(output.is_none(), "{}: produced {:?}", name, output);
        let record = processor
            .records()
            .iter()
            .find(|r| r.error_type == ErrorType::Xsl)
            .unwrap_or_else(|| panic!("{}: no xsl record in {:?}", name, processor.records()));
        assert_eq!(record.number, folio_xslt::codes::STYLESHEET_SYNTAX, "{}", name);
        assert!(record.line.is_some(), "{}: {:?}", name, record);
    }
}

#[test]
fn second_run_starts_with_an_empty_log() {
    init_logger();
    let mut processor = XsltProcess::new();
    assert!(processor.process("<a>", COPY_B, &Parameters::new(), &[]).is_none());
    assert!(processor.is_errors());

    let output = processor.process("<a><b>2</b></a>", COPY_B, &Parameters::new(), &[]);
    assert_eq!(output.as_deref(), Some("2"));
    assert!(!processor.is_errors());
    assert!(processor.next_error().is_none());
}

#[test]
fn bulk_read_is_independent_of_the_cursor() {
    let xsl = stylesheet(
        r#"<xsl:output method="text"/>
<xsl:template match="/"><xsl:call-template name="one"/><xsl:call-template name="two"/><xsl:call-template name="three"/></xsl:template>"#,
    );
    let (output, mut processor) = process("<r/>", &xsl);
    assert_eq!(output.as_deref(), Some(""));
    let total = processor.records().len();
    assert_eq!(total, 3);

    for _ in 0..total {
        assert!(processor.next_error().is_some());
        assert_eq!(processor.records().len(), total);
    }
    assert!(processor.next_error().is_none());
    assert!(processor.next_error().is_none());

    processor.rewind();
    let first: Option<TransformError> = processor.next_error().cloned();
    assert!(first.is_some_and(|r| r.message.contains("one")));

    let drained = processor.drain_errors();
    assert_eq!(drained.len(), total);
    assert!(!processor.is_errors());
}

#[test]
fn recoverable_errors_keep_the_output() {
    let xsl = stylesheet(
        r#"<xsl:output method="text"/>
<xsl:template match="/">a<xsl:call-template name="missing"/>b</xsl:template>"#,
    );
    let (output, processor) = process("<r/>", &xsl);
    assert_eq!(output.as_deref(), Some("ab"));
    assert!(processor.is_errors());
    let record = &processor.records()[0];
    assert_eq!(record.error_type, ErrorType::Xsl);
    assert_eq!(record.number, folio_xslt::codes::UNKNOWN_TEMPLATE);
    assert_eq!(record.line, Some(2));
    assert!(record.context.as_deref().is_some_and(|c| c.contains("missing")));
}

#[test]
fn recursion_guard_stops_the_run() {
    init_logger();
    let xsl = stylesheet(
        r#"<xsl:template match="/"><xsl:call-template name="loop"/></xsl:template>
<xsl:template name="loop"><x><xsl:call-template name="loop"/></x></xsl:template>"#,
    );
    let settings = ProcessSettings {
        max_depth: 100,
        ..ProcessSettings::default()
    };
    let mut processor = XsltProcess::new().with_settings(settings);
    assert!(processor.process("<r/>", &xsl, &Parameters::new(), &[]).is_none());
    assert_eq!(processor.records().len(), 1);
    assert_eq!(processor.records()[0].number, folio_xslt::codes::RECURSION_LIMIT);
}

#[test]
fn message_terminate_is_fatal() {
    let xsl = stylesheet(
        r#"<xsl:template match="/"><xsl:message terminate="yes">stop here</xsl:message></xsl:template>"#,
    );
    let (output, processor) = process("<r/>", &xsl);
    assert!(output.is_none());
    assert!(processor.records()[0].message.contains("stop here"));
}

#[test]
fn parameters_reach_the_stylesheet() {
    init_logger();
    let xsl = stylesheet(
        r#"<xsl:output method="text"/><xsl:param name="greeting" select="'hi'"/>
<xsl:template match="/"><xsl:value-of select="concat($greeting, ' ', /r)"/></xsl:template>"#,
    );
    let mut processor = XsltProcess::new();
    let parameters: Parameters = [("greeting", "hello")].into_iter().collect();
    let output = processor.process("<r>world</r>", &xsl, &parameters, &[]);
    assert_eq!(output.as_deref(), Some("hello world"));
}

#[test]
fn host_functions_need_the_allow_list() {
    init_logger();
    let xsl = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:h="urn:folio:host">
  <xsl:output method="text"/>
  <xsl:template match="/"><xsl:value-of select="h:upper(string(/r))"/>|<xsl:value-of select="h:lower(string(/r))"/></xsl:template>
</xsl:stylesheet>"#;
    let mut processor = XsltProcess::new().with_host_functions(HostFunctions::standard());
    let output = processor.process("<r>MiXed</r>", xsl, &Parameters::new(), &["upper".to_string()]);
    assert_eq!(output.as_deref(), Some("MIXED|"));
    assert_eq!(processor.records().len(), 1);
    assert_eq!(processor.records()[0].number, folio_xslt::codes::HOST_FUNCTION);
    assert!(processor.records()[0].message.contains("lower"));
}

#[test]
fn custom_host_functions() {
    init_logger();
    let xsl = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:h="urn:folio:host">
  <xsl:output method="text"/>
  <xsl:template match="/"><xsl:value-of select="h:function('count-words', string(/r))"/></xsl:template>
</xsl:stylesheet>"#;
    let mut functions = HostFunctions::new();
    functions.register("count-words", |args| {
        let text = args.first().map(folio::HostValue::as_string).unwrap_or_default();
        Ok(folio::HostValue::Number(text.split_whitespace().count() as f64))
    });
    let mut processor = XsltProcess::new().with_host_functions(functions);
    let output = processor.process(
        "<r>one two three</r>",
        xsl,
        &Parameters::new(),
        &["count-words".to_string()],
    );
    assert_eq!(output.as_deref(), Some("3"));
    assert!(!processor.is_errors());
}

#[test]
fn imports_resolve_next_to_the_stylesheet() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("base.xsl"),
        stylesheet(r#"<xsl:template match="item">[<xsl:value-of select="."/>]</xsl:template>"#),
    )?;
    let page = dir.path().join("page.xsl");
    fs::write(
        &page,
        stylesheet(
            r#"<xsl:import href="base.xsl"/><xsl:output method="text"/>
<xsl:template match="/"><xsl:apply-templates select="//item"/></xsl:template>"#,
        ),
    )?;

    let mut processor = XsltProcess::new();
    let output = processor.process_file("<r><item>1</item><item>2</item></r>", &page, &Parameters::new(), &[]);
    assert_eq!(output.as_deref(), Some("[1][2]"));
    assert!(!processor.is_errors());
    Ok(())
}

#[test]
fn records_name_the_stylesheet_file() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    let page = dir.path().join("page.xsl");
    fs::write(
        &page,
        stylesheet(r#"<xsl:template match="/"><xsl:call-template name="absent"/></xsl:template>"#),
    )?;
    let mut processor = XsltProcess::new();
    processor.process_file("<r/>", &page, &Parameters::new(), &[]);
    let file = processor.records()[0].file.clone().unwrap_or_default();
    assert!(file.ends_with("page.xsl"), "{}", file);
    Ok(())
}

#[test]
fn remote_imports_are_refused() {
    let xsl = stylesheet(r#"<xsl:import href="http://example.com/evil.xsl"/>"#);
    let (output, processor) = process("<r/>", &xsl);
    assert!(output.is_none());
    let record = &processor.records()[0];
    assert_eq!(record.error_type, ErrorType::Xsl);
    assert_eq!(record.number, folio_xslt::codes::IMPORT);
    assert!(record.message.contains("http"));
}

#[test]
fn imports_cannot_leave_the_base_directory() -> TestResult {
    init_logger();
    let dir = tempfile::tempdir()?;
    let templates = dir.path().join("templates");
    fs::create_dir(&templates)?;
    fs::write(dir.path().join("secret.xsl"), stylesheet(""))?;
    let page = templates.join("page.xsl");
    fs::write(&page, stylesheet(r#"<xsl:include href="../secret.xsl"/>"#))?;

    let mut processor = XsltProcess::new();
    assert!(processor.process_file("<r/>", &page, &Parameters::new(), &[]).is_none());
    assert_eq!(processor.records()[0].number, folio_xslt::codes::IMPORT);
    Ok(())
}

#[test]
fn missing_stylesheet_file_is_recorded() {
    init_logger();
    let mut processor = XsltProcess::new();
    let output = processor.process_file(
        "<r/>",
        std::path::Path::new("/nonexistent/page.xsl"),
        &Parameters::new(),
        &[],
    );
    assert!(output.is_none());
    assert_eq!(processor.records()[0].number, codes::STYLESHEET_IO);
}

#[test]
fn dtds_can_be_disabled() {
    init_logger();
    let settings = ProcessSettings {
        allow_dtd: false,
        ..ProcessSettings::default()
    };
    let mut processor = XsltProcess::new().with_settings(settings);
    let xml = "<!DOCTYPE a [<!ENTITY e \"x\">]>\n<a><b>&e;</b></a>";
    assert!(processor.process(xml, COPY_B, &Parameters::new(), &[]).is_none());
    assert_eq!(types(&processor), vec![ErrorType::Xml]);
}

#[test]
fn validate_accepts_conforming_documents() {
    init_logger();
    let mut processor = XsltProcess::new();
    assert!(processor.validate(SCHEMA, Some("<a><b>1</b><b>2</b></a>")));
    assert!(!processor.is_errors());
}

#[test]
fn validate_reports_every_violation() {
    init_logger();
    let mut processor = XsltProcess::new();
    let xml = "<a>\n<b>one</b>\n<b>2</b>\n<c/>\n</a>";
    assert!(!processor.validate(SCHEMA, Some(xml)));
    let records = processor.records();
    assert_eq!(records.len(), 2, "{:?}", records);
    assert!(records.iter().all(|r| r.error_type == ErrorType::Xsd));
    assert_eq!(records[0].line, Some(4));
    assert_eq!(records[0].context.as_deref(), Some("<c/>"));
    assert_eq!(records[1].line, Some(2));
}

#[test]
fn validate_uses_the_last_processed_document() {
    let (_, mut processor) = process("<a><b>x</b></a>", COPY_B);
    assert!(!processor.is_errors());
    assert!(!processor.validate(SCHEMA, None));
    assert_eq!(types(&processor), vec![ErrorType::Xsd]);
}

#[test]
fn validate_keeps_earlier_records() {
    let (_, mut processor) = process("<a><b>1</b>", COPY_B);
    let before = processor.records().len();
    assert!(before > 0);
    assert!(processor.validate(SCHEMA, Some("<a><b>1</b></a>")));
    assert_eq!(processor.records().len(), before);
    assert_eq!(processor.records()[0].error_type, ErrorType::Xml);
}

#[test]
fn validate_without_a_document() {
    init_logger();
    let mut processor = XsltProcess::new();
    assert!(!processor.validate(SCHEMA, None));
    assert_eq!(processor.records()[0].number, codes::NO_DOCUMENT);
}

#[test]
fn broken_schemas_are_xsd_records() {
    init_logger();
    let mut processor = XsltProcess::new();
    assert!(!processor.validate("<xs:schema", Some("<a/>")));
    let record = &processor.records()[0];
    assert_eq!(record.error_type, ErrorType::Xsd);
    assert_eq!(record.number, codes::SCHEMA_PARSE);
}
