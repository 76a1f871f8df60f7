#![allow(dead_code)]

use folio::{Parameters, Processor, XsltProcess};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wraps template rules in a stylesheet element.
pub fn stylesheet(body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
        body
    )
}

/// Runs `xsl` over `xml` on a fresh processor, without parameters or host
/// functions.
pub fn process(xml: &str, xsl: &str) -> (Option<String>, XsltProcess) {
    init_logger();
    let mut processor = XsltProcess::new();
    let output = processor.process(xml, xsl, &Parameters::new(), &[]);
    (output, processor)
}
