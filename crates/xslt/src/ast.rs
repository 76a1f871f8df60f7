use crate::error::Location;
use crate::pattern::Pattern;
use folio_xpath1::{DecimalFormat, Expression};
use std::collections::HashMap;
use std::sync::Arc;

/// Namespace bindings as `(prefix, uri)`; `None` is the default namespace.
pub type Namespaces = Vec<(Option<String>, String)>;

/// Represents a pre-compiled, executable block of XSLT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparsedTemplate(pub Vec<Instruction>);

/// An instruction together with where it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub location: Location,
    pub kind: XsltInstruction,
}

/// A piece of an attribute value template.
#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Static(String),
    Dynamic(Expression),
}

/// An attribute value such as `item-{@id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValueTemplate(pub Vec<AvtPart>);

impl AttributeValueTemplate {
    pub fn literal(text: impl Into<String>) -> Self {
        AttributeValueTemplate(vec![AvtPart::Static(text.into())])
    }

    /// The value when the template has no `{...}` parts.
    pub fn as_static(&self) -> Option<String> {
        self.0
            .iter()
            .map(|part| match part {
                AvtPart::Static(s) => Some(s.as_str()),
                AvtPart::Dynamic(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDataType {
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOrder {
    UpperFirst,
    LowerFirst,
}

/// A compiled `xsl:sort`.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub select: Expression,
    pub order: SortOrder,
    pub data_type: SortDataType,
    pub case_order: Option<CaseOrder>,
}

/// How a variable, parameter or `xsl:with-param` gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Select(Expression),
    /// Content builds a result tree fragment.
    Content(PreparsedTemplate),
    /// Neither `select` nor content: the empty string.
    Empty,
}

/// Represents a parameter passed to a template.
#[derive(Debug, Clone, PartialEq)]
pub struct WithParam {
    pub name: String,
    pub value: VariableValue,
}

/// A declared `xsl:param` of a template, with its default.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: VariableValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub test: Expression,
    pub body: PreparsedTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLevel {
    Single,
    Multiple,
    Any,
}

/// An instruction in a pre-parsed template, representing a node or control flow statement.
#[derive(Debug, Clone, PartialEq)]
pub enum XsltInstruction {
    /// Literal text from the stylesheet.
    Text(String),
    /// `xsl:text`, whose whitespace is kept.
    XslText { text: String, disable_escaping: bool },
    /// A literal result element, e.g. `<div class="{@kind}">`.
    LiteralElement {
        name: String,
        /// Namespace declarations copied to the result.
        namespaces: Namespaces,
        attrs: Vec<(String, AttributeValueTemplate)>,
        use_attribute_sets: Vec<String>,
        body: PreparsedTemplate,
    },
    ValueOf {
        select: Expression,
        disable_escaping: bool,
    },
    CopyOf {
        select: Expression,
    },
    Copy {
        use_attribute_sets: Vec<String>,
        body: PreparsedTemplate,
    },
    If {
        test: Expression,
        body: PreparsedTemplate,
    },
    Choose {
        whens: Vec<When>,
        otherwise: Option<PreparsedTemplate>,
    },
    ForEach {
        select: Expression,
        sort_keys: Vec<SortKey>,
        body: PreparsedTemplate,
    },
    /// The core of the push model.
    ApplyTemplates {
        select: Option<Expression>,
        mode: Option<String>,
        sort_keys: Vec<SortKey>,
        params: Vec<WithParam>,
    },
    CallTemplate {
        name: String,
        params: Vec<WithParam>,
    },
    ApplyImports,
    Variable {
        name: String,
        value: VariableValue,
    },
    /// `xsl:element`; `namespaces` resolves a prefix in the computed name.
    Element {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: Namespaces,
        use_attribute_sets: Vec<String>,
        body: PreparsedTemplate,
    },
    Attribute {
        name: AttributeValueTemplate,
        namespace: Option<AttributeValueTemplate>,
        namespaces: Namespaces,
        body: PreparsedTemplate,
    },
    Comment {
        body: PreparsedTemplate,
    },
    ProcessingInstruction {
        name: AttributeValueTemplate,
        body: PreparsedTemplate,
    },
    Message {
        terminate: bool,
        body: PreparsedTemplate,
    },
    Number {
        value: Option<Expression>,
        count: Option<Pattern>,
        from: Option<Pattern>,
        level: NumberLevel,
        format: AttributeValueTemplate,
    },
}

/// Represents a single compiled `<xsl:template match="...">` rule. A union
/// pattern compiles to one rule per alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRule {
    pub pattern: Pattern,
    /// The calculated or specified priority of the rule.
    pub priority: f64,
    /// Import precedence of the module the rule came from; higher wins.
    pub precedence: usize,
    /// Declaration order, used to break remaining ties.
    pub position: usize,
    /// The mode this rule belongs to. `None` represents the default mode.
    pub mode: Option<String>,
    pub params: Vec<Param>,
    /// The compiled body of the template.
    pub body: Arc<PreparsedTemplate>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedTemplate {
    pub params: Vec<Param>,
    pub body: Arc<PreparsedTemplate>,
    pub precedence: usize,
}

/// A compiled `xsl:key`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDefinition {
    pub pattern: Pattern,
    pub use_expr: Expression,
}

/// A top-level `xsl:variable` or `xsl:param`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub name: String,
    pub value: VariableValue,
    /// Parameters can be overridden by the caller.
    pub is_param: bool,
    pub precedence: usize,
    pub location: Location,
}

/// A named `xsl:attribute-set`: `xsl:attribute` instructions plus the
/// sets it uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    pub use_attribute_sets: Vec<String>,
    pub attributes: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMethod {
    Xml,
    Html,
    Text,
}

impl OutputMethod {
    pub fn default_media_type(self) -> &'static str {
        match self {
            OutputMethod::Xml => "text/xml",
            OutputMethod::Html => "text/html",
            OutputMethod::Text => "text/plain",
        }
    }
}

/// The merged `xsl:output` declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// `None` picks html when the result's document element is `<html>`.
    pub method: Option<OutputMethod>,
    pub version: Option<String>,
    pub encoding: String,
    pub omit_xml_declaration: bool,
    pub standalone: Option<bool>,
    pub doctype_public: Option<String>,
    pub doctype_system: Option<String>,
    pub indent: bool,
    pub media_type: Option<String>,
    /// Result element names, as written, whose text is output as CDATA.
    pub cdata_section_elements: Vec<String>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            method: None,
            version: None,
            encoding: "UTF-8".to_string(),
            omit_xml_declaration: false,
            standalone: None,
            doctype_public: None,
            doctype_system: None,
            indent: false,
            media_type: None,
            cdata_section_elements: Vec::new(),
        }
    }
}

/// A name test from `xsl:strip-space` or `xsl:preserve-space`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceTest {
    Any,
    Namespace(Option<String>),
    Name(Option<String>, String),
}

impl SpaceTest {
    fn priority(&self) -> i8 {
        match self {
            SpaceTest::Any => 0,
            SpaceTest::Namespace(_) => 1,
            SpaceTest::Name(..) => 2,
        }
    }

    fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        match self {
            SpaceTest::Any => true,
            SpaceTest::Namespace(uri) => uri.as_deref() == namespace,
            SpaceTest::Name(uri, name) => uri.as_deref() == namespace && name == local,
        }
    }
}

/// Which source elements lose their whitespace-only text children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhitespaceRules {
    pub strip: Vec<SpaceTest>,
    pub preserve: Vec<SpaceTest>,
}

impl WhitespaceRules {
    pub fn is_empty(&self) -> bool {
        self.strip.is_empty()
    }

    /// The most specific matching test decides; `preserve` wins ties.
    pub fn should_strip(&self, namespace: Option<&str>, local: &str) -> bool {
        let best = |tests: &[SpaceTest]| {
            tests
                .iter()
                .filter(|t| t.matches(namespace, local))
                .map(SpaceTest::priority)
                .max()
        };
        match (best(&self.strip), best(&self.preserve)) {
            (Some(strip), Some(preserve)) => strip > preserve,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// The complete output of the XSLT compiler.
#[derive(Debug, Clone, Default)]
pub struct CompiledStylesheet {
    /// Template rules grouped by mode, best candidates first.
    pub template_rules: HashMap<Option<String>, Vec<TemplateRule>>,
    /// All named templates, for use with `<xsl:call-template>`.
    pub named_templates: HashMap<String, NamedTemplate>,
    pub keys: HashMap<String, Vec<KeyDefinition>>,
    /// Top-level variables and parameters in declaration order.
    pub globals: Vec<GlobalVariable>,
    pub attribute_sets: HashMap<String, AttributeSet>,
    pub output: OutputSettings,
    pub whitespace: WhitespaceRules,
    pub decimal_formats: HashMap<Option<String>, DecimalFormat>,
    /// `xsl:namespace-alias`: stylesheet namespace URI to result binding.
    pub namespace_aliases: HashMap<String, (Option<String>, String)>,
    /// Module sources by file name (`""` for the main stylesheet), kept to
    /// quote the offending line in runtime diagnostics.
    pub sources: HashMap<String, Arc<str>>,
}

impl CompiledStylesheet {
    /// The text of `line` (1-based) in the module `file`.
    pub fn source_line(&self, file: Option<&str>, line: usize) -> Option<String> {
        let source = self.sources.get(file.unwrap_or(""))?;
        crate::util::source_line(source, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avt_static_value() {
        assert_eq!(
            AttributeValueTemplate::literal("plain").as_static(),
            Some("plain".to_string())
        );
        let dynamic = AttributeValueTemplate(vec![
            AvtPart::Static("a".into()),
            AvtPart::Dynamic(Expression::Literal("b".into())),
        ]);
        assert_eq!(dynamic.as_static(), None);
    }

    #[test]
    fn whitespace_rules_prefer_specific_tests() {
        let rules = WhitespaceRules {
            strip: vec![SpaceTest::Any],
            preserve: vec![SpaceTest::Name(None, "pre".into())],
        };
        assert!(rules.should_strip(None, "div"));
        assert!(!rules.should_strip(None, "pre"));

        let tie = WhitespaceRules {
            strip: vec![SpaceTest::Any],
            preserve: vec![SpaceTest::Any],
        };
        assert!(!tie.should_strip(None, "div"));
    }
}
