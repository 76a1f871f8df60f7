//! Reading an XML Schema document into declarations the validator walks.

use crate::error::SchemaError;
use crate::pattern;
use crate::types::{BuiltinType, Facet};
use regex::Regex;
use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::sync::Arc;

pub const XS_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Where a declaration's type comes from.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Builtin(BuiltinType),
    /// A global `xs:simpleType` or `xs:complexType`, by name.
    Named(String),
    Simple(Arc<SimpleType>),
    Complex(Arc<ComplexType>),
}

/// A restriction of a base type by facets.
#[derive(Debug, Clone)]
pub struct SimpleType {
    pub base: TypeRef,
    pub facets: Vec<Facet>,
}

#[derive(Debug, Clone)]
pub struct AttributeDecl {
    pub name: String,
    pub type_ref: TypeRef,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub enum Content {
    Empty,
    /// Text of a simple type, from `xs:simpleContent`.
    Simple(TypeRef),
    Elements(Particle),
}

#[derive(Debug, Clone)]
pub struct ComplexType {
    pub attributes: Vec<AttributeDecl>,
    pub content: Content,
    pub mixed: bool,
}

#[derive(Debug, Clone)]
pub struct ElementDecl {
    pub name: String,
    pub namespace: Option<String>,
    pub type_ref: TypeRef,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub enum Term {
    Element(Arc<ElementDecl>),
    /// `ref=` to a global element, resolved when validating.
    Ref(String),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub min: u32,
    /// `None` is unbounded.
    pub max: Option<u32>,
    pub term: Term,
}

#[derive(Debug, Clone)]
pub enum GlobalType {
    Simple(Arc<SimpleType>),
    Complex(Arc<ComplexType>),
}

/// A compiled schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub target_namespace: Option<String>,
    pub elements: HashMap<String, Arc<ElementDecl>>,
    pub types: HashMap<String, GlobalType>,
}

impl Schema {
    pub fn parse(source: &str) -> Result<Schema, SchemaError> {
        let doc = Document::parse(source).map_err(SchemaError::SchemaXml)?;
        let root = doc.root_element();
        if !is_xs(root, "schema") {
            return Err(SchemaError::NotASchema(root.tag_name().name().to_string()));
        }
        let reader = SchemaReader {
            doc: &doc,
            target_namespace: root.attribute("targetNamespace").map(str::to_string),
            qualified: root.attribute("elementFormDefault") == Some("qualified"),
        };
        let mut schema = Schema {
            target_namespace: reader.target_namespace.clone(),
            ..Schema::default()
        };
        for child in root.children().filter(Node::is_element) {
            match xs_name(child) {
                Some("element") => {
                    let decl = reader.element(child, true)?;
                    schema.elements.insert(decl.name.clone(), Arc::new(decl));
                }
                Some("complexType") => {
                    let name = reader.required(child, "name")?;
                    let complex = reader.complex_type(child)?;
                    schema
                        .types
                        .insert(name.to_string(), GlobalType::Complex(Arc::new(complex)));
                }
                Some("simpleType") => {
                    let name = reader.required(child, "name")?;
                    let simple = reader.simple_type(child)?;
                    schema
                        .types
                        .insert(name.to_string(), GlobalType::Simple(Arc::new(simple)));
                }
                Some("annotation") => {}
                _ => return Err(reader.unsupported(child)),
            }
        }
        log::debug!(
            "Compiled schema with {} global elements and {} types",
            schema.elements.len(),
            schema.types.len()
        );
        Ok(schema)
    }
}

fn is_xs(node: Node, local: &str) -> bool {
    node.tag_name().namespace() == Some(XS_NAMESPACE) && node.tag_name().name() == local
}

fn xs_name<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    (node.tag_name().namespace() == Some(XS_NAMESPACE)).then(|| node.tag_name().name())
}

struct SchemaReader<'d, 'input> {
    doc: &'d Document<'input>,
    target_namespace: Option<String>,
    /// `elementFormDefault="qualified"`: local elements are in the target
    /// namespace.
    qualified: bool,
}

impl SchemaReader<'_, '_> {
    fn line(&self, node: Node) -> u32 {
        self.doc.text_pos_at(node.range().start).row
    }

    fn unsupported(&self, node: Node) -> SchemaError {
        SchemaError::Unsupported {
            construct: format!("xs:{}", node.tag_name().name()),
            line: self.line(node),
        }
    }

    fn required<'n>(&self, node: Node<'n, '_>, attribute: &str) -> Result<&'n str, SchemaError> {
        node.attribute(attribute).ok_or_else(|| SchemaError::MissingAttribute {
            attribute: attribute.to_string(),
            element: node.tag_name().name().to_string(),
            line: self.line(node),
        })
    }

    /// Children other than annotations.
    fn children<'a, 'i>(&self, node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
        node.children()
            .filter(|c| c.is_element() && xs_name(*c) != Some("annotation"))
    }

    /// Resolves a `type=`/`base=` QName.
    fn type_ref(&self, node: Node, qname: &str) -> Result<TypeRef, SchemaError> {
        let (prefix, local) = match qname.split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, qname),
        };
        let namespace = node.lookup_namespace_uri(prefix);
        if namespace == Some(XS_NAMESPACE) {
            return BuiltinType::from_local_name(local)
                .map(TypeRef::Builtin)
                .ok_or_else(|| SchemaError::UnknownType {
                    name: qname.to_string(),
                    line: self.line(node),
                });
        }
        Ok(TypeRef::Named(local.to_string()))
    }

    fn occurs(&self, node: Node) -> Result<(u32, Option<u32>), SchemaError> {
        let invalid = |attribute: &str, value: &str| SchemaError::InvalidFacet {
            facet: attribute.to_string(),
            value: value.to_string(),
            line: self.line(node),
        };
        let min = match node.attribute("minOccurs") {
            Some(v) => v.trim().parse().map_err(|_| invalid("minOccurs", v))?,
            None => 1,
        };
        let max = match node.attribute("maxOccurs").map(str::trim) {
            Some("unbounded") => None,
            Some(v) => Some(v.parse().map_err(|_| invalid("maxOccurs", v))?),
            None => Some(1),
        };
        Ok((min, max))
    }

    fn element(&self, node: Node, global: bool) -> Result<ElementDecl, SchemaError> {
        let name = self.required(node, "name")?.to_string();
        let type_ref = match node.attribute("type") {
            Some(qname) => self.type_ref(node, qname)?,
            None => match self.children(node).next() {
                Some(child) if is_xs(child, "complexType") => {
                    TypeRef::Complex(Arc::new(self.complex_type(child)?))
                }
                Some(child) if is_xs(child, "simpleType") => {
                    TypeRef::Simple(Arc::new(self.simple_type(child)?))
                }
                Some(child) => return Err(self.unsupported(child)),
                None => TypeRef::Builtin(BuiltinType::AnyType),
            },
        };
        let namespace = if global || self.qualified {
            self.target_namespace.clone()
        } else {
            None
        };
        Ok(ElementDecl {
            name,
            namespace,
            type_ref,
            line: self.line(node),
        })
    }

    fn particle(&self, node: Node) -> Result<Particle, SchemaError> {
        let (min, max) = self.occurs(node)?;
        let term = match xs_name(node) {
            Some("element") => match node.attribute("ref") {
                Some(reference) => {
                    let local = reference.rsplit(':').next().unwrap_or(reference);
                    Term::Ref(local.to_string())
                }
                None => Term::Element(Arc::new(self.element(node, false)?)),
            },
            Some(group @ ("sequence" | "choice" | "all")) => {
                let mut particles = Vec::new();
                for child in self.children(node) {
                    particles.push(self.particle(child)?);
                }
                match group {
                    "sequence" => Term::Sequence(particles),
                    "choice" => Term::Choice(particles),
                    _ => Term::All(particles),
                }
            }
            _ => return Err(self.unsupported(node)),
        };
        Ok(Particle { min, max, term })
    }

    fn attribute(&self, node: Node) -> Result<AttributeDecl, SchemaError> {
        let name = self.required(node, "name")?.to_string();
        let type_ref = match node.attribute("type") {
            Some(qname) => self.type_ref(node, qname)?,
            None => match self.children(node).next() {
                Some(child) if is_xs(child, "simpleType") => {
                    TypeRef::Simple(Arc::new(self.simple_type(child)?))
                }
                Some(child) => return Err(self.unsupported(child)),
                None => TypeRef::Builtin(BuiltinType::AnySimpleType),
            },
        };
        Ok(AttributeDecl {
            name,
            type_ref,
            required: node.attribute("use") == Some("required"),
        })
    }

    fn complex_type(&self, node: Node) -> Result<ComplexType, SchemaError> {
        let mut complex = ComplexType {
            attributes: Vec::new(),
            content: Content::Empty,
            mixed: node.attribute("mixed") == Some("true"),
        };
        for child in self.children(node) {
            match xs_name(child) {
                Some("sequence" | "choice" | "all") => {
                    complex.content = Content::Elements(self.particle(child)?);
                }
                Some("attribute") => complex.attributes.push(self.attribute(child)?),
                Some("simpleContent") => self.simple_content(child, &mut complex)?,
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(complex)
    }

    /// `xs:simpleContent` with an `xs:extension` adding attributes.
    fn simple_content(&self, node: Node, complex: &mut ComplexType) -> Result<(), SchemaError> {
        let extension = self
            .children(node)
            .next()
            .filter(|c| is_xs(*c, "extension"))
            .ok_or_else(|| self.unsupported(node))?;
        let base = self.required(extension, "base")?;
        complex.content = Content::Simple(self.type_ref(extension, base)?);
        for child in self.children(extension) {
            if is_xs(child, "attribute") {
                complex.attributes.push(self.attribute(child)?);
            } else {
                return Err(self.unsupported(child));
            }
        }
        Ok(())
    }

    fn simple_type(&self, node: Node) -> Result<SimpleType, SchemaError> {
        let restriction = self
            .children(node)
            .next()
            .filter(|c| is_xs(*c, "restriction"))
            .ok_or_else(|| match self.children(node).next() {
                Some(other) => self.unsupported(other),
                None => self.unsupported(node),
            })?;
        let base = match restriction.attribute("base") {
            Some(qname) => self.type_ref(restriction, qname)?,
            None => match self.children(restriction).find(|c| is_xs(*c, "simpleType")) {
                Some(inner) => TypeRef::Simple(Arc::new(self.simple_type(inner)?)),
                None => TypeRef::Builtin(BuiltinType::AnySimpleType),
            },
        };

        let mut enumeration = Vec::new();
        let mut patterns = Vec::new();
        let mut facets = Vec::new();
        for facet in self.children(restriction) {
            let Some(kind) = xs_name(facet) else {
                return Err(self.unsupported(facet));
            };
            if kind == "simpleType" {
                continue;
            }
            let value = self.required(facet, "value")?;
            let line = self.line(facet);
            let count = |value: &str| {
                value.trim().parse::<usize>().map_err(|_| SchemaError::InvalidFacet {
                    facet: kind.to_string(),
                    value: value.to_string(),
                    line,
                })
            };
            match kind {
                "enumeration" => enumeration.push(value.to_string()),
                "pattern" => {
                    let translated =
                        pattern::translate(value).map_err(|block| SchemaError::UnknownBlock {
                            block,
                            pattern: value.to_string(),
                            line,
                        })?;
                    let regex = Regex::new(&translated).map_err(|source| SchemaError::Pattern {
                        pattern: value.to_string(),
                        line,
                        source,
                    })?;
                    patterns.push(regex);
                }
                "length" => facets.push(Facet::Length(count(value)?)),
                "minLength" => facets.push(Facet::MinLength(count(value)?)),
                "maxLength" => facets.push(Facet::MaxLength(count(value)?)),
                "totalDigits" => facets.push(Facet::TotalDigits(count(value)?)),
                "minInclusive" => facets.push(Facet::MinInclusive(value.trim().to_string())),
                "maxInclusive" => facets.push(Facet::MaxInclusive(value.trim().to_string())),
                "minExclusive" => facets.push(Facet::MinExclusive(value.trim().to_string())),
                "maxExclusive" => facets.push(Facet::MaxExclusive(value.trim().to_string())),
                "whiteSpace" => {}
                _ => return Err(self.unsupported(facet)),
            }
        }
        if !enumeration.is_empty() {
            facets.push(Facet::Enumeration(enumeration));
        }
        if !patterns.is_empty() {
            facets.push(Facet::Pattern(patterns));
        }
        Ok(SimpleType { base, facets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="order" type="OrderType"/>
  <xs:complexType name="OrderType">
    <xs:sequence>
      <xs:element name="item" maxOccurs="unbounded">
        <xs:complexType>
          <xs:simpleContent>
            <xs:extension base="xs:string">
              <xs:attribute name="qty" type="xs:positiveInteger" use="required"/>
            </xs:extension>
          </xs:simpleContent>
        </xs:complexType>
      </xs:element>
    </xs:sequence>
  </xs:complexType>
  <xs:simpleType name="Sku">
    <xs:restriction base="xs:string"><xs:pattern value="[A-Z]{3}-\d+"/></xs:restriction>
  </xs:simpleType>
</xs:schema>"#;

    #[test]
    fn reads_global_declarations() {
        let schema = Schema::parse(SCHEMA).unwrap();
        assert!(matches!(
            &schema.elements["order"].type_ref,
            TypeRef::Named(name) if name == "OrderType"
        ));
        match &schema.types["OrderType"] {
            GlobalType::Complex(complex) => match &complex.content {
                Content::Elements(Particle {
                    term: Term::Sequence(items),
                    ..
                }) => {
                    assert_eq!(items.len(), 1);
                    assert_eq!(items[0].max, None);
                }
                other => panic!("unexpected content {:?}", other),
            },
            other => panic!("unexpected type {:?}", other),
        }
        assert!(matches!(schema.types["Sku"], GlobalType::Simple(_)));
    }

    #[test]
    fn unsupported_constructs_are_reported_with_line() {
        let source = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:group name="g"/>
</xs:schema>"#;
        let err = Schema::parse(source).unwrap_err();
        assert!(matches!(err, SchemaError::Unsupported { line: 2, .. }), "{}", err);
    }

    #[test]
    fn bad_patterns_fail_to_compile() {
        let source = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="t"><xs:restriction base="xs:string"><xs:pattern value="("/></xs:restriction></xs:simpleType>
</xs:schema>"#;
        assert!(matches!(Schema::parse(source), Err(SchemaError::Pattern { .. })));
    }

    #[test]
    fn block_escapes_in_patterns() {
        let source = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="ascii"><xs:restriction base="xs:string"><xs:pattern value="\p{IsBasicLatin}+"/></xs:restriction></xs:simpleType>
  <xs:simpleType name="odd">
    <xs:restriction base="xs:string"><xs:pattern value="\p{IsNoSuchBlock}"/></xs:restriction>
  </xs:simpleType>
</xs:schema>"#;
        let err = Schema::parse(source).unwrap_err();
        assert!(
            matches!(&err, SchemaError::UnknownBlock { block, line: 4, .. } if block == "NoSuchBlock"),
            "{}",
            err
        );
        assert!(err.to_string().contains("not supported"));

        let ascii = source
            .replace(r"\p{IsNoSuchBlock}", "x")
            .replace("</xs:schema>", "  <xs:element name=\"name\" type=\"ascii\"/>\n</xs:schema>");
        let schema = Schema::parse(&ascii).unwrap();
        assert!(schema.validate_str("<name>plain text</name>").unwrap().is_empty());
        assert_eq!(schema.validate_str("<name>café</name>").unwrap().len(), 1);
    }

    #[test]
    fn not_a_schema() {
        assert!(matches!(Schema::parse("<root/>"), Err(SchemaError::NotASchema(_))));
    }
}
