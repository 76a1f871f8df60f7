//! Checks a parsed document against a [`Schema`], collecting every
//! violation instead of stopping at the first.

use crate::error::{SchemaError, Violation};
use crate::schema::{
    ComplexType, Content, ElementDecl, GlobalType, Particle, Schema, SimpleType, Term, TypeRef,
};
use crate::types::BuiltinType;
use roxmltree::{Document, Node, ParsingOptions};
use std::sync::Arc;

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// How deep named types may refer to each other before the schema is
/// considered circular.
const MAX_TYPE_DEPTH: usize = 64;

enum Resolved<'s> {
    Simple(SimpleChain<'s>),
    Complex(&'s ComplexType),
}

/// A simple type flattened to its built-in base and the facet steps above
/// it, outermost first.
struct SimpleChain<'s> {
    base: BuiltinType,
    steps: Vec<&'s SimpleType>,
}

impl Schema {
    /// Validates `xml`. A document that is not well-formed is an error, a
    /// well-formed one yields its violations (none when valid).
    pub fn validate_str(&self, xml: &str) -> Result<Vec<Violation>, SchemaError> {
        let mut options = ParsingOptions::default();
        options.allow_dtd = true;
        let doc = Document::parse_with_options(xml, options).map_err(SchemaError::DocumentXml)?;
        Ok(self.validate_document(&doc))
    }

    pub fn validate_document(&self, doc: &Document) -> Vec<Violation> {
        let mut validator = Validator {
            schema: self,
            doc,
            violations: Vec::new(),
        };
        let root = doc.root_element();
        match self.global_element(root) {
            Some(decl) => validator.element(root, decl),
            None => validator.report(
                root,
                format!(
                    "No global declaration for root element '{}'",
                    root.tag_name().name()
                ),
            ),
        }
        log::debug!("Validation found {} violations", validator.violations.len());
        validator.violations
    }

    fn global_element(&self, node: Node) -> Option<&ElementDecl> {
        self.elements
            .get(node.tag_name().name())
            .map(Arc::as_ref)
            .filter(|decl| decl.namespace.as_deref() == node.tag_name().namespace())
    }
}

struct Validator<'s, 'd, 'input> {
    schema: &'s Schema,
    doc: &'d Document<'input>,
    violations: Vec<Violation>,
}

impl<'s> Validator<'s, '_, '_> {
    fn line(&self, node: Node) -> u32 {
        self.doc.text_pos_at(node.range().start).row
    }

    fn report(&mut self, node: Node, message: String) {
        let line = self.line(node);
        self.violations.push(Violation::new(message, line));
    }

    fn resolve(&self, type_ref: &'s TypeRef) -> Result<Resolved<'s>, String> {
        let mut steps = Vec::new();
        let mut current = type_ref;
        for _ in 0..MAX_TYPE_DEPTH {
            match current {
                TypeRef::Builtin(base) => {
                    return Ok(Resolved::Simple(SimpleChain { base: *base, steps }));
                }
                TypeRef::Named(name) => match self.schema.types.get(name) {
                    Some(GlobalType::Simple(simple)) => {
                        steps.push(simple.as_ref());
                        current = &simple.base;
                    }
                    Some(GlobalType::Complex(complex)) if steps.is_empty() => {
                        return Ok(Resolved::Complex(complex.as_ref()));
                    }
                    Some(GlobalType::Complex(_)) => {
                        return Err(format!("Type '{}' cannot restrict a complex type", name));
                    }
                    None => return Err(format!("Unknown type '{}'", name)),
                },
                TypeRef::Simple(simple) => {
                    steps.push(simple.as_ref());
                    current = &simple.base;
                }
                TypeRef::Complex(complex) if steps.is_empty() => {
                    return Ok(Resolved::Complex(complex.as_ref()));
                }
                TypeRef::Complex(_) => {
                    return Err("A simple type cannot restrict a complex type".to_string());
                }
            }
        }
        Err("Type definitions refer to each other in a cycle".to_string())
    }

    /// Checks a value against a simple type; the innermost restriction
    /// is applied first.
    fn check_simple(&self, chain: &SimpleChain, raw: &str) -> Result<(), String> {
        let value = chain.base.normalize(raw);
        chain.base.check(&value)?;
        for step in chain.steps.iter().rev() {
            for facet in &step.facets {
                facet.check(chain.base, &value)?;
            }
        }
        Ok(())
    }

    fn check_value(&self, type_ref: &'s TypeRef, raw: &str) -> Result<(), String> {
        match self.resolve(type_ref)? {
            Resolved::Simple(chain) => self.check_simple(&chain, raw),
            Resolved::Complex(_) => Err("A complex type cannot describe a text value".to_string()),
        }
    }

    fn element(&mut self, node: Node, decl: &'s ElementDecl) {
        let name = node.tag_name().name();
        match self.resolve(&decl.type_ref) {
            Err(message) => self.report(node, format!("Element '{}': {}", name, message)),
            Ok(Resolved::Simple(chain)) if chain.base == BuiltinType::AnyType => {}
            Ok(Resolved::Simple(chain)) => {
                self.no_foreign_attributes(node, &[]);
                if let Some(child) = node.children().find(Node::is_element) {
                    self.report(
                        child,
                        format!(
                            "Element '{}' has a simple type and cannot contain element '{}'",
                            name,
                            child.tag_name().name()
                        ),
                    );
                    return;
                }
                let text = text_content(node);
                if let Err(message) = self.check_simple(&chain, &text) {
                    self.report(node, format!("Element '{}': {}", name, message));
                }
            }
            Ok(Resolved::Complex(complex)) => self.complex(node, complex),
        }
    }

    fn no_foreign_attributes(&mut self, node: Node, declared: &[&str]) {
        for attribute in node.attributes() {
            if attribute.namespace() == Some(XSI_NAMESPACE) || declared.contains(&attribute.name()) {
                continue;
            }
            self.report(
                node,
                format!(
                    "Attribute '{}' is not allowed on element '{}'",
                    attribute.name(),
                    node.tag_name().name()
                ),
            );
        }
    }

    fn complex(&mut self, node: Node, complex: &'s ComplexType) {
        let name = node.tag_name().name();
        let declared: Vec<&str> = complex.attributes.iter().map(|a| a.name.as_str()).collect();
        self.no_foreign_attributes(node, &declared);
        for attribute in &complex.attributes {
            match node.attribute(attribute.name.as_str()) {
                Some(value) => {
                    if let Err(message) = self.check_value(&attribute.type_ref, value) {
                        self.report(
                            node,
                            format!("Attribute '{}' of '{}': {}", attribute.name, name, message),
                        );
                    }
                }
                None if attribute.required => self.report(
                    node,
                    format!(
                        "Element '{}' is missing required attribute '{}'",
                        name, attribute.name
                    ),
                ),
                None => {}
            }
        }

        let children: Vec<Node> = node.children().filter(Node::is_element).collect();
        if !complex.mixed && !matches!(complex.content, Content::Simple(_)) {
            if let Some(text) = node
                .children()
                .find(|c| c.is_text() && !c.text().unwrap_or("").trim().is_empty())
            {
                self.report(
                    text,
                    format!("Element '{}' cannot contain text", name),
                );
            }
        }

        match &complex.content {
            Content::Empty => {
                if let Some(child) = children.first() {
                    self.report(
                        *child,
                        format!(
                            "Element '{}' must be empty, found '{}'",
                            name,
                            child.tag_name().name()
                        ),
                    );
                }
            }
            Content::Simple(type_ref) => {
                if let Some(child) = children.first() {
                    self.report(
                        *child,
                        format!(
                            "Element '{}' cannot contain element '{}'",
                            name,
                            child.tag_name().name()
                        ),
                    );
                } else if let Err(message) = self.check_value(type_ref, &text_content(node)) {
                    self.report(node, format!("Element '{}': {}", name, message));
                }
            }
            Content::Elements(particle) => self.element_content(node, particle, &children),
        }
    }

    fn element_content(&mut self, node: Node, particle: &'s Particle, children: &[Node]) {
        let name = node.tag_name().name();
        let mut matcher = Matcher {
            schema: self.schema,
            children,
            assigned: Vec::new(),
            furthest: 0,
        };
        match matcher.particle(particle, 0) {
            Some(end) if end == children.len() => {
                for (child, decl) in matcher.assigned {
                    self.element(child, decl);
                }
            }
            outcome => {
                let stop = outcome.unwrap_or(0).max(matcher.furthest);
                match children.get(stop) {
                    Some(child) => self.report(
                        *child,
                        format!(
                            "Element '{}' is not expected here in '{}'",
                            child.tag_name().name(),
                            name
                        ),
                    ),
                    None => self.report(
                        node,
                        format!(
                            "Element '{}' is incomplete: expected {}",
                            name,
                            describe(particle)
                        ),
                    ),
                }
                // Keep validating the children whose declarations are known.
                for child in children {
                    if let Some(decl) = find_declaration(self.schema, particle, child.tag_name().name()) {
                        self.element(*child, decl);
                    }
                }
            }
        }
    }
}

fn text_content(node: Node) -> String {
    node.children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect()
}

/// Greedy matching of child elements against a content model.
struct Matcher<'s, 'c, 'a, 'input: 'a> {
    schema: &'s Schema,
    children: &'c [Node<'a, 'input>],
    assigned: Vec<(Node<'a, 'input>, &'s ElementDecl)>,
    /// Children consumed by the longest partial match.
    furthest: usize,
}

impl<'s, 'a, 'input: 'a> Matcher<'s, '_, 'a, 'input> {
    fn element_decl(&self, term: &'s Term) -> Option<&'s ElementDecl> {
        match term {
            Term::Element(decl) => Some(decl.as_ref()),
            Term::Ref(name) => self.schema.elements.get(name).map(Arc::as_ref),
            _ => None,
        }
    }

    fn names_match(decl: &ElementDecl, node: Node) -> bool {
        decl.name == node.tag_name().name() && decl.namespace.as_deref() == node.tag_name().namespace()
    }

    /// Matches `particle` from child `pos`; returns the position after it.
    fn particle(&mut self, particle: &'s Particle, mut pos: usize) -> Option<usize> {
        let mut count = 0;
        while particle.max.is_none_or(|max| count < max) {
            let saved = self.assigned.len();
            match self.term(&particle.term, pos) {
                Some(next) if next > pos => {
                    pos = next;
                    count += 1;
                }
                Some(_) => {
                    // Matched without consuming: further repetitions add nothing.
                    count = count.max(particle.min);
                    break;
                }
                None => {
                    self.assigned.truncate(saved);
                    break;
                }
            }
        }
        (count >= particle.min).then_some(pos)
    }

    fn term(&mut self, term: &'s Term, pos: usize) -> Option<usize> {
        match term {
            Term::Element(_) | Term::Ref(_) => {
                let decl = self.element_decl(term)?;
                let child = *self.children.get(pos)?;
                if Self::names_match(decl, child) {
                    self.assigned.push((child, decl));
                    self.furthest = self.furthest.max(pos + 1);
                    Some(pos + 1)
                } else {
                    None
                }
            }
            Term::Sequence(particles) => {
                let mut pos = pos;
                for particle in particles {
                    pos = self.particle(particle, pos)?;
                }
                Some(pos)
            }
            Term::Choice(particles) => {
                let mut empty_match = None;
                for particle in particles {
                    let saved = self.assigned.len();
                    match self.particle(particle, pos) {
                        Some(next) if next > pos => return Some(next),
                        Some(next) => {
                            empty_match = empty_match.or(Some(next));
                            self.assigned.truncate(saved);
                        }
                        None => self.assigned.truncate(saved),
                    }
                }
                empty_match
            }
            Term::All(particles) => {
                let mut used = vec![false; particles.len()];
                let mut pos = pos;
                'children: while let Some(child) = self.children.get(pos).copied() {
                    for (i, particle) in particles.iter().enumerate() {
                        if used[i] {
                            continue;
                        }
                        let matches = self
                            .element_decl(&particle.term)
                            .is_some_and(|decl| Self::names_match(decl, child));
                        if matches {
                            pos = self.particle(particle, pos)?;
                            used[i] = true;
                            continue 'children;
                        }
                    }
                    break;
                }
                let complete = particles
                    .iter()
                    .zip(&used)
                    .all(|(particle, used)| *used || particle.min == 0);
                complete.then_some(pos)
            }
        }
    }
}

fn find_declaration<'s>(schema: &'s Schema, particle: &'s Particle, name: &str) -> Option<&'s ElementDecl> {
    match &particle.term {
        Term::Element(decl) => (decl.name == name).then_some(decl.as_ref()),
        Term::Ref(reference) => (reference == name)
            .then(|| schema.elements.get(reference).map(Arc::as_ref))
            .flatten(),
        Term::Sequence(particles) | Term::Choice(particles) | Term::All(particles) => particles
            .iter()
            .find_map(|p| find_declaration(schema, p, name)),
    }
}

fn describe(particle: &Particle) -> String {
    match &particle.term {
        Term::Element(decl) => format!("'{}'", decl.name),
        Term::Ref(name) => format!("'{}'", name),
        Term::Sequence(particles) | Term::All(particles) => particles
            .iter()
            .filter(|p| p.min > 0)
            .map(describe)
            .collect::<Vec<_>>()
            .join(", "),
        Term::Choice(particles) => particles
            .iter()
            .map(describe)
            .collect::<Vec<_>>()
            .join(" or "),
    }
}
