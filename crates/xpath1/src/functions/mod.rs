//! The function library: XPath 1.0 core functions, the XSLT additions, and
//! dispatch to host extension functions.

mod number_format;

pub use number_format::DecimalFormat;

use super::engine::{EvaluationContext, XPathValue, format_number_value, string_to_number};
use crate::axes;
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Function names with this prefix are dispatched to host functions.
pub const HOST_PREFIX: &str = "host:";

/// A value crossing the boundary to a host function. Node-sets arrive as
/// the string values of their members.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    String(String),
    Number(f64),
    Boolean(bool),
    NodeSet(Vec<String>),
}

impl HostValue {
    /// The XPath string conversion of the value.
    pub fn as_string(&self) -> String {
        match self {
            HostValue::String(s) => s.clone(),
            HostValue::Number(n) => format_number_value(*n),
            HostValue::Boolean(b) => b.to_string(),
            HostValue::NodeSet(values) => values.first().cloned().unwrap_or_default(),
        }
    }
}

/// A host callback exposed to stylesheets.
pub type HostFunction = Arc<dyn Fn(&[HostValue]) -> Result<HostValue, String> + Send + Sync>;

/// Names of the functions this crate implements natively.
const CORE_FUNCTIONS: &[&str] = &[
    "last",
    "position",
    "count",
    "id",
    "local-name",
    "namespace-uri",
    "name",
    "string",
    "concat",
    "starts-with",
    "contains",
    "substring-before",
    "substring-after",
    "substring",
    "string-length",
    "normalize-space",
    "translate",
    "boolean",
    "not",
    "true",
    "false",
    "lang",
    "number",
    "sum",
    "floor",
    "ceiling",
    "round",
    "key",
    "format-number",
    "current",
    "unparsed-entity-uri",
    "generate-id",
    "system-property",
    "element-available",
    "function-available",
];

/// The function environment of one evaluation: host callbacks allowed for
/// this run, decimal formats, and the instruction names `element-available()`
/// reports.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    host: HashMap<String, HostFunction>,
    decimal_formats: HashMap<String, DecimalFormat>,
    elements: HashSet<String>,
    /// When set, a failing host call evaluates to `""` and the failure is
    /// queued for [`FunctionRegistry::take_host_failures`].
    lenient_host: bool,
    host_failures: RefCell<Vec<XPathError>>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut host: Vec<&String> = self.host.keys().collect();
        host.sort();
        f.debug_struct("FunctionRegistry")
            .field("host", &host)
            .field("decimal_formats", &self.decimal_formats.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_host(&mut self, name: impl Into<String>, function: HostFunction) {
        self.host.insert(name.into(), function);
    }

    pub fn host(&self, name: &str) -> Option<&HostFunction> {
        self.host.get(name)
    }

    pub fn set_lenient_host(&mut self, lenient: bool) {
        self.lenient_host = lenient;
    }

    /// Host call failures swallowed since the last call, oldest first.
    pub fn take_host_failures(&self) -> Vec<XPathError> {
        std::mem::take(&mut *self.host_failures.borrow_mut())
    }

    /// Sets a named decimal format; `None` replaces the default format.
    pub fn set_decimal_format(&mut self, name: Option<&str>, format: DecimalFormat) {
        self.decimal_formats
            .insert(name.unwrap_or_default().to_string(), format);
    }

    pub fn decimal_format(&self, name: Option<&str>) -> Option<DecimalFormat> {
        match self.decimal_formats.get(name.unwrap_or_default()) {
            Some(format) => Some(format.clone()),
            None if name.is_none() => Some(DecimalFormat::default()),
            None => None,
        }
    }

    pub fn set_available_elements<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements = names.into_iter().map(Into::into).collect();
    }

    /// Whether `function-available()` should report `name` as callable.
    pub fn is_available(&self, name: &str) -> bool {
        if let Some(host_name) = name.strip_prefix(HOST_PREFIX) {
            return host_name == "function" || self.host.contains_key(host_name);
        }
        match name.split_once(':') {
            Some((_, local)) => self.host.contains_key(local),
            None => CORE_FUNCTIONS.contains(&name),
        }
    }
}

/// Returns true for the names [`evaluate_function`] implements itself.
pub fn is_core_function(name: &str) -> bool {
    CORE_FUNCTIONS.contains(&name)
}

/// Dispatches a function call to the correct implementation.
pub fn evaluate_function<'a, 'd, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    if let Some(host_name) = name.strip_prefix(HOST_PREFIX) {
        return call_host(host_name, args, e_ctx);
    }
    match name {
        // Node-set
        "last" => no_args(name, &args).map(|_| XPathValue::Number(e_ctx.context_size as f64)),
        "position" => {
            no_args(name, &args).map(|_| XPathValue::Number(e_ctx.context_position as f64))
        }
        "count" => func_count(args),
        "id" => func_id(args, e_ctx),
        "local-name" => func_local_name(args, e_ctx),
        "namespace-uri" => func_namespace_uri(args, e_ctx),
        "name" => func_name(args, e_ctx),

        // String
        "string" => func_string(args, e_ctx),
        "concat" => func_concat(args),
        "starts-with" => string_pair(name, args, |s1, s2| XPathValue::Boolean(s1.starts_with(s2))),
        "contains" => string_pair(name, args, |s1, s2| XPathValue::Boolean(s1.contains(s2))),
        "substring-before" => string_pair(name, args, |s1, s2| {
            XPathValue::String(s1.find(s2).map(|i| s1[..i].to_string()).unwrap_or_default())
        }),
        "substring-after" => string_pair(name, args, |s1, s2| {
            XPathValue::String(
                s1.find(s2)
                    .map(|i| s1[i + s2.len()..].to_string())
                    .unwrap_or_default(),
            )
        }),
        "substring" => func_substring(args),
        "string-length" => func_string_length(args, e_ctx),
        "normalize-space" => func_normalize_space(args, e_ctx),
        "translate" => func_translate(args),

        // Boolean
        "boolean" => one_arg(name, args).map(|v| XPathValue::Boolean(v.to_bool())),
        "not" => one_arg(name, args).map(|v| XPathValue::Boolean(!v.to_bool())),
        "true" => no_args(name, &args).map(|_| XPathValue::Boolean(true)),
        "false" => no_args(name, &args).map(|_| XPathValue::Boolean(false)),
        "lang" => func_lang(args, e_ctx),

        // Number
        "number" => func_number(args, e_ctx),
        "sum" => func_sum(args),
        "floor" => one_arg(name, args).map(|v| XPathValue::Number(v.to_number().floor())),
        "ceiling" => one_arg(name, args).map(|v| XPathValue::Number(v.to_number().ceil())),
        "round" => one_arg(name, args).map(|v| XPathValue::Number(xpath_round(v.to_number()))),

        // XSLT additions
        "current" => no_args(name, &args).map(|_| XPathValue::NodeSet(vec![e_ctx.current_node])),
        "key" => func_key(args, e_ctx),
        "generate-id" => func_generate_id(args, e_ctx),
        "format-number" => func_format_number(args, e_ctx),
        "system-property" => func_system_property(args),
        "function-available" => one_arg(name, args)
            .map(|v| XPathValue::Boolean(e_ctx.functions.is_available(&v.to_string()))),
        "element-available" => one_arg(name, args)
            .map(|v| XPathValue::Boolean(e_ctx.functions.elements.contains(&v.to_string()))),
        "unparsed-entity-uri" => one_arg(name, args).map(|_| XPathValue::String(String::new())),
        "document" => Err(XPathError::FunctionError {
            function: "document()".to_string(),
            message: "loading external documents is disabled".to_string(),
        }),

        _ => Err(XPathError::UnknownFunction(name.to_string())),
    }
}

// --- Argument helpers ---

fn no_args<N>(name: &str, args: &[XPathValue<N>]) -> Result<(), XPathError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(XPathError::arity(name, "0 arguments"))
    }
}

fn one_arg<N>(name: &str, mut args: Vec<XPathValue<N>>) -> Result<XPathValue<N>, XPathError> {
    if args.len() == 1 {
        Ok(args.remove(0))
    } else {
        Err(XPathError::arity(name, "1 argument"))
    }
}

/// Takes the optional single argument, defaulting to the context node.
fn optional_node_arg<'a, N: DataSourceNode<'a>>(
    name: &str,
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Option<N>, XPathError> {
    match args.len() {
        0 => Ok(Some(e_ctx.context_node)),
        1 => {
            let nodes = args
                .remove(0)
                .into_nodes(&format!("The argument of {}()", name))?;
            Ok(nodes.into_iter().min())
        }
        _ => Err(XPathError::arity(name, "0 or 1 arguments")),
    }
}

/// Takes the optional single argument as a string, defaulting to the
/// context node's string value.
fn optional_string_arg<'a, N: DataSourceNode<'a>>(
    name: &str,
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<String, XPathError> {
    match args.len() {
        0 => Ok(e_ctx.context_node.string_value()),
        1 => Ok(args.remove(0).to_string()),
        _ => Err(XPathError::arity(name, "0 or 1 arguments")),
    }
}

fn string_pair<'a, N, F>(name: &str, args: Vec<XPathValue<N>>, f: F) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a>,
    F: FnOnce(&str, &str) -> XPathValue<N>,
{
    if args.len() != 2 {
        return Err(XPathError::arity(name, "2 arguments"));
    }
    Ok(f(&args[0].to_string(), &args[1].to_string()))
}

/// XPath `round()`: halves go towards positive infinity.
fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        return n;
    }
    if (-0.5..0.0).contains(&n) {
        return -0.0;
    }
    (n + 0.5).floor()
}

// --- Host Extension Functions ---

fn call_host<'a, N: DataSourceNode<'a>>(
    name: &str,
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    match invoke_host(name, args, e_ctx) {
        Err(err) if e_ctx.functions.lenient_host => {
            e_ctx.functions.host_failures.borrow_mut().push(err);
            Ok(XPathValue::String(String::new()))
        }
        result => result,
    }
}

fn invoke_host<'a, N: DataSourceNode<'a>>(
    name: &str,
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    // `function('name', args...)` names the callback in its first argument.
    let target = if name == "function" {
        if args.is_empty() {
            return Err(XPathError::arity("function", "at least 1 argument"));
        }
        args.remove(0).to_string()
    } else {
        name.to_string()
    };
    let function = e_ctx.functions.host(&target).ok_or_else(|| XPathError::HostFunction {
        name: target.clone(),
        message: "not registered for this transform".to_string(),
    })?;
    let host_args: Vec<HostValue> = args.into_iter().map(to_host_value).collect();
    match function(&host_args) {
        Ok(HostValue::String(s)) => Ok(XPathValue::String(s)),
        Ok(HostValue::Number(n)) => Ok(XPathValue::Number(n)),
        Ok(HostValue::Boolean(b)) => Ok(XPathValue::Boolean(b)),
        Ok(HostValue::NodeSet(values)) => Ok(XPathValue::String(values.concat())),
        Err(message) => Err(XPathError::HostFunction {
            name: target,
            message,
        }),
    }
}

fn to_host_value<'a, N: DataSourceNode<'a>>(value: XPathValue<N>) -> HostValue {
    match value {
        XPathValue::NodeSet(nodes) => {
            HostValue::NodeSet(nodes.iter().map(|n| n.string_value()).collect())
        }
        XPathValue::Number(n) => HostValue::Number(n),
        XPathValue::Boolean(b) => HostValue::Boolean(b),
        other => HostValue::String(other.to_string()),
    }
}

// --- Core & Node-Set Functions ---

fn func_count<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let nodes = one_arg("count", args)?.into_nodes("The argument of count()")?;
    Ok(XPathValue::Number(nodes.len() as f64))
}

fn func_id<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let wanted: Vec<String> = match one_arg("id", args)? {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
        other => vec![other.to_string()],
    };
    let ids_to_find: HashSet<&str> = wanted.iter().flat_map(|s| s.split_whitespace()).collect();
    if ids_to_find.is_empty() {
        return Ok(XPathValue::NodeSet(vec![]));
    }

    let mut descendants = Vec::new();
    axes::collect_descendants(e_ctx.root_node, &mut descendants);
    let results = descendants
        .into_iter()
        .filter(|node| node.node_type() == NodeType::Element)
        .filter(|node| {
            node.attributes().any(|attr| {
                attr.name().is_some_and(|q| {
                    q.local_part == "id" && matches!(q.prefix, None | Some("xml"))
                }) && ids_to_find.contains(attr.string_value().as_str())
            })
        })
        .collect();
    Ok(XPathValue::NodeSet(results))
}

fn func_key<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    if args.len() != 2 {
        return Err(XPathError::arity("key", "2 arguments"));
    }

    let key_value_arg = args.remove(1);
    let key_name = args.remove(0).to_string();

    let key_index = e_ctx
        .key_indexes
        .get(&key_name)
        .ok_or_else(|| XPathError::FunctionError {
            function: "key()".to_string(),
            message: format!("no xsl:key named '{}'", key_name),
        })?;

    let key_values = match key_value_arg {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
        other => vec![other.to_string()],
    };

    let mut result_nodes: Vec<N> = key_values
        .iter()
        .filter_map(|value| key_index.get(value))
        .flatten()
        .copied()
        .collect();
    result_nodes.sort();
    result_nodes.dedup();
    Ok(XPathValue::NodeSet(result_nodes))
}

fn func_local_name<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let node = optional_node_arg("local-name", args, e_ctx)?;
    let name = node
        .and_then(|n| n.name().map(|q| q.local_part.to_string()))
        .unwrap_or_default();
    Ok(XPathValue::String(name))
}

fn func_namespace_uri<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let node = optional_node_arg("namespace-uri", args, e_ctx)?;
    let uri = node
        .and_then(|n| n.namespace_uri())
        .unwrap_or_default()
        .to_string();
    Ok(XPathValue::String(uri))
}

fn func_name<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let node = optional_node_arg("name", args, e_ctx)?;
    let name = node
        .and_then(|n| n.name().map(|q| q.qualified()))
        .unwrap_or_default();
    Ok(XPathValue::String(name))
}

fn func_generate_id<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    match optional_node_arg("generate-id", args, e_ctx)? {
        Some(node) => {
            let mut hasher = DefaultHasher::new();
            node.hash(&mut hasher);
            // Prefixed with a letter so the id is a valid NCName.
            Ok(XPathValue::String(format!("id{:x}", hasher.finish())))
        }
        None => Ok(XPathValue::String(String::new())),
    }
}

// --- String Functions ---

fn func_string<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    optional_string_arg("string", args, e_ctx).map(XPathValue::String)
}

fn func_concat<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    if args.len() < 2 {
        return Err(XPathError::arity("concat", "at least 2 arguments"));
    }
    let result = args.iter().map(|v| v.to_string()).collect::<String>();
    Ok(XPathValue::String(result))
}

fn func_substring<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    if !(2..=3).contains(&args.len()) {
        return Err(XPathError::arity("substring", "2 or 3 arguments"));
    }
    let length_val = if args.len() == 3 {
        Some(args.remove(2).to_number())
    } else {
        None
    };
    let start_val = args.remove(1).to_number();
    let s = args.remove(0).to_string();

    let first = xpath_round(start_val);
    let last = match length_val {
        Some(l) => first + xpath_round(l),
        None => f64::INFINITY,
    };

    let result = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let pos = (i + 1) as f64; // XPath positions are 1-based
            pos >= first && pos < last
        })
        .map(|(_, c)| c)
        .collect::<String>();
    Ok(XPathValue::String(result))
}

fn func_string_length<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let s = optional_string_arg("string-length", args, e_ctx)?;
    Ok(XPathValue::Number(s.chars().count() as f64))
}

fn func_normalize_space<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let s = optional_string_arg("normalize-space", args, e_ctx)?;
    Ok(XPathValue::String(
        s.split_whitespace().collect::<Vec<_>>().join(" "),
    ))
}

fn func_translate<'a, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    if args.len() != 3 {
        return Err(XPathError::arity("translate", "3 arguments"));
    }
    let to_str: Vec<char> = args.remove(2).to_string().chars().collect();
    let from_str: Vec<char> = args.remove(1).to_string().chars().collect();
    let source_str = args.remove(0).to_string();
    let result = source_str
        .chars()
        .filter_map(|c| match from_str.iter().position(|&fc| fc == c) {
            Some(pos) => to_str.get(pos).copied(),
            None => Some(c),
        })
        .collect::<String>();
    Ok(XPathValue::String(result))
}

// --- Boolean Functions ---

fn func_lang<'a, 'd, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    let test_lang = one_arg("lang", args)?.to_string().to_lowercase();
    let mut current = Some(e_ctx.context_node);
    if current.is_some_and(|n| n.node_type() != NodeType::Element) {
        current = current.and_then(|n| n.parent());
    }

    while let Some(node) = current {
        let declared = node.attributes().find(|attr| {
            attr.name()
                .is_some_and(|q| q.prefix == Some("xml") && q.local_part == "lang")
        });
        if let Some(attr) = declared {
            // The nearest xml:lang decides; "en" also matches "en-GB".
            let node_lang = attr.string_value().to_lowercase();
            let matches =
                node_lang == test_lang || node_lang.starts_with(&format!("{}-", test_lang));
            return Ok(XPathValue::Boolean(matches));
        }
        current = node.parent();
    }
    Ok(XPathValue::Boolean(false))
}

// --- Number Functions ---

fn func_number<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    match args.len() {
        0 => Ok(XPathValue::Number(string_to_number(
            &e_ctx.context_node.string_value(),
        ))),
        1 => Ok(XPathValue::Number(args.remove(0).to_number())),
        _ => Err(XPathError::arity("number", "0 or 1 arguments")),
    }
}

fn func_sum<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let nodes = one_arg("sum", args)?.into_nodes("The argument of sum()")?;
    let sum = nodes
        .iter()
        .map(|node| string_to_number(&node.string_value()))
        .sum();
    Ok(XPathValue::Number(sum))
}

fn func_format_number<'a, 'd, N: DataSourceNode<'a>>(
    mut args: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, 'd, N>,
) -> Result<XPathValue<N>, XPathError> {
    if !(2..=3).contains(&args.len()) {
        return Err(XPathError::arity("format-number", "2 or 3 arguments"));
    }
    let format_name = if args.len() == 3 {
        Some(args.remove(2).to_string())
    } else {
        None
    };
    let pattern = args.remove(1).to_string();
    let value = args.remove(0).to_number();
    let format = e_ctx
        .functions
        .decimal_format(format_name.as_deref())
        .ok_or_else(|| XPathError::FunctionError {
            function: "format-number()".to_string(),
            message: format!(
                "unknown decimal format '{}'",
                format_name.clone().unwrap_or_default()
            ),
        })?;
    format
        .format(value, &pattern)
        .map(XPathValue::String)
        .map_err(|message| XPathError::FunctionError {
            function: "format-number()".to_string(),
            message,
        })
}

fn func_system_property<'a, N: DataSourceNode<'a>>(
    args: Vec<XPathValue<N>>,
) -> Result<XPathValue<N>, XPathError> {
    let property = one_arg("system-property", args)?.to_string();
    let value = match property.split_once(':').map(|(_, local)| local) {
        Some("version") => return Ok(XPathValue::Number(1.0)),
        Some("vendor") => "folio",
        Some("vendor-url") => "https://github.com/folio-xslt/folio",
        _ => "",
    };
    Ok(XPathValue::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::engine::EvaluationContext;

    struct TestSetup<'a> {
        tree: &'a MockTree<'a>,
        funcs: FunctionRegistry,
        vars: HashMap<String, XPathValue<MockNode<'a>>>,
        keys: HashMap<String, HashMap<String, Vec<MockNode<'a>>>>,
    }

    impl<'a> TestSetup<'a> {
        fn new(tree: &'a MockTree<'a>) -> Self {
            TestSetup {
                tree,
                funcs: FunctionRegistry::default(),
                vars: HashMap::new(),
                keys: HashMap::new(),
            }
        }

        fn context<'s>(
            &'s self,
            context_node_id: usize,
            pos: usize,
            size: usize,
        ) -> EvaluationContext<'a, 's, MockNode<'a>> {
            EvaluationContext::new(
                self.tree.node(context_node_id),
                self.tree.node(0),
                &self.funcs,
                pos,
                size,
                &self.vars,
                &self.keys,
                false,
            )
        }
    }

    fn call<'a>(
        name: &str,
        args: Vec<XPathValue<MockNode<'a>>>,
        e_ctx: &EvaluationContext<'a, '_, MockNode<'a>>,
    ) -> XPathValue<MockNode<'a>> {
        evaluate_function(name, args, e_ctx).unwrap()
    }

    fn s<'a>(value: &str) -> XPathValue<MockNode<'a>> {
        XPathValue::String(value.to_string())
    }

    #[test]
    fn test_string_functions() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let ctx = setup.context(0, 1, 1);
        assert_eq!(
            call("concat", vec![s("Hello"), s(" "), XPathValue::Number(42.0)], &ctx).to_string(),
            "Hello 42"
        );
        assert!(call("starts-with", vec![s("abcdef"), s("abc")], &ctx).to_bool());
        assert!(!call("contains", vec![s("abcdef"), s("xyz")], &ctx).to_bool());
        assert_eq!(
            call("substring-before", vec![s("1999/04/01"), s("/")], &ctx).to_string(),
            "1999"
        );
        assert_eq!(
            call("substring-after", vec![s("1999/04/01"), s("/")], &ctx).to_string(),
            "04/01"
        );
        assert_eq!(
            call("translate", vec![s("BAR"), s("ABC"), s("abc")], &ctx).to_string(),
            "baR"
        );
        assert_eq!(
            call("normalize-space", vec![s("  a \n b  ")], &ctx).to_string(),
            "a b"
        );
    }

    #[test]
    fn test_func_substring_rounding() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let ctx = setup.context(0, 1, 1);
        let sub = |args| call("substring", args, &ctx).to_string();
        assert_eq!(
            sub(vec![s("12345"), XPathValue::Number(2.0), XPathValue::Number(3.0)]),
            "234"
        );
        assert_eq!(sub(vec![s("12345"), XPathValue::Number(2.0)]), "2345");
        assert_eq!(
            sub(vec![s("12345"), XPathValue::Number(1.5), XPathValue::Number(2.6)]),
            "234"
        );
        assert_eq!(
            sub(vec![s("12345"), XPathValue::Number(0.0), XPathValue::Number(3.0)]),
            "12"
        );
        assert_eq!(
            sub(vec![s("12345"), XPathValue::Number(f64::NAN), XPathValue::Number(3.0)]),
            ""
        );
    }

    #[test]
    fn test_context_defaults() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let para = setup.context(1, 1, 1);
        assert_eq!(call("string-length", vec![], &para).to_number(), 5.0);
        assert_eq!(call("local-name", vec![], &para).to_string(), "para");
        assert_eq!(call("name", vec![], &setup.context(4, 1, 1)).to_string(), "");
    }

    #[test]
    fn test_func_lang() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let text = setup.context(4, 1, 1);
        let div = setup.context(5, 1, 1);
        assert!(call("lang", vec![s("en")], &text).to_bool());
        assert!(!call("lang", vec![s("en-GB")], &text).to_bool());
        assert!(!call("lang", vec![s("en")], &div).to_bool());
    }

    #[test]
    fn test_number_functions() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let ctx = setup.context(0, 1, 1);
        let round = |n| call("round", vec![XPathValue::Number(n)], &ctx).to_number();
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(2.4), 2.0);
        assert_eq!(round(-2.5), -2.0);
        assert_eq!(round(-2.6), -3.0);
        let paras = XPathValue::NodeSet(vec![tree.node(1), tree.node(6)]);
        assert!(call("sum", vec![paras], &ctx).to_number().is_nan());
        assert_eq!(call("number", vec![s(" 12 ")], &ctx).to_number(), 12.0);
        assert_eq!(
            call("format-number", vec![XPathValue::Number(1234.5), s("#,##0.00")], &ctx)
                .to_string(),
            "1,234.50"
        );
    }

    #[test]
    fn test_position_and_last() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let ctx = setup.context(1, 2, 5);
        assert_eq!(call("last", vec![], &ctx).to_number(), 5.0);
        assert_eq!(call("position", vec![], &ctx).to_number(), 2.0);
    }

    #[test]
    fn test_func_key() {
        let tree = create_test_tree();
        let para = tree.node(1);
        let attr = tree.node(2);

        let mut index = HashMap::new();
        index.insert("p1".to_string(), vec![para]);
        let mut setup = TestSetup::new(&tree);
        setup.keys.insert("by-id".to_string(), index);
        let ctx = setup.context(0, 1, 1);

        let found = call("key", vec![s("by-id"), s("p1")], &ctx);
        assert_eq!(found.into_nodes("key").unwrap(), vec![para]);

        let by_node = call("key", vec![s("by-id"), XPathValue::NodeSet(vec![attr])], &ctx);
        assert_eq!(by_node.into_nodes("key").unwrap(), vec![para]);

        let missing = call("key", vec![s("by-id"), s("nope")], &ctx);
        assert!(missing.into_nodes("key").unwrap().is_empty());

        assert!(evaluate_function("key", vec![s("undeclared"), s("p1")], &ctx).is_err());
    }

    #[test]
    fn test_id_and_generate_id() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let ctx = setup.context(0, 1, 1);
        let found = call("id", vec![s("p1 missing")], &ctx);
        assert_eq!(found.into_nodes("id").unwrap(), vec![tree.node(1)]);

        let a = call("generate-id", vec![XPathValue::NodeSet(vec![tree.node(1)])], &ctx);
        let b = call("generate-id", vec![], &setup.context(1, 1, 1));
        assert_eq!(a.to_string(), b.to_string());
        assert!(a.to_string().starts_with("id"));
    }

    #[test]
    fn test_host_functions_need_registration() {
        let tree = create_test_tree();
        let mut setup = TestSetup::new(&tree);
        setup.funcs.register_host(
            "upper",
            Arc::new(|args: &[HostValue]| {
                Ok(HostValue::String(
                    args.first().map(HostValue::as_string).unwrap_or_default().to_uppercase(),
                ))
            }),
        );
        let ctx = setup.context(1, 1, 1);
        let direct = call("host:upper", vec![s("shout")], &ctx);
        assert_eq!(direct.to_string(), "SHOUT");
        let indirect = call(
            "host:function",
            vec![s("upper"), XPathValue::NodeSet(vec![tree.node(1)])],
            &ctx,
        );
        assert_eq!(indirect.to_string(), "HELLO");

        let denied = evaluate_function("host:lower", vec![s("x")], &ctx);
        assert!(matches!(denied, Err(XPathError::HostFunction { .. })));
        assert!(setup.funcs.is_available("ext:upper"));
        assert!(!setup.funcs.is_available("ext:lower"));
    }

    #[test]
    fn test_lenient_host_calls_yield_empty_strings() {
        let tree = create_test_tree();
        let mut setup = TestSetup::new(&tree);
        setup.funcs.set_lenient_host(true);
        let ctx = setup.context(1, 1, 1);
        let result = call("host:missing", vec![s("x")], &ctx);
        assert_eq!(result.to_string(), "");
        let failures = setup.funcs.take_host_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(&failures[0], XPathError::HostFunction { name, .. } if name == "missing"));
        assert!(setup.funcs.take_host_failures().is_empty());
    }

    #[test]
    fn test_unknown_function() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let ctx = setup.context(0, 1, 1);
        assert_eq!(
            evaluate_function("no-such-fn", vec![], &ctx).unwrap_err(),
            XPathError::UnknownFunction("no-such-fn".to_string())
        );
    }
}
