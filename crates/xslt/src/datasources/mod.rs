//! Source document adapters for the XPath node model.

pub mod xml;

pub use folio_xpath1::{DataSourceNode, NodeType, QName};
pub use xml::{XmlDocument, XmlNode};
