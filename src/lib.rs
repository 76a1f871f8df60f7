//! XSLT page transformation with collected diagnostics.
//!
//! A [`Processor`] transforms a page's XML with its XSLT template and never
//! fails outright: every problem becomes a [`TransformError`] record tagged
//! with the phase it came from. [`XsltPage`] drives a processor and turns
//! records into a 500 status, and [`ExceptionHandler`] renders the records,
//! or any other [`PageException`], as an error page.

pub mod config;
pub mod error;
pub mod handlers;
pub mod page;
pub mod processor;

pub use config::Config;
pub use error::FolioError;
pub use handlers::{ExceptionHandler, PageException, RenderedPage};
pub use page::{PageState, XsltPage};
pub use processor::{
    ErrorLog, ErrorType, HostFunctions, Parameters, ProcessSettings, Processor, TransformError,
    UnavailableProcessor, XsltProcess,
};

pub use folio_xpath1::HostValue;
pub use folio_xslt::HOST_NAMESPACE;
