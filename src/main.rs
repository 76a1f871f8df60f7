use clap::{Parser, Subcommand};
use folio::error::read_file;
use folio::{Config, ExceptionHandler, FolioError, PageException, Processor, XsltPage, XsltProcess};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Transform XML with XSLT page templates and report every problem found")]
struct Cli {
    /// Configuration file (TOML); defaults to ./folio.toml when present
    #[arg(long, short, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transform an XML document and print the result
    Transform {
        xml: PathBuf,
        xsl: PathBuf,
        /// Stylesheet parameter as name=value
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Host function the stylesheet may call
        #[arg(short = 'f', long = "function")]
        functions: Vec<String>,
    },
    /// Validate an XML document against an XML Schema
    Validate { xsd: PathBuf, xml: PathBuf },
}

fn parse_param(raw: &str) -> Result<(String, String), FolioError> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| FolioError::InvalidParameter(raw.to_string()))
}

fn transform(
    config: &Config,
    xml: PathBuf,
    xsl: PathBuf,
    params: Vec<(String, String)>,
    functions: Vec<String>,
) -> Result<bool, FolioError> {
    let mut page = XsltPage::from_config(config);
    page.set_xml(read_file(&xml)?);
    page.set_xsl_file(&xsl)?;
    page.set_runtime_params(params);
    page.register_functions(functions);

    if let Some(markup) = page.generate() {
        println!("{}", markup);
        return Ok(true);
    }
    let rendered = ExceptionHandler::from_config(config).handle(&PageException::from_page(&page));
    for record in page.processor().records() {
        log::error!("{}", record);
    }
    println!("{}", rendered.body);
    Ok(false)
}

fn validate(config: &Config, xsd: PathBuf, xml: PathBuf) -> Result<bool, FolioError> {
    let schema = read_file(&xsd)?;
    let document = read_file(&xml)?;
    let mut processor = XsltProcess::from_config(config);
    if processor.validate(&schema, Some(&document)) {
        println!("{} is valid", xml.display());
        return Ok(true);
    }
    while let Some(record) = processor.next_error() {
        eprintln!("{}: {}", xml.display(), record);
    }
    Ok(false)
}

fn run(cli: Cli) -> Result<bool, FolioError> {
    let config = Config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Transform {
            xml,
            xsl,
            params,
            functions,
        } => transform(&config, xml, xsl, params, functions),
        Command::Validate { xsd, xml } => validate(&config, xsd, xml),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}
