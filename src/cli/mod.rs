use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "renlocalize")]
#[command(author, version, about = "Localization toolchain for Ren'Py visual novels", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full translation pipeline against a game
    Translate(TranslateArgs),

    /// Extract translatable strings without translating
    Scan(ScanArgs),

    /// Unpack RPA archive files
    Unpack(UnpackArgs),

    /// Pack files into an RPA archive
    Repack(RepackArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct TranslateArgs {
    /// Game directory, game/ folder, or executable inside the project
    #[arg(required = true)]
    pub input: PathBuf,

    /// Target language (Ren'Py folder name or ISO code, e.g. turkish, tr)
    #[arg(short, long)]
    pub lang: Option<String>,

    /// Source language code
    #[arg(long)]
    pub source_lang: Option<String>,

    /// Translation engine (google, deepl, openai, gemini, local_llm)
    #[arg(short, long)]
    pub engine: Option<String>,

    /// Skip automatic archive extraction
    #[arg(long, default_value_t = false)]
    pub no_auto_extract: bool,

    /// Generate translation stubs only, skip the translation stage
    #[arg(long, default_value_t = false)]
    pub template_only: bool,

    /// Scan source files for strings the stub generator missed
    #[arg(long, default_value_t = false)]
    pub deep_scan: bool,

    /// Read compiled .rpyc scripts when no .rpy source exists
    #[arg(long, default_value_t = false)]
    pub rpyc: bool,

    /// Route web engines through the proxy pool
    #[arg(long, default_value_t = false)]
    pub proxy: bool,

    /// Glossary file for consistent term translation
    #[arg(long)]
    pub glossary: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Game directory or single script file
    #[arg(required = true)]
    pub input: PathBuf,

    /// Also read compiled .rpyc/.rpymc files
    #[arg(long, default_value_t = false)]
    pub rpyc: bool,

    /// Also extract from JSON/YAML data files
    #[arg(long, default_value_t = false)]
    pub data: bool,

    /// Write the extracted entries as JSON
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct UnpackArgs {
    /// Input RPA file or directory containing RPA files
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite existing files
    #[arg(short, long, default_value_t = false)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct RepackArgs {
    /// Input directory to pack
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output RPA file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only include files with these extensions (default: rpy, rpyc, json)
    #[arg(long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },

    /// Set a configuration value (dotted key, e.g. translation.target_lang)
    Set {
        key: String,
        value: String,
    },

    /// Get a configuration value
    Get {
        key: String,
    },

    /// Show config file path
    Path,
}
