use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "apkport", version, about = "Move application packages and their data in and out of archives")]
pub struct Cli {
    #[arg(long, short, global = true, env = "APKPORT_CONFIG", help = "Configuration file (TOML, JSON or YAML)")]
    pub config: Option<PathBuf>,
    #[arg(long, short, global = true, action = ArgAction::Count, help = "Log more (repeat for trace output)")]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List importable archives.
    Scan,
    /// Import scanned archives and packages.
    Import {
        #[arg(long, short, help = "Replace existing data and expansion files without asking")]
        yes: bool,
        #[arg(long, help = "Do not restore packages")]
        no_apk: bool,
        #[arg(long, help = "Do not restore application data")]
        no_data: bool,
        #[arg(long, help = "Do not restore expansion files")]
        no_obb: bool,
        /// Only import candidates whose file name contains one of these
        /// (case-insensitive).
        filter: Vec<String>,
    },
    /// Export an installed application.
    Export {
        #[arg(long, help = "Package name, e.g. com.example.app")]
        package: String,
        #[arg(long, help = "Display label (defaults to the package name)")]
        name: Option<String>,
        #[arg(long, default_value = "")]
        version_name: String,
        #[arg(long, default_value_t = 0)]
        version_code: i64,
        #[arg(long, help = "Base package file")]
        apk: PathBuf,
        #[arg(long = "split", help = "Split package file (repeatable)")]
        splits: Vec<PathBuf>,
        #[arg(long, help = "Include application data")]
        data: bool,
        #[arg(long, help = "Include expansion files")]
        obb: bool,
        #[arg(long, short, help = "Proceed when the output name is already taken")]
        yes: bool,
    },
    /// Check that a serialized transfer request fits within the peer limit.
    CheckRequest { file: PathBuf },
}
