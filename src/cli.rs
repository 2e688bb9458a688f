use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, about, disable_version_flag = true)]
pub struct Opts {
    /// Path to the TOML configuration file
    #[clap(short = 'f', long = "config", value_name = "FILE", default_value = "settings.conf")]
    pub config: String,

    /// Enable verbose logging
    #[clap(short = 'v')]
    pub verbose: bool,

    /// Print version information and exit
    #[clap(short = 'V')]
    pub version: bool,
}
