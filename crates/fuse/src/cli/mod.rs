use std::path::PathBuf;

use clap::Parser;

use emporous_fuse::config::{LogLevel, CACHE_DIR_ENV};

pub mod op;
pub mod ops;

pub use op::OpContext;

crate::command_enum! {
    /// Mount an Emporous collection based on content or attribute address
    #[cfg(feature = "fuse")]
    (Mount, ops::Mount),
    /// Print version information
    (Version, ops::Version),
}

#[derive(Parser, Debug)]
#[command(name = "emporous-fuse", version, about = "Emporous FUSE driver")]
pub struct Cli {
    /// Log level (debug, info, warn, error, fatal)
    #[arg(short = 'l', long = "loglevel", value_enum, default_value_t = LogLevel::Info, global = true)]
    pub loglevel: LogLevel,

    /// Cache location for pulled content
    #[arg(long, env = CACHE_DIR_ENV, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["emporous-fuse", "version", "-l", "debug", "--cache-dir", "/tmp/c"]);
        assert_eq!(cli.loglevel, LogLevel::Debug);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert!(matches!(cli.command, Command::Version(_)));
    }

    #[test]
    fn test_command_docs_become_help() {
        use clap::CommandFactory;

        let cli = Cli::command();
        let version = cli.find_subcommand("version").unwrap();
        assert_eq!(
            version.get_about().map(|about| about.to_string()),
            Some("Print version information".to_string())
        );
        #[cfg(feature = "fuse")]
        assert!(cli.find_subcommand("mount").is_some());
        #[cfg(not(feature = "fuse"))]
        assert!(cli.find_subcommand("mount").is_none());
    }

    #[tokio::test]
    async fn test_version_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = emporous_fuse::config::RootConfig::new(
            Some(temp_dir.path().to_path_buf()),
            LogLevel::Info,
        )
        .unwrap();
        let output = Command::Version(ops::Version)
            .execute(&OpContext::new(config))
            .await
            .unwrap();
        assert!(output.to_string().starts_with("emporous-fuse "));
    }
}
