use clap::{Arg, ArgAction, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::path::PathBuf;

const EXAMPLES: &str = "\
Examples:
  webhooker connect abc123 --forward http://localhost:3000
  webhooker connect abc123 --forward http://localhost:8080/webhooks --verbose
  webhooker connect abc123 --server wss://webhooker.site --forward http://localhost:3000";

#[derive(Parser, Debug)]
#[command(
    name = "webhooker",
    version,
    about = "Forward webhooks to your local server",
    after_help = EXAMPLES
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to webhooker server and forward webhooks
    Connect(ConnectArgs),
    /// Print version information
    Version,
}

#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Account token issued by webhooker
    pub token: String,

    /// Server URL [default: wss://webhooker.site]
    #[arg(long)]
    pub server: Option<String>,

    /// Local URL to forward webhooks to (required unless set in the config file)
    #[arg(long)]
    pub forward: Option<String>,

    /// Include response bodies in forwarded-webhook events
    #[arg(long)]
    pub verbose: bool,

    /// Path to a YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Build the full command, with `-v` accepted alongside `--version`.
pub fn command() -> clap::Command {
    Cli::command().disable_version_flag(true).arg(
        Arg::new("version")
            .short('v')
            .long("version")
            .action(ArgAction::Version)
            .help("Print version information"),
    )
}

/// Parse the process arguments.
pub fn parse() -> Result<Cli, clap::Error> {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    Cli::from_arg_matches(&matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn connect_with_all_options() {
        let cli = parse_from([
            "webhooker",
            "connect",
            "abc123",
            "--server",
            "wss://relay.example",
            "--forward",
            "http://localhost:3000",
            "--verbose",
        ])
        .unwrap();

        let Some(Command::Connect(args)) = cli.command else {
            panic!("expected connect command");
        };
        assert_eq!(args.token, "abc123");
        assert_eq!(args.server.as_deref(), Some("wss://relay.example"));
        assert_eq!(args.forward.as_deref(), Some("http://localhost:3000"));
        assert!(args.verbose);
        assert!(args.config.is_none());
    }

    #[test]
    fn no_arguments_means_no_command() {
        let cli = parse_from(["webhooker"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn version_subcommand() {
        let cli = parse_from(["webhooker", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
    }

    #[test]
    fn version_flags_display_version() {
        for flag in ["-v", "--version"] {
            let err = parse_from(["webhooker", flag]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DisplayVersion, "flag {flag}");
        }
    }

    #[test]
    fn help_forms_display_help() {
        let forms = [
            vec!["webhooker", "-h"],
            vec!["webhooker", "--help"],
            vec!["webhooker", "help"],
        ];
        for args in forms {
            let err = parse_from(args.clone()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DisplayHelp, "args {args:?}");
        }
    }

    #[test]
    fn unknown_command_is_an_error() {
        let err = parse_from(["webhooker", "listen"]).unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::InvalidSubcommand | ErrorKind::UnknownArgument),
            "unexpected kind: {:?}",
            err.kind()
        );
    }

    #[test]
    fn connect_requires_token() {
        let err = parse_from(["webhooker", "connect"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn command_definition_is_consistent() {
        command().debug_assert();
    }
}
