mod commands;
mod examples;
mod output;
mod theme;

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ColorChoice, CommandFactory, FromArgMatches, Parser, Subcommand};

use commands::{
    schema::{SchemaCommands, handle_schema_commands},
    submit::{SubmitArgs, handle_submit},
};
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{MARKS, PALETTE, USE_COLOR, help_styles, paint};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("SNUGQL_CONFIG", "Engine configuration file, same as --config"),
    ("REDIS_URL", "Redis connection URL referenced by the default snugql.toml"),
    ("RUST_LOG", "Log filter for engine diagnostics (e.g. snugql=debug)"),
];

#[derive(Parser)]
#[command(name = "snugql", version)]
#[command(
    about = "Multi-entity submit mutations for SnugQL",
    long_about = r#"Command line front end for the SnugQL submission engine.

One submission creates and updates entities of several collections. New
entities carry placeholder ids that other entities in the same payload can
reference; the engine orders the saves, checks field-level authorization
and reports the stored ids back next to the placeholders."#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Print loader and store diagnostics
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Engine configuration file
    #[arg(long, env = "SNUGQL_CONFIG", default_value = "snugql.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the entity schema
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// Create or update entities from a JSON payload
    Submit(SubmitArgs),
}

impl Cli {
    /// Parses arguments with the per-command examples appended to `--help`.
    fn parse_with_examples() -> Self {
        let mut command = Cli::command()
            .styles(help_styles())
            .color(if *USE_COLOR { ColorChoice::Auto } else { ColorChoice::Never })
            .after_long_help(render_environment());
        for example in command_examples() {
            let text = render_examples(example.groups);
            command = command.mut_subcommand(example.name, |subcommand| subcommand.after_long_help(text));
        }

        let matches = command.get_matches();
        Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
    }

    fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            output_format: self.output.clone(),
            quiet: self.quiet,
            verbose: self.verbose,
            no_color: self.no_color || !*USE_COLOR,
        }
    }
}

fn render_examples(groups: &[ExampleGroup]) -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", paint("Examples:", PALETTE.heading, true));
    for group in groups {
        let _ = writeln!(buffer, "  {}", paint(group.title, PALETTE.title, true));
        for command in group.commands {
            let _ = writeln!(
                buffer,
                "    {} {}",
                paint(MARKS.step, PALETTE.command, false),
                paint(command, PALETTE.command, false)
            );
        }
        buffer.push('\n');
    }
    buffer
}

fn render_environment() -> String {
    let mut buffer = String::new();
    let _ = writeln!(buffer, "{}", paint("Environment Variables:", PALETTE.heading, true));
    for (key, description) in ENVIRONMENT_VARIABLES {
        let _ = writeln!(buffer, "  {}  {description}", paint(key, PALETTE.key, true));
    }
    let _ = writeln!(
        buffer,
        "\n{} {}",
        paint("Tip:", PALETTE.heading, true),
        paint("Use 'snugql <command> --help' to view examples for each command.", PALETTE.muted, false)
    );
    buffer
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse_with_examples();
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(err) = execute(cli).await {
        eprintln!("{} Error: {err:#}", paint(MARKS.rejected, PALETTE.rejected, true));
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let output = OutputManager::new(cli.global_options());
    match cli.command {
        Commands::Schema(command) => handle_schema_commands(command, &output),
        Commands::Submit(args) => handle_submit(args, &cli.config, &output).await,
    }
}
