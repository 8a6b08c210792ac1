use clap::{Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Raw(RawOutputMode),
}

#[derive(Debug, Clone, Copy)]
enum RawOutputMode {
    /// The child process owns the terminal.
    InteractivePassthrough,
    /// The child process writes its own output; only errors are reported.
    Passthrough,
    /// The command prints plain text.
    Text,
}

mod commands;
mod output;
mod tty;

use commands::{build, deploy, env, passthrough, profile, publish, task};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "compose-flow")]
#[command(version = VERSION)]
#[command(about = "Codified build, publish and deploy workflows for container stacks")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored environment
    Env(env::EnvArgs),
    /// Compile, check and write the compose profile
    Profile(profile::ProfileArgs),
    /// Build the profile's images
    Build(build::BuildArgs),
    /// Build and push the profile's images
    Publish(publish::PublishArgs),
    /// Deploy to swarm, kubernetes, helm or rancher
    Deploy(deploy::DeployArgs),
    /// Run docker-compose with the compiled profile
    Compose(passthrough::PassthroughArgs),
    /// Run kubectl in the configured context
    Kubectl(passthrough::PassthroughArgs),
    /// Run helm in the configured context
    Helm(passthrough::PassthroughArgs),
    /// Run the rancher CLI in the configured project
    Rancher(passthrough::PassthroughArgs),
    /// Run a task from compose-flow.yml
    Task(task::TaskArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Env(args) => match args.command {
            env::EnvCommand::Cat { .. } => ResponseMode::Raw(RawOutputMode::Text),
            env::EnvCommand::Edit { .. } => {
                ResponseMode::Raw(RawOutputMode::InteractivePassthrough)
            }
            _ => ResponseMode::Json,
        },
        Commands::Profile(args) if matches!(args.command, profile::ProfileCommand::Cat) => {
            ResponseMode::Raw(RawOutputMode::Text)
        }
        Commands::Compose(_)
        | Commands::Kubectl(_)
        | Commands::Helm(_)
        | Commands::Rancher(_)
        | Commands::Task(_) => ResponseMode::Raw(RawOutputMode::Passthrough),
        _ => ResponseMode::Json,
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let mode = response_mode(&cli.command);

    if let ResponseMode::Raw(RawOutputMode::InteractivePassthrough) = mode {
        if let Err(err) = tty::require_terminal("env edit", cli.global.dry_run) {
            let exit_code = output::exit_code_for_error(&err);
            let _ = output::print_result::<serde_json::Value>(Err(err));
            return std::process::ExitCode::from(exit_code_to_u8(exit_code));
        }
    }

    if let ResponseMode::Raw(RawOutputMode::Text) = mode {
        return match commands::run_text(cli.command, &cli.global) {
            Ok((content, exit_code)) => {
                print!("{}", content);
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
            Err(err) => {
                let exit_code = output::exit_code_for_error(&err);
                let _ = output::print_result::<serde_json::Value>(Err(err));
                std::process::ExitCode::from(exit_code_to_u8(exit_code))
            }
        };
    }

    let (json_result, exit_code) = commands::run_json(cli.command, &cli.global);

    match mode {
        ResponseMode::Json => {
            let _ = output::print_json_result(json_result);
        }
        ResponseMode::Raw(_) => {
            if json_result.is_err() {
                let _ = output::print_json_result(json_result);
            }
        }
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
