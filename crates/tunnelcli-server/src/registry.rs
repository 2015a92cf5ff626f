//! Commands the server can run, looked up by name.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Streams and client settings handed to a running command.
pub struct CommandContext {
    /// Locale requested by the client, e.g. `en_US`.
    pub locale: String,
    /// Character encoding of the client terminal.
    pub encoding: String,
    pub stdin: Box<dyn Read + Send>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
    /// The registry the command was resolved from.
    pub registry: Arc<CommandRegistry>,
}

/// A command runnable through the CLI endpoint.
pub trait CliCommand: Send + Sync {
    /// Name the client uses to invoke the command.
    fn name(&self) -> &str;

    /// One line shown by `help`.
    fn short_description(&self) -> &str;

    /// Runs the command and returns its exit code.
    ///
    /// `args` excludes the command name.
    fn main(&self, args: &[String], ctx: &mut CommandContext) -> i32;
}

/// Lookup table of commands, built once at startup.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Box<dyn CliCommand>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `help` and `version`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(HelpCommand);
        registry.register(VersionCommand);
        registry
    }

    /// Adds `command`, replacing any command with the same name.
    pub fn register(&mut self, command: impl CliCommand + 'static) {
        self.commands
            .insert(command.name().to_string(), Box::new(command));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn CliCommand> {
        self.commands.get(name).map(|command| command.as_ref())
    }

    /// Command names and descriptions, sorted by name.
    pub fn summaries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands
            .values()
            .map(|command| (command.name(), command.short_description()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Lists the available commands.
pub struct HelpCommand;

impl CliCommand for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn short_description(&self) -> &str {
        "Lists all the available commands or a detailed description of a single command."
    }

    fn main(&self, args: &[String], ctx: &mut CommandContext) -> i32 {
        let registry = ctx.registry.clone();
        let result = match args.first() {
            Some(name) => match registry.get(name) {
                Some(command) => writeln!(
                    ctx.stdout,
                    "{}\n    {}",
                    command.name(),
                    command.short_description()
                ),
                None => {
                    let _ = writeln!(ctx.stderr, "No such command {name}");
                    return 3;
                }
            },
            None => write_summaries(&registry, &mut ctx.stdout),
        };
        match result {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}

fn write_summaries(registry: &CommandRegistry, out: &mut dyn Write) -> io::Result<()> {
    let width = registry.summaries().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, description) in registry.summaries() {
        writeln!(out, "  {name:<width$}  {description}")?;
    }
    Ok(())
}

/// Prints the server version.
pub struct VersionCommand;

impl CliCommand for VersionCommand {
    fn name(&self) -> &str {
        "version"
    }

    fn short_description(&self) -> &str {
        "Outputs the current version."
    }

    fn main(&self, _args: &[String], ctx: &mut CommandContext) -> i32 {
        match writeln!(ctx.stdout, "{}", env!("CARGO_PKG_VERSION")) {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }
}
