use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::parser::{CommandParser, ParsedCommand, ParserError};

#[derive(Debug, Clone)]
pub struct FlagSpec {
    pub name: String,
    pub permit: String,
    pub aliases: Vec<String>,
    pub require_value: bool,
    pub multiple_values: bool,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub permit: String,
    pub aliases: Vec<String>,
    pub flags: HashMap<String, Arc<FlagSpec>>,
    pub require_value: bool,
    pub multiple_values: bool,
    pub batch_values: bool,
    pub threaded: bool,
    /// Mirrors `spec.signal` in `original_source/service/bot/profile/
    /// commands.py` — today only `leave` sets this, raising
    /// [`crate::bot::executor::Signal::Terminate`] after dispatch runs,
    /// whether or not the handler's own chat call succeeded.
    pub terminates: bool,
}

/// A parsed command with its spec and per-flag specs resolved, ready for
/// authorization and dispatch (§4.6).
pub struct ResolvedCommand {
    pub spec: Arc<CommandSpec>,
    pub values: Vec<String>,
    pub flags: Vec<(Arc<FlagSpec>, Vec<String>)>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecParserError {
    #[error(transparent)]
    Tokenizer(#[from] ParserError),
    #[error("no such command as <{0}>")]
    NoSuchCommand(String),
    #[error("no such flag as <{0}>")]
    NoSuchFlag(String),
    #[error("<{0}> requires at least one value")]
    ValueMissing(String),
    #[error("<{0}> does not allow values")]
    ValueNotAllowed(String),
    #[error("<{0}> does not allow multiple values")]
    MultipleValues(String),
    #[error("not enough rights to use <{0}>")]
    AccessRights(String),
}

/// The registry every alias of a command or flag resolves into — built
/// once at startup from the profile's command spec (§9 "Dynamic command
/// dispatch": a static registry replaces `getattr`).
pub struct CommandRegistry {
    commands: HashMap<String, Arc<CommandSpec>>,
    tokenizer: CommandParser,
}

impl CommandRegistry {
    pub fn new(commands: HashMap<String, Arc<CommandSpec>>, command_prefix: &str) -> Self {
        CommandRegistry { commands, tokenizer: CommandParser::new(command_prefix) }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CommandSpec>> {
        self.commands.get(name)
    }

    pub fn parse(&self, input: &str) -> Result<Vec<ResolvedCommand>, SpecParserError> {
        let tokens = self.tokenizer.parse(input)?;
        let mut resolved = Vec::with_capacity(tokens.len());
        for ParsedCommand { name, values, flags } in tokens {
            let spec = self.commands.get(&name).cloned().ok_or(SpecParserError::NoSuchCommand(name))?;
            validate_values(&spec.name, &values, spec.require_value, spec.multiple_values)?;

            let mut resolved_flags = Vec::with_capacity(flags.len());
            for (flag_name, flag_values) in flags {
                let flag_spec = spec.flags.get(&flag_name).cloned().ok_or(SpecParserError::NoSuchFlag(flag_name))?;
                validate_values(&flag_spec.name, &flag_values, flag_spec.require_value, flag_spec.multiple_values)?;
                resolved_flags.push((flag_spec, flag_values));
            }

            resolved.push(ResolvedCommand { spec, values, flags: resolved_flags });
        }
        Ok(resolved)
    }
}

fn validate_values(
    name: &str,
    values: &[String],
    require_value: bool,
    multiple_values: bool,
) -> Result<(), SpecParserError> {
    if require_value && values.is_empty() {
        return Err(SpecParserError::ValueMissing(name.to_string()));
    }
    if !require_value && !multiple_values && !values.is_empty() {
        return Err(SpecParserError::ValueNotAllowed(name.to_string()));
    }
    if !multiple_values && values.len() > 1 {
        return Err(SpecParserError::MultipleValues(name.to_string()));
    }
    Ok(())
}

/// Builds a registry entry for every declared alias, mirroring
/// `process_spec`'s "self-alias if absent, then register every alias".
pub fn register_aliases(commands: Vec<CommandSpec>) -> HashMap<String, Arc<CommandSpec>> {
    let mut out = HashMap::new();
    for mut spec in commands {
        if !spec.aliases.contains(&spec.name) {
            spec.aliases.push(spec.name.clone());
        }
        let spec = Arc::new(spec);
        for alias in &spec.aliases {
            out.insert(alias.clone(), spec.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn help_spec() -> CommandSpec {
        CommandSpec {
            name: "help".into(),
            permit: "user".into(),
            aliases: vec!["h".into()],
            flags: HashMap::new(),
            require_value: false,
            multiple_values: false,
            batch_values: false,
            threaded: false,
            terminates: false,
        }
    }

    #[test]
    fn registers_every_alias() {
        let commands = register_aliases(vec![help_spec()]);
        assert!(commands.contains_key("help"));
        assert!(commands.contains_key("h"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let registry = CommandRegistry::new(register_aliases(vec![help_spec()]), "-");
        let err = registry.parse("-nope").unwrap_err();
        assert_eq!(err, SpecParserError::NoSuchCommand("nope".into()));
    }

    #[test]
    fn value_on_a_no_value_command_is_rejected() {
        let registry = CommandRegistry::new(register_aliases(vec![help_spec()]), "-");
        let err = registry.parse("-h extra").unwrap_err();
        assert_eq!(err, SpecParserError::ValueNotAllowed("help".into()));
    }
}
