//! Command tokenizer (§4.6): whitespace-split tokens, `-command` starts a
//! command, `|` separates chained commands, `--long`/`-abc` flags, and
//! quoted strings spanning multiple tokens.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParserError {
    #[error("unexpected token <{0}>")]
    UnexpectedToken(String),
    #[error("quote has never been closed after <{0}>")]
    Enclosing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub values: Vec<String>,
    pub flags: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Any,
    Flags,
    CloseQuote,
}

#[derive(Debug, Clone, Copy)]
enum Buffer {
    Values,
    Flag(usize),
}

/// A stateful parser bound to one command prefix (e.g. `-`), mirroring
/// `create_parser` in the source: each call to [`parse`](Self::parse)
/// tokenizes one full input line into zero or more chained commands.
pub struct CommandParser {
    prefix_len: usize,
    command: Regex,
    flag: Regex,
    flag_seq: Regex,
}

impl CommandParser {
    pub fn new(command_prefix: &str) -> Self {
        CommandParser {
            prefix_len: command_prefix.len(),
            command: Regex::new(&format!("^{}\\w+$", regex::escape(command_prefix))).expect("valid regex"),
            flag: Regex::new(r"^--\w+$").expect("valid regex"),
            flag_seq: Regex::new(r"^-\w+$").expect("valid regex"),
        }
    }

    pub fn parse(&self, input: &str) -> Result<Vec<ParsedCommand>, ParserError> {
        let mut tokens: Vec<String> = input.split_whitespace().map(str::to_string).collect();
        let mut output = Vec::new();

        while !tokens.is_empty() {
            let command = tokens[0].clone();
            if !self.command.is_match(&command) {
                break;
            }
            tokens.remove(0);
            if tokens.is_empty() {
                output.push(ParsedCommand { name: command[self.prefix_len..].to_string(), values: Vec::new(), flags: Vec::new() });
                break;
            }

            let (values, flags, rest) = self.parse_args(tokens)?;
            output.push(ParsedCommand { name: command[self.prefix_len..].to_string(), values, flags });
            tokens = rest;
        }

        Ok(output)
    }

    fn parse_args(
        &self,
        mut args: Vec<String>,
    ) -> Result<(Vec<String>, Vec<(String, Vec<String>)>, Vec<String>), ParserError> {
        let mut values: Vec<String> = Vec::new();
        let mut flags: Vec<(String, Vec<String>)> = Vec::new();
        let mut target = Buffer::Values;
        let mut expect = Expect::Any;
        let mut enclosed = 0usize;
        let mut cursor = 0usize;

        while cursor < args.len() {
            let token = args[cursor].clone();

            match expect {
                Expect::Any => {
                    if token == "|" {
                        return Ok((values, flags, args.split_off(cursor + 1)));
                    } else if let Some(rest) = token.strip_prefix("\\\"") {
                        push(&mut values, &mut flags, target, format!("\"{rest}"));
                    } else if let Some(stripped) = token.strip_prefix('"') {
                        if stripped.is_empty() {
                            enclosed = cursor;
                            expect = Expect::CloseQuote;
                        } else if let Some(body) = stripped.strip_suffix('"') {
                            if let Some(escaped) = body.strip_suffix('\\') {
                                args[cursor] = format!("\"{escaped}\"");
                                enclosed = cursor;
                                expect = Expect::CloseQuote;
                            } else {
                                push(&mut values, &mut flags, target, body.to_string());
                            }
                        } else {
                            enclosed = cursor;
                            expect = Expect::CloseQuote;
                        }
                    } else if self.flag.is_match(&token) {
                        flags.push((token[2..].to_string(), Vec::new()));
                        target = Buffer::Flag(flags.len() - 1);
                    } else if self.flag_seq.is_match(&token) {
                        for flag in token[1..].chars() {
                            flags.push((flag.to_string(), Vec::new()));
                        }
                        expect = Expect::Flags;
                    } else {
                        push(&mut values, &mut flags, target, token);
                    }
                }
                Expect::Flags => {
                    if token == "|" {
                        return Ok((values, flags, args.split_off(cursor + 1)));
                    } else if self.flag.is_match(&token) {
                        flags.push((token[2..].to_string(), Vec::new()));
                        target = Buffer::Flag(flags.len() - 1);
                        expect = Expect::Any;
                    } else if self.flag_seq.is_match(&token) {
                        for flag in token[1..].chars() {
                            flags.push((flag.to_string(), Vec::new()));
                        }
                    } else {
                        return Err(ParserError::UnexpectedToken(token));
                    }
                }
                Expect::CloseQuote => {
                    if token.ends_with('"') {
                        if token.ends_with("\\\"") {
                            let trimmed = &token[..token.len() - 2];
                            args[cursor] = format!("{trimmed}\"");
                        } else {
                            let joined = args[enclosed..=cursor].join(" ");
                            let inner = joined[1..joined.len() - 1].trim().to_string();
                            push(&mut values, &mut flags, target, inner);
                            expect = Expect::Any;
                        }
                    }
                }
            }

            cursor += 1;
        }

        if expect == Expect::CloseQuote {
            return Err(ParserError::Enclosing(args[enclosed].clone()));
        }

        Ok((values, flags, Vec::new()))
    }
}

fn push(values: &mut Vec<String>, flags: &mut [(String, Vec<String>)], target: Buffer, token: String) {
    match target {
        Buffer::Values => values.push(token),
        Buffer::Flag(index) => flags[index].1.push(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new("-")
    }

    #[test]
    fn parses_command_with_values_and_flag_values() {
        let got = parser().parse("-m test --flag v1 v2").unwrap();
        assert_eq!(
            got,
            vec![ParsedCommand {
                name: "m".into(),
                values: vec!["test".into()],
                flags: vec![("flag".into(), vec!["v1".into(), "v2".into()])],
            }]
        );
    }

    #[test]
    fn chains_commands_across_pipe() {
        let got = parser().parse("-m test | -s").unwrap();
        assert_eq!(
            got,
            vec![
                ParsedCommand { name: "m".into(), values: vec!["test".into()], flags: vec![] },
                ParsedCommand { name: "s".into(), values: vec![], flags: vec![] },
            ]
        );
    }

    #[test]
    fn unterminated_quote_is_an_enclosing_error() {
        let err = parser().parse("-m \"value").unwrap_err();
        assert_eq!(err, ParserError::Enclosing("\"value".into()));
    }

    #[test]
    fn positional_after_flag_cluster_is_unexpected() {
        let err = parser().parse("-m test -abc value").unwrap_err();
        assert_eq!(err, ParserError::UnexpectedToken("value".into()));
    }

    #[test]
    fn non_command_input_produces_no_commands() {
        assert_eq!(parser().parse("hello world").unwrap(), vec![]);
    }

    #[test]
    fn escaped_quote_in_the_opening_token_keeps_the_leading_quote() {
        let got = parser().parse("-m \"abc\\\" def\"").unwrap();
        assert_eq!(
            got,
            vec![ParsedCommand { name: "m".into(), values: vec!["abc\" def".into()], flags: vec![] }]
        );
    }
}
