//! Shared broker wiring: topic exchange name, capacity registry key, and
//! the `"{cmd}/{sid}"` request body format both the Router and the
//! Balancer parse (§6 "Broker wiring").

pub const EXCHANGE_NAME: &str = "balancers";
pub const QUEUE_REGISTRY_KEY: &str = "balancers:queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Create,
    Delete,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Delete => "delete",
        }
    }
}

/// Parses `"create/<sid>"` / `"delete/<sid>"` request bodies.
pub fn parse_request(body: &str) -> Option<(Command, &str)> {
    let (cmd, sid) = body.split_once('/')?;
    let cmd = match cmd {
        "create" => Command::Create,
        "delete" => Command::Delete,
        _ => return None,
    };
    Some((cmd, sid))
}

pub fn format_request(cmd: Command, session_id: &str) -> String {
    format!("{}/{session_id}", cmd.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_and_delete() {
        assert_eq!(parse_request("create/abc"), Some((Command::Create, "abc")));
        assert_eq!(parse_request("delete/xyz"), Some((Command::Delete, "xyz")));
        assert_eq!(parse_request("garbage"), None);
    }

    #[test]
    fn round_trips_format() {
        assert_eq!(parse_request(&format_request(Command::Create, "s1")), Some((Command::Create, "s1")));
    }
}
