use std::collections::HashSet;

use anyhow::Result;

use crate::config::{Config, ServerRecord};
use crate::error::ConfigError;

/// Password prompts differ slightly between sshd builds ("Password:",
/// "bob@host's password:"), but they all end like this.
const PASSWORD_PROMPT: &str = "assword:";

/// The seam between chain logic and the terminal. `PtySession` is the
/// real implementation; tests drive the chain with a scripted fake.
pub trait SessionDriver {
    /// Start a fresh terminal session running `command`.
    fn spawn(&mut self, command: &str) -> Result<()>;
    /// Write a line (plus newline) into the running session.
    fn send_line(&mut self, line: &str) -> Result<()>;
    /// Block until `pattern` appears in the session's output.
    fn await_pattern(&mut self, pattern: &str) -> Result<()>;
}

/// Resolve the full login chain for `target`, root first.
///
/// Walks `requiredServerLogIn` references iteratively, so a config cycle
/// is reported as an error instead of blowing the stack. The returned
/// order is the login order: jump hosts first, target last.
pub fn resolve_chain<'a>(
    config: &'a Config,
    target: &'a ServerRecord,
) -> Result<Vec<&'a ServerRecord>, ConfigError> {
    let mut chain = vec![target];
    let mut visited: HashSet<&str> = target.aliases.iter().map(String::as_str).collect();

    let mut current = target;
    while let Some(required) = current.required_server_log_in.as_deref() {
        if visited.contains(required) {
            return Err(ConfigError::LoginCycle {
                alias: required.to_string(),
            });
        }
        let record = config
            .resolve(required)
            .map_err(|_| ConfigError::UnresolvedRequirement {
                alias: current.aliases.first().cloned().unwrap_or_default(),
                required: required.to_string(),
            })?;
        visited.extend(record.aliases.iter().map(String::as_str));
        chain.push(record);
        current = record;
    }

    chain.reverse();
    Ok(chain)
}

/// Log into every server in the chain, in order, inside one session.
///
/// The first hop spawns ssh; each later hop issues its ssh command as a
/// shell line inside the previous hop, so the sessions nest instead of
/// running in parallel. Every hop is the same two-step exchange: wait for
/// the password prompt, send the password, wait for `user@displayName` to
/// confirm we reached a shell.
pub fn login(driver: &mut dyn SessionDriver, chain: &[&ServerRecord]) -> Result<()> {
    for (hop, record) in chain.iter().enumerate() {
        let command = record.ssh_command();
        println!("----> {}", command);

        if hop == 0 {
            driver.spawn(&command)?;
        } else {
            driver.send_line(&command)?;
        }

        driver.await_pattern(PASSWORD_PROMPT)?;
        driver.send_line(&record.password)?;
        driver.await_pattern(&record.login_marker())?;

        println!("<---- {} ({})", record.server_display_name, record.server);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Op {
        Spawn(String),
        Send(String),
        Expect(String),
    }

    #[derive(Default)]
    struct FakeDriver {
        ops: Vec<Op>,
    }

    impl SessionDriver for FakeDriver {
        fn spawn(&mut self, command: &str) -> Result<()> {
            self.ops.push(Op::Spawn(command.to_string()));
            Ok(())
        }
        fn send_line(&mut self, line: &str) -> Result<()> {
            self.ops.push(Op::Send(line.to_string()));
            Ok(())
        }
        fn await_pattern(&mut self, pattern: &str) -> Result<()> {
            self.ops.push(Op::Expect(pattern.to_string()));
            Ok(())
        }
    }

    fn config(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    fn two_hop_config() -> Config {
        config(
            r#"{
                "servers": [
                    {"server": "10.0.0.5", "username": "bob", "password": "pw",
                     "serverDisplayName": "dbhost", "aliases": ["db"],
                     "requiredServerLogIn": "bastion"},
                    {"server": "203.0.113.9", "username": "jump", "password": "jpw",
                     "serverDisplayName": "bast", "aliases": ["bastion"]}
                ]
            }"#,
        )
    }

    #[test]
    fn test_single_hop_protocol() {
        let config = config(
            r#"{
                "servers": [
                    {"server": "10.0.0.5", "username": "bob", "password": "pw",
                     "serverDisplayName": "dbhost", "aliases": ["db"]}
                ]
            }"#,
        );
        let target = config.resolve("db").unwrap();
        let chain = resolve_chain(&config, target).unwrap();

        let mut driver = FakeDriver::default();
        login(&mut driver, &chain).unwrap();

        assert_eq!(
            driver.ops,
            vec![
                Op::Spawn("ssh bob@10.0.0.5 -p22".to_string()),
                Op::Expect("assword:".to_string()),
                Op::Send("pw".to_string()),
                Op::Expect("bob@dbhost".to_string()),
            ]
        );
    }

    #[test]
    fn test_chain_is_root_to_leaf() {
        let config = two_hop_config();
        let target = config.resolve("db").unwrap();
        let chain = resolve_chain(&config, target).unwrap();
        let servers: Vec<&str> = chain.iter().map(|r| r.server.as_str()).collect();
        assert_eq!(servers, vec!["203.0.113.9", "10.0.0.5"]);
    }

    #[test]
    fn test_jump_login_completes_before_target_command() {
        let config = two_hop_config();
        let target = config.resolve("db").unwrap();
        let chain = resolve_chain(&config, target).unwrap();

        let mut driver = FakeDriver::default();
        login(&mut driver, &chain).unwrap();

        assert_eq!(
            driver.ops,
            vec![
                // the bastion gets a fresh session
                Op::Spawn("ssh jump@203.0.113.9 -p22".to_string()),
                Op::Expect("assword:".to_string()),
                Op::Send("jpw".to_string()),
                Op::Expect("jump@bast".to_string()),
                // the target rides inside it
                Op::Send("ssh bob@10.0.0.5 -p22".to_string()),
                Op::Expect("assword:".to_string()),
                Op::Send("pw".to_string()),
                Op::Expect("bob@dbhost".to_string()),
            ]
        );
    }

    #[test]
    fn test_unresolved_requirement_is_fatal() {
        let config = config(
            r#"{
                "servers": [
                    {"server": "10.0.0.5", "username": "bob", "password": "pw",
                     "serverDisplayName": "dbhost", "aliases": ["db"],
                     "requiredServerLogIn": "ghost"}
                ]
            }"#,
        );
        let target = config.resolve("db").unwrap();
        let err = resolve_chain(&config, target).unwrap_err();
        match err {
            ConfigError::UnresolvedRequirement { alias, required } => {
                assert_eq!(alias, "db");
                assert_eq!(required, "ghost");
            }
            other => panic!("expected UnresolvedRequirement, got {other:?}"),
        }
    }

    #[test]
    fn test_requirement_cycle_is_detected() {
        let config = config(
            r#"{
                "servers": [
                    {"server": "1.1.1.1", "username": "a", "password": "x",
                     "serverDisplayName": "one", "aliases": ["one"],
                     "requiredServerLogIn": "two"},
                    {"server": "2.2.2.2", "username": "b", "password": "y",
                     "serverDisplayName": "two", "aliases": ["two"],
                     "requiredServerLogIn": "one"}
                ]
            }"#,
        );
        let target = config.resolve("one").unwrap();
        let err = resolve_chain(&config, target).unwrap_err();
        assert!(matches!(err, ConfigError::LoginCycle { alias } if alias == "one"));
    }

    #[test]
    fn test_self_requirement_is_a_cycle() {
        let config = config(
            r#"{
                "servers": [
                    {"server": "1.1.1.1", "username": "a", "password": "x",
                     "serverDisplayName": "one", "aliases": ["loop"],
                     "requiredServerLogIn": "loop"}
                ]
            }"#,
        );
        let target = config.resolve("loop").unwrap();
        assert!(matches!(
            resolve_chain(&config, target),
            Err(ConfigError::LoginCycle { .. })
        ));
    }
}
