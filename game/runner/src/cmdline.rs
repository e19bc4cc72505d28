//! Command-line surface the launcher glue consumes: a positional command name followed by
//! `-param=value` flags (a single leading dash, not the double-dash long-option convention).
//! Hand-rolled rather than built on `clap`'s long-option parser, which only ever emits
//! `--name`/`--name=value`, because the flags this core actually needs to recognize
//! (`-messageServer=host:port`, `-dumpConfig`, ...) are single-dash by definition.

#[derive(Debug, Default, Clone)]
pub struct ParsedArgs {
    pub command: Option<String>,
    pub no_error_capture: bool,
    pub message_server: Option<String>,
    pub message_connection_key: Option<String>,
    pub message_startup_timestamp: Option<String>,
    pub dump_config: bool,
    pub noapp: bool,
    pub silent: bool,
    pub console: bool,
    pub tty: bool,
    pub verbose: bool,
    pub profile: Option<u32>,
    pub trailing: Vec<String>,
}

pub fn parse<I: IntoIterator<Item = String>>(args: I) -> ParsedArgs {
    let mut parsed = ParsedArgs::default();

    for arg in args {
        if let Some(flag) = arg.strip_prefix('-') {
            let (name, value) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (flag, None),
            };

            match name {
                "noErrorCapture" => parsed.no_error_capture = true,
                "messageServer" => parsed.message_server = value,
                "messageConnectionKey" => parsed.message_connection_key = value,
                "messageStartupTimestamp" => parsed.message_startup_timestamp = value,
                "dumpConfig" => parsed.dump_config = true,
                "noapp" => parsed.noapp = true,
                "silent" => parsed.silent = true,
                "console" => parsed.console = true,
                "tty" => parsed.tty = true,
                "verbose" => parsed.verbose = true,
                "profile" => parsed.profile = value.and_then(|v| v.parse().ok()),
                _ => parsed.trailing.push(arg.to_string()),
            }
        } else if parsed.command.is_none() {
            parsed.command = Some(arg);
        } else {
            parsed.trailing.push(arg);
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parses_command_and_value_flags() {
        let parsed = parse(args(&["serve", "-messageServer=127.0.0.1:9000", "-profile=3"]));
        assert_eq!(parsed.command.as_deref(), Some("serve"));
        assert_eq!(parsed.message_server.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(parsed.profile, Some(3));
    }

    #[test]
    fn test_parses_boolean_flags() {
        let parsed = parse(args(&["serve", "-dumpConfig", "-noErrorCapture", "-verbose"]));
        assert!(parsed.dump_config);
        assert!(parsed.no_error_capture);
        assert!(parsed.verbose);
        assert!(!parsed.silent);
    }

    #[test]
    fn test_unrecognized_flag_is_kept_as_trailing() {
        let parsed = parse(args(&["serve", "-unknownThing=1"]));
        assert_eq!(parsed.trailing, vec!["-unknownThing=1".to_string()]);
    }
}
