//! Operator command surface

/// One line typed at the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    Whoami,
    DnaStats,
    DnaSearch(String),
    DnaRecent(usize),
    DnaDump,
    /// Destructive; the caller must confirm before acting on it
    ClearLogs,
    Scan(String),
    Geolocate(String),
    Plugins,
    /// Anything else goes through seal → open → route → log
    Analyze(String),
    Empty,
}

pub const DEFAULT_RECENT: usize = 10;

impl Command {
    pub fn parse(line: &str) -> Command {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Command::Empty;
        }
        let lower = trimmed.to_lowercase();
        let mut words = lower.split_whitespace();
        let first = words.next().unwrap_or("");
        let second = words.next();

        // Arguments keep their original case
        let rest_after = |n: usize| -> String {
            let mut rest = trimmed;
            for _ in 0..n {
                rest = rest.trim_start();
                rest = rest.find(char::is_whitespace).map_or("", |i| &rest[i..]);
            }
            rest.trim().to_string()
        };

        match (first, second) {
            ("exit", None) | ("quit", None) => Command::Exit,
            ("help", None) | ("?", None) => Command::Help,
            ("whoami", None) => Command::Whoami,
            ("plugins", None) => Command::Plugins,
            ("clear", Some("logs")) if words.next().is_none() => Command::ClearLogs,
            ("dna", Some("stats")) => Command::DnaStats,
            ("dna", Some("dump")) => Command::DnaDump,
            ("dna", Some("search")) => {
                let keyword = rest_after(2);
                if keyword.is_empty() {
                    Command::Help
                } else {
                    Command::DnaSearch(keyword)
                }
            }
            ("dna", Some("recent")) => {
                Command::DnaRecent(rest_after(2).parse().unwrap_or(DEFAULT_RECENT))
            }
            ("scan", Some(_)) => Command::Scan(rest_after(1)),
            ("geolocate", Some(_)) => Command::Geolocate(rest_after(1)),
            _ => Command::Analyze(trimmed.to_string()),
        }
    }

    pub fn help_text() -> &'static str {
        r#"
  exit | quit               Close the terminal
  whoami                    Session key preview, session id, DNA record count
  dna stats                 Verdict counts across DNA memory
  dna search <keyword>      Records containing <keyword>
  dna recent [n]            Last n records (default 10)
  dna dump                  Every record
  clear logs                Wipe DNA memory (asks for confirmation)
  scan <target>             Port / service / vulnerability audit
  geolocate <ip>            IP geolocation lookup
  plugins                   Registered plugins
  <anything else>           Seal, route, classify and log as a command
"#
    }
}
