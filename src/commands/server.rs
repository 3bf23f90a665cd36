use std::fmt::Write;
use std::time::Duration;

use crate::commands::{CommandError, CommandParser};
use crate::reply::Reply;

/// Point-in-time figures reported by `INFO`.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub port: u16,
    pub uptime: Duration,
    pub connected_clients: usize,
    pub total_connections_received: u64,
    pub monitors: usize,
    pub pubsub_channels: usize,
    pub pubsub_patterns: usize,
    pub keyspaces: Vec<KeyspaceStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeyspaceStats {
    pub index: usize,
    pub keys: usize,
    pub expires: usize,
}

const SECTIONS: [&str; 4] = ["server", "clients", "stats", "keyspace"];

/// Returns information and statistics about the server, as `key:value` lines grouped in
/// `# Section` blocks.
///
/// Ref: <https://redis.io/docs/latest/commands/info>
#[derive(Debug, PartialEq)]
pub struct Info {
    /// Lowercased section names; empty means every section.
    pub sections: Vec<String>,
}

impl Info {
    fn wants(&self, section: &str) -> bool {
        self.sections.is_empty()
            || self
                .sections
                .iter()
                .any(|s| s == section || s == "all" || s == "default" || s == "everything")
    }

    pub fn render(&self, stats: &ServerStats) -> Reply {
        let mut out = String::new();

        for section in SECTIONS.iter().filter(|section| self.wants(section)) {
            if !out.is_empty() {
                out.push_str("\r\n");
            }
            // Writing to a String cannot fail.
            let _ = render_section(&mut out, section, stats);
        }

        Reply::bulk(out)
    }
}

fn render_section(out: &mut String, section: &str, stats: &ServerStats) -> std::fmt::Result {
    match section {
        "server" => {
            writeln!(out, "# Server\r")?;
            writeln!(out, "redwire_version:{}\r", env!("CARGO_PKG_VERSION"))?;
            writeln!(out, "process_id:{}\r", std::process::id())?;
            writeln!(out, "tcp_port:{}\r", stats.port)?;
            writeln!(out, "uptime_in_seconds:{}\r", stats.uptime.as_secs())?;
        }
        "clients" => {
            writeln!(out, "# Clients\r")?;
            writeln!(out, "connected_clients:{}\r", stats.connected_clients)?;
            writeln!(out, "monitors:{}\r", stats.monitors)?;
        }
        "stats" => {
            writeln!(out, "# Stats\r")?;
            writeln!(
                out,
                "total_connections_received:{}\r",
                stats.total_connections_received
            )?;
            writeln!(out, "pubsub_channels:{}\r", stats.pubsub_channels)?;
            writeln!(out, "pubsub_patterns:{}\r", stats.pubsub_patterns)?;
        }
        "keyspace" => {
            writeln!(out, "# Keyspace\r")?;
            for db in stats.keyspaces.iter().filter(|db| db.keys > 0) {
                writeln!(
                    out,
                    "db{}:keys={},expires={}\r",
                    db.index, db.keys, db.expires
                )?;
            }
        }
        _ => {}
    }

    Ok(())
}

impl TryFrom<&mut CommandParser> for Info {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let sections = parser
            .rest_or_empty()
            .iter()
            .map(|section| String::from_utf8_lossy(section).to_lowercase())
            .collect();

        Ok(Self { sections })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> ServerStats {
        ServerStats {
            port: 6380,
            uptime: Duration::from_secs(42),
            connected_clients: 3,
            total_connections_received: 7,
            monitors: 0,
            pubsub_channels: 1,
            pubsub_patterns: 0,
            keyspaces: vec![
                KeyspaceStats {
                    index: 0,
                    keys: 2,
                    expires: 1,
                },
                KeyspaceStats {
                    index: 1,
                    keys: 0,
                    expires: 0,
                },
            ],
        }
    }

    fn text(reply: Reply) -> String {
        String::from_utf8(reply.as_bulk().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn renders_every_section_by_default() {
        let info = Info { sections: vec![] };
        let out = text(info.render(&stats()));

        assert!(out.contains("# Server\r\n"));
        assert!(out.contains("tcp_port:6380\r\n"));
        assert!(out.contains("uptime_in_seconds:42\r\n"));
        assert!(out.contains("connected_clients:3\r\n"));
        assert!(out.contains("db0:keys=2,expires=1\r\n"));
        assert!(!out.contains("db1:"));
    }

    #[test]
    fn renders_requested_section_only() {
        let info = Info {
            sections: vec!["clients".to_string()],
        };
        let out = text(info.render(&stats()));

        assert!(out.starts_with("# Clients\r\n"));
        assert!(!out.contains("# Server"));
        assert!(!out.contains("# Keyspace"));
    }
}
