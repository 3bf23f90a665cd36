use bytes::Bytes;
use strum_macros::EnumString;

use crate::commands::executable::Executable;
use crate::commands::{one_line, CommandError, CommandParser};
use crate::keyspace::Keyspace;
use crate::reply::Reply;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument as a bulk.
/// Inside a subscription the reply is the array `[pong, message]` instead, so the session
/// renders it.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub message: Option<Bytes>,
}

impl Ping {
    pub fn reply(self) -> Reply {
        self.message
            .map_or_else(|| Reply::status("PONG"), Reply::bulk)
    }

    /// The form used while the connection is subscribed.
    pub fn subscribed_reply(self) -> Reply {
        Reply::array([
            Reply::bulk("pong"),
            Reply::bulk(self.message.unwrap_or_default()),
        ])
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = if parser.has_next() {
            Some(parser.next_bytes()?)
        } else {
            None
        };

        Ok(Self { message })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/echo>
#[derive(Debug, PartialEq)]
pub struct Echo {
    pub message: Bytes,
}

impl Executable for Echo {
    fn exec(self, _db: &Keyspace) -> Result<Reply, CommandError> {
        Ok(Reply::bulk(self.message))
    }
}

impl TryFrom<&mut CommandParser> for Echo {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let message = parser.next_bytes()?;
        Ok(Self { message })
    }
}

/// `AUTH password` or `AUTH username password`. Only the `default` user exists.
///
/// Ref: <https://redis.io/docs/latest/commands/auth>
#[derive(Debug, PartialEq)]
pub struct Auth {
    pub username: Option<Bytes>,
    pub password: Bytes,
}

impl Auth {
    /// Checks the credentials against the configured password.
    pub fn verify(&self, configured: Option<&str>) -> Result<(), CommandError> {
        let Some(expected) = configured else {
            return Err(CommandError::NoPasswordConfigured);
        };

        let user_ok = self
            .username
            .as_ref()
            .map_or(true, |name| &name[..] == b"default");

        if user_ok && &self.password[..] == expected.as_bytes() {
            Ok(())
        } else {
            Err(CommandError::WrongPass)
        }
    }
}

impl TryFrom<&mut CommandParser> for Auth {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let first = parser.next_bytes()?;
        if parser.has_next() {
            let password = parser.next_bytes()?;
            Ok(Self {
                username: Some(first),
                password,
            })
        } else {
            Ok(Self {
                username: None,
                password: first,
            })
        }
    }
}

/// Select the logical database with the specified zero-based index.
///
/// Ref: <https://redis.io/docs/latest/commands/select>
#[derive(Debug, PartialEq)]
pub struct Select {
    pub index: i64,
}

impl TryFrom<&mut CommandParser> for Select {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let index = parser.next_integer()?;
        Ok(Self { index })
    }
}

#[derive(Debug, EnumString)]
#[strum(ascii_case_insensitive)]
enum ClientSubcommand {
    Setname,
    Getname,
    Id,
    Setinfo,
}

/// The supported `CLIENT` subcommands.
///
/// Ref: <https://redis.io/docs/latest/commands/client>
#[derive(Debug, PartialEq)]
pub enum Client {
    SetName(Bytes),
    GetName,
    Id,
    /// `CLIENT SETINFO LIB-NAME|LIB-VER value`, accepted and ignored.
    SetInfo { attribute: Bytes, value: Bytes },
}

impl TryFrom<&mut CommandParser> for Client {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let name = parser.next_string()?;
        let subcommand = name
            .parse::<ClientSubcommand>()
            .map_err(|_| CommandError::UnknownSubcommand(one_line(&name)))?;

        let client = match subcommand {
            ClientSubcommand::Setname => {
                let name = parser.next_bytes()?;
                if name.iter().any(|b| *b == b' ' || *b == b'\n') {
                    return Err(CommandError::Internal(
                        "Client names cannot contain spaces, newlines or special characters."
                            .to_string(),
                    ));
                }
                Client::SetName(name)
            }
            ClientSubcommand::Getname => Client::GetName,
            ClientSubcommand::Id => Client::Id,
            ClientSubcommand::Setinfo => Client::SetInfo {
                attribute: parser.next_bytes()?,
                value: parser.next_bytes()?,
            },
        };

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::commands::{exec_command, Operation};

    #[test]
    fn ping_replies() {
        let plain = Ping { message: None };
        assert_eq!(plain.reply(), Reply::status("PONG"));

        let with_message = Ping {
            message: Some(Bytes::from("hi")),
        };
        assert_eq!(with_message.reply(), Reply::bulk("hi"));

        let subscribed = Ping { message: None };
        assert_eq!(subscribed.subscribed_reply(), Reply::bulks(["pong", ""]));
    }

    #[tokio::test]
    async fn echo() {
        let db = Keyspace::new(0);
        assert_eq!(
            exec_command(&db, Command::new("ECHO").arg("hello")),
            Reply::bulk("hello")
        );
    }

    #[test]
    fn auth_verification() {
        let auth = Auth {
            username: None,
            password: Bytes::from("secret"),
        };
        assert_eq!(auth.verify(Some("secret")), Ok(()));
        assert_eq!(auth.verify(Some("other")), Err(CommandError::WrongPass));
        assert_eq!(auth.verify(None), Err(CommandError::NoPasswordConfigured));

        let named = Auth {
            username: Some(Bytes::from("alice")),
            password: Bytes::from("secret"),
        };
        assert_eq!(named.verify(Some("secret")), Err(CommandError::WrongPass));
    }

    #[test]
    fn parse_client_subcommands() {
        assert_eq!(
            Operation::try_from(Command::new("CLIENT").arg("setname").arg("worker")).unwrap(),
            Operation::Client(Client::SetName(Bytes::from("worker")))
        );
        assert_eq!(
            Operation::try_from(Command::new("CLIENT").arg("ID")).unwrap(),
            Operation::Client(Client::Id)
        );
        assert_eq!(
            Operation::try_from(
                Command::new("CLIENT")
                    .arg("SETINFO")
                    .arg("LIB-NAME")
                    .arg("redis-rs")
            )
            .unwrap(),
            Operation::Client(Client::SetInfo {
                attribute: Bytes::from("LIB-NAME"),
                value: Bytes::from("redis-rs"),
            })
        );
        assert_eq!(
            Operation::try_from(Command::new("CLIENT").arg("KILL")).unwrap_err(),
            CommandError::UnknownSubcommand("KILL".to_string())
        );
    }
}
