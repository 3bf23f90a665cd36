use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::keyspace::Keyspace;
use crate::reply::Reply;

/// Posts a message to the given channel. Returns the number of subscribers that received it,
/// pattern subscribers included.
///
/// Ref: <https://redis.io/docs/latest/commands/publish>
#[derive(Debug, PartialEq)]
pub struct Publish {
    pub channel: Bytes,
    pub message: Bytes,
}

impl Executable for Publish {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let receivers = db.broker().publish(&self.channel, &self.message);
        Ok(Reply::Integer(receivers as i64))
    }
}

impl TryFrom<&mut CommandParser> for Publish {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let channel = parser.next_bytes()?;
        let message = parser.next_bytes()?;
        Ok(Self { channel, message })
    }
}

// The subscription commands below change the state of the connection that sends them, so the
// session executes them rather than a keyspace.

/// Ref: <https://redis.io/docs/latest/commands/subscribe>
#[derive(Debug, PartialEq)]
pub struct Subscribe {
    pub channels: Vec<Bytes>,
}

impl TryFrom<&mut CommandParser> for Subscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let channels = parser.rest()?;
        Ok(Self { channels })
    }
}

/// Without channels, unsubscribes from every channel the connection listens to.
///
/// Ref: <https://redis.io/docs/latest/commands/unsubscribe>
#[derive(Debug, PartialEq)]
pub struct Unsubscribe {
    pub channels: Vec<Bytes>,
}

impl TryFrom<&mut CommandParser> for Unsubscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let channels = parser.rest_or_empty();
        Ok(Self { channels })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/psubscribe>
#[derive(Debug, PartialEq)]
pub struct Psubscribe {
    pub patterns: Vec<Bytes>,
}

impl TryFrom<&mut CommandParser> for Psubscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let patterns = parser.rest()?;
        Ok(Self { patterns })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/punsubscribe>
#[derive(Debug, PartialEq)]
pub struct Punsubscribe {
    pub patterns: Vec<Bytes>,
}

impl TryFrom<&mut CommandParser> for Punsubscribe {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let patterns = parser.rest_or_empty();
        Ok(Self { patterns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::commands::{exec_command, Operation};
    use crate::pubsub::Subscriber;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_counts_receivers() {
        let db = Keyspace::new(0);
        let (tx, mut rx) = mpsc::channel(8);
        let subscriber = Subscriber::new(Uuid::new_v4(), tx, CancellationToken::new());
        db.broker().subscribe(Bytes::from("news"), &subscriber);

        assert_eq!(
            exec_command(&db, Command::new("PUBLISH").arg("news").arg("hello")),
            Reply::Integer(1)
        );
        assert_eq!(
            exec_command(&db, Command::new("PUBLISH").arg("other").arg("hello")),
            Reply::Integer(0)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Reply::bulks(["message", "news", "hello"])
        );
    }

    #[test]
    fn parse_subscription_commands() {
        assert_eq!(
            Operation::try_from(Command::new("SUBSCRIBE").arg("a").arg("b")).unwrap(),
            Operation::Subscribe(Subscribe {
                channels: vec![Bytes::from("a"), Bytes::from("b")]
            })
        );
        assert_eq!(
            Operation::try_from(Command::new("UNSUBSCRIBE")).unwrap(),
            Operation::Unsubscribe(Unsubscribe { channels: vec![] })
        );
        assert_eq!(
            Operation::try_from(Command::new("PSUBSCRIBE")).unwrap_err(),
            CommandError::WrongArity("psubscribe".to_string())
        );
    }
}
