use bytes::Bytes;
use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::keyspace::Keyspace;
use crate::pattern::Pattern;
use crate::reply::Reply;

/// Removes the specified keys. A key is ignored if it does not exist. Returns the number of keys
/// that were removed.
///
/// Ref: <https://redis.io/docs/latest/commands/del>
#[derive(Debug, PartialEq)]
pub struct Del {
    pub keys: Vec<Bytes>,
}

impl Executable for Del {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let removed = self
            .keys
            .iter()
            .filter(|key| store.remove(key).is_some())
            .count();

        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for Del {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.rest()?;
        Ok(Self { keys })
    }
}

/// Returns how many of the given keys exist. A key mentioned multiple times is counted
/// multiple times.
///
/// Ref: <https://redis.io/docs/latest/commands/exists>
#[derive(Debug, PartialEq)]
pub struct Exists {
    pub keys: Vec<Bytes>,
}

impl Executable for Exists {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let count = self.keys.iter().filter(|key| store.exists(key)).count();

        Ok(Reply::Integer(count as i64))
    }
}

impl TryFrom<&mut CommandParser> for Exists {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.rest()?;
        Ok(Self { keys })
    }
}

/// Returns the string representation of the type of the value stored at key: `string`,
/// `list`, `set`, `zset` or `hash`, and `none` when the key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/type>
#[derive(Debug, PartialEq)]
pub struct Type {
    pub key: Bytes,
}

impl Executable for Type {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let name = store.get(&self.key).map_or("none", |value| value.type_name());

        Ok(Reply::status(name))
    }
}

impl TryFrom<&mut CommandParser> for Type {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Returns all keys matching a glob-style pattern.
///
/// Ref: <https://redis.io/docs/latest/commands/keys>
#[derive(Debug, PartialEq)]
pub struct Keys {
    pub pattern: Bytes,
}

impl Executable for Keys {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let pattern = Pattern::compile(self.pattern);
        let mut store = db.lock();

        let mut keys: Vec<Bytes> = store
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        keys.sort();

        Ok(Reply::bulks(keys))
    }
}

impl TryFrom<&mut CommandParser> for Keys {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let pattern = parser.next_bytes()?;
        Ok(Self { pattern })
    }
}

/// Return the number of keys in the currently-selected database.
///
/// Ref: <https://redis.io/docs/latest/commands/dbsize>
#[derive(Debug, PartialEq)]
pub struct DbSize;

impl Executable for DbSize {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let size = db.lock().size();
        Ok(Reply::Integer(size as i64))
    }
}

impl TryFrom<&mut CommandParser> for DbSize {
    type Error = CommandError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

/// Delete all the keys of the currently selected database.
///
/// Ref: <https://redis.io/docs/latest/commands/flushdb>
#[derive(Debug, PartialEq)]
pub struct FlushDb;

impl Executable for FlushDb {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        db.lock().clear();
        Ok(Reply::ok())
    }
}

impl TryFrom<&mut CommandParser> for FlushDb {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        // Accepts and ignores the ASYNC / SYNC modifier.
        if parser.has_next() {
            let mode = parser.next_string()?.to_lowercase();
            if mode != "async" && mode != "sync" {
                return Err(CommandError::Syntax);
            }
        }
        Ok(Self)
    }
}

/// Set a timeout on key, in milliseconds. EXPIRE and PEXPIRE both parse into this command. A
/// timeout that is not positive deletes the key right away.
///
/// Ref: <https://redis.io/docs/latest/commands/expire>
#[derive(Debug, PartialEq)]
pub struct Expire {
    pub key: Bytes,
    pub millis: i64,
}

impl Expire {
    pub fn seconds(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, 1000)
    }

    pub fn millis(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, 1)
    }

    fn parse(parser: &mut CommandParser, millis_per_unit: i64) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let millis = parser
            .next_integer()?
            .checked_mul(millis_per_unit)
            .ok_or_else(|| CommandError::InvalidExpireTime(parser.verb().to_string()))?;

        Ok(Self { key, millis })
    }
}

impl Executable for Expire {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        let applied = if self.millis <= 0 {
            store.remove(&self.key).is_some()
        } else {
            store.expire(&self.key, Duration::from_millis(self.millis as u64))
        };

        Ok(Reply::Integer(applied as i64))
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum TimeUnit {
    Seconds,
    Millis,
}

/// Returns the remaining time to live of a key that has a timeout: `-2` when the key does not
/// exist, `-1` when it has no associated expire. TTL and PTTL both parse into this command.
///
/// Ref: <https://redis.io/docs/latest/commands/ttl>
#[derive(Debug, PartialEq)]
pub struct Ttl {
    pub key: Bytes,
    pub unit: TimeUnit,
}

impl Ttl {
    pub fn seconds(parser: &mut CommandParser) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        Ok(Self {
            key,
            unit: TimeUnit::Seconds,
        })
    }

    pub fn millis(parser: &mut CommandParser) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        Ok(Self {
            key,
            unit: TimeUnit::Millis,
        })
    }
}

impl Executable for Ttl {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let ttl = match db.lock().ttl(&self.key) {
            None => -2,
            Some(None) => -1,
            Some(Some(remaining)) => match self.unit {
                // Rounded to the nearest second.
                TimeUnit::Seconds => ((remaining.as_millis() + 500) / 1000) as i64,
                TimeUnit::Millis => remaining.as_millis() as i64,
            },
        };

        Ok(Reply::Integer(ttl))
    }
}

/// Remove the existing timeout on key.
///
/// Ref: <https://redis.io/docs/latest/commands/persist>
#[derive(Debug, PartialEq)]
pub struct Persist {
    pub key: Bytes,
}

impl Executable for Persist {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let removed = db.lock().persist(&self.key);
        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for Persist {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::commands::exec_command;
    use tokio::time;

    #[tokio::test]
    async fn del_and_exists() {
        let db = Keyspace::new(0);
        exec_command(&db, Command::new("MSET").arg("a").arg("1").arg("b").arg("2"));

        assert_eq!(
            exec_command(&db, Command::new("EXISTS").arg("a").arg("a").arg("c")),
            Reply::Integer(2)
        );
        assert_eq!(
            exec_command(&db, Command::new("DEL").arg("a").arg("c")),
            Reply::Integer(1)
        );
        assert_eq!(
            exec_command(&db, Command::new("DBSIZE")),
            Reply::Integer(1)
        );
    }

    #[tokio::test]
    async fn type_of_each_value() {
        let db = Keyspace::new(0);
        exec_command(&db, Command::new("SET").arg("s").arg("v"));
        exec_command(&db, Command::new("RPUSH").arg("l").arg("v"));
        exec_command(&db, Command::new("SADD").arg("set").arg("v"));
        exec_command(&db, Command::new("HSET").arg("h").arg("f").arg("v"));
        exec_command(&db, Command::new("ZADD").arg("z").arg(1).arg("v"));

        for (key, name) in [
            ("s", "string"),
            ("l", "list"),
            ("set", "set"),
            ("h", "hash"),
            ("z", "zset"),
            ("missing", "none"),
        ] {
            assert_eq!(
                exec_command(&db, Command::new("TYPE").arg(key)),
                Reply::status(name)
            );
        }
    }

    #[tokio::test]
    async fn keys_by_pattern() {
        let db = Keyspace::new(0);
        exec_command(
            &db,
            Command::new("MSET")
                .args_from(["firstname", "Jack", "lastname", "Stuntman", "age", "35"]),
        );

        assert_eq!(
            exec_command(&db, Command::new("KEYS").arg("*name*")),
            Reply::bulks(["firstname", "lastname"])
        );
        assert_eq!(
            exec_command(&db, Command::new("KEYS").arg("a??")),
            Reply::bulks(["age"])
        );
        assert_eq!(
            exec_command(&db, Command::new("KEYS").arg("*")),
            Reply::bulks(["age", "firstname", "lastname"])
        );
    }

    #[tokio::test]
    async fn flushdb() {
        let db = Keyspace::new(0);
        exec_command(&db, Command::new("SET").arg("a").arg("1"));

        assert_eq!(exec_command(&db, Command::new("FLUSHDB")), Reply::ok());
        assert_eq!(exec_command(&db, Command::new("DBSIZE")), Reply::Integer(0));
    }

    #[tokio::test]
    async fn expire_ttl_and_persist() {
        time::pause();
        let db = Keyspace::new(0);
        exec_command(&db, Command::new("SET").arg("k").arg("v"));

        assert_eq!(exec_command(&db, Command::new("TTL").arg("k")), Reply::Integer(-1));
        assert_eq!(
            exec_command(&db, Command::new("TTL").arg("missing")),
            Reply::Integer(-2)
        );

        assert_eq!(
            exec_command(&db, Command::new("EXPIRE").arg("k").arg(10)),
            Reply::Integer(1)
        );
        assert_eq!(exec_command(&db, Command::new("TTL").arg("k")), Reply::Integer(10));
        assert_eq!(
            exec_command(&db, Command::new("PTTL").arg("k")),
            Reply::Integer(10_000)
        );

        time::advance(Duration::from_secs(4)).await;
        assert_eq!(exec_command(&db, Command::new("TTL").arg("k")), Reply::Integer(6));

        assert_eq!(
            exec_command(&db, Command::new("PERSIST").arg("k")),
            Reply::Integer(1)
        );
        assert_eq!(exec_command(&db, Command::new("TTL").arg("k")), Reply::Integer(-1));

        assert_eq!(
            exec_command(&db, Command::new("PEXPIRE").arg("k").arg(100)),
            Reply::Integer(1)
        );
        time::advance(Duration::from_millis(101)).await;
        assert_eq!(
            exec_command(&db, Command::new("EXISTS").arg("k")),
            Reply::Integer(0)
        );
    }

    #[tokio::test]
    async fn non_positive_expire_deletes() {
        let db = Keyspace::new(0);
        exec_command(&db, Command::new("SET").arg("k").arg("v"));

        assert_eq!(
            exec_command(&db, Command::new("EXPIRE").arg("k").arg(-1)),
            Reply::Integer(1)
        );
        assert_eq!(exec_command(&db, Command::new("GET").arg("k")), Reply::nil());
        assert_eq!(
            exec_command(&db, Command::new("EXPIRE").arg("k").arg(10)),
            Reply::Integer(0)
        );
    }
}
