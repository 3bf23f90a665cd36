use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::keyspace::Keyspace;
use crate::reply::Reply;

/// Add the specified members to the set stored at key. Returns the number of members that
/// were not already part of the set.
///
/// Ref: <https://redis.io/docs/latest/commands/sadd>
#[derive(Debug, PartialEq)]
pub struct Sadd {
    pub key: Bytes,
    pub members: Vec<Bytes>,
}

impl Executable for Sadd {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let set = store.set_entry(&self.key)?;

        let added = self
            .members
            .into_iter()
            .filter(|member| set.insert(member.clone()))
            .count();

        Ok(Reply::Integer(added as i64))
    }
}

impl TryFrom<&mut CommandParser> for Sadd {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let members = parser.rest()?;
        Ok(Self { key, members })
    }
}

/// Remove the specified members from the set stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/srem>
#[derive(Debug, PartialEq)]
pub struct Srem {
    pub key: Bytes,
    pub members: Vec<Bytes>,
}

impl Executable for Srem {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(set) = store.set_mut(&self.key)? else {
            return Ok(Reply::Integer(0));
        };

        let removed = self
            .members
            .iter()
            .filter(|member| set.remove(*member))
            .count();

        store.remove_if_empty(&self.key);
        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for Srem {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let members = parser.rest()?;
        Ok(Self { key, members })
    }
}

/// Returns all the members of the set value stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/smembers>
#[derive(Debug, PartialEq)]
pub struct Smembers {
    pub key: Bytes,
}

impl Executable for Smembers {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let members = store
            .members(&self.key)?
            .map(|set| set.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(Reply::bulks(members))
    }
}

impl TryFrom<&mut CommandParser> for Smembers {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/sismember>
#[derive(Debug, PartialEq)]
pub struct Sismember {
    pub key: Bytes,
    pub member: Bytes,
}

impl Executable for Sismember {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let found = store
            .members(&self.key)?
            .is_some_and(|set| set.contains(&self.member));

        Ok(Reply::Integer(found as i64))
    }
}

impl TryFrom<&mut CommandParser> for Sismember {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let member = parser.next_bytes()?;
        Ok(Self { key, member })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/scard>
#[derive(Debug, PartialEq)]
pub struct Scard {
    pub key: Bytes,
}

impl Executable for Scard {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let len = store.members(&self.key)?.map_or(0, |set| set.len());

        Ok(Reply::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser> for Scard {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}
