use bytes::Bytes;
use itertools::Itertools;

use crate::commands::executable::Executable;
use crate::commands::{checked_incr, CommandError, CommandParser};
use crate::encoding::num_to_bytes;
use crate::keyspace::Keyspace;
use crate::reply::Reply;

/// Sets the specified fields to their respective values in the hash stored at key. Returns the
/// number of fields that were added.
///
/// Ref: <https://redis.io/docs/latest/commands/hset>
#[derive(Debug, PartialEq)]
pub struct Hset {
    pub key: Bytes,
    pub pairs: Vec<(Bytes, Bytes)>,
}

impl Executable for Hset {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let hash = store.hash_entry(&self.key)?;

        let added = self
            .pairs
            .into_iter()
            .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
            .count();

        Ok(Reply::Integer(added as i64))
    }
}

impl TryFrom<&mut CommandParser> for Hset {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let args = parser.rest()?;
        if args.len() % 2 != 0 {
            return Err(parser.wrong_arity());
        }

        let pairs = args.into_iter().tuples().collect();
        Ok(Self { key, pairs })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/hget>
#[derive(Debug, PartialEq)]
pub struct Hget {
    pub key: Bytes,
    pub field: Bytes,
}

impl Executable for Hget {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let value = store
            .hash(&self.key)?
            .and_then(|hash| hash.get(&self.field))
            .cloned();

        Ok(value.map_or_else(Reply::nil, Reply::bulk))
    }
}

impl TryFrom<&mut CommandParser> for Hget {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let field = parser.next_bytes()?;
        Ok(Self { key, field })
    }
}

/// Removes the specified fields from the hash stored at key. The key is deleted together with
/// its last field.
///
/// Ref: <https://redis.io/docs/latest/commands/hdel>
#[derive(Debug, PartialEq)]
pub struct Hdel {
    pub key: Bytes,
    pub fields: Vec<Bytes>,
}

impl Executable for Hdel {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(hash) = store.hash_mut(&self.key)? else {
            return Ok(Reply::Integer(0));
        };

        let removed = self
            .fields
            .iter()
            .filter(|field| hash.remove(*field).is_some())
            .count();

        store.remove_if_empty(&self.key);
        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for Hdel {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let fields = parser.rest()?;
        Ok(Self { key, fields })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/hexists>
#[derive(Debug, PartialEq)]
pub struct Hexists {
    pub key: Bytes,
    pub field: Bytes,
}

impl Executable for Hexists {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let found = store
            .hash(&self.key)?
            .is_some_and(|hash| hash.contains_key(&self.field));

        Ok(Reply::Integer(found as i64))
    }
}

impl TryFrom<&mut CommandParser> for Hexists {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let field = parser.next_bytes()?;
        Ok(Self { key, field })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/hlen>
#[derive(Debug, PartialEq)]
pub struct Hlen {
    pub key: Bytes,
}

impl Executable for Hlen {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let len = store.hash(&self.key)?.map_or(0, |hash| hash.len());

        Ok(Reply::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser> for Hlen {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Returns all fields and values of the hash stored at key, flattened as `field, value, ...`.
///
/// Ref: <https://redis.io/docs/latest/commands/hgetall>
#[derive(Debug, PartialEq)]
pub struct Hgetall {
    pub key: Bytes,
}

impl Executable for Hgetall {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let items = store
            .hash(&self.key)?
            .map(|hash| {
                hash.iter()
                    .flat_map(|(field, value)| [field.clone(), value.clone()])
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Reply::bulks(items))
    }
}

impl TryFrom<&mut CommandParser> for Hgetall {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/hkeys>
#[derive(Debug, PartialEq)]
pub struct Hkeys {
    pub key: Bytes,
}

impl Executable for Hkeys {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let fields = store
            .hash(&self.key)?
            .map(|hash| hash.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(Reply::bulks(fields))
    }
}

impl TryFrom<&mut CommandParser> for Hkeys {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/hvals>
#[derive(Debug, PartialEq)]
pub struct Hvals {
    pub key: Bytes,
}

impl Executable for Hvals {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let values = store
            .hash(&self.key)?
            .map(|hash| hash.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(Reply::bulks(values))
    }
}

impl TryFrom<&mut CommandParser> for Hvals {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Increments the number stored at field in the hash stored at key by increment. A missing
/// field counts as 0.
///
/// Ref: <https://redis.io/docs/latest/commands/hincrby>
#[derive(Debug, PartialEq)]
pub struct Hincrby {
    pub key: Bytes,
    pub field: Bytes,
    pub increment: i64,
}

impl Executable for Hincrby {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let hash = store.hash_entry(&self.key)?;

        let current = hash.get(&self.field).map(|value| &value[..]);
        let value = checked_incr(current, self.increment).map_err(|err| match err {
            CommandError::NotAnInteger => CommandError::HashNotAnInteger,
            err => err,
        });

        match value {
            Ok(value) => {
                hash.insert(self.field, num_to_bytes(value));
                Ok(Reply::Integer(value))
            }
            Err(err) => {
                // The hash may have been created just for this call.
                store.remove_if_empty(&self.key);
                Err(err)
            }
        }
    }
}

impl TryFrom<&mut CommandParser> for Hincrby {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let field = parser.next_bytes()?;
        let increment = parser.next_integer()?;
        Ok(Self {
            key,
            field,
            increment,
        })
    }
}
