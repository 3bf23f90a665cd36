use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use strum_macros::EnumString;
use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{checked_incr, CommandError, CommandParser};
use crate::encoding::num_to_bytes;
use crate::keyspace::Keyspace;
use crate::reply::Reply;
use crate::store::Value;

/// Get the value of key. If the key does not exist the special value nil is returned. An error
/// is returned if the value stored at key is not a string, because GET only handles string
/// values.
///
/// Ref: <https://redis.io/docs/latest/commands/get>
#[derive(Debug, PartialEq)]
pub struct Get {
    pub key: Bytes,
}

impl Executable for Get {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let value = store.string(&self.key)?;

        Ok(value.cloned().map_or_else(Reply::nil, Reply::bulk))
    }
}

impl TryFrom<&mut CommandParser> for Get {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Condition {
    /// Only set the key if it does not already exist.
    IfMissing,
    /// Only set the key if it already exists.
    IfExists,
}

#[derive(Debug, EnumString)]
#[strum(ascii_case_insensitive)]
enum SetOption {
    Ex,
    Px,
    Nx,
    Xx,
}

/// Set key to hold the string value. If key already holds a value, it is overwritten,
/// regardless of its type. Any previous time to live associated with the key is discarded.
///
/// Options: `EX seconds`, `PX milliseconds`, `NX` and `XX`.
///
/// Ref: <https://redis.io/docs/latest/commands/set>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub ttl: Option<Duration>,
    pub condition: Option<Condition>,
}

impl Executable for Set {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        let exists = store.exists(&self.key);
        match (self.condition, exists) {
            (Some(Condition::IfMissing), true) | (Some(Condition::IfExists), false) => {
                return Ok(Reply::nil())
            }
            _ => {}
        }

        let value = Value::String(self.value);
        match self.ttl {
            Some(ttl) => store.set_with_ttl(self.key, value, ttl),
            None => store.set(self.key, value),
        }

        Ok(Reply::ok())
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        let mut ttl = None;
        let mut condition = None;

        while parser.has_next() {
            let option: SetOption = parser.next_keyword()?;
            match option {
                SetOption::Ex | SetOption::Px if ttl.is_some() => return Err(CommandError::Syntax),
                SetOption::Nx | SetOption::Xx if condition.is_some() => {
                    return Err(CommandError::Syntax)
                }
                SetOption::Ex => ttl = Some(expire_time(parser, 1000)?),
                SetOption::Px => ttl = Some(expire_time(parser, 1)?),
                SetOption::Nx => condition = Some(Condition::IfMissing),
                SetOption::Xx => condition = Some(Condition::IfExists),
            }
        }

        Ok(Self {
            key,
            value,
            ttl,
            condition,
        })
    }
}

/// Reads a strictly positive expire time and scales it to milliseconds.
fn expire_time(parser: &mut CommandParser, millis_per_unit: i64) -> Result<Duration, CommandError> {
    let verb = parser.verb().to_string();
    let invalid = || CommandError::InvalidExpireTime(verb.clone());

    let amount = parser.next_integer()?;
    if amount <= 0 {
        return Err(invalid());
    }

    amount
        .checked_mul(millis_per_unit)
        .map(|millis| Duration::from_millis(millis as u64))
        .ok_or_else(invalid)
}

/// Set key to hold string value if key does not exist. Returns 1 if the key was set, 0
/// otherwise.
///
/// Ref: <https://redis.io/docs/latest/commands/setnx>
#[derive(Debug, PartialEq)]
pub struct SetNx {
    pub key: Bytes,
    pub value: Bytes,
}

impl Executable for SetNx {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        if store.exists(&self.key) {
            return Ok(Reply::Integer(0));
        }

        store.set(self.key, Value::String(self.value));
        Ok(Reply::Integer(1))
    }
}

impl TryFrom<&mut CommandParser> for SetNx {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        Ok(Self { key, value })
    }
}

/// Atomically sets key to value and returns the old value stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/getset>
#[derive(Debug, PartialEq)]
pub struct GetSet {
    pub key: Bytes,
    pub value: Bytes,
}

impl Executable for GetSet {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        let previous = store.string(&self.key)?.cloned();
        store.set(self.key, Value::String(self.value));

        Ok(previous.map_or_else(Reply::nil, Reply::bulk))
    }
}

impl TryFrom<&mut CommandParser> for GetSet {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        Ok(Self { key, value })
    }
}

/// If key already exists and is a string, this command appends the value at the end of the
/// string. If key does not exist it is created and set as an empty string, so APPEND will be
/// similar to SET in this special case.
///
/// Ref: <https://redis.io/docs/latest/commands/append>
#[derive(Debug, PartialEq)]
pub struct Append {
    pub key: Bytes,
    pub value: Bytes,
}

impl Executable for Append {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let current = store.string_entry(&self.key)?;

        let mut buf = BytesMut::with_capacity(current.len() + self.value.len());
        buf.extend_from_slice(current);
        buf.extend_from_slice(&self.value);
        *current = buf.freeze();

        Ok(Reply::Integer(current.len() as i64))
    }
}

impl TryFrom<&mut CommandParser> for Append {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        Ok(Self { key, value })
    }
}

/// Returns the length of the string value stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/strlen>
#[derive(Debug, PartialEq)]
pub struct Strlen {
    pub key: Bytes,
}

impl Executable for Strlen {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let len = store.string(&self.key)?.map_or(0, |value| value.len());

        Ok(Reply::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser> for Strlen {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Increments the number stored at key by increment. If the key does not exist, it is set to 0
/// before performing the operation. INCR, DECR, INCRBY and DECRBY all parse into this command.
/// The key keeps its time to live.
///
/// Ref: <https://redis.io/docs/latest/commands/incrby>
#[derive(Debug, PartialEq)]
pub struct IncrBy {
    pub key: Bytes,
    pub increment: i64,
}

impl IncrBy {
    /// INCR and DECR.
    pub fn by_one(parser: &mut CommandParser, increment: i64) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        Ok(Self { key, increment })
    }

    /// INCRBY, and DECRBY when `negate` is set.
    pub fn by(parser: &mut CommandParser, negate: bool) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let amount = parser.next_integer()?;

        let increment = if negate {
            amount.checked_neg().ok_or(CommandError::Overflow)?
        } else {
            amount
        };

        Ok(Self { key, increment })
    }
}

impl Executable for IncrBy {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        let current = store.string(&self.key)?.cloned();
        let value = checked_incr(current.as_deref(), self.increment)?;
        store.replace(self.key, Value::String(num_to_bytes(value)));

        Ok(Reply::Integer(value))
    }
}

/// Returns the values of all specified keys. For every key that does not hold a string value
/// or does not exist, the special value nil is returned.
///
/// Ref: <https://redis.io/docs/latest/commands/mget>
#[derive(Debug, PartialEq)]
pub struct Mget {
    pub keys: Vec<Bytes>,
}

impl Executable for Mget {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        let values = self
            .keys
            .iter()
            .map(|key| match store.string(key) {
                Ok(Some(value)) => Reply::bulk(value.clone()),
                _ => Reply::nil(),
            })
            .collect::<Vec<_>>();

        Ok(Reply::array(values))
    }
}

impl TryFrom<&mut CommandParser> for Mget {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let keys = parser.rest()?;
        Ok(Self { keys })
    }
}

/// Sets the given keys to their respective values, replacing existing values. MSET is atomic:
/// all keys are set at once.
///
/// Ref: <https://redis.io/docs/latest/commands/mset>
#[derive(Debug, PartialEq)]
pub struct Mset {
    pub pairs: Vec<(Bytes, Bytes)>,
}

impl Executable for Mset {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        for (key, value) in self.pairs {
            store.set(key, Value::String(value));
        }

        Ok(Reply::ok())
    }
}

impl TryFrom<&mut CommandParser> for Mset {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let args = parser.rest()?;
        if args.len() % 2 != 0 {
            return Err(parser.wrong_arity());
        }

        let pairs = args.into_iter().tuples().collect();
        Ok(Self { pairs })
    }
}
