use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandError, CommandParser};
use crate::keyspace::Keyspace;
use crate::reply::Reply;
use crate::zset::index_range;

/// Which end of a list a command works on.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum End {
    Front,
    Back,
}

/// Insert all the specified values at the head (LPUSH) or the tail (RPUSH) of the list
/// stored at key, creating the list when needed. Returns the length of the list after the
/// push.
///
/// Ref: <https://redis.io/docs/latest/commands/lpush>
#[derive(Debug, PartialEq)]
pub struct Push {
    pub key: Bytes,
    pub values: Vec<Bytes>,
    pub end: End,
}

impl Push {
    pub fn front(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, End::Front)
    }

    pub fn back(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, End::Back)
    }

    fn parse(parser: &mut CommandParser, end: End) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let values = parser.rest()?;
        Ok(Self { key, values, end })
    }
}

impl Executable for Push {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let list = store.list_entry(&self.key)?;

        for value in self.values {
            match self.end {
                End::Front => list.push_front(value),
                End::Back => list.push_back(value),
            }
        }

        Ok(Reply::Integer(list.len() as i64))
    }
}

/// Removes and returns the first (LPOP) or last (RPOP) elements of the list stored at key.
/// Without a count a single bulk string is returned, with a count an array of at most that
/// many elements.
///
/// Ref: <https://redis.io/docs/latest/commands/lpop>
#[derive(Debug, PartialEq)]
pub struct Pop {
    pub key: Bytes,
    pub end: End,
    pub count: Option<usize>,
}

impl Pop {
    pub fn front(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, End::Front)
    }

    pub fn back(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, End::Back)
    }

    fn parse(parser: &mut CommandParser, end: End) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let count = if parser.has_next() {
            let count = parser.next_integer()?;
            Some(usize::try_from(count).map_err(|_| CommandError::NotAnInteger)?)
        } else {
            None
        };

        Ok(Self { key, end, count })
    }
}

impl Executable for Pop {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(list) = store.list_mut(&self.key)? else {
            return Ok(match self.count {
                Some(_) => Reply::Array(None),
                None => Reply::nil(),
            });
        };

        let mut pop = || match self.end {
            End::Front => list.pop_front(),
            End::Back => list.pop_back(),
        };

        let reply = match self.count {
            None => pop().map_or_else(Reply::nil, Reply::bulk),
            Some(count) => Reply::bulks(std::iter::from_fn(pop).take(count)),
        };

        store.remove_if_empty(&self.key);
        Ok(reply)
    }
}

/// Returns the length of the list stored at key, 0 when the key does not exist.
///
/// Ref: <https://redis.io/docs/latest/commands/llen>
#[derive(Debug, PartialEq)]
pub struct Llen {
    pub key: Bytes,
}

impl Executable for Llen {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let len = store.list(&self.key)?.map_or(0, |list| list.len());

        Ok(Reply::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser> for Llen {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

/// Returns the specified elements of the list stored at key. Both offsets are inclusive and
/// may be negative, counting from the end of the list.
///
/// Ref: <https://redis.io/docs/latest/commands/lrange>
#[derive(Debug, PartialEq)]
pub struct Lrange {
    pub key: Bytes,
    pub start: i64,
    pub stop: i64,
}

impl Executable for Lrange {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(list) = store.list(&self.key)? else {
            return Ok(Reply::array([]));
        };

        let Some((start, stop)) = index_range(self.start, self.stop, list.len()) else {
            return Ok(Reply::array([]));
        };

        Ok(Reply::bulks(list.range(start..=stop).cloned()))
    }
}

impl TryFrom<&mut CommandParser> for Lrange {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let start = parser.next_integer()?;
        let stop = parser.next_integer()?;

        Ok(Self { key, start, stop })
    }
}

/// Returns the element at index in the list stored at key. Negative indices count from the
/// tail.
///
/// Ref: <https://redis.io/docs/latest/commands/lindex>
#[derive(Debug, PartialEq)]
pub struct Lindex {
    pub key: Bytes,
    pub index: i64,
}

impl Executable for Lindex {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(list) = store.list(&self.key)? else {
            return Ok(Reply::nil());
        };

        let index = if self.index < 0 {
            self.index + list.len() as i64
        } else {
            self.index
        };

        let value = usize::try_from(index).ok().and_then(|i| list.get(i)).cloned();
        Ok(value.map_or_else(Reply::nil, Reply::bulk))
    }
}

impl TryFrom<&mut CommandParser> for Lindex {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let index = parser.next_integer()?;

        Ok(Self { key, index })
    }
}
