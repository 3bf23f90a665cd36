pub mod connection;
pub mod executable;
pub mod hashes;
pub mod keys;
pub mod lists;
pub mod pubsub;
pub mod server;
pub mod sets;
pub mod sorted_sets;
pub mod strings;

use bytes::Bytes;
use num_traits::CheckedAdd;
use std::str::{self, FromStr};
use std::vec;
use thiserror::Error as ThisError;

use crate::command::Command;
use crate::commands::executable::Executable;
use crate::encoding::{format_float, parse_float, parse_num};
use crate::keyspace::Keyspace;
use crate::reply::Reply;
use crate::store::WrongType;

use connection::{Auth, Client, Echo, Ping, Select};
use hashes::{Hdel, Hexists, Hget, Hgetall, Hincrby, Hkeys, Hlen, Hset, Hvals};
use keys::{DbSize, Del, Exists, Expire, FlushDb, Keys, Persist, Ttl, Type};
use lists::{Lindex, Llen, Lrange, Pop, Push};
use pubsub::{Psubscribe, Publish, Punsubscribe, Subscribe, Unsubscribe};
use server::Info;
use sets::{Sadd, Scard, Sismember, Smembers, Srem};
use sorted_sets::{
    Zadd, Zcard, Zcount, Zincrby, Zrange, ZrangeByScore, Zrank, Zrem, ZremRangeByRank,
    ZremRangeByScore, Zscore, Zstore,
};
use strings::{Append, Get, GetSet, IncrBy, Mget, Mset, Set, SetNx, Strlen};

/// A decoded command, typed. Connection-scoped verbs are handled by the session that owns
/// the connection; everything that only touches one keyspace is a [`DbCommand`].
#[derive(Debug, PartialEq)]
pub enum Operation {
    Auth(Auth),
    Client(Client),
    FlushAll,
    Info(Info),
    Monitor,
    Ping(Ping),
    Psubscribe(Psubscribe),
    Punsubscribe(Punsubscribe),
    Quit,
    Select(Select),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),

    Db(DbCommand),
}

#[derive(Debug, PartialEq)]
pub enum DbCommand {
    Echo(Echo),
    Publish(Publish),

    DbSize(DbSize),
    Del(Del),
    Exists(Exists),
    Expire(Expire),
    FlushDb(FlushDb),
    Keys(Keys),
    Persist(Persist),
    Ttl(Ttl),
    Type(Type),

    Append(Append),
    Get(Get),
    GetSet(GetSet),
    IncrBy(IncrBy),
    Mget(Mget),
    Mset(Mset),
    Set(Set),
    SetNx(SetNx),
    Strlen(Strlen),

    Lindex(Lindex),
    Llen(Llen),
    Lrange(Lrange),
    Pop(Pop),
    Push(Push),

    Sadd(Sadd),
    Scard(Scard),
    Sismember(Sismember),
    Smembers(Smembers),
    Srem(Srem),

    Hdel(Hdel),
    Hexists(Hexists),
    Hget(Hget),
    Hgetall(Hgetall),
    Hincrby(Hincrby),
    Hkeys(Hkeys),
    Hlen(Hlen),
    Hset(Hset),
    Hvals(Hvals),

    Zadd(Zadd),
    Zcard(Zcard),
    Zcount(Zcount),
    Zincrby(Zincrby),
    Zrange(Zrange),
    ZrangeByScore(ZrangeByScore),
    Zrank(Zrank),
    Zrem(Zrem),
    ZremRangeByRank(ZremRangeByRank),
    ZremRangeByScore(ZremRangeByScore),
    Zscore(Zscore),
    Zstore(Zstore),
}

impl From<DbCommand> for Operation {
    fn from(cmd: DbCommand) -> Self {
        Operation::Db(cmd)
    }
}

impl Executable for DbCommand {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        match self {
            DbCommand::Echo(cmd) => cmd.exec(db),
            DbCommand::Publish(cmd) => cmd.exec(db),

            DbCommand::DbSize(cmd) => cmd.exec(db),
            DbCommand::Del(cmd) => cmd.exec(db),
            DbCommand::Exists(cmd) => cmd.exec(db),
            DbCommand::Expire(cmd) => cmd.exec(db),
            DbCommand::FlushDb(cmd) => cmd.exec(db),
            DbCommand::Keys(cmd) => cmd.exec(db),
            DbCommand::Persist(cmd) => cmd.exec(db),
            DbCommand::Ttl(cmd) => cmd.exec(db),
            DbCommand::Type(cmd) => cmd.exec(db),

            DbCommand::Append(cmd) => cmd.exec(db),
            DbCommand::Get(cmd) => cmd.exec(db),
            DbCommand::GetSet(cmd) => cmd.exec(db),
            DbCommand::IncrBy(cmd) => cmd.exec(db),
            DbCommand::Mget(cmd) => cmd.exec(db),
            DbCommand::Mset(cmd) => cmd.exec(db),
            DbCommand::Set(cmd) => cmd.exec(db),
            DbCommand::SetNx(cmd) => cmd.exec(db),
            DbCommand::Strlen(cmd) => cmd.exec(db),

            DbCommand::Lindex(cmd) => cmd.exec(db),
            DbCommand::Llen(cmd) => cmd.exec(db),
            DbCommand::Lrange(cmd) => cmd.exec(db),
            DbCommand::Pop(cmd) => cmd.exec(db),
            DbCommand::Push(cmd) => cmd.exec(db),

            DbCommand::Sadd(cmd) => cmd.exec(db),
            DbCommand::Scard(cmd) => cmd.exec(db),
            DbCommand::Sismember(cmd) => cmd.exec(db),
            DbCommand::Smembers(cmd) => cmd.exec(db),
            DbCommand::Srem(cmd) => cmd.exec(db),

            DbCommand::Hdel(cmd) => cmd.exec(db),
            DbCommand::Hexists(cmd) => cmd.exec(db),
            DbCommand::Hget(cmd) => cmd.exec(db),
            DbCommand::Hgetall(cmd) => cmd.exec(db),
            DbCommand::Hincrby(cmd) => cmd.exec(db),
            DbCommand::Hkeys(cmd) => cmd.exec(db),
            DbCommand::Hlen(cmd) => cmd.exec(db),
            DbCommand::Hset(cmd) => cmd.exec(db),
            DbCommand::Hvals(cmd) => cmd.exec(db),

            DbCommand::Zadd(cmd) => cmd.exec(db),
            DbCommand::Zcard(cmd) => cmd.exec(db),
            DbCommand::Zcount(cmd) => cmd.exec(db),
            DbCommand::Zincrby(cmd) => cmd.exec(db),
            DbCommand::Zrange(cmd) => cmd.exec(db),
            DbCommand::ZrangeByScore(cmd) => cmd.exec(db),
            DbCommand::Zrank(cmd) => cmd.exec(db),
            DbCommand::Zrem(cmd) => cmd.exec(db),
            DbCommand::ZremRangeByRank(cmd) => cmd.exec(db),
            DbCommand::ZremRangeByScore(cmd) => cmd.exec(db),
            DbCommand::Zscore(cmd) => cmd.exec(db),
            DbCommand::Zstore(cmd) => cmd.exec(db),
        }
    }
}

impl TryFrom<Command> for Operation {
    type Error = CommandError;

    fn try_from(command: Command) -> Result<Self, Self::Error> {
        let verb = command.verb();
        let mut args = command.into_args().into_iter();
        // Skip the verb itself.
        args.next();

        let parser = &mut CommandParser {
            verb: verb.clone(),
            parts: args,
        };

        let operation = match &verb[..] {
            "auth" => Operation::Auth(parser.parse()?),
            "client" => Operation::Client(parser.parse()?),
            "flushall" => parser.parse_unit(Operation::FlushAll)?,
            "info" => Operation::Info(parser.parse()?),
            "monitor" => parser.parse_unit(Operation::Monitor)?,
            "ping" => Operation::Ping(parser.parse()?),
            "psubscribe" => Operation::Psubscribe(parser.parse()?),
            "punsubscribe" => Operation::Punsubscribe(parser.parse()?),
            "quit" => parser.parse_unit(Operation::Quit)?,
            "select" => Operation::Select(parser.parse()?),
            "subscribe" => Operation::Subscribe(parser.parse()?),
            "unsubscribe" => Operation::Unsubscribe(parser.parse()?),

            "echo" => DbCommand::Echo(parser.parse()?).into(),
            "publish" => DbCommand::Publish(parser.parse()?).into(),

            "dbsize" => DbCommand::DbSize(parser.parse()?).into(),
            "del" => DbCommand::Del(parser.parse()?).into(),
            "exists" => DbCommand::Exists(parser.parse()?).into(),
            "expire" => DbCommand::Expire(Expire::seconds(parser)?).into(),
            "pexpire" => DbCommand::Expire(Expire::millis(parser)?).into(),
            "flushdb" => DbCommand::FlushDb(parser.parse()?).into(),
            "keys" => DbCommand::Keys(parser.parse()?).into(),
            "persist" => DbCommand::Persist(parser.parse()?).into(),
            "ttl" => DbCommand::Ttl(Ttl::seconds(parser)?).into(),
            "pttl" => DbCommand::Ttl(Ttl::millis(parser)?).into(),
            "type" => DbCommand::Type(parser.parse()?).into(),

            "append" => DbCommand::Append(parser.parse()?).into(),
            "get" => DbCommand::Get(parser.parse()?).into(),
            "getset" => DbCommand::GetSet(parser.parse()?).into(),
            "incr" => DbCommand::IncrBy(IncrBy::by_one(parser, 1)?).into(),
            "decr" => DbCommand::IncrBy(IncrBy::by_one(parser, -1)?).into(),
            "incrby" => DbCommand::IncrBy(IncrBy::by(parser, false)?).into(),
            "decrby" => DbCommand::IncrBy(IncrBy::by(parser, true)?).into(),
            "mget" => DbCommand::Mget(parser.parse()?).into(),
            "mset" => DbCommand::Mset(parser.parse()?).into(),
            "set" => DbCommand::Set(parser.parse()?).into(),
            "setnx" => DbCommand::SetNx(parser.parse()?).into(),
            "strlen" => DbCommand::Strlen(parser.parse()?).into(),

            "lindex" => DbCommand::Lindex(parser.parse()?).into(),
            "llen" => DbCommand::Llen(parser.parse()?).into(),
            "lrange" => DbCommand::Lrange(parser.parse()?).into(),
            "lpop" => DbCommand::Pop(Pop::front(parser)?).into(),
            "rpop" => DbCommand::Pop(Pop::back(parser)?).into(),
            "lpush" => DbCommand::Push(Push::front(parser)?).into(),
            "rpush" => DbCommand::Push(Push::back(parser)?).into(),

            "sadd" => DbCommand::Sadd(parser.parse()?).into(),
            "scard" => DbCommand::Scard(parser.parse()?).into(),
            "sismember" => DbCommand::Sismember(parser.parse()?).into(),
            "smembers" => DbCommand::Smembers(parser.parse()?).into(),
            "srem" => DbCommand::Srem(parser.parse()?).into(),

            "hdel" => DbCommand::Hdel(parser.parse()?).into(),
            "hexists" => DbCommand::Hexists(parser.parse()?).into(),
            "hget" => DbCommand::Hget(parser.parse()?).into(),
            "hgetall" => DbCommand::Hgetall(parser.parse()?).into(),
            "hincrby" => DbCommand::Hincrby(parser.parse()?).into(),
            "hkeys" => DbCommand::Hkeys(parser.parse()?).into(),
            "hlen" => DbCommand::Hlen(parser.parse()?).into(),
            "hset" => DbCommand::Hset(parser.parse()?).into(),
            "hvals" => DbCommand::Hvals(parser.parse()?).into(),

            "zadd" => DbCommand::Zadd(parser.parse()?).into(),
            "zcard" => DbCommand::Zcard(parser.parse()?).into(),
            "zcount" => DbCommand::Zcount(parser.parse()?).into(),
            "zincrby" => DbCommand::Zincrby(parser.parse()?).into(),
            "zrange" => DbCommand::Zrange(Zrange::forward(parser)?).into(),
            "zrevrange" => DbCommand::Zrange(Zrange::reverse(parser)?).into(),
            "zrangebyscore" => DbCommand::ZrangeByScore(ZrangeByScore::forward(parser)?).into(),
            "zrevrangebyscore" => {
                DbCommand::ZrangeByScore(ZrangeByScore::reverse(parser)?).into()
            }
            "zrank" => DbCommand::Zrank(Zrank::forward(parser)?).into(),
            "zrevrank" => DbCommand::Zrank(Zrank::reverse(parser)?).into(),
            "zrem" => DbCommand::Zrem(parser.parse()?).into(),
            "zremrangebyrank" => DbCommand::ZremRangeByRank(parser.parse()?).into(),
            "zremrangebyscore" => DbCommand::ZremRangeByScore(parser.parse()?).into(),
            "zscore" => DbCommand::Zscore(parser.parse()?).into(),
            "zunionstore" => DbCommand::Zstore(Zstore::union(parser)?).into(),
            "zinterstore" => DbCommand::Zstore(Zstore::intersection(parser)?).into(),

            _ => return Err(CommandError::UnknownCommand(one_line(&verb))),
        };

        parser.finish()?;
        Ok(operation)
    }
}

/// Walks the arguments of one command, verb excluded.
pub struct CommandParser {
    verb: String,
    parts: vec::IntoIter<Bytes>,
}

impl CommandParser {
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Parses a command that takes no arguments.
    fn parse_unit(&mut self, operation: Operation) -> Result<Operation, CommandError> {
        self.finish()?;
        Ok(operation)
    }

    fn parse<T>(&mut self) -> Result<T, CommandError>
    where
        T: for<'a> TryFrom<&'a mut CommandParser, Error = CommandError>,
    {
        T::try_from(self)
    }

    /// Fails with an arity error when arguments are left over.
    fn finish(&self) -> Result<(), CommandError> {
        if self.has_next() {
            Err(self.wrong_arity())
        } else {
            Ok(())
        }
    }

    pub fn wrong_arity(&self) -> CommandError {
        CommandError::WrongArity(self.verb.clone())
    }

    pub fn remaining(&self) -> usize {
        self.parts.len()
    }

    pub fn has_next(&self) -> bool {
        !self.parts.as_slice().is_empty()
    }

    /// The next argument, lowercased, without consuming it.
    pub fn peek_keyword(&self) -> Option<String> {
        self.parts
            .as_slice()
            .first()
            .map(|arg| String::from_utf8_lossy(arg).to_lowercase())
    }

    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        self.parts.next().ok_or_else(|| self.wrong_arity())
    }

    pub fn next_string(&mut self) -> Result<String, CommandError> {
        let bytes = self.next_bytes()?;
        str::from_utf8(&bytes[..])
            .map(|s| s.to_string())
            .map_err(|_| CommandError::Syntax)
    }

    pub fn next_integer(&mut self) -> Result<i64, CommandError> {
        let bytes = self.next_bytes()?;
        parse_num(&bytes).ok_or(CommandError::NotAnInteger)
    }

    pub fn next_float(&mut self) -> Result<f64, CommandError> {
        let bytes = self.next_bytes()?;
        parse_float(&bytes).ok_or(CommandError::NotAFloat)
    }

    /// Parses the next argument as a case-insensitive keyword.
    pub fn next_keyword<T: FromStr>(&mut self) -> Result<T, CommandError> {
        self.next_string()?
            .parse::<T>()
            .map_err(|_| CommandError::Syntax)
    }

    /// All remaining arguments, requiring at least one.
    pub fn rest(&mut self) -> Result<Vec<Bytes>, CommandError> {
        if !self.has_next() {
            return Err(self.wrong_arity());
        }
        Ok(self.parts.by_ref().collect())
    }

    /// All remaining arguments, possibly none.
    pub fn rest_or_empty(&mut self) -> Vec<Bytes> {
        self.parts.by_ref().collect()
    }
}

#[derive(Debug, Clone, ThisError, PartialEq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR unknown subcommand '{0}'")]
    UnknownSubcommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR value is not a valid float")]
    NotAFloat,
    #[error("ERR hash value is not an integer")]
    HashNotAnInteger,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
    #[error("ERR resulting score is not a number (NaN)")]
    NotANumber,
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR min or max is not a float")]
    RangeNotAFloat,
    #[error("ERR at least 1 input key is needed for '{0}' command")]
    NoInputKeys(String),
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),
    #[error("NOAUTH Authentication required.")]
    NoAuth,
    #[error("WRONGPASS invalid username-password pair or user is disabled.")]
    WrongPass,
    #[error("ERR AUTH <password> called without any password configured for the default user. Are you sure your configuration is correct?")]
    NoPasswordConfigured,
    #[error("ERR DB index is out of range")]
    InvalidDbIndex,
    #[error("ERR Can't execute '{0}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT are allowed in this context")]
    SubscribedContext(String),
    #[error("ERR {0}")]
    Internal(String),
}

impl From<WrongType> for CommandError {
    fn from(_: WrongType) -> Self {
        CommandError::WrongType
    }
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::Error(err.to_string())
    }
}

/// Client text quoted in an error reply, with line breaks turned into spaces.
pub(crate) fn one_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Adds `increment` to an integer stored as decimal text, failing on overflow instead of
/// wrapping. `current` is `None` for a missing value, which counts as zero.
pub(crate) fn checked_incr<T>(current: Option<&[u8]>, increment: T) -> Result<T, CommandError>
where
    T: CheckedAdd + FromStr + Default,
{
    let value = match current {
        Some(bytes) => str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<T>().ok())
            .ok_or(CommandError::NotAnInteger)?,
        None => T::default(),
    };

    value
        .checked_add(&increment)
        .ok_or(CommandError::Overflow)
}

/// Flattens `(member, score)` pairs into `member, score, member, score, ...`.
pub(crate) fn with_scores(entries: Vec<(Bytes, f64)>) -> Reply {
    Reply::array(entries.into_iter().flat_map(|(member, score)| {
        [
            Reply::bulk(member),
            Reply::bulk(format_float(score)),
        ]
    }))
}

/// Runs a keyspace command the way a session would, rendering errors as replies.
#[cfg(test)]
pub(crate) fn exec_command(db: &Keyspace, command: Command) -> Reply {
    match Operation::try_from(command) {
        Ok(Operation::Db(cmd)) => cmd.exec(db).unwrap_or_else(Reply::from),
        Ok(other) => panic!("not a keyspace command: {:?}", other),
        Err(err) => err.into(),
    }
}
