use bytes::Bytes;
use strum_macros::EnumString;

use crate::commands::executable::Executable;
use crate::commands::{with_scores, CommandError, CommandParser};
use crate::encoding::format_float;
use crate::keyspace::Keyspace;
use crate::reply::Reply;
use crate::store::Value;
use crate::zset::{Score, ScoreBound, ScoreRange, SortedSet};

#[derive(Debug, EnumString)]
#[strum(ascii_case_insensitive)]
enum ZaddFlag {
    Nx,
    Xx,
    Ch,
}

/// Adds all the specified members with the specified scores to the sorted set stored at key.
/// Existing members get their score updated.
///
/// Flags: `NX` only adds new members, `XX` only updates existing ones, `CH` makes the reply
/// count changed members instead of added ones.
///
/// Ref: <https://redis.io/docs/latest/commands/zadd>
#[derive(Debug, PartialEq)]
pub struct Zadd {
    pub key: Bytes,
    pub members: Vec<(Score, Bytes)>,
    pub only_new: bool,
    pub only_existing: bool,
    pub count_changed: bool,
}

impl Executable for Zadd {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let zset = store.zset_entry(&self.key)?;

        let mut added = 0;
        let mut updated = 0;
        for (score, member) in self.members {
            match zset.score(&member) {
                Some(_) if self.only_new => {}
                None if self.only_existing => {}
                Some(previous) => {
                    if Score::new(previous) != Some(score) {
                        zset.add(member, score);
                        updated += 1;
                    }
                }
                None => {
                    zset.add(member, score);
                    added += 1;
                }
            }
        }

        store.remove_if_empty(&self.key);

        let count = if self.count_changed {
            added + updated
        } else {
            added
        };
        Ok(Reply::Integer(count))
    }
}

impl TryFrom<&mut CommandParser> for Zadd {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;

        let mut only_new = false;
        let mut only_existing = false;
        let mut count_changed = false;
        while let Some(flag) = parser
            .peek_keyword()
            .and_then(|word| word.parse::<ZaddFlag>().ok())
        {
            parser.next_bytes()?;
            match flag {
                ZaddFlag::Nx => only_new = true,
                ZaddFlag::Xx => only_existing = true,
                ZaddFlag::Ch => count_changed = true,
            }
        }

        if only_new && only_existing {
            return Err(CommandError::Internal(
                "XX and NX options at the same time are not compatible".to_string(),
            ));
        }

        let remaining = parser.remaining();
        if remaining == 0 || remaining % 2 != 0 {
            return Err(CommandError::Syntax);
        }

        let mut members = Vec::with_capacity(remaining / 2);
        while parser.has_next() {
            let score = Score::new(parser.next_float()?).ok_or(CommandError::NotAFloat)?;
            let member = parser.next_bytes()?;
            members.push((score, member));
        }

        Ok(Self {
            key,
            members,
            only_new,
            only_existing,
            count_changed,
        })
    }
}

/// Removes the specified members from the sorted set stored at key.
///
/// Ref: <https://redis.io/docs/latest/commands/zrem>
#[derive(Debug, PartialEq)]
pub struct Zrem {
    pub key: Bytes,
    pub members: Vec<Bytes>,
}

impl Executable for Zrem {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(zset) = store.zset_mut(&self.key)? else {
            return Ok(Reply::Integer(0));
        };

        let removed = self
            .members
            .iter()
            .filter(|member| zset.remove(member))
            .count();

        store.remove_if_empty(&self.key);
        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for Zrem {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let members = parser.rest()?;
        Ok(Self { key, members })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/zscore>
#[derive(Debug, PartialEq)]
pub struct Zscore {
    pub key: Bytes,
    pub member: Bytes,
}

impl Executable for Zscore {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let score = store
            .zset(&self.key)?
            .and_then(|zset| zset.score(&self.member));

        Ok(score.map_or_else(Reply::nil, |score| Reply::bulk(format_float(score))))
    }
}

impl TryFrom<&mut CommandParser> for Zscore {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let member = parser.next_bytes()?;
        Ok(Self { key, member })
    }
}

/// Increments the score of member in the sorted set stored at key by increment. A missing
/// member is added with increment as its score.
///
/// Ref: <https://redis.io/docs/latest/commands/zincrby>
#[derive(Debug, PartialEq)]
pub struct Zincrby {
    pub key: Bytes,
    pub increment: f64,
    pub member: Bytes,
}

impl Executable for Zincrby {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let zset = store.zset_entry(&self.key)?;

        match zset.incr(self.member, self.increment) {
            Some(score) => Ok(Reply::bulk(format_float(score))),
            None => {
                store.remove_if_empty(&self.key);
                Err(CommandError::NotANumber)
            }
        }
    }
}

impl TryFrom<&mut CommandParser> for Zincrby {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let increment = parser.next_float()?;
        let member = parser.next_bytes()?;
        Ok(Self {
            key,
            increment,
            member,
        })
    }
}

/// Ref: <https://redis.io/docs/latest/commands/zcard>
#[derive(Debug, PartialEq)]
pub struct Zcard {
    pub key: Bytes,
}

impl Executable for Zcard {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let len = store.zset(&self.key)?.map_or(0, |zset| zset.len());

        Ok(Reply::Integer(len as i64))
    }
}

impl TryFrom<&mut CommandParser> for Zcard {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

fn next_bound(parser: &mut CommandParser) -> Result<ScoreBound, CommandError> {
    let bytes = parser.next_bytes()?;
    ScoreBound::parse(&bytes).ok_or(CommandError::RangeNotAFloat)
}

fn next_range(parser: &mut CommandParser) -> Result<ScoreRange, CommandError> {
    let min = next_bound(parser)?;
    let max = next_bound(parser)?;
    Ok(ScoreRange::new(min, max))
}

/// Returns the number of elements in the sorted set at key with a score between min and max.
///
/// Ref: <https://redis.io/docs/latest/commands/zcount>
#[derive(Debug, PartialEq)]
pub struct Zcount {
    pub key: Bytes,
    pub range: ScoreRange,
}

impl Executable for Zcount {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let count = store
            .zset(&self.key)?
            .map_or(0, |zset| zset.count(&self.range));

        Ok(Reply::Integer(count as i64))
    }
}

impl TryFrom<&mut CommandParser> for Zcount {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let range = next_range(parser)?;
        Ok(Self { key, range })
    }
}

/// Returns the rank of member in the sorted set stored at key, ascending (ZRANK) or
/// descending (ZREVRANK).
///
/// Ref: <https://redis.io/docs/latest/commands/zrank>
#[derive(Debug, PartialEq)]
pub struct Zrank {
    pub key: Bytes,
    pub member: Bytes,
    pub rev: bool,
}

impl Zrank {
    pub fn forward(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, false)
    }

    pub fn reverse(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, true)
    }

    fn parse(parser: &mut CommandParser, rev: bool) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let member = parser.next_bytes()?;
        Ok(Self { key, member, rev })
    }
}

impl Executable for Zrank {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let rank = store.zset(&self.key)?.and_then(|zset| {
            if self.rev {
                zset.rev_rank(&self.member)
            } else {
                zset.rank(&self.member)
            }
        });

        Ok(rank.map_or_else(Reply::nil, |rank| Reply::Integer(rank as i64)))
    }
}

fn with_scores_flag(parser: &mut CommandParser) -> Result<bool, CommandError> {
    if !parser.has_next() {
        return Ok(false);
    }

    match parser.next_string()?.to_lowercase().as_str() {
        "withscores" => Ok(true),
        _ => Err(CommandError::Syntax),
    }
}

fn members_reply(entries: Vec<(Bytes, f64)>, scores: bool) -> Reply {
    if scores {
        with_scores(entries)
    } else {
        Reply::bulks(entries.into_iter().map(|(member, _)| member))
    }
}

/// Returns the specified range of elements in the sorted set stored at key, by rank. ZRANGE
/// orders by ascending score, ZREVRANGE by descending score.
///
/// Ref: <https://redis.io/docs/latest/commands/zrange>
#[derive(Debug, PartialEq)]
pub struct Zrange {
    pub key: Bytes,
    pub start: i64,
    pub stop: i64,
    pub rev: bool,
    pub with_scores: bool,
}

impl Zrange {
    pub fn forward(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, false)
    }

    pub fn reverse(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, true)
    }

    fn parse(parser: &mut CommandParser, rev: bool) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let start = parser.next_integer()?;
        let stop = parser.next_integer()?;
        let with_scores = with_scores_flag(parser)?;

        Ok(Self {
            key,
            start,
            stop,
            rev,
            with_scores,
        })
    }
}

impl Executable for Zrange {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let entries = match store.zset(&self.key)? {
            Some(zset) if self.rev => zset.rev_range_by_rank(self.start, self.stop),
            Some(zset) => zset.range_by_rank(self.start, self.stop),
            None => vec![],
        };

        Ok(members_reply(entries, self.with_scores))
    }
}

#[derive(Debug, EnumString)]
#[strum(ascii_case_insensitive)]
enum RangeOption {
    Withscores,
    Limit,
}

/// Window applied to a score range: skip `offset` members, then return at most `count`. A
/// negative count returns everything after the offset.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Limit {
    pub offset: i64,
    pub count: i64,
}

impl Limit {
    fn apply(self, entries: Vec<(Bytes, f64)>) -> Vec<(Bytes, f64)> {
        let Ok(offset) = usize::try_from(self.offset) else {
            return vec![];
        };
        let count = usize::try_from(self.count).unwrap_or(usize::MAX);

        entries.into_iter().skip(offset).take(count).collect()
    }
}

/// Returns the members of the sorted set at key with a score between min and max. The
/// reverse form takes its bounds as `max min` and returns members by descending score.
///
/// Ref: <https://redis.io/docs/latest/commands/zrangebyscore>
#[derive(Debug, PartialEq)]
pub struct ZrangeByScore {
    pub key: Bytes,
    pub range: ScoreRange,
    pub rev: bool,
    pub with_scores: bool,
    pub limit: Option<Limit>,
}

impl ZrangeByScore {
    pub fn forward(parser: &mut CommandParser) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let range = next_range(parser)?;
        Self::parse_options(parser, key, range, false)
    }

    pub fn reverse(parser: &mut CommandParser) -> Result<Self, CommandError> {
        let key = parser.next_bytes()?;
        let max = next_bound(parser)?;
        let min = next_bound(parser)?;
        Self::parse_options(parser, key, ScoreRange::new(min, max), true)
    }

    fn parse_options(
        parser: &mut CommandParser,
        key: Bytes,
        range: ScoreRange,
        rev: bool,
    ) -> Result<Self, CommandError> {
        let mut with_scores = false;
        let mut limit = None;

        while parser.has_next() {
            match parser.next_keyword::<RangeOption>()? {
                RangeOption::Withscores => with_scores = true,
                RangeOption::Limit => {
                    let offset = parser.next_integer()?;
                    let count = parser.next_integer()?;
                    limit = Some(Limit { offset, count });
                }
            }
        }

        Ok(Self {
            key,
            range,
            rev,
            with_scores,
            limit,
        })
    }
}

impl Executable for ZrangeByScore {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let mut entries = match store.zset(&self.key)? {
            Some(zset) if self.rev => zset.rev_range_by_score(&self.range),
            Some(zset) => zset.range_by_score(&self.range),
            None => vec![],
        };

        if let Some(limit) = self.limit {
            entries = limit.apply(entries);
        }

        Ok(members_reply(entries, self.with_scores))
    }
}

/// Removes all elements in the sorted set stored at key with rank between start and stop.
///
/// Ref: <https://redis.io/docs/latest/commands/zremrangebyrank>
#[derive(Debug, PartialEq)]
pub struct ZremRangeByRank {
    pub key: Bytes,
    pub start: i64,
    pub stop: i64,
}

impl Executable for ZremRangeByRank {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(zset) = store.zset_mut(&self.key)? else {
            return Ok(Reply::Integer(0));
        };

        let removed = zset.remove_range_by_rank(self.start, self.stop);
        store.remove_if_empty(&self.key);
        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for ZremRangeByRank {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let start = parser.next_integer()?;
        let stop = parser.next_integer()?;
        Ok(Self { key, start, stop })
    }
}

/// Removes all elements in the sorted set stored at key with a score between min and max.
///
/// Ref: <https://redis.io/docs/latest/commands/zremrangebyscore>
#[derive(Debug, PartialEq)]
pub struct ZremRangeByScore {
    pub key: Bytes,
    pub range: ScoreRange,
}

impl Executable for ZremRangeByScore {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();
        let Some(zset) = store.zset_mut(&self.key)? else {
            return Ok(Reply::Integer(0));
        };

        let removed = zset.remove_range_by_score(&self.range);
        store.remove_if_empty(&self.key);
        Ok(Reply::Integer(removed as i64))
    }
}

impl TryFrom<&mut CommandParser> for ZremRangeByScore {
    type Error = CommandError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let range = next_range(parser)?;
        Ok(Self { key, range })
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StoreKind {
    Union,
    Intersection,
}

#[derive(Debug, EnumString)]
#[strum(ascii_case_insensitive)]
enum StoreOption {
    Weights,
    Aggregate,
}

#[derive(Debug, EnumString)]
#[strum(ascii_case_insensitive)]
enum Aggregate {
    Sum,
}

/// Computes the union (ZUNIONSTORE) or intersection (ZINTERSTORE) of the given sorted sets and
/// stores the result in destination. Scores are multiplied by their `WEIGHTS` and summed.
/// Returns the number of members in the resulting set.
///
/// Ref: <https://redis.io/docs/latest/commands/zunionstore>
#[derive(Debug, PartialEq)]
pub struct Zstore {
    pub destination: Bytes,
    pub keys: Vec<Bytes>,
    pub weights: Vec<f64>,
    pub kind: StoreKind,
}

impl Zstore {
    pub fn union(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, StoreKind::Union)
    }

    pub fn intersection(parser: &mut CommandParser) -> Result<Self, CommandError> {
        Self::parse(parser, StoreKind::Intersection)
    }

    fn parse(parser: &mut CommandParser, kind: StoreKind) -> Result<Self, CommandError> {
        let destination = parser.next_bytes()?;
        let numkeys = parser.next_integer()?;
        if numkeys < 1 {
            return Err(CommandError::NoInputKeys(parser.verb().to_string()));
        }

        let numkeys = numkeys as usize;
        if parser.remaining() < numkeys {
            return Err(CommandError::Syntax);
        }

        let keys = (0..numkeys)
            .map(|_| parser.next_bytes())
            .collect::<Result<Vec<_>, _>>()?;
        let mut weights = vec![1.0; numkeys];

        while parser.has_next() {
            match parser.next_keyword::<StoreOption>()? {
                StoreOption::Weights => {
                    if parser.remaining() < numkeys {
                        return Err(CommandError::Syntax);
                    }
                    for weight in weights.iter_mut() {
                        *weight = parser.next_float()?;
                    }
                }
                StoreOption::Aggregate => {
                    let Aggregate::Sum = parser.next_keyword::<Aggregate>()?;
                }
            }
        }

        Ok(Self {
            destination,
            keys,
            weights,
            kind,
        })
    }
}

impl Executable for Zstore {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError> {
        let mut store = db.lock();

        let mut inputs = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            inputs.push(store.zset(key)?.cloned().unwrap_or_default());
        }

        let weighted = inputs.iter().zip(self.weights.iter().copied());
        let result = match self.kind {
            StoreKind::Union => SortedSet::union(weighted),
            StoreKind::Intersection => SortedSet::intersection(weighted),
        };

        let len = result.len();
        if result.is_empty() {
            store.remove(&self.destination);
        } else {
            store.set(self.destination, Value::SortedSet(result));
        }

        Ok(Reply::Integer(len as i64))
    }
}
