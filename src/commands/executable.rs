use crate::commands::CommandError;
use crate::keyspace::Keyspace;
use crate::reply::Reply;

/// A parsed command that runs against a single keyspace. Implementations lock the keyspace
/// once and hold the lock until their reply is built.
pub trait Executable {
    fn exec(self, db: &Keyspace) -> Result<Reply, CommandError>;
}
