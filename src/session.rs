//! Per-connection command dispatch.
//!
//! A session starts in [`Mode::Normal`]. `SUBSCRIBE`/`PSUBSCRIBE` move it to
//! [`Mode::Subscribed`], where only subscription commands, `PING` and `QUIT` are accepted,
//! and it returns to normal once the last subscription is dropped. `MONITOR` is one way:
//! the connection only receives echoed commands from then on and can only `QUIT`.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::command::Command;
use crate::commands::connection::{Auth, Client};
use crate::commands::executable::Executable;
use crate::commands::pubsub::{Psubscribe, Punsubscribe, Subscribe, Unsubscribe};
use crate::commands::{CommandError, Operation};
use crate::connection::Connection;
use crate::keyspace::Keyspace;
use crate::pubsub::Subscriber;
use crate::reply::Reply;
use crate::server::Context;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Monitoring,
    /// Holds the number of channels plus patterns the connection listens to.
    Subscribed(usize),
}

enum Event {
    Killed,
    Push(Reply),
    Command(Result<Option<Command>, codec::Error>),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct Session {
    conn: Connection,
    ctx: Arc<Context>,
    client_id: u64,
    name: Option<Bytes>,
    db: Keyspace,
    authenticated: bool,
    monitoring: bool,
    channels: BTreeSet<Bytes>,
    patterns: BTreeSet<Bytes>,
    subscriber: Subscriber,
    pushes: mpsc::Receiver<Reply>,
    kill: CancellationToken,
}

impl Session {
    pub fn new(conn: Connection, client_id: u64, ctx: Arc<Context>) -> Session {
        let (tx, pushes) = mpsc::channel(ctx.config.subscriber_queue.max(1));
        let kill = CancellationToken::new();
        let subscriber = Subscriber::new(conn.id, tx, kill.clone());
        let db = ctx.keyspaces.first().clone();

        Session {
            authenticated: ctx.config.password.is_none(),
            conn,
            ctx,
            client_id,
            name: None,
            db,
            monitoring: false,
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
            subscriber,
            pushes,
            kill,
        }
    }

    pub fn mode(&self) -> Mode {
        let subscriptions = self.channels.len() + self.patterns.len();
        if self.monitoring {
            Mode::Monitoring
        } else if subscriptions > 0 {
            Mode::Subscribed(subscriptions)
        } else {
            Mode::Normal
        }
    }

    /// Serves the connection until the peer quits or disconnects, then drops every
    /// subscription and monitor registration it holds.
    pub async fn run(mut self) -> Result<(), Error> {
        let result = self.serve().await;
        self.release();
        result
    }

    async fn serve(&mut self) -> Result<(), Error> {
        loop {
            let event = tokio::select! {
                _ = self.kill.cancelled() => Event::Killed,
                Some(push) = self.pushes.recv() => Event::Push(push),
                command = self.conn.read_command() => Event::Command(command),
            };

            let command = match event {
                Event::Killed => {
                    warn!("disconnecting client that cannot keep up with its pushes");
                    return Ok(());
                }
                Event::Push(push) => {
                    // A peer that stopped reading can block this write; the kill still wins.
                    tokio::select! {
                        _ = self.kill.cancelled() => {
                            warn!("disconnecting client that cannot keep up with its pushes");
                            return Ok(());
                        }
                        written = self.conn.write_reply(&push) => written?,
                    }
                    continue;
                }
                Event::Command(command) => command,
            };

            let command = match command {
                Ok(Some(command)) => command,
                Ok(None) => return Ok(()),
                Err(codec::Error::Io(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "closing connection after protocol error");
                    let reply = Reply::error(format!("ERR {}", e));
                    // The peer may already be gone; the connection closes either way.
                    let _ = self.conn.write_reply(&reply).await;
                    return Ok(());
                }
            };

            debug!(%command, "received command");
            if self.handle(command).await? == Flow::Quit {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Result<Flow, Error> {
        let verb = command.verb();

        if self.monitoring {
            if verb == "quit" {
                self.reply(Reply::ok()).await?;
                return Ok(Flow::Quit);
            }
            return Ok(Flow::Continue);
        }

        if !self.authenticated && verb != "auth" {
            self.reply(CommandError::NoAuth.into()).await?;
            return Ok(Flow::Continue);
        }

        let echo = (!self.ctx.monitors.is_empty() && verb != "auth").then(|| command.clone());

        let operation = match Operation::try_from(command) {
            Ok(operation) => operation,
            Err(e) => {
                self.reply(e.into()).await?;
                return Ok(Flow::Continue);
            }
        };

        if let Mode::Subscribed(_) = self.mode() {
            if !allowed_when_subscribed(&operation) {
                self.reply(CommandError::SubscribedContext(verb).into())
                    .await?;
                return Ok(Flow::Continue);
            }
        }

        if let Some(command) = echo {
            self.ctx.monitors.echo(self.db.index(), self.conn.addr, &command);
        }

        self.dispatch(operation).await
    }

    async fn dispatch(&mut self, operation: Operation) -> Result<Flow, Error> {
        let reply = match operation {
            Operation::Auth(auth) => self.auth(auth),
            Operation::Client(client) => self.client(client),
            Operation::FlushAll => {
                for db in self.ctx.keyspaces.iter() {
                    db.lock().clear();
                }
                Reply::ok()
            }
            Operation::Info(info) => info.render(&self.ctx.stats()),
            Operation::Monitor => {
                self.monitoring = true;
                self.ctx
                    .monitors
                    .register(self.conn.id, self.subscriber.sender());
                info!("client entered monitor mode");
                Reply::ok()
            }
            Operation::Ping(ping) => match self.mode() {
                Mode::Subscribed(_) => ping.subscribed_reply(),
                _ => ping.reply(),
            },
            Operation::Quit => {
                self.reply(Reply::ok()).await?;
                return Ok(Flow::Quit);
            }
            Operation::Select(select) => {
                let keyspace = usize::try_from(select.index)
                    .ok()
                    .and_then(|index| self.ctx.keyspaces.get(index));
                match keyspace {
                    Some(keyspace) => {
                        self.db = keyspace.clone();
                        Reply::ok()
                    }
                    None => CommandError::InvalidDbIndex.into(),
                }
            }
            Operation::Subscribe(cmd) => return self.subscribe(cmd).await,
            Operation::Unsubscribe(cmd) => return self.unsubscribe(cmd).await,
            Operation::Psubscribe(cmd) => return self.psubscribe(cmd).await,
            Operation::Punsubscribe(cmd) => return self.punsubscribe(cmd).await,
            Operation::Db(cmd) => execute(cmd, &self.db),
        };

        self.reply(reply).await?;
        Ok(Flow::Continue)
    }

    fn auth(&mut self, auth: Auth) -> Reply {
        match auth.verify(self.ctx.config.password.as_deref()) {
            Ok(()) => {
                self.authenticated = true;
                Reply::ok()
            }
            Err(e) => {
                warn!("failed authentication attempt");
                e.into()
            }
        }
    }

    fn client(&mut self, client: Client) -> Reply {
        match client {
            Client::SetName(name) => {
                self.name = (!name.is_empty()).then_some(name);
                Reply::ok()
            }
            Client::GetName => self.name.clone().map_or_else(Reply::nil, Reply::bulk),
            Client::Id => Reply::Integer(self.client_id as i64),
            Client::SetInfo { .. } => Reply::ok(),
        }
    }

    fn subscription_count(&self) -> i64 {
        (self.channels.len() + self.patterns.len()) as i64
    }

    async fn subscribe(&mut self, cmd: Subscribe) -> Result<Flow, Error> {
        for channel in cmd.channels {
            if self.channels.insert(channel.clone()) {
                self.db
                    .broker()
                    .subscribe(channel.clone(), &self.subscriber);
            }
            let ack = subscription_ack("subscribe", Some(channel), self.subscription_count());
            self.conn.feed_reply(&ack).await?;
        }

        self.conn.flush().await?;
        Ok(Flow::Continue)
    }

    async fn unsubscribe(&mut self, cmd: Unsubscribe) -> Result<Flow, Error> {
        let channels = if cmd.channels.is_empty() {
            self.channels.iter().cloned().collect()
        } else {
            cmd.channels
        };

        if channels.is_empty() {
            let ack = subscription_ack("unsubscribe", None, self.subscription_count());
            self.conn.write_reply(&ack).await?;
            return Ok(Flow::Continue);
        }

        for channel in channels {
            if self.channels.remove(&channel) {
                self.db
                    .broker()
                    .unsubscribe(&channel, self.subscriber.id());
            }
            let ack = subscription_ack("unsubscribe", Some(channel), self.subscription_count());
            self.conn.feed_reply(&ack).await?;
        }

        self.conn.flush().await?;
        Ok(Flow::Continue)
    }

    async fn psubscribe(&mut self, cmd: Psubscribe) -> Result<Flow, Error> {
        for pattern in cmd.patterns {
            if self.patterns.insert(pattern.clone()) {
                self.db
                    .broker()
                    .psubscribe(pattern.clone(), &self.subscriber);
            }
            let ack = subscription_ack("psubscribe", Some(pattern), self.subscription_count());
            self.conn.feed_reply(&ack).await?;
        }

        self.conn.flush().await?;
        Ok(Flow::Continue)
    }

    async fn punsubscribe(&mut self, cmd: Punsubscribe) -> Result<Flow, Error> {
        let patterns = if cmd.patterns.is_empty() {
            self.patterns.iter().cloned().collect()
        } else {
            cmd.patterns
        };

        if patterns.is_empty() {
            let ack = subscription_ack("punsubscribe", None, self.subscription_count());
            self.conn.write_reply(&ack).await?;
            return Ok(Flow::Continue);
        }

        for pattern in patterns {
            if self.patterns.remove(&pattern) {
                self.db
                    .broker()
                    .punsubscribe(&pattern, self.subscriber.id());
            }
            let ack = subscription_ack("punsubscribe", Some(pattern), self.subscription_count());
            self.conn.feed_reply(&ack).await?;
        }

        self.conn.flush().await?;
        Ok(Flow::Continue)
    }

    /// Writes a reply, holding it back while more pipelined commands are already buffered
    /// so a pipeline is answered with as few writes as possible. Held back replies go out
    /// once the connection has to wait for input again.
    async fn reply(&mut self, reply: Reply) -> Result<(), Error> {
        debug!(%reply, "sending reply");
        if self.conn.has_buffered_input() {
            self.conn.feed_reply(&reply).await?;
        } else {
            self.conn.write_reply(&reply).await?;
        }
        Ok(())
    }

    fn release(&mut self) {
        let broker = self.db.broker().clone();
        let id = self.subscriber.id();

        for channel in std::mem::take(&mut self.channels) {
            broker.unsubscribe(&channel, id);
        }
        for pattern in std::mem::take(&mut self.patterns) {
            broker.punsubscribe(&pattern, id);
        }
        if self.monitoring {
            self.ctx.monitors.unregister(self.conn.id);
        }
    }
}

/// Runs a keyspace command. A panicking handler is reported to the client as an error
/// instead of tearing down the connection.
fn execute(cmd: impl Executable, db: &Keyspace) -> Reply {
    match panic::catch_unwind(AssertUnwindSafe(|| cmd.exec(db))) {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => e.into(),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(%message, "command handler panicked");
            CommandError::Internal(format!("internal error: {}", message)).into()
        }
    }
}

fn allowed_when_subscribed(operation: &Operation) -> bool {
    matches!(
        operation,
        Operation::Subscribe(_)
            | Operation::Unsubscribe(_)
            | Operation::Psubscribe(_)
            | Operation::Punsubscribe(_)
            | Operation::Ping(_)
            | Operation::Quit
    )
}

/// `[kind, channel-or-pattern, count]`; the name is nil when there was nothing to drop.
fn subscription_ack(kind: &str, name: Option<Bytes>, count: i64) -> Reply {
    Reply::array([
        Reply::bulk(kind.to_string()),
        Reply::Bulk(name),
        Reply::Integer(count),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::connection::Echo;
    use crate::commands::DbCommand;

    #[test]
    fn subscription_ack_shape() {
        assert_eq!(
            subscription_ack("subscribe", Some(Bytes::from("news")), 1),
            Reply::array([
                Reply::bulk("subscribe"),
                Reply::bulk("news"),
                Reply::Integer(1)
            ])
        );
        assert_eq!(
            subscription_ack("unsubscribe", None, 0),
            Reply::array([Reply::bulk("unsubscribe"), Reply::nil(), Reply::Integer(0)])
        );
    }

    #[test]
    fn only_subscription_commands_pass_in_subscribed_mode() {
        let parse = |command: Command| Operation::try_from(command).unwrap();

        assert!(allowed_when_subscribed(&parse(Command::new("PING"))));
        assert!(allowed_when_subscribed(&parse(
            Command::new("UNSUBSCRIBE").arg("a")
        )));
        assert!(!allowed_when_subscribed(&parse(Command::new("GET").arg("a"))));
        assert!(!allowed_when_subscribed(&parse(Command::new("SELECT").arg(1))));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_error_reply() {
        struct Boom;

        impl Executable for Boom {
            fn exec(self, _db: &Keyspace) -> Result<Reply, CommandError> {
                panic!("boom");
            }
        }

        let db = Keyspace::new(0);
        assert_eq!(
            execute(Boom, &db),
            Reply::error("ERR internal error: boom")
        );

        let reply = execute(
            DbCommand::Echo(Echo {
                message: Bytes::from("fine"),
            }),
            &db,
        );
        assert_eq!(reply, Reply::bulk("fine"));
    }
}
