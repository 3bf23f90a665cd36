use clap::Parser;
use redwire::codec::DEFAULT_MAX_FRAME_SIZE;
use redwire::server::{self, Config, DEFAULT_PORT};
use redwire::Error;

#[derive(Parser, Debug)]
#[command(version, about = "RESP server with pub/sub")]
struct Args {
    /// The address to bind
    #[arg(long, env = "REDWIRE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// The port to listen on
    #[arg(short, long, env = "REDWIRE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of selectable databases
    #[arg(short, long, env = "REDWIRE_DATABASES", default_value_t = 16)]
    databases: usize,

    /// Password clients must AUTH with
    #[arg(long, env = "REDWIRE_PASSWORD")]
    password: Option<String>,

    /// Largest bulk string or array accepted from a client, in bytes
    #[arg(long, env = "REDWIRE_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Pushes queued per connection before a slow subscriber is dropped
    #[arg(long, env = "REDWIRE_SUBSCRIBER_QUEUE", default_value_t = 1024)]
    subscriber_queue: usize,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(Config {
        host: args.host,
        port: args.port,
        databases: args.databases.max(1),
        password: args.password,
        max_frame_size: args.max_frame_size,
        subscriber_queue: args.subscriber_queue.max(1),
    })
    .await
}
