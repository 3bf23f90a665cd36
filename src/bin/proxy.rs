use clap::Parser;
use redwire::proxy::{self, Config, Mode, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use redwire::Error;

#[derive(Parser, Debug)]
#[command(version, about = "Relay between RESP clients and an upstream server")]
struct Args {
    /// The address to bind
    #[arg(long, env = "REDWIRE_PROXY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// The port to listen on
    #[arg(short, long, env = "REDWIRE_PROXY_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Upstream server as host:port
    #[arg(short, long, env = "REDWIRE_UPSTREAM", default_value = "127.0.0.1:6379")]
    upstream: String,

    /// Relay buffer size in bytes
    #[arg(long, env = "REDWIRE_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// `raw` copies bytes, `framed` decodes and re-encodes every frame
    #[arg(short, long, env = "REDWIRE_PROXY_MODE", default_value_t = Mode::Raw)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    proxy::run(Config {
        host: args.host,
        port: args.port,
        upstream: args.upstream,
        buffer_size: args.buffer_size.max(1),
        mode: args.mode,
    })
    .await?;

    Ok(())
}
