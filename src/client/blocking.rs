//! A client for code without an async runtime.

use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::client::Error;
use crate::codec::ReplyDecoder;
use crate::command::Command;
use crate::reply::Reply;

const READ_CHUNK: usize = 8 * 1024;

/// Blocking client over a std socket. Replies are decoded with the same resumable decoder
/// the async codecs use; a read that stops mid-reply simply resumes on the next one.
pub struct Client {
    stream: TcpStream,
    decoder: ReplyDecoder,
    buffer: BytesMut,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Client, Error> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Client::new(stream))
    }

    pub fn new(stream: TcpStream) -> Client {
        Client {
            stream,
            decoder: ReplyDecoder::new(),
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Limits how long a single read may block. `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), Error> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn execute(&mut self, command: &Command) -> Result<Reply, Error> {
        self.stream.write_all(&command.to_bytes())?;
        self.read_reply()
    }

    /// Writes all commands at once, then reads one reply per command, in order.
    pub fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<Reply>, Error> {
        let mut out = BytesMut::new();
        for command in commands {
            command.encode(&mut out);
        }
        self.stream.write_all(&out)?;

        commands.iter().map(|_| self.read_reply()).collect()
    }

    pub fn read_reply(&mut self) -> Result<Reply, Error> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(reply) = self.decoder.decode_reply(&mut self.buffer)? {
                return Ok(reply);
            }

            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::ConnectionClosed(
                    "connection closed by server".to_string(),
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    /// Answers each received line that starts a command with the next canned reply, split
    /// into single-byte writes.
    fn canned_server(replies: Vec<&'static [u8]>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(socket.try_clone().unwrap());
            let mut line = String::new();
            let mut replies = replies.into_iter();

            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                if line.starts_with('*') {
                    let Some(reply) = replies.next() else { break };
                    for byte in reply {
                        socket.write_all(&[*byte]).unwrap();
                    }
                }
                line.clear();
            }
        });

        addr
    }

    #[test]
    fn execute_reads_reply_delivered_byte_by_byte() {
        let addr = canned_server(vec![&b"*2\r\n$3\r\nfoo\r\n:7\r\n"[..]]);
        let mut client = Client::connect(addr).unwrap();

        let reply = client.execute(&Command::new("ANY")).unwrap();
        assert_eq!(
            reply,
            Reply::array([Reply::bulk("foo"), Reply::Integer(7)])
        );
    }

    #[test]
    fn pipeline_returns_replies_in_order() {
        let addr = canned_server(vec![&b"+OK\r\n"[..], &b"$1\r\nv\r\n"[..], &b"$-1\r\n"[..]]);
        let mut client = Client::connect(addr).unwrap();

        let replies = client
            .pipeline(&[
                Command::new("SET").arg("k").arg("v"),
                Command::new("GET").arg("k"),
                Command::new("GET").arg("missing"),
            ])
            .unwrap();

        assert_eq!(replies, vec![Reply::ok(), Reply::bulk("v"), Reply::nil()]);
    }

    #[test]
    fn server_hangup_fails_execute() {
        let addr = canned_server(vec![]);
        let mut client = Client::connect(addr).unwrap();

        // A reset instead of an orderly close surfaces as an I/O error.
        assert!(matches!(
            client.execute(&Command::new("PING")),
            Err(Error::ConnectionClosed(_)) | Err(Error::Io(_))
        ));
    }
}
