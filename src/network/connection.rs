//! Connection Handler
//!
//! Serves one client connection: reads commands, runs them through a
//! `QuorumClient` and writes the responses back.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;

use crate::error::{ProxyError, Result};
use crate::protocol::{read_command, write_response, Command, Response, Status};
use crate::quorum::QuorumClient;

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Quorum client owned by this connection
    client: QuorumClient,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, client: QuorumClient) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            client,
            peer_addr,
        })
    }

    /// Handle the connection (blocking until closed)
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);
        let outcome = self.serve();
        self.client.close();
        outcome
    }

    fn serve(&mut self) -> Result<()> {
        loop {
            let command = match read_command(&mut self.reader) {
                Ok(cmd) => cmd,
                Err(ProxyError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    let _ = self.send_response(Response::error(&e.to_string()));
                    return Err(e);
                }
            };

            tracing::trace!("Received command from {}: {:?}", self.peer_addr, command);

            let response = self.execute_command(command);
            self.client.clean();
            let Some(response) = response else {
                continue;
            };

            if let Err(e) = self.send_response(response) {
                if let ProxyError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) || io_err.kind() == ErrorKind::BrokenPipe {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Run a command; `None` for no-reply commands
    fn execute_command(&mut self, command: Command) -> Option<Response> {
        let no_reply = command.no_reply();
        let response = match command {
            Command::Get { key } => match self.client.get(&key) {
                Ok(Some(value)) => Response::ok(Some(value)),
                Ok(None) => Response::not_found(),
                Err(e) => Response::error(&e.to_string()),
            },
            Command::GetMulti { keys } => match self.client.get_multi(&keys) {
                Ok(found) => Response::items(
                    keys.iter()
                        .filter_map(|key| found.get(key).map(|value| (key.as_str(), &value[..]))),
                ),
                Err(e) => Response::error(&e.to_string()),
            },
            Command::Set { key, value, no_reply } => {
                let stored = if no_reply {
                    self.client.set_no_reply(&key, value)
                } else {
                    self.client.set(&key, value)
                };
                match stored {
                    Ok(_) => Response::ok(None),
                    Err(e) => Response::error(&e.to_string()),
                }
            }
            Command::Delete { key } => match self.client.delete(&key) {
                Ok(true) => Response::ok(None),
                Ok(false) => Response::not_found(),
                Err(e) => Response::error(&e.to_string()),
            },
            Command::Ping => Response::ok(None),
        };

        if response.status == Status::Error {
            tracing::debug!("Request from {} failed: {}", self.peer_addr, response.message());
        }
        (!no_reply).then_some(response)
    }

    /// Send a response to the client
    fn send_response(&mut self, response: Response) -> Result<()> {
        write_response(&mut self.writer, &response)?;
        Ok(())
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}
