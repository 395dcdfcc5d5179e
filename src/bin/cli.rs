//! QuorumKV CLI Client
//!
//! Command-line interface for talking to a QuorumKV proxy (or directly to a
//! backend, which speaks the same protocol).

use std::net::TcpStream;
use std::process::ExitCode;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use quorumkv::protocol::{decode_items, read_response, write_command, Command, Response, Status};

/// QuorumKV CLI
#[derive(Parser, Debug)]
#[command(name = "quorumkv-cli")]
#[command(about = "CLI for the QuorumKV proxy")]
#[command(version)]
struct Args {
    /// Proxy address
    #[arg(short, long, default_value = "127.0.0.1:7905")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Get several values at once
    Getm {
        /// The keys to get
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Do not wait for a reply
        #[arg(long)]
        no_reply: bool,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Ping the server
    Ping,
}

fn request(server: &str, command: &Command) -> quorumkv::Result<Option<Response>> {
    let mut stream = TcpStream::connect(server)?;
    write_command(&mut stream, command)?;
    if command.no_reply() {
        return Ok(None);
    }
    Ok(Some(read_response(&mut stream)?))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let command = match args.command {
        Commands::Get { key } => Command::Get { key },
        Commands::Getm { keys } => Command::GetMulti { keys },
        Commands::Set { key, value, no_reply } => Command::Set {
            key,
            value: Bytes::from(value),
            no_reply,
        },
        Commands::Del { key } => Command::Delete { key },
        Commands::Ping => Command::Ping,
    };

    let response = match request(&args.server, &command) {
        Ok(Some(response)) => response,
        Ok(None) => {
            println!("SENT");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match (response.status, &command) {
        (Status::Ok, Command::GetMulti { .. }) => {
            let payload = response.payload.unwrap_or_default();
            match decode_items(&payload) {
                Ok(items) => {
                    for (key, value) in items {
                        println!("{} = {}", key, String::from_utf8_lossy(&value));
                    }
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        (Status::Ok, Command::Get { .. }) => {
            let payload = response.payload.unwrap_or_default();
            println!("{}", String::from_utf8_lossy(&payload));
        }
        (Status::Ok, Command::Ping) => println!("PONG"),
        (Status::Ok, _) => println!("OK"),
        (Status::NotFound, _) => println!("(nil)"),
        (Status::Error, _) => {
            eprintln!("error: {}", response.message());
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
