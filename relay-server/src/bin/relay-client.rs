//! Line-mode terminal client for the chat relay.
//!
//! Plain lines are sent to everyone, `/msg <user> <text>` to one user and
//! `/quit` leaves.

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use relay_server::protocol::{ACTIVE_USERS_PREFIX, DISCONNECT, LOGIN_PREFIX};

#[derive(Debug, Parser)]
#[command(name = "relay-client", about = "Terminal client for the chat relay")]
struct Args {
    /// Server address.
    #[arg(long, env = "RELAY_SERVER", default_value = "127.0.0.1:8888")]
    server: String,

    /// Username to log in as.
    #[arg(long, short)]
    user: String,

    /// Password for the user.
    #[arg(long, short, env = "RELAY_PASSWORD", hide_env_values = true)]
    password: String,
}

/// What one line typed by the user turns into.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(String),
    Quit,
    Usage,
    Nothing,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim_end();
    if line.is_empty() {
        return Input::Nothing;
    }
    if line == "/quit" {
        return Input::Quit;
    }
    if let Some(rest) = line.strip_prefix("/msg ") {
        return match rest.trim_start().split_once(' ') {
            Some((user, text)) if !user.is_empty() && !text.trim().is_empty() => {
                Input::Send(format!("@{user} {}", text.trim_start()))
            }
            _ => Input::Usage,
        };
    }
    if line == "/msg" {
        return Input::Usage;
    }
    Input::Send(line.to_string())
}

/// Render a server line for the terminal. The roster leaves out our own name.
fn render(line: &str, me: &str) -> String {
    match line.strip_prefix(ACTIVE_USERS_PREFIX) {
        Some(list) => {
            let me = me.to_lowercase();
            let others: Vec<&str> = list
                .split(',')
                .filter(|name| !name.is_empty() && name.to_lowercase() != me)
                .collect();
            if others.is_empty() {
                "* Online: nobody else".to_string()
            } else {
                format!("* Online: {}", others.join(", "))
            }
        }
        None => line.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("Failed to connect to {}", args.server))?;
    let (reader, mut writer) = stream.into_split();
    let mut server_lines = BufReader::new(reader).lines();

    writer
        .write_all(format!("{LOGIN_PREFIX}{}:{}\n", args.user, args.password).as_bytes())
        .await?;
    match server_lines.next_line().await? {
        Some(line) if line == "LOGIN_SUCCESS" => println!("* Logged in as {}", args.user),
        Some(line) => bail!("Login rejected: {line}"),
        None => bail!("Server closed the connection during login"),
    }

    let me = args.user.clone();
    let mut incoming = tokio::spawn(async move {
        while let Some(line) = server_lines.next_line().await? {
            println!("{}", render(&line, &me));
        }
        anyhow::Ok(())
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            finished = &mut incoming => {
                finished.context("Reader task panicked")??;
                println!("* Server closed the connection");
                return Ok(());
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Send(msg) => writer.write_all(format!("{msg}\n").as_bytes()).await?,
                    Input::Quit => break,
                    Input::Usage => eprintln!("usage: /msg <user> <text>"),
                    Input::Nothing => {}
                }
            }
        }
    }

    writer.write_all(format!("{DISCONNECT}\n").as_bytes()).await?;
    writer.shutdown().await?;
    // Let the server's goodbye traffic drain before exiting.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), incoming).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_command_becomes_directed_line() {
        assert_eq!(parse_input("/msg bob hi there"), Input::Send("@bob hi there".to_string()));
        assert_eq!(parse_input("/msg bob"), Input::Usage);
        assert_eq!(parse_input("/msg"), Input::Usage);
    }

    #[test]
    fn plain_lines_and_quit() {
        assert_eq!(parse_input("hello\r"), Input::Send("hello".to_string()));
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("   "), Input::Nothing);
    }

    #[test]
    fn roster_hides_own_name() {
        assert_eq!(render("ACTIVE_USERS:alice,bob", "alice"), "* Online: bob");
        assert_eq!(render("ACTIVE_USERS:alice", "alice"), "* Online: nobody else");
        assert_eq!(render("[bob] (private): yo", "alice"), "[bob] (private): yo");
        assert_eq!(render("ACTIVE_USERS:ÉLODIE,bob", "élodie"), "* Online: bob");
    }
}
