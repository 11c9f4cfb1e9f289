use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::db::{Store, Value};
use crate::error::CommandError;
use crate::rdb::bootstrap_snapshot;
use crate::resp::Command;
use crate::server::Context;
use crate::state::NodeState;

type CommandResult = Result<Command, CommandError>;

/// Hooks a command can call back into the connection that issued it.
pub trait ServerActions: Sync {
    /// Dial back a replica that announced its listening address and add it
    /// to the registry. Failures are logged, never returned.
    fn register_replica(&self, addr: String) -> impl Future<Output = ()> + Send;
}

/// Actions for commands that do not come from a client session, such as
/// the stream a replica ingests from its master.
pub struct Detached;

impl ServerActions for Detached {
    async fn register_replica(&self, addr: String) {
        warn!(%addr, "replica announcement outside a client session, ignoring");
    }
}

/// Runs `name` against the handler table.
///
/// Returns `None` when no handler matches; the caller decides how to answer
/// an unknown command.
pub async fn dispatch<A: ServerActions>(
    name: &str,
    args: &[String],
    ctx: &Context,
    actions: &A,
) -> Option<Command> {
    let result = match name.to_ascii_uppercase().as_str() {
        "PING" => handle_ping(args),
        "ECHO" => handle_echo(args),
        "SET" => handle_set(args, &ctx.store),
        "GET" => handle_get(args, &ctx.store),
        "INFO" => handle_info(&ctx.node),
        "REPLCONF" => handle_replconf(args, &ctx.node, actions).await,
        "PSYNC" => handle_psync(&ctx.node),
        _ => return None,
    };
    Some(result.unwrap_or_else(|err| Command::Error(err.to_string())))
}

pub fn handle_ping(args: &[String]) -> CommandResult {
    match args.first() {
        Some(msg) => Ok(Command::simple(msg.as_str())),
        None => Ok(Command::simple("+PONG")),
    }
}

pub fn handle_echo(args: &[String]) -> CommandResult {
    Ok(Command::simple(args.first().cloned().unwrap_or_default()))
}

pub fn handle_set(args: &[String], db: &Store) -> CommandResult {
    let [key, value, rest @ ..] = args else {
        return Err(CommandError::Arity("set"));
    };

    let expires_at = match rest {
        [opt, ms, ..] if opt.eq_ignore_ascii_case("px") => {
            let ms = ms
                .parse::<i64>()
                .map_err(|_| CommandError::InvalidExpiration)?;
            Some(expiry_from_now(ms).ok_or(CommandError::InvalidExpiration)?)
        }
        _ => None,
    };

    debug!(%key, ?expires_at, "SET");
    db.save(key.as_str(), value.as_str(), expires_at);
    Ok(Command::simple("+OK"))
}

// A negative offset yields an instant that has already passed.
fn expiry_from_now(ms: i64) -> Option<Instant> {
    let now = Instant::now();
    let offset = Duration::from_millis(ms.unsigned_abs());
    if ms < 0 {
        Some(now.checked_sub(offset).unwrap_or(now))
    } else {
        now.checked_add(offset)
    }
}

pub fn handle_get(args: &[String], db: &Store) -> CommandResult {
    let key = args.first().ok_or(CommandError::Arity("get"))?;
    Ok(match db.get(key) {
        Some(Value::String(s)) => Command::bulk(s),
        Some(other) => Command::bulk(other.to_string()),
        None => Command::Nil,
    })
}

pub fn handle_info(node: &NodeState) -> CommandResult {
    Ok(Command::simple(node.info()))
}

pub async fn handle_replconf<A: ServerActions>(
    args: &[String],
    node: &NodeState,
    actions: &A,
) -> CommandResult {
    let [option, value, ..] = args else {
        return Err(CommandError::Arity("replconf"));
    };

    match option.to_ascii_uppercase().as_str() {
        "LISTENING-PORT" => {
            actions.register_replica(value.clone()).await;
            if node.is_master() {
                Ok(Command::simple("+OK"))
            } else {
                Ok(Command::List(vec![
                    "REPLCONF".to_string(),
                    "ACK".to_string(),
                    node.replication_offset().to_string(),
                ]))
            }
        }
        "CAPA" => Ok(Command::simple("+OK")),
        _ => Err(CommandError::Argument("Unknown REPLCONF option".to_string())),
    }
}

/// Full resync only: the current position followed by the bootstrap snapshot.
pub fn handle_psync(node: &NodeState) -> CommandResult {
    let snapshot = bootstrap_snapshot()
        .map_err(|err| CommandError::Internal(format!("snapshot unavailable: {}", err)))?;
    Ok(Command::Multi(vec![
        Command::simple(format!(
            "+FULLRESYNC {} {}",
            node.replication_id(),
            node.replication_offset()
        )),
        Command::Bulk(snapshot),
    ]))
}
