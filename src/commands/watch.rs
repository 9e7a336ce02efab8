use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use study_sync::merge::Resolution;
use study_sync::model::Status;
use study_sync::store::LocalStore;
use study_sync::sync::{SyncEngine, SyncEvent};
use study_sync::tracker::ChangeTracker;

use super::{print_outcome, Context};

/// One line of the watch protocol.
#[derive(Debug, PartialEq)]
enum Command {
    Status { id: String, status: Status },
    Note { id: String, text: String },
    Time { id: String, seconds: u64 },
    Star { id: String },
    Sync,
    Resolve(Resolution),
    Quit,
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
///
/// ```text
/// status <id> <unanswered|mastered|confused|failed>
/// note <id> [text...]      (no text clears the note)
/// time <id> <seconds>
/// star <id>
/// sync
/// resolve <local|remote|merge>
/// quit
/// ```
fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim_start();
    let (id, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim();
    let id = id.to_string();
    let need_id = |verb: &str| {
        if id.is_empty() {
            Err(format!("{} needs a question id", verb))
        } else {
            Ok(())
        }
    };

    let command = match verb {
        "status" => {
            need_id(verb)?;
            Command::Status {
                status: arg.parse()?,
                id,
            }
        }
        "note" => {
            need_id(verb)?;
            Command::Note {
                id,
                text: arg.to_string(),
            }
        }
        "time" => {
            need_id(verb)?;
            let seconds = arg
                .parse()
                .map_err(|_| format!("invalid seconds: {:?}", arg))?;
            Command::Time { id, seconds }
        }
        "star" => {
            need_id(verb)?;
            Command::Star { id }
        }
        "sync" => Command::Sync,
        "resolve" => Command::Resolve(rest.parse()?),
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn apply_edit(store: &LocalStore, command: &Command) {
    match command {
        Command::Status { id, status } => store.set_status(id, *status),
        Command::Note { id, text } => store.set_note(id, text),
        Command::Time { id, seconds } => store.add_time(id, *seconds),
        Command::Star { id } => {
            store.toggle_star(id);
        }
        Command::Sync | Command::Resolve(_) | Command::Quit => {}
    }
}

fn print_event<W: Write>(output: &mut W, event: &SyncEvent) -> Result<()> {
    match event {
        SyncEvent::Started => {}
        SyncEvent::Pushed { version } => writeln!(output, "pushed version {}", version)?,
        SyncEvent::UpToDate { version } => writeln!(output, "up to date at version {}", version)?,
        SyncEvent::Conflict(report) => {
            writeln!(output, "conflict on {} key(s):", report.keys.len())?;
            for key in &report.keys {
                writeln!(output, "  {}", key)?;
            }
            writeln!(output, "enter: resolve local|remote|merge")?;
        }
        SyncEvent::Failed(message) => writeln!(output, "sync failed: {}", message)?,
    }
    Ok(())
}

async fn run_command<W: Write>(
    engine: &SyncEngine,
    command: Command,
    output: &mut W,
) -> Result<()> {
    let result = match command {
        Command::Sync => engine.sync_now().await,
        Command::Resolve(resolution) => engine.resolve_conflict(resolution).await,
        edit => {
            apply_edit(engine.store(), &edit);
            return Ok(());
        }
    };
    // Outcomes and failures also arrive as events
    if let Err(e) = result {
        tracing::debug!("Command failed: {}", e);
    }
    Ok(())
}

/// Apply edits read from stdin and let the change tracker push them. Stops
/// on `quit`, end of input or Ctrl-C, then flushes with one last cycle.
pub async fn handle<W: Write>(ctx: &Context, output: &mut W) -> Result<()> {
    let engine = ctx.engine()?;
    let mut events = engine.subscribe();
    let tracker = ChangeTracker::spawn(engine.clone(), ctx.config.debounce());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(
        "Watching for edits (debounce {} ms)",
        ctx.config.debounce_ms
    );
    if let Err(e) = engine.sync_now().await {
        tracing::warn!("Initial sync failed: {}", e);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(output, &event)?,
                Err(RecvError::Lagged(n)) => tracing::debug!("Missed {} sync event(s)", n),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run_command(&engine, command, output).await?,
                    Ok(None) => {}
                    Err(e) => writeln!(output, "error: {}", e)?,
                }
            }
        }
        output.flush()?;
    }

    tracker.shutdown().await;
    match engine.sync_now().await {
        Ok(outcome) => print_outcome(output, &outcome)?,
        Err(e) => writeln!(output, "final sync failed: {}", e)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_edits() {
        assert_eq!(
            parse_command("status q1 Mastered").unwrap(),
            Some(Command::Status {
                id: "q1".to_string(),
                status: Status::Mastered
            })
        );
        assert_eq!(
            parse_command("note q2   remember the   sign ").unwrap(),
            Some(Command::Note {
                id: "q2".to_string(),
                text: "remember the   sign".to_string()
            })
        );
        assert_eq!(
            parse_command("note q2").unwrap(),
            Some(Command::Note {
                id: "q2".to_string(),
                text: String::new()
            })
        );
        assert_eq!(
            parse_command("time q3 90").unwrap(),
            Some(Command::Time {
                id: "q3".to_string(),
                seconds: 90
            })
        );
        assert_eq!(
            parse_command("resolve remote").unwrap(),
            Some(Command::Resolve(Resolution::UseRemote))
        );
    }

    #[test]
    fn test_parse_skips_blank_and_comments() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("# nothing").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("star").is_err());
        assert!(parse_command("time q1 soon").is_err());
        assert!(parse_command("status q1 done").is_err());
        assert!(parse_command("undo").is_err());
    }
}
