//! Operator input dispatch. Plain text goes to the current agent; lines
//! starting with `/` are commands.

use tracing::debug;

use arbor_core::events::command;

use crate::error::EngineError;
use crate::lifecycle::{AgentManager, CommandOutcome};

pub const HELP: &str = "\
/clear                     reset the current agent's history
/pin <path> | /unpin <path>
/toolset <names>           replace the allowed tools (comma or space separated)
/model <[provider/]model[/thinking]>
/mark [label] | /rewind [label]
/fork [prompt]             fork the current agent
/kill [uuid] [--cascade]   kill an agent (default: current)
/switch <uuid>             make another agent current
/agents                    list live agents";

/// Handle one line of operator input. Refused requests come back as
/// [`CommandOutcome::Notice`]; only infrastructure failures are errors.
pub async fn dispatch(manager: &AgentManager, line: &str) -> Result<CommandOutcome, EngineError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(CommandOutcome::Notice(String::new()));
    }

    let result = match line.strip_prefix('/') {
        Some(rest) => run(manager, rest).await,
        None => manager
            .send_user_message(line)
            .await
            .map(|()| CommandOutcome::Done(String::new())),
    };
    match result {
        Err(e) if e.is_precondition() => {
            debug!(error = %e, "command refused");
            Ok(CommandOutcome::Notice(e.to_string()))
        }
        other => other,
    }
}

async fn run(manager: &AgentManager, rest: &str) -> Result<CommandOutcome, EngineError> {
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, Some(args.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };

    match name {
        "clear" => {
            manager.clear().await?;
            Ok(CommandOutcome::Done("cleared".into()))
        }
        command::PIN | command::UNPIN | command::TOOLSET | command::MODEL => {
            manager.run_command(name, args).await
        }
        "mark" => manager.mark(args).await,
        "rewind" => manager.rewind(args).await,
        "fork" => {
            let parent = manager.current_id();
            let child = manager.fork(&parent, args.map(str::to_owned)).await?;
            Ok(CommandOutcome::Done(format!("forked {}", child.short())))
        }
        "kill" => {
            let mut cascade = false;
            let mut target = None;
            for token in args.unwrap_or_default().split_whitespace() {
                match token {
                    "--cascade" | "-c" => cascade = true,
                    t if target.is_none() => target = Some(t),
                    t => {
                        return Err(EngineError::InvalidArgument(format!(
                            "unexpected argument '{t}'"
                        )))
                    }
                }
            }
            if cascade {
                let report = manager.kill_cascade(target).await?;
                Ok(CommandOutcome::Done(format!(
                    "killed {} and {} descendants",
                    report.target.short(),
                    report.descendants.len()
                )))
            } else {
                let killed = manager.kill(target).await?;
                Ok(CommandOutcome::Done(format!("killed {}", killed.short())))
            }
        }
        "switch" => {
            let prefix = args.ok_or_else(|| EngineError::InvalidArgument("usage: /switch <uuid>".into()))?;
            let id = manager.switch(prefix).await?;
            Ok(CommandOutcome::Done(format!("switched to {}", id.short())))
        }
        "agents" => {
            let lines: Vec<String> = manager
                .list_agents()
                .iter()
                .map(|a| {
                    format!(
                        "{}{} {}",
                        if a.is_current { "* " } else { "  " },
                        "  ".repeat(a.depth),
                        a.uuid
                    )
                })
                .collect();
            Ok(CommandOutcome::Done(lines.join("\n")))
        }
        "help" => Ok(CommandOutcome::Done(HELP.to_string())),
        other => Ok(CommandOutcome::Notice(format!("unknown command: /{other}"))),
    }
}
