//! Operator console: a stdin/stdout REPL over the job queue.

use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::queue::JobQueue;
use crate::store::{Job, JobStatus};
use crate::value::Payload;

const HELP: &str = "\
Commands:
  tasks                          list runnable tasks
  enqueue <task_key> [json]      queue a job (payload defaults to {})
  status <job_id>                show a job
  jobs [status]                  list recent jobs
  counts                         jobs per status
  run <task_key> [json]          run a task now, without queueing
  help                           show this help
  quit                           stop the worker and exit";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Tasks,
    Enqueue { task_key: String, payload: Payload },
    Status { id: Uuid },
    Jobs { status: Option<JobStatus> },
    Counts,
    Run { task_key: String, payload: Payload },
    Help,
    Quit,
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb {
            "tasks" => Ok(Self::Tasks),
            "counts" => Ok(Self::Counts),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "enqueue" => {
                let (task_key, payload) = parse_task_args(rest)?;
                Ok(Self::Enqueue { task_key, payload })
            }
            "run" => {
                let (task_key, payload) = parse_task_args(rest)?;
                Ok(Self::Run { task_key, payload })
            }
            "status" => {
                let id = Uuid::parse_str(rest).map_err(|e| format!("invalid job id: {e}"))?;
                Ok(Self::Status { id })
            }
            "jobs" => {
                let status = if rest.is_empty() {
                    None
                } else {
                    Some(rest.parse::<JobStatus>()?)
                };
                Ok(Self::Jobs { status })
            }
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{other}' (try 'help')")),
        }
    }
}

fn parse_task_args(rest: &str) -> Result<(String, Payload), String> {
    let (task_key, json) = match rest.split_once(char::is_whitespace) {
        Some((key, json)) => (key, json.trim()),
        None => (rest, ""),
    };
    if task_key.is_empty() {
        return Err("missing task key".to_string());
    }
    let payload = if json.is_empty() {
        Payload::new()
    } else {
        serde_json::from_str(json).map_err(|e| format!("payload must be a JSON object: {e}"))?
    };
    Ok((task_key.to_string(), payload))
}

fn job_summary(job: &Job) -> String {
    format!(
        "{}  {:<8} {}  (updated {})",
        job.id,
        job.status.as_str(),
        job.task_key,
        job.updated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unprintable: {e}>"))
}

/// Console bound to a queue.
pub struct Console {
    queue: JobQueue,
}

impl Console {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    /// Execute one command and render its output.
    pub async fn execute(&self, command: Command) -> String {
        match command {
            Command::Tasks => {
                let tasks = self.queue.available_tasks().await;
                if tasks.is_empty() {
                    return "No tasks registered.".to_string();
                }
                tasks
                    .iter()
                    .map(|t| format!("{:<12} {}: {}", t.key, t.name, t.description))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Command::Enqueue { task_key, payload } => {
                match self.queue.enqueue(&task_key, &payload).await {
                    Ok(handle) => format!("Enqueued job {} ({})", handle.id, handle.status),
                    Err(e) => format!("Error: {e}"),
                }
            }
            Command::Status { id } => match self.queue.get_status(id).await {
                Ok(job) => to_pretty_json(&job),
                Err(e) => format!("Error: {e}"),
            },
            Command::Jobs { status } => match self.queue.recent_jobs(status).await {
                Ok(jobs) if jobs.is_empty() => "No jobs yet.".to_string(),
                Ok(jobs) => jobs.iter().map(job_summary).collect::<Vec<_>>().join("\n"),
                Err(e) => format!("Error: {e}"),
            },
            Command::Counts => match self.queue.counts().await {
                Ok(counts) => counts
                    .iter()
                    .map(|(status, n)| format!("{status:<8} {n}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("Error: {e}"),
            },
            Command::Run { task_key, payload } => {
                match self.queue.registry().run_now(&task_key, payload).await {
                    Ok(result) => to_pretty_json(&result),
                    Err(e) => format!("Error: {e}"),
                }
            }
            Command::Help => HELP.to_string(),
            Command::Quit => "Bye.".to_string(),
        }
    }

    /// Read commands from stdin until `quit` or EOF.
    pub async fn run(&self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        eprint!("> ");

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        eprint!("> ");
                        continue;
                    }
                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => println!("{}", self.execute(command).await),
                        Err(e) => println!("Error: {e}"),
                    }
                    eprint!("> ");
                }
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{JobStore, LibSqlBackend};
    use crate::tasks::TaskRegistry;
    use crate::value::Value;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("tasks"), Ok(Command::Tasks));
        assert_eq!(Command::parse("  quit "), Ok(Command::Quit));
        assert_eq!(
            Command::parse(r#"enqueue echo {"x": 1}"#),
            Ok(Command::Enqueue {
                task_key: "echo".into(),
                payload: Payload::from([("x".to_string(), Value::from(1))]),
            })
        );
        assert_eq!(
            Command::parse("run echo"),
            Ok(Command::Run {
                task_key: "echo".into(),
                payload: Payload::new(),
            })
        );
        assert_eq!(
            Command::parse("jobs failed"),
            Ok(Command::Jobs {
                status: Some(JobStatus::Failed)
            })
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("enqueue").is_err());
        assert!(Command::parse("enqueue echo [1, 2]").is_err());
        assert!(Command::parse("status not-a-uuid").is_err());
        assert!(Command::parse("jobs queued").is_err());
        assert!(Command::parse("launch").is_err());
    }

    #[tokio::test]
    async fn console_enqueues_and_reports() {
        let store: Arc<dyn JobStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let console = Console::new(JobQueue::new(
            store,
            Arc::new(TaskRegistry::with_builtins()),
        ));

        let out = console
            .execute(Command::parse("enqueue echo {\"x\": 1}").unwrap())
            .await;
        assert!(out.starts_with("Enqueued job "), "{out}");

        let out = console.execute(Command::Counts).await;
        assert!(out.contains("pending  1"), "{out}");

        let out = console
            .execute(Command::parse(r#"run divide {"numerator": 1, "denominator": 0}"#).unwrap())
            .await;
        assert!(out.contains("division by zero"), "{out}");

        let out = console.execute(Command::Tasks).await;
        assert!(out.contains("echo"));
    }
}
