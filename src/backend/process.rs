//! Bridge to an external browser driver process.
//!
//! The driver reads one JSON request per line on stdin and answers with one
//! JSON reply per line on stdout, in any order:
//!
//! ```text
//! -> {"id":7,"tool":"navigate","arguments":{"url":"https://example.com"}}
//! <- {"id":7,"ok":true,"data":{"title":"Example Domain"}}
//! <- {"id":8,"ok":false,"error":{"kind":"not_found","message":"no element matches #buy"}}
//! ```
//!
//! `error` may also be a bare string. Known kinds are `not_found`, `timeout`,
//! `invalid_argument` and `unavailable`; anything else is classified by message.

use crate::core::{ExecutorError, ToolExecutor};
use crate::errors::{Result, ServerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    tool: &'a str,
    arguments: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<DriverFault>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DriverFault {
    Detailed {
        #[serde(default)]
        kind: String,
        message: String,
    },
    Message(String),
}

impl DriverReply {
    fn into_result(self) -> std::result::Result<Value, ExecutorError> {
        if self.ok {
            return Ok(self.data);
        }
        Err(match self.error {
            Some(DriverFault::Detailed { kind, message }) => match kind.as_str() {
                "not_found" => ExecutorError::NotFound(message),
                "timeout" => ExecutorError::Timeout(message),
                "invalid_argument" => ExecutorError::InvalidArgument(message),
                "unavailable" => ExecutorError::Unavailable(message),
                _ => ExecutorError::Failed(message),
            },
            Some(DriverFault::Message(message)) => ExecutorError::Failed(message),
            None => ExecutorError::Failed("driver reported failure without details".to_string()),
        })
    }
}

type Pending = Arc<Mutex<PendingReplies>>;

#[derive(Default)]
struct PendingReplies {
    /// Cleared once the driver's stdout closes; no new requests are accepted after that
    open: bool,
    waiting: HashMap<u64, oneshot::Sender<DriverReply>>,
}

fn lock(pending: &Pending) -> MutexGuard<'_, PendingReplies> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a request's entry if its caller stops waiting (timeout or abort).
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiting.remove(&self.id);
    }
}

pub struct ProcessExecutor {
    program: String,
    writer: tokio::sync::Mutex<BufWriter<ChildStdin>>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    child: Child,
    _reader_handle: JoinHandle<()>,
}

impl ProcessExecutor {
    /// Starts `command` (program followed by its arguments). Must run inside a tokio runtime.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ServerError::ConfigurationError("driver command is empty".to_string()))?;
        debug!("Spawning browser driver: {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServerError::DriverError(format!("failed to start '{}': {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServerError::DriverError("failed to capture driver stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServerError::DriverError("failed to capture driver stdout".to_string()))?;

        let pending: Pending = Arc::new(Mutex::new(PendingReplies {
            open: true,
            waiting: HashMap::new(),
        }));
        let alive = Arc::new(AtomicBool::new(true));

        let pending_bg = Arc::clone(&pending);
        let alive_bg = Arc::clone(&alive);
        let reader_handle = tokio::spawn(async move {
            Self::reader_loop(stdout, pending_bg, alive_bg).await;
        });

        info!(driver = %program, pid = ?child.id(), "browser driver started");
        Ok(Self {
            program: program.clone(),
            writer: tokio::sync::Mutex::new(BufWriter::new(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            child,
            _reader_handle: reader_handle,
        })
    }

    /// Single owner of the driver's stdout; routes each reply to its waiting caller.
    async fn reader_loop(stdout: ChildStdout, pending: Pending, alive: Arc<AtomicBool>) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    trace!("Driver sent: {}", line);
                    match serde_json::from_str::<DriverReply>(line) {
                        Ok(reply) => {
                            let sender = lock(&pending).waiting.remove(&reply.id);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(reply);
                                }
                                None => debug!("Driver reply for unknown id={}", reply.id),
                            }
                        }
                        Err(e) => warn!("Ignoring malformed driver output: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Driver stdout read error: {}", e);
                    break;
                }
            }
        }

        // Reader ended: fail everyone still waiting
        alive.store(false, Ordering::SeqCst);
        let mut pending = lock(&pending);
        pending.open = false;
        pending.waiting.clear();
        info!("browser driver output closed");
    }

    async fn send(&self, request: &DriverRequest<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

#[async_trait]
impl ToolExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        &self.program
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<Value, ExecutorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if !pending.open {
                return Err(ExecutorError::Unavailable(format!(
                    "browser driver '{}' has exited",
                    self.program
                )));
            }
            pending.waiting.insert(id, tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let request = DriverRequest {
            id,
            tool: tool_name,
            arguments,
        };
        if let Err(e) = self.send(&request).await {
            return Err(ExecutorError::Unavailable(format!(
                "failed to write to browser driver: {}",
                e
            )));
        }

        match rx.await {
            Ok(reply) => reply.into_result(),
            Err(_) => Err(ExecutorError::Unavailable(format!(
                "browser driver '{}' exited before replying",
                self.program
            ))),
        }
    }

    fn is_available(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        debug!("ProcessExecutor dropping, killing driver process");
        let _ = self.child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(value: Value) -> std::result::Result<Value, ExecutorError> {
        serde_json::from_value::<DriverReply>(value).unwrap().into_result()
    }

    #[test]
    fn test_reply_mapping() {
        assert_eq!(
            reply(json!({"id": 1, "ok": true, "data": {"title": "Example"}})).unwrap(),
            json!({"title": "Example"})
        );
        assert_eq!(
            reply(json!({"id": 2, "ok": false, "error": {"kind": "timeout", "message": "load"}})),
            Err(ExecutorError::Timeout("load".to_string()))
        );
        assert_eq!(
            reply(json!({"id": 3, "ok": false, "error": {"kind": "not_found", "message": "#x"}})),
            Err(ExecutorError::NotFound("#x".to_string()))
        );
        assert_eq!(
            reply(json!({"id": 4, "ok": false, "error": "net::ERR_CONNECTION_REFUSED"})),
            Err(ExecutorError::Failed("net::ERR_CONNECTION_REFUSED".to_string()))
        );
    }

    #[test]
    fn test_request_line_shape() {
        let mut arguments = Map::new();
        arguments.insert("url".to_string(), json!("https://example.com"));
        let line = serde_json::to_string(&DriverRequest {
            id: 9,
            tool: "navigate",
            arguments: &arguments,
        })
        .unwrap();
        assert_eq!(
            line,
            r#"{"id":9,"tool":"navigate","arguments":{"url":"https://example.com"}}"#
        );
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        assert!(matches!(
            ProcessExecutor::spawn(&[]),
            Err(ServerError::ConfigurationError(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_round_trip_through_shell_driver() {
        let script = r#"while IFS= read -r line; do id=$(printf '%s' "$line" | sed -E 's/^\{"id":([0-9]+).*$/\1/'); printf '{"id":%s,"ok":true,"data":{"echo":true}}\n' "$id"; done"#;
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let executor = ProcessExecutor::spawn(&command).unwrap();

        let first = executor.execute("navigate", &Map::new()).await.unwrap();
        let second = executor.execute("refresh", &Map::new()).await.unwrap();
        assert_eq!(first, json!({"echo": true}));
        assert_eq!(second, json!({"echo": true}));
        assert!(executor.is_available());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_driver_reports_unavailable() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()];
        let executor = ProcessExecutor::spawn(&command).unwrap();
        let err = executor.execute("navigate", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Unavailable(_)));
    }
}
