use crate::monitor::dispatcher::InfoCommand;
use crate::monitor::mysql::{Database, Endpoint, RowMap};
use crate::monitor::processlist::{KillPredicate, ProcesslistThread};
use crate::monitor::queries;
use crate::monitor::ui::{Notification, Severity, UiEvent, UiSender};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

/// Work that runs on the secondary connection, away from the sampler.
#[derive(Clone, Debug)]
pub enum CommandRequest {
    Info(InfoCommand),
    KillThread { thread_id: String },
    KillMatching(KillPredicate),
    Shutdown,
}

type ReceiverArc = Arc<Mutex<mpsc::Receiver<CommandRequest>>>;

/// Background worker for informational commands and kills. One query at a
/// time: the busy flag feeds the dispatcher's command guard.
pub struct CommandWorker {
    sender: mpsc::Sender<CommandRequest>,
    busy: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for CommandWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(CommandRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl CommandWorker {
    pub fn start(
        tab_id: u64,
        endpoint: Endpoint,
        shutdown: tokio::sync::watch::Receiver<bool>,
        ui: UiSender,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<CommandRequest>();
        let receiver = Arc::new(Mutex::new(receiver));
        let busy = Arc::new(AtomicBool::new(false));

        let worker_busy = busy.clone();
        let thread = thread::spawn(move || {
            run_commands(tab_id, endpoint, shutdown, ui, receiver, worker_busy);
        });

        return Self {
            sender,
            busy,
            thread: Some(thread),
        };
    }

    pub fn is_busy(&self) -> bool {
        return self.busy.load(Ordering::SeqCst);
    }

    pub fn send(&self, request: CommandRequest) {
        let _ = self.sender.send(request);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run_commands(
    tab_id: u64,
    endpoint: Endpoint,
    shutdown: tokio::sync::watch::Receiver<bool>,
    ui: UiSender,
    receiver: ReceiverArc,
    busy: Arc<AtomicBool>,
) {
    let mut db = Database::new(endpoint, shutdown);

    while let Ok(request) = receiver.lock().unwrap().recv() {
        if matches!(request, CommandRequest::Shutdown) {
            break;
        }

        busy.store(true, Ordering::SeqCst);
        let result = process_request(&mut db, &request).await;
        busy.store(false, Ordering::SeqCst);

        match result {
            Ok(Some((title, rows))) => {
                let _ = ui.send(UiEvent::CommandOutput { tab_id, title, rows });
            }
            Ok(None) => {}
            Err(error) => {
                // Command errors never touch the sampler; one notification.
                let _ = ui.send(UiEvent::Notify {
                    tab_id,
                    notification: Notification {
                        title: "Command failed".to_string(),
                        message: error.to_string(),
                        severity: Severity::Error,
                    },
                });
            }
        }
    }
    db.disconnect().await;
}

fn rows_to_table(rows: &[RowMap], columns: &[&str]) -> Vec<Vec<String>> {
    let mut table = vec![columns.iter().map(|c| c.to_string()).collect::<Vec<_>>()];
    for row in rows {
        table.push(
            columns
                .iter()
                .map(|column| row.get(*column).map(|v| v.display()).unwrap_or_default())
                .collect(),
        );
    }
    return table;
}

async fn process_request(
    db: &mut Database,
    request: &CommandRequest,
) -> Result<Option<(String, Vec<Vec<String>>)>> {
    if !db.is_connected() {
        db.connect().await?;
    }

    match request {
        CommandRequest::Info(command) => return run_info_command(db, command).await,
        CommandRequest::KillThread { thread_id } => {
            db.execute(&format!("KILL {}", thread_id)).await?;
            return Ok(Some((
                format!("Thread {} killed", thread_id),
                Vec::new(),
            )));
        }
        CommandRequest::KillMatching(predicate) => {
            let query = queries::with_predicate(queries::mysql::PL_PROCESSLIST, "");
            let rows = db.query_rows(&query).await?;
            let threads: Vec<ProcesslistThread> =
                rows.iter().map(ProcesslistThread::from_row).collect();

            let mut killed = 0;
            for thread in threads.iter().filter(|t| predicate.matches(t)) {
                if db.execute(&format!("KILL {}", thread.id)).await.is_ok() {
                    killed += 1;
                }
            }
            return Ok(Some((format!("Killed {} threads", killed), Vec::new())));
        }
        CommandRequest::Shutdown => return Ok(None),
    }
}

async fn run_info_command(
    db: &mut Database,
    command: &InfoCommand,
) -> Result<Option<(String, Vec<Vec<String>>)>> {
    match command {
        InfoCommand::Variables { search } => {
            let variables = db.fetch_name_value_map(queries::mysql::VARIABLES).await?;
            let mut rows: Vec<Vec<String>> = variables
                .iter()
                .filter(|(name, _)| match search {
                    Some(pattern) => name.to_lowercase().contains(&pattern.to_lowercase()),
                    None => true,
                })
                .map(|(name, value)| vec![name.clone(), value.display()])
                .collect();
            rows.sort();
            rows.insert(0, vec!["Variable".to_string(), "Value".to_string()]);
            return Ok(Some(("Global Variables".to_string(), rows)));
        }
        InfoCommand::Users => {
            let rows = db.query_rows(queries::mysql::PS_USER_STATISTICS).await?;
            return Ok(Some((
                "Users".to_string(),
                rows_to_table(
                    &rows,
                    &[
                        "user",
                        "current_connections",
                        "total_connections",
                        "rows_affected",
                        "rows_sent",
                        "rows_examined",
                        "created_tmp_tables",
                        "created_tmp_disk_tables",
                        "plugin",
                    ],
                ),
            )));
        }
        InfoCommand::Databases => {
            let rows = db.query_rows(queries::mysql::DATABASES).await?;
            return Ok(Some((
                "Databases".to_string(),
                rows_to_table(&rows, &["SCHEMA_NAME"]),
            )));
        }
        InfoCommand::InnodbStatus => {
            let row = db.query_first(queries::mysql::INNODB_STATUS).await?;
            let status = row
                .and_then(|r| r.get("Status").map(|v| v.display()))
                .unwrap_or_default();
            // The deadlock section is what people open this for.
            let deadlock = status
                .split("LATEST DETECTED DEADLOCK")
                .nth(1)
                .map(|section| format!("LATEST DETECTED DEADLOCK{}", section))
                .unwrap_or(status);
            return Ok(Some((
                "InnoDB Status".to_string(),
                vec![vec![deadlock]],
            )));
        }
        InfoCommand::MemoryUsage => {
            let by_user = db.query_rows(queries::mysql::MEMORY_BY_USER).await?;
            let by_code = db.query_rows(queries::mysql::MEMORY_BY_CODE_AREA).await?;
            let by_host = db.query_rows(queries::mysql::MEMORY_BY_HOST).await?;

            let mut rows = rows_to_table(&by_user, &["user", "current_allocated", "total_allocated"]);
            rows.extend(rows_to_table(&by_host, &["host", "current_allocated", "total_allocated"]));
            rows.extend(rows_to_table(&by_code, &["code_area", "current_allocated"]));
            return Ok(Some(("Memory Usage".to_string(), rows)));
        }
        InfoCommand::TableSizes => {
            let rows = db.query_rows(queries::mysql::TABLE_SIZES).await?;
            return Ok(Some((
                "Table Sizes".to_string(),
                rows_to_table(
                    &rows,
                    &[
                        "TABLE_SCHEMA",
                        "TABLE_NAME",
                        "ENGINE",
                        "DATA_LENGTH",
                        "INDEX_LENGTH",
                        "total_size",
                    ],
                ),
            )));
        }
        InfoCommand::ThreadDetails { thread_id } => {
            let query = queries::with_predicate(
                queries::mysql::PL_PROCESSLIST,
                &format!(" AND id = {}", thread_id),
            );
            let rows = db.query_rows(&query).await?;
            return Ok(Some((
                format!("Thread {}", thread_id),
                rows_to_table(&rows, &["id", "user", "host", "db", "command", "time", "state", "query"]),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::mysql::ScalarValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rows_to_table_keeps_column_order() {
        let mut row = RowMap::new();
        row.insert("user".into(), ScalarValue::Text("app".into()));
        row.insert("host".into(), ScalarValue::Text("10.0.0.1".into()));

        let table = rows_to_table(&[row], &["user", "host", "missing"]);
        assert_eq!(table[0], vec!["user", "host", "missing"]);
        assert_eq!(table[1], vec!["app", "10.0.0.1", ""]);
    }
}
