//! CQL statement execution through `cqlsh` inside the container.
//!
//! Every statement is a separate `cqlsh -e` process, so the delegate carries
//! the session keyspace itself: after a successful `USE <keyspace>` later
//! statements run with `-k <keyspace>`.

use std::sync::{Arc, Mutex, PoisonError};

use berth_core::{
    ContainerId, DelegateError, DelegateFactory, DelegateFuture, ExecResult, HookContext,
    RuntimeGateway, StatementDelegate,
};
use tracing::debug;

use crate::{PASSWORD, USERNAME};

/// Runs statements with `cqlsh -e` through the runtime gateway.
pub struct CqlshDelegate {
    runtime: Arc<dyn RuntimeGateway>,
    id: ContainerId,
    username: String,
    password: String,
    keyspace: Mutex<Option<String>>,
}

impl CqlshDelegate {
    /// Delegate for container `id` using the default superuser.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeGateway>, id: ContainerId) -> Self {
        Self {
            runtime,
            id,
            username: USERNAME.to_string(),
            password: PASSWORD.to_string(),
            keyspace: Mutex::new(None),
        }
    }

    /// Use other credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Keyspace selected by the last successful `USE`.
    #[must_use]
    pub fn keyspace(&self) -> Option<String> {
        self.keyspace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `cqlsh` invocation for one statement.
    #[must_use]
    pub fn command(&self, statement: &str) -> Vec<String> {
        let mut cmd = vec![
            "cqlsh".to_string(),
            "-u".to_string(),
            self.username.clone(),
            "-p".to_string(),
            self.password.clone(),
        ];
        if let Some(keyspace) = self.keyspace() {
            cmd.push("-k".to_string());
            cmd.push(keyspace);
        }
        cmd.push("-e".to_string());
        cmd.push(statement.to_string());
        cmd
    }

    /// Run a statement and return its result.
    ///
    /// # Errors
    ///
    /// Returns [`DelegateError`] if exec fails or `cqlsh` exits non-zero.
    pub async fn query(&self, statement: &str) -> Result<ExecResult, DelegateError> {
        let result = self
            .runtime
            .exec(&self.id, &self.command(statement))
            .await
            .map_err(|e| DelegateError::new(e.to_string()))?;

        if result.success() {
            if let Some(keyspace) = use_target(statement) {
                debug!(id = %self.id, keyspace = %keyspace, "switched keyspace");
                *self.keyspace.lock().unwrap_or_else(PoisonError::into_inner) = Some(keyspace);
            }
            return Ok(result);
        }

        let stderr = result.stderr_str();
        let reason = if stderr.trim().is_empty() {
            result.stdout_str()
        } else {
            stderr
        };
        debug!(id = %self.id, exit_code = result.exit_code, "cqlsh rejected statement");
        Err(DelegateError::new(format!(
            "cqlsh exited with {}: {}",
            result.exit_code,
            reason.trim()
        )))
    }
}

/// Keyspace named by a `USE` statement, normalized the way CQL resolves it:
/// unquoted names fold to lower case, quoted names keep their case.
fn use_target(statement: &str) -> Option<String> {
    let statement = statement.trim().trim_end_matches(';').trim_end();
    let (keyword, name) = statement.split_once(char::is_whitespace)?;
    if !keyword.eq_ignore_ascii_case("use") {
        return None;
    }
    let name = name.trim();
    if let Some(quoted) = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        return (!quoted.is_empty()).then(|| quoted.replace("\"\"", "\""));
    }
    let plain = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    plain.then(|| name.to_ascii_lowercase())
}

impl StatementDelegate for CqlshDelegate {
    fn execute<'a>(&'a self, statement: &'a str) -> DelegateFuture<'a> {
        Box::pin(async move { self.query(statement).await.map(|_| ()) })
    }
}

impl std::fmt::Debug for CqlshDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CqlshDelegate")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("keyspace", &self.keyspace())
            .finish_non_exhaustive()
    }
}

/// Builds a [`CqlshDelegate`] for each started container.
#[derive(Debug, Clone, Default)]
pub struct CqlshDelegates;

impl DelegateFactory for CqlshDelegates {
    fn delegate(&self, ctx: &HookContext) -> Box<dyn StatementDelegate> {
        Box::new(CqlshDelegate::new(
            Arc::clone(&ctx.runtime),
            ctx.handle.id().clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::testing::ScriptedRuntime;
    use test_case::test_case;

    #[test_case("USE keySpaceTest", Some("keyspacetest"); "unquoted folds to lower case")]
    #[test_case("use inventory;", Some("inventory"); "lower case keyword and semicolon")]
    #[test_case("USE \"MixedCase\"", Some("MixedCase"); "quoted keeps case")]
    #[test_case("USE \"a\"\"b\"", Some("a\"b"); "escaped quote")]
    #[test_case("USE", None; "missing name")]
    #[test_case("USE a b", None; "trailing tokens")]
    #[test_case("USER_FUNCTIONS x", None; "not a use statement")]
    #[test_case("SELECT * FROM users", None; "other statement")]
    fn test_use_target(statement: &str, expected: Option<&str>) {
        assert_eq!(use_target(statement).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_use_carries_keyspace_into_later_statements() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let delegate = CqlshDelegate::new(runtime.clone(), ContainerId::new_unchecked("c1"))
            .with_credentials("admin", "s3cret");

        delegate.execute("USE keySpaceTest").await.expect("use");
        delegate
            .execute("CREATE TABLE catalog_category (id bigint primary key, name text)")
            .await
            .expect("create table");

        let execs = runtime.execs();
        assert_eq!(
            execs[0].1,
            ["cqlsh", "-u", "admin", "-p", "s3cret", "-e", "USE keySpaceTest"]
        );
        assert_eq!(
            execs[1].1,
            [
                "cqlsh",
                "-u",
                "admin",
                "-p",
                "s3cret",
                "-k",
                "keyspacetest",
                "-e",
                "CREATE TABLE catalog_category (id bigint primary key, name text)"
            ]
        );
        assert_eq!(delegate.keyspace().as_deref(), Some("keyspacetest"));
    }

    #[tokio::test]
    async fn test_failed_use_keeps_previous_keyspace() {
        let runtime = Arc::new(ScriptedRuntime::new().with_exec_handler(|_, cmd| {
            let missing = cmd.last().is_some_and(|s| s == "USE missing");
            ExecResult {
                exit_code: i64::from(missing) * 2,
                stdout: Vec::new(),
                stderr: if missing {
                    b"InvalidRequest: Keyspace 'missing' does not exist".to_vec()
                } else {
                    Vec::new()
                },
            }
        }));
        let delegate = CqlshDelegate::new(runtime, ContainerId::new_unchecked("c1"));

        delegate.execute("USE inventory").await.expect("use");
        assert!(delegate.execute("USE missing").await.is_err());
        assert_eq!(delegate.keyspace().as_deref(), Some("inventory"));
    }

    #[test]
    fn test_command_shape() {
        let runtime: Arc<dyn RuntimeGateway> = Arc::new(ScriptedRuntime::new());
        let delegate = CqlshDelegate::new(runtime, ContainerId::new_unchecked("c1"));
        assert_eq!(
            delegate.command("SELECT now() FROM system.local"),
            ["cqlsh", "-u", "cassandra", "-p", "cassandra", "-e", "SELECT now() FROM system.local"]
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_statement_failure() {
        let runtime = Arc::new(ScriptedRuntime::new().with_exec_handler(|_, _| ExecResult {
            exit_code: 2,
            stdout: Vec::new(),
            stderr: b"<stdin>:1:SyntaxException: line 1:0 no viable alternative\n".to_vec(),
        }));
        let delegate = CqlshDelegate::new(runtime.clone(), ContainerId::new_unchecked("c1"));

        let err = delegate.execute("SELEC 1").await.expect_err("syntax error");
        assert!(err.0.contains("SyntaxException"));
        assert!(err.0.starts_with("cqlsh exited with 2"));
        assert_eq!(runtime.execs().len(), 1);
    }

    #[tokio::test]
    async fn test_success_returns_output() {
        let runtime = Arc::new(ScriptedRuntime::new().with_exec_handler(|_, _| ExecResult {
            exit_code: 0,
            stdout: b" release_version\n-----------------\n          3.11.2\n".to_vec(),
            stderr: Vec::new(),
        }));
        let delegate = CqlshDelegate::new(runtime, ContainerId::new_unchecked("c1"));
        let result = delegate.query(crate::TEST_QUERY).await.expect("query");
        assert!(result.stdout_str().contains("3.11.2"));
    }
}
