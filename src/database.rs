//! MySQL/MariaDB and PostgreSQL probes run through throwaway client containers.
//!
//! Login and connection checks start `<engine> run --rm <image> mysql|psql ...` against a
//! server container's IP; local access checks `exec` into the server container itself.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info};

use crate::engine::ContainerEngine;
use crate::errors::{CiError, Result};
use crate::poll::{poll_until, Backoff};
use crate::util::join_nonempty;

pub const MYSQL_PORT: u16 = 3306;
pub const POSTGRESQL_PORT: u16 = 5432;
pub const DEFAULT_DATABASE: &str = "db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Mysql,
    Mariadb,
    Postgresql,
    Postgres,
}

impl DatabaseType {
    pub fn is_postgres(self) -> bool {
        matches!(self, DatabaseType::Postgresql | DatabaseType::Postgres)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseType::Mysql => "mysql",
            DatabaseType::Mariadb => "mariadb",
            DatabaseType::Postgresql => "postgresql",
            DatabaseType::Postgres => "postgres",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = CiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseType::Mysql),
            "mariadb" => Ok(DatabaseType::Mariadb),
            "postgresql" => Ok(DatabaseType::Postgresql),
            "postgres" => Ok(DatabaseType::Postgres),
            other => Err(CiError::message(format!("unsupported database type '{other}'"))),
        }
    }
}

/// Where and as whom a client connects.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub container_ip: String,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Server default (3306 or 5432) when unset.
    pub port: Option<u16>,
}

impl Credentials {
    pub fn new(container_ip: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            container_ip: container_ip.into(),
            username: username.into(),
            password: password.into(),
            database: DEFAULT_DATABASE.to_string(),
            port: None,
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// How the client container is started.
#[derive(Debug, Clone)]
pub struct ClientInvocation {
    /// Engine subcommand, `run --rm` by default.
    pub run_command: String,
    /// Image (or container) that provides the client; the wrapper's image when unset.
    pub container: Option<String>,
    /// Extra engine arguments placed before the image (PostgreSQL only).
    pub docker_args: String,
    /// Extra client arguments placed before the SQL.
    pub extra_args: String,
}

impl Default for ClientInvocation {
    fn default() -> Self {
        Self {
            run_command: "run --rm".to_string(),
            container: None,
            docker_args: String::new(),
            extra_args: String::new(),
        }
    }
}

/// `run --rm <image> mysql --host <ip> --port <p> -u<user> -p<pass> [extra] <sql> <db>`.
pub fn mysql_command_line(image: &str, creds: &Credentials, inv: &ClientInvocation, sql: Option<&str>) -> String {
    let container = inv.container.as_deref().unwrap_or(image);
    let host = format!("--host {}", creds.container_ip);
    let port = format!("--port {}", creds.port.unwrap_or(MYSQL_PORT));
    let user = format!("-u{}", creds.username);
    let pass = format!("-p{}", creds.password);
    join_nonempty(&[
        &inv.run_command,
        container,
        "mysql",
        &host,
        &port,
        &user,
        &pass,
        &inv.extra_args,
        sql.unwrap_or("-e 'SELECT 1;'"),
        &creds.database,
    ])
}

/// `run --rm [docker args] -e PGPASSWORD=<pass> <image> psql -v ON_ERROR_STOP=1 <url> [extra] [sql]`.
pub fn postgresql_command_line(image: &str, creds: &Credentials, inv: &ClientInvocation, sql: Option<&str>) -> String {
    let container = inv.container.as_deref().unwrap_or(image);
    let password = format!("-e PGPASSWORD={}", creds.password);
    let url = format!(
        "postgresql://{}@{}:{}/{}",
        creds.username,
        creds.container_ip,
        creds.port.unwrap_or(POSTGRESQL_PORT),
        creds.database
    );
    join_nonempty(&[
        &inv.run_command,
        &inv.docker_args,
        &password,
        container,
        "psql",
        "-v ON_ERROR_STOP=1",
        &url,
        &inv.extra_args,
        sql.unwrap_or(""),
    ])
}

/// Knobs for `run_sql_command`.
#[derive(Debug, Clone)]
pub struct SqlRun<'a> {
    pub max_attempts: u32,
    /// Keep the output of failing commands instead of giving up.
    pub ignore_error: bool,
    /// Regex the output must match; the first successful run is accepted when unset.
    pub expected_output: Option<&'a str>,
    /// Wrap each statement in `bash -c "..."`.
    pub use_bash: bool,
}

impl Default for SqlRun<'_> {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            ignore_error: false,
            expected_output: None,
            use_bash: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseWrapper {
    engine: ContainerEngine,
    image_name: String,
    db_type: DatabaseType,
    retry: Duration,
}

impl DatabaseWrapper {
    pub fn new(engine: ContainerEngine, image_name: impl Into<String>, db_type: DatabaseType) -> Self {
        let image_name = image_name.into();
        debug!("DatabaseWrapper initialized with image: {image_name}, type: {db_type}");
        Self {
            engine,
            image_name,
            db_type,
            retry: Duration::from_secs(3),
        }
    }

    pub fn with_retry_interval(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn mysql_cmd(&self, creds: &Credentials, inv: &ClientInvocation, sql: Option<&str>) -> Result<String> {
        let cmd = mysql_command_line(&self.image_name, creds, inv, sql);
        debug!("Executing command: {cmd}");
        self.engine.output(&cmd)
    }

    pub fn postgresql_cmd(&self, creds: &Credentials, inv: &ClientInvocation, sql: Option<&str>) -> Result<String> {
        self.engine
            .output(&postgresql_command_line(&self.image_name, creds, inv, sql))
    }

    fn client_cmd(&self, creds: &Credentials, inv: &ClientInvocation, sql: Option<&str>) -> Result<String> {
        if self.db_type.is_postgres() {
            self.postgresql_cmd(creds, inv, sql)
        } else {
            self.mysql_cmd(creds, inv, sql)
        }
    }

    fn select_one(&self) -> &'static str {
        if self.db_type.is_postgres() {
            "-At -c 'SELECT 1;'"
        } else {
            "-e 'SELECT 1;'"
        }
    }

    /// Exec `command` in the container until it prints nothing.
    pub fn wait_for_database(&self, container_id: &str, command: &str, max_attempts: u32) -> bool {
        debug!("Waiting for database to be ready in {container_id} with '{command}'");
        let ready = poll_until(max_attempts, Backoff::Fixed(self.retry), |attempt| {
            match self.engine.exec(container_id, command) {
                Ok(out) if out.trim().is_empty() => {
                    info!("Database is ready");
                    true
                }
                Ok(out) => {
                    debug!("Database not ready, attempt {attempt} (output: '{}')", out.trim());
                    false
                }
                Err(e) => {
                    error!("Error waiting for database: {e}");
                    false
                }
            }
        });
        if !ready {
            error!("Database not ready after {max_attempts} attempts");
        }
        ready
    }

    /// Login outcome must equal `expected_success`.
    pub fn assert_login_access(&self, creds: &Credentials, expected_success: bool) -> bool {
        info!(
            "Testing {} login as {}:{}; expected_success={expected_success}",
            self.db_type, creds.username, creds.password
        );
        let success = self
            .client_cmd(creds, &ClientInvocation::default(), Some(self.select_one()))
            .is_ok_and(|out| out.contains('1'));
        match (success, expected_success) {
            (true, true) => {
                info!("    {}({}) access granted as expected", creds.username, creds.password);
                true
            }
            (false, false) => {
                info!("    {}({}) access denied as expected", creds.username, creds.password);
                true
            }
            _ => {
                error!("    {}({}) login assertion failed", creds.username, creds.password);
                false
            }
        }
    }

    pub fn assert_login_success(&self, creds: &Credentials) -> bool {
        self.assert_login_access(creds, true)
    }

    /// Retry a trivial query until it succeeds.
    pub fn test_connection(&self, creds: &Credentials, max_attempts: u32, sql: Option<&str>) -> bool {
        info!("Testing {} connection to {}...", self.db_type, creds.container_ip);
        let sql = sql.unwrap_or(self.select_one());
        let ok = poll_until(max_attempts, Backoff::Fixed(self.retry), |attempt| {
            match self.client_cmd(creds, &ClientInvocation::default(), Some(sql)) {
                Ok(out) => {
                    debug!("Output: {out}");
                    info!("Connection successful on attempt {attempt}");
                    true
                }
                Err(_) => {
                    debug!("Attempt {attempt} failed, retrying...");
                    false
                }
            }
        });
        if !ok {
            error!("Failed to connect after {max_attempts} attempts");
        }
        ok
    }

    /// Run `SELECT 1;` with the in-container client.
    pub fn assert_local_access(&self, container_id: &str, username: Option<&str>) -> bool {
        let cmd = if self.db_type.is_postgres() {
            format!("exec -i {container_id} bash -c 'psql <<< \"SELECT 1;\"'")
        } else {
            let user = username.unwrap_or("root");
            format!("exec {container_id} bash -c 'mysql -u{user} <<< \"SELECT 1;\"'")
        };
        let ok = self
            .engine
            .output(&cmd)
            .is_ok_and(|out| out.contains('1'));
        if ok {
            info!("    Local access granted as expected");
        } else {
            error!("    Local access assertion failed");
        }
        ok
    }

    /// Run each statement, retrying until its output matches `opts.expected_output`.
    ///
    /// Returns the output of the last statement, or `None` when a statement failed or never matched.
    pub fn run_sql_command(
        &self,
        creds: &Credentials,
        inv: &ClientInvocation,
        statements: &[&str],
        opts: &SqlRun<'_>,
    ) -> Result<Option<String>> {
        let expected = opts.expected_output.map(Regex::new).transpose()?;
        let statements: Vec<&str> = if statements.is_empty() {
            vec!["SELECT 1;"]
        } else {
            statements.to_vec()
        };
        let mut last_output = String::new();
        for statement in statements {
            let statement = if opts.use_bash {
                format!("bash -c \"{statement}\"")
            } else {
                statement.to_string()
            };
            let sql = if self.db_type.is_postgres() {
                statement
            } else {
                format!("-e '{statement}'")
            };
            let mut failed = false;
            let matched = poll_until(opts.max_attempts, Backoff::Fixed(self.retry), |attempt| {
                if failed {
                    return true;
                }
                let output = match self.client_cmd(creds, inv, Some(&sql)) {
                    Ok(out) => out,
                    Err(e) if opts.ignore_error => e.output().to_string(),
                    Err(e) => {
                        error!("Failed to execute command, output: {}", e.output());
                        failed = true;
                        return true;
                    }
                };
                info!("{} return output: '{}'", self.db_type, output.trim_end());
                let ok = expected.as_ref().map_or(true, |re| re.is_match(&output));
                last_output = output;
                if ok {
                    info!("Command executed successfully on attempt {attempt}");
                } else {
                    debug!("Expected output not found in return output");
                }
                ok
            });
            if failed || !matched {
                return Ok(None);
            }
        }
        if last_output.is_empty() {
            return Ok(None);
        }
        info!("All commands executed successfully");
        Ok(Some(last_output))
    }
}
