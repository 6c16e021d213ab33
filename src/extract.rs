use std::{
    env,
    io::Read,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};

use crate::{
    data::RawTable,
    detect::{Detection, TableDetector},
    error::ExtractError,
    io_utils::{decode_bytes, parse_raw_table},
    registry::Registry,
    source::{SourceFile, SourceKind},
};

pub const LIST_PROGRAM_ENV: &str = "BILL_HARMONIZER_MDB_TABLES";
pub const EXPORT_PROGRAM_ENV: &str = "BILL_HARMONIZER_MDB_EXPORT";
pub const DEFAULT_LIST_PROGRAM: &str = "mdb-tables";
pub const DEFAULT_EXPORT_PROGRAM: &str = "mdb-export";
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct ExportTool {
    pub list_program: String,
    pub export_program: String,
    pub list_timeout: Duration,
    pub export_timeout: Duration,
    pub encoding: &'static Encoding,
}

impl Default for ExportTool {
    fn default() -> Self {
        Self {
            list_program: DEFAULT_LIST_PROGRAM.to_string(),
            export_program: DEFAULT_EXPORT_PROGRAM.to_string(),
            list_timeout: DEFAULT_LIST_TIMEOUT,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
            encoding: UTF_8,
        }
    }
}

impl ExportTool {
    pub fn from_env() -> Self {
        let mut tool = Self::default();
        if let Some(program) = env::var(LIST_PROGRAM_ENV).ok().filter(|p| !p.is_empty()) {
            tool.list_program = program;
        }
        if let Some(program) = env::var(EXPORT_PROGRAM_ENV).ok().filter(|p| !p.is_empty()) {
            tool.export_program = program;
        }
        tool
    }

    pub fn list_tables(&self, database: &Path) -> Result<Vec<String>, ExtractError> {
        let mut command = Command::new(&self.list_program);
        command.arg("-1").arg(database);
        let stdout = run_with_timeout(command, &self.list_program, self.list_timeout)?;
        let text = String::from_utf8_lossy(&stdout);
        let tables = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        debug!("{}: {} table(s): {:?}", database.display(), tables.len(), tables);
        Ok(tables)
    }

    pub fn export_table(&self, database: &Path, table: &str) -> Result<RawTable, ExtractError> {
        let target = format!("{}:{table}", database.display());
        let mut command = Command::new(&self.export_program);
        command.arg(database).arg(table);
        let stdout = run_with_timeout(command, &self.export_program, self.export_timeout)?;
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(ExtractError::EmptyOutput {
                program: self.export_program.clone(),
                target,
            });
        }
        let (text, _, had_errors) = self.encoding.decode(&stdout);
        if had_errors {
            warn!(
                "{target}: output is not valid {}; malformed bytes replaced",
                self.encoding.name()
            );
        }
        parse_raw_table(&text, &target).map_err(|source| ExtractError::Csv { target, source })
    }
}

/// Spawns `command` and collects its stdout, killing it after `timeout`.
fn run_with_timeout(
    mut command: Command,
    program: &str,
    timeout: Duration,
) -> Result<Vec<u8>, ExtractError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|source| ExtractError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match wait_until(&mut child, Instant::now() + timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            if let Err(err) = child.kill() {
                warn!("Failed to kill '{program}' after timeout: {err}");
            }
            let _ = child.wait();
            return Err(ExtractError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        Err(source) => {
            let _ = child.kill();
            return Err(ExtractError::Spawn {
                program: program.to_string(),
                source,
            });
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    if !status.success() {
        return Err(ExtractError::NonZeroExit {
            program: program.to_string(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(stdout)
}

fn drain<R>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub raw: RawTable,
    pub detection: Option<Detection>,
}

pub fn extract_source(
    source: &SourceFile,
    registry: &Registry,
    tool: &ExportTool,
) -> Result<Extracted, ExtractError> {
    match source.kind {
        SourceKind::Database => {
            let tables = tool.list_tables(&source.path)?;
            let detection = TableDetector::from_registry(registry).select(&tables)?;
            info!(
                "{}: exporting table '{}'",
                source.file_name(),
                detection.table
            );
            let raw = tool.export_table(&source.path, &detection.table)?;
            Ok(Extracted {
                raw,
                detection: Some(detection),
            })
        }
        SourceKind::Csv => {
            let bytes = std::fs::read(&source.path).map_err(|source_err| ExtractError::Io {
                path: source.path.clone(),
                source: source_err,
            })?;
            let target = source.path.display().to_string();
            let text = decode_bytes(&bytes, tool.encoding).map_err(|err| ExtractError::Io {
                path: source.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
            })?;
            let raw = parse_raw_table(&text, &target)
                .map_err(|source| ExtractError::Csv { target, source })?;
            Ok(Extracted {
                raw,
                detection: None,
            })
        }
    }
}
