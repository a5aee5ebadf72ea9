use async_trait::async_trait;
use sqllogictest::{DBOutput, DefaultColumnType};
use std::path::Path;
use tempfile::TempDir;

pub mod ast;
pub mod engine;
pub mod parser;
pub mod storage;

use engine::{Database, EngineError, StatementOutput};

/// Database wrapper for the sqllogictest runner. Each instance runs
/// against a throwaway backing file that lives for the script.
pub struct ScriptDB {
    db: Database,
    _dir: Option<TempDir>,
}

impl ScriptDB {
    /// Fresh database in its own temporary directory.
    pub fn new() -> Result<Self, EngineError> {
        let dir = TempDir::new().map_err(|err| EngineError::Storage(err.into()))?;
        let db = Database::open(dir.path().join("data"))?;
        Ok(Self {
            db,
            _dir: Some(dir),
        })
    }

    /// Database over a caller-owned backing file, so the file can be
    /// inspected after the script runs.
    pub fn at(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self {
            db: Database::open(path)?,
            _dir: None,
        })
    }
}

#[async_trait]
impl sqllogictest::AsyncDB for ScriptDB {
    type Error = EngineError;
    type ColumnType = DefaultColumnType;

    async fn run(&mut self, sql: &str) -> Result<DBOutput<Self::ColumnType>, Self::Error> {
        match self.db.run_statement(sql)? {
            StatementOutput::Rows(rows) => Ok(DBOutput::Rows {
                types: vec![DefaultColumnType::Text; rows.first().map_or(0, Vec::len)],
                rows,
            }),
            StatementOutput::Complete => Ok(DBOutput::StatementComplete(0)),
        }
    }
}

/// Run a single sqllogictest script file against a fresh database.
pub async fn run_script_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut tester = sqllogictest::Runner::new(|| async { ScriptDB::new() });
    let content = std::fs::read_to_string(path)?;
    let records = sqllogictest::parser::parse_with_name::<DefaultColumnType>(&content, path)?;
    tester.run_multi(records)?;
    Ok(())
}
