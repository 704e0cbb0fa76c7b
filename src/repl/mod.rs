//! The line-oriented command surface. Parsing is a thin layer over the
//! transactional handlers in [`crate::recovery::handlers`].

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use uuid::Uuid;

use crate::database::Database;
use crate::index::IndexType;
use crate::query;
use crate::recovery::{handlers, RecoveryManager};
use crate::transaction::TransactionManager;

/// One client session over the database: every command runs under the
/// session's client id, which owns at most one transaction at a time.
pub struct Session {
    db: Arc<Database>,
    tm: Arc<TransactionManager>,
    rm: Arc<RecoveryManager>,
    client_id: Uuid,
}

impl Session {
    pub fn new(db: Arc<Database>, tm: Arc<TransactionManager>, rm: Arc<RecoveryManager>) -> Self {
        Self {
            db,
            tm,
            rm,
            client_id: Uuid::new_v4(),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Commit the session's transaction if one is still running. Called
    /// when a session ends.
    pub fn finish(&self) {
        if self.tm.get_transaction(self.client_id).is_some() {
            let _ = handlers::commit(&self.tm, &self.rm, self.client_id);
        }
    }

    /// Parse and execute one command line, writing output to `w`.
    pub fn execute(&self, line: &str, w: &mut dyn Write) -> Result<()> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = fields.first() else {
            return Ok(());
        };
        match command {
            "create" => {
                // Usage: create <btree|hash> table <table>
                if fields.len() != 4 || fields[2] != "table" {
                    bail!("usage: create <btree|hash> table <table>");
                }
                let index_type = IndexType::parse(fields[1])
                    .ok_or_else(|| anyhow!("usage: create <btree|hash> table <table>"))?;
                handlers::create_table(&self.db, &self.rm, index_type, fields[3])?;
            }
            "find" => {
                // Usage: find <key> from <table>
                if fields.len() != 4 || fields[2] != "from" {
                    bail!("usage: find <key> from <table>");
                }
                let key = parse_int(fields[1])?;
                handlers::find(
                    &self.db,
                    &self.tm,
                    &self.rm,
                    fields[3],
                    key,
                    self.client_id,
                    w,
                )?;
            }
            "insert" => {
                // Usage: insert <key> <value> into <table>
                if fields.len() != 5 || fields[3] != "into" {
                    bail!("usage: insert <key> <value> into <table>");
                }
                let key = parse_int(fields[1])?;
                let value = parse_int(fields[2])?;
                handlers::insert(
                    &self.db,
                    &self.tm,
                    &self.rm,
                    fields[4],
                    key,
                    value,
                    self.client_id,
                )?;
            }
            "update" => {
                // Usage: update <table> <key> <value>
                if fields.len() != 4 {
                    bail!("usage: update <table> <key> <value>");
                }
                let key = parse_int(fields[2])?;
                let value = parse_int(fields[3])?;
                handlers::update(
                    &self.db,
                    &self.tm,
                    &self.rm,
                    fields[1],
                    key,
                    value,
                    self.client_id,
                )?;
            }
            "delete" => {
                // Usage: delete <key> from <table>
                if fields.len() != 4 || fields[2] != "from" {
                    bail!("usage: delete <key> from <table>");
                }
                let key = parse_int(fields[1])?;
                handlers::delete(&self.db, &self.tm, &self.rm, fields[3], key, self.client_id)?;
            }
            "select" => {
                // Usage: select from <table>
                if fields.len() != 3 || fields[1] != "from" {
                    bail!("usage: select from <table>");
                }
                handlers::select(&self.db, fields[2], w)?;
            }
            "join" => {
                // Usage: join <table1> <key|val> on <table2> <key|val>
                if fields.len() != 6
                    || fields[3] != "on"
                    || !matches!(fields[2], "key" | "val")
                    || !matches!(fields[5], "key" | "val")
                {
                    bail!("usage: join <table1> <key|val> on <table2> <key|val>");
                }
                let left = self.db.get_table(fields[1])?;
                let right = self.db.get_table(fields[4])?;
                let pairs = query::join(
                    left.as_ref(),
                    right.as_ref(),
                    fields[2] == "key",
                    fields[5] == "key",
                )?;
                for pair in pairs {
                    writeln!(
                        w,
                        "{{({}, {}), ({}, {})}}",
                        pair.left.key, pair.left.value, pair.right.key, pair.right.value
                    )?;
                }
            }
            "transaction" => {
                // Usage: transaction <begin|commit>
                if fields.len() != 2 {
                    bail!("usage: transaction <begin|commit>");
                }
                match fields[1] {
                    "begin" => handlers::begin(&self.tm, &self.rm, self.client_id)?,
                    "commit" => handlers::commit(&self.tm, &self.rm, self.client_id)?,
                    _ => bail!("usage: transaction <begin|commit>"),
                }
            }
            "lock" => {
                // Usage: lock <table> <key>
                if fields.len() != 3 {
                    bail!("usage: lock <table> <key>");
                }
                let key = parse_int(fields[2])?;
                handlers::lock(&self.db, &self.tm, &self.rm, fields[1], key, self.client_id)?;
            }
            "checkpoint" => {
                // Usage: checkpoint
                if fields.len() != 1 {
                    bail!("usage: checkpoint");
                }
                self.rm.checkpoint()?;
            }
            "abort" => {
                // Usage: abort
                if fields.len() != 1 {
                    bail!("usage: abort");
                }
                handlers::abort(&self.tm, &self.rm, self.client_id)?;
            }
            "crash" => {
                // Usage: crash
                if fields.len() != 1 {
                    bail!("usage: crash");
                }
                // Exit without flushing anything; recovery cleans up.
                std::process::exit(2);
            }
            "pretty" => {
                // Usage: pretty [<pn>] from <table>
                match fields.as_slice() {
                    [_, "from", table] => {
                        let table = self.db.get_table(table)?;
                        table.print(w)?;
                    }
                    [_, pn, "from", table] => {
                        let pagenum = parse_int(pn)?;
                        let table = self.db.get_table(table)?;
                        table.print_pn(pagenum, w)?;
                    }
                    _ => bail!("usage: pretty [<pn>] from <table>"),
                }
            }
            other => bail!("unknown command: {}", other),
        }
        Ok(())
    }
}

fn parse_int(s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map_err(|e| anyhow!("invalid integer {:?}: {}", s, e))
}
