//! Write-ahead log records and their textual wire format.
//!
//! Records are newline-delimited and self-describing:
//!
//! ```text
//! < create <type> table <name> >
//! < <uuid>, <table>, INSERT|UPDATE|DELETE, <key>, <oldval>, <newval> >
//! < <uuid> start >
//! < <uuid> commit >
//! < [<uuid>[, <uuid>]*] checkpoint >
//! ```

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::common::{Key, Value};
use crate::index::IndexType;
use crate::recovery::RecoveryError;

/// The kind of change an edit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Action::Insert),
            "UPDATE" => Some(Action::Update),
            "DELETE" => Some(Action::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record in the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// DDL: a table was created.
    Table {
        index_type: IndexType,
        name: String,
    },
    /// A data-changing operation, written before the change is applied.
    Edit {
        client_id: Uuid,
        table: String,
        action: Action,
        key: Key,
        old_value: Value,
        new_value: Value,
    },
    /// A transaction started.
    Start { client_id: Uuid },
    /// A transaction finished.
    Commit { client_id: Uuid },
    /// The transactions active when a checkpoint was taken.
    Checkpoint { active: Vec<Uuid> },
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Table { index_type, name } => {
                write!(f, "< create {} table {} >", index_type.as_str(), name)
            }
            LogRecord::Edit {
                client_id,
                table,
                action,
                key,
                old_value,
                new_value,
            } => write!(
                f,
                "< {}, {}, {}, {}, {}, {} >",
                client_id, table, action, key, old_value, new_value
            ),
            LogRecord::Start { client_id } => write!(f, "< {} start >", client_id),
            LogRecord::Commit { client_id } => write!(f, "< {} commit >", client_id),
            LogRecord::Checkpoint { active } => {
                if active.is_empty() {
                    write!(f, "< checkpoint >")
                } else {
                    let ids: Vec<String> = active.iter().map(|id| id.to_string()).collect();
                    write!(f, "< {} checkpoint >", ids.join(", "))
                }
            }
        }
    }
}

impl FromStr for LogRecord {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || RecoveryError::ParseError(format!("could not parse log: {:?}", s));
        let inner = s
            .trim()
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(parse_err)?
            .trim();
        if let Some(rest) = inner.strip_prefix("create ") {
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() != 3 || fields[1] != "table" {
                return Err(parse_err());
            }
            let index_type = IndexType::parse(fields[0]).ok_or_else(parse_err)?;
            return Ok(LogRecord::Table {
                index_type,
                name: fields[2].to_string(),
            });
        }
        if let Some(rest) = inner.strip_suffix(" start") {
            let client_id = Uuid::parse_str(rest.trim()).map_err(|_| parse_err())?;
            return Ok(LogRecord::Start { client_id });
        }
        if let Some(rest) = inner.strip_suffix(" commit") {
            let client_id = Uuid::parse_str(rest.trim()).map_err(|_| parse_err())?;
            return Ok(LogRecord::Commit { client_id });
        }
        if inner == "checkpoint" {
            return Ok(LogRecord::Checkpoint { active: Vec::new() });
        }
        if let Some(rest) = inner.strip_suffix(" checkpoint") {
            let mut active = Vec::new();
            for part in rest.split(',') {
                let id = Uuid::parse_str(part.trim()).map_err(|_| parse_err())?;
                active.push(id);
            }
            return Ok(LogRecord::Checkpoint { active });
        }
        let fields: Vec<&str> = inner.split(", ").collect();
        if fields.len() != 6 {
            return Err(parse_err());
        }
        let client_id = Uuid::parse_str(fields[0]).map_err(|_| parse_err())?;
        let action = Action::parse(fields[2]).ok_or_else(parse_err)?;
        let key = fields[3].parse::<Key>().map_err(|_| parse_err())?;
        let old_value = fields[4].parse::<Value>().map_err(|_| parse_err())?;
        let new_value = fields[5].parse::<Value>().map_err(|_| parse_err())?;
        Ok(LogRecord::Edit {
            client_id,
            table: fields[1].to_string(),
            action,
            key,
            old_value,
            new_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: LogRecord) {
        let line = record.to_string();
        let parsed: LogRecord = line.parse().unwrap();
        assert_eq!(parsed, record, "line {:?}", line);
    }

    #[test]
    fn test_table_record() {
        round_trip(LogRecord::Table {
            index_type: IndexType::BTree,
            name: "users".to_string(),
        });
        round_trip(LogRecord::Table {
            index_type: IndexType::Hash,
            name: "t1".to_string(),
        });
    }

    #[test]
    fn test_edit_record() {
        round_trip(LogRecord::Edit {
            client_id: Uuid::new_v4(),
            table: "users".to_string(),
            action: Action::Update,
            key: 10,
            old_value: -5,
            new_value: 999,
        });
    }

    #[test]
    fn test_transaction_records() {
        round_trip(LogRecord::Start {
            client_id: Uuid::new_v4(),
        });
        round_trip(LogRecord::Commit {
            client_id: Uuid::new_v4(),
        });
    }

    #[test]
    fn test_checkpoint_records() {
        round_trip(LogRecord::Checkpoint { active: Vec::new() });
        round_trip(LogRecord::Checkpoint {
            active: vec![Uuid::new_v4()],
        });
        round_trip(LogRecord::Checkpoint {
            active: vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()],
        });
    }

    #[test]
    fn test_empty_checkpoint_format() {
        let record = LogRecord::Checkpoint { active: Vec::new() };
        assert_eq!(record.to_string(), "< checkpoint >");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!("".parse::<LogRecord>().is_err());
        assert!("< >".parse::<LogRecord>().is_err());
        assert!("not a log".parse::<LogRecord>().is_err());
        assert!("< bees start".parse::<LogRecord>().is_err());
        assert!("< nope start >".parse::<LogRecord>().is_err());
    }
}
