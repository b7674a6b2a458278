use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("invalid options '{input}': {reason}")]
    Options { input: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redb_errors_keep_their_stage() {
        let e: Error =
            redb::TableError::TableDoesNotExist("usages".to_string()).into();
        assert!(matches!(e, Error::RedbTable(_)));
        assert!(e.to_string().starts_with("database table error"));
    }
}
