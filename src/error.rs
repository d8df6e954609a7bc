use thiserror::Error;

/// Result alias used by every pipeline stage.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failure kinds surfaced by the pipeline.
///
/// Each message names the precondition that failed so a caller can send the
/// operator back to the stage that produces the missing input.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A file could not be opened, read, created or written.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A malformed or incomplete operator input (mapping, aggregate spec, vendor name).
    #[error("{0}")]
    Validation(String),

    /// An import table could not be created.
    #[error("failed to create table '{table}': {message}")]
    Schema { table: String, message: String },

    /// A match or registry query failed while executing.
    #[error("query failed: {0}")]
    Query(String),

    /// A referenced table, file or artifact does not exist.
    #[error("{0}")]
    NotFound(String),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        PipelineError::NotFound(message.into())
    }

    /// Maps a CSV parse failure on a given 1-based file line into an I/O error.
    pub fn csv(context: impl Into<String>, err: csv::Error) -> Self {
        let context = context.into();
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(source) => PipelineError::Io { context, source },
                other => PipelineError::Io {
                    context,
                    source: std::io::Error::other(format!("{other:?}")),
                },
            }
        } else {
            PipelineError::Io {
                context,
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
            }
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Query(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failed_precondition() {
        let err = PipelineError::validation("missing required field: sku");
        assert_eq!(err.to_string(), "missing required field: sku");

        let err = PipelineError::Schema {
            table: "csv_import_acme_1".into(),
            message: "disk full".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to create table 'csv_import_acme_1': disk full"
        );
    }

    #[test]
    fn sqlite_errors_become_query_errors() {
        let err: PipelineError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, PipelineError::Query(_)));
    }
}
