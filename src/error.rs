use thiserror::Error;

pub(crate) type Result<T> = std::result::Result<T, EmError>;

#[derive(Error, Debug)]
pub(crate) enum EmError {
    // a fragment name showed up again after other fragments were seen in between
    #[error("alignments are not properly sorted: read '{name}' has alignments which are non-consecutive")]
    UnsortedAlignments { name: String },

    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("alignment file headers do not match for '{first}' and '{second}'")]
    HeaderMismatch { first: String, second: String },

    #[error("unable to read priors file '{path}': {source}")]
    Priors {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} thread panicked")]
    ThreadPanic { stage: &'static str },

    #[error(transparent)]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] confy::ConfyError),
}

impl EmError {
    pub(crate) fn invalid_parameter(parameter: &str, reason: impl Into<String>) -> EmError {
        EmError::InvalidParameter { parameter: parameter.to_string(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsorted_message_names_the_read() {
        let error = EmError::UnsortedAlignments { name: "read_42".to_string() };
        let msg = format!("{error}");
        assert!(msg.contains("'read_42'"));
        assert!(msg.contains("non-consecutive"));
    }

    #[test]
    fn test_invalid_parameter() {
        let error = EmError::invalid_parameter("forget-param", "must be between 0.5 and 1.0");
        let msg = format!("{error}");
        assert!(msg.contains("'forget-param'"));
        assert!(msg.contains("between 0.5 and 1.0"));
    }

    #[test]
    fn test_header_mismatch() {
        let error = EmError::HeaderMismatch { first: "a.bam".to_string(), second: "b.bam".to_string() };
        assert_eq!(format!("{error}"), "alignment file headers do not match for 'a.bam' and 'b.bam'");
    }
}
