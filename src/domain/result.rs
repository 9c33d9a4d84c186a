//! Result type alias for the PDR pipeline

use super::errors::PdrError;

/// Result type alias for pipeline operations
///
/// # Examples
///
/// ```
/// use pdr_ingest::domain::result::Result;
/// use pdr_ingest::domain::errors::PdrError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(PdrError::UnprocessableSubmission("missing header".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, PdrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_question_mark() -> Result<()> {
        fn inner() -> Result<i32> {
            Ok(42)
        }

        let value = inner()?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[test]
    fn test_result_err() {
        let result: Result<i32> = Err(PdrError::PatientNotFound("Patient/9".to_string()));
        assert!(result.is_err());
    }
}
