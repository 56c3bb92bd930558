use super::*;

#[test]
fn test_queue_full_is_bad_request() {
    let error = Error::QueueFull;
    assert_eq!(error.kind(), ErrorKind::BadRequest);
    assert!(error.to_string().contains("try again later"));
}

#[test]
fn test_not_found_is_bad_request() {
    let error = Error::NotFound(BuildId::new());
    assert_eq!(error.kind(), ErrorKind::BadRequest);
    assert_eq!(error.kind().as_str(), "BAD_REQUEST");
}

#[test]
fn test_store_error_is_internal() {
    let error: Error = StoreError::Internal("disk full".to_string()).into();
    assert_eq!(error.kind(), ErrorKind::Internal);
    assert_eq!(error.kind().as_str(), "INTERNAL_ERROR");
    assert!(error.to_string().contains("disk full"));
}
