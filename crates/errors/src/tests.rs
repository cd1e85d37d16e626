use crate::*;

#[test]
fn test_error_display() {
    let err = OrchestratorError::TaskNotFound {
        id: "abc".to_string(),
    };
    assert_eq!(err.to_string(), "任务未找到: abc");

    let err = OrchestratorError::RateLimitExceeded {
        retry_after_seconds: 12,
    };
    assert_eq!(err.to_string(), "请求过于频繁，请在 12 秒后重试");

    assert_eq!(OrchestratorError::Cancelled.to_string(), "任务已取消");
}

#[test]
fn test_stable_codes() {
    assert_eq!(
        OrchestratorError::validation("x").code(),
        "VALIDATION_ERROR"
    );
    assert_eq!(
        OrchestratorError::QueueUnavailable("down".into()).code(),
        "QUEUE_UNAVAILABLE"
    );
    assert_eq!(
        OrchestratorError::WorkerLost("gone".into()).code(),
        "WORKER_LOST"
    );
    assert_ne!(
        OrchestratorError::WorkerLost("gone".into()).code(),
        OrchestratorError::EngineFailure("boom".into()).code()
    );
}

#[test]
fn test_retryable_classification() {
    assert!(OrchestratorError::QueueUnavailable("down".into()).is_retryable());
    assert!(OrchestratorError::RateLimitExceeded {
        retry_after_seconds: 1
    }
    .is_retryable());
    assert!(!OrchestratorError::validation("bad").is_retryable());
    assert!(!OrchestratorError::EngineFailure("boom".into()).is_retryable());
}

#[test]
fn test_user_message_hides_internal_details() {
    let err = OrchestratorError::Store("connection refused at 10.0.0.3:6379".into());
    assert!(!err.user_message().contains("10.0.0.3"));

    let err = OrchestratorError::validation("target不能为空");
    assert!(err.user_message().contains("target不能为空"));
}

#[test]
fn test_from_serde_json_error() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: OrchestratorError = json_err.into();
    assert!(matches!(err, OrchestratorError::Serialization(_)));
}

#[test]
fn test_helper_constructors() {
    match OrchestratorError::task_not_found("t-1") {
        OrchestratorError::TaskNotFound { id } => assert_eq!(id, "t-1"),
        other => panic!("unexpected error: {other:?}"),
    }
    match OrchestratorError::batch_not_found("b-1") {
        OrchestratorError::BatchNotFound { id } => assert_eq!(id, "b-1"),
        other => panic!("unexpected error: {other:?}"),
    }
}
