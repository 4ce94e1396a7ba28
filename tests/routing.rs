//! Integration tests for fallback routing.
//!
//! Drives the router with a scripted in-process invoker so every attempt
//! order is deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use common::{hello, mapping, model, policy, router, scenario_pool, Script, ScriptedInvoker};
use modelroute::error::{Error, ExhaustionReason, InvocationError};
use modelroute::{Mode, ModelDescriptor, ModelPool, RouteRequest, Router};

fn exhausted(err: Error) -> Box<modelroute::error::RoutingExhausted> {
    match err {
        Error::RoutingExhausted(exhausted) => exhausted,
        other => panic!("expected RoutingExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fallback_to_next_priority_model() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with("M1", Script::Fail)
            .with("M2", Script::Answer("hi from M2")),
    );
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    let response = assert_ok!(router.get_response(hello()).await);
    assert_eq!(response.model_name, "M2");
    assert_eq!(response.content, "hi from M2");
    assert_eq!(response.backend_model, "m2");
    assert_eq!(response.tried, vec!["M1", "M2"]);
    assert_eq!(response.usage.map(|u| u.completion_tokens), Some(2));
    assert_eq!(invoker.calls(), vec!["M1", "M2"]);
}

#[tokio::test]
async fn test_exhausted_when_candidates_run_out() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    let err = exhausted(assert_err!(router.get_response(hello()).await));
    assert_eq!(err.tried, vec!["M1", "M2"]);
    assert_eq!(err.reason, ExhaustionReason::NoCandidates);
    assert_eq!(err.last_error.status_code(), Some(503));
    assert_eq!(invoker.calls().len(), 2);
}

#[tokio::test]
async fn test_retry_off_makes_one_attempt() {
    let invoker = Arc::new(ScriptedInvoker::new().with("M2", Script::Answer("unused")));
    let router = router(scenario_pool(), "M1", policy(false, 3), invoker.clone());

    let err = exhausted(assert_err!(router.get_response(hello()).await));
    assert_eq!(err.tried, vec!["M1"]);
    assert_eq!(err.reason, ExhaustionReason::RetryDisabled);
    assert_eq!(invoker.calls(), vec!["M1"]);
}

#[tokio::test]
async fn test_unmapped_task_makes_no_attempts() {
    let invoker = Arc::new(ScriptedInvoker::new().with("M1", Script::Answer("unused")));
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    let err = assert_err!(router.get_response(hello().with_task("coding")).await);
    match err {
        Error::NoDefaultModel { task, mode } => {
            assert_eq!(task, "coding");
            assert_eq!(mode, Mode::Cloud);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_budget_caps_attempts_before_candidates() {
    let pool = ModelPool::new((1..=5).map(|i| model(&format!("M{}", i), 10 - i)).collect()).unwrap();
    let invoker = Arc::new(ScriptedInvoker::new());
    let router = router(pool, "M1", policy(true, 2), invoker.clone());

    let err = exhausted(assert_err!(router.get_response(hello()).await));
    assert_eq!(err.reason, ExhaustionReason::BudgetSpent);
    assert_eq!(err.tried, vec!["M1", "M2"]);
    assert_eq!(invoker.calls().len(), 2);
}

#[tokio::test]
async fn test_same_inputs_same_attempt_order() {
    let build = || {
        let pool = ModelPool::new(vec![
            model("A", 1),
            model("B", 7),
            model("C", 7),
            model("D", 3),
            model("E", 9),
        ])
        .unwrap();
        let invoker = Arc::new(ScriptedInvoker::new().with("D", Script::Answer("done")));
        (router(pool, "C", policy(true, 10), invoker.clone()), invoker)
    };

    let (first_router, first) = build();
    let (second_router, second) = build();
    let a = assert_ok!(first_router.get_response(hello()).await);
    let b = assert_ok!(second_router.get_response(hello()).await);

    // Starts at the mapped default, then descending priority with ties in pool order.
    assert_eq!(a.tried, vec!["C", "E", "B", "D"]);
    assert_eq!(a.tried, b.tried);
    assert_eq!(first.calls(), second.calls());
}

#[tokio::test]
async fn test_never_retries_a_tried_model() {
    let pool = ModelPool::new(vec![model("M1", 1), model("M2", 50), model("M3", 20)]).unwrap();
    let invoker = Arc::new(ScriptedInvoker::new());
    let router = router(pool, "M2", policy(true, 10), invoker.clone());

    let err = exhausted(assert_err!(router.get_response(hello()).await));
    assert_eq!(err.tried, vec!["M2", "M3", "M1"]);

    let mut calls = invoker.calls();
    calls.sort();
    calls.dedup();
    assert_eq!(calls.len(), 3);
}

#[tokio::test]
async fn test_fallback_stays_within_task_and_mode() {
    let pool = ModelPool::new(vec![
        ModelDescriptor::new("coder", "qwen-coder", Mode::Cloud)
            .with_tags(["coding"])
            .with_priority(10),
        ModelDescriptor::new("writer", "gpt-4o", Mode::Cloud)
            .with_tags(["writing"])
            .with_priority(50),
        ModelDescriptor::new("local-coder", "codellama", Mode::Local)
            .with_tags(["coding"])
            .with_priority(90),
        ModelDescriptor::new("backup", "gpt-4o-mini", Mode::Cloud)
            .with_tags(["general"])
            .with_priority(1),
        ModelDescriptor::new("off", "old", Mode::Cloud)
            .with_tags(["coding"])
            .with_priority(99)
            .disabled(),
    ])
    .unwrap();
    let mapping = mapping(&pool, &[("coding", Mode::Cloud, "coder")]);
    let invoker = Arc::new(ScriptedInvoker::new().with("backup", Script::Answer("ok")));
    let router = Router::new(Arc::new(pool), policy(true, 5), mapping, invoker.clone()).unwrap();

    let response = assert_ok!(router.get_response(hello().with_task("coding")).await);
    assert_eq!(response.model_name, "backup");
    assert_eq!(response.tried, vec!["coder", "backup"]);
}

#[tokio::test]
async fn test_mode_override_uses_local_mapping() {
    let pool = ModelPool::new(vec![
        model("cloud", 10),
        ModelDescriptor::new("llama", "llama3.1:8b", Mode::Local).with_tags(["general"]),
    ])
    .unwrap();
    let mapping = mapping(
        &pool,
        &[("general", Mode::Cloud, "cloud"), ("general", Mode::Local, "llama")],
    );
    let invoker = Arc::new(ScriptedInvoker::new().with("llama", Script::Answer("local answer")));
    let router = Router::new(Arc::new(pool), policy(true, 3), mapping, invoker.clone()).unwrap();

    let response = assert_ok!(router.get_response(hello().with_mode(Mode::Local)).await);
    assert_eq!(response.model_name, "llama");
    assert_eq!(response.provider, modelroute::ProviderKind::Ollama);
    assert_eq!(invoker.calls(), vec!["llama"]);
}

#[test]
fn test_router_rejects_mapping_not_valid_for_its_pool() {
    let validated_against = scenario_pool();
    let mapping = mapping(&validated_against, &[("general", Mode::Cloud, "M1")]);

    let serving = ModelPool::new(vec![model("M1", 10).disabled(), model("M2", 5)]).unwrap();
    let invoker = Arc::new(ScriptedInvoker::new().with("M1", Script::Answer("disabled")));
    let Err(err) = Router::new(Arc::new(serving), policy(true, 3), mapping.clone(), invoker.clone())
    else {
        panic!("router accepted a mapping to a disabled model");
    };
    assert_eq!(err.problems().len(), 1, "{:?}", err.problems());
    assert!(err.problems()[0].contains("'M1'") && err.problems()[0].contains("disabled"));

    let missing = ModelPool::new(vec![model("M2", 5)]).unwrap();
    let Err(err) = Router::new(Arc::new(missing), policy(true, 3), mapping, invoker.clone()) else {
        panic!("router accepted a mapping to a missing model");
    };
    assert!(err.problems()[0].contains("does not exist"));
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_empty_messages_rejected_without_attempts() {
    let invoker = Arc::new(ScriptedInvoker::new().with("M1", Script::Answer("unused")));
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    let err = assert_err!(router.get_response(RouteRequest::new(vec![])).await);
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert_eq!(err.kind(), "invalid_request");
    assert!(invoker.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempt_falls_back() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with("M1", Script::Hang)
            .with("M2", Script::Answer("late but fine")),
    );
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    let start = tokio::time::Instant::now();
    let response = assert_ok!(
        router
            .get_response(hello().with_timeout(Duration::from_secs(5)))
            .await
    );
    assert_eq!(response.model_name, "M2");
    assert_eq!(response.tried, vec!["M1", "M2"]);
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reported_as_last_error() {
    let invoker = Arc::new(ScriptedInvoker::new().with("M1", Script::Hang));
    let router = router(scenario_pool(), "M1", policy(false, 3), invoker.clone());

    let err = exhausted(assert_err!(
        router
            .get_response(hello().with_timeout(Duration::from_secs(2)))
            .await
    ));
    assert!(matches!(err.last_error, InvocationError::Timeout(d) if d == Duration::from_secs(2)));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_abandons_call_without_fallback() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with("M1", Script::Hang)
            .with("M2", Script::Answer("should not run")),
    );
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    // Caller gives up well before the 60s attempt timeout.
    let outcome = tokio::time::timeout(Duration::from_secs(1), router.get_response(hello())).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(invoker.calls(), vec!["M1"]);
}

#[tokio::test]
async fn test_concurrent_calls_are_independent() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with("M1", Script::Fail)
            .with("M2", Script::Answer("ok")),
    );
    let router = Arc::new(router(scenario_pool(), "M1", policy(true, 3), invoker.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { router.get_response(hello()).await })
        })
        .collect();

    for handle in handles {
        let response = assert_ok!(handle.await.unwrap());
        assert_eq!(response.tried, vec!["M1", "M2"]);
    }
    assert_eq!(invoker.calls().len(), 16);
}

#[test]
fn test_blocking_entry_point_shares_fallback() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with("M1", Script::Fail)
            .with("M2", Script::Answer("blocking answer")),
    );
    let router = router(scenario_pool(), "M1", policy(true, 3), invoker.clone());

    let response = router.get_response_blocking(hello()).unwrap();
    assert_eq!(response.model_name, "M2");
    assert_eq!(response.content, "blocking answer");

    let err = router
        .get_response_blocking(hello().with_task("coding"))
        .unwrap_err();
    assert!(matches!(err, Error::NoDefaultModel { .. }));
}
