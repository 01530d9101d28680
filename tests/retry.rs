use anyhow::{Context, Result};
use cloudgather::testing::*;
use cloudgather::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[test]
fn function_form_retries_with_same_argument() -> Result<()> {
    let mut seen = Vec::new();
    let mut describe = retry_fn_on_timeout(|vdc: String| {
        seen.push(vdc.clone());
        if seen.len() < 2 {
            Err(CloudError::timeout("describe vdc timed out").into())
        } else {
            Ok(format!("{vdc}: ready"))
        }
    });

    assert_eq!(describe("vdc-7".to_string())?, "vdc-7: ready");
    drop(describe);
    assert_eq!(seen, vec!["vdc-7", "vdc-7"]);
    Ok(())
}

#[test]
fn apply_counts_are_per_call() -> Result<()> {
    let script = ScriptedOperation::new()
        .then(1, Step::Fail(ErrorKind::Timeout))
        .then(2, Step::Fail(ErrorKind::Timeout))
        .then(2, Step::Fail(ErrorKind::Timeout))
        .always(Step::Succeed("image"));
    let mut lookup = RetryOnTimeout::new(|id: u32| script.run(&id));

    assert_eq!(lookup.apply(1)?, "image");
    assert_eq!(lookup.apply(2)?, "image");
    assert_eq!(script.calls(&1), 2);
    assert_eq!(script.calls(&2), 3);
    Ok(())
}

#[test]
fn custom_bound_is_honored() {
    let script: ScriptedOperation<(), ()> =
        ScriptedOperation::new().always(Step::Fail(ErrorKind::Timeout));
    let mut session = RetryOnTimeout::with_config(
        || script.supply(),
        RetryConfig::on_timeout().with_max_attempts(5),
    );

    assert_eq!(session.config().max_attempts, 5);
    assert!(session.get().is_err());
    assert_eq!(script.total_calls(), 5);
}

#[test]
fn timeout_behind_context_is_retried() -> Result<()> {
    let mut calls = 0;
    let value = RetryOnTimeout::new(|| {
        calls += 1;
        if calls == 1 {
            Err(CloudError::timeout("socket read"))
                .context("GET /api/org")
                .context("listing orgs")
        } else {
            Ok(calls)
        }
    })
    .get()?;

    assert_eq!(value, 2);
    Ok(())
}

#[test]
fn io_timeouts_count_as_timeouts() -> Result<()> {
    let mut calls = 0;
    let value = retry_with_backoff(&RetryConfig::on_timeout(), || {
        calls += 1;
        if calls < 3 {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect").into())
        } else {
            Ok("connected")
        }
    })?;

    assert_eq!(value, "connected");
    assert_eq!(calls, 3);
    Ok(())
}

#[test]
fn backoff_waits_between_attempts() {
    let config = RetryConfig {
        initial_delay_ms: 10,
        max_delay_ms: 1000,
        ..RetryConfig::on_timeout()
    };
    let start = Instant::now();
    let result: Result<()> =
        retry_with_backoff(&config, || Err(CloudError::timeout("slow").into()));

    assert!(result.is_err());
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn pending_form_retries_on_pool() -> Result<()> {
    let workers = thread_pool(Some(2))?;
    let calls = Arc::new(AtomicUsize::new(0));

    let pool = Arc::clone(&workers);
    let counter = Arc::clone(&calls);
    let pending = retry_pending(&workers, RetryConfig::on_timeout(), move || {
        let counter = Arc::clone(&counter);
        Ok(pool.submit(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CloudError::timeout("deploy status").into())
            } else {
                Ok("deployed")
            }
        }))
    });

    assert_eq!(pending.wait_timeout(Duration::from_secs(5))?, "deployed");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn pending_form_stops_on_authorization() {
    let script: ScriptedOperation<(), u8> =
        ScriptedOperation::new().always(Step::Fail(ErrorKind::Authorization));
    let op = script.clone();

    let err = retry_pending(&direct(), RetryConfig::on_timeout(), move || op.start(&()))
        .wait()
        .unwrap_err();

    assert_eq!(script.total_calls(), 1);
    assert_failure_class(&err, FailureClass::Authorization);
}

#[test]
fn pending_form_gives_up_after_three_attempts() {
    let script: ScriptedOperation<(), u8> =
        ScriptedOperation::new().always(Step::Fail(ErrorKind::Timeout));
    let op = script.clone();

    let err = retry_pending(&direct(), RetryConfig::on_timeout(), move || op.start(&()))
        .wait()
        .unwrap_err();

    assert_eq!(script.total_calls(), 3);
    assert_failure_class(&err, FailureClass::Timeout);
}

#[test]
fn pending_form_retries_synchronous_timeouts() -> Result<()> {
    let script = ScriptedOperation::new()
        .then((), Step::Throw(ErrorKind::Timeout))
        .always(Step::Succeed(9));
    let op = script.clone();

    let value =
        retry_pending(&direct(), RetryConfig::on_timeout(), move || op.start(&())).wait()?;

    assert_eq!(value, 9);
    assert_eq!(script.total_calls(), 2);
    Ok(())
}
