use anyhow::Result;
use cloudgather::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn polls_until_background_job_completes() -> Result<()> {
    let workers = thread_pool(Some(1))?;
    let deployed = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&deployed);
    let job = workers.submit(move || {
        thread::sleep(Duration::from_millis(30));
        flag.store(true, Ordering::SeqCst);
        Ok(())
    });

    let polls = AtomicUsize::new(0);
    let done = RetryablePredicate::new(Duration::from_secs(5))
        .with_period(Duration::from_millis(5), Duration::from_millis(20))
        .apply(|| {
            polls.fetch_add(1, Ordering::SeqCst);
            Ok(deployed.load(Ordering::SeqCst))
        })?;

    assert!(done);
    assert!(polls.load(Ordering::SeqCst) > 1);
    job.wait()?;
    Ok(())
}

#[test]
fn status_call_failures_other_than_timeouts_stop_polling() {
    let err = RetryablePredicate::new(Duration::from_secs(5))
        .apply(|| Err(CloudError::new(ErrorKind::NotFound, "task vanished").into()))
        .unwrap_err();

    assert_eq!(classify(&err), FailureClass::Other);
}
