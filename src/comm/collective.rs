//! Error handling and output ordering across ranks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::Communicator;

/// Failure of a collective section.
#[derive(Debug, thiserror::Error)]
pub enum CollectiveError {
    /// This rank failed.
    #[error(transparent)]
    Local(anyhow::Error),

    /// This rank succeeded but another did not.
    #[error("Some ranks failed")]
    RemoteFailure,
}

/// Runs `f`, then tells every rank whether any rank failed.
///
/// Without this, a rank that fails inside a section other ranks expect it
/// to finish leaves them blocked in the next collective call. A failure on
/// any rank fails the section on all of them: the failing rank gets its own
/// error back, the others get [`CollectiveError::RemoteFailure`].
///
/// A panic in `f` counts as a failure: the other ranks are told before the
/// panic resumes on this rank.
pub fn collective<T, F>(comm: &dyn Communicator, f: F) -> Result<T, CollectiveError>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    let local_failure = !matches!(result, Ok(Ok(_)));
    let failed = comm.allgather(local_failure.to_string());

    match result {
        Err(payload) => panic::resume_unwind(payload),
        Ok(Err(e)) => Err(CollectiveError::Local(e)),
        Ok(Ok(_)) if failed.iter().any(|f| f == "true") => Err(CollectiveError::RemoteFailure),
        Ok(Ok(value)) => Ok(value),
    }
}

/// The message of a caught panic, as far as it can be recovered.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test body panicked".to_string()
    }
}

/// Runs `f` on one rank at a time, in rank order.
pub fn rotate<T, F>(comm: &dyn Communicator, f: F) -> T
where
    F: FnOnce() -> T,
{
    comm.barrier();
    for _ in 0..comm.rank() {
        comm.barrier();
    }

    let value = f();

    for _ in comm.rank()..comm.size() {
        comm.barrier();
    }
    comm.barrier();
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalWorld;
    use std::sync::Mutex;

    #[test]
    fn test_all_succeed() {
        let results = LocalWorld::run(3, |comm| collective(comm.as_ref(), || Ok(comm.rank() * 2)));
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 2, 4]);
    }

    #[test]
    fn test_one_failure_fails_everyone() {
        let results = LocalWorld::run(3, |comm| {
            collective(comm.as_ref(), || {
                if comm.rank() == 1 {
                    anyhow::bail!("boom on rank 1");
                }
                Ok(())
            })
        });

        assert!(matches!(results[0], Err(CollectiveError::RemoteFailure)));
        match &results[1] {
            Err(CollectiveError::Local(e)) => assert_eq!(e.to_string(), "boom on rank 1"),
            other => panic!("expected local error, got {:?}", other),
        }
        assert_eq!(
            results[2].as_ref().unwrap_err().to_string(),
            "Some ranks failed"
        );
    }

    #[test]
    fn test_panic_fails_everyone_then_resumes() {
        let results = LocalWorld::run(2, |comm| {
            panic::catch_unwind(AssertUnwindSafe(|| {
                collective(comm.as_ref(), || {
                    assert_ne!(comm.rank(), 0, "rank 0 gave up");
                    Ok(())
                })
            }))
        });

        let payload = results[0].as_ref().unwrap_err();
        assert!(panic_message(payload.as_ref()).contains("rank 0 gave up"));
        assert!(matches!(results[1], Ok(Err(CollectiveError::RemoteFailure))));
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("plain")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "plain");
        let payload = panic::catch_unwind(|| panic!("formatted {}", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 3");
    }

    #[test]
    fn test_rotate_runs_in_rank_order() {
        let order = Mutex::new(Vec::new());
        LocalWorld::run(4, |comm| {
            rotate(comm.as_ref(), || order.lock().unwrap().push(comm.rank()));
        });
        assert_eq!(order.into_inner().unwrap(), vec![0, 1, 2, 3]);
    }
}
